//! Archive reader.
//!
//! Opening an archive parses and validates the whole index; payloads are
//! only touched by [`Archive::read_file`], [`Archive::extract`] and
//! [`Archive::test`]. Extraction and testing fan out one pool task per file
//! and consume results in completion order.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use bigpack_cipher::{CipherStream, StreamState};
use bigpack_common::crc::hash_bytes;
use bigpack_common::{BinaryReader, WorkerPool};
use bigpack_deflate::Compressor;
use encoding_rs::Encoding;
use zerocopy::FromBytes;

use crate::format::{
    is_tamper_payload, ArchiveHeader, CompressionMethod, FileDataHeader, FileInfoEntry,
    FolderEntry, SectionHeader, TocEntry, ARCHIVE_HEADER_SIZE, FILE_DATA_HEADER_SIZE,
    FORMAT_VERSION, MAX_FOLDER_DEPTH,
};
use crate::names::{decode_text, NameTable};
use crate::options::ReadOptions;
use crate::progress::Event;
use crate::signer::{self, Digest};
use crate::{Error, Result};

/// Attempts made to write one extracted file.
const WRITE_ATTEMPTS: u32 = 3;

/// Base delay between write attempts.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// A file reached by walking a TOC.
#[derive(Debug, Clone, Copy)]
pub struct FileRef<'a> {
    /// TOC index.
    pub toc: usize,
    /// File-info index.
    pub index: usize,
    /// Folder path, `\` separated, empty for the TOC root.
    pub folder: &'a str,
    pub name: &'a str,
    pub info: &'a FileInfoEntry,
}

impl FileRef<'_> {
    /// Folder path and name joined with `\`.
    pub fn path(&self) -> String {
        if self.folder.is_empty() {
            self.name.to_owned()
        } else {
            format!("{}\\{}", self.folder, self.name)
        }
    }

    pub fn method(&self) -> CompressionMethod {
        // Validated when the archive was opened.
        self.info
            .compression()
            .unwrap_or(CompressionMethod::Uncompressed)
    }
}

/// Result of [`Archive::extract`].
#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub written: usize,
    /// Files whose payload could not be decoded.
    pub failed: Vec<String>,
    /// Files written whose content does not match the stored CRC.
    pub crc_mismatches: Vec<String>,
}

impl ExtractReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.crc_mismatches.is_empty()
    }
}

/// Result of [`Archive::verify_signatures`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureCheck {
    pub archive: bool,
    /// `None` when the archive carries no tool signature.
    pub tool: Option<bool>,
}

/// A decoded file.
struct Payload {
    header: FileDataHeader,
    data: Vec<u8>,
}

/// An open archive.
pub struct Archive {
    stream: Arc<CipherStream>,
    header: ArchiveHeader,
    section: SectionHeader,
    tocs: Vec<TocEntry>,
    folders: Vec<FolderEntry>,
    files: Vec<FileInfoEntry>,
    names: NameTable,
    options: ReadOptions,
}

impl Archive {
    /// Open an archive with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    /// Open an archive, plain or encrypted.
    pub fn open_with<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        let stream = CipherStream::open(path, StreamState::ReadUnknown, None)?;
        let len = stream.len()?;

        if len < ARCHIVE_HEADER_SIZE as u64 {
            return Err(Error::Format(format!(
                "{} is too small for an archive ({len} bytes)",
                path.display()
            )));
        }

        let header = {
            let bytes = stream.view_at(0, ARCHIVE_HEADER_SIZE)?;
            BinaryReader::new(&bytes).read_struct::<ArchiveHeader>()?
        };
        if !header.has_magic() {
            return Err(Error::Format(format!(
                "{} is not a .big archive",
                path.display()
            )));
        }
        if header.version.get() != FORMAT_VERSION {
            tracing::warn!(version = header.version.get(), "unexpected archive version");
        }
        if header.index_end() > header.data_base() || header.data_base() > len {
            return Err(Error::Format(format!(
                "index ends at {} but file data starts at {} of {len} bytes",
                header.index_end(),
                header.data_base()
            )));
        }

        let (section, tocs, folders, files, names) = {
            let index = stream.view_at(
                ARCHIVE_HEADER_SIZE as u64,
                header.section_header_size.get() as usize,
            )?;
            parse_index(&index, options.legacy_encoding)?
        };

        let archive = Self {
            stream: Arc::new(stream),
            header,
            section,
            tocs,
            folders,
            files,
            names,
            options,
        };
        archive.validate(len)?;

        tracing::debug!(
            path = %path.display(),
            encrypted = archive.is_encrypted(),
            tocs = archive.tocs.len(),
            files = archive.files.len(),
            "archive opened"
        );
        Ok(archive)
    }

    fn validate(&self, len: u64) -> Result<()> {
        let folder_count = self.folders.len();
        let file_count = self.files.len();

        for (i, toc) in self.tocs.iter().enumerate() {
            let folders = toc.first_folder.get() as usize..toc.last_folder.get() as usize;
            let files = toc.first_file.get() as usize..toc.last_file.get() as usize;
            let root = toc.start_hierarchy.get() as usize;
            if folders.start > folders.end
                || folders.end > folder_count
                || files.start > files.end
                || files.end > file_count
                || root >= folder_count
            {
                return Err(Error::Format(format!("TOC {i} has out-of-range indices")));
            }
        }

        for (i, folder) in self.folders.iter().enumerate() {
            let subfolders = folder.subfolders();
            let files = folder.files();
            let ordered = subfolders.is_empty() || subfolders.start > i;
            if subfolders.start > subfolders.end
                || subfolders.end > folder_count
                || !ordered
                || files.start > files.end
                || files.end > file_count
            {
                return Err(Error::Format(format!("folder {i} has out-of-range indices")));
            }
            self.lookup_name(folder.name_offset.get())?;
        }
        check_nesting(&self.folders)?;

        let data_base = self.header.data_base();
        for (i, info) in self.files.iter().enumerate() {
            self.lookup_name(info.name_offset.get())?;
            info.compression()?;

            let offset = info.file_data_offset.get() as u64;
            let end = data_base + offset + info.compressed_len.get() as u64;
            if offset < FILE_DATA_HEADER_SIZE as u64 || end > len {
                return Err(Error::Format(format!(
                    "payload of file {i} lies outside the archive"
                )));
            }
        }

        Ok(())
    }

    fn lookup_name(&self, offset: u32) -> Result<&str> {
        self.names
            .get(offset)
            .ok_or_else(|| Error::Format(format!("no name at table offset {offset}")))
    }

    /// The archive display name.
    pub fn name(&self) -> String {
        self.header.display_name()
    }

    pub fn path(&self) -> &Path {
        self.stream.path()
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    pub fn section(&self) -> &SectionHeader {
        &self.section
    }

    pub fn tocs(&self) -> &[TocEntry] {
        &self.tocs
    }

    pub fn folders(&self) -> &[FolderEntry] {
        &self.folders
    }

    pub fn file_infos(&self) -> &[FileInfoEntry] {
        &self.files
    }

    pub fn is_encrypted(&self) -> bool {
        self.stream.state().is_encrypted()
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// The name stored at a name-table offset.
    pub fn name_at(&self, offset: u32) -> Option<&str> {
        self.names.get(offset)
    }

    /// Files of one TOC in pre-order: a folder's files, then each sub-folder.
    pub fn toc_files(&self, toc: usize) -> Vec<FileRef<'_>> {
        let mut out = Vec::new();
        if let Some(entry) = self.tocs.get(toc) {
            self.walk(toc, entry.start_hierarchy.get() as usize, &mut out);
        }
        out
    }

    /// Files of every TOC in pre-order.
    pub fn files(&self) -> Vec<FileRef<'_>> {
        (0..self.tocs.len())
            .flat_map(|toc| self.toc_files(toc))
            .collect()
    }

    fn walk<'a>(&'a self, toc: usize, folder: usize, out: &mut Vec<FileRef<'a>>) {
        let entry = &self.folders[folder];
        let path = self.names.get(entry.name_offset.get()).unwrap_or_default();

        for index in entry.files() {
            let info = &self.files[index];
            out.push(FileRef {
                toc,
                index,
                folder: path,
                name: self.names.get(info.name_offset.get()).unwrap_or_default(),
                info,
            });
        }
        for sub in entry.subfolders() {
            self.walk(toc, sub, out);
        }
    }

    /// Write the human-readable inventory.
    pub fn write_listing<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for (t, toc) in self.tocs.iter().enumerate() {
            writeln!(out, "TOCEntry")?;
            writeln!(out, "  Name : '{}'", toc.name())?;
            writeln!(out, "  Alias: '{}'", toc.alias())?;
            writeln!(out)?;
            writeln!(
                out,
                "{:<72}{:>16}{:>16}{:>8}{:>16}",
                "File Name", "Original Size", "Stored Size", "Ratio", "Storage Type"
            )?;

            for file in self.toc_files(t) {
                writeln!(
                    out,
                    "{:<72}{:>16}{:>16}{:>8.3}{:>16}",
                    format!("  {}", file.path()),
                    file.info.decompressed_len.get(),
                    file.info.compressed_len.get(),
                    file.info.ratio(),
                    file.method().label()
                )?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// The inventory as a string.
    pub fn listing(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_listing(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// The per-file header of file `index`.
    pub fn file_header(&self, index: usize) -> Result<FileDataHeader> {
        let info = self.file_info(index)?;
        read_file_header(&self.stream, self.header.data_base(), info)
    }

    /// Decoded content of file `index`.
    pub fn read_file(&self, index: usize) -> Result<Vec<u8>> {
        let info = self.file_info(index)?;
        load_file(&self.stream, self.header.data_base(), info).map(|payload| payload.data)
    }

    fn file_info(&self, index: usize) -> Result<&FileInfoEntry> {
        self.files.get(index).ok_or_else(|| {
            Error::OutOfRange(format!("file {index} of {}", self.files.len()))
        })
    }

    /// Extract every file below `root/<toc>/<folder>/`.
    ///
    /// Files that fail to decode are reported and skipped; the tamper
    /// payload and unrecoverable I/O errors abort the run.
    pub fn extract<F>(&self, root: &Path, mut progress: F) -> Result<ExtractReport>
    where
        F: FnMut(&Event),
    {
        let data_base = self.header.data_base();
        let encoding = self.options.legacy_encoding;
        let mut report = ExtractReport::default();

        self.for_each_file(
            |file| {
                let info = *file.info;
                let dir = disk_dir(root, &self.tocs[file.toc].name(), file.folder);
                let fallback = file.name.to_owned();
                move |stream: &CipherStream| {
                    extract_one(stream, data_base, &info, &dir, &fallback, encoding)
                }
            },
            |done, total, file, outcome| {
                let path = file.path();
                match outcome {
                    Ok(true) => report.written += 1,
                    Ok(false) => {
                        report.written += 1;
                        progress(&Event::warn(format!("CRC mismatch: {path}")));
                        report.crc_mismatches.push(path.clone());
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        tracing::debug!(%err, %path, "decode failed");
                        progress(&Event::warn(format!("Failed to decompress file: {path}")));
                        report.failed.push(path.clone());
                    }
                }
                progress(&Event::step(done, total, path));
                Ok(())
            },
        )?;

        Ok(report)
    }

    /// Verify every file against its stored CRC-32.
    ///
    /// Returns `true` when all files decode and match.
    pub fn test<F>(&self, mut progress: F) -> Result<bool>
    where
        F: FnMut(&Event),
    {
        let data_base = self.header.data_base();
        let mut passed = true;

        self.for_each_file(
            |file| {
                let info = *file.info;
                move |stream: &CipherStream| {
                    let payload = load_file(stream, data_base, &info)?;
                    Ok(hash_bytes(&payload.data) == payload.header.crc.get())
                }
            },
            |done, total, file, outcome| {
                let path = file.path();
                match outcome {
                    Ok(true) => {}
                    Ok(false) => {
                        passed = false;
                        progress(&Event::warn(format!("CRC mismatch: {path}")));
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        passed = false;
                        tracing::debug!(%err, %path, "decode failed");
                        progress(&Event::warn(format!("Failed to decompress file: {path}")));
                    }
                }
                progress(&Event::step(done, total, path));
                Ok(())
            },
        )?;

        Ok(passed)
    }

    /// Run one pool task per file and hand each result to `handle` as it
    /// completes.
    fn for_each_file<T, M, W, H>(&self, mut make: M, mut handle: H) -> Result<()>
    where
        T: Send + 'static,
        M: FnMut(&FileRef<'_>) -> W,
        W: FnOnce(&CipherStream) -> Result<T> + Send + 'static,
        H: FnMut(usize, usize, &FileRef<'_>, Result<T>) -> Result<()>,
    {
        let entries = self.files();
        let total = entries.len();
        let pool = WorkerPool::new(self.options.threads)?;
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::unbounded();

        for (seq, entry) in entries.iter().enumerate() {
            let work = make(entry);
            let stream = Arc::clone(&self.stream);
            let abort = Arc::clone(&abort);
            let tx = tx.clone();
            pool.spawn(move || {
                if abort.load(Ordering::Acquire) {
                    return;
                }
                let result = work(&stream);
                if matches!(&result, Err(err) if err.is_fatal()) {
                    abort.store(true, Ordering::Release);
                }
                let _ = tx.send((seq, result));
            });
        }
        drop(tx);

        // The channel closes once every task has run or been skipped, so
        // nothing is still writing when this returns.
        let mut done = 0;
        let mut failure = None;
        for (seq, result) in rx.iter() {
            if failure.is_some() {
                continue;
            }
            done += 1;
            if let Err(err) = handle(done, total, &entries[seq], result) {
                abort.store(true, Ordering::Release);
                failure = Some(err);
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if done < total {
            return Err(bigpack_common::Error::TaskAborted.into());
        }
        Ok(())
    }

    /// Recompute the archive signature from the index region.
    pub fn archive_signature(&self) -> Result<Digest> {
        signer::archive_signature(
            ARCHIVE_HEADER_SIZE as u64,
            self.header.data_base(),
            |position, buf| Ok(self.stream.read_at(position, buf)?),
        )
    }

    /// Recompute the tool signature over the whole body.
    pub fn tool_signature(&self) -> Result<Digest> {
        let mut end = self.stream.len()?;
        if self.is_encrypted() {
            end = end.saturating_sub(4);
        }
        signer::tool_signature(ARCHIVE_HEADER_SIZE as u64, end, |position, buf| {
            Ok(self.stream.read_at(position, buf)?)
        })
    }

    /// Compare both recomputed signatures with the header.
    pub fn verify_signatures(&self) -> Result<SignatureCheck> {
        let archive = self.archive_signature()? == self.header.archive_signature;
        let tool = if self.header.tool_signature == [0u8; 16] {
            None
        } else {
            Some(self.tool_signature()? == self.header.tool_signature)
        };
        Ok(SignatureCheck { archive, tool })
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.stream.path())
            .field("name", &self.name())
            .field("encrypted", &self.is_encrypted())
            .field("tocs", &self.tocs.len())
            .field("files", &self.files.len())
            .finish()
    }
}

type Index = (
    SectionHeader,
    Vec<TocEntry>,
    Vec<FolderEntry>,
    Vec<FileInfoEntry>,
    NameTable,
);

fn parse_index(index: &[u8], encoding: &'static Encoding) -> Result<Index> {
    let mut reader = BinaryReader::new(index);
    let section = reader.read_struct::<SectionHeader>()?;

    reader.seek(section.toc_offset.get() as usize);
    let tocs = reader.read_structs::<TocEntry>(section.toc_count.get() as usize)?;

    reader.seek(section.folder_offset.get() as usize);
    let folders = reader.read_structs::<FolderEntry>(section.folder_count.get() as usize)?;

    reader.seek(section.file_info_offset.get() as usize);
    let files = reader.read_structs::<FileInfoEntry>(section.file_info_count.get() as usize)?;

    let name_start = section.name_offset.get() as usize;
    let name_bytes = index.get(name_start..).ok_or_else(|| {
        Error::Format(format!("name table offset {name_start} beyond the index"))
    })?;
    let names = NameTable::parse(name_bytes, section.name_count.get() as usize, encoding)?;

    Ok((section, tocs, folders, files, names))
}

fn read_file_header(
    stream: &CipherStream,
    data_base: u64,
    info: &FileInfoEntry,
) -> Result<FileDataHeader> {
    let position = data_base + info.file_data_offset.get() as u64 - FILE_DATA_HEADER_SIZE as u64;
    let bytes = stream.view_at(position, FILE_DATA_HEADER_SIZE)?;
    FileDataHeader::read_from_bytes(&bytes)
        .map_err(|_| Error::Format(format!("truncated file header at {position}")))
}

/// Reject folder graphs that are not a forest or nest deeper than
/// [`MAX_FOLDER_DEPTH`]. Subfolder ranges must already be in bounds and
/// point forward.
fn check_nesting(folders: &[FolderEntry]) -> Result<()> {
    let mut depth = vec![0usize; folders.len()];
    let mut children = 0usize;

    // Parents precede children, so depth[i] is final when folder i is reached.
    for (i, folder) in folders.iter().enumerate() {
        children += folder.subfolders().len();
        if children > folders.len() {
            return Err(Error::Format(format!("folder {i} shares its subfolders")));
        }
        for sub in folder.subfolders() {
            depth[sub] = depth[sub].max(depth[i] + 1);
            if depth[sub] > MAX_FOLDER_DEPTH {
                return Err(Error::Format(format!(
                    "folder {sub} is nested deeper than {MAX_FOLDER_DEPTH} levels"
                )));
            }
        }
    }
    Ok(())
}

/// Read and decode one file. The tamper payload is [`Error::Fatal`].
fn load_file(stream: &CipherStream, data_base: u64, info: &FileInfoEntry) -> Result<Payload> {
    let header = read_file_header(stream, data_base, info)?;

    let position = data_base + info.file_data_offset.get() as u64;
    let stored = stream.view_at(position, info.compressed_len.get() as usize)?;
    let expected = info.decompressed_len.get() as usize;

    let data = match info.compression()? {
        CompressionMethod::Uncompressed if stored.len() == expected => stored.into_owned(),
        CompressionMethod::Uncompressed => {
            return Err(bigpack_deflate::Error::LengthMismatch {
                expected,
                actual: stored.len(),
            }
            .into())
        }
        method => match Compressor::decompress(&stored, expected) {
            Ok(data) => data,
            Err(_)
                if method == CompressionMethod::DecompressAllAtOnce
                    && is_tamper_payload(&stored) =>
            {
                return Err(Error::Fatal)
            }
            Err(err) => return Err(err.into()),
        },
    };

    Ok(Payload { header, data })
}

/// Decode, write and timestamp one file. Returns whether its CRC matched.
fn extract_one(
    stream: &CipherStream,
    data_base: u64,
    info: &FileInfoEntry,
    dir: &Path,
    fallback: &str,
    encoding: &'static Encoding,
) -> Result<bool> {
    let Payload { header, data } = load_file(stream, data_base, info)?;

    let stored_name = decode_text(header.name_bytes(), encoding);
    let name = safe_component(&stored_name)
        .or_else(|| safe_component(fallback))
        .ok_or_else(|| Error::Format(format!("unusable file name {stored_name:?}")))?;
    let target = dir.join(name);

    write_with_retry(&target, &data)?;
    restore_mtime(&target, header.modified.get());

    Ok(hash_bytes(&data) == header.crc.get())
}

/// `name` if it is a single plain path component.
fn safe_component(name: &str) -> Option<&str> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    plain.then_some(name)
}

/// Directory of a folder on disk, dropping components that would escape
/// `root`.
fn disk_dir(root: &Path, toc: &str, folder: &str) -> PathBuf {
    let mut dir = root.to_path_buf();
    for part in toc.split(['/', '\\']).chain(folder.split(['/', '\\'])) {
        if let Some(part) = safe_component(part) {
            dir.push(part);
        }
    }
    dir
}

fn write_with_retry(path: &Path, data: &[u8]) -> Result<()> {
    let mut attempt = 1;
    loop {
        let result = match path.parent() {
            Some(parent) => std::fs::create_dir_all(parent),
            None => Ok(()),
        }
        .and_then(|_| std::fs::write(path, data));

        match result {
            Ok(()) => return Ok(()),
            Err(err) if attempt < WRITE_ATTEMPTS => {
                tracing::debug!(path = %path.display(), attempt, %err, "retrying write");
                std::thread::sleep(RETRY_DELAY * attempt);
                attempt += 1;
            }
            Err(err) => return Err(Error::io(path, err)),
        }
    }
}

fn restore_mtime(path: &Path, modified: u32) {
    let time = UNIX_EPOCH + Duration::from_secs(modified as u64);
    let result = File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(time));
    if let Err(err) = result {
        tracing::warn!(path = %path.display(), %err, "could not restore modification time");
    }
}
