//! Archive builder.
//!
//! The index is laid out completely before any payload is produced, written
//! once with placeholder payload offsets, and patched after the payloads are
//! on disk. Payload work fans out to a [`WorkerPool`]; the handles are
//! drained in index order so the body mirrors the file-info list.

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bigpack_cipher::{CipherStream, StreamState};
use bigpack_common::crc::hash_bytes;
use bigpack_common::{Pending, WorkerPool};
use bigpack_deflate::{Compressor, SharedBytes, MAX_LEVEL};
use memmap2::Mmap;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::IntoBytes;

use crate::classify::IgnoreList;
use crate::format::{
    ArchiveHeader, CompressionMethod, FileDataHeader, FileInfoEntry, SectionHeader,
    ARCHIVE_HEADER_SIZE, FILE_DATA_HEADER_SIZE, TAMPER_BYTE, TAMPER_LEN,
};
use crate::options::{BuildOptions, Encryption};
use crate::plan::{ArchivePlan, FileSource};
use crate::progress::Event;
use crate::signer::{self, Digest};
use crate::task::BuildTask;
use crate::{Error, Result};

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub files: usize,
    pub skipped: usize,
    pub original_bytes: u64,
    /// Final archive size.
    pub archive_bytes: u64,
    pub archive_signature: Digest,
    pub tool_signature: Option<Digest>,
    pub encrypted: bool,
}

/// A payload ready to be appended.
struct PackedFile {
    header: FileDataHeader,
    payload: SharedBytes,
    method: CompressionMethod,
    decompressed_len: u32,
}

/// Builds archives from a [`BuildTask`].
pub struct ArchiveWriter<'o> {
    options: &'o BuildOptions,
}

impl<'o> ArchiveWriter<'o> {
    pub fn new(options: &'o BuildOptions) -> Self {
        Self { options }
    }

    /// Build `output` from `task`, resolving relative source paths against
    /// `root`.
    ///
    /// On error the output file is left in an unspecified state, but no
    /// worker is still running when this returns.
    pub fn build<F>(
        &self,
        task: &BuildTask,
        root: &Path,
        output: &Path,
        mut progress: F,
    ) -> Result<BuildSummary>
    where
        F: FnMut(&Event),
    {
        if self.options.compress_level > MAX_LEVEL {
            return Err(Error::OutOfRange(format!(
                "compression level {} exceeds {MAX_LEVEL}",
                self.options.compress_level
            )));
        }

        progress(&Event::info("Parsing Build Config..."));
        let ignore = IgnoreList::new(&self.options.ignore_list);
        let mut plan = ArchivePlan::new(task, root, &ignore)?;

        let mut stream = self.open_output(output)?;
        let encrypted = stream.state().is_encrypted();

        progress(&Event::info("Writing Archive Header..."));
        let mut header = ArchiveHeader::new(&plan.name);
        stream.write(header.as_bytes())?;

        progress(&Event::info("Writing Section Header..."));
        let section = plan.section_header()?;
        stream.write(section.as_bytes())?;
        stream.write(plan.tocs.as_bytes())?;
        stream.write(plan.folders.as_bytes())?;
        stream.write(plan.files.as_bytes())?;
        stream.write(plan.names.as_bytes())?;

        let data_base = stream.position();
        let section_header_size = to_u32(data_base - ARCHIVE_HEADER_SIZE as u64)?;

        if encrypted {
            stream.write_key()?;
        }

        progress(&Event::info("Starting File Compression.."));
        let pool = WorkerPool::new(self.options.threads)?;
        let abort = Arc::new(AtomicBool::new(false));
        let compressor = Compressor::new(&pool).with_abort(Arc::clone(&abort));

        let mut pending = Vec::with_capacity(plan.sources.len());
        for (source, info) in plan.sources.iter().zip(&plan.files) {
            let scheduled = info.compression().and_then(|method| {
                self.schedule(&pool, &compressor, &abort, source, method, &mut progress)
            });
            match scheduled {
                Ok(handle) => pending.push(handle),
                Err(err) => {
                    cancel(&abort, pending);
                    return Err(err);
                }
            }
        }

        progress(&Event::info("Writing Compressed Files..."));
        let total = pending.len();
        let mut handles = pending.into_iter().enumerate();
        while let Some((index, handle)) = handles.next() {
            let placed = handle.wait().map_err(Error::from).and_then(|packed| {
                append_payload(&mut stream, &mut plan.files[index], data_base, packed?)
            });
            if let Err(err) = placed {
                cancel(&abort, handles.map(|(_, handle)| handle));
                return Err(err);
            }

            progress(&Event::step(index + 1, total, plan.sources[index].name.as_str()));
        }
        drop(pool);

        progress(&Event::info("Rewrite Section Header..."));
        rewrite_index(&mut stream, &section, &plan, encrypted)?;

        progress(&Event::info("Calculating Archive Signature..."));
        header.archive_signature =
            signer::archive_signature(ARCHIVE_HEADER_SIZE as u64, data_base, |position, buf| {
                stream.seek(position);
                Ok(stream.read(buf)?)
            })?;

        let tool_signature = if self.options.skip_tool_signature {
            progress(&Event::info("Tool Signature Calculation Skipped."));
            None
        } else {
            progress(&Event::info("Calculating Tool Signature..."));
            let end = stream.len()?;
            let digest =
                signer::tool_signature(ARCHIVE_HEADER_SIZE as u64, end, |position, buf| {
                    stream.seek(position);
                    Ok(stream.read(buf)?)
                })?;
            header.tool_signature = digest;
            Some(digest)
        };

        progress(&Event::info("Rewrite Archive Header..."));
        header.section_header_size = U32::new(section_header_size);
        header.exact_file_data_offset = U32::new(to_u32(data_base)?);
        stream.seek(0);
        stream.write(header.as_bytes())?;

        if encrypted {
            stream.write_encryption_end()?;
        }
        stream.sync()?;

        let summary = BuildSummary {
            files: plan.files.len(),
            skipped: plan.skipped,
            original_bytes: plan.total_size(),
            archive_bytes: stream.len()?,
            archive_signature: header.archive_signature,
            tool_signature,
            encrypted,
        };

        tracing::debug!(
            files = summary.files,
            bytes = summary.archive_bytes,
            signature = %hex::encode(summary.archive_signature),
            "archive written to {}",
            output.display()
        );
        progress(&Event::info("Build Finished."));
        Ok(summary)
    }

    fn open_output(&self, output: &Path) -> Result<CipherStream> {
        let stream = match &self.options.encryption {
            Encryption::None => CipherStream::open(output, StreamState::WritePlain, None)?,
            Encryption::Generated { seed } => {
                CipherStream::open(output, StreamState::WriteEncrypted, *seed)?
            }
            Encryption::Key(key) => CipherStream::create_with_key(output, key.clone())?,
        };
        Ok(stream)
    }

    /// Queue the work producing one file's header and payload.
    fn schedule<F>(
        &self,
        pool: &WorkerPool,
        compressor: &Compressor<'_>,
        abort: &Arc<AtomicBool>,
        source: &FileSource,
        method: CompressionMethod,
        progress: &mut F,
    ) -> Result<Pending<Result<PackedFile>>>
    where
        F: FnMut(&Event),
    {
        let data = load_source(source)?;
        let name = source.name.clone();
        let modified = source.modified;
        let size = source.size;

        if FileDataHeader::new(name.as_bytes(), 0, 0).is_tamper_name() {
            progress(&Event::error("Hello there!"));
            let abort = Arc::clone(abort);
            return Ok(pool.submit(move || -> Result<PackedFile> {
                check_abort(&abort)?;
                let crc = hash_bytes((*data).as_ref());
                Ok(PackedFile {
                    header: FileDataHeader::new(name.as_bytes(), modified, crc),
                    payload: Arc::new(vec![TAMPER_BYTE; TAMPER_LEN]),
                    method: CompressionMethod::DecompressAllAtOnce,
                    decompressed_len: TAMPER_LEN as u32,
                })
            }));
        }

        if !method.is_compressed() {
            let abort = Arc::clone(abort);
            return Ok(pool.submit(move || -> Result<PackedFile> {
                check_abort(&abort)?;
                let crc = hash_bytes((*data).as_ref());
                Ok(PackedFile {
                    header: FileDataHeader::new(name.as_bytes(), modified, crc),
                    payload: data,
                    method,
                    decompressed_len: size,
                })
            }));
        }

        let input = Arc::clone(&data);
        let level = self.options.compress_level;
        Ok(compressor.compress_then(data, level, move |result| -> Result<PackedFile> {
            let crc = hash_bytes((*input).as_ref());
            let compressed = result?;
            Ok(PackedFile {
                header: FileDataHeader::new(name.as_bytes(), modified, crc),
                payload: Arc::new(compressed),
                method,
                decompressed_len: size,
            })
        }))
    }
}

/// Append one file header and payload, recording where it landed.
fn append_payload(
    stream: &mut CipherStream,
    info: &mut FileInfoEntry,
    data_base: u64,
    packed: PackedFile,
) -> Result<()> {
    let payload = (*packed.payload).as_ref();

    info.file_data_offset =
        U32::new(to_u32(stream.position() + FILE_DATA_HEADER_SIZE as u64 - data_base)?);
    info.compressed_len = U32::new(to_u32(payload.len() as u64)?);
    info.decompressed_len = U32::new(packed.decompressed_len);
    info.method = packed.method as u8;

    stream.write(packed.header.as_bytes())?;
    stream.write(payload)?;
    Ok(())
}

fn check_abort(abort: &AtomicBool) -> Result<()> {
    if abort.load(Ordering::Acquire) {
        return Err(bigpack_common::Error::TaskAborted.into());
    }
    Ok(())
}

/// Stop queued work and wait for tasks already running.
fn cancel<I>(abort: &AtomicBool, pending: I)
where
    I: IntoIterator<Item = Pending<Result<PackedFile>>>,
{
    abort.store(true, Ordering::Release);
    for handle in pending {
        let _ = handle.wait();
    }
}

/// Map a source file for the workers.
fn load_source(source: &FileSource) -> Result<SharedBytes> {
    if source.size == 0 {
        return Ok(Arc::new(Vec::<u8>::new()));
    }

    let file = File::open(&source.path).map_err(|e| Error::io(&source.path, e))?;
    let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(&source.path, e))?;
    if map.len() != source.size as usize {
        return Err(Error::InvalidTask(format!(
            "{} changed size during the build",
            source.path.display()
        )));
    }
    Ok(Arc::new(map))
}

/// Patch the index after the payloads are written.
///
/// Plain archives only need the section header and file infos; encrypted
/// ones rewrite every section so that it passes through the keystream.
fn rewrite_index(
    stream: &mut CipherStream,
    section: &SectionHeader,
    plan: &ArchivePlan,
    encrypted: bool,
) -> Result<()> {
    let base = ARCHIVE_HEADER_SIZE as u64;

    stream.seek(base);
    stream.write(section.as_bytes())?;

    if encrypted {
        stream.seek(base + section.toc_offset.get() as u64);
        stream.write(plan.tocs.as_bytes())?;
        stream.seek(base + section.folder_offset.get() as u64);
        stream.write(plan.folders.as_bytes())?;
    }

    stream.seek(base + section.file_info_offset.get() as u64);
    stream.write(plan.files.as_bytes())?;

    if encrypted {
        stream.seek(base + section.name_offset.get() as u64);
        stream.write(plan.names.as_bytes())?;
    }
    Ok(())
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::OutOfRange(format!("offset {value} does not fit the 4 GiB format")))
}
