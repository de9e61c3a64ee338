//! Index layout of a new archive.
//!
//! Each TOC's files are grouped into a folder tree, then laid out in
//! pre-order: a folder reserves contiguous slots for its direct sub-folders,
//! appends its own files, and only then recurses into each sub-folder. Folder
//! names precede file names in the name table.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use rustc_hash::FxHashMap;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::FromZeros;

use crate::classify::{FileDisposition, IgnoreList, RuleSet};
use crate::format::{
    CompressionMethod, FileInfoEntry, FolderEntry, SectionHeader, TocEntry, FILE_INFO_SIZE,
    FOLDER_ENTRY_SIZE, MAX_FOLDER_DEPTH, SECTION_HEADER_SIZE, TOC_ENTRY_SIZE,
};
use crate::names::NameTableBuilder;
use crate::task::{BuildTask, TocTask};
use crate::{Error, Result};

/// A source file scheduled for packing, parallel to the file-info list.
#[derive(Debug, Clone)]
pub struct FileSource {
    pub path: PathBuf,
    /// Lowercase file name.
    pub name: String,
    pub size: u32,
    /// Seconds since the Unix epoch.
    pub modified: u32,
}

/// The full index of an archive before any payload is written.
#[derive(Debug)]
pub struct ArchivePlan {
    pub name: String,
    pub tocs: Vec<TocEntry>,
    pub folders: Vec<FolderEntry>,
    pub files: Vec<FileInfoEntry>,
    pub names: NameTableBuilder,
    pub sources: Vec<FileSource>,
    /// Files left out by the ignore list or skip rules.
    pub skipped: usize,
}

impl ArchivePlan {
    /// Resolve, classify and lay out every file of `task`.
    ///
    /// Relative paths in the task are resolved against `root`.
    pub fn new(task: &BuildTask, root: &Path, ignore: &IgnoreList) -> Result<Self> {
        let mut layout = Layout::default();
        let mut skipped = 0;

        for toc in &task.tocs {
            let (tree, toc_skipped) = FolderTree::collect(toc, root, ignore)?;
            skipped += toc_skipped;
            layout.place_toc(toc, &tree)?;
        }

        let Layout {
            tocs,
            folders,
            mut files,
            mut names,
            file_names,
            sources,
        } = layout;

        let shift = names.append(file_names)?;
        for info in &mut files {
            info.name_offset = U32::new(info.name_offset.get() + shift);
        }
        index16(names.count(), "names")?;

        tracing::debug!(
            tocs = tocs.len(),
            folders = folders.len(),
            files = files.len(),
            skipped,
            "archive layout planned"
        );

        Ok(Self {
            name: task.name.to_lowercase(),
            tocs,
            folders,
            files,
            names,
            sources,
            skipped,
        })
    }

    /// Section header for the index written right after the archive header.
    pub fn section_header(&self) -> Result<SectionHeader> {
        let toc_offset = SECTION_HEADER_SIZE;
        let folder_offset = toc_offset + self.tocs.len() * TOC_ENTRY_SIZE;
        let file_info_offset = folder_offset + self.folders.len() * FOLDER_ENTRY_SIZE;
        let name_offset = file_info_offset + self.files.len() * FILE_INFO_SIZE;

        Ok(SectionHeader {
            toc_offset: offset32(toc_offset)?,
            toc_count: index16(self.tocs.len(), "tocs")?,
            folder_offset: offset32(folder_offset)?,
            folder_count: index16(self.folders.len(), "folders")?,
            file_info_offset: offset32(file_info_offset)?,
            file_info_count: index16(self.files.len(), "files")?,
            name_offset: offset32(name_offset)?,
            name_count: index16(self.names.count(), "names")?,
        })
    }

    /// Total uncompressed size of all sources.
    pub fn total_size(&self) -> u64 {
        self.sources.iter().map(|s| s.size as u64).sum()
    }
}

fn index16(value: usize, what: &str) -> Result<U16> {
    u16::try_from(value)
        .map(U16::new)
        .map_err(|_| Error::OutOfRange(format!("too many {what}: {value} exceeds 65535")))
}

fn offset32(value: usize) -> Result<U32> {
    u32::try_from(value)
        .map(U32::new)
        .map_err(|_| Error::OutOfRange(format!("index offset {value} exceeds u32")))
}

struct PlannedFile {
    source: FileSource,
    method: CompressionMethod,
}

struct FolderNode {
    path: String,
    children: Vec<usize>,
    files: Vec<PlannedFile>,
}

/// Folders of one TOC, node 0 being the TOC root.
struct FolderTree {
    nodes: Vec<FolderNode>,
    lookup: FxHashMap<String, usize>,
}

impl FolderTree {
    fn new() -> Self {
        let root = FolderNode {
            path: String::new(),
            children: Vec::new(),
            files: Vec::new(),
        };
        let mut lookup = FxHashMap::default();
        lookup.insert(String::new(), 0);
        Self {
            nodes: vec![root],
            lookup,
        }
    }

    /// Node for the folder path made of `components`, creating missing
    /// ancestors.
    fn folder(&mut self, components: &[String]) -> usize {
        let mut node = 0;
        let mut path = String::new();

        for component in components {
            if !path.is_empty() {
                path.push('\\');
            }
            path.push_str(component);

            node = match self.lookup.get(&path) {
                Some(&existing) => existing,
                None => {
                    let index = self.nodes.len();
                    self.nodes.push(FolderNode {
                        path: path.clone(),
                        children: Vec::new(),
                        files: Vec::new(),
                    });
                    self.nodes[node].children.push(index);
                    self.lookup.insert(path.clone(), index);
                    index
                }
            };
        }

        node
    }

    /// Resolve and classify the files of `toc`. Returns the tree and the
    /// number of skipped files.
    fn collect(toc: &TocTask, root: &Path, ignore: &IgnoreList) -> Result<(Self, usize)> {
        let toc_root = root.join(&toc.root);
        let rules = RuleSet::new(toc);

        let mut candidates = Vec::with_capacity(toc.files.len());
        for file in &toc.files {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                root.join(file)
            };
            let mut components = relative_components(&path, &toc_root)?;
            let name = components.pop().ok_or_else(|| {
                Error::InvalidTask(format!("{} is the TOC root itself", path.display()))
            })?;
            if components.len() > MAX_FOLDER_DEPTH {
                return Err(Error::InvalidTask(format!(
                    "{} is nested deeper than {MAX_FOLDER_DEPTH} folders",
                    path.display()
                )));
            }

            let mut key = components.join("\\");
            if !key.is_empty() {
                key.push('\\');
            }
            key.push_str(&name);
            candidates.push((key, path, components, name));
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        candidates.dedup_by(|a, b| a.0 == b.0);

        let mut tree = Self::new();
        let mut skipped = 0;

        for (_, path, components, name) in candidates {
            let metadata = std::fs::metadata(&path).map_err(|e| Error::io(&path, e))?;
            if !metadata.is_file() {
                return Err(Error::InvalidTask(format!("{} is not a file", path.display())));
            }

            let size = metadata.len();
            let method =
                match rules.classify(ignore, components.iter().map(String::as_str), &name, size) {
                    FileDisposition::Include(method) => method,
                    disposition => {
                        tracing::debug!(path = %path.display(), ?disposition, "file skipped");
                        skipped += 1;
                        continue;
                    }
                };

            let size = u32::try_from(size).map_err(|_| {
                Error::OutOfRange(format!("{} is larger than 4 GiB", path.display()))
            })?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |age| u32::try_from(age.as_secs()).unwrap_or(u32::MAX));

            let node = tree.folder(&components);
            tree.nodes[node].files.push(PlannedFile {
                source: FileSource {
                    path,
                    name,
                    size,
                    modified,
                },
                method,
            });
        }

        Ok((tree, skipped))
    }
}

/// Lowercase components of `path` below `root`.
fn relative_components(path: &Path, root: &Path) -> Result<Vec<String>> {
    let relative = path.strip_prefix(root).map_err(|_| {
        Error::InvalidTask(format!(
            "{} is outside the TOC root {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut components = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => components.push(part.to_string_lossy().to_lowercase()),
            Component::CurDir => {}
            _ => {
                return Err(Error::InvalidTask(format!(
                    "{} escapes the TOC root",
                    path.display()
                )))
            }
        }
    }
    Ok(components)
}

#[derive(Default)]
struct Layout {
    tocs: Vec<TocEntry>,
    folders: Vec<FolderEntry>,
    files: Vec<FileInfoEntry>,
    names: NameTableBuilder,
    file_names: NameTableBuilder,
    sources: Vec<FileSource>,
}

impl Layout {
    fn place_toc(&mut self, toc: &TocTask, tree: &FolderTree) -> Result<()> {
        let mut entry = TocEntry::new(&toc.name.to_lowercase(), &toc.alias.to_lowercase());

        let first_folder = self.folders.len();
        let first_file = self.files.len();
        self.folders.push(FolderEntry::new_zeroed());
        self.place_folder(tree, 0, first_folder)?;

        entry.first_folder = index16(first_folder, "folders")?;
        entry.start_hierarchy = entry.first_folder;
        entry.last_folder = index16(self.folders.len(), "folders")?;
        entry.first_file = index16(first_file, "files")?;
        entry.last_file = index16(self.files.len(), "files")?;
        self.tocs.push(entry);
        Ok(())
    }

    fn place_folder(&mut self, tree: &FolderTree, node: usize, slot: usize) -> Result<()> {
        let folder = &tree.nodes[node];
        let name_offset = self.names.push(&folder.path)?;

        let first_subfolder = self.folders.len();
        self.folders
            .extend(folder.children.iter().map(|_| FolderEntry::new_zeroed()));

        let first_file = self.files.len();
        for file in &folder.files {
            let name_offset = self.file_names.push(&file.source.name)?;
            self.files
                .push(FileInfoEntry::new(name_offset, file.method, file.source.size));
            self.sources.push(file.source.clone());
        }

        self.folders[slot] = FolderEntry {
            name_offset: U32::new(name_offset),
            first_subfolder: index16(first_subfolder, "folders")?,
            last_subfolder: index16(self.folders.len(), "folders")?,
            first_file: index16(first_file, "files")?,
            last_file: index16(self.files.len(), "files")?,
        };

        for (i, &child) in folder.children.iter().enumerate() {
            self.place_folder(tree, child, first_subfolder + i)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NameTable;
    use crate::task::FileRule;

    fn write(root: &Path, relative: &str, contents: &[u8]) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn toc_with(root: &Path, toc_root: &str, files: &[&str]) -> TocTask {
        let mut toc = TocTask::new("Data", toc_root);
        toc.alias = "Alias".into();
        toc.files = files.iter().map(|f| write(root, f, b"abcd")).collect();
        toc
    }

    #[test]
    fn test_preorder_layout() {
        let dir = tempfile::tempdir().unwrap();
        let toc = toc_with(
            dir.path(),
            "data",
            &["data/b/y.txt", "data/a/x.txt", "data/A/Z/deep.bin", "data/top.txt"],
        );
        let task = BuildTask {
            name: "Test".into(),
            tocs: vec![toc],
        };

        let plan = ArchivePlan::new(&task, dir.path(), &IgnoreList::default()).unwrap();
        assert_eq!(plan.name, "test");
        assert_eq!(plan.tocs.len(), 1);
        assert_eq!(plan.tocs[0].name(), "data");
        assert_eq!(plan.tocs[0].alias(), "alias");

        // root, a, b reserved contiguously, then a\z
        assert_eq!(plan.folders.len(), 4);
        let root = plan.folders[0];
        assert_eq!(root.subfolders(), 1..3);
        assert_eq!(root.files(), 0..1);

        let table = NameTable::parse(plan.names.as_bytes(), plan.names.count(), encoding_rs::UTF_8)
            .unwrap();
        let folder_name = |i: usize| table.get(plan.folders[i].name_offset.get()).unwrap();
        let file_name = |i: usize| table.get(plan.files[i].name_offset.get()).unwrap();

        assert_eq!(folder_name(0), "");
        assert_eq!(folder_name(1), "a");
        assert_eq!(folder_name(2), "b");
        assert_eq!(folder_name(3), "a\\z");
        assert_eq!(plan.folders[1].subfolders(), 3..4);

        assert_eq!(file_name(0), "top.txt");
        assert_eq!(file_name(1), "x.txt");
        assert_eq!(file_name(2), "deep.bin");
        assert_eq!(file_name(3), "y.txt");
        assert_eq!(plan.folders[2].files(), 3..4);
        assert_eq!(plan.sources[2].name, "deep.bin");

        // Folder names come first in the table.
        let max_folder = plan.folders.iter().map(|f| f.name_offset.get()).max().unwrap();
        let min_file = plan.files.iter().map(|f| f.name_offset.get()).min().unwrap();
        assert!(max_folder < min_file);
        assert_eq!(plan.names.count(), 8);
    }

    #[test]
    fn test_two_tocs() {
        let dir = tempfile::tempdir().unwrap();
        let first = toc_with(dir.path(), "one", &["one/a.txt"]);
        let mut second = toc_with(dir.path(), "two", &["two/sub/b.txt", "two/c.txt"]);
        second.name = "Two".into();
        let task = BuildTask {
            name: "multi".into(),
            tocs: vec![first, second],
        };

        let plan = ArchivePlan::new(&task, dir.path(), &IgnoreList::default()).unwrap();
        let toc = plan.tocs[1];
        assert_eq!(toc.name(), "two");
        assert_eq!(toc.start_hierarchy.get(), 1);
        assert_eq!(toc.first_folder.get(), 1);
        assert_eq!(toc.last_folder.get(), 3);
        assert_eq!(toc.first_file.get(), 1);
        assert_eq!(toc.last_file.get(), 3);

        let section = plan.section_header().unwrap();
        assert_eq!(section.toc_offset.get(), 24);
        assert_eq!(section.folder_offset.get(), 24 + 2 * 138);
        assert_eq!(section.file_info_count.get(), 3);
        assert_eq!(section.name_count.get(), 6);
    }

    #[test]
    fn test_skips_and_zero_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut toc = toc_with(dir.path(), "", &["keep.txt", "drop.bak", ".svn/x.txt"]);
        toc.files.push(write(dir.path(), "empty.dat", b""));
        toc.rules.push(FileRule::skipping("*.bak"));
        let task = BuildTask {
            name: "m".into(),
            tocs: vec![toc],
        };

        let plan = ArchivePlan::new(&task, dir.path(), &IgnoreList::new([".svn/"])).unwrap();
        assert_eq!(plan.skipped, 2);
        assert_eq!(plan.files.len(), 2);
        assert_eq!(plan.sources[0].name, "empty.dat");
        assert_eq!(plan.files[0].method, CompressionMethod::Uncompressed as u8);
        assert_eq!(plan.files[1].method, CompressionMethod::DecompressDuringRead as u8);
        assert_eq!(plan.total_size(), 4);
    }

    #[test]
    fn test_file_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let toc = toc_with(dir.path(), "data", &["other/a.txt"]);
        let task = BuildTask {
            name: "m".into(),
            tocs: vec![toc],
        };

        let err = ArchivePlan::new(&task, dir.path(), &IgnoreList::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidTask(_)));
    }

    #[test]
    fn test_rejects_deep_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let deep: PathBuf = std::iter::repeat("d")
            .take(MAX_FOLDER_DEPTH + 1)
            .chain(["leaf.txt"])
            .collect();
        let mut toc = TocTask::new("data", "");
        toc.files.push(dir.path().join(deep));
        let task = BuildTask {
            name: "m".into(),
            tocs: vec![toc],
        };

        let err = ArchivePlan::new(&task, dir.path(), &IgnoreList::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidTask(_)));
    }

    #[test]
    fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut toc = TocTask::new("data", "");
        toc.files.push(dir.path().join("missing.txt"));
        let task = BuildTask {
            name: "m".into(),
            tocs: vec![toc],
        };

        let err = ArchivePlan::new(&task, dir.path(), &IgnoreList::default()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
