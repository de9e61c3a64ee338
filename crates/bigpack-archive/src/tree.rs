//! Serializable view of an archive's folder hierarchy.

use serde::{Deserialize, Serialize};

use crate::reader::Archive;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTree {
    pub name: String,
    pub tocs: Vec<TocTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocTree {
    pub name: String,
    pub alias: String,
    pub tocfolder: FolderTree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderTree {
    /// Full `\` separated path, empty for a TOC root.
    pub path: String,
    pub files: Vec<FileNode>,
    pub subfolders: Vec<FolderTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    /// Modification time, seconds since the Unix epoch.
    pub date: u32,
    pub compressedlen: u32,
    pub decompressedlen: u32,
    pub storage: String,
}

impl FileTree {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Number of files across every TOC.
    pub fn file_count(&self) -> usize {
        self.tocs.iter().map(|toc| toc.tocfolder.file_count()).sum()
    }
}

impl FolderTree {
    fn file_count(&self) -> usize {
        self.files.len()
            + self
                .subfolders
                .iter()
                .map(FolderTree::file_count)
                .sum::<usize>()
    }
}

impl Archive {
    /// Build the folder hierarchy of every TOC.
    ///
    /// File dates come from the per-file headers in the data region.
    pub fn file_tree(&self) -> crate::Result<FileTree> {
        let tocs = self
            .tocs()
            .iter()
            .map(|toc| {
                Ok(TocTree {
                    name: toc.name(),
                    alias: toc.alias(),
                    tocfolder: self.folder_tree(toc.start_hierarchy.get() as usize)?,
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(FileTree {
            name: self.name(),
            tocs,
        })
    }

    fn folder_tree(&self, index: usize) -> crate::Result<FolderTree> {
        let folder = &self.folders()[index];
        let path = self
            .name_at(folder.name_offset.get())
            .unwrap_or_default()
            .to_owned();

        let files = folder
            .files()
            .map(|i| {
                let info = &self.file_infos()[i];
                let header = self.file_header(i)?;
                Ok(FileNode {
                    name: self
                        .name_at(info.name_offset.get())
                        .unwrap_or_default()
                        .to_owned(),
                    date: header.modified.get(),
                    compressedlen: info.compressed_len.get(),
                    decompressedlen: info.decompressed_len.get(),
                    storage: info.compression()?.storage_name().to_owned(),
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;

        let subfolders = folder
            .subfolders()
            .map(|sub| self.folder_tree(sub))
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(FolderTree {
            path,
            files,
            subfolders,
        })
    }
}
