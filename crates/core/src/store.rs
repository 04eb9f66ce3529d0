use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use crate::codec::{self, DocumentFormat};
use crate::error::{ReadError, WriteError};
use crate::path::NormalizedPath;
use crate::session::{DiskSnapshot, LoadedDocument};

/// 原子寫入時使用的暫存檔後綴；監看器會忽略它。 / Suffix of the temporary sibling used for atomic writes; the watcher ignores it.
pub const TEMP_SUFFIX: &str = ".rustnotes-tmp";

/// 讀寫文件的外部協作者。 / File I/O collaborator used by the coordinator.
pub trait DocumentStore {
    fn read_document(&mut self, path: &NormalizedPath) -> Result<LoadedDocument, ReadError>;

    /// 寫入並回傳實際落地的位元組。 / Writes and returns the bytes that actually landed on disk.
    fn write_document(
        &mut self,
        path: &NormalizedPath,
        content: &str,
        format: &DocumentFormat,
    ) -> Result<DiskSnapshot, WriteError>;
}

/// 要求重新整理目錄清單；不等待結果。 / Fire-and-forget request to refresh the directory listing.
pub trait DirectoryRefresh {
    fn refresh(&mut self, root: &NormalizedPath);
}

impl<F> DirectoryRefresh for F
where
    F: FnMut(&NormalizedPath),
{
    fn refresh(&mut self, root: &NormalizedPath) {
        self(root)
    }
}

/// 直接操作本機檔案系統的實作。 / Local filesystem implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDocumentStore;

impl DocumentStore for FsDocumentStore {
    fn read_document(&mut self, path: &NormalizedPath) -> Result<LoadedDocument, ReadError> {
        let bytes = fs::read(path.to_path_buf()).map_err(|err| ReadError::from_io(path, err))?;
        LoadedDocument::from_bytes(bytes).map_err(|source| ReadError::Decode {
            path: path.clone(),
            source,
        })
    }

    fn write_document(
        &mut self,
        path: &NormalizedPath,
        content: &str,
        format: &DocumentFormat,
    ) -> Result<DiskSnapshot, WriteError> {
        let bytes = codec::encode(content, format).map_err(|source| WriteError::Encode {
            path: path.clone(),
            source,
        })?;

        // 先寫暫存檔再改名，避免留下寫到一半的檔案。 / Temp file plus rename so readers never see a partial write.
        let target = path.to_path_buf();
        let tmp_path = temp_sibling(&target);
        let io_err = |err| WriteError::from_io(path, err);
        {
            let mut tmp_file = File::create(&tmp_path).map_err(io_err)?;
            tmp_file.write_all(&bytes).map_err(io_err)?;
            tmp_file.sync_all().map_err(io_err)?;
        }
        if let Err(err) = fs::rename(&tmp_path, &target) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(err));
        }

        Ok(DiskSnapshot::new(bytes, *format))
    }
}

fn temp_sibling(target: &std::path::Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    target.with_file_name(name)
}
