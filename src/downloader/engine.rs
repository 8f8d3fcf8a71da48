// 文件下载引擎
//
// 按清单下载文件到本地路径，并校验内容哈希（清单中有记录时）

use crate::catalog::FileManifest;
use crate::common::sha256_file;
use crate::downloader::reassembler::Reassembler;
use crate::transfer::{TransferError, TransferObserver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 下载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub bytes: u64,
    /// 是否做了哈希校验
    pub verified: bool,
}

/// 文件下载引擎
#[derive(Clone)]
pub struct DownloadEngine {
    reassembler: Reassembler,
}

impl DownloadEngine {
    pub fn new(reassembler: Reassembler) -> Self {
        Self { reassembler }
    }

    /// 下载到 dest
    ///
    /// 先写入 dest 同目录下的临时文件，合并和校验都通过后才替换 dest；
    /// 任何失败都不会改动已有的 dest
    pub async fn download_to_path(
        &self,
        manifest: &FileManifest,
        dest: &Path,
        observer: Arc<dyn TransferObserver>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, TransferError> {
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent).await?;

        info!(
            "下载文件: id={}, name={}, 大小={} bytes -> {:?}",
            manifest.id, manifest.name, manifest.size, dest
        );

        let staging = tempfile::Builder::new()
            .prefix(".chunkdrive-")
            .suffix(".partial")
            .tempfile_in(&parent)?;

        let mut writer = BufWriter::new(File::from_std(staging.as_file().try_clone()?));
        let bytes = self
            .reassembler
            .download(&manifest.chunks, &mut writer, observer, cancel)
            .await?;
        drop(writer);

        let verified = match &manifest.content_hash {
            Some(expected) => {
                let actual = sha256_file(staging.path()).await?;
                if &actual != expected {
                    warn!("文件校验失败: {:?}", dest);
                    return Err(TransferError::HashMismatch {
                        expected: expected.clone(),
                        actual,
                    });
                }
                true
            }
            None => false,
        };

        staging
            .persist(dest)
            .map_err(|e| TransferError::Io(e.error))?;

        Ok(DownloadReport {
            path: dest.to_path_buf(),
            bytes,
            verified,
        })
    }
}
