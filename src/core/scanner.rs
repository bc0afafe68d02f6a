//! 扫描目录，按策略生成上传任务
//!
//! 目录按文件名字典序遍历，结果可复现。不跟随符号链接。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use crate::utils::format_bytes;
use super::errors::ScanError;
use super::job::UploadJob;
use super::types::{RejectReason, UploadPolicy};

/// 被排除的文件
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub path: PathBuf,
    pub reason: RejectReason,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub jobs: Vec<UploadJob>,
    pub rejected: Vec<Rejection>,
}

impl ScanOutcome {
    pub fn total_bytes(&self) -> u64 {
        self.jobs.iter().map(|job| job.size).sum()
    }
}

/// 扫描并返回按遍历顺序排列的任务
pub fn scan(root: &Path, policy: &UploadPolicy) -> Result<Vec<UploadJob>, ScanError> {
    scan_detailed(root, policy).map(|outcome| outcome.jobs)
}

/// 根目录不可用时返回 `ScanError`；单个文件的问题只记录日志并跳过
pub fn scan_detailed(root: &Path, policy: &UploadPolicy) -> Result<ScanOutcome, ScanError> {
    info!(root = %root.display(), "scanning folder");
    check_root(root)?;

    let mut outcome = ScanOutcome::default();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!(path = %path.display(), error = %err, "failed to read entry, skipping");
                outcome.rejected.push(Rejection {
                    path,
                    reason: RejectReason::Unreadable(err.to_string()),
                });
                continue;
            }
        };

        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            continue;
        }

        if file_type.is_symlink() {
            debug!(path = %path.display(), "skipping symlink");
            outcome.rejected.push(Rejection {
                path: path.to_path_buf(),
                reason: RejectReason::Symlink,
            });
            continue;
        }

        if !file_type.is_file() {
            outcome.rejected.push(Rejection {
                path: path.to_path_buf(),
                reason: RejectReason::NotAFile,
            });
            continue;
        }

        // 扩展名不对的文件很多，只在 debug 级别记录
        if !policy.allows_extension(path) {
            debug!(path = %path.display(), "extension not allowed, skipping");
            outcome.rejected.push(Rejection {
                path: path.to_path_buf(),
                reason: RejectReason::Extension,
            });
            continue;
        }

        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to stat file, skipping");
                outcome.rejected.push(Rejection {
                    path: path.to_path_buf(),
                    reason: RejectReason::Unreadable(err.to_string()),
                });
                continue;
            }
        };

        if let Err(reason) = policy.check(path, size) {
            warn!(path = %path.display(), %reason, "skipping file");
            outcome.rejected.push(Rejection {
                path: path.to_path_buf(),
                reason,
            });
            continue;
        }

        info!(file = %path.display(), size = %format_bytes(size), "found video file");
        outcome.jobs.push(UploadJob::new(path.to_path_buf(), size));
    }

    info!(
        found = outcome.jobs.len(),
        rejected = outcome.rejected.len(),
        total = %format_bytes(outcome.total_bytes()),
        "scan finished"
    );

    Ok(outcome)
}

fn check_root(root: &Path) -> Result<(), ScanError> {
    let metadata = std::fs::metadata(root).map_err(|err| match err.kind() {
        ErrorKind::NotFound => ScanError::RootNotFound(root.to_path_buf()),
        _ => ScanError::Inaccessible { path: root.to_path_buf(), source: err },
    })?;

    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    std::fs::read_dir(root)
        .map(|_| ())
        .map_err(|err| ScanError::Inaccessible { path: root.to_path_buf(), source: err })
}
