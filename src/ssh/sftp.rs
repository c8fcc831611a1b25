//! File transfer over the session's persistent SFTP channel.

use crate::errors::ToolError;
use crate::ssh::session::Session;
use crate::utils::format::{format_bytes, format_speed};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use ssh2::{FileStat, OpenFlags, OpenType, Sftp};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOp {
    Upload,
    Download,
}

impl std::fmt::Display for TransferOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferOp::Upload => write!(f, "upload"),
            TransferOp::Download => write!(f, "download"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub status: String,
    pub bytes_transferred: u64,
    #[serde(skip)]
    pub duration: Duration,
    pub file_size: u64,
    /// Percentage, 0..=100.
    pub progress: f64,
    pub speed: Option<String>,
    pub path: String,
    pub operation: TransferOp,
}

impl TransferOutcome {
    fn finished(op: TransferOp, path: &str, bytes: u64, size: u64, started: Instant) -> Self {
        let duration = started.elapsed();
        let progress = if size > 0 {
            (bytes as f64 / size as f64) * 100.0
        } else {
            100.0
        };
        Self {
            status: "success".to_string(),
            bytes_transferred: bytes,
            duration,
            file_size: size,
            progress,
            speed: format_speed(bytes, duration),
            path: path.to_string(),
            operation: op,
        }
    }

    pub fn human_size(&self) -> String {
        format_bytes(self.file_size as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
            EntryKind::Symlink => write!(f, "symlink"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: String,
    pub modified: Option<DateTime<Utc>>,
}

fn entry_kind(stat: &FileStat) -> EntryKind {
    let file_type = stat.file_type();
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if stat.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

fn mode_string(stat: &FileStat) -> String {
    let perm = stat.perm.unwrap_or(0);
    let mut out = String::with_capacity(10);
    out.push(match entry_kind(stat) {
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::File => '-',
    });
    for shift in [6u32, 3, 0] {
        let bits = (perm >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn entry_from_stat(name: &str, stat: &FileStat) -> RemoteEntry {
    RemoteEntry {
        name: name.to_string(),
        kind: entry_kind(stat),
        size: stat.size.unwrap_or(0),
        mode: mode_string(stat),
        modified: stat
            .mtime
            .and_then(|mtime| Utc.timestamp_opt(mtime as i64, 0).single()),
    }
}

impl Session {
    /// Upload a local file or directory tree.
    pub fn upload_file(
        &self,
        local_path: &str,
        remote_path: &str,
        create_dirs: bool,
        overwrite: bool,
    ) -> Result<TransferOutcome, ToolError> {
        self.touch();
        let started = Instant::now();

        let metadata = fs::metadata(local_path).map_err(|err| {
            ToolError::not_found(format!("Local path {}: {}", local_path, err))
        })?;
        if metadata.is_dir() {
            return self.upload_directory(local_path, remote_path, overwrite, started);
        }
        let file_size = metadata.len();

        let bytes = self.with_sftp(|sftp| {
            upload_one(sftp, local_path, remote_path, create_dirs, overwrite)
        })?;

        Ok(TransferOutcome::finished(
            TransferOp::Upload,
            remote_path,
            bytes,
            file_size,
            started,
        ))
    }

    fn upload_directory(
        &self,
        local_root: &str,
        remote_root: &str,
        overwrite: bool,
        started: Instant,
    ) -> Result<TransferOutcome, ToolError> {
        let mut total = 0u64;
        let mut stack = vec![PathBuf::from(local_root)];

        self.with_sftp(|sftp| {
            ensure_remote_dir_all(sftp, Path::new(remote_root))?;
            while let Some(dir) = stack.pop() {
                let entries = fs::read_dir(&dir)
                    .map_err(|err| ToolError::internal(format!("Read dir {:?}: {}", dir, err)))?;
                for entry in entries {
                    let entry = entry
                        .map_err(|err| ToolError::internal(format!("Read dir entry: {}", err)))?;
                    let path = entry.path();
                    let rel = path
                        .strip_prefix(local_root)
                        .map_err(|err| ToolError::internal(err.to_string()))?;
                    let remote = Path::new(remote_root).join(rel);
                    let remote = remote.to_string_lossy().to_string();
                    let file_type = entry
                        .file_type()
                        .map_err(|err| ToolError::internal(err.to_string()))?;
                    if file_type.is_dir() {
                        ensure_remote_dir_all(sftp, Path::new(&remote))?;
                        stack.push(path);
                    } else if file_type.is_file() {
                        total +=
                            upload_one(sftp, &path.to_string_lossy(), &remote, false, overwrite)?;
                    }
                }
            }
            Ok(())
        })?;

        Ok(TransferOutcome::finished(
            TransferOp::Upload,
            remote_root,
            total,
            total,
            started,
        ))
    }

    /// Download a remote file or directory tree.
    pub fn download_file(
        &self,
        remote_path: &str,
        local_path: &str,
        create_dirs: bool,
        overwrite: bool,
    ) -> Result<TransferOutcome, ToolError> {
        self.touch();
        let started = Instant::now();

        let stat = self.with_sftp(|sftp| {
            sftp.stat(Path::new(remote_path)).map_err(|err| {
                ToolError::not_found(format!("Remote path {}: {}", remote_path, err))
            })
        })?;

        if stat.is_dir() {
            return self.download_directory(remote_path, local_path, overwrite, started);
        }
        let file_size = stat.size.unwrap_or(0);

        if Path::new(local_path).exists() && !overwrite {
            return Err(ToolError::file_exists(local_path));
        }
        if create_dirs {
            if let Some(parent) = Path::new(local_path).parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| ToolError::internal(format!("Create local dirs: {}", err)))?;
            }
        }

        let bytes = self.with_sftp(|sftp| download_one(sftp, remote_path, local_path))?;

        Ok(TransferOutcome::finished(
            TransferOp::Download,
            local_path,
            bytes,
            file_size,
            started,
        ))
    }

    fn download_directory(
        &self,
        remote_root: &str,
        local_root: &str,
        overwrite: bool,
        started: Instant,
    ) -> Result<TransferOutcome, ToolError> {
        fs::create_dir_all(local_root)
            .map_err(|err| ToolError::internal(format!("Create local dirs: {}", err)))?;
        let mut total = 0u64;

        self.with_sftp(|sftp| {
            let mut stack = vec![PathBuf::from(remote_root)];
            while let Some(dir) = stack.pop() {
                let entries = sftp.readdir(&dir).map_err(ToolError::from)?;
                for (path, stat) in entries {
                    let rel = path
                        .strip_prefix(remote_root)
                        .map_err(|err| ToolError::internal(err.to_string()))?;
                    let local = Path::new(local_root).join(rel);
                    if stat.is_dir() {
                        fs::create_dir_all(&local).map_err(|err| {
                            ToolError::internal(format!("Create local dir {:?}: {}", local, err))
                        })?;
                        stack.push(path);
                    } else {
                        if local.exists() && !overwrite {
                            return Err(ToolError::file_exists(&local.to_string_lossy()));
                        }
                        total += download_one(
                            sftp,
                            &path.to_string_lossy(),
                            &local.to_string_lossy(),
                        )?;
                    }
                }
            }
            Ok(())
        })?;

        Ok(TransferOutcome::finished(
            TransferOp::Download,
            local_root,
            total,
            total,
            started,
        ))
    }

    /// List a remote directory, optionally walking subdirectories.
    pub fn list_directory(
        &self,
        remote_path: &str,
        recursive: bool,
    ) -> Result<Vec<RemoteEntry>, ToolError> {
        self.touch();
        self.with_sftp(|sftp| {
            let mut out = Vec::new();
            let mut stack = vec![PathBuf::from(remote_path)];
            while let Some(dir) = stack.pop() {
                let entries = sftp.readdir(&dir).map_err(ToolError::from)?;
                for (path, stat) in entries {
                    let name = if recursive {
                        path.strip_prefix(remote_path)
                            .map(|p| p.to_string_lossy().to_string())
                            .unwrap_or_else(|_| path.to_string_lossy().to_string())
                    } else {
                        path.file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default()
                    };
                    out.push(entry_from_stat(&name, &stat));
                    if recursive && stat.is_dir() {
                        stack.push(path);
                    }
                }
            }
            Ok(out)
        })
    }

    /// Create a remote directory; `recursive` builds missing parents.
    pub fn make_directory(
        &self,
        remote_path: &str,
        recursive: bool,
        mode: i32,
    ) -> Result<(), ToolError> {
        self.touch();
        self.with_sftp(|sftp| {
            if recursive {
                mkdir_all(sftp, Path::new(remote_path), mode)
            } else {
                sftp.mkdir(Path::new(remote_path), mode)
                    .map_err(ToolError::from)
            }
        })
    }

    /// Remove a remote file, or a directory. A non-empty directory requires
    /// the explicit recursive flag; otherwise only rmdir is attempted.
    pub fn remove_path(&self, remote_path: &str, recursive: bool) -> Result<(), ToolError> {
        self.touch();
        self.with_sftp(|sftp| {
            let stat = sftp.stat(Path::new(remote_path)).map_err(|err| {
                ToolError::not_found(format!("Remote path {}: {}", remote_path, err))
            })?;
            if stat.is_dir() {
                if recursive {
                    remove_dir_all(sftp, Path::new(remote_path))
                } else {
                    sftp.rmdir(Path::new(remote_path)).map_err(ToolError::from)
                }
            } else {
                sftp.unlink(Path::new(remote_path)).map_err(ToolError::from)
            }
        })
    }

    /// Stat a single remote path.
    pub fn file_info(&self, remote_path: &str) -> Result<RemoteEntry, ToolError> {
        self.touch();
        let stat = self.with_sftp(|sftp| {
            sftp.stat(Path::new(remote_path)).map_err(|err| {
                ToolError::not_found(format!("Remote path {}: {}", remote_path, err))
            })
        })?;
        let name = Path::new(remote_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| remote_path.to_string());
        Ok(entry_from_stat(&name, &stat))
    }
}

fn upload_one(
    sftp: &Sftp,
    local_path: &str,
    remote_path: &str,
    create_dirs: bool,
    overwrite: bool,
) -> Result<u64, ToolError> {
    let exists = sftp.stat(Path::new(remote_path)).is_ok();
    if exists && !overwrite {
        return Err(ToolError::file_exists(remote_path));
    }
    if create_dirs {
        if let Some(parent) = Path::new(remote_path).parent() {
            ensure_remote_dir_all(sftp, parent)?;
        }
    }
    let mut local = fs::File::open(local_path)
        .map_err(|err| ToolError::not_found(format!("Local path {}: {}", local_path, err)))?;
    let mut remote = sftp
        .open_mode(
            Path::new(remote_path),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            0o644,
            OpenType::File,
        )
        .map_err(ToolError::from)?;
    std::io::copy(&mut local, &mut remote)
        .map_err(|err| ToolError::internal(format!("Copy to remote: {}", err)))
}

fn download_one(sftp: &Sftp, remote_path: &str, local_path: &str) -> Result<u64, ToolError> {
    let mut remote = sftp
        .open(Path::new(remote_path))
        .map_err(ToolError::from)?;
    let mut local = fs::File::create(local_path)
        .map_err(|err| ToolError::internal(format!("Create local file: {}", err)))?;
    std::io::copy(&mut remote, &mut local)
        .map_err(|err| ToolError::internal(format!("Copy from remote: {}", err)))
}

fn ensure_remote_dir_all(sftp: &Sftp, dir: &Path) -> Result<(), ToolError> {
    let mut current = PathBuf::new();
    for part in dir.components() {
        current.push(part);
        if current.as_os_str().is_empty() {
            continue;
        }
        if sftp.stat(&current).is_ok() {
            continue;
        }
        sftp.mkdir(&current, 0o755).map_err(ToolError::from)?;
    }
    Ok(())
}

fn mkdir_all(sftp: &Sftp, dir: &Path, mode: i32) -> Result<(), ToolError> {
    let mut current = PathBuf::new();
    for part in dir.components() {
        current.push(part);
        if current.as_os_str().is_empty() {
            continue;
        }
        if sftp.stat(&current).is_ok() {
            continue;
        }
        sftp.mkdir(&current, mode).map_err(ToolError::from)?;
    }
    Ok(())
}

fn remove_dir_all(sftp: &Sftp, dir: &Path) -> Result<(), ToolError> {
    let entries = sftp.readdir(dir).map_err(ToolError::from)?;
    for (path, stat) in entries {
        if stat.is_dir() {
            remove_dir_all(sftp, &path)?;
        } else {
            sftp.unlink(&path).map_err(ToolError::from)?;
        }
    }
    sftp.rmdir(dir).map_err(ToolError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat_with(perm: u32, size: u64) -> FileStat {
        FileStat {
            size: Some(size),
            uid: None,
            gid: None,
            perm: Some(perm),
            atime: None,
            mtime: Some(1_700_000_000),
        }
    }

    #[test]
    fn mode_string_renders_permission_bits() {
        let stat = stat_with(0o100644, 10);
        assert_eq!(mode_string(&stat), "-rw-r--r--");
        let dir = stat_with(0o040755, 0);
        assert_eq!(mode_string(&dir), "drwxr-xr-x");
    }

    #[test]
    fn entry_kind_prefers_symlink() {
        let link = stat_with(0o120777, 0);
        assert_eq!(entry_kind(&link), EntryKind::Symlink);
        let dir = stat_with(0o040755, 0);
        assert_eq!(entry_kind(&dir), EntryKind::Directory);
    }

    #[test]
    fn outcome_progress_is_complete_for_full_transfer() {
        let outcome = TransferOutcome::finished(
            TransferOp::Upload,
            "/tmp/x",
            2048,
            2048,
            Instant::now(),
        );
        assert_eq!(outcome.progress, 100.0);
        assert_eq!(outcome.status, "success");
        assert_eq!(outcome.operation.to_string(), "upload");
    }

    #[test]
    fn outcome_with_zero_size_reports_full_progress() {
        let outcome =
            TransferOutcome::finished(TransferOp::Download, "/tmp/y", 0, 0, Instant::now());
        assert_eq!(outcome.progress, 100.0);
    }
}
