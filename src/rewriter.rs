//! wp-config.php rewriting
//!
//! The file is treated as raw bytes split into lines, each keeping its own `\n`, `\r\n`
//! or `\r` terminator. A rotation replaces the matched `define(...)` statement inside the
//! first active line defining each key and leaves every other byte alone. Keys with no
//! definition are inserted as a block directly in front of the "stop editing" comment,
//! or appended when that comment is missing.
//!
//! The on-disk sequence is lock, read, back up, write. The lock is an advisory `fs2` lock
//! on a sidecar `<name>.lock` file, the write goes through a temporary file renamed over
//! the original, and a failed write is rolled back from the backup.

use chrono::Local;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::TargetConfig;
use crate::define::{find_defines, find_sentinel, CommentScanner};
use crate::error::{RestoreStatus, Result, RotationError};
use crate::keys::SecretKey;
use crate::parser::SecretBundle;

/// Comment heading the block of keys that had to be inserted
pub const INSERT_MARKER: &str = "/** wp-salt-rotator: inserted keys **/";

const BACKUP_TIMESTAMP: &str = "%Y%m%d-%H%M%S";
const MAX_BACKUP_SUFFIX: u32 = 100;
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

type WriteFn = fn(&Path, &[u8]) -> io::Result<()>;

/// The rewritten file content, computed entirely in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPlan {
    pub content: Vec<u8>,
    pub replaced: Vec<SecretKey>,
    pub inserted: Vec<SecretKey>,
}

/// What a successful [`ConfigRewriter::apply`] did
#[derive(Debug, Clone)]
pub struct AppliedRotation {
    pub config_path: PathBuf,
    pub backup_path: PathBuf,
    pub replaced: Vec<SecretKey>,
    pub inserted: Vec<SecretKey>,
}

/// Values currently defined in the config file, in canonical key order
#[derive(Debug, Clone)]
pub struct CurrentSalts {
    pub config_path: PathBuf,
    pub values: Vec<(SecretKey, Option<String>)>,
}

/// Compute the rotated content for `content`
pub fn plan(content: &[u8], bundle: &SecretBundle) -> RotationPlan {
    let mut lines = split_lines(content);
    let mut replaced = Vec::new();
    let mut inserted = Vec::new();

    for key in SecretKey::ALL {
        match locate(&lines, key) {
            Some((index, span)) => {
                lines[index].splice(span, bundle.get(key).rendered_line.bytes());
                replaced.push(key);
            }
            None => inserted.push(key),
        }
    }

    if !inserted.is_empty() {
        let eol = line_ending(content);
        let mut block = eol.to_vec();
        block.extend_from_slice(INSERT_MARKER.as_bytes());
        block.extend_from_slice(eol);
        for key in &inserted {
            block.extend_from_slice(bundle.get(*key).rendered_line.as_bytes());
            block.extend_from_slice(eol);
        }
        block.extend_from_slice(eol);

        let sentinel = lines
            .iter()
            .enumerate()
            .find_map(|(index, line)| find_sentinel(line).map(|at| (index, at)));
        match sentinel {
            Some((index, at)) => {
                lines[index].splice(at..at, block);
            }
            None => {
                if lines.last().is_some_and(|line| !ends_with_eol(line)) {
                    lines.push(eol.to_vec());
                }
                lines.push(block);
            }
        }
    }

    RotationPlan {
        content: lines.concat(),
        replaced,
        inserted,
    }
}

/// First active definition of `key`: line index and byte span within that line
fn locate(lines: &[Vec<u8>], key: SecretKey) -> Option<(usize, Range<usize>)> {
    let mut comments = CommentScanner::default();
    lines.iter().enumerate().find_map(|(index, line)| {
        let code = comments.code_start(line)?;
        find_defines(&line[code..])
            .into_iter()
            .find(|m| m.name == key.as_str())
            .map(|m| (index, code + m.span.start..code + m.span.end))
    })
}

/// Split into lines, each keeping its `\n`, `\r\n` or `\r` terminator
fn split_lines(content: &[u8]) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < content.len() {
        let end = match content[i] {
            b'\n' => Some(i),
            b'\r' if content.get(i + 1) == Some(&b'\n') => Some(i + 1),
            b'\r' => Some(i),
            _ => None,
        };
        if let Some(end) = end {
            lines.push(content[start..=end].to_vec());
            start = end + 1;
            i = end;
        }
        i += 1;
    }
    if start < content.len() {
        lines.push(content[start..].to_vec());
    }
    lines
}

/// Terminator of the first line, `\n` when there is none
fn line_ending(content: &[u8]) -> &'static [u8] {
    match content.iter().position(|b| *b == b'\r' || *b == b'\n') {
        Some(i) if content[i] == b'\n' => b"\n",
        Some(i) if content.get(i + 1) == Some(&b'\n') => b"\r\n",
        Some(_) => b"\r",
        None => b"\n",
    }
}

fn ends_with_eol(line: &[u8]) -> bool {
    matches!(line.last(), Some(b'\n' | b'\r'))
}

/// Locates, locks, backs up and rewrites the WordPress config file
pub struct ConfigRewriter {
    candidates: Vec<PathBuf>,
    backup_dir: Option<PathBuf>,
    lock_timeout: Duration,
    writer: WriteFn,
}

impl ConfigRewriter {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            backup_dir: None,
            lock_timeout: Duration::from_secs(30),
            writer: atomic_write,
        }
    }

    pub fn from_config(config: &TargetConfig) -> Self {
        let mut rewriter = Self::new(config.candidates.clone())
            .with_lock_timeout(Duration::from_secs(config.lock_timeout_seconds));
        if let Some(ref dir) = config.backup_dir {
            rewriter = rewriter.with_backup_dir(dir.clone());
        }
        rewriter
    }

    /// Keep backups in `dir` instead of next to the config file
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[cfg(test)]
    fn with_writer(mut self, writer: WriteFn) -> Self {
        self.writer = writer;
        self
    }

    /// First candidate that exists on disk
    pub fn resolve(&self) -> Result<PathBuf> {
        self.candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
            .ok_or_else(|| RotationError::ConfigFileNotFound {
                candidates: self.candidates.clone(),
            })
    }

    /// Rotate every key in the config file to the bundle's values
    pub fn apply(&self, bundle: &SecretBundle) -> Result<AppliedRotation> {
        let path = self.resolve()?;
        debug!("Using config file: {}", path.display());

        let _lock = RotationLock::acquire(&path, self.lock_timeout)?;

        let content = read_config(&path)?;
        let backup_path = self.create_backup(&path)?;
        info!("Backed up {} to {}", path.display(), backup_path.display());

        let plan = plan(&content, bundle);
        debug!(
            "Replacing {} definition(s), inserting {}",
            plan.replaced.len(),
            plan.inserted.len()
        );

        if let Err(source) = (self.writer)(&path, &plan.content) {
            error!("Failed to write {}: {}", path.display(), source);
            let restore = restore_from_backup(&backup_path, &path);
            return Err(RotationError::WriteFailed {
                path,
                source,
                restore,
            });
        }

        info!("Rotated salts in {}", path.display());
        Ok(AppliedRotation {
            config_path: path,
            backup_path,
            replaced: plan.replaced,
            inserted: plan.inserted,
        })
    }

    /// Compute what [`apply`](Self::apply) would write, touching nothing
    pub fn preview(&self, bundle: &SecretBundle) -> Result<(PathBuf, RotationPlan)> {
        let path = self.resolve()?;
        let content = read_config(&path)?;
        Ok((path, plan(&content, bundle)))
    }

    /// Read the values currently configured for each key
    pub fn read_current(&self) -> Result<CurrentSalts> {
        let path = self.resolve()?;
        let content = read_config(&path)?;
        let lines = split_lines(&content);

        let values = SecretKey::ALL
            .into_iter()
            .map(|key| {
                let value = locate(&lines, key).and_then(|(index, span)| {
                    find_defines(&lines[index][span])
                        .first()
                        .map(|m| String::from_utf8_lossy(m.value).into_owned())
                });
                (key, value)
            })
            .collect();

        Ok(CurrentSalts {
            config_path: path,
            values,
        })
    }

    /// Copy `path` to `<name>.bak.<timestamp>`, never overwriting an earlier backup
    fn create_backup(&self, path: &Path) -> Result<PathBuf> {
        let dir = match self.backup_dir {
            Some(ref dir) => dir.clone(),
            None => parent_dir(path),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wp-config.php".to_string());
        let stem = format!("{}.bak.{}", name, Local::now().format(BACKUP_TIMESTAMP));

        let failed = |backup_path: &Path, source: io::Error| RotationError::BackupFailed {
            backup_path: backup_path.to_path_buf(),
            source,
        };

        let mut backup_path = dir.join(&stem);
        if self.backup_dir.is_some() {
            fs::create_dir_all(&dir).map_err(|e| failed(&backup_path, e))?;
        }

        let mut suffix = 0;
        let mut backup = loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&backup_path)
            {
                Ok(file) => break file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && suffix < MAX_BACKUP_SUFFIX => {
                    suffix += 1;
                    backup_path = dir.join(format!("{}-{}", stem, suffix));
                }
                Err(e) => return Err(failed(&backup_path, e)),
            }
        };

        let copied = File::open(path)
            .and_then(|mut original| io::copy(&mut original, &mut backup))
            .and_then(|_| backup.sync_all())
            .and_then(|_| fs::metadata(path))
            .and_then(|meta| fs::set_permissions(&backup_path, meta.permissions()));

        if let Err(e) = copied {
            drop(backup);
            let _ = fs::remove_file(&backup_path);
            return Err(failed(&backup_path, e));
        }

        Ok(backup_path)
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn read_config(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| RotationError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn restore_from_backup(backup_path: &Path, path: &Path) -> RestoreStatus {
    match fs::copy(backup_path, path) {
        Ok(_) => {
            warn!("Restored {} from {}", path.display(), backup_path.display());
            RestoreStatus::Restored
        }
        Err(e) => {
            error!(
                "Failed to restore {} from {}: {}",
                path.display(),
                backup_path.display(),
                e
            );
            RestoreStatus::NotRestored {
                backup_path: backup_path.to_path_buf(),
            }
        }
    }
}

/// Exclusive advisory lock serializing rotations of one config file
struct RotationLock {
    file: File,
}

impl RotationLock {
    fn acquire(config_path: &Path, timeout: Duration) -> Result<Self> {
        let lock_path = lock_path_for(config_path).map_err(|e| RotationError::LockFailed {
            path: config_path.to_path_buf(),
            reason: format!("cannot resolve config path: {}", e),
        })?;
        let failed = |reason: String| RotationError::LockFailed {
            path: lock_path.clone(),
            reason,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| failed(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!("Acquired rotation lock {}", lock_path.display());
                    return Ok(Self { file });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(failed(format!(
                            "another rotation still holds it after {:?}",
                            timeout
                        )));
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(failed(e.to_string())),
            }
        }
    }
}

impl Drop for RotationLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Sidecar lock beside the real file, so every path reaching it shares one lock
fn lock_path_for(config_path: &Path) -> io::Result<PathBuf> {
    let target = fs::canonicalize(config_path)?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wp-config.php".to_string());
    Ok(parent_dir(&target).join(format!("{}.lock", name)))
}

/// Write through a temporary sibling renamed over the target
///
/// The temporary file takes over the original's permissions and ownership. When it
/// cannot be created or chowned (a read-only directory, an unprivileged user) the
/// content is written in place instead.
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let target = fs::canonicalize(path)?;
    let meta = fs::metadata(&target)?;
    let dir = parent_dir(&target);

    let mut tmp = match tempfile::Builder::new()
        .prefix(".wpsr-")
        .suffix(".tmp")
        .tempfile_in(&dir)
    {
        Ok(tmp) => tmp,
        Err(e) => {
            warn!(
                "Cannot create temporary file in {} ({}), writing in place",
                dir.display(),
                e
            );
            return write_in_place(&target, data);
        }
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Err(e) = std::os::unix::fs::chown(tmp.path(), Some(meta.uid()), Some(meta.gid())) {
            warn!(
                "Cannot preserve ownership of {} ({}), writing in place",
                target.display(),
                e
            );
            drop(tmp);
            return write_in_place(&target, data);
        }
    }

    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), meta.permissions())?;
    tmp.persist(&target).map_err(|e| e.error)?;
    Ok(())
}

fn write_in_place(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(data)?;
    file.sync_all()
}
