use std::{
    fs::{self, File, OpenOptions, TryLockError},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crossbeam_utils::Backoff;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Deadline, Error, Result,
    resolver::{SequenceResolver, SequenceStatus},
};

const LOCK_EXTENSION: &str = ".lock";

/// Sleep between lock attempts once spinning is exhausted. Only used when a
/// deadline is set; without one the OS blocks on the lock directly.
const LOCK_POLL: Duration = Duration::from_micros(200);

/// A resolver that serializes allocation through exclusive advisory file
/// locks.
///
/// Each bucket owns one lock file, `<dir>/<prefix><bucket>.lock`, holding the
/// last sequence handed out for that bucket as a decimal integer. An
/// allocation opens the file, takes an exclusive lock, reads the last
/// sequence, writes back the next one and releases the lock. The locks are
/// `flock`/`LockFileEx` locks on the file itself, so they exclude other
/// processes as well as other handles within this process.
///
/// ## Scope
/// - ✅ Every process with access to `dir` that uses the same prefix and
///   epoch
/// - ❌ Filesystems without working advisory locks (some network mounts)
///
/// Lock files are never removed during allocation. Call [`Self::cleanup`]
/// (or [`Self::clean_all`]) as an explicit maintenance step.
#[derive(Debug, Clone)]
pub struct FileLockResolver {
    dir: PathBuf,
    prefix: String,
}

impl FileLockResolver {
    pub const DEFAULT_PREFIX: &'static str = "snowflake-";

    /// Creates a resolver storing its lock files in `dir`, creating the
    /// directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResolverUnavailable`] if the directory cannot be
    /// created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::unavailable_with(format!("failed to create lock dir {}", dir.display()), e)
        })?;
        Ok(Self {
            dir,
            prefix: Self::DEFAULT_PREFIX.to_owned(),
        })
    }

    /// Replaces the lock file prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the prefix is empty or contains a
    /// path separator.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.contains(['/', '\\']) {
            return Err(Error::configuration(format!(
                "invalid lock file prefix `{prefix}`"
            )));
        }
        self.prefix = prefix;
        Ok(self)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The lock file used for `bucket`.
    pub fn lock_path(&self, bucket: u64) -> PathBuf {
        self.dir.join(format!("{}{bucket}{LOCK_EXTENSION}", self.prefix))
    }

    fn bucket_of(&self, file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(LOCK_EXTENSION)?
            .parse()
            .ok()
    }

    /// Removes every lock file whose bucket is older than `before_bucket` and
    /// returns how many were removed.
    ///
    /// Files currently locked by an allocation are skipped. A process still
    /// allocating in a removed bucket would restart that bucket at `0`, so
    /// `before_bucket` must trail the clock of every process sharing the
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResolverUnavailable`] if the directory cannot be read
    /// or a file cannot be removed.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn cleanup(&self, before_bucket: u64) -> Result<usize> {
        self.remove_where(|bucket| bucket < before_bucket)
    }

    /// Removes every lock file carrying this resolver's prefix.
    ///
    /// # Errors
    ///
    /// See [`Self::cleanup`].
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn clean_all(&self) -> Result<usize> {
        self.remove_where(|_| true)
    }

    fn remove_where(&self, mut matches: impl FnMut(u64) -> bool) -> Result<usize> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            Error::unavailable_with(format!("failed to read lock dir {}", self.dir.display()), e)
        })?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::unavailable_with(
                    format!("failed to read lock dir {}", self.dir.display()),
                    e,
                )
            })?;
            let name = entry.file_name();
            let Some(bucket) = name.to_str().and_then(|name| self.bucket_of(name)) else {
                continue;
            };
            if matches(bucket) && remove_unlocked(&entry.path())? {
                removed += 1;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(removed, dir = %self.dir.display(), "removed lock files");
        Ok(removed)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn allocate(
        &self,
        timestamp: u64,
        max_sequence: u64,
        deadline: Deadline,
    ) -> Result<SequenceStatus> {
        let path = self.lock_path(timestamp);
        let mut locked = loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| {
                    Error::unavailable_with(format!("failed to open {}", path.display()), e)
                })?;

            let locked = LockedFile::acquire(file, &path, deadline)?;
            // Cleanup may have unlinked the file between open and lock.
            if locked.is_linked()? {
                break locked;
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(path = %path.display(), "lock file replaced while waiting, reopening");
        };
        let sequence = match locked.read_last()? {
            None => 0,
            Some(last) if last < max_sequence => last + 1,
            Some(_) => return Ok(SequenceStatus::Pending { yield_for: 1 }),
        };
        locked.write(sequence)?;

        Ok(SequenceStatus::Ready {
            sequence,
            timestamp,
        })
    }
}

impl SequenceResolver for FileLockResolver {
    fn try_next(
        &self,
        timestamp: u64,
        max_sequence: u64,
        deadline: Deadline,
    ) -> Result<SequenceStatus> {
        self.allocate(timestamp, max_sequence, deadline)
    }
}

/// An open lock file holding its exclusive lock until dropped.
struct LockedFile<'a> {
    file: File,
    path: &'a Path,
}

impl<'a> LockedFile<'a> {
    fn acquire(file: File, path: &'a Path, deadline: Deadline) -> Result<Self> {
        if !deadline.is_bounded() {
            file.lock().map_err(|e| {
                Error::unavailable_with(format!("failed to lock {}", path.display()), e)
            })?;
            return Ok(Self { file, path });
        }

        let backoff = Backoff::new();
        loop {
            match file.try_lock() {
                Ok(()) => return Ok(Self { file, path }),
                Err(TryLockError::WouldBlock) => {
                    if deadline.has_elapsed() {
                        return Err(Error::unavailable(format!(
                            "deadline elapsed waiting for lock on {}",
                            path.display()
                        )));
                    }
                    if backoff.is_completed() {
                        thread::sleep(deadline.cap(LOCK_POLL));
                    } else {
                        backoff.snooze();
                    }
                }
                Err(TryLockError::Error(e)) => {
                    return Err(Error::unavailable_with(
                        format!("failed to lock {}", path.display()),
                        e,
                    ));
                }
            }
        }
    }

    /// Whether the path still names the locked file.
    fn is_linked(&self) -> Result<bool> {
        is_same_file(&self.file, self.path).map_err(|e| self.io_error("stat", e))
    }

    fn read_last(&mut self) -> Result<Option<u64>> {
        let mut contents = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut contents))
            .map_err(|e| self.io_error("read", e))?;

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed.parse().map(Some).map_err(|e| {
            Error::unavailable_with(
                format!("corrupt sequence `{trimmed}` in {}", self.path.display()),
                e,
            )
        })
    }

    fn write(&mut self, sequence: u64) -> Result<()> {
        self.file
            .set_len(0)
            .and_then(|()| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(sequence.to_string().as_bytes()))
            .map_err(|e| self.io_error("write", e))
    }

    fn io_error(&self, op: &str, e: io::Error) -> Error {
        Error::unavailable_with(format!("failed to {op} {}", self.path.display()), e)
    }
}

impl Drop for LockedFile<'_> {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well.
        let _ = self.file.unlock();
    }
}

/// Removes `path` unless another handle holds its lock. Returns whether the
/// file was removed.
fn remove_unlocked(path: &Path) -> Result<bool> {
    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(Error::unavailable_with(
                format!("failed to open {}", path.display()),
                e,
            ));
        }
    };

    match file.try_lock() {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => return Ok(false),
        Err(TryLockError::Error(e)) => {
            return Err(Error::unavailable_with(
                format!("failed to lock {}", path.display()),
                e,
            ));
        }
    }

    match is_same_file(&file, path) {
        Ok(true) => {}
        Ok(false) => return Ok(false),
        Err(e) => {
            return Err(Error::unavailable_with(
                format!("failed to stat {}", path.display()),
                e,
            ));
        }
    }

    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::unavailable_with(
            format!("failed to remove {}", path.display()),
            e,
        )),
    }
}

/// Whether `path` currently names the same file as the open handle `file`.
/// A missing path is not an error.
#[cfg(unix)]
fn is_same_file(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(named) => Ok(held.dev() == named.dev() && held.ino() == named.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

// Without stable file ids, fall back to checking that the path still exists.
// Windows refuses to delete a file another handle holds locked, which covers
// the remaining window there.
#[cfg(not(unix))]
fn is_same_file(_file: &File, path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .unwrap()
    }

    #[test]
    fn unlinked_lock_file_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snowflake-1.lock");

        let locked = LockedFile::acquire(open(&path), &path, Deadline::NONE).unwrap();
        assert!(locked.is_linked().unwrap());

        fs::remove_file(&path).unwrap();
        assert!(!locked.is_linked().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn replaced_lock_file_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snowflake-1.lock");

        let locked = LockedFile::acquire(open(&path), &path, Deadline::NONE).unwrap();
        fs::remove_file(&path).unwrap();
        let replacement = open(&path);
        assert!(!locked.is_linked().unwrap());
        assert!(is_same_file(&replacement, &path).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn allocation_never_writes_to_an_unlinked_file() {
        let dir = tempdir().unwrap();
        let resolver = FileLockResolver::new(dir.path()).unwrap();
        let path = resolver.lock_path(3);
        resolver.try_next(3, 10, Deadline::NONE).unwrap();

        // Hold the lock so the next allocation opens the file and then waits.
        let holder = open(&path);
        holder.lock().unwrap();
        let status = std::thread::scope(|s| {
            let waiter = s.spawn(|| resolver.try_next(3, 10, Deadline::NONE).unwrap());
            std::thread::sleep(Duration::from_millis(50));
            // Cleanup by a process holding the lock: unlink, then release.
            fs::remove_file(&path).unwrap();
            holder.unlock().unwrap();
            waiter.join().unwrap()
        });

        // The waiter reopened a fresh file instead of bumping the orphan.
        assert_eq!(
            status,
            SequenceStatus::Ready {
                sequence: 0,
                timestamp: 3
            }
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "0");
    }
}
