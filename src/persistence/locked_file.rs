//! Flat-file form of the locked persistence primitive (spec §4.A).

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Atomically read-modify-write `path` under an exclusive advisory lock.
///
/// `modify` receives the existing file contents (empty string if the file
/// does not yet exist) and returns the new contents. The write goes through
/// a `.tmp` sibling that is `chmod 0600`'d and renamed into place, so a
/// crash mid-write never leaves a torn file behind.
pub fn locked_update<F>(path: &Path, modify: F) -> Result<()>
where
    F: FnOnce(String) -> Result<String>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let lock_path = lock_path_for(path);
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;

    // Some platforms refuse to lock a zero-byte file; keep one byte in it.
    if lock_file.metadata()?.len() == 0 {
        use std::io::Write;
        (&lock_file).write_all(b"\0")?;
    }

    lock_file.lock_exclusive().map_err(|e| {
        Error::PersistenceError(format!("failed to lock {}: {e}", lock_path.display()))
    })?;

    let result = run_locked(path, modify);

    // Best-effort: an unlock failure doesn't change the outcome of the update.
    let _ = FileExt::unlock(&lock_file);

    result
}

fn run_locked<F>(path: &Path, modify: F) -> Result<()>
where
    F: FnOnce(String) -> Result<String>,
{
    let existing = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let new_contents = modify(existing)?;

    let tmp_path = tmp_path_for(path);
    let write_result = (|| -> Result<()> {
        fs::write(&tmp_path, new_contents.as_bytes())?;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if write_result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }

    write_result
}

fn lock_path_for(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".lock");
    std::path::PathBuf::from(s)
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    std::path::PathBuf::from(s)
}

/// Opens a lock file purely to prove the contract without mutating `path`;
/// useful for callers that need to assert a lock is free before a batch of
/// reads. Not part of spec §4.A's required surface but cheap to expose.
pub fn try_lock_file(path: &Path) -> Result<File> {
    let lock_path = lock_path_for(path);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;
    file.try_lock_exclusive()
        .map_err(|_| Error::LockBusy(lock_path.display().to_string()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_parent_and_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state.json");

        locked_update(&path, |existing| {
            assert_eq!(existing, "");
            Ok("{\"a\":1}".to_string())
        })
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn modify_sees_previous_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.txt");

        locked_update(&path, |_| Ok("first".to_string())).unwrap();
        locked_update(&path, |existing| Ok(format!("{existing}-second"))).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first-second");
    }

    #[test]
    fn failed_modify_leaves_file_untouched_and_removes_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.txt");
        locked_update(&path, |_| Ok("original".to_string())).unwrap();

        let err = locked_update(&path, |_| {
            Err(Error::Internal("boom".to_string()))
        });
        assert!(err.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn file_is_private_after_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.txt");
        locked_update(&path, |_| Ok("secret".to_string())).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
