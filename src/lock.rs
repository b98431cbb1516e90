//! Process lock so only one scheduler drives the matrix

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use directories::ProjectDirs;
use tracing::debug;

/// Guard that holds the lock file open. Lock is released when dropped.
pub struct Lock {
    _file: File,
    path: PathBuf,
}

impl Lock {
    /// Try to acquire an exclusive lock for the scheduler.
    /// Returns an error if another instance is already running.
    pub fn acquire() -> io::Result<Self> {
        let path = Self::path().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "could not determine lock file path",
            )
        })?;
        Self::acquire_at(path)
    }

    fn acquire_at(path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock().is_err() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "another instance of sportsmatrix is already running",
            ));
        }

        // PID for debugging
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "acquired process lock");

        Ok(Self { _file: file, path })
    }

    fn path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sportsmatrix")
            .map(|dirs| dirs.config_dir().join("sportsmatrix.lock"))
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
