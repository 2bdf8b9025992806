// waymark-store/src/fs.rs
// ============================================================================
// Module: Standard Filesystem Port
// Description: std::fs-backed implementation of the Filesystem interface.
// Purpose: Provide durable, result-returning file primitives with fsync.
// Dependencies: waymark-core
// ============================================================================

//! ## Overview
//! The standard filesystem implementation maps the engine's filesystem port
//! onto `std::fs`, converting every failure into a typed result. Durability
//! comes from explicit fsync on files and directories around the
//! rename-then-fsync commit protocol used by the session log and the CAS
//! stores.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::UNIX_EPOCH;

use waymark_core::DirEntryInfo;
use waymark_core::FileWriter;
use waymark_core::Filesystem;
use waymark_core::FsError;

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

/// Maps an I/O failure at a path onto the closed filesystem error set.
fn map_io_error(path: &Path, err: &std::io::Error) -> FsError {
    if err.kind() == std::io::ErrorKind::NotFound {
        FsError::NotFound {
            path: path.display().to_string(),
        }
    } else {
        FsError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// SECTION: File Writer
// ============================================================================

/// Open file handle wrapping `std::fs::File`.
struct StdFileWriter {
    /// Path the handle writes to, kept for error context.
    path: String,
    /// Underlying file.
    file: File,
}

impl FileWriter for StdFileWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), FsError> {
        self.file.write_all(bytes).map_err(|err| FsError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    fn fsync(&mut self) -> Result<(), FsError> {
        self.file.sync_all().map_err(|err| FsError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }
}

// ============================================================================
// SECTION: Standard Filesystem
// ============================================================================

/// `std::fs`-backed filesystem port.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFilesystem;

impl StdFilesystem {
    /// Creates the standard filesystem port.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Filesystem for StdFilesystem {
    fn mkdirp(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(|err| map_io_error(path, &err))
    }

    fn open_write_truncate(&self, path: &Path) -> Result<Box<dyn FileWriter>, FsError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|err| map_io_error(path, &err))?;
        Ok(Box::new(StdFileWriter {
            path: path.display().to_string(),
            file,
        }))
    }

    fn open_append(&self, path: &Path) -> Result<Box<dyn FileWriter>, FsError> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|err| map_io_error(path, &err))?;
        Ok(Box::new(StdFileWriter {
            path: path.display().to_string(),
            file,
        }))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        fs::rename(from, to).map_err(|err| map_io_error(from, &err))
    }

    fn fsync_dir(&self, path: &Path) -> Result<(), FsError> {
        let dir = File::open(path).map_err(|err| map_io_error(path, &err))?;
        dir.sync_all().map_err(|err| map_io_error(path, &err))
    }

    fn read_file_bytes(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        fs::read(path).map_err(|err| map_io_error(path, &err))
    }

    fn read_file_utf8(&self, path: &Path) -> Result<String, FsError> {
        fs::read_to_string(path).map_err(|err| map_io_error(path, &err))
    }

    fn readdir_with_mtime(&self, path: &Path) -> Result<Vec<DirEntryInfo>, FsError> {
        let mut entries = Vec::new();
        let read_dir = fs::read_dir(path).map_err(|err| map_io_error(path, &err))?;
        for entry in read_dir {
            let entry = entry.map_err(|err| map_io_error(path, &err))?;
            let metadata = entry.metadata().map_err(|err| map_io_error(path, &err))?;
            let modified_ms = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |duration| {
                    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
                });
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                modified_ms,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
