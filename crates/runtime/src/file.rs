//! File values
//!
//! Thin wrappers over `std::fs::File` behind the `file` value variant.
//! A file carries its path and mode strings for the `path`/`mode`
//! properties; `closed` reports whether the handle has been dropped.
//! OS failures surface as `IOError`.

use crate::error::RillError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

#[derive(Debug)]
pub struct FileObj {
    path: String,
    mode: String,
    handle: Mutex<Option<File>>,
}

impl FileObj {
    /// Open with a mode string: `r`, `w`, `a`, `r+`, `w+`, or `a+`.
    pub fn open(path: &str, mode: &str) -> Result<FileObj, RillError> {
        let mut opts = OpenOptions::new();
        match mode {
            "r" => opts.read(true),
            "w" => opts.write(true).create(true).truncate(true),
            "a" => opts.append(true).create(true),
            "r+" => opts.read(true).write(true),
            "w+" => opts.read(true).write(true).create(true).truncate(true),
            "a+" => opts.read(true).append(true).create(true),
            other => {
                return Err(RillError::io_error(format!(
                    "invalid file mode '{other}'"
                )));
            }
        };
        let handle = opts
            .open(path)
            .map_err(|e| RillError::io_error(format!("cannot open '{path}': {e}")))?;
        Ok(FileObj {
            path: path.to_string(),
            mode: mode.to_string(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.handle.lock().expect("file handle lock poisoned").is_none()
    }

    fn with_handle<R>(
        &self,
        f: impl FnOnce(&mut File) -> std::io::Result<R>,
    ) -> Result<R, RillError> {
        let mut guard = self.handle.lock().expect("file handle lock poisoned");
        let handle = guard
            .as_mut()
            .ok_or_else(|| RillError::io_error(format!("file '{}' is closed", self.path)))?;
        f(handle).map_err(|e| RillError::io_error(format!("'{}': {e}", self.path)))
    }

    /// Read up to `limit` bytes as text; `None` reads to EOF. Invalid UTF-8
    /// is replaced, not rejected.
    pub fn read_text(&self, limit: Option<usize>) -> Result<String, RillError> {
        let bytes = self.read_bytes(limit)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn read_bytes(&self, limit: Option<usize>) -> Result<Vec<u8>, RillError> {
        self.with_handle(|h| match limit {
            None => {
                let mut buf = Vec::new();
                h.read_to_end(&mut buf)?;
                Ok(buf)
            }
            Some(n) => {
                let mut buf = vec![0u8; n];
                let mut filled = 0;
                while filled < n {
                    let read = h.read(&mut buf[filled..])?;
                    if read == 0 {
                        break;
                    }
                    filled += read;
                }
                buf.truncate(filled);
                Ok(buf)
            }
        })
    }

    /// Write bytes; returns the byte count.
    pub fn write(&self, bytes: &[u8]) -> Result<usize, RillError> {
        self.with_handle(|h| {
            h.write_all(bytes)?;
            Ok(bytes.len())
        })
    }

    pub fn seek(&self, offset: u64) -> Result<u64, RillError> {
        self.with_handle(|h| h.seek(SeekFrom::Start(offset)))
    }

    pub fn tell(&self) -> Result<u64, RillError> {
        self.with_handle(|h| h.stream_position())
    }

    /// Close the handle; subsequent operations fail with `IOError`.
    /// Idempotent.
    pub fn close(&self) {
        self.handle.lock().expect("file handle lock poisoned").take();
    }

    /// Raw descriptor for `poll`; -1 once closed.
    #[cfg(unix)]
    pub fn fd(&self) -> i32 {
        use std::os::fd::AsRawFd;
        self.handle
            .lock()
            .expect("file handle lock poisoned")
            .as_ref()
            .map(|h| h.as_raw_fd())
            .unwrap_or(-1)
    }
}
