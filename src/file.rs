use std::{
    fs::File,
    io,
    os::fd::{AsFd, BorrowedFd},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

/// Exclusive owner of an opened file plus the metadata captured at open time.
/// The metadata is not refreshed; streaming never sends more than `size`.
#[derive(Debug)]
pub struct OpenFile {
    file: Option<File>,
    size: u64,
    mime_type: String,
    last_modified: SystemTime,
    location: String,
}

impl OpenFile {
    /// Opens `path` read-only. Anything that is not a regular file is
    /// reported as `NotFound`.
    pub fn open(path: &Path, location: impl Into<String>) -> io::Result<Self> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;

        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a regular file", path.display()),
            ));
        }

        Ok(Self {
            file: Some(file),
            size: metadata.len(),
            mime_type: mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string(),
            last_modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            location: location.into(),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn as_fd(&self) -> io::Result<BorrowedFd<'_>> {
        self.file
            .as_ref()
            .map(AsFd::as_fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file is closed"))
    }

    /// Returns `false` if the file was already closed.
    pub fn close(&mut self) -> bool {
        self.file.take().is_some()
    }
}
