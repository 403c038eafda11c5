//! Decoded parts and their spooled storage.

use std::fmt;
use std::fs;
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::NamedTempFile;

/// Where a part's bytes live once decoding finished.
pub enum PartStorage {
    Memory(Bytes),
    /// Deleted when the part is dropped.
    TempFile(NamedTempFile),
}

/// One decoded multipart segment: a form field or an uploaded file.
pub struct PartItem {
    field_name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    size: u64,
    storage: PartStorage,
}

impl PartItem {
    pub fn new(
        field_name: impl Into<String>,
        file_name: Option<String>,
        content_type: Option<String>,
        storage: PartStorage,
        size: u64,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name,
            content_type,
            size,
            storage,
        }
    }

    /// In-memory part, mainly for tests and synthetic requests.
    pub fn from_bytes(
        field_name: impl Into<String>,
        file_name: Option<String>,
        content_type: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(field_name, file_name, content_type, PartStorage::Memory(data), size)
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// A submitted file name marks a file part.
    pub fn is_file(&self) -> bool {
        self.file_name.is_some()
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, PartStorage::Memory(_))
    }

    pub fn spool_path(&self) -> Option<&Path> {
        match &self.storage {
            PartStorage::Memory(_) => None,
            PartStorage::TempFile(file) => Some(file.path()),
        }
    }

    /// A fresh reader positioned at the start of the content.
    pub fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.storage {
            PartStorage::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            PartStorage::TempFile(file) => Ok(Box::new(file.reopen()?)),
        }
    }

    pub fn bytes(&self) -> io::Result<Bytes> {
        match &self.storage {
            PartStorage::Memory(bytes) => Ok(bytes.clone()),
            PartStorage::TempFile(file) => Ok(Bytes::from(fs::read(file.path())?)),
        }
    }

    /// Content as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> io::Result<String> {
        Ok(String::from_utf8_lossy(&self.bytes()?).into_owned())
    }

    /// Copy the content to `dest`, returning the number of bytes written.
    pub fn persist_to(&self, dest: &Path) -> io::Result<u64> {
        match &self.storage {
            PartStorage::Memory(bytes) => {
                fs::write(dest, bytes)?;
                Ok(bytes.len() as u64)
            }
            PartStorage::TempFile(file) => fs::copy(file.path(), dest),
        }
    }
}

impl fmt::Debug for PartItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartItem")
            .field("field_name", &self.field_name)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("in_memory", &self.is_in_memory())
            .finish()
    }
}

/// Accumulates one part's body, moving to a temp file past the threshold.
pub(crate) struct Spool {
    memory: Vec<u8>,
    file: Option<BufWriter<NamedTempFile>>,
    threshold: usize,
    temp_dir: Option<PathBuf>,
}

impl Spool {
    pub(crate) fn new(threshold: usize, temp_dir: Option<PathBuf>) -> Self {
        Self {
            memory: Vec::new(),
            file: None,
            threshold,
            temp_dir,
        }
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            return file.write_all(data);
        }
        if self.memory.len() + data.len() <= self.threshold {
            self.memory.extend_from_slice(data);
            return Ok(());
        }

        let tmp = match &self.temp_dir {
            Some(dir) => tempfile::Builder::new().prefix("upload-").tempfile_in(dir)?,
            None => tempfile::Builder::new().prefix("upload-").tempfile()?,
        };
        tracing::trace!(path = %tmp.path().display(), "Spooling part to disk");
        let mut file = BufWriter::new(tmp);
        file.write_all(&self.memory)?;
        file.write_all(data)?;
        self.memory = Vec::new();
        self.file = Some(file);
        Ok(())
    }

    pub(crate) fn finish(self) -> io::Result<PartStorage> {
        match self.file {
            Some(file) => {
                let tmp = file.into_inner().map_err(|e| e.into_error())?;
                Ok(PartStorage::TempFile(tmp))
            }
            None => Ok(PartStorage::Memory(Bytes::from(self.memory))),
        }
    }
}
