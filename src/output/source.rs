//! Byte sources drained by the stream writer.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

use bytes::Bytes;

/// Where the bytes of a response body come from.
pub enum ByteSource {
    /// In-memory buffer (text, JSON, small parts).
    Buffer(Cursor<Bytes>),
    /// A file on disk, read incrementally.
    File(BufReader<File>),
    /// Any other blocking reader.
    Stream(Box<dyn Read + Send>),
}

impl ByteSource {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        ByteSource::Buffer(Cursor::new(bytes.into()))
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_bytes(Bytes::from(text.into()))
    }

    pub fn open_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(ByteSource::File(BufReader::new(file)))
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        ByteSource::Stream(Box::new(reader))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ByteSource::Buffer(_) => "buffer",
            ByteSource::File(_) => "file",
            ByteSource::Stream(_) => "stream",
        }
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ByteSource::Buffer(c) => c.read(buf),
            ByteSource::File(f) => f.read(buf),
            ByteSource::Stream(s) => s.read(buf),
        }
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ByteSource").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn text_source_reads_utf8() {
        let mut src = ByteSource::from_text("héllo");
        let mut out = Vec::new();
        src.read_to_end(&mut out).unwrap();
        assert_eq!(out, "héllo".as_bytes());
        assert_eq!(src.kind(), "buffer");
    }

    #[test]
    fn file_source_reads_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"file body").unwrap();
        let mut src = ByteSource::open_file(tmp.path()).unwrap();
        let mut out = String::new();
        src.read_to_string(&mut out).unwrap();
        assert_eq!(out, "file body");
    }

    #[test]
    fn missing_file_is_error() {
        assert!(ByteSource::open_file(Path::new("/definitely/not/here")).is_err());
    }
}
