//! Single-pass multipart decoder.
//!
//! # Responsibilities
//! - Find part delimiters in a byte stream without buffering the body
//! - Parse each part's header block (`Content-Disposition`, `Content-Type`)
//! - Stream part content into a [`Spool`] and emit finished [`PartItem`]s
//!
//! # Delimiter Recognition
//! ```text
//! pattern = CRLF "--" boundary          (a CRLF is implied before the body)
//!
//! Preamble ──pattern──▶ Confirm ──LWSP* CRLF──▶ Headers ──CRLF CRLF──▶ Body
//!                          │                                          │
//!                          └──"--"──▶ Epilogue ◀──pattern + "--"──────┘
//! ```
//! A full pattern match only becomes a delimiter once the bytes after it are
//! confirmed. If confirmation fails, the matched bytes were content: they are
//! written to the current part and the lookahead is scanned again.
//!
//! The pattern starts with CR and the boundary can't contain CR, so a failed
//! partial match can restart only at the failing byte. This keeps the scan
//! O(n) with a lookahead no longer than the pattern.

use std::io::{self, Read};
use std::mem;
use std::path::PathBuf;

use crate::config::schema::UploadConfig;
use crate::error::DecodeError;

use super::part::{PartItem, Spool};

/// Longest run of whitespace accepted between a boundary and its CRLF.
const MAX_TRANSPORT_PADDING: usize = 256;

/// One confirmed delimiter in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiter {
    /// Offset of the `--boundary` bytes in the body.
    pub offset: u64,
    /// True for the closing `--boundary--`.
    pub closing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preamble,
    Headers,
    Body,
    Epilogue,
}

enum Lookahead {
    Pending,
    Open,
    Closing,
    Violation,
}

struct PartBuilder {
    field_name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    size: u64,
    spool: Spool,
}

/// Streaming multipart/form-data decoder for one request body.
pub struct MultipartDecoder {
    pattern: Vec<u8>,
    matched: usize,
    match_start: u64,
    phase: Phase,
    confirming: bool,
    lookahead: Vec<u8>,
    header_buf: Vec<u8>,
    current: Option<PartBuilder>,
    parts: Vec<PartItem>,
    delimiters: Vec<Delimiter>,
    /// Position in the body including the implied leading CRLF.
    position: u64,
    body_len: u64,

    memory_threshold: usize,
    temp_dir: Option<PathBuf>,
    max_part_size: u64,
    max_request_size: u64,
    max_header_size: usize,
    read_buffer_size: usize,
}

impl MultipartDecoder {
    pub fn new(boundary: &str, config: &UploadConfig) -> Self {
        let mut pattern = Vec::with_capacity(boundary.len() + 4);
        pattern.extend_from_slice(b"\r\n--");
        pattern.extend_from_slice(boundary.as_bytes());

        let mut decoder = Self {
            pattern,
            matched: 0,
            match_start: 0,
            phase: Phase::Preamble,
            confirming: false,
            lookahead: Vec::new(),
            header_buf: Vec::new(),
            current: None,
            parts: Vec::new(),
            delimiters: Vec::new(),
            position: 0,
            body_len: 0,
            memory_threshold: config.memory_threshold,
            temp_dir: config.temp_dir.clone(),
            max_part_size: config.max_part_size,
            max_request_size: config.max_request_size,
            max_header_size: config.max_header_size,
            read_buffer_size: config.read_buffer_size.max(1),
        };
        // The implied CRLF lets a body that starts with `--boundary` match.
        // Both bytes land in the preamble, so this cannot fail.
        for &b in b"\r\n" {
            let _ = decoder.step(b);
        }
        decoder
    }

    /// Decode a whole body from `reader`.
    pub fn decode<R: Read>(mut self, mut reader: R) -> Result<Vec<PartItem>, DecodeError> {
        let mut buf = vec![0u8; self.read_buffer_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.feed(&buf[..n])?;
        }
        self.finish().map(|(parts, _)| parts)
    }

    /// Push the next slice of body bytes through the state machine.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        self.body_len += data.len() as u64;
        if self.max_request_size > 0 && self.body_len > self.max_request_size {
            return Err(DecodeError::RequestTooLarge {
                limit: self.max_request_size,
            });
        }
        if self.phase == Phase::Epilogue {
            return Ok(());
        }
        for &b in data {
            self.step(b)?;
        }
        Ok(())
    }

    /// Signal end of input.
    ///
    /// Returns the finished parts and the delimiter table. A body with no
    /// delimiter at all is an empty list; a body that opened a part but never
    /// closed it is [`DecodeError::Truncated`].
    pub fn finish(self) -> Result<(Vec<PartItem>, Vec<Delimiter>), DecodeError> {
        match self.phase {
            Phase::Epilogue | Phase::Preamble => Ok((self.parts, self.delimiters)),
            Phase::Headers | Phase::Body => Err(DecodeError::Truncated),
        }
    }

    pub fn delimiters(&self) -> &[Delimiter] {
        &self.delimiters
    }

    fn step(&mut self, b: u8) -> Result<(), DecodeError> {
        self.position += 1;
        if self.confirming {
            return self.confirm_step(b);
        }
        match self.phase {
            Phase::Preamble | Phase::Body => self.scan_step(b),
            Phase::Headers => self.header_step(b),
            Phase::Epilogue => Ok(()),
        }
    }

    fn scan_step(&mut self, b: u8) -> Result<(), DecodeError> {
        if b == self.pattern[self.matched] {
            if self.matched == 0 {
                self.match_start = self.position - 1;
            }
            self.matched += 1;
            if self.matched == self.pattern.len() {
                self.matched = 0;
                self.confirming = true;
                self.lookahead.clear();
            }
            return Ok(());
        }

        if self.matched > 0 {
            let m = mem::take(&mut self.matched);
            self.emit_pattern_prefix(m)?;
        }
        if b == self.pattern[0] {
            self.matched = 1;
            self.match_start = self.position - 1;
            Ok(())
        } else {
            self.emit(&[b])
        }
    }

    fn confirm_step(&mut self, b: u8) -> Result<(), DecodeError> {
        self.lookahead.push(b);
        match classify(&self.lookahead) {
            Lookahead::Pending => Ok(()),
            Lookahead::Open => self.on_delimiter(false),
            Lookahead::Closing => self.on_delimiter(true),
            Lookahead::Violation => {
                self.confirming = false;
                let replay = mem::take(&mut self.lookahead);
                self.emit_pattern_prefix(self.pattern.len())?;
                self.position -= replay.len() as u64;
                for b in replay {
                    self.step(b)?;
                }
                Ok(())
            }
        }
    }

    fn on_delimiter(&mut self, closing: bool) -> Result<(), DecodeError> {
        self.confirming = false;
        self.lookahead.clear();
        self.delimiters.push(Delimiter {
            offset: self.match_start,
            closing,
        });

        if self.phase == Phase::Body {
            self.finish_part()?;
        }
        if closing {
            self.phase = Phase::Epilogue;
        } else {
            self.phase = Phase::Headers;
            self.header_buf.clear();
        }
        Ok(())
    }

    fn header_step(&mut self, b: u8) -> Result<(), DecodeError> {
        self.header_buf.push(b);
        if self.header_buf.len() > self.max_header_size {
            return Err(DecodeError::HeaderTooLarge {
                limit: self.max_header_size,
            });
        }
        if self.header_buf == b"\r\n" || self.header_buf.ends_with(b"\r\n\r\n") {
            let block = mem::take(&mut self.header_buf);
            self.begin_part(&block)?;
        }
        Ok(())
    }

    fn begin_part(&mut self, block: &[u8]) -> Result<(), DecodeError> {
        let headers = PartHeaders::parse(block)?;
        tracing::trace!(
            field = %headers.field_name,
            file_name = ?headers.file_name,
            "Multipart part opened"
        );
        self.current = Some(PartBuilder {
            field_name: headers.field_name,
            file_name: headers.file_name,
            content_type: headers.content_type,
            size: 0,
            spool: Spool::new(self.memory_threshold, self.temp_dir.clone()),
        });
        self.phase = Phase::Body;
        self.matched = 0;
        Ok(())
    }

    fn finish_part(&mut self) -> Result<(), DecodeError> {
        let Some(builder) = self.current.take() else {
            return Ok(());
        };
        let storage = builder.spool.finish()?;
        self.parts.push(PartItem::new(
            builder.field_name,
            builder.file_name,
            builder.content_type,
            storage,
            builder.size,
        ));
        Ok(())
    }

    fn emit_pattern_prefix(&mut self, len: usize) -> Result<(), DecodeError> {
        if self.phase != Phase::Body {
            return Ok(());
        }
        let prefix = self.pattern[..len].to_vec();
        self.emit(&prefix)
    }

    /// Write content bytes to the open part. Preamble bytes are dropped.
    fn emit(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let Some(part) = self.current.as_mut() else {
            return Ok(());
        };
        if self.phase != Phase::Body {
            return Ok(());
        }
        part.size += data.len() as u64;
        if self.max_part_size > 0 && part.size > self.max_part_size {
            return Err(DecodeError::PartTooLarge {
                limit: self.max_part_size,
            });
        }
        part.spool.write(data)?;
        Ok(())
    }
}

impl std::fmt::Debug for MultipartDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartDecoder")
            .field("phase", &self.phase)
            .field("parts", &self.parts.len())
            .field("body_len", &self.body_len)
            .finish_non_exhaustive()
    }
}

fn classify(lookahead: &[u8]) -> Lookahead {
    if lookahead[0] == b'-' {
        return match lookahead.get(1) {
            None => Lookahead::Pending,
            Some(b'-') => Lookahead::Closing,
            Some(_) => Lookahead::Violation,
        };
    }

    let padding = lookahead
        .iter()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .count();
    if padding == lookahead.len() {
        return if padding > MAX_TRANSPORT_PADDING {
            Lookahead::Violation
        } else {
            Lookahead::Pending
        };
    }
    if lookahead[padding] != b'\r' {
        return Lookahead::Violation;
    }
    match lookahead.get(padding + 1) {
        None => Lookahead::Pending,
        Some(b'\n') => Lookahead::Open,
        Some(_) => Lookahead::Violation,
    }
}

#[derive(Debug, PartialEq)]
struct PartHeaders {
    field_name: String,
    file_name: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    fn parse(block: &[u8]) -> Result<Self, DecodeError> {
        let text = String::from_utf8_lossy(block);
        let mut disposition = None;
        let mut content_type = None;

        for line in text.split("\r\n").filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| DecodeError::MalformedHeader(line.to_string()))?;
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-disposition") {
                disposition = Some(value.trim().to_string());
            } else if name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            }
        }

        let disposition = disposition.ok_or_else(|| {
            DecodeError::MalformedHeader("part has no Content-Disposition".into())
        })?;
        let params = disposition_params(&disposition);

        let field_name = params
            .iter()
            .find(|(k, _)| k == "name")
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                DecodeError::MalformedHeader(format!("no field name in '{disposition}'"))
            })?;

        let extended = params
            .iter()
            .find(|(k, _)| k == "filename*")
            .and_then(|(_, v)| decode_ext_value(v));
        let file_name = extended.or_else(|| {
            params
                .iter()
                .find(|(k, _)| k == "filename")
                .map(|(_, v)| v.clone())
        });

        Ok(Self {
            field_name,
            file_name,
            content_type,
        })
    }
}

/// Split `form-data; name="a"; filename="b;c.txt"` into lower-cased
/// parameter names and unquoted values. The leading disposition type is skipped.
fn disposition_params(value: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = value.chars().peekable();

    // disposition type
    for c in chars.by_ref() {
        if c == ';' {
            break;
        }
    }

    loop {
        let mut name = String::new();
        let mut terminator = None;
        for c in chars.by_ref() {
            if c == '=' || c == ';' {
                terminator = Some(c);
                break;
            }
            name.push(c);
        }
        let name = name.trim().to_ascii_lowercase();

        if terminator != Some('=') {
            // flag parameter without a value
            if !name.is_empty() {
                params.push((name, String::new()));
            }
            if terminator.is_none() {
                break;
            }
            continue;
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut val = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(next) = chars.next() {
                            val.push(next);
                        }
                    }
                    '"' => break,
                    c => val.push(c),
                }
            }
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
            }
        } else {
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
                val.push(c);
            }
            val = val.trim().to_string();
        }

        if !name.is_empty() {
            params.push((name, val));
        }
        if chars.peek().is_none() {
            break;
        }
    }
    params
}

/// Decode an RFC 5987 `charset'lang'percent-encoded` value.
fn decode_ext_value(value: &str) -> Option<String> {
    let mut pieces = value.splitn(3, '\'');
    let charset = pieces.next()?;
    let _lang = pieces.next()?;
    let encoded = pieces.next()?;
    if !charset.eq_ignore_ascii_case("utf-8") {
        return None;
    }
    urlencoding::decode(encoded).ok().map(|s| s.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UploadConfig {
        UploadConfig::default()
    }

    fn body(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, file, content) in parts {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match file {
                Some(f) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            out.extend_from_slice(content);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        out
    }

    /// Hands out one byte per read.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.split_first() {
                Some((&b, rest)) if !buf.is_empty() => {
                    buf[0] = b;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_fields_and_file_round_trip() {
        let file: &[u8] = &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let raw = body(
            "X",
            &[("a", None, b"1"), ("b", None, b"2"), ("file", Some("test.png"), file)],
        );
        let parts = MultipartDecoder::new("X", &config()).decode(&raw[..]).unwrap();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].field_name(), "a");
        assert_eq!(parts[0].text().unwrap(), "1");
        assert!(!parts[0].is_file());
        assert_eq!(parts[1].text().unwrap(), "2");

        let f = &parts[2];
        assert_eq!(f.field_name(), "file");
        assert_eq!(f.file_name(), Some("test.png"));
        assert_eq!(f.content_type(), Some("application/octet-stream"));
        assert_eq!(f.size(), 10);
        assert_eq!(&f.bytes().unwrap()[..], file);
    }

    #[test]
    fn test_boundary_bytes_inside_content() {
        let mut content = b"head --X mid \r\n--X tail \r\n--Xnot-a-delimiter".to_vec();
        content.extend_from_slice(b"\r\n--X \tjunk");
        let raw = body("X", &[("file", Some("tricky.bin"), &content)]);

        let parts = MultipartDecoder::new("X", &config()).decode(&raw[..]).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].size(), content.len() as u64);
        assert_eq!(&parts[0].bytes().unwrap()[..], &content[..]);
    }

    #[test]
    fn test_one_byte_reads() {
        let content = b"\r\r\n-\r\n--\r\n--Y\r\n--XYZ".to_vec();
        let raw = body("XY", &[("k", None, b"v"), ("f", Some("f.txt"), &content)]);
        let parts = MultipartDecoder::new("XY", &config())
            .decode(Trickle(&raw))
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(&parts[1].bytes().unwrap()[..], &content[..]);
    }

    #[test]
    fn test_delimiter_offsets_recorded() {
        let raw = body("X", &[("a", None, b"1")]);
        let mut decoder = MultipartDecoder::new("X", &config());
        decoder.feed(&raw).unwrap();
        let (parts, delimiters) = decoder.finish().unwrap();
        assert_eq!(parts.len(), 1);

        assert_eq!(delimiters.len(), 2);
        assert_eq!(delimiters[0], Delimiter { offset: 0, closing: false });
        let closing = raw.windows(5).position(|w| w == b"--X--").unwrap() as u64;
        assert_eq!(delimiters[1], Delimiter { offset: closing, closing: true });
    }

    #[test]
    fn test_preamble_padding_and_epilogue() {
        let raw = b"ignored preamble\r\n--B  \r\n\
            Content-Disposition: form-data; name=\"x\"\r\n\r\nvalue\r\n--B--\r\nepilogue";
        let parts = MultipartDecoder::new("B", &config()).decode(&raw[..]).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].text().unwrap(), "value");
    }

    #[test]
    fn test_empty_body_is_empty_list() {
        let parts = MultipartDecoder::new("X", &config()).decode(&b""[..]).unwrap();
        assert!(parts.is_empty());

        let parts = MultipartDecoder::new("X", &config())
            .decode(&b"--X--\r\n"[..])
            .unwrap();
        assert!(parts.is_empty());
    }

    #[test]
    fn test_truncated_body() {
        let mut raw = body("X", &[("file", Some("a.bin"), b"0123456789")]);
        raw.truncate(raw.len() - 9);
        let err = MultipartDecoder::new("X", &config())
            .decode(&raw[..])
            .unwrap_err();
        assert!(matches!(err, DecodeError::Truncated));
    }

    #[test]
    fn test_part_without_headers() {
        let raw = b"--X\r\n\r\nbare\r\n--X--";
        let err = MultipartDecoder::new("X", &config())
            .decode(&raw[..])
            .unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader(_)));
    }

    #[test]
    fn test_part_size_limit() {
        let mut cfg = config();
        cfg.max_part_size = 4;
        let raw = body("X", &[("f", Some("big.bin"), b"12345")]);
        let err = MultipartDecoder::new("X", &cfg).decode(&raw[..]).unwrap_err();
        assert!(matches!(err, DecodeError::PartTooLarge { limit: 4 }));
    }

    #[test]
    fn test_request_size_limit() {
        let mut cfg = config();
        cfg.max_request_size = 16;
        let raw = body("X", &[("f", Some("big.bin"), b"12345")]);
        let err = MultipartDecoder::new("X", &cfg).decode(&raw[..]).unwrap_err();
        assert!(matches!(err, DecodeError::RequestTooLarge { limit: 16 }));
    }

    #[test]
    fn test_header_size_limit() {
        let mut cfg = config();
        cfg.max_header_size = 32;
        let raw = body("X", &[("a_rather_long_field_name", None, b"1")]);
        let err = MultipartDecoder::new("X", &cfg).decode(&raw[..]).unwrap_err();
        assert!(matches!(err, DecodeError::HeaderTooLarge { limit: 32 }));
    }

    #[test]
    fn test_large_part_spooled_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.memory_threshold = 64;
        cfg.temp_dir = Some(dir.path().to_path_buf());
        let content = vec![b'z'; 1000];
        let raw = body("X", &[("small", None, b"s"), ("f", Some("z.bin"), &content)]);

        let parts = MultipartDecoder::new("X", &cfg).decode(&raw[..]).unwrap();
        assert!(parts[0].is_in_memory());
        assert!(!parts[1].is_in_memory());
        assert!(parts[1].spool_path().unwrap().starts_with(dir.path()));
        assert_eq!(parts[1].bytes().unwrap().len(), 1000);
    }

    #[test]
    fn test_disposition_params() {
        let params = disposition_params(r#"form-data; name="a;b"; filename="c \"d\".txt"; x=y"#);
        assert_eq!(
            params,
            vec![
                ("name".to_string(), "a;b".to_string()),
                ("filename".to_string(), "c \"d\".txt".to_string()),
                ("x".to_string(), "y".to_string()),
            ]
        );
    }

    #[test]
    fn test_extended_filename_preferred() {
        let headers = PartHeaders::parse(
            b"Content-Disposition: form-data; name=\"f\"; filename=\"fallback.txt\"; \
              filename*=UTF-8''%E6%96%87%E4%BB%B6.txt\r\n\r\n",
        )
        .unwrap();
        assert_eq!(headers.file_name.as_deref(), Some("文件.txt"));
    }
}
