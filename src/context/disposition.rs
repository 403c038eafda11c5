//! Content-Disposition and MIME helpers for response output.

use std::path::Path;

/// How the client should present a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionKind {
    Inline,
    Attachment,
}

impl DispositionKind {
    fn as_str(&self) -> &'static str {
        match self {
            DispositionKind::Inline => "inline",
            DispositionKind::Attachment => "attachment",
        }
    }
}

/// Build a header value carrying both an ASCII fallback and the UTF-8 name.
///
/// `attachment; filename="r_sum_.pdf"; filename*=utf-8''r%C3%A9sum%C3%A9.pdf`
pub fn content_disposition(kind: DispositionKind, file_name: &str) -> String {
    format!(
        "{}; filename=\"{}\"; filename*=utf-8''{}",
        kind.as_str(),
        ascii_fallback(file_name),
        urlencoding::encode(file_name)
    )
}

fn ascii_fallback(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Guess a MIME type from a file extension.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt") | Some("log") => "text/plain; charset=utf-8",
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_name() {
        assert_eq!(
            content_disposition(DispositionKind::Inline, "abc.txt"),
            "inline; filename=\"abc.txt\"; filename*=utf-8''abc.txt"
        );
    }

    #[test]
    fn test_unicode_name() {
        let value = content_disposition(DispositionKind::Attachment, "résumé \"v2\".pdf");
        assert_eq!(
            value,
            "attachment; filename=\"r_sum_ _v2_.pdf\"; \
             filename*=utf-8''r%C3%A9sum%C3%A9%20%22v2%22.pdf"
        );
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("a/b/photo.PNG")), "image/png");
        assert_eq!(guess_mime(Path::new("noext")), "application/octet-stream");
    }
}
