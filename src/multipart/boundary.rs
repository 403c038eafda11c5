//! Boundary token extraction from `Content-Type`.

use crate::error::DecodeError;

/// Longest boundary permitted by RFC 2046.
pub const MAX_BOUNDARY_LEN: usize = 70;

/// True when the content type is any `multipart/*` type.
pub fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..10)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/"))
}

/// Extract the `boundary=` parameter, unquoting it if needed.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, DecodeError> {
    let raw = content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim())
        .ok_or(DecodeError::MissingBoundary)?;

    let boundary = match raw.strip_prefix('"') {
        Some(rest) => rest
            .strip_suffix('"')
            .ok_or_else(|| DecodeError::InvalidBoundary("unterminated quote".into()))?,
        None => raw,
    };

    if boundary.is_empty() {
        return Err(DecodeError::InvalidBoundary("empty boundary".into()));
    }
    if boundary.len() > MAX_BOUNDARY_LEN {
        return Err(DecodeError::InvalidBoundary(format!(
            "boundary longer than {MAX_BOUNDARY_LEN} bytes"
        )));
    }
    if boundary.bytes().any(|b| b.is_ascii_control()) {
        return Err(DecodeError::InvalidBoundary(
            "boundary contains control characters".into(),
        ));
    }
    Ok(boundary.to_string())
}
