//! Streaming multipart/form-data decoding.
//!
//! # Data Flow
//! ```text
//! Content-Type header
//!     → boundary.rs (extract and validate the boundary token)
//!
//! request body (any Read, consumed in read_buffer_size chunks)
//!     → decoder.rs (single forward pass, delimiter state machine)
//!     → part.rs (each part spooled to memory or a temp file)
//!     → Vec<PartItem> handed to the executor
//! ```
//!
//! # Design Decisions
//! - The body is never fully buffered; memory use is bounded by the spool threshold
//! - A delimiter only counts at a CRLF-anchored, fully confirmed position
//! - Any failure drops every spooled part, so nothing partial reaches handlers

pub mod boundary;
pub mod decoder;
pub mod part;

pub use boundary::{boundary_from_content_type, is_multipart};
pub use decoder::{Delimiter, MultipartDecoder};
pub use part::{PartItem, PartStorage};
