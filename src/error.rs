//! Error types.
//!
//! Two surfaces, matching the propagation policy of the demuxer: [`DemuxError`] is returned
//! across the crate's public I/O boundary (opening the input, opening an output sink);
//! [`ParseError`] is produced deep inside the packet/section/PES decoders and is always
//! recovered locally by the [`crate::dispatcher::Demuxer`] -- logged and dropped, never
//! propagated to a caller.

use std::fmt;
use std::io;

/// Error crossing the public API boundary: input could not be opened, or an output sink
/// could not be created.
#[derive(Debug)]
pub struct DemuxError {
    /// What the crate was trying to do when the I/O failed.
    pub context: &'static str,
    /// Underlying I/O failure.
    pub source: io::Error,
}

impl fmt::Display for DemuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.source)
    }
}

impl std::error::Error for DemuxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl DemuxError {
    pub(crate) fn new(context: &'static str, source: io::Error) -> Self {
        Self { context, source }
    }
}

/// Kinds of recoverable, internal parse failure.
///
/// None of these ever reach application code; they are handled by logging a [`log::warn!`]
/// and dropping the offending packet/section, per the error handling design in `spec.md` §7.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// A [`crate::SliceReader`] read or skip ran past the end of its slice. Carries
    /// the number of bytes the read attempted to consume.
    PacketOverrun(usize),
    /// A PSI/SI section's declared `table_id` did not match what the decoder expected.
    BadTableId(u8),
    /// A PSI/SI section was shorter than its header requires.
    ShortSection,
    /// A PES header failed to validate (`packet_start_code_prefix != 0x000001`, or the
    /// optional header's stated length ran past the available payload).
    BadPesHeader,
}

/// An internal decode error together with the byte offset (relative to the structure being
/// decoded) at which it was encountered.
#[derive(Debug)]
pub struct ParseError {
    /// Offset within the buffer being decoded.
    pub location: usize,
    /// What went wrong.
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) fn new(location: usize, kind: ParseErrorKind) -> Self {
        Self { location, kind }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at offset {}: {:?}", self.location, self.kind)
    }
}

/// [`std::result::Result`] alias for internal, recoverable decode operations.
pub type ParseResult<T> = Result<T, ParseError>;
