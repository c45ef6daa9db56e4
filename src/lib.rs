//! MPEG-2 Transport Stream demultiplexer core: byte-stream synchronization, PSI/SI table
//! decoding (PAT/PMT/SDT), PES header and PTS/DTS extraction, and elementary-stream output.
//!
//! The pieces compose in dependency order -- [`source`] → [`sync`] → [`packet`]/[`section`] →
//! [`psi`] → [`pes`] → [`sink`] → [`dispatcher`] -- matching the core's own decoding order:
//! a packet cannot be recognized as carrying a PMT until the PAT has been decoded, and cannot
//! be recognized as carrying elementary-stream data until its PMT has been decoded.
//!
//! [`dispatcher::Demuxer`] is the crate's single entry point; everything else is exposed for
//! testing and for callers who want to drive the pipeline by hand.

#![deny(missing_docs, unsafe_code, warnings)]

/// Sync byte every MPEG-TS packet must begin with.
pub const SYNC_BYTE: u8 = 0x47;

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod packet;
pub mod pes;
pub mod psi;
pub mod section;
pub mod sink;
mod slice_reader;
pub mod source;
pub mod sync;

pub use config::ParserConfig;
pub use dispatcher::Demuxer;
pub use error::{DemuxError, ParseError, ParseErrorKind, ParseResult};
pub use slice_reader::SliceReader;
