//! In-process configuration contract (`spec.md` §6).
//!
//! This is the "external argument parser" boundary `spec.md` §1 scopes the CLI out of: the
//! library never reads `std::env::args()` itself. The `tsdemux` binary's hand-rolled option
//! loop (the teacher's own `examples/dump.rs` parses `std::env::args()` the same direct way
//! rather than pulling in a CLI-parsing crate) builds one of these and hands it to
//! [`crate::dispatcher::Demuxer::new`].

use std::collections::HashSet;

/// PID used throughout `spec.md` to mean "all PIDs" when a PID-selecting option is omitted or
/// explicitly given as `0x1fff` (the null-packet PID, which can never be a real elementary
/// PID).
pub const ALL_PIDS: u16 = 0x1fff;

/// Elementary-stream extraction mode (`spec.md` §4.8 "two modes").
#[derive(Debug, Clone, Default)]
pub enum EsOutputMode {
    /// No ES extraction requested.
    #[default]
    None,
    /// Extract only the listed PIDs; their writers are opened eagerly.
    Selective(HashSet<u16>),
    /// Extract every PID with elementary data; writers are opened lazily on first use.
    DumpAll,
}

/// PTS/DTS printing mode (`spec.md` §4.7/§6 "print PTS (optional value)").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PtsPrintMode {
    /// PTS printing disabled.
    #[default]
    None,
    /// Print only for one PID.
    Specific(u16),
    /// Print for every PID.
    All,
}

impl PtsPrintMode {
    /// Whether a PTS/DTS line should be emitted for `pid` under this mode.
    pub fn matches(&self, pid: u16) -> bool {
        match self {
            PtsPrintMode::None => false,
            PtsPrintMode::Specific(p) => *p == pid,
            PtsPrintMode::All => true,
        }
    }
}

/// The full configuration contract `spec.md` §6 describes.
#[derive(Debug, Clone, Default)]
pub struct ParserConfig {
    /// Enables reporter emission and the early-termination gating of `spec.md` §4.2.
    pub show_stream_info: bool,
    /// Which PIDs (if any) get elementary-stream extraction.
    pub es_output: EsOutputMode,
    /// Which PIDs (if any) get PTS/DTS lines printed.
    pub pts_print: PtsPrintMode,
}

impl ParserConfig {
    /// Convenience constructor for the CLI's bare-input-file shorthand
    /// (`spec.md` §6: "equivalent to input file + show stream info").
    pub fn show_stream_info_only() -> Self {
        Self {
            show_stream_info: true,
            ..Self::default()
        }
    }

    /// Whether the dispatcher needs to route elementary-stream packets through the PES
    /// Decoder at all (`spec.md` §4.2 step 6's "show-stream-info-only mode" gate). When
    /// neither ES extraction nor PTS printing was requested, PES packets are skipped
    /// entirely rather than decoded and discarded.
    pub fn decodes_elementary_streams(&self) -> bool {
        !matches!(self.es_output, EsOutputMode::None) || self.pts_print != PtsPrintMode::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_input_file_shorthand_enables_show_stream_info_only() {
        let cfg = ParserConfig::show_stream_info_only();
        assert!(cfg.show_stream_info);
        assert!(!cfg.decodes_elementary_streams());
    }

    #[test]
    fn requesting_es_output_enables_decode() {
        let mut cfg = ParserConfig::default();
        cfg.es_output = EsOutputMode::DumpAll;
        assert!(cfg.decodes_elementary_streams());
    }

    #[test]
    fn pts_mode_matches_specific_pid_only() {
        let mode = PtsPrintMode::Specific(0x100);
        assert!(mode.matches(0x100));
        assert!(!mode.matches(0x101));
        assert!(PtsPrintMode::All.matches(0x101));
        assert!(!PtsPrintMode::None.matches(0x101));
    }
}
