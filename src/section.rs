//! Per-PID PSI/SI section reassembly (`spec.md` §4.3).
//!
//! Grounded on `original_source/TsParser.cpp`'s `processSectionData` (pointer-field skip,
//! continuity-counter gating, `expected_length` derivation from the section's own length
//! field) and structured in the teacher's per-PID pending-state idiom
//! (`payload_unit.rs`'s `pending_payload_units: HashMap<u16, PayloadUnitBuilder<D>>`).
//!
//! Unlike the teacher's `PayloadUnitBuilder`, which tracks a byte countdown known up front
//! from the PES/PSI header of the *first* packet, this reassembler has no such guarantee at
//! construction time: PMT/SDT section length is only known once 3 bytes have accumulated, and
//! continuity-counter discontinuities must drop the in-progress section rather than erroring.

use std::collections::HashMap;

/// State for one PID's in-progress section, mirroring `spec.md` §3 `SectionBuffer` field for
/// field.
#[derive(Debug, Default, Clone)]
struct SectionBuffer {
    data: Vec<u8>,
    expected_length: usize,
    last_cc: Option<u8>,
    collecting: bool,
}

/// Reassembles PSI/SI sections (PMT, SDT) that may span multiple TS packets.
///
/// One instance covers one table kind; the dispatcher keeps a separate reassembler for PMT
/// PIDs and for the SDT PID, matching the two distinct maps (`pmt_section_bufs`,
/// `sdt_section_bufs`) in `spec.md` §3's global parser state.
#[derive(Debug, Default)]
pub struct SectionReassembler {
    buffers: HashMap<u16, SectionBuffer>,
}

impl SectionReassembler {
    /// Creates an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one packet's post-adaptation-field payload for `pid` into the reassembler.
    ///
    /// Returns the fully reassembled section bytes (exactly `expected_length` long, pointer
    /// field and the `1 + pointer_field` lead-in already stripped) the moment enough data has
    /// accumulated. The caller hands that slice to the appropriate Table Decoder and then
    /// continues; this function has already reset the PID's buffer before returning `Some`.
    pub fn accept(&mut self, pid: u16, payload: &[u8], cc: u8, pusi: bool) -> Option<Vec<u8>> {
        let buf = self.buffers.entry(pid).or_default();

        if pusi {
            buf.data.clear();
            buf.collecting = true;
            buf.last_cc = Some(cc);
            buf.expected_length = 0;

            if payload.is_empty() {
                return None;
            }
            let pointer_field = payload[0] as usize;
            let start = 1 + pointer_field;
            if start < payload.len() {
                buf.data.extend_from_slice(&payload[start..]);
            }
            if buf.data.len() >= 3 {
                let section_length = (((buf.data[1] & 0x0f) as usize) << 8) | buf.data[2] as usize;
                buf.expected_length = section_length + 3;
            }
        } else if buf.collecting {
            let expected_cc = buf.last_cc.map(|c| (c + 1) % 16);
            if expected_cc != Some(cc) {
                buf.data.clear();
                buf.collecting = false;
                return None;
            }
            buf.last_cc = Some(cc);
            buf.data.extend_from_slice(payload);
        } else {
            return None;
        }

        if buf.collecting && buf.expected_length > 0 && buf.data.len() >= buf.expected_length {
            let mut section = std::mem::take(&mut buf.data);
            section.truncate(buf.expected_length);
            buf.expected_length = 0;
            buf.collecting = false;
            Some(section)
        } else {
            None
        }
    }
}
