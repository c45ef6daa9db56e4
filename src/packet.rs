//! 188-byte TS packet header, adaptation field, and PCR/OPCR extraction.
//!
//! Grounded on the teacher crate's `PacketHeader`/`AdaptationFieldHeader` bitfields and
//! `parse_pcr`/`read_adaptation_field` (`lib.rs`), generalized to the byte-exact layout and
//! PCR-only (no OPCR tracking state) requirements of `spec.md` §3/§4.2.

use crate::error::ParseResult;
use crate::slice_reader::SliceReader;
use crate::{read_bitfield, SYNC_BYTE};
use log::warn;
use modular_bitfield_msb::prelude::*;

/// Length in bytes of every MPEG-TS packet this crate understands. 192-byte (M2TS) and
/// 204-byte (FEC) variants are out of scope (`spec.md` §6).
pub const PACKET_LEN: usize = 188;

/// The null-packet PID; packets on this PID carry no meaningful payload and are dropped.
pub const NULL_PID: u16 = 0x1fff;

/// TSC information used in a packet's header.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum TransportScramblingControl {
    /// Not scrambled.
    NotScrambled,
    /// Reserved value; not used in practice.
    Reserved,
    /// Scrambled with an even key.
    ScrambledEvenKey,
    /// Scrambled with an odd key.
    ScrambledOddKey,
}

/// Link-layer header found at the start of every 188-byte MPEG-TS packet (`spec.md` §3
/// `TsPacket`).
#[bitfield]
#[derive(Debug, Copy, Clone)]
pub struct PacketHeader {
    /// Must equal [`crate::SYNC_BYTE`] (`0x47`) for a packet to be considered in sync.
    pub sync_byte: B8,
    /// Transport error indicator.
    pub tei: bool,
    /// Payload unit start indicator.
    pub pusi: bool,
    /// Transport priority.
    pub priority: bool,
    /// 13-bit packet identifier.
    pub pid: B13,
    /// Transport scrambling control.
    pub tsc: TransportScramblingControl,
    /// Adaptation field control, high bit: adaptation field present.
    pub has_adaptation_field: bool,
    /// Adaptation field control, low bit: payload present.
    pub has_payload: bool,
    /// Continuity counter, 4 bits.
    pub continuity_counter: B4,
}

/// Flags byte of a packet's adaptation field, following its length byte.
///
/// Split out from the length byte (unlike the teacher's single 2-byte
/// `AdaptationFieldHeader`) because the length byte alone decides whether a flags byte is
/// even present: `adaptation_field_length == 0` means there is no flags byte to read.
#[bitfield]
#[derive(Debug, Copy, Clone)]
pub struct AdaptationFieldFlags {
    pub discontinuity: bool,
    pub random_access: bool,
    pub priority: bool,
    pub has_pcr: bool,
    pub has_opcr: bool,
    pub has_splice_countdown: bool,
    pub has_transport_private_data: bool,
    pub has_adaptation_field_extension: bool,
}

/// Program Clock Reference: a 27 MHz reference clock carried in the adaptation field.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PcrTimestamp {
    /// 33 bits of a 90 kHz base clock.
    pub base: u64,
    /// 9 bits of a 27 MHz clock rolling over every 300 counts to the base.
    pub extension: u16,
}

impl PcrTimestamp {
    /// Combines base and extension into the single 27 MHz counter value used by `spec.md`
    /// §4.2 and §8 (`last_pcr = pcr_base * 300 + pcr_extension`).
    pub fn combined(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }
}

fn parse_pcr(b: &[u8; 6]) -> PcrTimestamp {
    let mut base: u64 = (b[0] as u64) << 25;
    base |= (b[1] as u64) << 17;
    base |= (b[2] as u64) << 9;
    base |= (b[3] as u64) << 1;
    base |= (b[4] as u64) >> 7;

    let mut extension: u16 = ((b[4] & 0x1) as u16) << 8;
    extension |= b[5] as u16;
    PcrTimestamp { base, extension }
}

/// Result of decoding a packet's adaptation field: only the PCR is surfaced since it is the
/// only field `spec.md` §4.2 requires the dispatcher to track.
#[derive(Debug, Default, Copy, Clone)]
pub struct AdaptationField {
    /// Total length in bytes of the adaptation field, including its own length byte.
    pub total_len: usize,
    /// Program Clock Reference, if present and long enough to read.
    pub pcr: Option<PcrTimestamp>,
}

/// Decodes the adaptation field starting at the current reader position.
///
/// Mirrors the teacher's `read_adaptation_field`, simplified to surface only the PCR (OPCR,
/// splicing and private-data fields are not used by `spec.md` and are skipped over).
///
/// The length byte is read on its own first: `adaptation_field_length == 0` means the
/// adaptation field is just that one byte, with no flags byte following it (`spec.md` §4.2
/// step 5, `original_source/TsParser.cpp`'s `parseAdaptationField` returning 0 for an `offset
/// += 1`). Reading the flags byte unconditionally would swallow the first byte of whatever
/// follows -- the pointer field of a PAT, or the start of a PES header -- whenever the
/// adaptation field is empty.
pub fn read_adaptation_field(reader: &mut SliceReader) -> ParseResult<AdaptationField> {
    let adaptation_field_length = reader.read_u8()? as usize;
    let mut out = AdaptationField {
        total_len: 1 + adaptation_field_length,
        pcr: None,
    };
    if adaptation_field_length == 0 {
        return Ok(out);
    }
    let mut body = reader.new_sub_reader(adaptation_field_length)?;
    let flags = read_bitfield!(body, AdaptationFieldFlags);
    if flags.has_pcr() {
        if body.remaining_len() >= 6 {
            out.pcr = Some(parse_pcr(body.read_array_ref::<6>()?));
        } else {
            warn!("short read of PCR in adaptation field");
        }
    }
    // OPCR, splice countdown, transport private data and the adaptation extension are not
    // consumed by any operation `spec.md` describes; `body` is simply dropped here.
    Ok(out)
}

/// Decodes the 4-byte packet header. Sync-byte validity is checked separately by the caller
/// (the [`crate::dispatcher::Demuxer`] drops any packet that fails it, per `spec.md` §4.2
/// step 1) so this only needs to surface a bounds error.
pub fn read_packet_header(reader: &mut SliceReader) -> ParseResult<PacketHeader> {
    let header = read_bitfield!(reader, PacketHeader);
    Ok(header)
}

/// True if `pkt[0] == 0x47`.
pub fn has_sync_byte(pkt: &[u8]) -> bool {
    !pkt.is_empty() && pkt[0] == SYNC_BYTE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_decodes_pid_and_flags() {
        // sync=0x47, tei=0,pusi=1,prio=0,pid=0x0100; tsc=00,afc=01 (payload only), cc=5
        let bytes = [0x47, 0x41, 0x00, 0x15];
        let mut r = SliceReader::new(&bytes);
        let header = read_packet_header(&mut r).unwrap();
        assert_eq!(header.sync_byte(), 0x47);
        assert!(header.pusi());
        assert_eq!(header.pid(), 0x100);
        assert!(!header.has_adaptation_field());
        assert!(header.has_payload());
        assert_eq!(header.continuity_counter(), 5);
    }

    #[test]
    fn adaptation_field_extracts_pcr() {
        // length=7, flags byte: PCR_flag set (bit4=1) -> 0b0001_0000 = 0x10
        // pcr_base=90000 (0x015F90), extension=0
        // base bits across 33 bits: base<<... see parse_pcr layout
        let base: u64 = 90000;
        let b0 = (base >> 25) as u8;
        let b1 = (base >> 17) as u8;
        let b2 = (base >> 9) as u8;
        let b3 = (base >> 1) as u8;
        let b4 = ((base & 1) << 7) as u8;
        let b5 = 0u8;
        let bytes = [0x07, 0x10, b0, b1, b2, b3, b4, b5];
        let mut r = SliceReader::new(&bytes);
        let af = read_adaptation_field(&mut r).unwrap();
        assert_eq!(af.total_len, 8);
        let pcr = af.pcr.expect("pcr present");
        assert_eq!(pcr.combined(), 90000 * 300);
    }

    #[test]
    fn zero_length_adaptation_field_has_no_pcr() {
        let bytes = [0x00];
        let mut r = SliceReader::new(&bytes);
        let af = read_adaptation_field(&mut r).unwrap();
        assert_eq!(af.total_len, 1);
        assert!(af.pcr.is_none());
    }

    #[test]
    fn zero_length_adaptation_field_does_not_consume_following_byte() {
        // adaptation_field_length == 0 must advance by exactly 1 byte; a trailing byte
        // belonging to the packet's payload (e.g. a PAT's pointer_field) must be left for
        // the caller to read next, not swallowed as a phantom flags byte.
        let bytes = [0x00, 0xaa];
        let mut r = SliceReader::new(&bytes);
        let af = read_adaptation_field(&mut r).unwrap();
        assert_eq!(af.total_len, 1);
        assert!(af.pcr.is_none());
        assert_eq!(r.read_to_end().unwrap(), &[0xaa]);
    }
}
