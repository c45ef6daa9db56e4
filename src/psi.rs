//! PSI/SI table decoders: PAT, PMT, SDT, and the descriptor loops they carry.
//!
//! The 3-byte PSI common header and the PAT/PMT per-entry layouts are modeled as
//! `modular_bitfield_msb` bitfields, in the idiom of the teacher crate's `psi.rs`
//! (`PsiHeader`, `PatEntry`, `PmtHeader`, `ElementaryStreamInfoHeader`). The teacher's
//! `PsiHeader::section_length` is only 10 bits wide (`B10`, with two more bits silently
//! `#[skip]`ped); the real field -- and the one `original_source/TsParser.cpp` actually
//! decodes (`((pkt[1] & 0x0f) << 8) | pkt[2]`) -- is 12 bits. That is corrected here (see
//! `DESIGN.md`). SDT decoding and the stream-type/descriptor interpretation tables have no
//! counterpart in the teacher at all and are grounded directly in
//! `original_source/TsParser.cpp` (`parseSdt`, `storeStreamInfo`,
//! `parsePrivatePesDescriptor`) and, for the service descriptor field layout,
//! `other_examples/..._en-300-468-reader__src-sdt.rs`.

use crate::error::{ParseError, ParseErrorKind, ParseResult};
use crate::slice_reader::SliceReader;
use log::warn;
use modular_bitfield_msb::prelude::*;
use smallvec::SmallVec;
use std::collections::HashMap;

const PAT_TABLE_ID: u8 = 0x00;
const PMT_TABLE_ID: u8 = 0x02;
const SDT_TABLE_IDS: [u8; 2] = [0x42, 0x46];

/// Common 3-byte PSI/SI section header.
#[bitfield]
#[derive(Debug, Copy, Clone)]
pub struct PsiHeader {
    pub table_id: B8,
    pub section_syntax_indicator: bool,
    pub private_bit: bool,
    pub reserved_bits: B2,
    pub section_length: B12,
}

/// One 4-byte PAT entry.
#[bitfield]
#[derive(Debug, Copy, Clone)]
pub struct PatEntry {
    pub program_num: B16,
    pub reserved: B3,
    pub program_map_pid: B13,
}

/// Fixed part of a PMT section following the common PSI header and table-syntax bytes.
#[bitfield]
#[derive(Debug, Copy, Clone)]
pub struct PmtHeader {
    pub reserved: B3,
    pub pcr_pid: B13,
    pub reserved2: B4,
    pub program_info_length: B12,
}

/// Fixed part of one PMT elementary-stream loop entry.
#[bitfield]
#[derive(Debug, Copy, Clone)]
pub struct ElementaryStreamInfoHeader {
    pub stream_type: B8,
    pub reserved: B3,
    pub elementary_pid: B13,
    pub reserved2: B4,
    pub es_info_length: B12,
}

/// A descriptor: one `(tag, length, data)` TLV triple from a descriptor loop.
#[derive(Debug)]
pub struct Descriptor<'a> {
    /// Descriptor tag byte.
    pub tag: u8,
    /// Descriptor payload, excluding the tag and length bytes.
    pub data: &'a [u8],
}

/// Iterates the TLV descriptor entries in a byte slice, stopping (without error) as soon as
/// a malformed or truncated entry is seen -- matching the defensive `break`s in
/// `original_source/TsParser.cpp`'s descriptor loops rather than surfacing a hard error.
pub struct DescriptorIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = Descriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.len() < 2 {
            return None;
        }
        let tag = self.remaining[0];
        let len = self.remaining[1] as usize;
        if 2 + len > self.remaining.len() {
            self.remaining = &[];
            return None;
        }
        let data = &self.remaining[2..2 + len];
        self.remaining = &self.remaining[2 + len..];
        Some(Descriptor { tag, data })
    }
}

/// Returns an iterator over the TLV descriptors packed into `buf`.
pub fn descriptors(buf: &[u8]) -> DescriptorIter<'_> {
    DescriptorIter { remaining: buf }
}

/// One elementary stream announced by a PMT (`spec.md` §3 `PmtStream`).
///
/// `es_info` is a [`SmallVec`] rather than a plain `Vec`: most descriptor loops are a handful
/// of bytes (a single registration or language descriptor), matching the teacher crate's own
/// choice of `SmallVec<[u8; 8]>` for descriptor payloads in its `psi.rs`.
#[derive(Debug, Clone)]
pub struct PmtStream {
    /// Raw `stream_type` byte from the PMT stream loop.
    pub stream_type: u8,
    /// 13-bit PID carrying this stream's PES packets.
    pub elementary_pid: u16,
    /// Raw descriptor-loop bytes for this stream.
    pub es_info: SmallVec<[u8; 8]>,
    /// Human-readable description, computed once at decode time per `spec.md` §4.5.
    pub description: String,
}

/// One decoded, frozen Program Map Table (`spec.md` §3 `Pmt`).
#[derive(Debug, Clone)]
pub struct Pmt {
    /// Program this PMT describes.
    pub program_number: u16,
    /// PID carrying this program's PCR.
    pub pcr_pid: u16,
    /// PMT `version_number` at decode time.
    pub version: u8,
    /// Elementary streams announced by this PMT, in section order.
    pub streams: Vec<PmtStream>,
    /// True once a PMT section for this program has been decoded; frozen thereafter.
    pub got_pmt: bool,
    /// True once a matching SDT service entry has been seen.
    pub got_service_info: bool,
}

/// Service name/provider pulled from an SDT service descriptor (`spec.md` §3 `ServiceInfo`).
///
/// Character-set interpretation is out of scope (`spec.md` §1): the raw descriptor bytes are
/// decoded losslessly as UTF-8 with replacement, not per the DVB character-table rules.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service identifier (equal to `program_number` for the program it describes).
    pub service_id: u16,
    /// Service name from the service descriptor.
    pub service_name: String,
    /// Service provider name from the service descriptor.
    pub provider_name: String,
}

/// Describes a stream per its `stream_type` (`spec.md` §4.5 table), optionally refined by a
/// PES-private descriptor override for `stream_type == 0x06`.
pub fn describe_stream(stream_type: u8, es_info: &[u8]) -> String {
    match stream_type {
        0x01 | 0x02 => "MPEG-2 Video".to_string(),
        0x03 | 0x04 => "MPEG-2 Audio".to_string(),
        0x05 => "Private Sections".to_string(),
        0x06 => describe_private_pes(es_info),
        0x0f => "AAC Audio".to_string(),
        0x10 => "MPEG-4 Video".to_string(),
        0x11 => "AAC LATM Audio".to_string(),
        0x1b => "H.264 Video".to_string(),
        0x1c => "MPEG4 Audio".to_string(),
        0x20 => "MVC Video".to_string(),
        0x21 => "JPEG Video".to_string(),
        0x24 => "H.265 Video".to_string(),
        0x33 => "VVC Video".to_string(),
        0x42 => "AVS Video".to_string(),
        0x81 => "AC3".to_string(),
        0x82 => "DTS".to_string(),
        0x83 => "E-AC-3".to_string(),
        0x84 => "DTS-HD".to_string(),
        0x87 => "TrueHD".to_string(),
        0x88 => "AC4".to_string(),
        0xd2 => "AVS2".to_string(),
        0xd4 => "AVS3".to_string(),
        0xea => "VC-1 Video".to_string(),
        other => format!("Unknown(type 0x{:x})", other),
    }
}

/// Interprets the PES-private descriptor loop for `stream_type == 0x06` (`spec.md` §4.5).
///
/// The last recognized tag wins, matching `original_source/TsParser.cpp`'s
/// `parsePrivatePesDescriptor`, which overwrites `desc_detail` on every recognized descriptor
/// rather than stopping at the first.
fn describe_private_pes(es_info: &[u8]) -> String {
    // A descriptor is at least 2 bytes (tag + length); anything shorter can never yield a
    // parseable entry, so it counts as an empty loop (`original_source/TsParser.cpp`'s
    // `parsePrivatePesDescriptor` guards its loop on `desc_pos + 2 <= es_info_length` and
    // never enters it for a 0- or 1-byte `es_info`).
    if es_info.len() < 2 {
        return "Private PES".to_string();
    }
    let mut detail: Option<String> = None;
    for d in descriptors(es_info) {
        match d.tag {
            0x6a => detail = Some("AC3 Audio".to_string()),
            0x73 => detail = Some("DTS Audio".to_string()),
            0x59 => detail = Some("Subtitles".to_string()),
            0x05 if d.data.len() >= 4 => {
                let format = String::from_utf8_lossy(&d.data[0..4]);
                detail = Some(format!("Registration: {}", format));
            }
            _ => {}
        }
    }
    detail.unwrap_or_else(|| "Unknown".to_string())
}

/// Decodes a PAT section (`spec.md` §4.4). Unlike PMT/SDT, the PAT is never handed to the
/// Section Reassembler: `spec.md` §4.2 assumes it fits in one packet.
///
/// On success, upserts every non-zero `program_number -> pmt_pid` pair into `pat` and returns
/// `true`. Returns `false` (without mutating `pat`) on any header-validity failure, leaving the
/// caller free to retry on the next PAT-carrying packet.
pub fn decode_pat(data: &[u8], pat: &mut HashMap<u16, u16>) -> bool {
    if data.len() < 12 {
        warn!("{}", ParseError::new(0, ParseErrorKind::ShortSection));
        return false;
    }
    if data[0] != PAT_TABLE_ID {
        warn!("{}", ParseError::new(0, ParseErrorKind::BadTableId(data[0])));
        return false;
    }
    let section_length = (((data[1] & 0x0f) as usize) << 8) | data[2] as usize;
    if section_length + 3 > data.len() {
        warn!("{}", ParseError::new(1, ParseErrorKind::ShortSection));
        return false;
    }
    let program_info_len = section_length.saturating_sub(9);
    let mut i = 0;
    while i + 4 <= program_info_len && 8 + i + 4 <= data.len() {
        let entry = PatEntry::from_bytes([data[8 + i], data[9 + i], data[10 + i], data[11 + i]]);
        if entry.program_num() != 0 {
            pat.insert(entry.program_num(), entry.program_map_pid());
        }
        i += 4;
    }
    true
}

/// Decodes a fully-reassembled PMT section (`spec.md` §4.5).
///
/// `existing_pmts` is the parser's current `pmts` list; the section's own `program_number`
/// isn't known until the fixed header is parsed, so the frozen-entry lookup happens here
/// rather than at the call site. When a `Pmt` for this `program_number` is already frozen
/// (`got_pmt == true`) the section is dropped, matching `spec.md`'s "once `got_pmt == true`,
/// the entry is frozen" invariant. Returns `None` on any header-validity failure or when the
/// section is dropped as a duplicate.
pub fn decode_pmt(data: &[u8], existing_pmts: &[Pmt]) -> Option<Pmt> {
    if data.len() < 13 {
        warn!("{}", ParseError::new(0, ParseErrorKind::ShortSection));
        return None;
    }
    if data[0] != PMT_TABLE_ID {
        warn!("{}", ParseError::new(0, ParseErrorKind::BadTableId(data[0])));
        return None;
    }
    let section_length = (((data[1] & 0x0f) as usize) << 8) | data[2] as usize;
    let program_number = u16::from_be_bytes([data[3], data[4]]);

    if existing_pmts
        .iter()
        .any(|p| p.program_number == program_number && p.got_pmt)
    {
        return None;
    }

    let version = (data[5] & 0x1e) >> 1;
    let header = PmtHeader::from_bytes([data[8], data[9], data[10], data[11]]);
    let program_info_length = header.program_info_length() as usize;

    let streams_start = 12 + program_info_length;
    let streams_end = section_length.saturating_add(3).saturating_sub(4);

    let mut streams = Vec::new();
    let mut pos = streams_start;
    while pos < streams_end {
        if pos + 5 > data.len() {
            break;
        }
        let es_header = ElementaryStreamInfoHeader::from_bytes([
            data[pos],
            data[pos + 1],
            data[pos + 2],
            data[pos + 3],
            data[pos + 4],
        ]);
        let stream_type = es_header.stream_type();
        let elementary_pid = es_header.elementary_pid();
        let es_info_length = es_header.es_info_length() as usize;
        pos += 5;
        if pos + es_info_length > data.len() {
            break;
        }
        let es_info = SmallVec::from_slice(&data[pos..pos + es_info_length]);
        let description = describe_stream(stream_type, &es_info);
        streams.push(PmtStream {
            stream_type,
            elementary_pid,
            es_info,
            description,
        });
        pos += es_info_length;
    }

    Some(Pmt {
        program_number,
        pcr_pid: header.pcr_pid(),
        version,
        streams,
        got_pmt: true,
        got_service_info: false,
    })
}

/// Decodes a fully-reassembled SDT section (`spec.md` §4.6), inserting newly-seen services
/// into `services` and marking `got_service_info` on any matching `Pmt` in `pmts`.
pub fn decode_sdt(data: &[u8], services: &mut HashMap<u16, ServiceInfo>, pmts: &mut [Pmt]) -> bool {
    if data.len() < 11 {
        warn!("{}", ParseError::new(0, ParseErrorKind::ShortSection));
        return false;
    }
    if !SDT_TABLE_IDS.contains(&data[0]) {
        warn!("{}", ParseError::new(0, ParseErrorKind::BadTableId(data[0])));
        return false;
    }
    let section_length = (((data[1] & 0x0f) as usize) << 8) | data[2] as usize;
    if section_length + 3 > data.len() {
        warn!("{}", ParseError::new(1, ParseErrorKind::ShortSection));
        return false;
    }
    let services_end = section_length.saturating_add(3).saturating_sub(4);

    let mut pos = 11;
    while pos < services_end {
        if pos + 5 > data.len() {
            break;
        }
        let service_id = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let descriptors_loop_length = (((data[pos + 3] & 0x0f) as usize) << 8) | data[pos + 4] as usize;
        let desc_start = pos + 5;
        let desc_end = desc_start + descriptors_loop_length;

        if services.contains_key(&service_id) {
            pos = desc_end;
            continue;
        }
        if desc_end > data.len() {
            break;
        }

        let (mut service_name, mut provider_name) = (String::new(), String::new());
        for d in descriptors(&data[desc_start..desc_end]) {
            if d.tag != 0x48 || d.data.is_empty() {
                continue;
            }
            let mut r = SliceReader::new(&d.data[1..]); // skip service_type byte
            if let Ok(res) = parse_service_descriptor(&mut r) {
                provider_name = res.0;
                service_name = res.1;
            }
        }

        services.insert(
            service_id,
            ServiceInfo {
                service_id,
                service_name,
                provider_name,
            },
        );
        for pmt in pmts.iter_mut() {
            if pmt.program_number == service_id {
                pmt.got_service_info = true;
                break;
            }
        }
        pos = desc_end;
    }
    true
}

fn parse_service_descriptor(r: &mut SliceReader) -> ParseResult<(String, String)> {
    let provider_len = r.read_u8()? as usize;
    let provider = r.read(provider_len)?;
    let name_len = r.read_u8()? as usize;
    let name = r.read(name_len)?;
    Ok((
        String::from_utf8_lossy(provider).into_owned(),
        String::from_utf8_lossy(name).into_owned(),
    ))
}
