//! Top-level dispatch loop (`spec.md` §3 "Global parser state", §4.2).
//!
//! [`Demuxer`] owns every piece of mutable state the rest of the crate's decoders need and
//! drives them from the [`crate::sync::PacketSynchronizer`]'s packet sequence, exactly the
//! single-writer, no-hidden-globals shape the teacher crate's own top-level parser
//! (`MpegTsParser` in `lib.rs`) uses -- generalized here from "parse one packet and hand the
//! caller a `Packet` to interpret" to "own the whole table-state machine and drive it to a
//! finished program/service/ES-output report", since this crate's decoders depend on each
//! other's accumulated state (PAT before PMT, PMT before PES) rather than being independently
//! interpretable per packet.

use crate::config::ParserConfig;
use crate::packet::{has_sync_byte, read_adaptation_field, read_packet_header, NULL_PID, PACKET_LEN};
use crate::pes::decode_pes_header;
use crate::psi::{decode_pat, decode_pmt, decode_sdt, Pmt, ServiceInfo};
use crate::section::SectionReassembler;
use crate::sink::{EsSink, ReporterSink};
use crate::slice_reader::SliceReader;
use crate::source::ByteSource;
use crate::sync::PacketSynchronizer;
use std::collections::HashMap;

const PAT_PID: u16 = 0x0000;
const SDT_PID: u16 = 0x0011;

/// Owns the parser's global state (`spec.md` §3) and the two sink trait objects packets are
/// ultimately routed to.
pub struct Demuxer<E, R> {
    config: ParserConfig,
    es_sink: E,
    reporter: R,
    pat: HashMap<u16, u16>,
    pat_done: bool,
    pmts: Vec<Pmt>,
    services: HashMap<u16, ServiceInfo>,
    stream_desc: HashMap<u16, String>,
    last_pcr: u64,
    packet_index: u64,
    pmt_section_bufs: SectionReassembler,
    sdt_section_bufs: SectionReassembler,
}

impl<E: EsSink, R: ReporterSink> Demuxer<E, R> {
    /// Builds a fresh demuxer over empty table state.
    pub fn new(config: ParserConfig, es_sink: E, reporter: R) -> Self {
        Self {
            config,
            es_sink,
            reporter,
            pat: HashMap::new(),
            pat_done: false,
            pmts: Vec::new(),
            services: HashMap::new(),
            stream_desc: HashMap::new(),
            last_pcr: 0,
            packet_index: 0,
            pmt_section_bufs: SectionReassembler::new(),
            sdt_section_bufs: SectionReassembler::new(),
        }
    }

    /// `program_number -> pmt_pid`, as decoded from the PAT.
    pub fn pat(&self) -> &HashMap<u16, u16> {
        &self.pat
    }

    /// Frozen PMTs decoded so far, in decode order.
    pub fn pmts(&self) -> &[Pmt] {
        &self.pmts
    }

    /// Services decoded from the SDT, keyed by `service_id`.
    pub fn services(&self) -> &HashMap<u16, ServiceInfo> {
        &self.services
    }

    /// `elementary_pid -> stream description`, populated as PMTs are decoded.
    pub fn stream_desc(&self) -> &HashMap<u16, String> {
        &self.stream_desc
    }

    /// Combined 27 MHz Program Clock Reference last observed.
    pub fn last_pcr(&self) -> u64 {
        self.last_pcr
    }

    /// Count of packets accepted past the sync-byte check.
    pub fn packet_index(&self) -> u64 {
        self.packet_index
    }

    /// Drains `source` through the [`PacketSynchronizer`], routing every packet through
    /// [`Self::process_packet`] and applying the show-stream-info early-termination gate
    /// (`spec.md` §4.2) after each one.
    pub fn parse<S: ByteSource>(&mut self, source: S) {
        let synchronizer = PacketSynchronizer::new(source);
        for packet in synchronizer {
            self.process_packet(&packet);
            if self.config.show_stream_info && self.all_programs_complete() {
                break;
            }
        }
    }

    /// True once every program named in `pat` has a frozen Pmt with both `got_pmt` and
    /// `got_service_info` set (`spec.md` §4.2 "Early termination").
    pub fn all_programs_complete(&self) -> bool {
        !self.pat.is_empty()
            && self.pat.keys().all(|program_number| {
                self.pmts
                    .iter()
                    .any(|p| p.program_number == *program_number && p.got_pmt && p.got_service_info)
            })
    }

    /// Implements `spec.md` §4.2's per-packet routing, step by step.
    pub fn process_packet(&mut self, pkt: &[u8; PACKET_LEN]) {
        if !has_sync_byte(pkt) {
            return;
        }
        self.packet_index += 1;

        let mut reader = SliceReader::new(pkt);
        let header = match read_packet_header(&mut reader) {
            Ok(h) => h,
            Err(_) => return,
        };
        let pid = header.pid();
        if pid == NULL_PID {
            return;
        }

        if header.has_adaptation_field() {
            match read_adaptation_field(&mut reader) {
                Ok(af) => {
                    if let Some(pcr) = af.pcr {
                        self.last_pcr = pcr.combined();
                    }
                }
                Err(_) => return,
            }
        }

        if !header.has_payload() {
            return;
        }
        let payload = match reader.read_to_end() {
            Ok(p) => p,
            Err(_) => return,
        };

        let pusi = header.pusi();
        let cc = header.continuity_counter();

        if pid == PAT_PID {
            self.handle_pat(payload, pusi);
        } else if pid == SDT_PID {
            self.handle_sdt(payload, pusi, cc);
        } else if self.pat.values().any(|&pmt_pid| pmt_pid == pid) {
            self.handle_pmt(pid, payload, pusi, cc);
        } else if self.is_elementary_pid(pid) && self.config.decodes_elementary_streams() {
            self.handle_pes(pid, payload, pusi);
        }
    }

    fn is_elementary_pid(&self, pid: u16) -> bool {
        self.pmts
            .iter()
            .flat_map(|p| p.streams.iter())
            .any(|s| s.elementary_pid == pid)
    }

    fn handle_pat(&mut self, payload: &[u8], pusi: bool) {
        if self.pat_done {
            return;
        }
        // `spec.md` §4.2: only the single pointer-field byte is skipped here, unlike the
        // Section Reassembler's `1 + pointer_field` skip for PMT/SDT -- the PAT is assumed to
        // fit in one packet, so there is no multi-packet pointer-field offset to honor.
        let section = if pusi {
            match payload.split_first() {
                Some((_, rest)) => rest,
                None => return,
            }
        } else {
            payload
        };
        if decode_pat(section, &mut self.pat) {
            self.pat_done = true;
        }
    }

    fn handle_pmt(&mut self, pid: u16, payload: &[u8], pusi: bool, cc: u8) {
        if let Some(section) = self.pmt_section_bufs.accept(pid, payload, cc, pusi) {
            if let Some(pmt) = decode_pmt(&section, &self.pmts) {
                for stream in &pmt.streams {
                    self.stream_desc
                        .insert(stream.elementary_pid, stream.description.clone());
                }
                self.pmts.push(pmt);
            }
        }
    }

    fn handle_sdt(&mut self, payload: &[u8], pusi: bool, cc: u8) {
        if let Some(section) = self.sdt_section_bufs.accept(SDT_PID, payload, cc, pusi) {
            decode_sdt(&section, &mut self.services, &mut self.pmts);
        }
    }

    fn handle_pes(&mut self, pid: u16, payload: &[u8], pusi: bool) {
        if !pusi {
            self.es_sink.write(pid, payload);
            return;
        }
        let info = match decode_pes_header(payload) {
            Ok(info) => info,
            Err(_) => return,
        };
        if !info.pts_excluded() && self.config.pts_print.matches(pid) {
            match info.extract_pts_dts(payload) {
                (Some(pts), Some(dts)) => self.reporter.pts_dts(pid, pts, dts),
                (Some(pts), None) => self.reporter.pts(pid, pts),
                _ => {}
            }
        }
        let es = info.es_payload(payload);
        if !es.is_empty() {
            self.es_sink.write(pid, es);
        }
    }

    /// Enumerates `pmts`, in decode order, to the reporter (`spec.md` §4.9). The CLI only
    /// calls this when `show_stream_info` was requested.
    pub fn report(&mut self) {
        for pmt in &self.pmts {
            let service = self.services.get(&pmt.program_number);
            let streams: Vec<(u16, String)> = pmt
                .streams
                .iter()
                .map(|s| (s.elementary_pid, s.description.clone()))
                .collect();
            self.reporter.program(pmt.program_number, service, &streams);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PtsPrintMode;
    use crate::sink::{MemoryEsSink, MemoryReporter};

    fn demuxer(config: ParserConfig) -> Demuxer<MemoryEsSink, MemoryReporter> {
        Demuxer::new(config, MemoryEsSink::default(), MemoryReporter::default())
    }

    fn ts_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> [u8; PACKET_LEN] {
        let mut pkt = [0xffu8; PACKET_LEN];
        pkt[0] = 0x47;
        pkt[1] = ((pusi as u8) << 6) | ((pid >> 8) as u8 & 0x1f);
        pkt[2] = pid as u8;
        pkt[3] = 0x10 | cc; // afc = payload only
        let n = payload.len().min(PACKET_LEN - 4);
        pkt[4..4 + n].copy_from_slice(&payload[..n]);
        pkt
    }

    fn ts_packet_with_adaptation(
        pid: u16,
        cc: u8,
        adaptation: &[u8],
        payload: &[u8],
    ) -> [u8; PACKET_LEN] {
        ts_packet_with_adaptation_pusi(pid, false, cc, adaptation, payload)
    }

    fn ts_packet_with_adaptation_pusi(
        pid: u16,
        pusi: bool,
        cc: u8,
        adaptation: &[u8],
        payload: &[u8],
    ) -> [u8; PACKET_LEN] {
        let mut pkt = [0xffu8; PACKET_LEN];
        pkt[0] = 0x47;
        pkt[1] = ((pusi as u8) << 6) | ((pid >> 8) as u8 & 0x1f);
        pkt[2] = pid as u8;
        pkt[3] = 0x30 | cc; // afc = adaptation + payload
        let mut pos = 4;
        pkt[pos..pos + adaptation.len()].copy_from_slice(adaptation);
        pos += adaptation.len();
        let n = payload.len().min(PACKET_LEN - pos);
        pkt[pos..pos + n].copy_from_slice(&payload[..n]);
        pkt
    }

    fn pat_section(entries: &[(u16, u16)]) -> Vec<u8> {
        let program_info_len = entries.len() * 4;
        let section_length = 9 + program_info_len;
        let mut out = vec![
            0x00u8,
            0xb0 | ((section_length >> 8) as u8 & 0x0f),
            section_length as u8,
            0x00,
            0x01,
            0xc1,
            0x00,
            0x00,
        ];
        for (num, pid) in entries {
            out.push((num >> 8) as u8);
            out.push(*num as u8);
            out.push(0xe0 | ((pid >> 8) as u8 & 0x1f));
            out.push(*pid as u8);
        }
        out.extend_from_slice(&[0; 4]);
        out
    }

    fn pmt_section(program_number: u16, streams: &[(u8, u16, &[u8])]) -> Vec<u8> {
        let stream_bytes: usize = streams.iter().map(|(_, _, es)| 5 + es.len()).sum();
        let section_length = 9 + stream_bytes;
        let mut out = vec![
            0x02u8,
            0xb0 | ((section_length >> 8) as u8 & 0x0f),
            section_length as u8,
            (program_number >> 8) as u8,
            program_number as u8,
            0xc1,
            0x00,
            0x00,
            0xe0,
            0x00,
            0xf0,
            0x00,
        ];
        for (stream_type, pid, es_info) in streams {
            out.push(*stream_type);
            out.push(0xe0 | ((pid >> 8) as u8 & 0x1f));
            out.push(*pid as u8);
            out.push(0xf0 | ((es_info.len() >> 8) as u8 & 0x0f));
            out.push(es_info.len() as u8);
            out.extend_from_slice(es_info);
        }
        out.extend_from_slice(&[0; 4]);
        out
    }

    fn sdt_section(service_id: u16, provider: &str, name: &str) -> Vec<u8> {
        let mut service_desc_payload = vec![0x00u8];
        service_desc_payload.push(provider.len() as u8);
        service_desc_payload.extend_from_slice(provider.as_bytes());
        service_desc_payload.push(name.len() as u8);
        service_desc_payload.extend_from_slice(name.as_bytes());

        let mut descriptor = vec![0x48u8, service_desc_payload.len() as u8];
        descriptor.extend_from_slice(&service_desc_payload);

        let descriptors_loop_length = descriptor.len();
        let section_length = 9 + descriptors_loop_length;
        let mut out = vec![
            0x42u8,
            0xb0 | ((section_length >> 8) as u8 & 0x0f),
            section_length as u8,
            0x00,
            0x01,
            0xc1,
            0x00,
            0x00,
            0x00,
            0x00,
            (service_id >> 8) as u8,
        ];
        out.push(service_id as u8);
        out.push(0x00);
        out.push(0xf0 | ((descriptors_loop_length >> 8) as u8 & 0x0f));
        out.push(descriptors_loop_length as u8);
        out.extend_from_slice(&descriptor);
        out.extend_from_slice(&[0; 4]);
        out
    }

    fn pat_payload(entries: &[(u16, u16)]) -> Vec<u8> {
        let mut payload = vec![0x00u8]; // pointer_field
        payload.extend(pat_section(entries));
        payload
    }

    #[test]
    fn minimal_pat_only_stream() {
        let mut d = demuxer(ParserConfig::default());
        let pkt = ts_packet(0x0000, true, 0, &pat_payload(&[(1, 0x100)]));
        d.process_packet(&pkt);
        assert_eq!(d.pat().get(&1), Some(&0x100));
        assert!(d.pmts().is_empty());
    }

    #[test]
    fn pat_and_pmt_reports_h264_stream() {
        let mut d = demuxer(ParserConfig::show_stream_info_only());
        let pat_pkt = ts_packet(0x0000, true, 0, &pat_payload(&[(1, 0x100)]));
        d.process_packet(&pat_pkt);

        let mut pmt_payload = vec![0x00u8];
        pmt_payload.extend(pmt_section(1, &[(0x1b, 0x200, &[])]));
        let pmt_pkt = ts_packet(0x100, true, 0, &pmt_payload);
        d.process_packet(&pmt_pkt);

        assert_eq!(d.pmts().len(), 1);
        assert!(d.pmts()[0].got_pmt);
        d.report();
        assert_eq!(d.reporter.programs.len(), 1);
        assert_eq!(d.reporter.programs[0].2, vec![(0x200, "H.264 Video".to_string())]);
    }

    #[test]
    fn pat_behind_zero_length_adaptation_field_still_decodes() {
        // afc = 0b11 (adaptation field + payload), adaptation_field_length == 0: the
        // adaptation field is exactly one byte and must not swallow the pointer_field that
        // immediately follows it.
        let mut d = demuxer(ParserConfig::default());
        let pkt = ts_packet_with_adaptation_pusi(0x0000, true, 0, &[0x00], &pat_payload(&[(1, 0x100)]));
        d.process_packet(&pkt);
        assert_eq!(d.pat().get(&1), Some(&0x100));
    }

    #[test]
    fn null_pid_is_ignored() {
        let mut d = demuxer(ParserConfig::default());
        let before = d.last_pcr();
        let pkt = ts_packet(NULL_PID, false, 0, &[0xaa; 10]);
        d.process_packet(&pkt);
        assert_eq!(d.last_pcr(), before);
        assert!(d.pat().is_empty());
    }

    #[test]
    fn pcr_extraction_updates_last_pcr() {
        let mut d = demuxer(ParserConfig::default());
        let base: u64 = 90000;
        let b0 = (base >> 25) as u8;
        let b1 = (base >> 17) as u8;
        let b2 = (base >> 9) as u8;
        let b3 = (base >> 1) as u8;
        let b4 = ((base & 1) << 7) as u8;
        let b5 = 0u8;
        let adaptation = [0x07, 0x10, b0, b1, b2, b3, b4, b5];
        let pkt = ts_packet_with_adaptation(0x100, 0, &adaptation, &[]);
        d.process_packet(&pkt);
        assert_eq!(d.last_pcr(), 90000 * 300);
    }

    #[test]
    fn pts_only_pes_emits_report_line() {
        let mut config = ParserConfig::default();
        config.pts_print = PtsPrintMode::Specific(0x100);
        let mut d = demuxer(config);

        let mut payload = vec![0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x80, 0x80, 0x05];
        payload.extend_from_slice(&[0x21, 0x00, 0x01, 0x00, 0x01]); // PTS == 0
        payload.extend_from_slice(&[0xaa, 0xbb]); // ES payload

        // Register the elementary PID by hand-inserting a minimal Pmt, since no PMT packet is
        // exercised in this scenario.
        d.pmts.push(Pmt {
            program_number: 1,
            pcr_pid: 0,
            version: 0,
            streams: vec![crate::psi::PmtStream {
                stream_type: 0x1b,
                elementary_pid: 0x100,
                es_info: Default::default(),
                description: "H.264 Video".to_string(),
            }],
            got_pmt: true,
            got_service_info: false,
        });

        let pkt = ts_packet(0x100, true, 0, &payload);
        d.process_packet(&pkt);

        assert_eq!(d.reporter.pts_lines, vec![(0x100, 0)]);
        assert_eq!(d.es_sink.data[&0x100], vec![0xaa, 0xbb]);
    }

    #[test]
    fn sdt_marks_service_info() {
        let mut d = demuxer(ParserConfig::default());
        d.pmts.push(Pmt {
            program_number: 1,
            pcr_pid: 0,
            version: 0,
            streams: vec![],
            got_pmt: true,
            got_service_info: false,
        });
        let mut data = vec![0x00u8]; // pointer_field
        data.extend(sdt_section(1, "P", "N"));
        let pkt = ts_packet(0x0011, true, 0, &data);
        d.process_packet(&pkt);
        let info = d.services().get(&1).unwrap();
        assert_eq!(info.provider_name, "P");
        assert!(d.pmts()[0].got_service_info);
    }
}
