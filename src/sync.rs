//! TS byte-stream synchronizer (`spec.md` §4.1).
//!
//! Grounded directly in `original_source/TsParser.cpp`'s `readNextTsPacket`: scan for `0x47`,
//! read the next 187 bytes, probe one more byte for the next sync, and either commit to
//! `synced` or back up and resume scanning. There is no true "rewind" on a forward-only
//! [`ByteSource`], so the "back up 187 bytes" step is modeled as pushing the probed bytes onto
//! a small internal lookahead queue that every subsequent byte read drains first.

use crate::packet::PACKET_LEN;
use crate::source::ByteSource;
use crate::SYNC_BYTE;
use std::collections::VecDeque;

/// Produces the lazy, finite sequence of 188-byte TS packets described by `spec.md` §4.1.
///
/// Exhausting the underlying source -- whether by clean EOF or by a read error -- ends the
/// sequence; `spec.md` §7 treats the two identically ("IoReadError / EOF ... terminates the
/// packet sequence cleanly"), so [`PacketSynchronizer`] does not distinguish them in its
/// `Iterator` item type.
pub struct PacketSynchronizer<S> {
    source: S,
    lookahead: VecDeque<u8>,
    synced: bool,
}

impl<S: ByteSource> PacketSynchronizer<S> {
    /// Wraps `source`, starting unsynced.
    pub fn new(source: S) -> Self {
        Self {
            source,
            lookahead: VecDeque::new(),
            synced: false,
        }
    }

    fn take_byte(&mut self) -> Option<u8> {
        if let Some(b) = self.lookahead.pop_front() {
            return Some(b);
        }
        let mut b = [0u8; 1];
        match self.source.read_fully(&mut b) {
            Ok(1) => Some(b[0]),
            _ => None,
        }
    }

    /// Drains `n` bytes, preferring the lookahead queue before touching the source.
    fn take_n(&mut self, n: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.lookahead.pop_front() {
                Some(b) => out.push(b),
                None => break,
            }
        }
        if out.len() < n {
            let remaining = n - out.len();
            let mut buf = vec![0u8; remaining];
            match self.source.read_fully(&mut buf) {
                Ok(r) if r == remaining => out.extend_from_slice(&buf),
                _ => return None,
            }
        }
        Some(out)
    }

    fn next_synced(&mut self) -> Option<[u8; PACKET_LEN]> {
        let mut pkt = [0u8; PACKET_LEN];
        pkt[0] = self.take_byte()?;
        let rest = self.take_n(PACKET_LEN - 1)?;
        pkt[1..].copy_from_slice(&rest);
        Some(pkt)
    }

    fn resync(&mut self) -> Option<[u8; PACKET_LEN]> {
        loop {
            if self.take_byte()? == SYNC_BYTE {
                break;
            }
        }
        let rest = self.take_n(PACKET_LEN - 1)?;
        let candidate = self.take_byte()?;
        if candidate == SYNC_BYTE {
            self.lookahead.push_back(candidate);
            self.synced = true;
            let mut pkt = [0u8; PACKET_LEN];
            pkt[0] = SYNC_BYTE;
            pkt[1..].copy_from_slice(&rest);
            Some(pkt)
        } else {
            // False sync: resume scanning within `rest` followed by `candidate`, none of
            // which was actually consumed as part of a packet.
            self.lookahead.extend(rest);
            self.lookahead.push_back(candidate);
            None
        }
    }
}

impl<S: ByteSource> Iterator for PacketSynchronizer<S> {
    type Item = [u8; PACKET_LEN];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.synced {
                return self.next_synced();
            }
            if let Some(pkt) = self.resync() {
                return Some(pkt);
            }
            if self.lookahead.is_empty() {
                // resync() returning None with an empty lookahead means the source itself
                // was exhausted rather than a false-sync retry.
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_yields_nothing() {
        let data = [0x47u8; 10];
        let sync = PacketSynchronizer::new(&data[..]);
        let out: Vec<_> = sync.collect();
        assert!(out.is_empty());
    }

    #[test]
    fn exact_188_bytes_without_a_confirming_sync_yields_nothing() {
        // The initial-sync algorithm (`spec.md` §4.1) always peeks one byte past the
        // candidate packet to confirm it against the next packet's sync byte; hitting EOF on
        // that peek terminates the sequence without ever emitting the candidate, even though
        // 188 well-formed bytes were available.
        let mut data = vec![0x47u8];
        data.extend(std::iter::repeat(0xAAu8).take(PACKET_LEN - 1));
        let sync = PacketSynchronizer::new(&data[..]);
        let out: Vec<_> = sync.collect();
        assert!(out.is_empty());
    }

    #[test]
    fn confirmed_sync_emits_exactly_one_packet() {
        let mut data = vec![0x47u8];
        data.extend(std::iter::repeat(0xAAu8).take(PACKET_LEN - 1));
        data.push(0x47); // confirms the candidate packet
        let sync = PacketSynchronizer::new(&data[..]);
        let out: Vec<_> = sync.collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0], 0x47);
    }

    #[test]
    fn leading_garbage_before_first_sync_is_discarded() {
        let mut data = vec![0x00u8, 0x01, 0x02];
        data.push(0x47);
        data.extend(std::iter::repeat(0xBBu8).take(PACKET_LEN - 1));
        data.push(0x47);
        data.extend(std::iter::repeat(0xCCu8).take(PACKET_LEN - 1));
        let sync = PacketSynchronizer::new(&data[..]);
        let out: Vec<_> = sync.collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][0], 0x47);
        assert_eq!(out[0][1], 0xBB);
        assert_eq!(out[1][1], 0xCC);
    }

    #[test]
    fn false_sync_byte_is_skipped_and_scanning_resumes() {
        // A 0x47 appears at offset 0 but its "next sync" candidate (the byte 188 positions
        // later) is not 0x47: a false alarm. Scanning must resume one byte after the false
        // sync, not from scratch, and find the real packet starting at offset 189. That real
        // packet's own next-sync candidate (offset 377) confirms 0x47, committing `synced`.
        let mut data = vec![0x47u8];
        data.extend(std::iter::repeat(0xAAu8).take(PACKET_LEN - 1)); // bytes 1..188, no sync
        data.push(0x11); // candidate at offset 188: not sync -> false alarm
        data.push(0x47); // true sync starts at offset 189
        data.extend(std::iter::repeat(0xDDu8).take(PACKET_LEN - 1));
        data.push(0x47); // confirms the real packet's next-sync candidate
        let sync = PacketSynchronizer::new(&data[..]);
        let out: Vec<_> = sync.collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0], 0x47);
        assert_eq!(out[0][1], 0xDD);
    }

    #[test]
    fn sync_is_maintained_across_many_packets() {
        let mut data = Vec::new();
        for i in 0..5u8 {
            data.push(0x47);
            data.extend(std::iter::repeat(i).take(PACKET_LEN - 1));
        }
        let sync = PacketSynchronizer::new(&data[..]);
        let out: Vec<_> = sync.collect();
        assert_eq!(out.len(), 5);
        for (i, pkt) in out.iter().enumerate() {
            assert_eq!(pkt[0], 0x47);
            assert_eq!(pkt[1], i as u8);
        }
    }
}
