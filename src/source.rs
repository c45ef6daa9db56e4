//! Byte Source abstraction (`spec.md` §2): "a finite, forward-only source of bytes" providing
//! a read-exact-N capability. File I/O itself is an external collaborator (`spec.md` §1); this
//! crate only needs `Read`, so rather than invent a bespoke trait, any [`std::io::Read`] is a
//! valid [`ByteSource`] via the blanket impl below. The binary plugs in a `BufReader<File>`;
//! tests plug in a plain `&[u8]`.

use std::io::{self, Read};

/// A finite, forward-only source of bytes.
///
/// The "peek-or-rewind-one" capability `spec.md` §2 also asks for is implemented by
/// [`crate::sync::PacketSynchronizer`] itself (as a small internal lookahead buffer) rather
/// than pushed down into this trait, since it is only ever needed during resync and every
/// `Read` implementation already supports the read-exact-N half on its own.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes, retrying short reads until `buf` is full or the source
    /// is exhausted. Returns the number of bytes actually placed into `buf`; a return value
    /// less than `buf.len()` means EOF was reached partway through (`spec.md` §4.1: "if fewer
    /// than N remain, terminate").
    fn read_fully(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read + ?Sized> ByteSource for R {
    fn read_fully(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_full_buffer_from_a_slice() {
        let data = [1u8, 2, 3, 4, 5];
        let mut src: &[u8] = &data;
        let mut buf = [0u8; 5];
        assert_eq!(src.read_fully(&mut buf).unwrap(), 5);
        assert_eq!(buf, data);
    }

    #[test]
    fn short_read_reports_actual_count() {
        let data = [1u8, 2, 3];
        let mut src: &[u8] = &data;
        let mut buf = [0u8; 5];
        assert_eq!(src.read_fully(&mut buf).unwrap(), 3);
    }
}
