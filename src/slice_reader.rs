use crate::error::{ParseError, ParseErrorKind, ParseResult};

/// Simple reader state for extracting data from a `&[u8]` slice.
///
/// Unlike the [`std::io::Read`] implementation for `&[u8]`, this keeps track of the location
/// within the packet for more informative errors via [`ParseError`].
///
/// # Example
///
/// ```
/// use tsdemux::SliceReader;
/// let some_data = [0x42];
/// let mut reader = SliceReader::new(&some_data);
/// assert_eq!(reader.read_u8().unwrap(), 0x42);
/// ```
#[derive(Debug)]
pub struct SliceReader<'a> {
    slice: &'a [u8],
    location: usize,
}

impl<'a> SliceReader<'a> {
    /// Initializes a reader from any byte slice.
    pub fn new(slice: &'a [u8]) -> Self {
        Self { slice, location: 0 }
    }

    /// Creates a fixed `length` sub-reader at the current position, then advances this reader to
    /// the sub-reader's end position.
    ///
    /// The sub-reader semantic makes reading nested data of known lengths easier with correct
    /// bounds checking of the nested data.
    pub fn new_sub_reader(&mut self, length: usize) -> ParseResult<Self> {
        let location = self.location;
        Ok(Self {
            slice: self.read(length)?,
            location,
        })
    }

    /// Creates a [`ParseError`] using the contained location.
    pub fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(self.location, kind)
    }

    /// Number of bytes remaining in the slice reader.
    pub fn remaining_len(&self) -> usize {
        self.slice.len()
    }

    /// Advance reader without extracting any data from the slice.
    pub fn skip(&mut self, length: usize) -> ParseResult<()> {
        if length > self.slice.len() {
            Err(self.make_error(ParseErrorKind::PacketOverrun(length)))
        } else {
            self.location += length;
            self.slice = &self.slice[length..];
            Ok(())
        }
    }

    /// Extract a fixed `length` sub-slice from this reader and advance.
    pub fn read(&mut self, length: usize) -> ParseResult<&'a [u8]> {
        if length > self.slice.len() {
            Err(self.make_error(ParseErrorKind::PacketOverrun(length)))
        } else {
            self.location += length;
            let (left, right) = self.slice.split_at(length);
            self.slice = right;
            Ok(left)
        }
    }

    /// Extract a sub-slice of all data remaining to be read.
    pub fn read_to_end(&mut self) -> ParseResult<&'a [u8]> {
        self.read(self.slice.len())
    }

    /// Same as [`SliceReader::read`] but also converts the slice to an array reference of length
    /// `N`.
    #[allow(unsafe_code)]
    pub fn read_array_ref<const N: usize>(&mut self) -> ParseResult<&'a [u8; N]> {
        unsafe {
            // Bounds checking performed by read()
            Ok(&*(self.read(N)?.as_ptr() as *const [u8; N]))
        }
    }

    /// Read one byte interpreted as [`u8`].
    pub fn read_u8(&mut self) -> ParseResult<u8> {
        Ok(self.read_array_ref::<1>()?[0])
    }

    /// Read two bytes interpreted as big-endian [`u16`].
    pub fn read_be_u16(&mut self) -> ParseResult<u16> {
        Ok(u16::from_be_bytes(*self.read_array_ref::<2>()?))
    }

    /// Read four bytes interpreted as big-endian [`u32`].
    pub fn read_be_u32(&mut self) -> ParseResult<u32> {
        Ok(u32::from_be_bytes(*self.read_array_ref::<4>()?))
    }

    /// Extract a fixed `length` sub-slice from this reader without advancing.
    pub fn peek(&mut self, length: usize) -> ParseResult<&'a [u8]> {
        if length > self.slice.len() {
            Err(self.make_error(ParseErrorKind::PacketOverrun(length)))
        } else {
            Ok(&self.slice[0..length])
        }
    }

    /// Same as [`SliceReader::peek`] but also converts the slice to an array reference of length
    /// `N`.
    #[allow(unsafe_code)]
    pub fn peek_array_ref<const N: usize>(&mut self) -> ParseResult<&'a [u8; N]> {
        unsafe {
            // Bounds checking performed by read()
            Ok(&*(self.peek(N)?.as_ptr() as *const [u8; N]))
        }
    }
}

/// Convenience macro to read a modular bitfield from a [`SliceReader`].
///
/// Wraps [`SliceReader::read_array_ref`] to read the exact number of bytes required by the
/// bitfield type. Must be expanded in a function that returns a [`ParseResult`](crate::error::ParseResult).
#[macro_export]
macro_rules! read_bitfield {
    ($reader:expr, $type:ty) => {
        <$type>::from_bytes(*$reader.read_array_ref::<{ std::mem::size_of::<$type>() }>()?)
    };
}
