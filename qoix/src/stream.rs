//! Pull-based byte input for the decoder.
//!
//! [`ByteStream`] unifies the two source shapes the decoder accepts: a
//! contiguous memory slice, or an arbitrary [`Read`] impl fronted by a
//! small refill window. Reads past the end of the source surface as
//! [`io::ErrorKind::UnexpectedEof`] through the [`Read`] impl, so the
//! decoder's bounded per-op consumption needs no separate bounds checks.

use std::io::{self, Read};

/// Size of the refill window for reader-backed streams. Header sniffing
/// needs at most 14 bytes and the decoder consumes at most 5 bytes per op,
/// so refills amortize cleanly.
pub(crate) const REFILL_LEN: usize = 128;

enum Origin<'a> {
    Memory(&'a [u8]),
    Reader(&'a mut (dyn Read + 'a)),
}

/// A unified byte source with single-byte granularity.
///
/// Big-endian 16/32-bit reads are available through
/// [`byteorder::ReadBytesExt`] on top of the [`Read`] impl.
pub struct ByteStream<'a> {
    origin: Origin<'a>,
    window: [u8; REFILL_LEN],
    /// Read cursor into the live window (the slice itself for memory
    /// origins, `window` for reader origins). `pos <= end` always.
    pos: usize,
    end: usize,
    /// Bytes consumed from windows that have already been evicted.
    consumed_before_window: u64,
    eof: bool,
}

impl<'a> ByteStream<'a> {
    /// A stream over a borrowed memory slice. No refill happens; the slice
    /// is the whole source.
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self {
            origin: Origin::Memory(data),
            window: [0; REFILL_LEN],
            pos: 0,
            end: data.len(),
            consumed_before_window: 0,
            eof: false,
        }
    }

    /// A stream pulling from `reader` through the refill window.
    pub fn from_reader(reader: &'a mut (dyn Read + 'a)) -> Self {
        Self {
            origin: Origin::Reader(reader),
            window: [0; REFILL_LEN],
            pos: 0,
            end: 0,
            consumed_before_window: 0,
            eof: false,
        }
    }

    /// Total number of bytes handed out so far.
    pub fn consumed(&self) -> u64 {
        self.consumed_before_window + self.pos as u64
    }

    /// Bytes pulled from a reader origin but not yet consumed. A caller
    /// that owns a seekable source can seek backwards by this amount to
    /// land exactly one past the last consumed byte.
    pub fn buffered_rest(&self) -> usize {
        self.end - self.pos
    }

    /// Restores the read position to the start of the source.
    ///
    /// For reader origins this is only possible while the first refill
    /// window is still live, i.e. after consuming at most [`REFILL_LEN`]
    /// bytes. That covers the sniff-then-decode pattern: a header is 14
    /// bytes.
    pub fn rewind(&mut self) {
        debug_assert_eq!(self.consumed_before_window, 0, "rewind past the first window");
        self.pos = 0;
    }

    fn refill(&mut self) -> io::Result<()> {
        let Origin::Reader(reader) = &mut self.origin else {
            return Ok(());
        };
        if self.eof {
            return Ok(());
        }
        self.consumed_before_window += self.end as u64;
        self.pos = 0;
        self.end = 0;
        loop {
            match reader.read(&mut self.window) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    self.end = n;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Read for ByteStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.end {
            self.refill()?;
            if self.pos == self.end {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.end - self.pos);
        let src = match &self.origin {
            Origin::Memory(data) => &data[self.pos..self.pos + n],
            Origin::Reader(_) => &self.window[self.pos..self.pos + n],
        };
        buf[..n].copy_from_slice(src);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ReadBytesExt};

    /// Hands out at most `step` bytes per `read` call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(self.data.len()).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn memory_reads_big_endian() {
        let mut stream = ByteStream::from_slice(&[0xAB, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(stream.read_u8().unwrap(), 0xAB);
        assert_eq!(stream.read_u16::<BigEndian>().unwrap(), 0x0102);
        assert_eq!(stream.read_u32::<BigEndian>().unwrap(), 0x03040506);
        assert_eq!(stream.consumed(), 7);
        assert!(stream.read_u8().is_err());
    }

    #[test]
    fn memory_rewind_restores_start() {
        let data = b"qoif rest";
        let mut stream = ByteStream::from_slice(data);
        let mut magic = [0; 4];
        stream.read_exact(&mut magic).unwrap();
        assert_eq!(&magic, b"qoif");
        stream.rewind();
        assert_eq!(stream.read_u8().unwrap(), b'q');
    }

    #[test]
    fn reader_refills_across_window_boundary() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = Trickle { data: &data, step: 7 };
        let mut stream = ByteStream::from_reader(&mut reader);
        let mut out = vec![0; data.len()];
        stream.read_exact(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(stream.consumed(), data.len() as u64);
        assert!(stream.read_u8().is_err());
    }

    #[test]
    fn reader_rewind_within_first_window() {
        let data = vec![9u8; 300];
        let mut reader = Trickle { data: &data, step: 300 };
        let mut stream = ByteStream::from_reader(&mut reader);
        let mut head = [0; 14];
        stream.read_exact(&mut head).unwrap();
        stream.rewind();
        assert_eq!(stream.consumed(), 0);
        assert_eq!(stream.read_u8().unwrap(), 9);
    }

    #[test]
    fn buffered_rest_tracks_unconsumed_window() {
        let data = vec![1u8; 100];
        let mut reader = Trickle { data: &data, step: 100 };
        let mut stream = ByteStream::from_reader(&mut reader);
        let mut head = [0; 30];
        stream.read_exact(&mut head).unwrap();
        assert_eq!(stream.buffered_rest(), 70);
    }
}
