//! Byte sources consumed by [`FrameReader`](crate::reader::FrameReader).
//!
//! The reader only needs four operations: read, peek, skip, and an exhaustion
//! check. [`SliceSource`] serves contiguous memory, [`StreamSource`] wraps any
//! [`std::io::Read`] with a small lookahead buffer.

use std::io::{self, Read};

pub trait ByteSource {
    /// Consume up to `buf.len()` bytes; a short count means the data ended.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Copy up to `buf.len()` upcoming bytes without consuming them.
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard up to `n` bytes, returning how many were discarded.
    fn skip(&mut self, n: u64) -> io::Result<u64>;

    /// True once every byte has been consumed.
    fn is_exhausted(&mut self) -> io::Result<bool>;
}

/// Reads from a borrowed slice.
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceSource { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl ByteSource for SliceSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.peek(buf)?;
        self.pos += n;
        Ok(n)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = self.remaining();
        let n = buf.len().min(rest.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let avail = (self.data.len() - self.pos) as u64;
        let n = n.min(avail);
        self.pos += n as usize;
        Ok(n)
    }

    fn is_exhausted(&mut self) -> io::Result<bool> {
        Ok(self.pos >= self.data.len())
    }
}

/// Wraps an [`io::Read`], buffering just enough to serve peeks.
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
    lookahead: Vec<u8>,
    start: usize,
    eof: bool,
}

impl<R: Read> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        StreamSource {
            inner,
            lookahead: Vec::new(),
            start: 0,
            eof: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn buffered(&self) -> usize {
        self.lookahead.len() - self.start
    }

    /// Try to hold at least `want` bytes in the lookahead.
    fn fill(&mut self, want: usize) -> io::Result<()> {
        if self.start > 0 && (self.start == self.lookahead.len() || self.start >= 4096) {
            self.lookahead.drain(..self.start);
            self.start = 0;
        }
        let mut chunk = [0u8; 512];
        while !self.eof && self.buffered() < want {
            match self.inner.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.lookahead.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<R: Read> ByteSource for StreamSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.peek(buf)?;
        self.start += n;
        Ok(n)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill(buf.len())?;
        let n = buf.len().min(self.buffered());
        buf[..n].copy_from_slice(&self.lookahead[self.start..self.start + n]);
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut left = n;
        while left > 0 {
            if self.buffered() == 0 {
                self.fill(1)?;
                if self.buffered() == 0 {
                    break;
                }
            }
            let step = left.min(self.buffered() as u64);
            self.start += step as usize;
            left -= step;
        }
        Ok(n - left)
    }

    fn is_exhausted(&mut self) -> io::Result<bool> {
        self.fill(1)?;
        Ok(self.buffered() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_source_peek_does_not_consume() {
        let data = [1u8, 2, 3];
        let mut src = SliceSource::new(&data);
        let mut buf = [0u8; 2];
        assert_eq!(src.peek(&mut buf).unwrap(), 2);
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(src.skip(10).unwrap(), 1);
        assert!(src.is_exhausted().unwrap());
    }

    #[test]
    fn stream_source_matches_slice_source() {
        let data: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
        let mut src = StreamSource::new(io::Cursor::new(data.clone()));
        let mut head = [0u8; 10];
        assert_eq!(src.peek(&mut head).unwrap(), 10);
        assert_eq!(&head, &data[..10]);
        assert_eq!(src.skip(1500).unwrap(), 1500);
        let mut rest = vec![0u8; 600];
        assert_eq!(src.read(&mut rest).unwrap(), 500);
        assert_eq!(&rest[..500], &data[1500..]);
        assert!(src.is_exhausted().unwrap());
    }
}
