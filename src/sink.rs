//! Byte sinks written by [`FrameWriter`](crate::writer::FrameWriter).
//!
//! Length prefixes are backfilled, so a sink must let the writer patch and
//! widen bytes it has not yet committed. `Vec<u8>` keeps everything in memory;
//! [`StreamSink`] forwards to an [`io::Write`] and only buffers while a length
//! placeholder is open.

use std::io::{self, Write};

pub trait ByteSink {
    /// Absolute offset of the next byte to be appended.
    fn position(&self) -> u64;

    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Overwrite uncommitted bytes starting at `offset`.
    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()>;

    /// Insert `count` bytes at `offset`, shifting everything after it right.
    fn widen(&mut self, offset: u64, count: usize) -> io::Result<()>;

    /// Bytes before `offset` will never be patched again.
    fn commit(&mut self, _offset: u64) -> io::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn out_of_range(offset: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("offset {} is outside the uncommitted region", offset),
    )
}

impl ByteSink for Vec<u8> {
    fn position(&self) -> u64 {
        self.len() as u64
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.len() {
            return Err(out_of_range(offset));
        }
        self[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn widen(&mut self, offset: u64, count: usize) -> io::Result<()> {
        let at = offset as usize;
        if at > self.len() {
            return Err(out_of_range(offset));
        }
        self.splice(at..at, std::iter::repeat(0u8).take(count));
        Ok(())
    }
}

/// Forwards committed bytes to an [`io::Write`].
#[derive(Debug)]
pub struct StreamSink<W: Write> {
    inner: W,
    pending: Vec<u8>,
    /// Absolute offset of `pending[0]`.
    base: u64,
}

impl<W: Write> StreamSink<W> {
    pub fn new(inner: W) -> Self {
        StreamSink {
            inner,
            pending: Vec::new(),
            base: 0,
        }
    }

    /// Bytes still held back waiting for a backfill.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        ByteSink::flush(&mut self)?;
        Ok(self.inner)
    }

    fn local(&self, offset: u64) -> io::Result<usize> {
        if offset < self.base || offset > self.base + self.pending.len() as u64 {
            return Err(out_of_range(offset));
        }
        Ok((offset - self.base) as usize)
    }
}

impl<W: Write> ByteSink for StreamSink<W> {
    fn position(&self) -> u64 {
        self.base + self.pending.len() as u64
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let start = self.local(offset)?;
        if start + bytes.len() > self.pending.len() {
            return Err(out_of_range(offset));
        }
        self.pending[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn widen(&mut self, offset: u64, count: usize) -> io::Result<()> {
        let at = self.local(offset)?;
        self.pending.splice(at..at, std::iter::repeat(0u8).take(count));
        Ok(())
    }

    fn commit(&mut self, offset: u64) -> io::Result<()> {
        let upto = self.local(offset)?;
        self.inner.write_all(&self.pending[..upto])?;
        self.pending.drain(..upto);
        self.base = offset;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let end = self.position();
        self.commit(end)?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_widen_shifts_tail() {
        let mut v = vec![1u8, 2, 3];
        v.widen(1, 2).unwrap();
        assert_eq!(v, [1, 0, 0, 2, 3]);
        v.patch(1, &[9, 9]).unwrap();
        assert_eq!(v, [1, 9, 9, 2, 3]);
        assert!(v.patch(4, &[0, 0]).is_err());
    }

    #[test]
    fn stream_sink_rejects_patch_of_committed_bytes() {
        let mut sink = StreamSink::new(Vec::new());
        sink.append(&[1, 2, 3]).unwrap();
        sink.commit(2).unwrap();
        assert_eq!(sink.buffered(), 1);
        assert!(sink.patch(1, &[0]).is_err());
        sink.patch(2, &[7]).unwrap();
        assert_eq!(sink.position(), 3);
        let out = sink.into_inner().unwrap();
        assert_eq!(out, [1, 2, 7]);
    }
}
