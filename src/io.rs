//! The file I/O adapter the page store runs its commit protocol over.
//!
//! [`PageIo`] is deliberately narrow: seek, fill-buffer read, bounded
//! write, fsync, close. The store assumes a `write` without a following
//! `fsync` is not durable, and that `fsync` orders all prior writes
//! ahead of whatever comes after it returns -- see
//! [`crate::store`]'s commit pipeline for how that ordering is used.
//!
//! `std::fs::File` implements this trait directly so production code
//! never has to name it; a `Vec<u8>`-backed implementation is provided
//! under `#[cfg(test)]` for the crash-boundary property tests that need
//! to simulate torn writes without touching a real filesystem.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::Result;

/// A single, exclusively-owned random-access file.
pub trait PageIo {
    /// Move the file position to an absolute byte offset.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Fill `buf` completely from the current position, advancing it.
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` at the current position, advancing it.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Force all previously written bytes to be durable before
    /// returning.
    fn fsync(&mut self) -> Result<()>;
}

impl PageIo for File {
    fn seek(&mut self, offset: u64) -> Result<()> {
        Seek::seek(self, SeekFrom::Start(offset))?;
        Ok(())
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        Read::read_exact(self, buf)?;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Ok(())
    }

    fn fsync(&mut self) -> Result<()> {
        self.sync_all()?;
        Ok(())
    }
}

/// An in-memory [`PageIo`] backed by a growable byte buffer, used by
/// tests that need to simulate crash-truncated or bit-flipped writes
/// without a real file.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemIo {
    data: Vec<u8>,
    pos: u64,
}

#[cfg(test)]
impl MemIo {
    pub fn new() -> Self {
        MemIo::default()
    }
}

#[cfg(test)]
impl PageIo for MemIo {
    fn seek(&mut self, offset: u64) -> Result<()> {
        self.pos = offset;
        Ok(())
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.pos as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read").into());
        }
        buf.copy_from_slice(&self.data[start..end]);
        self.pos = end as u64;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let start = self.pos as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(())
    }

    fn fsync(&mut self) -> Result<()> {
        Ok(())
    }
}
