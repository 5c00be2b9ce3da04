//! Serialization and validation of the page store's header record.
//!
//! A header record is written into page 0 or page 1 of the backing file
//! (see [`crate::store`] for the double-buffered slot protocol). This
//! module only concerns itself with turning a [`HeaderRecord`] into
//! exactly `page_size` bytes and back, including the CRC-32 guard that
//! lets [`PageStore::open`](crate::PageStore::open) tell a torn write
//! from a durable one.

use crate::checksum;
use crate::codec;
use crate::error::{Error, Result};

/// ASCII magic stamped at the start of every header slot.
pub const MAGIC: &[u8; 4] = b"PGST";

/// The only format version this crate understands.
pub const VERSION: u32 = 1;

/// Byte width of every fixed-width field up to (not including) the
/// variable-length `pendingFree` array.
const FIXED_FIELDS_LEN: usize = 34;

/// Byte width of the trailing checksum field.
const CHECKSUM_LEN: usize = 4;

/// The parsed contents of a header slot.
///
/// All integer fields are stored in memory in host order; [`encode`] and
/// [`decode`] handle the big-endian on-disk representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub version: u32,
    pub page_size: u32,
    pub page_count: u32,
    pub epoch: u64,
    pub meta_root: u32,
    pub free_list_head: u32,
    pub pending_free: Vec<u32>,
}

impl HeaderRecord {
    /// Create a fresh header for a newly created store: `page_count`
    /// pages (the two header pages), epoch `0`, no meta root, no free
    /// list, no pending frees.
    pub fn new_initial(page_size: u32, page_count: u32) -> Self {
        HeaderRecord {
            version: VERSION,
            page_size,
            page_count,
            epoch: 0,
            meta_root: 0,
            free_list_head: 0,
            pending_free: Vec::new(),
        }
    }

    /// The maximum number of pending-free page ids that fit in a header
    /// record serialized into a page of `page_size` bytes.
    pub fn max_pending_free(page_size: usize) -> usize {
        (page_size.saturating_sub(FIXED_FIELDS_LEN + CHECKSUM_LEN)) / 4
    }

    /// Serialize this record into exactly `page_size` bytes. Bytes past
    /// the checksum are zero.
    ///
    /// # Panics
    ///
    /// Panics if `pending_free` exceeds [`HeaderRecord::max_pending_free`]
    /// for `page_size`, or if `page_size` is too small to hold the fixed
    /// fields and checksum at all. Callers are expected to have validated
    /// `page_size` at store-creation time; this is an internal invariant,
    /// not a user-facing precondition.
    pub fn encode(&self, page_size: usize) -> Vec<u8> {
        assert!(
            self.pending_free.len() <= Self::max_pending_free(page_size),
            "pending_free exceeds header capacity for page_size {page_size}"
        );

        let mut buf = vec![0u8; page_size];
        buf[0..4].copy_from_slice(MAGIC);
        codec::write_u32(&mut buf, 4, self.version);
        codec::write_u32(&mut buf, 8, page_size as u32);
        codec::write_u32(&mut buf, 12, self.page_count);
        codec::write_u64(&mut buf, 16, self.epoch);
        codec::write_u32(&mut buf, 24, self.meta_root);
        codec::write_u32(&mut buf, 28, self.free_list_head);
        codec::write_u16(&mut buf, 32, self.pending_free.len() as u16);

        let mut offset = FIXED_FIELDS_LEN;
        for &id in &self.pending_free {
            codec::write_u32(&mut buf, offset, id);
            offset += 4;
        }

        let checksum = checksum::compute_range(&buf, 0, offset);
        codec::write_u32(&mut buf, offset, checksum);

        buf
    }

    /// Parse a header record out of `bytes`. `bytes` is expected to be
    /// exactly one page, but only a prefix is actually consumed.
    ///
    /// Returns [`Error::Corrupt`] if the buffer is too short, the magic
    /// doesn't match, `pendingCount` overflows the capacity implied by
    /// the buffer's own length, the checksum region runs past the
    /// buffer, or the checksum doesn't match.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FIXED_FIELDS_LEN + CHECKSUM_LEN {
            return Err(Error::Corrupt("header buffer too short".into()));
        }

        if &bytes[0..4] != MAGIC {
            return Err(Error::Corrupt("bad magic bytes".into()));
        }

        let version = codec::read_u32(bytes, 4);
        let page_size = codec::read_u32(bytes, 8);
        let page_count = codec::read_u32(bytes, 12);
        let epoch = codec::read_u64(bytes, 16);
        let meta_root = codec::read_u32(bytes, 24);
        let free_list_head = codec::read_u32(bytes, 28);
        let pending_count = codec::read_u16(bytes, 32) as usize;

        let max_pending = Self::max_pending_free(bytes.len());
        if pending_count > max_pending {
            return Err(Error::Corrupt(format!(
                "pendingCount {pending_count} exceeds capacity {max_pending}"
            )));
        }

        let checksum_offset = FIXED_FIELDS_LEN + pending_count * 4;
        if checksum_offset + CHECKSUM_LEN > bytes.len() {
            return Err(Error::Corrupt(
                "checksum region extends past buffer".into(),
            ));
        }

        let mut pending_free = Vec::with_capacity(pending_count);
        let mut offset = FIXED_FIELDS_LEN;
        for _ in 0..pending_count {
            pending_free.push(codec::read_u32(bytes, offset));
            offset += 4;
        }

        let expected = codec::read_u32(bytes, checksum_offset);
        let actual = checksum::compute_range(bytes, 0, checksum_offset);
        if expected != actual {
            return Err(Error::Corrupt("checksum mismatch".into()));
        }

        Ok(HeaderRecord {
            version,
            page_size,
            page_count,
            epoch,
            meta_root,
            free_list_head,
            pending_free,
        })
    }
}
