//! Write-batch / transaction state machine (§4.5, §9).
//!
//! A [`Transaction`] accumulates writes, frees, allocations, and an
//! optional new meta root purely in memory; nothing reaches disk until
//! [`Transaction::commit`] runs the copy-on-write pipeline in
//! [`crate::store::PageStore::commit_batch`]. [`WriteBatch`] is the
//! narrower capability surfaced to [`crate::store::PageStore::modify`]'s
//! callback -- allocate/read/write/free/set_meta_root, without
//! commit/rollback/is_active.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::io::PageIo;
use crate::store::{PageId, PageStore, HEADER_PAGES};

/// The mutation capabilities available inside a write batch: allocate,
/// read (batch-local writes shadow disk reads), write, free, and set the
/// meta root. This is the surface [`PageStore::modify`]'s callback sees.
pub trait WriteBatch {
    /// Allocate a page: pop the in-memory free deque, or mint a new page
    /// id by zero-extending the file.
    fn allocate(&mut self) -> Result<PageId>;

    /// Read a page: the batch's own pending write if present, otherwise
    /// the on-disk contents.
    fn read(&mut self, id: PageId) -> Result<Vec<u8>>;

    /// Stage a write. `data.len()` must equal the store's page size. The
    /// bytes are defensively copied; the caller may mutate `data` after
    /// this call returns.
    fn write(&mut self, id: PageId, data: &[u8]) -> Result<()>;

    /// Mark `id` for deferred reclamation on the next commit. Drops any
    /// pending write staged for `id` in this batch.
    fn free(&mut self, id: PageId) -> Result<()>;

    /// Record a replacement meta root to take effect on commit.
    fn set_meta_root(&mut self, id: PageId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Completed,
}

/// An explicit transaction opened via
/// [`PageStore::begin_transaction`](crate::store::PageStore::begin_transaction).
///
/// Holds a unique borrow of the owning store for its lifetime -- the
/// Rust borrow checker alone makes a second concurrent transaction a
/// compile error. The store's own `txn_active` flag backs that up at
/// runtime (see [`PageStore::begin_transaction`]) and this struct's own
/// `state` field rejects use after [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback) at runtime, since `commit`/
/// `rollback` take `&mut self` rather than `self` (matching the spec's
/// literal "operations in Completed fail with a precondition error"
/// rather than modelling completion as a move).
pub struct Transaction<'a, IO: PageIo> {
    store: &'a mut PageStore<IO>,
    written: HashMap<PageId, Vec<u8>>,
    freed: Vec<PageId>,
    allocated: Vec<PageId>,
    new_meta_root: Option<PageId>,
    state: TxnState,
}

impl<'a, IO: PageIo> Transaction<'a, IO> {
    pub(crate) fn new(store: &'a mut PageStore<IO>) -> Self {
        Transaction {
            store,
            written: HashMap::new(),
            freed: Vec::new(),
            allocated: Vec::new(),
            new_meta_root: None,
            state: TxnState::Active,
        }
    }

    /// Whether this transaction can still accept operations or be
    /// committed/rolled back.
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Run the commit pipeline (§4.5): write staged pages, fsync, write
    /// the stale header slot with the new epoch and pending-free list,
    /// fsync again, then flip the active slot in memory.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.store
            .commit_batch(&self.written, &self.freed, self.new_meta_root)?;
        self.store.end_transaction();
        self.state = TxnState::Completed;
        Ok(())
    }

    /// Discard all batch state. Allocated pages are returned to the
    /// front of the in-memory free deque so they are immediately
    /// reusable; no bytes are written to disk and the epoch never
    /// advances.
    pub fn rollback(&mut self) {
        if !self.is_active() {
            return;
        }
        for &id in self.allocated.iter().rev() {
            self.store.push_free_page_front(id);
        }
        self.store.end_transaction();
        self.state = TxnState::Completed;
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(Error::Precondition(
                "transaction is no longer active".into(),
            ));
        }
        Ok(())
    }
}

impl<'a, IO: PageIo> WriteBatch for Transaction<'a, IO> {
    fn allocate(&mut self) -> Result<PageId> {
        self.ensure_active()?;

        let id = match self.store.pop_free_page() {
            Some(id) => id,
            None => self.store.mint_page()?,
        };

        self.allocated.push(id);
        Ok(id)
    }

    fn read(&mut self, id: PageId) -> Result<Vec<u8>> {
        self.ensure_active()?;
        if let Some(bytes) = self.written.get(&id) {
            return Ok(bytes.clone());
        }
        self.store.read_raw(id)
    }

    fn write(&mut self, id: PageId, data: &[u8]) -> Result<()> {
        self.ensure_active()?;
        if data.len() != self.store.page_size_bytes() {
            return Err(Error::Precondition(format!(
                "write buffer length {} does not match page size {}",
                data.len(),
                self.store.page_size_bytes()
            )));
        }
        self.written.insert(id, data.to_vec());
        Ok(())
    }

    fn free(&mut self, id: PageId) -> Result<()> {
        self.ensure_active()?;
        if id < HEADER_PAGES {
            return Err(Error::Precondition(format!(
                "cannot free header page {id}"
            )));
        }
        self.written.remove(&id);
        self.freed.push(id);
        Ok(())
    }

    fn set_meta_root(&mut self, id: PageId) -> Result<()> {
        self.ensure_active()?;
        self.new_meta_root = Some(id);
        Ok(())
    }
}
