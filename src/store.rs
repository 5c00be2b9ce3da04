//! The page store core: open/create, page reads, the copy-on-write
//! commit pipeline, and deferred free-list reclamation.
//!
//! See [`crate::transaction`] for the write-batch/transaction state
//! machine that drives commits through this module.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::{Error, Result};
use crate::header::HeaderRecord;
use crate::io::PageIo;
use crate::transaction::Transaction;

/// A page id. `0` is the "no page" sentinel and also the first header
/// slot; `1` is the second header slot. Data pages start at `2`.
pub type PageId = u32;

/// Number of reserved header pages at the front of every file.
pub const HEADER_PAGES: u32 = 2;

/// Smallest page size the store will create or open.
pub const MIN_PAGE_SIZE: usize = 64;

/// A crash-safe, atomic, durable page store.
///
/// `IO` defaults to [`std::fs::File`]; the generic parameter exists so
/// the commit pipeline and reclamation logic can be exercised against an
/// in-memory [`crate::io::MemIo`] in tests without touching a real
/// filesystem. Production callers only ever see `PageStore` (i.e.
/// `PageStore<File>`) through [`PageStore::create`]/[`PageStore::open`].
pub struct PageStore<IO: PageIo = File> {
    io: IO,
    page_size: usize,
    header: HeaderRecord,
    /// Which header slot (`0` or `1`) is currently authoritative.
    active_slot: u8,
    /// Next page id that minting a brand-new page (as opposed to reusing
    /// a freed one) will hand out. Advances every time a page is
    /// physically zero-extended into the file, and -- unlike a batch's
    /// own `extended` count -- is never rolled back: a rolled-back
    /// allocation's file growth is real and permanent, only the page's
    /// liveness is undone (it goes back on `free_deque` instead).
    next_new_page: PageId,
    /// In-memory free-page deque; authoritative between commits.
    free_deque: VecDeque<PageId>,
    /// Whether pending-link has already run for the in-progress session.
    pending_linked: bool,
    /// Exclusive-transaction guard.
    txn_active: bool,
}

impl PageStore<File> {
    /// Create a brand-new page store at `path`.
    ///
    /// `page_size` must be a power of two and at least
    /// [`MIN_PAGE_SIZE`]; otherwise [`Error::InvalidConfig`] is returned
    /// before any file state is created.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        validate_page_size(page_size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Self::create_with_io(file, page_size)
    }

    /// Open an existing page store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::open_with_io(file)
    }
}

impl<IO: PageIo> PageStore<IO> {
    /// Core of [`PageStore::create`], generic over the I/O backend so
    /// tests can exercise it against [`crate::io::MemIo`].
    pub fn create_with_io(mut io: IO, page_size: usize) -> Result<Self> {
        validate_page_size(page_size)?;

        let header = HeaderRecord::new_initial(page_size as u32, HEADER_PAGES);

        let bytes = header.encode(page_size);
        io.seek(0)?;
        io.write_all(&bytes)?;
        io.write_all(&bytes)?;
        io.fsync()?;

        Ok(PageStore {
            io,
            page_size,
            header,
            active_slot: 0,
            next_new_page: HEADER_PAGES,
            free_deque: VecDeque::new(),
            pending_linked: false,
            txn_active: false,
        })
    }

    /// Core of [`PageStore::open`], generic over the I/O backend.
    pub fn open_with_io(mut io: IO) -> Result<Self> {
        let mut size_field = [0u8; 4];
        io.seek(8)?;
        io.read_fully(&mut size_field)?;
        let page_size = u32::from_be_bytes(size_field) as usize;
        if page_size < MIN_PAGE_SIZE {
            return Err(Error::Corrupt(format!(
                "implausible page size {page_size}"
            )));
        }

        let slot0 = read_slot(&mut io, page_size, 0)?;
        let slot1 = read_slot(&mut io, page_size, 1)?;

        let (header, active_slot) = match (slot0, slot1) {
            (Ok(h0), Ok(h1)) => {
                if h1.epoch > h0.epoch {
                    (h1, 1)
                } else {
                    (h0, 0)
                }
            }
            (Ok(h0), Err(_)) => (h0, 0),
            (Err(_), Ok(h1)) => (h1, 1),
            (Err(_), Err(_)) => {
                return Err(Error::Corrupt("corrupt page store".into()));
            }
        };

        let free_deque = rebuild_free_deque(&mut io, page_size, header.free_list_head)?;
        let next_new_page = header.page_count;

        let mut store = PageStore {
            io,
            page_size,
            header,
            active_slot,
            next_new_page,
            free_deque,
            pending_linked: false,
            txn_active: false,
        };

        if !store.header.pending_free.is_empty() {
            store.startup_reclamation()?;
        }

        Ok(store)
    }

    /// Immutable page size chosen at [`PageStore::create`] time.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The caller-defined root page id carried by the most recent commit.
    pub fn meta_root(&self) -> PageId {
        self.header.meta_root
    }

    /// Read a freshly-owned copy of page `id` from disk.
    ///
    /// # Errors
    ///
    /// [`Error::Precondition`] if `id` is a header page or out of range.
    pub fn read(&mut self, id: PageId) -> Result<Vec<u8>> {
        self.check_data_page_id(id)?;
        let mut buf = vec![0u8; self.page_size];
        self.io.seek(id as u64 * self.page_size as u64)?;
        self.io.read_fully(&mut buf)?;
        Ok(buf)
    }

    /// Open an explicit transaction. Disallowed while one is already
    /// active. Performs pending-link (§4.4) as its first act.
    pub fn begin_transaction(&mut self) -> Result<Transaction<'_, IO>> {
        if self.txn_active {
            return Err(Error::Precondition(
                "a transaction is already active".into(),
            ));
        }
        self.pending_link()?;
        self.txn_active = true;
        Ok(Transaction::new(self))
    }

    /// Run `mutation` under a fresh transaction, committing on normal
    /// completion and rolling back if it returns `Err`.
    pub fn modify<F>(&mut self, mutation: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction<'_, IO>) -> Result<()>,
    {
        let mut txn = self.begin_transaction()?;
        match mutation(&mut txn) {
            Ok(()) => txn.commit(),
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }

    /// Close the backing file. No implicit commit is performed.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    fn check_data_page_id(&self, id: PageId) -> Result<()> {
        if id < HEADER_PAGES || id >= self.header.page_count {
            return Err(Error::Precondition(format!(
                "page id {id} out of range [{HEADER_PAGES}, {})",
                self.header.page_count
            )));
        }
        Ok(())
    }

    /// §4.4 pending-link: called at the start of every transaction.
    /// Idempotent per session via `pending_linked`.
    fn pending_link(&mut self) -> Result<()> {
        if self.pending_linked || self.header.pending_free.is_empty() {
            return Ok(());
        }

        let pending = self.header.pending_free.clone();
        let mut next = self.header.free_list_head;
        for &page_id in pending.iter().rev() {
            let mut node = vec![0u8; self.page_size];
            node[0..4].copy_from_slice(&next.to_be_bytes());
            self.io.seek(page_id as u64 * self.page_size as u64)?;
            self.io.write_all(&node)?;
            next = page_id;
        }
        self.io.fsync()?;

        for &page_id in pending.iter().rev() {
            self.free_deque.push_front(page_id);
        }

        self.pending_linked = true;
        Ok(())
    }

    /// §4.4 startup reclamation: physically link pending-free pages (as
    /// in `pending_link`) and then immediately commit a header that
    /// clears `pendingFree` and records the new `freeListHead`, before
    /// any caller work is accepted.
    fn startup_reclamation(&mut self) -> Result<()> {
        self.pending_link()?;

        let new_free_head = self.free_deque.front().copied().unwrap_or(0);
        let new_header = HeaderRecord {
            version: self.header.version,
            page_size: self.page_size as u32,
            page_count: self.next_new_page,
            epoch: self.header.epoch + 1,
            meta_root: self.header.meta_root,
            free_list_head: new_free_head,
            pending_free: Vec::new(),
        };

        let stale_slot = 1 - self.active_slot;
        let bytes = new_header.encode(self.page_size);
        self.io.seek(stale_slot as u64 * self.page_size as u64)?;
        self.io.write_all(&bytes)?;
        self.io.fsync()?;

        self.header = new_header;
        self.active_slot = stale_slot;
        self.free_deque = rebuild_free_deque(&mut self.io, self.page_size, new_free_head)?;
        self.pending_linked = false;

        Ok(())
    }

    /// Pop a page id off the in-memory free deque. Used only internally
    /// by [`Transaction::allocate`] when a freed page is available for
    /// reuse.
    pub(crate) fn pop_free_page(&mut self) -> Option<PageId> {
        self.free_deque.pop_front()
    }

    /// Hand out a brand-new page id and physically zero-extend the file
    /// to cover it. Used only internally by [`Transaction::allocate`]
    /// when the free deque is empty.
    ///
    /// `next_new_page` advances unconditionally here and is never walked
    /// back by a rollback -- the file growth it records is permanent even
    /// if the transaction that triggered it is never committed, so a
    /// later commit's `page_count` (see [`PageStore::commit_batch`])
    /// always covers every page id that has ever actually been minted,
    /// not just the ones minted by the committing batch itself.
    pub(crate) fn mint_page(&mut self) -> Result<PageId> {
        let id = self.next_new_page;
        self.next_new_page += 1;
        self.zero_extend_to(id)?;
        Ok(id)
    }

    pub(crate) fn push_free_page_front(&mut self, id: PageId) {
        self.free_deque.push_front(id);
    }

    pub(crate) fn current_page_count(&self) -> u32 {
        self.header.page_count
    }

    pub(crate) fn page_size_bytes(&self) -> usize {
        self.page_size
    }

    /// Read a page's current on-disk contents, bypassing the header
    /// range check (used internally by the transaction for pages it is
    /// about to overwrite or that were just extended into existence).
    pub(crate) fn read_raw(&mut self, id: PageId) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size];
        self.io.seek(id as u64 * self.page_size as u64)?;
        self.io.read_fully(&mut buf)?;
        Ok(buf)
    }

    /// Zero-extend the file so that page `id` exists, without touching
    /// `page_count` in the header (that happens at commit time).
    pub(crate) fn zero_extend_to(&mut self, id: PageId) -> Result<()> {
        let blank = vec![0u8; self.page_size];
        self.io.seek(id as u64 * self.page_size as u64)?;
        self.io.write_all(&blank)?;
        Ok(())
    }

    /// Execute the commit pipeline of §4.5 against `written`/`freed`/
    /// `new_meta_root` collected by a [`Transaction`]. `page_count` is
    /// taken from `next_new_page` rather than the committing batch's own
    /// mint count, so it also covers pages minted by earlier, rolled-back
    /// batches in this session (see [`PageStore::mint_page`]).
    pub(crate) fn commit_batch(
        &mut self,
        written: &std::collections::HashMap<PageId, Vec<u8>>,
        freed: &[PageId],
        new_meta_root: Option<PageId>,
    ) -> Result<()> {
        let new_meta_root = new_meta_root.unwrap_or(self.header.meta_root);
        let current_free_head = self.free_deque.front().copied().unwrap_or(0);

        if !written.is_empty() {
            for (&id, bytes) in written.iter() {
                self.io.seek(id as u64 * self.page_size as u64)?;
                self.io.write_all(bytes)?;
            }
            self.io.fsync()?;
        }

        let new_header = HeaderRecord {
            version: self.header.version,
            page_size: self.page_size as u32,
            page_count: self.next_new_page,
            epoch: self.header.epoch + 1,
            meta_root: new_meta_root,
            free_list_head: current_free_head,
            pending_free: freed.to_vec(),
        };

        let stale_slot = 1 - self.active_slot;
        let bytes = new_header.encode(self.page_size);
        self.io.seek(stale_slot as u64 * self.page_size as u64)?;
        self.io.write_all(&bytes)?;
        self.io.fsync()?;

        self.header = new_header;
        self.active_slot = stale_slot;
        self.pending_linked = false;
        Ok(())
    }

    pub(crate) fn end_transaction(&mut self) {
        self.txn_active = false;
    }
}

fn validate_page_size(page_size: usize) -> Result<()> {
    if page_size < MIN_PAGE_SIZE || !page_size.is_power_of_two() {
        return Err(Error::InvalidConfig(format!(
            "page size {page_size} must be a power of two and at least {MIN_PAGE_SIZE}"
        )));
    }
    Ok(())
}

fn read_slot<IO: PageIo>(io: &mut IO, page_size: usize, slot: u8) -> Result<Result<HeaderRecord>> {
    let mut buf = vec![0u8; page_size];
    io.seek(slot as u64 * page_size as u64)?;
    io.read_fully(&mut buf)?;
    Ok(HeaderRecord::decode(&buf))
}

fn rebuild_free_deque<IO: PageIo>(
    io: &mut IO,
    page_size: usize,
    free_list_head: PageId,
) -> Result<VecDeque<PageId>> {
    let mut deque = VecDeque::new();
    let mut current = free_list_head;
    while current != 0 {
        deque.push_back(current);
        let mut buf = [0u8; 4];
        io.seek(current as u64 * page_size as u64)?;
        io.read_fully(&mut buf)?;
        current = u32::from_be_bytes(buf);
    }
    Ok(deque)
}
