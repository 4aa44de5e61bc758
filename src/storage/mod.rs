//! Buffer pool over the backing page file.
//!
//! A thin stand-in for a host buffer manager: pages are pinned by
//! cloning an `Arc` frame handle, latched shared or exclusive through
//! the frame's `RwLock`, and written back on [`Pool::flush`]. Freed
//! pages are preferred for allocation over extending the file.
//!
//! The pool also owns the striped tuple-lock table that serializes
//! read-modify-write cycles on a tuple's neighbor array. Stripes are
//! leaf locks: a holder may take page latches but never another stripe.

use crate::error::Result;
use crate::page::{PageBuf, PAGE_SIZE};
use crate::tuple::NodeId;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

const TUPLE_LOCK_STRIPES: usize = 128;

struct Frame {
    blkno: u32,
    data: RwLock<PageBuf>,
    dirty: AtomicBool,
}

/// A pinned page. The pin is held for as long as this handle lives;
/// latching is explicit via [`PinnedPage::read`] and
/// [`PinnedPage::write`].
#[derive(Clone)]
pub struct PinnedPage {
    frame: Arc<Frame>,
}

impl PinnedPage {
    /// The pinned block number.
    #[must_use]
    pub fn blkno(&self) -> u32 {
        self.frame.blkno
    }

    /// Takes the shared latch.
    #[must_use]
    pub fn read(&self) -> RwLockReadGuard<'_, PageBuf> {
        self.frame.data.read()
    }

    /// Takes the exclusive latch and marks the page dirty.
    #[must_use]
    pub fn write(&self) -> PageWriteGuard<'_> {
        self.frame.dirty.store(true, Ordering::Release);
        PageWriteGuard {
            guard: self.frame.data.write(),
        }
    }
}

/// Exclusive page latch; the page was marked dirty on acquisition.
pub struct PageWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, PageBuf>,
}

impl Deref for PageWriteGuard<'_> {
    type Target = PageBuf;

    fn deref(&self) -> &PageBuf {
        &self.guard
    }
}

impl DerefMut for PageWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut PageBuf {
        &mut self.guard
    }
}

/// The page pool backing one index file.
pub struct Pool {
    file: Mutex<File>,
    frames: RwLock<HashMap<u32, Arc<Frame>>>,
    nblocks: AtomicU32,
    free_list: Mutex<Vec<u32>>,
    tuple_locks: Vec<Mutex<()>>,
}

impl Pool {
    /// Creates a new empty page file, truncating any existing one.
    ///
    /// # Errors
    ///
    /// Propagates filesystem errors.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::with_file(file, 0))
    }

    /// Opens an existing page file.
    ///
    /// # Errors
    ///
    /// Propagates filesystem errors.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let nblocks = (len / PAGE_SIZE as u64) as u32;
        Ok(Self::with_file(file, nblocks))
    }

    fn with_file(file: File, nblocks: u32) -> Self {
        let mut tuple_locks = Vec::with_capacity(TUPLE_LOCK_STRIPES);
        tuple_locks.resize_with(TUPLE_LOCK_STRIPES, || Mutex::new(()));
        Self {
            file: Mutex::new(file),
            frames: RwLock::new(HashMap::new()),
            nblocks: AtomicU32::new(nblocks),
            free_list: Mutex::new(Vec::new()),
            tuple_locks,
        }
    }

    /// Number of blocks in the file, including cached extensions that
    /// have not been flushed yet.
    #[must_use]
    pub fn nblocks(&self) -> u32 {
        self.nblocks.load(Ordering::Acquire)
    }

    /// Pins a page, loading it from disk on first touch.
    ///
    /// # Errors
    ///
    /// Propagates read errors; a block past the end of the file reads
    /// as zeroes (freshly extended, never written).
    pub fn pin(&self, blkno: u32) -> Result<PinnedPage> {
        if let Some(frame) = self.frames.read().get(&blkno) {
            return Ok(PinnedPage {
                frame: Arc::clone(frame),
            });
        }

        let mut frames = self.frames.write();
        if let Some(frame) = frames.get(&blkno) {
            return Ok(PinnedPage {
                frame: Arc::clone(frame),
            });
        }

        let mut page = PageBuf::zeroed();
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(u64::from(blkno) * PAGE_SIZE as u64))?;
            match file.read_exact(&mut page.0) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => page.0.fill(0),
                Err(e) => return Err(e.into()),
            }
        }

        let frame = Arc::new(Frame {
            blkno,
            data: RwLock::new(*page),
            dirty: AtomicBool::new(false),
        });
        frames.insert(blkno, Arc::clone(&frame));
        Ok(PinnedPage { frame })
    }

    /// Allocates a page, preferring blocks returned to the free list.
    /// The returned page is pinned but not latched; the caller
    /// initializes it before linking it anywhere reachable.
    ///
    /// # Errors
    ///
    /// Propagates read errors while probing recycled candidates.
    pub fn new_page(&self) -> Result<PinnedPage> {
        loop {
            let candidate = self.free_list.lock().pop();
            let Some(blkno) = candidate else { break };
            let page = self.pin(blkno)?;
            let reusable = {
                let guard = page.read();
                guard.is_new() || guard.is_deleted()
            };
            if reusable {
                return Ok(page);
            }
            // Someone re-initialized it since it was freed; skip it.
        }

        let blkno = self.nblocks.fetch_add(1, Ordering::AcqRel);
        self.pin(blkno)
    }

    /// Records a block as reusable (the free-space map).
    pub fn record_free(&self, blkno: u32) {
        self.free_list.lock().push(blkno);
    }

    /// Serializes mutations of one tuple's neighbor array.
    #[must_use]
    pub fn tuple_lock(&self, id: NodeId) -> MutexGuard<'_, ()> {
        let key = ((u64::from(id.blkno()) << 16) | u64::from(id.offset()))
            .wrapping_mul(0x9E37_79B9_7F4A_7C15);
        self.tuple_locks[(key >> 32) as usize % TUPLE_LOCK_STRIPES].lock()
    }

    /// Writes every dirty page back to the file and syncs it.
    ///
    /// # Errors
    ///
    /// Propagates write errors; dirty flags are only cleared for pages
    /// that were written.
    pub fn flush(&self) -> Result<()> {
        let mut dirty: Vec<Arc<Frame>> = self
            .frames
            .read()
            .values()
            .filter(|f| f.dirty.load(Ordering::Acquire))
            .map(Arc::clone)
            .collect();
        dirty.sort_by_key(|f| f.blkno);

        let mut file = self.file.lock();
        for frame in dirty {
            let guard = frame.data.read();
            file.seek(SeekFrom::Start(u64::from(frame.blkno) * PAGE_SIZE as u64))?;
            file.write_all(&guard.0)?;
            frame.dirty.store(false, Ordering::Release);
        }
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("failed to flush index pages on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{F_OVERFLOW, PAGE_SIZE};

    #[test]
    fn pin_extend_flush_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.idx");

        {
            let pool = Pool::create(&path).unwrap();
            let p0 = pool.new_page().unwrap();
            assert_eq!(p0.blkno(), 0);
            p0.write().init(F_OVERFLOW, 0);
            let p1 = pool.new_page().unwrap();
            assert_eq!(p1.blkno(), 1);
            {
                let mut guard = p1.write();
                guard.init(F_OVERFLOW, 2);
                guard.opaque_mut().prev_blkno = 0;
            }
            pool.flush().unwrap();
        }

        let pool = Pool::open(&path).unwrap();
        assert_eq!(pool.nblocks(), 2);
        let p1 = pool.pin(1).unwrap();
        let guard = p1.read();
        assert!(guard.is_overflow());
        assert_eq!(guard.opaque().level, 2);
        assert_eq!(guard.opaque().prev_blkno, 0);
    }

    #[test]
    fn free_list_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::create(&dir.path().join("pool.idx")).unwrap();

        let p0 = pool.new_page().unwrap();
        p0.write().init(F_OVERFLOW, 0);
        let p1 = pool.new_page().unwrap();
        {
            let mut guard = p1.write();
            guard.init(F_OVERFLOW, 0);
            guard.set_deleted();
        }

        pool.record_free(p1.blkno());
        let reused = pool.new_page().unwrap();
        assert_eq!(reused.blkno(), p1.blkno());

        // A live page on the free list is skipped.
        pool.record_free(p0.blkno());
        let fresh = pool.new_page().unwrap();
        assert_eq!(fresh.blkno(), 2);
    }

    #[test]
    fn beyond_eof_reads_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::create(&dir.path().join("pool.idx")).unwrap();
        let page = pool.pin(5).unwrap();
        assert!(page.read().is_new());
        assert_eq!(page.read().0.len(), PAGE_SIZE);
    }
}
