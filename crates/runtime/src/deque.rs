//! Chase–Lev work-stealing deque
//!
//! Each worker owns one deque: the owner pushes and pops work items at the
//! bottom, thieves steal from the top. The memory-order discipline follows
//! the classic algorithm:
//!
//! - owner `push`: release fence after the slot store, then publish the new
//!   bottom;
//! - owner `pop`: decrement bottom, seq-cst fence, then read top; when the
//!   deque drains to its last item the owner CASes top and must restore
//!   bottom after a lost race;
//! - thief `steal`: acquire read of top, seq-cst fence, acquire read of
//!   bottom, then a CAS on top claims the item.
//!
//! The ring buffer resizes by doubling under a single resize lock, up to a
//! configured maximum; `push` reports failure beyond that so the caller can
//! overflow into the global submission queue. Retired buffers are kept
//! alive until the deque drops, so a thief holding a stale buffer pointer
//! still reads valid memory (the CAS on top arbitrates actual ownership).

use crate::pool::WorkItem;
use std::sync::atomic::{fence, AtomicIsize, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};

/// Initial ring capacity. Must be a power of two.
const INITIAL_CAPACITY: usize = 64;

/// Ring capacity ceiling; pushes beyond it fail over to the caller.
const MAX_CAPACITY: usize = 8192;

struct Ring {
    slots: Box<[AtomicPtr<WorkItem>]>,
    mask: usize,
}

impl Ring {
    fn new(capacity: usize) -> Ring {
        debug_assert!(capacity.is_power_of_two());
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ring {
            slots,
            mask: capacity - 1,
        }
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn get(&self, index: isize) -> *mut WorkItem {
        self.slots[(index as usize) & self.mask].load(Ordering::Relaxed)
    }

    fn put(&self, index: isize, item: *mut WorkItem) {
        self.slots[(index as usize) & self.mask].store(item, Ordering::Relaxed);
    }
}

/// One worker's deque. `push` and `pop` must only ever be called from the
/// owning worker thread; `steal` is safe from any thread.
pub struct Deque {
    top: AtomicIsize,
    bottom: AtomicIsize,
    ring: AtomicPtr<Ring>,
    /// Guards resizing; also keeps retired rings alive until drop so stale
    /// thief reads stay in-bounds.
    retired: Mutex<Vec<Box<Ring>>>,
}

/// Outcome of a steal attempt.
pub enum Steal {
    Empty,
    /// Lost a race with the owner or another thief; worth retrying.
    Retry,
    Item(Arc<WorkItem>),
}

impl Deque {
    pub fn new() -> Deque {
        let ring = Box::into_raw(Box::new(Ring::new(INITIAL_CAPACITY)));
        Deque {
            top: AtomicIsize::new(0),
            bottom: AtomicIsize::new(0),
            ring: AtomicPtr::new(ring),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Owner push at the bottom. Returns the item back when the ring is at
    /// its maximum capacity and full.
    ///
    /// # Safety contract
    /// Must only be called by the owning worker thread.
    pub fn push(&self, item: Arc<WorkItem>) -> Result<(), Arc<WorkItem>> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let ring = unsafe { &*self.ring.load(Ordering::Relaxed) };
        let size = (b - t) as usize;
        let ring = if size >= ring.capacity() {
            match self.grow(ring, t, b) {
                Some(bigger) => bigger,
                None => return Err(item),
            }
        } else {
            ring
        };
        ring.put(b, Arc::into_raw(item) as *mut WorkItem);
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
        Ok(())
    }

    /// Owner pop from the bottom.
    ///
    /// # Safety contract
    /// Must only be called by the owning worker thread.
    pub fn pop(&self) -> Option<Arc<WorkItem>> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        let ring = unsafe { &*self.ring.load(Ordering::Relaxed) };
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // Already empty: restore bottom.
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        let raw = ring.get(b);
        if t == b {
            // Last item: race thieves for it with a CAS on top, and restore
            // bottom whichever way the race goes.
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b + 1, Ordering::Relaxed);
            if !won {
                return None;
            }
        }
        Some(unsafe { Arc::from_raw(raw) })
    }

    /// Thief steal from the top. Callable from any thread.
    pub fn steal(&self) -> Steal {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);
        if t >= b {
            return Steal::Empty;
        }
        // The ring is read after top and bottom; a concurrent grow leaves
        // the old ring's occupied range intact, and the CAS below is what
        // actually claims the item.
        let ring = unsafe { &*self.ring.load(Ordering::Acquire) };
        let raw = ring.get(t);
        if self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return Steal::Retry;
        }
        Steal::Item(unsafe { Arc::from_raw(raw) })
    }

    /// Approximate occupancy; only used for diagnostics.
    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Double the ring, copying the occupied range. Returns `None` at the
    /// capacity ceiling. Runs under the resize lock; the old ring is
    /// retired, not freed, because thieves may still hold its pointer.
    fn grow(&self, old: &Ring, t: isize, b: isize) -> Option<&Ring> {
        let mut retired = self.retired.lock().expect("deque resize lock poisoned");
        let new_cap = old.capacity() * 2;
        if new_cap > MAX_CAPACITY {
            return None;
        }
        let fresh = Box::new(Ring::new(new_cap));
        for i in t..b {
            fresh.put(i, old.get(i));
        }
        let fresh = Box::into_raw(fresh);
        let old_ptr = self.ring.swap(fresh, Ordering::Release);
        retired.push(unsafe { Box::from_raw(old_ptr) });
        Some(unsafe { &*fresh })
    }
}

impl Drop for Deque {
    fn drop(&mut self) {
        // Drain anything still queued so the Arcs are released.
        let t = self.top.load(Ordering::Relaxed);
        let b = self.bottom.load(Ordering::Relaxed);
        let ring = unsafe { &*self.ring.load(Ordering::Relaxed) };
        for i in t..b {
            let raw = ring.get(i);
            if !raw.is_null() {
                drop(unsafe { Arc::from_raw(raw) });
            }
        }
        drop(unsafe { Box::from_raw(self.ring.load(Ordering::Relaxed)) });
        // Retired rings drop with the mutex contents.
    }
}

// The raw pointers inside are Arcs of Send+Sync work items; the algorithm
// arbitrates ownership with the CAS on top.
unsafe impl Send for Deque {}
unsafe impl Sync for Deque {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn item() -> Arc<WorkItem> {
        WorkItem::new(Box::new(|| {}))
    }

    #[test]
    fn test_push_pop_lifo() {
        let d = Deque::new();
        let (a, b) = (item(), item());
        let (pa, pb) = (Arc::as_ptr(&a), Arc::as_ptr(&b));
        d.push(a).ok().unwrap();
        d.push(b).ok().unwrap();
        assert_eq!(Arc::as_ptr(&d.pop().unwrap()), pb);
        assert_eq!(Arc::as_ptr(&d.pop().unwrap()), pa);
        assert!(d.pop().is_none());
    }

    #[test]
    fn test_steal_fifo_from_top() {
        let d = Deque::new();
        let (a, b) = (item(), item());
        let pa = Arc::as_ptr(&a);
        d.push(a).ok().unwrap();
        d.push(b).ok().unwrap();
        match d.steal() {
            Steal::Item(got) => assert_eq!(Arc::as_ptr(&got), pa),
            _ => panic!("expected steal to take the oldest item"),
        }
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_grow_beyond_initial_capacity() {
        let d = Deque::new();
        for _ in 0..(INITIAL_CAPACITY * 4) {
            d.push(item()).ok().unwrap();
        }
        assert_eq!(d.len(), INITIAL_CAPACITY * 4);
        let mut popped = 0;
        while d.pop().is_some() {
            popped += 1;
        }
        assert_eq!(popped, INITIAL_CAPACITY * 4);
    }

    #[test]
    fn test_push_fails_past_max_capacity() {
        let d = Deque::new();
        let mut accepted = 0usize;
        loop {
            match d.push(item()) {
                Ok(()) => accepted += 1,
                Err(_) => break,
            }
        }
        assert_eq!(accepted, MAX_CAPACITY);
    }

    #[test]
    fn test_concurrent_steal_no_duplication_no_loss() {
        // One owner pushing and popping, several thieves stealing: every
        // item must execute exactly once.
        const ITEMS: usize = 10_000;
        const THIEVES: usize = 4;
        static EXECUTED: AtomicUsize = AtomicUsize::new(0);

        let d = Arc::new(Deque::new());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let thieves: Vec<_> = (0..THIEVES)
            .map(|_| {
                let d = Arc::clone(&d);
                let stop = Arc::clone(&stop);
                thread::spawn(move || loop {
                    match d.steal() {
                        Steal::Item(it) => it.run(),
                        Steal::Retry => std::hint::spin_loop(),
                        Steal::Empty => {
                            if stop.load(Ordering::Acquire) {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        for i in 0..ITEMS {
            let it = WorkItem::new(Box::new(|| {
                EXECUTED.fetch_add(1, Ordering::SeqCst);
            }));
            // Ring may be momentarily full while thieves catch up.
            let mut it = it;
            loop {
                match d.push(it) {
                    Ok(()) => break,
                    Err(back) => {
                        it = back;
                        thread::yield_now();
                    }
                }
            }
            // The owner takes some of its own work back.
            if i % 3 == 0 {
                if let Some(it) = d.pop() {
                    it.run();
                }
            }
        }
        // Drain what the thieves haven't taken.
        while let Some(it) = d.pop() {
            it.run();
        }
        stop.store(true, Ordering::Release);
        for th in thieves {
            th.join().unwrap();
        }
        while let Some(it) = d.pop() {
            it.run();
        }
        assert_eq!(EXECUTED.load(Ordering::SeqCst), ITEMS);
    }
}
