//! Channels: the sanctioned cross-task data path
//!
//! A channel has capacity ≥ 0 and one mutex guarding all mutable state,
//! with three condition variables:
//!
//! - `not_empty` wakes one receiver when a value arrives;
//! - `not_full` wakes one sender when buffer space opens (and queues
//!   rendezvous senders waiting for the slot);
//! - `rendezvous` parks a capacity-0 sender until its receiver has taken
//!   the value.
//!
//! Rendezvous semantics: the sender deposits into the single slot, sets
//! `sender_waiting`, signals `not_empty`, and parks on `rendezvous` until
//! the receiver clears the flag — so `send(v)` returns only after `recv`
//! observed `v`.
//!
//! A closed channel never un-closes. `close` broadcasts all three condvars
//! so every waiter re-evaluates its predicate: pending and subsequent sends
//! raise `ChannelClosed`, receives drain the buffer and then return null.
//! All waits loop around their predicate, so spurious wakeups are harmless.

use crate::error::{ErrorKind, RillError};
use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Interval between sweeps in `select`.
const SELECT_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct ChanState {
    /// Ring buffer storage; empty for rendezvous channels.
    buffer: Vec<Option<Value>>,
    /// Next receive position.
    head: usize,
    /// Next send position.
    tail: usize,
    count: usize,
    /// Rendezvous slot (capacity 0 only).
    slot: Option<Value>,
    sender_waiting: bool,
    receiver_waiting: bool,
    closed: bool,
}

/// Outcome of a non-blocking receive attempt (used by `select`).
pub enum TryRecv {
    Empty,
    Value(Value),
    Closed,
}

#[derive(Debug)]
pub struct ChannelObj {
    id: u64,
    capacity: usize,
    state: Mutex<ChanState>,
    not_empty: Condvar,
    not_full: Condvar,
    rendezvous: Condvar,
}

impl ChannelObj {
    /// Capacity 0 builds a rendezvous channel; ≥ 1 a buffered one.
    pub fn new(capacity: usize) -> ChannelObj {
        let mut buffer = Vec::new();
        buffer.resize_with(capacity, || None);
        ChannelObj {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            state: Mutex::new(ChanState {
                buffer,
                head: 0,
                tail: 0,
                count: 0,
                slot: None,
                sender_waiting: false,
                receiver_waiting: false,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            rendezvous: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("channel lock poisoned").closed
    }

    /// Blocking send. Raises `ChannelClosed` if the channel is or becomes
    /// closed before the value is accepted.
    pub fn send(&self, value: Value) -> Result<(), RillError> {
        if self.capacity == 0 {
            self.send_rendezvous(value, None).map(|_| ())
        } else {
            self.send_buffered(value, None).map(|_| ())
        }
    }

    /// Deadline send; `Ok(false)` on expiry.
    pub fn send_timeout(&self, value: Value, timeout: Duration) -> Result<bool, RillError> {
        let deadline = Instant::now() + timeout;
        if self.capacity == 0 {
            self.send_rendezvous(value, Some(deadline))
        } else {
            self.send_buffered(value, Some(deadline))
        }
    }

    fn closed_error(&self) -> RillError {
        RillError::new(ErrorKind::ChannelClosed, "send on closed channel")
    }

    fn send_buffered(&self, value: Value, deadline: Option<Instant>) -> Result<bool, RillError> {
        let mut state = self.state.lock().expect("channel lock poisoned");
        while state.count == self.capacity && !state.closed {
            match deadline {
                None => {
                    state = self
                        .not_full
                        .wait(state)
                        .expect("channel not_full wait failed");
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(false);
                    }
                    let (guard, _) = self
                        .not_full
                        .wait_timeout(state, d - now)
                        .expect("channel not_full wait failed");
                    state = guard;
                }
            }
        }
        if state.closed {
            return Err(self.closed_error());
        }
        let tail = state.tail;
        state.buffer[tail] = Some(value);
        state.tail = (tail + 1) % self.capacity;
        state.count += 1;
        self.not_empty.notify_one();
        Ok(true)
    }

    fn send_rendezvous(&self, value: Value, deadline: Option<Instant>) -> Result<bool, RillError> {
        let mut state = self.state.lock().expect("channel lock poisoned");
        // Queue behind any sender already mid-handoff.
        while state.sender_waiting && !state.closed {
            match deadline {
                None => {
                    state = self
                        .not_full
                        .wait(state)
                        .expect("channel not_full wait failed");
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(false);
                    }
                    let (guard, _) = self
                        .not_full
                        .wait_timeout(state, d - now)
                        .expect("channel not_full wait failed");
                    state = guard;
                }
            }
        }
        if state.closed {
            return Err(self.closed_error());
        }
        state.slot = Some(value);
        state.sender_waiting = true;
        self.not_empty.notify_one();
        // Park until the receiver takes the value.
        while state.sender_waiting && !state.closed {
            match deadline {
                None => {
                    state = self
                        .rendezvous
                        .wait(state)
                        .expect("channel rendezvous wait failed");
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        // Retract the unclaimed value.
                        if state.sender_waiting {
                            state.slot = None;
                            state.sender_waiting = false;
                            self.not_full.notify_one();
                            return Ok(false);
                        }
                        return Ok(true);
                    }
                    let (guard, _) = self
                        .rendezvous
                        .wait_timeout(state, d - now)
                        .expect("channel rendezvous wait failed");
                    state = guard;
                }
            }
        }
        if state.sender_waiting {
            // Closed while still waiting: clear the slot and raise.
            state.slot = None;
            state.sender_waiting = false;
            return Err(self.closed_error());
        }
        Ok(true)
    }

    /// Blocking receive. Returns null once the channel is closed and
    /// drained.
    pub fn recv(&self) -> Result<Value, RillError> {
        if self.capacity == 0 {
            self.recv_rendezvous(None)
        } else {
            self.recv_buffered(None)
        }
    }

    /// Deadline receive; null on expiry.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Value, RillError> {
        let deadline = Instant::now() + timeout;
        if self.capacity == 0 {
            self.recv_rendezvous(Some(deadline))
        } else {
            self.recv_buffered(Some(deadline))
        }
    }

    fn recv_buffered(&self, deadline: Option<Instant>) -> Result<Value, RillError> {
        let mut state = self.state.lock().expect("channel lock poisoned");
        while state.count == 0 && !state.closed {
            match deadline {
                None => {
                    state = self
                        .not_empty
                        .wait(state)
                        .expect("channel not_empty wait failed");
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(Value::Null);
                    }
                    let (guard, _) = self
                        .not_empty
                        .wait_timeout(state, d - now)
                        .expect("channel not_empty wait failed");
                    state = guard;
                }
            }
        }
        if state.count == 0 {
            // Closed and drained.
            return Ok(Value::Null);
        }
        let head = state.head;
        let value = state.buffer[head].take().unwrap_or(Value::Null);
        state.head = (head + 1) % self.capacity;
        state.count -= 1;
        self.not_full.notify_one();
        // The channel's retain transfers to the receiver with `value`.
        Ok(value)
    }

    fn recv_rendezvous(&self, deadline: Option<Instant>) -> Result<Value, RillError> {
        let mut state = self.state.lock().expect("channel lock poisoned");
        state.receiver_waiting = true;
        while !state.sender_waiting && !state.closed {
            match deadline {
                None => {
                    state = self
                        .not_empty
                        .wait(state)
                        .expect("channel not_empty wait failed");
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        state.receiver_waiting = false;
                        return Ok(Value::Null);
                    }
                    let (guard, _) = self
                        .not_empty
                        .wait_timeout(state, d - now)
                        .expect("channel not_empty wait failed");
                    state = guard;
                }
            }
        }
        state.receiver_waiting = false;
        if !state.sender_waiting {
            // Closed with no sender mid-handoff.
            return Ok(Value::Null);
        }
        let value = state.slot.take().unwrap_or(Value::Null);
        state.sender_waiting = false;
        // Wake the parked sender, and let the next queued sender in.
        self.rendezvous.notify_all();
        self.not_full.notify_one();
        Ok(value)
    }

    /// Non-blocking receive attempt for `select`.
    pub fn try_recv(&self) -> TryRecv {
        let mut state = self.state.lock().expect("channel lock poisoned");
        if self.capacity == 0 {
            if state.sender_waiting {
                let value = state.slot.take().unwrap_or(Value::Null);
                state.sender_waiting = false;
                self.rendezvous.notify_all();
                self.not_full.notify_one();
                return TryRecv::Value(value);
            }
            if state.closed {
                return TryRecv::Closed;
            }
            return TryRecv::Empty;
        }
        if state.count > 0 {
            let head = state.head;
            let value = state.buffer[head].take().unwrap_or(Value::Null);
            state.head = (head + 1) % self.capacity;
            state.count -= 1;
            self.not_full.notify_one();
            return TryRecv::Value(value);
        }
        if state.closed {
            return TryRecv::Closed;
        }
        TryRecv::Empty
    }

    /// Close: sticky, broadcast-wakes every waiter on all three condvars.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("channel lock poisoned");
        if state.closed {
            return;
        }
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.rendezvous.notify_all();
        tracing::trace!(channel = self.id, "channel closed");
    }
}

/// Poll a set of channels in order, returning the index and value of the
/// first that is ready or closed (closed ⇒ null value). Sleeps ~1 ms
/// between sweeps; `None` on deadline expiry.
pub fn select(
    channels: &[Arc<ChannelObj>],
    timeout: Option<Duration>,
) -> Option<(usize, Value)> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        for (i, ch) in channels.iter().enumerate() {
            match ch.try_recv() {
                TryRecv::Value(v) => return Some((i, v)),
                TryRecv::Closed => return Some((i, Value::Null)),
                TryRecv::Empty => {}
            }
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return None;
            }
        }
        std::thread::sleep(SELECT_POLL_INTERVAL);
    }
}

/// Readiness wait over raw file descriptors: a pass-through to the OS
/// `poll(2)`. Returns the positions whose revents mask is non-zero.
#[cfg(unix)]
pub fn poll_fds(fds: &[i32], timeout_ms: i32) -> Result<Vec<usize>, RillError> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN | libc::POLLOUT,
            revents: 0,
        })
        .collect();
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        return Err(RillError::new(
            ErrorKind::Io,
            format!("poll failed: {}", std::io::Error::last_os_error()),
        ));
    }
    Ok(pollfds
        .iter()
        .enumerate()
        .filter(|(_, p)| p.revents != 0)
        .map(|(i, _)| i)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_buffered_fifo_order() {
        let ch = ChannelObj::new(4);
        for i in 0..4 {
            ch.send(Value::I32(i)).unwrap();
        }
        for i in 0..4 {
            assert!(matches!(ch.recv().unwrap(), Value::I32(n) if n == i));
        }
    }

    #[test]
    fn test_buffered_blocks_when_full() {
        let ch = Arc::new(ChannelObj::new(2));
        ch.send(Value::I32(1)).unwrap();
        ch.send(Value::I32(2)).unwrap();
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.send(Value::I32(3)))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!sender.is_finished());
        assert!(matches!(ch.recv().unwrap(), Value::I32(1)));
        sender.join().unwrap().unwrap();
        assert!(matches!(ch.recv().unwrap(), Value::I32(2)));
        assert!(matches!(ch.recv().unwrap(), Value::I32(3)));
    }

    #[test]
    fn test_rendezvous_sender_waits_for_receiver() {
        let ch = Arc::new(ChannelObj::new(0));
        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handed_off = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let sender = {
            let ch = Arc::clone(&ch);
            let started = Arc::clone(&started);
            let handed_off = Arc::clone(&handed_off);
            thread::spawn(move || {
                started.store(true, Ordering::SeqCst);
                ch.send(Value::I32(7)).unwrap();
                // Reached only after the receiver took the value.
                handed_off.store(true, Ordering::SeqCst);
            })
        };
        while !started.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));
        assert!(!handed_off.load(Ordering::SeqCst));
        assert!(matches!(ch.recv().unwrap(), Value::I32(7)));
        sender.join().unwrap();
        assert!(handed_off.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_drain_then_null() {
        let ch = ChannelObj::new(2);
        ch.send(Value::str("a")).unwrap();
        ch.send(Value::str("b")).unwrap();
        ch.close();
        assert_eq!(ch.recv().unwrap().to_string(), "a");
        assert_eq!(ch.recv().unwrap().to_string(), "b");
        assert!(ch.recv().unwrap().is_null());
        assert!(ch.recv().unwrap().is_null());
    }

    #[test]
    fn test_send_after_close_raises() {
        let ch = ChannelObj::new(1);
        ch.close();
        let err = ch.send(Value::I32(1)).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::ChannelClosed));
        // Close is sticky and idempotent.
        ch.close();
        assert!(ch.is_closed());
    }

    #[test]
    fn test_close_wakes_pending_receivers() {
        let ch = Arc::new(ChannelObj::new(1));
        let receivers: Vec<_> = (0..3)
            .map(|_| {
                let ch = Arc::clone(&ch);
                thread::spawn(move || ch.recv().unwrap())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        ch.close();
        for r in receivers {
            assert!(r.join().unwrap().is_null());
        }
    }

    #[test]
    fn test_close_wakes_pending_rendezvous_sender() {
        let ch = Arc::new(ChannelObj::new(0));
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.send(Value::I32(1)))
        };
        thread::sleep(Duration::from_millis(20));
        ch.close();
        let err = sender.join().unwrap().unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::ChannelClosed));
    }

    #[test]
    fn test_recv_timeout_expires_to_null() {
        let ch = ChannelObj::new(1);
        let start = Instant::now();
        let v = ch.recv_timeout(Duration::from_millis(30)).unwrap();
        assert!(v.is_null());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_send_timeout_expires_to_false() {
        let ch = ChannelObj::new(1);
        ch.send(Value::I32(1)).unwrap();
        let ok = ch
            .send_timeout(Value::I32(2), Duration::from_millis(30))
            .unwrap();
        assert!(!ok);
        // Rendezvous sender with no receiver retracts its value.
        let rv = ChannelObj::new(0);
        let ok = rv
            .send_timeout(Value::I32(3), Duration::from_millis(30))
            .unwrap();
        assert!(!ok);
        // The retracted value must not be visible to a later receiver.
        assert!(rv.recv_timeout(Duration::from_millis(10)).unwrap().is_null());
    }

    #[test]
    fn test_single_pair_ordering() {
        // Property: single sender/receiver sequence is preserved.
        let ch = Arc::new(ChannelObj::new(3));
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                for i in 0..100 {
                    ch.send(Value::I32(i)).unwrap();
                }
                ch.close();
            })
        };
        let mut got = Vec::new();
        loop {
            let v = ch.recv().unwrap();
            if v.is_null() {
                break;
            }
            let Value::I32(n) = v else { panic!("expected i32") };
            got.push(n);
        }
        sender.join().unwrap();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_select_returns_first_ready() {
        let a = Arc::new(ChannelObj::new(1));
        let b = Arc::new(ChannelObj::new(1));
        b.send(Value::I32(5)).unwrap();
        let (idx, v) = select(&[Arc::clone(&a), Arc::clone(&b)], None).unwrap();
        assert_eq!(idx, 1);
        assert!(matches!(v, Value::I32(5)));
    }

    #[test]
    fn test_select_timeout() {
        let a = Arc::new(ChannelObj::new(1));
        let r = select(&[a], Some(Duration::from_millis(20)));
        assert!(r.is_none());
    }

    #[test]
    fn test_select_reports_closed_channel_as_null() {
        let a = Arc::new(ChannelObj::new(1));
        a.close();
        let (idx, v) = select(&[a], Some(Duration::from_millis(100))).unwrap();
        assert_eq!(idx, 0);
        assert!(v.is_null());
    }

    #[cfg(unix)]
    #[test]
    fn test_poll_fds_passthrough() {
        use std::io::Write;
        // A pipe with pending data polls ready; an empty one does not.
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let ready = poll_fds(&[fds[0]], 0).unwrap();
        assert!(ready.is_empty());
        let mut file = unsafe { <std::fs::File as std::os::fd::FromRawFd>::from_raw_fd(fds[1]) };
        file.write_all(b"x").unwrap();
        let ready = poll_fds(&[fds[0]], 100).unwrap();
        assert_eq!(ready, vec![0]);
        unsafe { libc::close(fds[0]) };
    }
}
