// Completion queue: the upward notification channel to the application.
//
// A batch reserves a completion with `begin_op` before any asynchronous work
// starts and posts it with `end_op` once every operation in the batch has
// resolved. Events land in a lock-free queue; consumers drain them with
// `next`, blocking on a condition variable when the queue is dry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};

static NEXT_POLLSET: AtomicUsize = AtomicUsize::new(1);

/// Opaque handle to the I/O-readiness set this queue is polling.
///
/// Bound onto an outbound transport op so the stack can make progress on the
/// thread that is draining this queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pollset(usize);

/// One posted completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    pub tag: u64,
    pub success: bool,
}

pub struct CompletionQueue {
    events: SegQueue<CompletionEvent>,
    pending: AtomicUsize,
    wake_lock: Mutex<()>,
    wake: Condvar,
    pollset: Pollset,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self {
            events: SegQueue::new(),
            pending: AtomicUsize::new(0),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            pollset: Pollset(NEXT_POLLSET.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Reserves a completion that a later `end_op` will post.
    pub fn begin_op(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Posts a reserved completion and wakes any blocked consumer.
    pub fn end_op(&self, tag: u64, success: bool) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.events.push(CompletionEvent { tag, success });
        // Notify under the lock so a consumer between its recheck and its
        // wait cannot miss the wakeup.
        let _wake = self.wake_lock.lock();
        self.wake.notify_all();
    }

    /// Blocks up to `timeout` for the next event.
    pub fn next(&self, timeout: Duration) -> Option<CompletionEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.events.pop() {
                return Some(event);
            }
            let mut wake = self.wake_lock.lock();
            // Recheck under the lock: an event posted since the pop above
            // must not be slept through.
            if let Some(event) = self.events.pop() {
                return Some(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.wake.wait_for(&mut wake, deadline - now);
        }
    }

    /// Returns an already-posted event without blocking.
    pub fn try_next(&self) -> Option<CompletionEvent> {
        self.events.pop()
    }

    /// Completions reserved but not yet posted.
    pub fn pending_ops(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn pollset(&self) -> Pollset {
        self.pollset
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_begin_end_next() {
        let cq = CompletionQueue::new();
        cq.begin_op();
        assert_eq!(cq.pending_ops(), 1);

        cq.end_op(7, true);
        assert_eq!(cq.pending_ops(), 0);

        let event = cq.next(Duration::from_millis(100)).unwrap();
        assert_eq!(event.tag, 7);
        assert!(event.success);
    }

    #[test]
    fn test_next_times_out_when_idle() {
        let cq = CompletionQueue::new();
        assert!(cq.next(Duration::from_millis(10)).is_none());
        assert!(cq.try_next().is_none());
    }

    #[test]
    fn test_next_wakes_on_cross_thread_post() {
        let cq = Arc::new(CompletionQueue::new());
        cq.begin_op();

        let poster = cq.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            poster.end_op(42, true);
        });

        let event = cq.next(Duration::from_secs(2)).expect("posted event");
        assert_eq!(event.tag, 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_pollsets_are_distinct() {
        let a = CompletionQueue::new();
        let b = CompletionQueue::new();
        assert_ne!(a.pollset(), b.pollset());
    }
}
