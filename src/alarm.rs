// One-shot deadline alarm.
//
// A dedicated named thread performs a bounded condition-variable wait until
// the deadline. Cancellation flips a flag and signals the thread; it never
// waits for the callback to run, so it is safe to cancel while holding locks
// the callback itself may want.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

struct AlarmShared {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// A pending deadline. The callback receives `true` when the deadline fired
/// and `false` when the alarm was cancelled first.
pub struct Alarm {
    shared: Arc<AlarmShared>,
}

impl Alarm {
    pub fn new(deadline: Instant, on_fire: impl FnOnce(bool) + Send + 'static) -> Alarm {
        let shared = Arc::new(AlarmShared {
            cancelled: Mutex::new(false),
            signal: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let spawn = thread::Builder::new()
            .name("rpc-alarm".to_string())
            .spawn(move || {
                let mut cancelled = thread_shared.cancelled.lock();
                while !*cancelled {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread_shared.signal.wait_for(&mut cancelled, deadline - now);
                }
                let fired = !*cancelled;
                drop(cancelled);
                on_fire(fired);
            });
        if let Err(e) = spawn {
            tracing::error!("failed to spawn alarm thread: {}", e);
        }
        Alarm { shared }
    }

    /// Cancels the alarm if it has not fired yet. Cancelling a fired alarm
    /// is a no-op.
    pub fn cancel(&self) {
        let mut cancelled = self.shared.cancelled.lock();
        *cancelled = true;
        self.shared.signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::time::Duration;

    const IDLE: u8 = 0;
    const FIRED: u8 = 1;
    const CANCELLED: u8 = 2;

    #[test]
    fn test_alarm_fires_at_deadline() {
        let outcome = Arc::new(AtomicU8::new(IDLE));
        let seen = outcome.clone();
        let _alarm = Alarm::new(Instant::now() + Duration::from_millis(20), move |fired| {
            seen.store(if fired { FIRED } else { CANCELLED }, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(200));
        assert_eq!(outcome.load(Ordering::SeqCst), FIRED);
    }

    #[test]
    fn test_cancel_suppresses_firing() {
        let outcome = Arc::new(AtomicU8::new(IDLE));
        let seen = outcome.clone();
        let alarm = Alarm::new(Instant::now() + Duration::from_millis(200), move |fired| {
            seen.store(if fired { FIRED } else { CANCELLED }, Ordering::SeqCst);
        });

        alarm.cancel();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(outcome.load(Ordering::SeqCst), CANCELLED);
    }
}
