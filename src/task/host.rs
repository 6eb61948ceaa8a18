//! Host-side [`Scheduler`] for the test suite.
//!
//! Maps kernel tasks onto std threads: every thread that touches an
//! exchange object gets a task id on first use, and parking is a
//! `Mutex`/`Condvar` pair per thread. The pending-wake flag implements the
//! wake-pending contract the real scheduler provides, so the blocking
//! paths run unmodified on the host. One tick is one millisecond.

use std::{
    cell::Cell,
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, OnceLock,
    },
    time::{Duration, Instant},
};

use super::{Scheduler, TaskId, Ticks};

thread_local! {
    /// Task id of this thread; 0 means not yet registered.
    static CURRENT: Cell<u64> = Cell::new(0);
}

#[derive(Default)]
struct Parker {
    pending: Mutex<bool>,
    wakeups: Condvar,
}

pub(crate) struct HostScheduler {
    origin: Instant,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, Arc<Parker>>>,
}

impl HostScheduler {
    fn new() -> Self {
        HostScheduler {
            origin: Instant::now(),
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn parker_of(&self, task: TaskId) -> Option<Arc<Parker>> {
        self.tasks.lock().unwrap().get(&task.as_u64()).cloned()
    }
}

impl Scheduler for HostScheduler {
    fn current(&self) -> TaskId {
        CURRENT.with(|current| {
            if current.get() == 0 {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.tasks
                    .lock()
                    .unwrap()
                    .insert(id, Arc::new(Parker::default()));
                current.set(id);
            }
            TaskId(current.get())
        })
    }

    fn now(&self) -> Ticks {
        self.origin.elapsed().as_millis() as Ticks
    }

    fn in_interrupt(&self) -> bool {
        false
    }

    fn block_current(&self, deadline: Option<Ticks>) {
        let me = self.current();
        let parker = self.parker_of(me).expect("calling task is registered");

        let mut pending = parker.pending.lock().unwrap();
        if !*pending {
            match deadline {
                None => {
                    pending = parker.wakeups.wait(pending).unwrap();
                }
                Some(deadline) => {
                    let now = self.now();
                    if deadline > now {
                        let timeout = Duration::from_millis(deadline - now);
                        let (guard, _timed_out) =
                            parker.wakeups.wait_timeout(pending, timeout).unwrap();
                        pending = guard;
                    }
                }
            }
        }
        // Consume the pending wake, whether we parked or not.
        *pending = false;
    }

    fn wake(&self, task: TaskId) -> bool {
        match self.parker_of(task) {
            Some(parker) => {
                *parker.pending.lock().unwrap() = true;
                parker.wakeups.notify_one();
                true
            }
            None => false,
        }
    }
}

/// Register the host scheduler for this test process. Idempotent.
pub(crate) fn install() {
    static HOST: OnceLock<HostScheduler> = OnceLock::new();
    super::set_scheduler(HOST.get_or_init(HostScheduler::new));
}
