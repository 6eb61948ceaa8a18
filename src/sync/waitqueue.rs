//! Wait queue for tasks blocked on an exchange object.
//!
//! ## Overview
//!
//! A [`WaitQueue`] is a FIFO list of [`WaitEntry`]s, one per blocked task.
//! Unlike a bare condition variable, an entry carries the blocked
//! operation's *request record*: the parameters the waking side needs to
//! finish the operation on the sleeper's behalf (a handoff slot for a
//! mailbox receiver, a staged byte request for a stream reader or writer).
//! The waker inspects the record, transfers data, decides the wake reason
//! and only then wakes the task, so the sleeper resumes with its operation
//! already concluded.
//!
//! The queue itself is plain data. It lives inside the object's
//! [`SpinLock`] and is only touched while that lock is held; entries are
//! shared (`Arc`) between the queue and the blocked task, with a private
//! spinlock around the record and reason.
//!
//! ## Completion happens exactly once
//!
//! An entry's reason is decided by exactly one of three parties: a waker
//! that dequeued it, the deadline check in [`block_on`], or the object's
//! kill path. Dequeueing and completing happen under the object lock, so
//! the parties cannot race; [`WaitEntry::complete`] asserts the reason was
//! not already set. Once a task resumes, its record has been consumed and
//! the entry is never touched again.
//!
//! ## Lost-wakeup guarantee
//!
//! [`block_on`] re-checks the entry under the object lock before every
//! park. A wakeup that races with the transition into the parked state is
//! handled by the scheduler's pending-wake flag (see [`crate::task`]): the
//! park returns immediately and the loop observes the decided reason. A
//! stale pending wake only costs one spurious re-check.

use alloc::{collections::VecDeque, sync::Arc};

use crate::{
    ipc::IpcError,
    sync::SpinLock,
    task::{self, TaskId, Ticks},
};

/// FIFO queue of blocked-task entries, each carrying a request record `R`.
pub(crate) struct WaitQueue<R> {
    entries: VecDeque<Arc<WaitEntry<R>>>,
}

impl<R> WaitQueue<R> {
    /// Create a new empty wait queue.
    pub(crate) const fn new() -> Self {
        WaitQueue {
            entries: VecDeque::new(),
        }
    }

    /// Append an entry for the calling task, with its request record.
    ///
    /// Must run under the object lock, after the operation's immediate
    /// check failed. The returned handle is what the caller passes to
    /// [`block_on`] after releasing the lock.
    pub(crate) fn enqueue(&mut self, record: R) -> Arc<WaitEntry<R>> {
        let entry = Arc::new(WaitEntry {
            task: task::current(),
            slot: SpinLock::new(Slot {
                record,
                reason: None,
            }),
        });
        self.entries.push_back(entry.clone());
        entry
    }

    /// The longest-waiting entry, without dequeueing it.
    pub(crate) fn front(&self) -> Option<&Arc<WaitEntry<R>>> {
        self.entries.front()
    }

    /// Dequeue the longest-waiting entry.
    pub(crate) fn pop(&mut self) -> Option<Arc<WaitEntry<R>>> {
        self.entries.pop_front()
    }

    /// Unlink a specific entry; true if it was still queued.
    pub(crate) fn remove(&mut self, entry: &Arc<WaitEntry<R>>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|queued| !Arc::ptr_eq(queued, entry));
        self.entries.len() != before
    }

    /// Dequeue every entry, in FIFO order. Used by kill.
    pub(crate) fn take_all(&mut self) -> VecDeque<Arc<WaitEntry<R>>> {
        core::mem::take(&mut self.entries)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<WaitEntry<R>>> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One blocked task: its id, its request record and its wake reason.
pub(crate) struct WaitEntry<R> {
    task: TaskId,
    slot: SpinLock<Slot<R>>,
}

struct Slot<R> {
    record: R,
    reason: Option<Result<(), IpcError>>,
}

impl<R> WaitEntry<R> {
    /// Task to pass to [`task::wake`] once the reason is decided.
    pub(crate) fn task(&self) -> TaskId {
        self.task
    }

    /// Inspect or consume the request record.
    pub(crate) fn with_record<O>(&self, f: impl FnOnce(&mut R) -> O) -> O {
        f(&mut self.slot.lock().record)
    }

    /// Decide the wake reason. Callable once, after dequeueing the entry.
    pub(crate) fn complete(&self, reason: Result<(), IpcError>) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.reason.is_none(), "wait entry completed twice");
        slot.reason = Some(reason);
    }

    /// The decided reason, if any. Used by [`block_on`] and by tests that
    /// exercise the drain passes directly.
    pub(crate) fn reason(&self) -> Option<Result<(), IpcError>> {
        self.slot.lock().reason
    }
}

/// Park the calling task until its entry is completed or `deadline`
/// (absolute ticks, `None` = forever) elapses.
///
/// The entry must already be queued and the object lock released. On
/// `Err(Timeout)` the entry has been unlinked from `queue`; on any other
/// outcome the waker unlinked it before completing it. Either way the
/// entry is out of the queue when this returns, and a waker decision
/// always takes precedence over a concurrently elapsing deadline.
pub(crate) fn block_on<S, R>(
    lock: &SpinLock<S>,
    queue: fn(&mut S) -> &mut WaitQueue<R>,
    entry: &Arc<WaitEntry<R>>,
    deadline: Option<Ticks>,
) -> Result<(), IpcError> {
    loop {
        {
            let mut state = lock.lock();
            if let Some(reason) = entry.reason() {
                return reason;
            }
            if let Some(at) = deadline {
                if task::now() >= at {
                    let _removed = queue(&mut state).remove(entry);
                    debug_assert!(_removed, "timed-out entry no longer queued");
                    return Err(IpcError::Timeout);
                }
            }
        }
        task::block_current(deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::host;

    #[test]
    fn entries_leave_in_arrival_order() {
        host::install();

        let mut queue = WaitQueue::new();
        let first = queue.enqueue('a');
        let second = queue.enqueue('b');
        assert_eq!(queue.len(), 2);

        let popped = queue.pop().unwrap();
        assert!(Arc::ptr_eq(&popped, &first));
        assert!(queue.remove(&second));
        assert!(!queue.remove(&second));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn record_is_shared_with_the_waker() {
        host::install();

        let mut queue = WaitQueue::new();
        let entry = queue.enqueue(0u32);
        entry.with_record(|record| *record = 7);
        entry.complete(Ok(()));

        assert_eq!(entry.reason(), Some(Ok(())));
        assert_eq!(entry.with_record(|record| *record), 7);
    }
}
