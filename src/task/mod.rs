//! Seam to the host kernel's scheduler.
//!
//! The exchange objects never schedule anything themselves. Everything
//! they need from the scheduler is behind the [`Scheduler`] trait:
//! identifying the running task, reading the monotonic tick clock,
//! detecting interrupt context, parking the running task with an optional
//! deadline, and waking a specific task.
//!
//! ## Wake-pending contract
//!
//! [`Scheduler::wake`] and [`Scheduler::block_current`] must together
//! guarantee that a wakeup is never lost, even when it races with the
//! transition into the parked state:
//!
//! - a `wake(id)` delivered before task `id` parks must make the next
//!   `block_current` return immediately (a pending-wake flag);
//! - a `wake(id)` delivered after the task has already resumed may leave
//!   the flag set; the only effect is one spurious early return from a
//!   later `block_current`, which callers absorb by re-checking their
//!   wait entry.
//!
//! `block_current` may also return spuriously at any time; callers never
//! rely on a return meaning "woken".
//!
//! ## Registration
//!
//! Exactly one scheduler serves a kernel image. The port registers it once
//! with [`set_scheduler`] before the first exchange object is used; later
//! registrations are ignored. Calling into an object's blocking or waking
//! paths with no scheduler registered is a programming defect and panics.

use spin::Once;

#[cfg(test)]
pub(crate) mod host;

/// Monotonic kernel time, in ticks. Tick length is the port's choice.
pub type Ticks = u64;

/// Relative delay that never elapses.
pub const FOREVER: Ticks = Ticks::MAX;

/// Identifier of a kernel task, assigned by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the raw u64 value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a raw u64.
    pub fn from_u64(raw: u64) -> Self {
        TaskId(raw)
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the exchange objects consume from the host scheduler.
pub trait Scheduler: Sync {
    /// Id of the task invoking the current operation.
    fn current(&self) -> TaskId;

    /// Monotonic tick counter.
    fn now(&self) -> Ticks;

    /// True while executing in interrupt context.
    ///
    /// Blocking operations assert this is false; parking is not
    /// interrupt-safe.
    fn in_interrupt(&self) -> bool;

    /// Park the calling task until [`Scheduler::wake`] targets it or the
    /// absolute `deadline` (in ticks) elapses; `None` parks forever.
    ///
    /// Must honor the wake-pending contract described at module level and
    /// must return without parking when the deadline already passed.
    fn block_current(&self, deadline: Option<Ticks>);

    /// Unblock `task`, setting its pending-wake flag if it has not parked
    /// yet. Returns true if the task was known to the scheduler.
    fn wake(&self, task: TaskId) -> bool;
}

static SCHEDULER: Once<&'static dyn Scheduler> = Once::new();

/// Register the scheduler serving this kernel image.
///
/// The first call wins; later calls are ignored.
pub fn set_scheduler(scheduler: &'static dyn Scheduler) {
    SCHEDULER.call_once(|| scheduler);
}

fn scheduler() -> &'static dyn Scheduler {
    *SCHEDULER
        .get()
        .expect("no scheduler registered; call task::set_scheduler first")
}

/// Id of the running task.
pub fn current() -> TaskId {
    scheduler().current()
}

/// Monotonic tick counter.
pub fn now() -> Ticks {
    scheduler().now()
}

/// True while executing in interrupt context.
pub fn in_interrupt() -> bool {
    scheduler().in_interrupt()
}

pub(crate) fn block_current(deadline: Option<Ticks>) {
    scheduler().block_current(deadline);
}

pub(crate) fn wake(task: TaskId) -> bool {
    scheduler().wake(task)
}

/// Absolute deadline for a relative delay; [`FOREVER`] never elapses.
pub(crate) fn deadline_for(delay: Ticks) -> Option<Ticks> {
    if delay == FOREVER {
        None
    } else {
        Some(now().saturating_add(delay))
    }
}
