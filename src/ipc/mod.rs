//! Inter-task exchange objects.
//!
//! Two independent blocking primitives, both serialized by a per-object
//! [`SpinLock`](crate::sync::SpinLock) and both waking strictly in FIFO
//! arrival order:
//!
//! - [`Mailbox`] - an unbounded FIFO chain of caller-owned
//!   [`Envelope`]s with blocking receive and infallible send.
//! - [`StreamBuffer`] - a fixed-capacity circular byte buffer with
//!   all-or-nothing variable-length transfers and blocking send/receive.
//!
//! Blocking variants take a relative delay (`*_for`, in ticks, with
//! [`FOREVER`](crate::task::FOREVER) meaning no deadline) or an absolute
//! deadline (`*_until`). A delay of zero degenerates to the non-blocking
//! form.

pub mod mailbox;
pub mod stream;


pub use mailbox::{Envelope, Mailbox};
pub use stream::StreamBuffer;

/// Why a blocking exchange operation did not succeed.
///
/// `Ok` is the third reason: the transfer happened in full. Immediate
/// failures and elapsed deadlines are deliberately not distinguished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    #[error("nothing to transfer now, or the deadline elapsed")]
    Timeout,
    #[error("object killed while waiting")]
    Stopped,
}
