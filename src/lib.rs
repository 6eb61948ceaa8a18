//! Blocking inter-task exchange primitives for a cooperative real-time
//! kernel.
//!
//! Two independent objects, both built on the same wait-queue machinery:
//!
//! - [`Mailbox`] — a FIFO list of caller-owned message blocks
//!   ([`Envelope`]s) with blocking receive and infallible send.
//! - [`StreamBuffer`] — a fixed-capacity circular byte buffer with atomic
//!   (all-or-nothing) variable-length blocking transfers.
//!
//! The crate does not schedule tasks. It reaches the host kernel's
//! scheduler through the [`task::Scheduler`] trait, registered once per
//! kernel image with [`task::set_scheduler`]. Heap-created objects and
//! message envelopes come from the global allocator.
//!
//! Every blocking operation resolves to one of three outcomes: `Ok`
//! (success), [`IpcError::Timeout`] (nothing to transfer now, or the
//! deadline elapsed) or [`IpcError::Stopped`] (the object was killed while
//! the task waited). Wake order is strict FIFO arrival; there is no
//! priority-based wake ordering.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ipc;
pub mod sync;
pub mod task;

pub use ipc::{Envelope, IpcError, Mailbox, StreamBuffer};
pub use task::{set_scheduler, Scheduler, TaskId, Ticks, FOREVER};
