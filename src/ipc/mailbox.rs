//! Mailbox - FIFO handoff of caller-owned message blocks.
//!
//! A [`Mailbox`] carries whole [`Envelope`]s rather than copies of their
//! contents. An envelope is the caller's own heap block: a small header
//! (the chain link) followed by the payload. Pending envelopes are chained
//! through that link, so the mailbox itself never allocates; `give` either
//! hands the envelope straight to the longest-waiting receiver or splices
//! it onto the chain tail, and `take` unlinks the head.
//!
//! Receive blocks; send never does. The chain is unbounded, so a producer
//! always succeeds and unconditionally gives up ownership of the envelope.

use alloc::{boxed::Box, sync::Arc};

use crate::{
    ipc::IpcError,
    sync::{
        waitqueue::{self, WaitQueue},
        SpinLock,
    },
    task::{self, Ticks},
};

/// A caller-owned message block: the hidden chain link plus the payload.
///
/// Envelopes live on the heap (`Box`); the mailbox links them through
/// `next` without further allocation. Between `give` and `take` an
/// envelope is owned by the mailbox and by no task.
#[derive(Debug)]
pub struct Envelope<T> {
    next: Option<Box<Envelope<T>>>,
    payload: T,
}

impl<T> Envelope<T> {
    /// Wrap a payload in a fresh, unchained envelope.
    pub fn new(payload: T) -> Box<Self> {
        Box::new(Envelope {
            next: None,
            payload,
        })
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Unwrap the payload, releasing the block.
    pub fn into_inner(self: Box<Self>) -> T {
        self.payload
    }
}

/// Request record of a blocked receiver: the handoff slot a producer
/// fills. Consumed exactly once, by the resumed receiver.
type Handoff<T> = Option<Box<Envelope<T>>>;

struct MailState<T> {
    /// Singly linked chain of pending envelopes, oldest first.
    chain: Option<Box<Envelope<T>>>,
    /// Receivers blocked on an empty chain, in arrival order.
    queue: WaitQueue<Handoff<T>>,
}

/// FIFO message list with blocking receive.
pub struct Mailbox<T> {
    state: SpinLock<MailState<T>>,
}

impl<T> Mailbox<T> {
    /// Create an empty mailbox in place (usable as a `static`).
    pub const fn new() -> Self {
        Mailbox {
            state: SpinLock::new(MailState {
                chain: None,
                queue: WaitQueue::new(),
            }),
        }
    }

    /// Create an empty mailbox on the heap.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Non-blocking receive.
    ///
    /// Unlinks and returns the head envelope, or fails with
    /// [`IpcError::Timeout`] when the chain is empty. Never waits.
    pub fn take(&self) -> Result<Box<Envelope<T>>, IpcError> {
        let mut state = self.state.lock();
        unlink_head(&mut state.chain).ok_or(IpcError::Timeout)
    }

    /// Receive, blocking up to `delay` ticks
    /// ([`FOREVER`](crate::task::FOREVER) blocks indefinitely).
    pub fn wait_for(&self, delay: Ticks) -> Result<Box<Envelope<T>>, IpcError> {
        self.wait(task::deadline_for(delay))
    }

    /// Receive, blocking until the absolute tick `deadline`.
    pub fn wait_until(&self, deadline: Ticks) -> Result<Box<Envelope<T>>, IpcError> {
        self.wait(Some(deadline))
    }

    fn wait(&self, deadline: Option<Ticks>) -> Result<Box<Envelope<T>>, IpcError> {
        debug_assert!(!task::in_interrupt(), "mailbox wait in interrupt context");

        let entry = {
            let mut state = self.state.lock();
            if let Some(envelope) = unlink_head(&mut state.chain) {
                return Ok(envelope);
            }
            state.queue.enqueue(None)
        };

        waitqueue::block_on(
            &self.state,
            |state: &mut MailState<T>| &mut state.queue,
            &entry,
            deadline,
        )?;

        Ok(entry
            .with_record(Option::take)
            .expect("woken receiver holds an envelope"))
    }

    /// Send an envelope. Never fails; ownership transfers unconditionally.
    ///
    /// If a receiver is already blocked, the longest-waiting one gets the
    /// envelope directly and the chain is not touched. Otherwise the
    /// envelope is appended at the chain tail.
    pub fn give(&self, mut envelope: Box<Envelope<T>>) {
        envelope.next = None;

        let wake = {
            let mut state = self.state.lock();
            match state.queue.pop() {
                Some(receiver) => {
                    receiver.with_record(move |slot| *slot = Some(envelope));
                    receiver.complete(Ok(()));
                    Some(receiver.task())
                }
                None => {
                    let mut tail = &mut state.chain;
                    while let Some(linked) = tail {
                        tail = &mut linked.next;
                    }
                    *tail = Some(envelope);
                    None
                }
            }
        };

        if let Some(receiver) = wake {
            task::wake(receiver);
        }
    }

    /// Force-release every blocked receiver with [`IpcError::Stopped`].
    ///
    /// Chained, unclaimed envelopes stay in place; the mailbox remains
    /// usable afterwards.
    pub fn kill(&self) {
        let stopped = {
            let mut state = self.state.lock();
            let entries = state.queue.take_all();
            for entry in &entries {
                entry.complete(Err(IpcError::Stopped));
            }
            entries
        };

        if !stopped.is_empty() {
            log::debug!("mailbox: kill released {} blocked receiver(s)", stopped.len());
        }
        for entry in stopped {
            task::wake(entry.task());
        }
    }

    /// Number of chained, unclaimed envelopes. O(n) tail walk.
    pub fn backlog(&self) -> usize {
        let state = self.state.lock();
        let mut pending = 0;
        let mut cursor = &state.chain;
        while let Some(envelope) = cursor {
            pending += 1;
            cursor = &envelope.next;
        }
        pending
    }

    /// Number of receivers currently blocked on this mailbox.
    pub fn waiters(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Mailbox<T> {
    fn drop(&mut self) {
        self.kill();
    }
}

fn unlink_head<T>(chain: &mut Option<Box<Envelope<T>>>) -> Option<Box<Envelope<T>>> {
    chain.take().map(|mut head| {
        *chain = head.next.take();
        head
    })
}
