//! Sets of read descriptors polled together.
//!
//! Collectors own many inputs whose number changes while they run. A
//! [`StreamSet`] keeps those descriptors, lets members come and go between
//! polls, and suspends the owning task until any member has a record. Member
//! order is insertion order, which the deterministic merge relies on.

use super::StreamRx;
use crate::record::Record;
use crate::runtime::monitor::StreamEvent;
use indexmap::IndexMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Identity of a member within one set. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(u64);

/// Outcome of polling a set.
#[derive(Debug)]
pub enum SetPoll {
    /// The set has no members.
    Empty,
    /// This member's writer closed without a terminate record; the caller
    /// should remove it.
    Closed(MemberId),
    Item(MemberId, Record),
}

pub struct StreamSet {
    members: IndexMap<MemberId, StreamRx>,
    next_id: u64,
    cursor: usize,
}

impl Default for StreamSet {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSet {
    pub fn new() -> Self {
        Self {
            members: IndexMap::new(),
            next_id: 0,
            cursor: 0,
        }
    }

    pub fn put(&mut self, rx: StreamRx) -> MemberId {
        let id = MemberId(self.next_id);
        self.next_id += 1;
        self.members.insert(id, rx);
        id
    }

    /// Removes a member, preserving the order of the remaining ones.
    pub fn remove(&mut self, id: MemberId) -> Option<StreamRx> {
        self.members.shift_remove(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Snapshot of member ids in insertion order. Walking the snapshot
    /// stays valid while members are inserted or removed.
    pub fn members(&self) -> Vec<MemberId> {
        self.members.keys().copied().collect()
    }

    pub fn get_mut(&mut self, id: MemberId) -> Option<&mut StreamRx> {
        self.members.get_mut(&id)
    }

    /// Takes a record from any ready member, suspending until one is ready.
    /// Fair: consecutive polls start the scan after the last served member.
    pub fn poll_any(&mut self) -> PollAnyFuture<'_> {
        PollAnyFuture { set: self }
    }
}

pub struct PollAnyFuture<'a> {
    set: &'a mut StreamSet,
}

impl Future for PollAnyFuture<'_> {
    type Output = SetPoll;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let set = &mut *self.get_mut().set;
        if set.members.is_empty() {
            return Poll::Ready(SetPoll::Empty);
        }
        let len = set.members.len();
        let start = set.cursor % len;
        // One pass over all members. Under each member's lock we either take
        // its head or park our waker there, so a write racing with the scan
        // either lands in a queue we have not reached yet or finds our waker
        // already registered. No lost wakeups either way.
        for offset in 0..len {
            let index = (start + offset) % len;
            let (id, rx) = match set.members.get_index_mut(index) {
                Some(entry) => (*entry.0, entry.1),
                None => continue,
            };
            let mut state = rx.shared.state.lock().unwrap();
            if let Some(record) = state.queue.pop_front() {
                let writer = state.writer.take();
                drop(state);
                rx.shared.event(StreamEvent::Read {
                    stream: rx.shared.id,
                });
                if let Some(waker) = writer {
                    waker.wake();
                }
                set.cursor = index + 1;
                return Poll::Ready(SetPoll::Item(id, record));
            }
            if !state.writer_alive || state.obsolete {
                drop(state);
                set.cursor = index + 1;
                return Poll::Ready(SetPoll::Closed(id));
            }
            state.reader = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}
