//! Bounded, blocking, FIFO record streams.
//!
//! A stream connects exactly one producer to exactly one consumer; the two
//! open descriptors, [`StreamTx`] and [`StreamRx`], enforce that by
//! ownership. Reads block while the stream is empty, writes block while it
//! is full (capacity 0 means unbounded), and blocking is cooperative: the
//! futures park the calling task's waker in the channel and the peer wakes
//! it on the next transfer. That waker handshake is the only scheduler
//! integration point the channel has, so the same streams work under the
//! worker pool and under a plain `block_on` on the host thread.
//!
//! Descriptors close on drop. A read on a drained, writer-closed stream
//! yields `None`; protocol-level shutdown stays the business of terminate
//! records. [`StreamRx::replace`] splices a different stream under a
//! descriptor without the consumer noticing, which is how combinators
//! redirect inputs mid-flight.

mod set;

pub use set::{MemberId, SetPoll, StreamSet};

use crate::record::Record;
use crate::runtime::monitor::{Monitor, StreamEvent};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

struct Shared {
    id: u64,
    monitor: Option<Arc<dyn Monitor>>,
    state: Mutex<State>,
}

struct State {
    queue: VecDeque<Record>,
    // 0 = unbounded
    capacity: usize,
    reader: Option<Waker>,
    writer: Option<Waker>,
    reader_alive: bool,
    writer_alive: bool,
    obsolete: bool,
}

impl Shared {
    fn event(&self, event: StreamEvent) {
        if let Some(monitor) = &self.monitor {
            monitor.stream(event);
        }
    }
}

/// Creates a stream of the given capacity and opens both descriptors.
pub fn channel(capacity: usize) -> (StreamTx, StreamRx) {
    channel_with(capacity, 0, None)
}

pub(crate) fn channel_with(
    capacity: usize,
    id: u64,
    monitor: Option<Arc<dyn Monitor>>,
) -> (StreamTx, StreamRx) {
    let shared = Arc::new(Shared {
        id,
        monitor,
        state: Mutex::new(State {
            queue: VecDeque::new(),
            capacity,
            reader: None,
            writer: None,
            reader_alive: true,
            writer_alive: true,
            obsolete: false,
        }),
    });
    shared.event(StreamEvent::Created { stream: id });
    (
        StreamTx {
            shared: Arc::clone(&shared),
        },
        StreamRx { shared },
    )
}

/// The write descriptor of a stream. At most one exists per stream.
pub struct StreamTx {
    shared: Arc<Shared>,
}

/// The read descriptor of a stream. At most one exists per stream.
pub struct StreamRx {
    shared: Arc<Shared>,
}

/// The reader went away; the record had nowhere to go and was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stream reader is gone")
    }
}

#[derive(Debug)]
pub enum TryWriteError {
    /// The stream is at capacity; the record is handed back.
    Full(Record),
    /// The reader went away; the record is handed back.
    Disconnected(Record),
}

impl fmt::Display for TryWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("stream is full"),
            Self::Disconnected(_) => f.write_str("stream reader is gone"),
        }
    }
}

impl StreamTx {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Appends a record, suspending while the stream is at capacity.
    pub fn write(&mut self, record: Record) -> WriteFuture<'_> {
        WriteFuture {
            tx: self,
            record: Some(record),
        }
    }

    /// Appends a record if there is room right now, never suspending.
    pub fn try_write(&mut self, record: Record) -> Result<(), TryWriteError> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.reader_alive || state.obsolete {
            return Err(TryWriteError::Disconnected(record));
        }
        if state.capacity != 0 && state.queue.len() >= state.capacity {
            return Err(TryWriteError::Full(record));
        }
        state.queue.push_back(record);
        let reader = state.reader.take();
        drop(state);
        self.shared.event(StreamEvent::Wrote {
            stream: self.shared.id,
        });
        if let Some(waker) = reader {
            waker.wake();
        }
        Ok(())
    }
}

impl Drop for StreamTx {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.writer_alive = false;
        let reader = state.reader.take();
        drop(state);
        if let Some(waker) = reader {
            waker.wake();
        }
    }
}

impl StreamRx {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Removes and returns the head record, suspending while the stream is
    /// empty. `None` once the writer is closed and the queue drained.
    pub fn read(&mut self) -> ReadFuture<'_> {
        ReadFuture { rx: self }
    }

    /// Looks at the head record without removing it, suspending while the
    /// stream is empty. The head is copied out; stream-carrying heads must
    /// be inspected with [`peek_with`](Self::peek_with) instead.
    pub fn peek(&mut self) -> PeekFuture<'_, fn(&Record) -> Record, Record> {
        self.peek_with(Record::clone as fn(&Record) -> Record)
    }

    /// Applies `f` to the head record without removing or copying it,
    /// suspending while the stream is empty.
    pub fn peek_with<F, R>(&mut self, f: F) -> PeekFuture<'_, F, R>
    where
        F: FnOnce(&Record) -> R + Unpin,
    {
        PeekFuture { rx: self, f: Some(f) }
    }

    /// Redirects this descriptor to another stream, returning a descriptor
    /// for the previously attached one. The consumer side of `self` keeps
    /// its handle; only the channel underneath changes.
    pub fn replace(&mut self, other: StreamRx) -> StreamRx {
        std::mem::replace(self, other)
    }

    /// Marks the stream obsolete: queued records are discarded, subsequent
    /// reads yield `None` and writes fail. Supports tearing a stream down
    /// while records are still in flight.
    pub fn mark_obsolete(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.obsolete = true;
        state.queue.clear();
        let writer = state.writer.take();
        drop(state);
        if let Some(waker) = writer {
            waker.wake();
        }
    }
}

impl Drop for StreamRx {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.reader_alive = false;
        let writer = state.writer.take();
        drop(state);
        if let Some(waker) = writer {
            waker.wake();
        }
    }
}

impl fmt::Debug for StreamTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamTx({})", self.shared.id)
    }
}

impl fmt::Debug for StreamRx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamRx({})", self.shared.id)
    }
}

pub struct WriteFuture<'a> {
    tx: &'a mut StreamTx,
    record: Option<Record>,
}

impl Future for WriteFuture<'_> {
    type Output = Result<(), Disconnected>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let shared = Arc::clone(&this.tx.shared);
        let mut state = shared.state.lock().unwrap();
        if !state.reader_alive || state.obsolete {
            // The record is dropped here; the graph downstream is gone.
            this.record = None;
            return Poll::Ready(Err(Disconnected));
        }
        if state.capacity != 0 && state.queue.len() >= state.capacity {
            state.writer = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let record = this
            .record
            .take()
            .unwrap_or_else(|| panic!("write future polled after completion"));
        state.queue.push_back(record);
        let reader = state.reader.take();
        drop(state);
        shared.event(StreamEvent::Wrote { stream: shared.id });
        if let Some(waker) = reader {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

pub struct ReadFuture<'a> {
    rx: &'a mut StreamRx,
}

impl Future for ReadFuture<'_> {
    type Output = Option<Record>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let shared = Arc::clone(&this.rx.shared);
        let mut state = shared.state.lock().unwrap();
        if let Some(record) = state.queue.pop_front() {
            let writer = state.writer.take();
            drop(state);
            shared.event(StreamEvent::Read { stream: shared.id });
            if let Some(waker) = writer {
                waker.wake();
            }
            return Poll::Ready(Some(record));
        }
        if !state.writer_alive || state.obsolete {
            return Poll::Ready(None);
        }
        state.reader = Some(cx.waker().clone());
        Poll::Pending
    }
}

pub struct PeekFuture<'a, F, R>
where
    F: FnOnce(&Record) -> R + Unpin,
{
    rx: &'a mut StreamRx,
    f: Option<F>,
}

impl<F, R> Future for PeekFuture<'_, F, R>
where
    F: FnOnce(&Record) -> R + Unpin,
{
    type Output = Option<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.rx.shared.state.lock().unwrap();
        if let Some(record) = state.queue.front() {
            let f = this
                .f
                .take()
                .unwrap_or_else(|| panic!("peek future polled after completion"));
            return Poll::Ready(Some(f(record)));
        }
        if !state.writer_alive || state.obsolete {
            return Poll::Ready(None);
        }
        state.reader = Some(cx.waker().clone());
        Poll::Pending
    }
}
