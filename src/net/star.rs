//! Iterated composition. A star threads records through repeated instances
//! of its body until they match an exit pattern. The chain unfolds lazily:
//! each stage owns an exit stream feeding the star's collector, and wires
//! the body plus the next stage only when a record actually continues.
//!
//! A new stage is announced with a `Collect` record sent down the previous
//! stage's exit stream. Announcements and records share one ordered stream,
//! so the collector always learns about a stage before anything the stage
//! produced.
//!
//! In deterministic mode the first stage numbers every incoming record, and
//! each later stage re-brackets: one batch in, one batch out on the exit
//! side and one into the body while it lives. Every stream involved carries
//! every number from the moment it exists, which is what lets the collector
//! skip absent batches without waiting.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::label::Variant;
use crate::record::{DataRecord, Record, SortMark};
use crate::runtime::sched::EntityKind;
use crate::runtime::stream::{StreamRx, StreamTx};

use super::{collect, write_batch, DetStamp, Mode, NetFn, RouteInfo, SpawnCtx};

/// Composes `body` under iteration: records matching any of `exits` leave,
/// everything else goes through the body and is considered again.
/// [`Mode::Det`] keeps the merged output in input order.
pub fn star(body: NetFn, exits: Vec<Variant>, mode: Mode) -> NetFn {
    let exits: Arc<[Variant]> = exits.into();
    Arc::new(move |ctx: &mut SpawnCtx, input: StreamRx| {
        let (det, level) = match mode {
            Mode::Det => (Some(ctx.det_level() + 1), ctx.det_level() + 1),
            Mode::Nondet => (None, 0),
        };
        let (exit_tx, exit_rx) = ctx.stream();
        let out = collect::spawn(ctx, vec![exit_rx], det);
        let stage = Stage {
            base: ctx.clone(),
            index: 0,
            body: Arc::clone(&body),
            exits: Arc::clone(&exits),
            mode,
            level,
            input,
            exit: exit_tx,
            feed: None,
        };
        ctx.spawn(EntityKind::Star, run(stage));
        ctx.route(
            RouteInfo::Output {
                kind: EntityKind::Star,
            },
            out,
        )
    })
}

struct Stage {
    base: SpawnCtx,
    index: u32,
    body: NetFn,
    exits: Arc<[Variant]>,
    mode: Mode,
    level: u32,
    input: StreamRx,
    exit: StreamTx,
    feed: Option<StreamTx>,
}

/// Boxed so a stage can spawn its successor, which runs the same future.
fn run(mut stage: Stage) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        match stage.mode {
            Mode::Nondet => stage.run_nondet().await,
            Mode::Det if stage.index == 0 => stage.run_entry().await,
            Mode::Det => stage.run_relay().await,
        }
        if let Some(feed) = &mut stage.feed {
            let _ = feed.write(Record::Terminate).await;
        }
        let _ = stage.exit.write(Record::Terminate).await;
    })
}

impl Stage {
    fn leaves(&self, record: &DataRecord) -> bool {
        self.exits.iter().any(|pattern| record.matches(pattern))
    }

    /// Wires the body and the next stage on first use. The announcement for
    /// the next stage's exit stream goes out before anything can reach it.
    async fn ensure_body(&mut self) {
        if self.feed.is_some() {
            return;
        }
        let mut child = match self.mode {
            Mode::Det => self.base.enter_det(EntityKind::Star, self.index),
            Mode::Nondet => self.base.enter(EntityKind::Star, self.index),
        };
        let (feed_tx, feed_rx) = child.stream();
        let feed_rx = child.route(
            RouteInfo::Feed {
                kind: EntityKind::Star,
                branch: self.index,
            },
            feed_rx,
        );
        let body_out = (self.body)(&mut child, feed_rx);
        let (next_exit_tx, next_exit_rx) = self.base.stream();
        let _ = self
            .exit
            .write(Record::Collect { rx: next_exit_rx })
            .await;
        let next = Stage {
            base: self.base.clone(),
            index: self.index + 1,
            body: Arc::clone(&self.body),
            exits: Arc::clone(&self.exits),
            mode: self.mode,
            level: self.level,
            input: body_out,
            exit: next_exit_tx,
            feed: None,
        };
        self.base.spawn(EntityKind::Star, run(next));
        self.feed = Some(feed_tx);
    }

    async fn run_nondet(&mut self) {
        while let Some(record) = self.input.read().await {
            match record {
                Record::Sync { rx } => drop(self.input.replace(rx)),
                Record::Collect { .. } => panic!("collect record at a stage input"),
                Record::Terminate => break,
                Record::Data(data) => {
                    if self.leaves(&data) {
                        if self.exit.write(Record::Data(data)).await.is_err() {
                            return;
                        }
                    } else {
                        self.ensure_body().await;
                        if let Some(feed) = &mut self.feed {
                            let _ = feed.write(Record::Data(data)).await;
                        }
                    }
                }
                record => {
                    // probes and enclosing-scope marks leave directly
                    if self.exit.write(record).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// First stage of a deterministic star: numbers each incoming record
    /// and brackets both paths, so order can be restored at the merge.
    async fn run_entry(&mut self) {
        let mut stamp = DetStamp::new(self.level);
        while let Some(record) = self.input.read().await {
            match record {
                Record::Sync { rx } => drop(self.input.replace(rx)),
                Record::Collect { .. } => panic!("collect record at a stage input"),
                Record::Terminate => break,
                Record::Data(data) => {
                    let mark = stamp.next();
                    if self.leaves(&data) {
                        if write_batch(&mut self.exit, mark, Some(Record::Data(data)))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        if let Some(feed) = &mut self.feed {
                            let _ = write_batch(feed, mark, None).await;
                        }
                    } else {
                        self.ensure_body().await;
                        if let Some(feed) = &mut self.feed {
                            let _ = write_batch(feed, mark, Some(Record::Data(data))).await;
                        }
                        if write_batch(&mut self.exit, mark, None).await.is_err() {
                            return;
                        }
                    }
                }
                record => {
                    let mark = stamp.next();
                    if write_batch(&mut self.exit, mark, Some(record)).await.is_err() {
                        return;
                    }
                    if let Some(feed) = &mut self.feed {
                        let _ = write_batch(feed, mark, None).await;
                    }
                }
            }
        }
    }

    /// Later stage of a deterministic star: relays the bracket structure it
    /// receives instead of stamping its own.
    async fn run_relay(&mut self) {
        loop {
            let Some(record) = self.input.read().await else {
                break;
            };
            match record {
                Record::Sync { rx } => drop(self.input.replace(rx)),
                Record::Collect { .. } => panic!("collect record at a stage input"),
                Record::Terminate => break,
                Record::SortBegin(mark) if mark.level == self.level => {
                    if !self.relay_batch(mark).await {
                        return;
                    }
                }
                record => {
                    // anything outside a batch belongs to an enclosing scope
                    if self.exit.write(record).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// One batch in, one batch out on the exit side, and one into the body
    /// when it exists or gets created along the way.
    async fn relay_batch(&mut self, mark: SortMark) -> bool {
        if self.exit.write(Record::SortBegin(mark)).await.is_err() {
            return false;
        }
        let mut fed = false;
        if let Some(feed) = &mut self.feed {
            let _ = feed.write(Record::SortBegin(mark)).await;
            fed = true;
        }
        loop {
            let Some(record) = self.input.read().await else {
                debug!("stage input closed inside a batch");
                if fed {
                    if let Some(feed) = &mut self.feed {
                        let _ = feed.write(Record::SortEnd(mark)).await;
                    }
                }
                let _ = self.exit.write(Record::SortEnd(mark)).await;
                return true;
            };
            match record {
                Record::SortEnd(end) if end.level == self.level => {
                    if end.seq != mark.seq {
                        panic!(
                            "sort brackets {} and {} interleaved on one stream",
                            mark.seq, end.seq
                        );
                    }
                    if fed {
                        if let Some(feed) = &mut self.feed {
                            let _ = feed.write(Record::SortEnd(end)).await;
                        }
                    } else if let Some(feed) = &mut self.feed {
                        // nothing continued this round; the body still owes
                        // the merge a batch with this number
                        let _ = write_batch(feed, mark, None).await;
                    }
                    return self.exit.write(Record::SortEnd(end)).await.is_ok();
                }
                Record::Data(data) => {
                    if self.leaves(&data) {
                        if self.exit.write(Record::Data(data)).await.is_err() {
                            return false;
                        }
                    } else {
                        if self.feed.is_none() {
                            self.ensure_body().await;
                        }
                        if !fed {
                            if let Some(feed) = &mut self.feed {
                                let _ = feed.write(Record::SortBegin(mark)).await;
                            }
                            fed = true;
                        }
                        if let Some(feed) = &mut self.feed {
                            let _ = feed.write(Record::Data(data)).await;
                        }
                    }
                }
                Record::Sync { rx } => drop(self.input.replace(rx)),
                Record::Collect { .. } => panic!("collect record inside a stage batch"),
                Record::Terminate => panic!("terminate inside a sort batch"),
                record => {
                    // probes and enclosing marks stay with the exit batch
                    if self.exit.write(record).await.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}
