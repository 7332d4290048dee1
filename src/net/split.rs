//! Indexed parallelism: one instance of the body network per value of a
//! routing tag, created the first time the value shows up. The dispatcher
//! announces each new instance to the collector with a `Collect` record on
//! the direct path, always ahead of the instance's first output.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::warn;

use crate::label::TagId;
use crate::record::Record;
use crate::runtime::sched::EntityKind;
use crate::runtime::stream::{StreamRx, StreamTx};

use super::{collect, write_batch, BuildError, DetStamp, Mode, NetFn, RouteInfo, SpawnCtx};

/// Composes `body` indexed by `tag` over the closed range `low..=high`.
/// A record without the tag, or with a value outside the range, is reported
/// and dropped. [`Mode::Det`] keeps the merged output in input order.
pub fn split(
    tag: TagId,
    low: i64,
    high: i64,
    body: NetFn,
    mode: Mode,
) -> Result<NetFn, BuildError> {
    if high < low {
        return Err(BuildError::EmptySplitRange { low, high });
    }
    Ok(Arc::new(move |ctx: &mut SpawnCtx, input: StreamRx| {
        let det = match mode {
            Mode::Det => Some(ctx.det_level() + 1),
            Mode::Nondet => None,
        };
        let (direct_tx, direct_rx) = ctx.stream();
        let out = collect::spawn(ctx, vec![direct_rx], det);
        let dispatcher = Dispatcher {
            base: ctx.clone(),
            tag,
            low,
            high,
            body: Arc::clone(&body),
            mode,
            feeds: IndexMap::new(),
            direct: direct_tx,
            stamp: det.map(DetStamp::new),
        };
        ctx.spawn(EntityKind::Split, dispatcher.run(input));
        ctx.route(
            RouteInfo::Output {
                kind: EntityKind::Split,
            },
            out,
        )
    }))
}

struct Dispatcher {
    base: SpawnCtx,
    tag: TagId,
    low: i64,
    high: i64,
    body: NetFn,
    mode: Mode,
    feeds: IndexMap<i64, StreamTx>,
    direct: StreamTx,
    stamp: Option<DetStamp>,
}

impl Dispatcher {
    async fn run(mut self, mut input: StreamRx) {
        while let Some(record) = input.read().await {
            match record {
                Record::Sync { rx } => drop(input.replace(rx)),
                Record::Collect { .. } => panic!("collect record at a dispatcher input"),
                Record::Terminate => break,
                Record::Data(data) => {
                    let Some(value) = data.tag(self.tag) else {
                        warn!(tag = ?self.tag, "record lacks the routing tag, dropped");
                        continue;
                    };
                    if value < self.low || value > self.high {
                        warn!(
                            value,
                            low = self.low,
                            high = self.high,
                            "routing tag outside the split range, dropped"
                        );
                        continue;
                    }
                    self.ensure_instance(value).await;
                    self.scatter(Some(value), Record::Data(data)).await;
                }
                record => {
                    // probes and enclosing-scope marks take the direct path
                    self.scatter(None, record).await;
                }
            }
        }
        for feed in self.feeds.values_mut() {
            let _ = feed.write(Record::Terminate).await;
        }
        let _ = self.direct.write(Record::Terminate).await;
    }

    /// Wires a body instance for `value` if none exists yet and tells the
    /// collector about its output stream.
    async fn ensure_instance(&mut self, value: i64) {
        if self.feeds.contains_key(&value) {
            return;
        }
        let branch = value.wrapping_sub(self.low) as u32;
        let mut child = match self.mode {
            Mode::Det => self.base.enter_det(EntityKind::Split, branch),
            Mode::Nondet => self.base.enter(EntityKind::Split, branch),
        };
        let (feed_tx, feed_rx) = child.stream();
        let feed_rx = child.route(
            RouteInfo::Feed {
                kind: EntityKind::Split,
                branch,
            },
            feed_rx,
        );
        let instance_out = (self.body)(&mut child, feed_rx);
        let _ = self
            .direct
            .write(Record::Collect { rx: instance_out })
            .await;
        self.feeds.insert(value, feed_tx);
    }

    /// Sends `record` down the instance for `target`, or the direct path
    /// for `None`. A deterministic scatter broadcasts empty brackets with
    /// the same number on every other path.
    async fn scatter(&mut self, target: Option<i64>, record: Record) {
        match &mut self.stamp {
            Some(stamp) => {
                let mark = stamp.next();
                let mut payload = Some(record);
                for (key, feed) in self.feeds.iter_mut() {
                    let batch = if target == Some(*key) {
                        payload.take()
                    } else {
                        None
                    };
                    let _ = write_batch(feed, mark, batch).await;
                }
                let batch = if target.is_none() {
                    payload.take()
                } else {
                    None
                };
                let _ = write_batch(&mut self.direct, mark, batch).await;
            }
            None => {
                let feed = match target {
                    Some(value) => match self.feeds.get_mut(&value) {
                        Some(feed) => feed,
                        None => &mut self.direct,
                    },
                    None => &mut self.direct,
                };
                let _ = feed.write(record).await;
            }
        }
    }
}
