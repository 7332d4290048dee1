//! Parallel composition: branches guarded by variants, a dispatcher that
//! routes each record to the most specific matching branch, and a collector
//! that merges the branch outputs.
//!
//! Besides one stream per branch, the dispatcher keeps a direct stream
//! straight into the collector. Probes and marks of enclosing scopes travel
//! on it, so they stay ordered relative to the records around them without
//! belonging to any branch.

use std::sync::Arc;

use tracing::warn;

use crate::label::Variant;
use crate::record::Record;
use crate::runtime::sched::EntityKind;
use crate::runtime::stream::{StreamRx, StreamTx};

use super::{
    best_match, collect, write_batch, BuildError, DetStamp, Mode, NetFn, RouteInfo, SpawnCtx,
};

/// Composes `branches` in parallel. Records go to the branch whose guard
/// they match most specifically; a record matching no guard is reported and
/// dropped. [`Mode::Det`] keeps the merged output in input order.
pub fn parallel(branches: Vec<(Variant, NetFn)>, mode: Mode) -> Result<NetFn, BuildError> {
    if branches.is_empty() {
        return Err(BuildError::EmptyParallel);
    }
    Ok(Arc::new(move |ctx: &mut SpawnCtx, input: StreamRx| {
        let det = match mode {
            Mode::Det => Some(ctx.det_level() + 1),
            Mode::Nondet => None,
        };
        let (direct_tx, direct_rx) = ctx.stream();
        let mut patterns = Vec::with_capacity(branches.len());
        let mut feeds = Vec::with_capacity(branches.len());
        let mut members = vec![direct_rx];
        for (index, (pattern, net)) in branches.iter().enumerate() {
            let mut child = match mode {
                Mode::Det => ctx.enter_det(EntityKind::Parallel, index as u32),
                Mode::Nondet => ctx.enter(EntityKind::Parallel, index as u32),
            };
            let (feed_tx, feed_rx) = child.stream();
            let feed_rx = child.route(
                RouteInfo::Feed {
                    kind: EntityKind::Parallel,
                    branch: index as u32,
                },
                feed_rx,
            );
            patterns.push(pattern.clone());
            feeds.push(feed_tx);
            members.push(net(&mut child, feed_rx));
        }
        let out = collect::spawn(ctx, members, det);
        ctx.spawn(
            EntityKind::Parallel,
            dispatch(input, feeds, direct_tx, patterns, det),
        );
        ctx.route(
            RouteInfo::Output {
                kind: EntityKind::Parallel,
            },
            out,
        )
    }))
}

async fn dispatch(
    mut input: StreamRx,
    mut feeds: Vec<StreamTx>,
    mut direct: StreamTx,
    patterns: Vec<Variant>,
    det: Option<u32>,
) {
    let mut stamp = det.map(DetStamp::new);
    while let Some(record) = input.read().await {
        match record {
            Record::Sync { rx } => drop(input.replace(rx)),
            Record::Collect { .. } => panic!("collect record at a dispatcher input"),
            Record::Terminate => break,
            Record::Data(data) => {
                let Some(target) = best_match(&patterns, &data) else {
                    warn!(shape = ?data.shape(), "record matches no branch, dropped");
                    continue;
                };
                scatter(&mut feeds, &mut direct, target, Record::Data(data), &mut stamp).await;
            }
            record => {
                // probes and enclosing-scope marks take the direct path
                let target = feeds.len();
                scatter(&mut feeds, &mut direct, target, record, &mut stamp).await;
            }
        }
    }
    for feed in &mut feeds {
        let _ = feed.write(Record::Terminate).await;
    }
    let _ = direct.write(Record::Terminate).await;
}

/// Sends `record` down the `target` path; index `feeds.len()` is the direct
/// path. A deterministic scatter brackets the record and broadcasts empty
/// brackets with the same number everywhere else, so the collector can
/// always tell whether a path took part in a sequence number.
async fn scatter(
    feeds: &mut [StreamTx],
    direct: &mut StreamTx,
    target: usize,
    record: Record,
    stamp: &mut Option<DetStamp>,
) {
    match stamp {
        Some(stamp) => {
            let mark = stamp.next();
            let mut payload = Some(record);
            for index in 0..feeds.len() + 1 {
                let tx = match feeds.get_mut(index) {
                    Some(tx) => tx,
                    None => &mut *direct,
                };
                let batch = if index == target { payload.take() } else { None };
                let _ = write_batch(tx, mark, batch).await;
            }
        }
        None => {
            let tx = match feeds.get_mut(target) {
                Some(tx) => tx,
                None => direct,
            };
            let _ = tx.write(record).await;
        }
    }
}
