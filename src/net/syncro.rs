//! The join entity: pairs records arriving on two streams and merges each
//! pair into one record. Pairing is first-in-first-out per side, optionally
//! keyed by a correlation tag both patterns bind. Records that do not match
//! their side's pattern pass through unchanged.
//!
//! A join is inherently nondeterministic across its inputs; marks of
//! enclosing scopes pass through in arrival order.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::label::{TagId, Variant};
use crate::record::{DataRecord, Record};
use crate::runtime::sched::EntityKind;
use crate::runtime::stream::{SetPoll, StreamRx, StreamSet, StreamTx};

use super::{BuildError, JoinFn, RouteInfo, SpawnCtx};

/// Builds a join of a `main` and an `aux` pattern. Matching main records
/// absorb their aux partner; with a `key`, only records agreeing on that
/// tag's value pair up. The patterns may not bind a field in common, and
/// the key must be part of both.
pub fn syncro(main: Variant, aux: Variant, key: Option<TagId>) -> Result<JoinFn, BuildError> {
    if main.fields_overlap(&aux) {
        let shared = main
            .fields()
            .iter()
            .copied()
            .filter(|id| aux.has_field(*id))
            .collect();
        return Err(BuildError::JoinFieldsOverlap(shared));
    }
    if let Some(tag) = key {
        if !main.has_tag(tag) {
            return Err(BuildError::JoinKeyMissing { tag, side: "main" });
        }
        if !aux.has_tag(tag) {
            return Err(BuildError::JoinKeyMissing { tag, side: "aux" });
        }
    }
    Ok(Arc::new(
        move |ctx: &mut SpawnCtx, main_rx: StreamRx, aux_rx: StreamRx| {
            let ctx = ctx.enter(EntityKind::Sync, 0);
            let (out_tx, out_rx) = ctx.stream();
            let join = Join {
                main: main.clone(),
                aux: aux.clone(),
                key,
                main_buf: IndexMap::new(),
                aux_buf: IndexMap::new(),
                main_done: false,
                aux_done: false,
            };
            ctx.spawn(EntityKind::Sync, run_join(join, main_rx, aux_rx, out_tx));
            ctx.route(
                RouteInfo::Output {
                    kind: EntityKind::Sync,
                },
                out_rx,
            )
        },
    ))
}

struct Join {
    main: Variant,
    aux: Variant,
    key: Option<TagId>,
    main_buf: IndexMap<i64, VecDeque<DataRecord>>,
    aux_buf: IndexMap<i64, VecDeque<DataRecord>>,
    main_done: bool,
    aux_done: bool,
}

impl Join {
    fn key_value(&self, record: &DataRecord) -> i64 {
        match self.key {
            Some(tag) => match record.tag(tag) {
                Some(value) => value,
                None => panic!("correlation tag missing from a matched record"),
            },
            None => 0,
        }
    }

    fn pop_opposite(&mut self, from_main: bool, bucket: i64) -> Option<DataRecord> {
        let buf = if from_main {
            &mut self.aux_buf
        } else {
            &mut self.main_buf
        };
        let queue = buf.get_mut(&bucket)?;
        let record = queue.pop_front();
        if queue.is_empty() {
            buf.shift_remove(&bucket);
        }
        record
    }

    fn push(&mut self, from_main: bool, bucket: i64, record: DataRecord) {
        let buf = if from_main {
            &mut self.main_buf
        } else {
            &mut self.aux_buf
        };
        buf.entry(bucket).or_default().push_back(record);
    }

    fn opposite_done(&self, from_main: bool) -> bool {
        if from_main {
            self.aux_done
        } else {
            self.main_done
        }
    }

    fn mark_done(&mut self, from_main: bool) {
        if from_main {
            self.main_done = true;
        } else {
            self.aux_done = true;
        }
    }

    /// Main absorbs aux, so on colliding tags the main side's value wins.
    fn combine(&self, from_main: bool, record: DataRecord, partner: DataRecord) -> DataRecord {
        let (mut keep, merge) = if from_main {
            (record, partner)
        } else {
            (partner, record)
        };
        keep.absorb(merge);
        keep
    }

    fn leftovers(&self) -> usize {
        let count = |buf: &IndexMap<i64, VecDeque<DataRecord>>| {
            buf.values().map(VecDeque::len).sum::<usize>()
        };
        count(&self.main_buf) + count(&self.aux_buf)
    }
}

async fn run_join(mut join: Join, main_rx: StreamRx, aux_rx: StreamRx, mut out: StreamTx) {
    let mut set = StreamSet::new();
    let main_id = set.put(main_rx);
    let aux_id = set.put(aux_rx);
    loop {
        match set.poll_any().await {
            SetPoll::Empty => break,
            SetPoll::Closed(id) => {
                debug!(?id, "join input closed without a terminate");
                join.mark_done(id == main_id);
                set.remove(id);
            }
            SetPoll::Item(id, record) => {
                let from_main = id == main_id;
                match record {
                    Record::Sync { rx } => {
                        if let Some(member) = set.get_mut(id) {
                            drop(member.replace(rx));
                        }
                    }
                    Record::Collect { .. } => panic!("collect record at a join input"),
                    Record::Terminate => {
                        join.mark_done(from_main);
                        set.remove(id);
                    }
                    Record::Data(data) => {
                        let pattern = if from_main { &join.main } else { &join.aux };
                        let shipped = if !data.matches(pattern) {
                            data
                        } else {
                            let bucket = join.key_value(&data);
                            match join.pop_opposite(from_main, bucket) {
                                Some(partner) => join.combine(from_main, data, partner),
                                None if join.opposite_done(from_main) => {
                                    // nothing will ever arrive to pair with
                                    data
                                }
                                None => {
                                    join.push(from_main, bucket, data);
                                    continue;
                                }
                            }
                        };
                        if out.write(Record::Data(shipped)).await.is_err() {
                            return;
                        }
                    }
                    record => {
                        if out.write(record).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
    let unpaired = join.leftovers();
    if unpaired > 0 {
        warn!(unpaired, "join shutting down with unpaired records, dropped");
    }
    let _ = out.write(Record::Terminate).await;
}
