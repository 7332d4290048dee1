//! The merge entity behind every fan-in. A collector owns a set of member
//! streams and forwards their records on a single output.
//!
//! In nondeterministic mode records leave in arrival order, whichever member
//! they came from. In deterministic mode the dispatcher feeding the scope
//! has numbered every batch with sort marks, and one batch went out on
//! exactly one path while every other live path got an empty bracket pair
//! with the same number. The collector replays batches strictly by number,
//! and inside one number in member order, so the merged output keeps the
//! dispatcher's input order. A member whose head bracket carries a higher
//! number provably has no batch for the current one (numbers on one stream
//! only grow) and is passed over without waiting.
//!
//! Control records act on the set itself, wherever they show up:
//!
//!   * `Collect` adds the carried stream as a new member. Stars announce
//!     each unfolded stage this way, on a stream that is already a member,
//!     so the announcement can never arrive after the stage's records.
//!   * `Sync` splices a continuation stream into the member's place;
//!     draining resumes on the new stream, including the rest of an open
//!     batch.
//!   * `Terminate` retires the member. When the last member retires, the
//!     collector emits a single `Terminate` downstream and exits.
//!
//! Marks of other levels pass through untouched; the scope that stamped
//! them reassembles them further down.

use tracing::debug;

use crate::record::{Record, SortMark};
use crate::runtime::sched::EntityKind;
use crate::runtime::stream::{MemberId, SetPoll, StreamRx, StreamSet, StreamTx};

use super::SpawnCtx;

/// Spawns a collector over `members` and returns its output stream.
/// `det` carries the scope's mark level when order must be restored.
pub(crate) fn spawn(ctx: &SpawnCtx, members: Vec<StreamRx>, det: Option<u32>) -> StreamRx {
    let (out_tx, out_rx) = ctx.stream();
    let mut set = StreamSet::new();
    for rx in members {
        set.put(rx);
    }
    ctx.spawn(EntityKind::Collect, async move {
        match det {
            Some(level) => run_det(set, out_tx, level).await,
            None => run_nondet(set, out_tx).await,
        }
    });
    out_rx
}

async fn run_nondet(mut set: StreamSet, mut out: StreamTx) {
    loop {
        match set.poll_any().await {
            SetPoll::Empty => break,
            SetPoll::Closed(id) => {
                debug!(?id, "merge input closed without a terminate");
                set.remove(id);
            }
            SetPoll::Item(id, record) => match record {
                Record::Collect { rx } => {
                    set.put(rx);
                }
                Record::Sync { rx } => {
                    if let Some(member) = set.get_mut(id) {
                        drop(member.replace(rx));
                    }
                }
                Record::Terminate => {
                    set.remove(id);
                }
                record => {
                    if out.write(record).await.is_err() {
                        return;
                    }
                }
            },
        }
    }
    let _ = out.write(Record::Terminate).await;
}

/// What the head of a member stream holds, without consuming it.
enum Head {
    Begin(SortMark),
    End(SortMark),
    Data,
    Collect,
    Sync,
    Terminate,
    Probe,
}

fn classify(record: &Record) -> Head {
    match record {
        Record::SortBegin(mark) => Head::Begin(*mark),
        Record::SortEnd(mark) => Head::End(*mark),
        Record::Data(_) => Head::Data,
        Record::Collect { .. } => Head::Collect,
        Record::Sync { .. } => Head::Sync,
        Record::Terminate => Head::Terminate,
        Record::Probe => Head::Probe,
    }
}

async fn run_det(mut set: StreamSet, mut out: StreamTx, level: u32) {
    let mut next_seq: u64 = 0;
    'seq: loop {
        if set.is_empty() {
            break;
        }
        // Serve batch `next_seq`. Every live member owes either a batch
        // with this number or one with a higher number proving it was
        // skipped. Control records can add or retire members mid-sweep, so
        // sweeps repeat until one passes over every member without
        // consuming anything.
        loop {
            if set.is_empty() {
                break 'seq;
            }
            let mut consumed = false;
            for id in set.members() {
                let head = match set.get_mut(id) {
                    Some(member) => member.peek_with(classify).await,
                    None => continue,
                };
                match head {
                    None => {
                        debug!(?id, "merge input closed without a terminate");
                        set.remove(id);
                        consumed = true;
                    }
                    Some(Head::Terminate) => {
                        if let Some(member) = set.get_mut(id) {
                            let _ = member.read().await;
                        }
                        set.remove(id);
                        consumed = true;
                    }
                    Some(Head::Collect) => {
                        if let Some(Record::Collect { rx }) = read_from(&mut set, id).await {
                            set.put(rx);
                        }
                        consumed = true;
                    }
                    Some(Head::Sync) => {
                        if let Some(Record::Sync { rx }) = read_from(&mut set, id).await {
                            if let Some(member) = set.get_mut(id) {
                                drop(member.replace(rx));
                            }
                        }
                        consumed = true;
                    }
                    Some(Head::Begin(mark)) if mark.level == level => {
                        if mark.seq < next_seq {
                            panic!(
                                "sort sequence {} resurfaced while serving {}",
                                mark.seq, next_seq
                            );
                        }
                        if mark.seq == next_seq {
                            if !drain_batch(&mut set, id, &mut out, mark).await {
                                return;
                            }
                            consumed = true;
                        }
                    }
                    Some(Head::End(mark)) if mark.level == level => {
                        panic!("unpaired sort end {} at a merge input", mark.seq)
                    }
                    Some(Head::Begin(_) | Head::End(_)) => {
                        // A mark of an enclosing scope travelling bare;
                        // pass it along.
                        if let Some(record) = read_from(&mut set, id).await {
                            if out.write(record).await.is_err() {
                                return;
                            }
                        }
                        consumed = true;
                    }
                    Some(Head::Data | Head::Probe) => {
                        // Everything a deterministic dispatcher sends is
                        // bracketed; a bare record means the scope levels
                        // disagree.
                        panic!("unbracketed record at a deterministic merge input");
                    }
                }
            }
            if !consumed {
                break;
            }
        }
        next_seq += 1;
    }
    let _ = out.write(Record::Terminate).await;
}

async fn read_from(set: &mut StreamSet, id: MemberId) -> Option<Record> {
    match set.get_mut(id) {
        Some(member) => member.read().await,
        None => None,
    }
}

/// Forwards one batch from `id`: everything between the bracket pair goes
/// downstream, except control records, which act on the set. Returns false
/// when the downstream reader is gone.
async fn drain_batch(
    set: &mut StreamSet,
    id: MemberId,
    out: &mut StreamTx,
    mark: SortMark,
) -> bool {
    // the opening bracket
    let _ = read_from(set, id).await;
    loop {
        let Some(record) = read_from(set, id).await else {
            debug!(?id, "merge input closed inside a batch");
            set.remove(id);
            return true;
        };
        match record {
            Record::SortEnd(end) if end.level == mark.level => {
                if end.seq != mark.seq {
                    panic!(
                        "sort brackets {} and {} interleaved on one stream",
                        mark.seq, end.seq
                    );
                }
                return true;
            }
            Record::SortBegin(begin) if begin.level == mark.level => {
                panic!("sort bracket {} opened inside {}", begin.seq, mark.seq)
            }
            Record::Collect { rx } => {
                set.put(rx);
            }
            Record::Sync { rx } => {
                if let Some(member) = set.get_mut(id) {
                    drop(member.replace(rx));
                }
            }
            Record::Terminate => {
                debug!(?id, "terminate inside a batch");
                set.remove(id);
                return true;
            }
            record => {
                if out.write(record).await.is_err() {
                    return false;
                }
            }
        }
    }
}
