//! Network construction. A network is described by composing constructors
//! ([`box_net`], [`serial`], [`parallel`], [`star`], [`split`], [`filter`],
//! [`syncro`]) into a [`NetFn`]; mounting it on a runtime wires the entity
//! tasks and streams and hands back the external endpoints.
//!
//! Constructors validate what they can up front and return a [`BuildError`]
//! for descriptions that could never route or merge a record. Everything
//! else is wired lazily: a star unfolds stage by stage and a split creates
//! one instance per tag value actually seen.

use std::fmt::Write;
use std::future::Future;
use std::sync::Arc;

use crate::label::{BTagId, FieldId, Labels, TagId, Variant};
use crate::location::Location;
use crate::record::payload::InterfaceRegistry;
use crate::record::{DataRecord, Record, SortMark};
use crate::route::RouteInfo;
use crate::runtime::sched::{EntityKind, TaskId};
use crate::runtime::stream::{Disconnected, StreamRx, StreamTx};
use crate::runtime::RuntimeInner;

mod boxes;
mod collect;
mod filter;
mod parallel;
mod serial;
mod split;
mod star;
mod syncro;

pub use boxes::{box_net, closure_box, BoxError, BoxFn, Outlet};
pub use filter::{filter, FieldOp, FilterOutput, FilterRule, TagExpr};
pub use parallel::parallel;
pub use serial::serial;
pub use split::split;
pub use star::star;
pub use syncro::syncro;

/// Whether a combinator preserves the arrival order of its input in the
/// merged output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Branch outputs interleave in whatever order they arrive.
    Nondet,
    /// Output follows input order, restored through sort marks.
    Det,
}

/// A network constructor: wires entities under the given context, reading
/// from the input stream, and returns the network's output stream.
///
/// Calling a `NetFn` twice instantiates the network twice; constructors
/// capture only immutable descriptions.
pub type NetFn = Arc<dyn Fn(&mut SpawnCtx, StreamRx) -> StreamRx + Send + Sync>;

/// A two-input constructor, produced by [`syncro`].
pub type JoinFn = Arc<dyn Fn(&mut SpawnCtx, StreamRx, StreamRx) -> StreamRx + Send + Sync>;

/// Construction context threaded through constructors while a network is
/// wired: where in the graph we are, and how deep in deterministic scopes.
#[derive(Clone)]
pub struct SpawnCtx {
    inner: Arc<RuntimeInner>,
    location: Location,
    det_level: u32,
}

impl SpawnCtx {
    pub(crate) fn root(inner: Arc<RuntimeInner>) -> Self {
        Self {
            inner,
            location: Location::root(),
            det_level: 0,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Sort mark level of the innermost enclosing deterministic scope.
    /// Zero outside any.
    pub fn det_level(&self) -> u32 {
        self.det_level
    }

    /// Context for a child entity one step below this one.
    pub fn enter(&self, kind: EntityKind, branch: u32) -> SpawnCtx {
        SpawnCtx {
            inner: Arc::clone(&self.inner),
            location: self.location.enter(kind, branch),
            det_level: self.det_level,
        }
    }

    /// Like [`SpawnCtx::enter`], additionally opening a deterministic scope.
    pub(crate) fn enter_det(&self, kind: EntityKind, branch: u32) -> SpawnCtx {
        let mut ctx = self.enter(kind, branch);
        ctx.det_level += 1;
        ctx
    }

    /// Hands a task to the runtime's worker pool.
    pub fn spawn(
        &self,
        kind: EntityKind,
        future: impl Future<Output = ()> + Send + 'static,
    ) -> TaskId {
        self.inner.spawner.spawn(kind, future)
    }

    /// Opens a stream with the runtime's configured capacity.
    pub fn stream(&self) -> (StreamTx, StreamRx) {
        self.inner.default_stream()
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.inner.registry
    }

    /// Lets the router substitute a transport stream at this location.
    pub(crate) fn route(&self, info: RouteInfo, rx: StreamRx) -> StreamRx {
        self.inner.router.route_update(info, rx, &self.location)
    }
}

/// A network description rejected at construction, before any record flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A parallel composition needs at least one branch.
    EmptyParallel,
    /// A split range with `high < low` can never route a record.
    EmptySplitRange { low: i64, high: i64 },
    /// Both join patterns bind these fields; a merged record cannot keep
    /// two payloads under one id.
    JoinFieldsOverlap(Vec<FieldId>),
    /// The correlation tag is missing from one join pattern.
    JoinKeyMissing { tag: TagId, side: &'static str },
    /// A filter output references a field its rule's pattern does not bind.
    FilterUnboundField(FieldId),
    /// A filter output references a tag its rule's pattern does not bind.
    FilterUnboundTag(TagId),
    /// A filter output references a binding tag its rule's pattern does not
    /// bind.
    FilterUnboundBTag(BTagId),
    /// Two filter outputs both move the same field out of the input.
    FilterFieldTakenTwice(FieldId),
    /// A filter output sets a field its declared shape does not include.
    FilterUndeclaredField(FieldId),
    /// A filter output sets a tag its declared shape does not include.
    FilterUndeclaredTag(TagId),
    /// A filter output sets a binding tag its declared shape does not
    /// include.
    FilterUndeclaredBTag(BTagId),
}

fn named(name: Option<&arcstr::ArcStr>, id: u32) -> String {
    match name {
        Some(name) => format!("`{name}`"),
        None => format!("#{id}"),
    }
}

impl BuildError {
    pub fn to_report(&self, labels: &Labels) -> miette::Report {
        match self {
            Self::EmptyParallel => {
                miette::miette!("A parallel composition needs at least one branch.")
            }
            Self::EmptySplitRange { low, high } => {
                miette::miette!(
                    "The split range {}..={} is empty; no record could ever be routed.",
                    low,
                    high,
                )
            }
            Self::JoinFieldsOverlap(fields) => {
                let mut list = String::new();
                let mut sep = "";
                for field in fields {
                    let _ = write!(
                        list,
                        "{}{}",
                        sep,
                        named(labels.field_name(*field), field.0)
                    );
                    sep = ", ";
                }
                miette::miette!(
                    "Both sides of the join bind {}; a merged record cannot keep two payloads under one field.",
                    list,
                )
            }
            Self::JoinKeyMissing { tag, side } => {
                miette::miette!(
                    "The correlation tag {} is not part of the {} pattern, so records on that side could never be paired by it.",
                    named(labels.tag_name(*tag), tag.0),
                    side,
                )
            }
            Self::FilterUnboundField(field) => {
                miette::miette!(
                    "A filter output uses field {}, which its pattern does not bind.",
                    named(labels.field_name(*field), field.0),
                )
            }
            Self::FilterUnboundTag(tag) => {
                miette::miette!(
                    "A filter output uses tag {}, which its pattern does not bind.",
                    named(labels.tag_name(*tag), tag.0),
                )
            }
            Self::FilterUnboundBTag(btag) => {
                miette::miette!(
                    "A filter output uses binding tag {}, which its pattern does not bind.",
                    named(labels.btag_name(*btag), btag.0),
                )
            }
            Self::FilterFieldTakenTwice(field) => {
                miette::miette!(
                    "Two outputs of one filter rule both move field {} out of the input; only one of them can.",
                    named(labels.field_name(*field), field.0),
                )
            }
            Self::FilterUndeclaredField(field) => {
                miette::miette!(
                    "A filter output sets field {}, which its declared shape does not include.",
                    named(labels.field_name(*field), field.0),
                )
            }
            Self::FilterUndeclaredTag(tag) => {
                miette::miette!(
                    "A filter output sets tag {}, which its declared shape does not include.",
                    named(labels.tag_name(*tag), tag.0),
                )
            }
            Self::FilterUndeclaredBTag(btag) => {
                miette::miette!(
                    "A filter output sets binding tag {}, which its declared shape does not include.",
                    named(labels.btag_name(*btag), btag.0),
                )
            }
        }
    }
}

/// Sequence numbering for one deterministic scope. The dispatcher that owns
/// it brackets every batch it sends out with marks carrying these numbers.
pub(crate) struct DetStamp {
    level: u32,
    next_seq: u64,
}

impl DetStamp {
    pub(crate) fn new(level: u32) -> Self {
        Self { level, next_seq: 0 }
    }

    pub(crate) fn next(&mut self) -> SortMark {
        let mark = SortMark {
            level: self.level,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        mark
    }
}

/// Writes one deterministic batch: a bracket pair around `payload`, which is
/// `None` on every path that does not receive this sequence number.
pub(crate) async fn write_batch(
    tx: &mut StreamTx,
    mark: SortMark,
    payload: Option<Record>,
) -> Result<(), Disconnected> {
    tx.write(Record::SortBegin(mark)).await?;
    if let Some(record) = payload {
        tx.write(record).await?;
    }
    tx.write(Record::SortEnd(mark)).await
}

/// Picks the branch whose pattern the record matches most specifically:
/// widest pattern wins, earliest branch breaks ties.
pub(crate) fn best_match(patterns: &[Variant], record: &DataRecord) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (index, pattern) in patterns.iter().enumerate() {
        if !record.matches(pattern) {
            continue;
        }
        let width = pattern.width();
        match best {
            Some((_, best_width)) if width <= best_width => {}
            _ => best = Some((index, width)),
        }
    }
    best.map(|(index, _)| index)
}
