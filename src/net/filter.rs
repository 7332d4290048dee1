//! The filter entity: guarded record rewriting without user code. Each rule
//! pairs a match pattern with any number of output shapes; the first rule
//! whose pattern matches consumes the record and produces one record per
//! output. Zero outputs delete the record, several multiply it.
//!
//! Outputs are built from the consumed record: fields move or copy over
//! under a possibly different id, tags and binding tags are set from small
//! integer expressions over the input's tags. Everything an output refers
//! to is checked at construction, so a running filter cannot trip over a
//! missing value.

use std::sync::Arc;

use tracing::warn;

use crate::label::{BTagId, FieldId, TagId, Variant};
use crate::location::Location;
use crate::record::{DataRecord, Record};
use crate::runtime::sched::EntityKind;
use crate::runtime::stream::{StreamRx, StreamTx};

use super::{BuildError, NetFn, RouteInfo, SpawnCtx};

/// Integer expression over a matched record's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpr {
    Const(i64),
    Tag(TagId),
    BTag(BTagId),
    Add(Box<TagExpr>, Box<TagExpr>),
    Sub(Box<TagExpr>, Box<TagExpr>),
    Mul(Box<TagExpr>, Box<TagExpr>),
}

impl TagExpr {
    fn eval(&self, record: &DataRecord) -> i64 {
        match self {
            Self::Const(value) => *value,
            Self::Tag(tag) => match record.tag(*tag) {
                Some(value) => value,
                None => panic!("tag bound by the pattern is missing from the record"),
            },
            Self::BTag(btag) => match record.btag(*btag) {
                Some(value) => value,
                None => panic!("btag bound by the pattern is missing from the record"),
            },
            // tag arithmetic wraps; a record is never rejected for overflow
            Self::Add(a, b) => a.eval(record).wrapping_add(b.eval(record)),
            Self::Sub(a, b) => a.eval(record).wrapping_sub(b.eval(record)),
            Self::Mul(a, b) => a.eval(record).wrapping_mul(b.eval(record)),
        }
    }

    fn check(&self, pattern: &Variant) -> Result<(), BuildError> {
        match self {
            Self::Const(_) => Ok(()),
            Self::Tag(tag) if pattern.has_tag(*tag) => Ok(()),
            Self::Tag(tag) => Err(BuildError::FilterUnboundTag(*tag)),
            Self::BTag(btag) if pattern.has_btag(*btag) => Ok(()),
            Self::BTag(btag) => Err(BuildError::FilterUnboundBTag(*btag)),
            Self::Add(a, b) | Self::Sub(a, b) | Self::Mul(a, b) => {
                a.check(pattern)?;
                b.check(pattern)
            }
        }
    }
}

/// How one field of a filter output gets its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOp {
    /// Move the payload out of the input record. Each field can be taken by
    /// one output per rule; copies anywhere in the rule are resolved first,
    /// so take and copy of one field may coexist.
    Take { from: FieldId, to: FieldId },
    /// Share the payload with the input record.
    Copy { from: FieldId, to: FieldId },
}

/// One record shape a rule produces.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    pub variant: Variant,
    pub fields: Vec<FieldOp>,
    pub tags: Vec<(TagId, TagExpr)>,
    pub btags: Vec<(BTagId, TagExpr)>,
}

/// A guarded rewrite: records matching `pattern` become the `outputs`.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub pattern: Variant,
    pub outputs: Vec<FilterOutput>,
}

/// Builds a filter over `rules`, first match wins. A record matching no
/// rule is reported and dropped.
pub fn filter(rules: Vec<FilterRule>) -> Result<NetFn, BuildError> {
    let mut compiled = Vec::with_capacity(rules.len());
    for rule in rules {
        compiled.push(Compiled::check(rule)?);
    }
    Ok(Arc::new(move |ctx: &mut SpawnCtx, input: StreamRx| {
        let ctx = ctx.enter(EntityKind::Filter, 0);
        let (out_tx, out_rx) = ctx.stream();
        let location = ctx.location().clone();
        ctx.spawn(
            EntityKind::Filter,
            run_filter(compiled.clone(), location, input, out_tx),
        );
        ctx.route(
            RouteInfo::Output {
                kind: EntityKind::Filter,
            },
            out_rx,
        )
    }))
}

#[derive(Clone)]
struct Compiled {
    pattern: Variant,
    outputs: Vec<CompiledOutput>,
}

#[derive(Clone)]
struct CompiledOutput {
    variant: Arc<Variant>,
    fields: Vec<FieldOp>,
    tags: Vec<(TagId, TagExpr)>,
    btags: Vec<(BTagId, TagExpr)>,
}

impl Compiled {
    fn check(rule: FilterRule) -> Result<Self, BuildError> {
        let pattern = rule.pattern;
        let mut taken: Vec<FieldId> = Vec::new();
        let mut outputs = Vec::with_capacity(rule.outputs.len());
        for output in rule.outputs {
            for op in &output.fields {
                let (from, to, takes) = match op {
                    FieldOp::Take { from, to } => (*from, *to, true),
                    FieldOp::Copy { from, to } => (*from, *to, false),
                };
                if !pattern.has_field(from) {
                    return Err(BuildError::FilterUnboundField(from));
                }
                if !output.variant.has_field(to) {
                    return Err(BuildError::FilterUndeclaredField(to));
                }
                if takes {
                    if taken.contains(&from) {
                        return Err(BuildError::FilterFieldTakenTwice(from));
                    }
                    taken.push(from);
                }
            }
            for (tag, expr) in &output.tags {
                if !output.variant.has_tag(*tag) {
                    return Err(BuildError::FilterUndeclaredTag(*tag));
                }
                expr.check(&pattern)?;
            }
            for (btag, expr) in &output.btags {
                if !output.variant.has_btag(*btag) {
                    return Err(BuildError::FilterUndeclaredBTag(*btag));
                }
                expr.check(&pattern)?;
            }
            outputs.push(CompiledOutput {
                variant: Arc::new(output.variant),
                fields: output.fields,
                tags: output.tags,
                btags: output.btags,
            });
        }
        Ok(Self { pattern, outputs })
    }
}

async fn run_filter(
    rules: Vec<Compiled>,
    location: Location,
    mut input: StreamRx,
    mut out: StreamTx,
) {
    while let Some(record) = input.read().await {
        match record {
            Record::Sync { rx } => drop(input.replace(rx)),
            Record::Terminate => break,
            Record::Data(mut data) => {
                let Some(rule) = rules.iter().find(|rule| data.matches(&rule.pattern)) else {
                    warn!(shape = ?data.shape(), "record matches no filter rule, dropped");
                    continue;
                };
                let mut staged = Vec::with_capacity(rule.outputs.len());
                for output in &rule.outputs {
                    let mut record = DataRecord::new(Arc::clone(&output.variant), data.interface());
                    record.set_location(location.clone());
                    for (tag, expr) in &output.tags {
                        record.set_tag(*tag, expr.eval(&data));
                    }
                    for (btag, expr) in &output.btags {
                        record.set_btag(*btag, expr.eval(&data));
                    }
                    for op in &output.fields {
                        if let FieldOp::Copy { from, to } = op {
                            let Some(payload) = data.field(*from) else {
                                panic!("field bound by the pattern is missing from the record");
                            };
                            record.set_field(*to, payload.clone());
                        }
                    }
                    staged.push(record);
                }
                // takes run after every copy has resolved
                for (output, record) in rule.outputs.iter().zip(staged.iter_mut()) {
                    for op in &output.fields {
                        if let FieldOp::Take { from, to } = op {
                            record.set_field(*to, data.take_field(*from));
                        }
                    }
                }
                for record in staged {
                    if out.write(Record::Data(record)).await.is_err() {
                        return;
                    }
                }
            }
            record => {
                if out.write(record).await.is_err() {
                    return;
                }
            }
        }
    }
    let _ = out.write(Record::Terminate).await;
}
