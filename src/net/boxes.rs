//! The box entity: user computation wrapped as a single network stage.
//! A box reads one data record at a time, runs the user function on it, and
//! ships whatever the function emitted. Control records pass through
//! untouched, in order, so brackets and terminates survive a chain of boxes.

use std::fmt;
use std::sync::Arc;

use arcstr::ArcStr;
use tracing::error;

use crate::label::{BTagId, FieldId, TagId, Variant};
use crate::location::Location;
use crate::record::payload::{InterfaceId, Payload};
use crate::record::{DataRecord, Record};
use crate::runtime::sched::{stack_budget, EntityKind};
use crate::runtime::stream::{StreamRx, StreamTx};

use super::{NetFn, RouteInfo};

/// User computation plugged into a network.
///
/// `call` consumes one input record: take the fields it needs, emit any
/// number of outputs through the outlet, or forward the record as is. A
/// returned error drops the offending record and is reported; the box keeps
/// running for the rest of the stream.
pub trait BoxFn: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn call(&self, out: &mut Outlet<'_>, record: DataRecord) -> Result<(), BoxError>;
}

/// A failure inside user box code, attributed to the record that caused it.
#[derive(Debug)]
pub struct BoxError {
    message: String,
}

impl BoxError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for BoxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BoxError {}

/// Collects one call's outputs; the wrapper flushes them downstream in
/// emission order after the call returns.
pub struct Outlet<'a> {
    variants: &'a [Arc<Variant>],
    interface: InterfaceId,
    location: &'a Location,
    staged: Vec<DataRecord>,
}

impl Outlet<'_> {
    /// Builds and stages a record of the box's `variant`-th declared output
    /// shape. Values must belong to that shape; the new record carries the
    /// input's interface id and the box's location.
    pub fn out(
        &mut self,
        variant: usize,
        fields: Vec<(FieldId, Payload)>,
        tags: Vec<(TagId, i64)>,
        btags: Vec<(BTagId, i64)>,
    ) {
        let Some(variant) = self.variants.get(variant) else {
            panic!("box output variant {} is not declared", variant);
        };
        let mut record = DataRecord::new(Arc::clone(variant), self.interface);
        record.set_location(self.location.clone());
        for (id, payload) in fields {
            record.set_field(id, payload);
        }
        for (id, value) in tags {
            record.set_tag(id, value);
        }
        for (id, value) in btags {
            record.set_btag(id, value);
        }
        self.staged.push(record);
    }

    /// Stages an existing record unchanged, keeping its shape and location.
    pub fn forward(&mut self, record: DataRecord) {
        self.staged.push(record);
    }
}

/// Wraps `func` as a single-entity network with the given output shapes.
pub fn box_net(func: Arc<dyn BoxFn>, outputs: Vec<Variant>) -> NetFn {
    let outputs: Arc<[Arc<Variant>]> = outputs.into_iter().map(Arc::new).collect();
    Arc::new(move |ctx: &mut super::SpawnCtx, input: StreamRx| {
        let ctx = ctx.enter(EntityKind::Box, 0);
        let (out_tx, out_rx) = ctx.stream();
        let location = ctx.location().clone();
        ctx.spawn(
            EntityKind::Box,
            run_box(
                Arc::clone(&func),
                Arc::clone(&outputs),
                location,
                input,
                out_tx,
            ),
        );
        ctx.route(
            RouteInfo::Output {
                kind: EntityKind::Box,
            },
            out_rx,
        )
    })
}

/// Adapts a closure as a named box.
pub fn closure_box<F>(name: impl Into<ArcStr>, func: F) -> Arc<dyn BoxFn>
where
    F: Fn(&mut Outlet<'_>, DataRecord) -> Result<(), BoxError> + Send + Sync + 'static,
{
    struct Closure<F> {
        name: ArcStr,
        func: F,
    }
    impl<F> BoxFn for Closure<F>
    where
        F: Fn(&mut Outlet<'_>, DataRecord) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        fn name(&self) -> &str {
            &self.name
        }
        fn call(&self, out: &mut Outlet<'_>, record: DataRecord) -> Result<(), BoxError> {
            (self.func)(out, record)
        }
    }
    Arc::new(Closure {
        name: name.into(),
        func,
    })
}

async fn run_box(
    func: Arc<dyn BoxFn>,
    outputs: Arc<[Arc<Variant>]>,
    location: Location,
    mut input: StreamRx,
    mut out: StreamTx,
) {
    while let Some(record) = input.read().await {
        match record {
            Record::Sync { rx } => drop(input.replace(rx)),
            Record::Terminate => break,
            Record::Data(data) => {
                let mut outlet = Outlet {
                    variants: &outputs,
                    interface: data.interface(),
                    location: &location,
                    staged: Vec::new(),
                };
                // User code runs on a worker's stack; deep recursion gets a
                // segment of its own instead of overflowing.
                let result = match stack_budget(EntityKind::Box) {
                    Some((red_zone, growth)) => {
                        stacker::maybe_grow(red_zone, growth, || func.call(&mut outlet, data))
                    }
                    None => func.call(&mut outlet, data),
                };
                match result {
                    Ok(()) => {
                        for record in outlet.staged {
                            if out.write(Record::Data(record)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        error!(name = func.name(), %err, "box call failed, record dropped");
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
