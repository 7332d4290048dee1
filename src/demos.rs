//! Built-in demo networks, shared by the CLI and the integration tests.
//!
//! Each demo owns its label table, its wiring, and an input generator. The
//! [`run`] driver mounts the wiring, feeds the generated records from a
//! separate thread, and hands every record that comes out to a callback. A
//! probe follows the last record; the time it takes to surface again is the
//! network's drain latency, reported alongside the record count.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use futures::executor::block_on;
use tokio::sync::oneshot;
use tracing::warn;

use crate::label::{Labels, TagId, Variant};
use crate::net::{
    box_net, closure_box, parallel, serial, split, star, syncro, BoxError, JoinFn, Mode, NetFn,
};
use crate::record::payload::{InterfaceRegistry, Payload};
use crate::record::{DataRecord, Record};
use crate::runtime::stream::StreamTx;
use crate::runtime::Runtime;

/// A network with everything needed to drive it.
pub struct Demo {
    pub name: &'static str,
    pub about: &'static str,
    pub labels: Labels,
    pub wiring: Wiring,
    feed: Box<dyn Fn(usize) -> Feeds + Send + Sync>,
}

pub enum Wiring {
    Single(NetFn),
    Dual(JoinFn),
}

/// Input for the main feed and, for dual-input demos, the aux feed.
pub struct Feeds {
    pub main: Vec<Record>,
    pub aux: Vec<Record>,
}

impl Demo {
    pub fn feeds(&self, count: usize) -> Feeds {
        (self.feed)(count)
    }
}

pub fn all() -> Vec<Demo> {
    vec![pipeline(), routes(), deal(), factorial(), join()]
}

pub fn find(name: &str) -> Option<Demo> {
    all().into_iter().find(|demo| demo.name == name)
}

fn tagged(variant: &Arc<Variant>, tags: &[(TagId, i64)]) -> Record {
    let mut record = DataRecord::new(Arc::clone(variant), InterfaceRegistry::INT);
    for (tag, value) in tags {
        record.set_tag(*tag, *value);
    }
    Record::Data(record)
}

/// Two boxes in series: increment, then double.
fn pipeline() -> Demo {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let shape = Variant::new([], [n], []);
    let inc = box_net(
        closure_box("inc", move |out, record| {
            let Some(value) = record.tag(n) else {
                return Err(BoxError::new("record lacks <n>"));
            };
            out.out(0, vec![], vec![(n, value + 1)], vec![]);
            Ok(())
        }),
        vec![shape.clone()],
    );
    let double = box_net(
        closure_box("double", move |out, record| {
            let Some(value) = record.tag(n) else {
                return Err(BoxError::new("record lacks <n>"));
            };
            out.out(0, vec![], vec![(n, value * 2)], vec![]);
            Ok(())
        }),
        vec![shape.clone()],
    );
    let feed_shape = Arc::new(shape);
    Demo {
        name: "pipeline",
        about: "two boxes in series: increment, then double",
        labels,
        wiring: Wiring::Single(serial(inc, double)),
        feed: Box::new(move |count| Feeds {
            main: (0..count as i64)
                .map(|i| tagged(&feed_shape, &[(n, i)]))
                .collect(),
            aux: Vec::new(),
        }),
    }
}

/// Records fan out to the widest matching branch and merge back in input
/// order.
fn routes() -> Demo {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let vip = labels.tag("vip");
    let plain = Variant::new([], [n], []);
    let marked = Variant::new([], [n, vip], []);
    let fast = box_net(
        closure_box("fast", move |out, record| {
            let Some(value) = record.tag(n) else {
                return Err(BoxError::new("record lacks <n>"));
            };
            out.out(0, vec![], vec![(n, value * 100)], vec![]);
            Ok(())
        }),
        vec![plain.clone()],
    );
    let slow = box_net(
        closure_box("slow", move |out, record| {
            let Some(value) = record.tag(n) else {
                return Err(BoxError::new("record lacks <n>"));
            };
            out.out(0, vec![], vec![(n, value + 1000)], vec![]);
            Ok(())
        }),
        vec![plain.clone()],
    );
    let wiring = parallel(
        vec![(marked.clone(), fast), (plain.clone(), slow)],
        Mode::Det,
    )
    .expect("routes wiring is valid");
    let plain = Arc::new(plain);
    let marked = Arc::new(marked);
    Demo {
        name: "routes",
        about: "records fan out to the widest matching branch and merge back in order",
        labels,
        wiring: Wiring::Single(wiring),
        feed: Box::new(move |count| Feeds {
            main: (0..count as i64)
                .map(|i| {
                    if i % 3 == 0 {
                        tagged(&marked, &[(n, i), (vip, 1)])
                    } else {
                        tagged(&plain, &[(n, i)])
                    }
                })
                .collect(),
            aux: Vec::new(),
        }),
    }
}

/// A routing tag deals records across per-value body instances.
fn deal() -> Demo {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let worker = labels.tag("worker");
    let shape = Variant::new([], [n, worker], []);
    let stamp = box_net(
        closure_box("stamp", move |out, record| {
            let (Some(value), Some(who)) = (record.tag(n), record.tag(worker)) else {
                return Err(BoxError::new("record lacks <n> or <worker>"));
            };
            out.out(0, vec![], vec![(n, value * 2), (worker, who)], vec![]);
            Ok(())
        }),
        vec![shape.clone()],
    );
    let wiring = split(worker, 0, 3, stamp, Mode::Det).expect("deal wiring is valid");
    let shape = Arc::new(shape);
    Demo {
        name: "deal",
        about: "a routing tag deals records across per-value body instances",
        labels,
        wiring: Wiring::Single(wiring),
        feed: Box::new(move |count| Feeds {
            main: (0..count as i64)
                .map(|i| tagged(&shape, &[(n, i), (worker, i % 4)]))
                .collect(),
            aux: Vec::new(),
        }),
    }
}

/// A loop that multiplies down the counter until it hits one.
fn factorial() -> Demo {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let acc = labels.tag("acc");
    let done = labels.tag("done");
    let looping = Variant::new([], [n, acc], []);
    let finished = Variant::new([], [acc, done], []);
    let step = box_net(
        closure_box("fact_step", move |out, record| {
            let (Some(counter), Some(total)) = (record.tag(n), record.tag(acc)) else {
                return Err(BoxError::new("record lacks <n> or <acc>"));
            };
            if counter <= 1 {
                out.out(1, vec![], vec![(acc, total), (done, 1)], vec![]);
            } else {
                out.out(0, vec![], vec![(n, counter - 1), (acc, total * counter)], vec![]);
            }
            Ok(())
        }),
        vec![looping.clone(), finished],
    );
    let wiring = star(step, vec![Variant::new([], [done], [])], Mode::Det);
    let looping = Arc::new(looping);
    Demo {
        name: "factorial",
        about: "a loop that multiplies down the counter until it hits one",
        labels,
        wiring: Wiring::Single(wiring),
        feed: Box::new(move |count| Feeds {
            main: (0..count as i64)
                .map(|i| tagged(&looping, &[(n, i % 10 + 1), (acc, 1)]))
                .collect(),
            aux: Vec::new(),
        }),
    }
}

/// Two inputs paired by a correlation tag; the pair keeps both payloads.
fn join() -> Demo {
    let mut labels = Labels::new();
    let id = labels.tag("id");
    let load = labels.field("load");
    let note = labels.field("note");
    let main = Variant::new([load], [id], []);
    let aux = Variant::new([note], [id], []);
    let wiring = syncro(main.clone(), aux.clone(), Some(id)).expect("join wiring is valid");
    let main = Arc::new(main);
    let aux = Arc::new(aux);
    Demo {
        name: "join",
        about: "two inputs paired by a correlation tag",
        labels,
        wiring: Wiring::Dual(wiring),
        feed: Box::new(move |count| {
            let main_records = (0..count as i64)
                .map(|i| {
                    let mut record = DataRecord::new(Arc::clone(&main), InterfaceRegistry::INT);
                    record.set_field(load, Payload::new(i));
                    record.set_tag(id, i);
                    Record::Data(record)
                })
                .collect();
            // the aux side arrives in reverse, so pairing has to buffer
            let aux_records = (0..count as i64)
                .rev()
                .map(|i| {
                    let mut record = DataRecord::new(Arc::clone(&aux), InterfaceRegistry::INT);
                    record.set_field(note, Payload::new(i * 1000));
                    record.set_tag(id, i);
                    Record::Data(record)
                })
                .collect();
            Feeds {
                main: main_records,
                aux: aux_records,
            }
        }),
    }
}

/// What [`run`] reports back once the network has terminated.
#[derive(serde::Serialize)]
pub struct Report {
    pub records: usize,
    pub probe_round_trip: Duration,
    pub elapsed: Duration,
}

/// Mounts `demo` on `runtime`, feeds `count` generated records followed by
/// a probe, and hands every data record that comes out to `sink`. Returns
/// once the network has terminated.
pub fn run(
    runtime: &Runtime,
    demo: &Demo,
    count: usize,
    mut sink: impl FnMut(&DataRecord),
) -> Report {
    let started = Instant::now();
    let feeds = demo.feeds(count);
    let (mark_tx, mut mark_rx) = oneshot::channel();
    let mut feeders = Vec::new();
    let mut out = match &demo.wiring {
        Wiring::Single(net) => {
            let (feed, out) = runtime.mount(net);
            feeders.push(spawn_feeder(feed, feeds.main, Some(mark_tx)));
            out
        }
        Wiring::Dual(net) => {
            let (main_feed, aux_feed, out) = runtime.mount_join(net);
            feeders.push(spawn_feeder(main_feed, feeds.main, Some(mark_tx)));
            feeders.push(spawn_feeder(aux_feed, feeds.aux, None));
            out
        }
    };
    let mut records = 0;
    let mut probe_round_trip = Duration::ZERO;
    loop {
        match block_on(out.read()) {
            Some(Record::Data(data)) => {
                records += 1;
                sink(&data);
            }
            Some(Record::Probe) => {
                if let Ok(sent) = mark_rx.try_recv() {
                    probe_round_trip = sent.elapsed();
                }
            }
            Some(Record::Terminate) | None => break,
            Some(other) => {
                warn!(kind = other.kind_name(), "unexpected record at the network boundary");
            }
        }
    }
    for feeder in feeders {
        let _ = feeder.join();
    }
    Report {
        records,
        probe_round_trip,
        elapsed: started.elapsed(),
    }
}

fn spawn_feeder(
    mut tx: StreamTx,
    records: Vec<Record>,
    mark: Option<oneshot::Sender<Instant>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for record in records {
            if block_on(tx.write(record)).is_err() {
                return;
            }
        }
        if let Some(mark) = mark {
            let _ = mark.send(Instant::now());
            if block_on(tx.write(Record::Probe)).is_err() {
                return;
            }
        }
        let _ = block_on(tx.write(Record::Terminate));
    })
}
