//! End-to-end ordering, correlation, shutdown, and ownership properties,
//! exercised through the public API the way an embedding application would.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use futures::executor::block_on;

use weir::label::{Labels, TagId, Variant};
use weir::net::SpawnCtx;
use weir::net::{box_net, closure_box, parallel, serial, split, star, syncro, Mode, NetFn};
use weir::record::payload::{InterfaceRegistry, Payload};
use weir::record::{DataRecord, Record};
use weir::runtime::counter::AtomicCounter;
use weir::runtime::stream::{StreamRx, StreamTx};
use weir::runtime::Runtime;

fn runtime() -> Runtime {
    Runtime::builder().workers(4).stream_capacity(16).build()
}

fn record_with(tags: &[(TagId, i64)]) -> Record {
    let variant = Arc::new(Variant::new([], tags.iter().map(|(tag, _)| *tag), []));
    let mut record = DataRecord::new(variant, InterfaceRegistry::INT);
    for (tag, value) in tags {
        record.set_tag(*tag, *value);
    }
    Record::Data(record)
}

fn feed_thread(mut tx: StreamTx, records: Vec<Record>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for record in records {
            block_on(tx.write(record)).unwrap();
        }
        block_on(tx.write(Record::Terminate)).unwrap();
    })
}

/// Reads values of `tag` until the terminate arrives; anything else on the
/// stream fails the test.
fn drain(rx: &mut StreamRx, tag: TagId) -> Vec<i64> {
    let mut values = Vec::new();
    loop {
        match block_on(rx.read()) {
            Some(Record::Data(data)) => values.push(data.tag(tag).unwrap()),
            Some(Record::Terminate) => return values,
            Some(other) => panic!("Unexpected record {}", other),
            None => panic!("Stream closed before a terminate"),
        }
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        if Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// A box that stalls for a value-dependent pseudo-random time before
/// forwarding, so branch completion order has nothing to do with arrival
/// order.
fn jittery_box(name: &'static str, n: TagId) -> NetFn {
    box_net(
        closure_box(name, move |out, record| {
            let value = record.tag(n).unwrap();
            let jitter = value.wrapping_mul(2654435761).rem_euclid(4) as u64;
            thread::sleep(Duration::from_millis(jitter));
            out.forward(record);
            Ok(())
        }),
        vec![],
    )
}

#[test]
fn parallel_det_restores_order_under_jitter() {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let a = labels.tag("a");
    let b = labels.tag("b");
    let c = labels.tag("c");
    let net = parallel(
        vec![
            (Variant::new([], [n, a], []), jittery_box("left", n)),
            (Variant::new([], [n, b], []), jittery_box("middle", n)),
            (Variant::new([], [n, c], []), jittery_box("right", n)),
        ],
        Mode::Det,
    )
    .unwrap();
    let rt = runtime();
    let (feed, mut out) = rt.mount(&net);
    let records = (1..=100)
        .map(|i| {
            let branch = [a, b, c][(i % 3) as usize];
            record_with(&[(n, i), (branch, 0)])
        })
        .collect();
    let feeder = feed_thread(feed, records);
    let expected: Vec<i64> = (1..=100).collect();
    assert_eq!(drain(&mut out, n), expected);
    feeder.join().unwrap();
    rt.shutdown();
}

#[test]
fn split_det_restores_order_under_jitter() {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let key = labels.tag("key");
    let net = split(key, 0, 4, jittery_box("stage", n), Mode::Det).unwrap();
    let rt = runtime();
    let (feed, mut out) = rt.mount(&net);
    let records = (1..=100)
        .map(|i| record_with(&[(n, i), (key, i % 5)]))
        .collect();
    let feeder = feed_thread(feed, records);
    let expected: Vec<i64> = (1..=100).collect();
    assert_eq!(drain(&mut out, n), expected);
    feeder.join().unwrap();
    rt.shutdown();
}

#[test]
fn split_det_spawns_one_instance_per_key() {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let key = labels.tag("key");
    let instances = AtomicCounter::new(0);
    let body = box_net(
        closure_box("echo", |out, record| {
            out.forward(record);
            Ok(())
        }),
        vec![],
    );
    let counted: NetFn = {
        let instances = instances.clone();
        Arc::new(move |ctx: &mut SpawnCtx, rx: StreamRx| {
            instances.fetch_inc();
            body(ctx, rx)
        })
    };
    let net = split(key, 0, 2, counted, Mode::Det).unwrap();
    let rt = runtime();
    let (feed, mut out) = rt.mount(&net);
    let records = [0, 1, 2, 0, 1, 2]
        .iter()
        .map(|&k| record_with(&[(n, k), (key, k)]))
        .collect();
    let feeder = feed_thread(feed, records);
    assert_eq!(drain(&mut out, n), vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(instances.get(), 3);
    feeder.join().unwrap();
    rt.shutdown();
}

#[test]
fn star_det_restores_order_under_jitter() {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let hops = labels.tag("hops");
    let done = labels.tag("done");
    let looping = Variant::new([], [n, hops], []);
    let finished = Variant::new([], [n, done], []);
    let step = box_net(
        closure_box("hop", move |out, record| {
            let value = record.tag(n).unwrap();
            let left = record.tag(hops).unwrap();
            let jitter = value.wrapping_mul(2654435761).rem_euclid(3) as u64;
            thread::sleep(Duration::from_millis(jitter));
            if left > 1 {
                out.out(0, vec![], vec![(n, value), (hops, left - 1)], vec![]);
            } else {
                out.out(1, vec![], vec![(n, value), (done, 1)], vec![]);
            }
            Ok(())
        }),
        vec![looping.clone(), finished],
    );
    let net = star(step, vec![Variant::new([], [done], [])], Mode::Det);
    let rt = runtime();
    let (feed, mut out) = rt.mount(&net);
    // loop depth varies record to record
    let records = (1..=60)
        .map(|i| record_with(&[(n, i), (hops, i % 4 + 1)]))
        .collect();
    let feeder = feed_thread(feed, records);
    let expected: Vec<i64> = (1..=60).collect();
    assert_eq!(drain(&mut out, n), expected);
    feeder.join().unwrap();
    rt.shutdown();
}

#[test]
fn join_emits_only_true_matches() {
    let mut labels = Labels::new();
    let id = labels.tag("id");
    let left = labels.field("left");
    let right = labels.field("right");
    let other = labels.tag("other");
    let net = syncro(
        Variant::new([left], [id], []),
        Variant::new([right], [id], []),
        Some(id),
    )
    .unwrap();
    let rt = runtime();
    let (main_feed, aux_feed, mut out) = rt.mount_join(&net);

    let main_records: Vec<Record> = (0..12)
        .map(|i| {
            if i % 3 == 0 {
                // does not match the main pattern, passes through
                record_with(&[(other, i)])
            } else {
                let variant = Arc::new(Variant::new([left], [id], []));
                let mut record = DataRecord::new(variant, InterfaceRegistry::INT);
                record.set_field(left, Payload::new(i));
                record.set_tag(id, i);
                Record::Data(record)
            }
        })
        .collect();
    // only even ids show up on the aux side, so matches exist for 4 and 8,
    // 2 and 10 wait forever
    let aux_records: Vec<Record> = [4_i64, 8, 20, 40]
        .iter()
        .map(|&i| {
            let variant = Arc::new(Variant::new([right], [id], []));
            let mut record = DataRecord::new(variant, InterfaceRegistry::INT);
            record.set_field(right, Payload::new(i));
            record.set_tag(id, i);
            Record::Data(record)
        })
        .collect();

    let main = feed_thread(main_feed, main_records);
    let aux = feed_thread(aux_feed, aux_records);

    let mut combined = Vec::new();
    loop {
        match block_on(out.read()) {
            Some(Record::Data(data)) => {
                if data.field(left).is_some() && data.field(right).is_some() {
                    combined.push(data.tag(id).unwrap());
                }
            }
            Some(Record::Terminate) | None => break,
            Some(unexpected) => panic!("Unexpected record {}", unexpected),
        }
    }
    combined.sort_unstable();
    assert_eq!(combined, vec![4, 8]);
    main.join().unwrap();
    aux.join().unwrap();
    rt.shutdown();
}

#[test]
fn terminate_sweeps_a_deep_graph() {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let echo = || {
        box_net(
            closure_box("echo", |out, record| {
                out.forward(record);
                Ok(())
            }),
            vec![],
        )
    };
    // depth eight: boxes, a det parallel, and a det split nested in series
    let mut net = echo();
    for _ in 0..3 {
        net = serial(net, echo());
    }
    net = serial(
        net,
        parallel(vec![(Variant::new([], [n], []), echo())], Mode::Det).unwrap(),
    );
    net = serial(net, split(n, 0, 9, echo(), Mode::Det).unwrap());

    let rt = runtime();
    let (mut feed, mut out) = rt.mount(&net);
    block_on(feed.write(Record::Data({
        let variant = Arc::new(Variant::new([], [n], []));
        let mut record = DataRecord::new(variant, InterfaceRegistry::INT);
        record.set_tag(n, 3);
        record
    })))
    .unwrap();
    block_on(feed.write(Record::Terminate)).unwrap();

    assert_eq!(drain(&mut out, n), vec![3]);
    // exactly one terminate came out; after it the stream is done
    wait_until("all tasks to finish", || rt.live_tasks() == 0);
    assert!(block_on(out.read()).is_none());
    rt.shutdown();
}

/// Payload whose drop decrements a counter, so tests can observe the moment
/// the last holder lets go.
struct Tracked {
    alive: AtomicCounter,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.alive.fetch_dec();
    }
}

#[test]
fn fanned_out_payload_is_freed_exactly_once() {
    let mut labels = Labels::new();
    let data = labels.field("data");
    let copy = labels.tag("copy");
    let shape = Variant::new([data], [], []);
    let stamped = Variant::new([data], [copy], []);

    // one box fans each record out to three shared-payload copies
    let fan = box_net(
        closure_box("fan", move |out, mut record| {
            let payload = record.take_field(data);
            for i in 0..3 {
                out.out(0, vec![(data, payload.clone())], vec![(copy, i)], vec![]);
            }
            Ok(())
        }),
        vec![stamped],
    );

    let alive = AtomicCounter::new(1);
    let rt = runtime();
    let (mut feed, mut out) = rt.mount(&fan);
    let mut record = DataRecord::new(Arc::new(shape), InterfaceRegistry::INT);
    record.set_field(
        data,
        Payload::new(Tracked {
            alive: alive.clone(),
        }),
    );
    block_on(feed.write(Record::Data(record))).unwrap();
    block_on(feed.write(Record::Terminate)).unwrap();

    let mut copies = Vec::new();
    loop {
        match block_on(out.read()) {
            Some(Record::Data(data_record)) => copies.push(data_record),
            Some(Record::Terminate) | None => break,
            Some(unexpected) => panic!("Unexpected record {}", unexpected),
        }
    }
    assert_eq!(copies.len(), 3);
    assert_eq!(copies[0].field(data).unwrap().holders(), 3);
    assert_eq!(alive.get(), 1);

    copies.pop();
    copies.pop();
    assert_eq!(alive.get(), 1);
    copies.pop();
    // the third holder was the last one; the payload went with it
    assert_eq!(alive.get(), 0);
    rt.shutdown();
}
