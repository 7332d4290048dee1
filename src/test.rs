#![cfg(test)]

//! End-to-end runs of the built-in demo networks, plus the cross-cutting
//! properties a single combinator test cannot show: behavior under tight
//! stream capacities, payload sharing across a network, shutdown, and
//! state shared between boxes.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use futures::executor::block_on;

use crate::demos;
use crate::label::{Labels, TagId, Variant};
use crate::net::{
    box_net, closure_box, filter, parallel, syncro, FieldOp, FilterOutput, FilterRule, Mode,
};
use crate::record::payload::{InterfaceRegistry, Payload};
use crate::record::{DataRecord, Record};
use crate::runtime::counter::AtomicCounter;
use crate::runtime::stream::{StreamRx, StreamTx};
use crate::runtime::Runtime;

fn runtime() -> Runtime {
    Runtime::builder().workers(3).stream_capacity(16).build()
}

fn tag_only(tags: &[(TagId, i64)]) -> Record {
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

fn read_data(rx: &mut StreamRx) -> DataRecord {
    match block_on(rx.read()) {
        Some(Record::Data(data)) => data,
        Some(other) => panic!("Expected a data record, got {}", other),
        None => panic!("Stream closed early"),
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn pipeline_keeps_fifo_order() {
    let rt = runtime();
    let mut demo = demos::find("pipeline").unwrap();
    let n = demo.labels.tag("n");
    let mut values = Vec::new();
    demos::run(&rt, &demo, 50, |record| values.push(record.tag(n).unwrap()));
    let expected: Vec<i64> = (0..50).map(|i| (i + 1) * 2).collect();
    assert_eq!(values, expected);
    rt.shutdown();
}

#[test]
fn routes_merge_in_input_order() {
    let rt = runtime();
    let mut demo = demos::find("routes").unwrap();
    let n = demo.labels.tag("n");
    let mut values = Vec::new();
    demos::run(&rt, &demo, 90, |record| values.push(record.tag(n).unwrap()));
    let expected: Vec<i64> = (0..90)
        .map(|i| if i % 3 == 0 { i * 100 } else { i + 1000 })
        .collect();
    assert_eq!(values, expected);
    rt.shutdown();
}

#[test]
fn deal_keeps_order_across_instances() {
    let rt = runtime();
    let mut demo = demos::find("deal").unwrap();
    let n = demo.labels.tag("n");
    let worker = demo.labels.tag("worker");
    let mut pairs = Vec::new();
    demos::run(&rt, &demo, 40, |record| {
        pairs.push((record.tag(n).unwrap(), record.tag(worker).unwrap()));
    });
    let expected: Vec<(i64, i64)> = (0..40).map(|i| (i * 2, i % 4)).collect();
    assert_eq!(pairs, expected);
    rt.shutdown();
}

#[test]
fn factorial_loops_until_done() {
    fn fact(n: i64) -> i64 {
        (1..=n).product()
    }
    let rt = runtime();
    let mut demo = demos::find("factorial").unwrap();
    let acc = demo.labels.tag("acc");
    let mut values = Vec::new();
    demos::run(&rt, &demo, 20, |record| {
        values.push(record.tag(acc).unwrap());
    });
    let expected: Vec<i64> = (0..20).map(|i| fact(i % 10 + 1)).collect();
    assert_eq!(values, expected);
    rt.shutdown();
}

#[test]
fn join_pairs_both_sides() {
    let rt = runtime();
    let mut demo = demos::find("join").unwrap();
    let id = demo.labels.tag("id");
    let load = demo.labels.field("load");
    let note = demo.labels.field("note");
    let mut got = Vec::new();
    demos::run(&rt, &demo, 30, |record| got.push(record.clone()));
    assert_eq!(got.len(), 30);
    got.sort_by_key(|record| record.tag(id));
    for (i, record) in got.iter().enumerate() {
        let i = i as i64;
        assert_eq!(record.tag(id), Some(i));
        assert_eq!(record.field(load).unwrap().downcast_ref::<i64>(), Some(&i));
        assert_eq!(
            record.field(note).unwrap().downcast_ref::<i64>(),
            Some(&(i * 1000))
        );
    }
    rt.shutdown();
}

#[test]
fn tight_streams_still_flow() {
    // capacity one forces every hand-off through the blocking path
    let rt = Runtime::builder().workers(2).stream_capacity(1).build();
    let mut demo = demos::find("routes").unwrap();
    let n = demo.labels.tag("n");
    let mut values = Vec::new();
    demos::run(&rt, &demo, 30, |record| values.push(record.tag(n).unwrap()));
    let expected: Vec<i64> = (0..30)
        .map(|i| if i % 3 == 0 { i * 100 } else { i + 1000 })
        .collect();
    assert_eq!(values, expected);
    rt.shutdown();
}

#[test]
fn network_unwinds_after_terminate() {
    let rt = runtime();
    let demo = demos::find("factorial").unwrap();
    demos::run(&rt, &demo, 8, |_| {});
    wait_until("all tasks to finish", || rt.live_tasks() == 0);
    rt.shutdown();
}

#[test]
fn pairing_is_bounded_by_the_smaller_side() {
    let mut labels = Labels::new();
    let id = labels.tag("id");
    let left = labels.field("left");
    let right = labels.field("right");
    let net = syncro(
        Variant::new([left], [id], []),
        Variant::new([right], [id], []),
        Some(id),
    )
    .unwrap();
    let rt = runtime();
    let (main_feed, aux_feed, mut out) = rt.mount_join(&net);
    let mains = (0..5)
        .map(|i| {
            let mut record =
                DataRecord::new(Arc::new(Variant::new([left], [id], [])), InterfaceRegistry::INT);
            record.set_field(left, Payload::new(i));
            record.set_tag(id, i);
            Record::Data(record)
        })
        .collect();
    let auxes = (0..3)
        .map(|i| {
            let mut record =
                DataRecord::new(Arc::new(Variant::new([right], [id], [])), InterfaceRegistry::INT);
            record.set_field(right, Payload::new(i));
            record.set_tag(id, i);
            Record::Data(record)
        })
        .collect();
    let main = feed_thread(main_feed, mains);
    let aux = feed_thread(aux_feed, auxes);
    let mut paired = 0;
    let mut passed = 0;
    loop {
        match block_on(out.read()) {
            Some(Record::Data(data)) => {
                if data.field(right).is_some() {
                    paired += 1;
                } else {
                    passed += 1;
                }
            }
            Some(Record::Terminate) | None => break,
            Some(other) => panic!("Unexpected record {}", other),
        }
    }
    // every aux record has a partner; mains 3 and 4 either pass through
    // after the aux side finishes or are dropped at shutdown
    assert_eq!(paired, 3);
    assert!(passed <= 2, "{} unpaired records came through", passed);
    main.join().unwrap();
    aux.join().unwrap();
    rt.shutdown();
}

#[test]
fn shared_payloads_keep_one_copy() {
    let mut labels = Labels::new();
    let data = labels.field("data");
    let shape = Variant::new([data], [], []);
    let rule = FilterRule {
        pattern: shape.clone(),
        outputs: vec![
            FilterOutput {
                variant: shape.clone(),
                fields: vec![FieldOp::Take { from: data, to: data }],
                tags: vec![],
                btags: vec![],
            },
            FilterOutput {
                variant: shape.clone(),
                fields: vec![FieldOp::Copy { from: data, to: data }],
                tags: vec![],
                btags: vec![],
            },
        ],
    };
    let net = filter(vec![rule]).unwrap();
    let rt = runtime();
    let (mut feed, mut out) = rt.mount(&net);
    let mut record = DataRecord::new(Arc::new(shape), InterfaceRegistry::INT);
    record.set_field(data, Payload::new(41_i64));
    block_on(feed.write(Record::Data(record))).unwrap();
    block_on(feed.write(Record::Terminate)).unwrap();
    let first = read_data(&mut out);
    let second = read_data(&mut out);
    let payload = first.field(data).unwrap();
    assert_eq!(payload.downcast_ref::<i64>(), Some(&41));
    assert_eq!(payload.holders(), 2);
    drop(second);
    assert_eq!(first.field(data).unwrap().holders(), 1);
    assert!(matches!(block_on(out.read()), Some(Record::Terminate)));
    rt.shutdown();
}

#[test]
fn boxes_share_state_through_a_counter() {
    let mut labels = Labels::new();
    let n = labels.tag("n");
    let flag = labels.tag("flag");
    let seen = AtomicCounter::new(0);
    let count_a = {
        let seen = seen.clone();
        closure_box("count_a", move |out, record| {
            seen.fetch_inc();
            out.forward(record);
            Ok(())
        })
    };
    let count_b = {
        let seen = seen.clone();
        closure_box("count_b", move |out, record| {
            seen.fetch_inc();
            out.forward(record);
            Ok(())
        })
    };
    let net = parallel(
        vec![
            (Variant::new([], [n], []), box_net(count_a, vec![])),
            (Variant::new([], [n, flag], []), box_net(count_b, vec![])),
        ],
        Mode::Nondet,
    )
    .unwrap();
    let rt = runtime();
    let (feed, mut out) = rt.mount(&net);
    let records = (0..20)
        .map(|i| {
            if i % 2 == 0 {
                tag_only(&[(n, i)])
            } else {
                tag_only(&[(n, i), (flag, 1)])
            }
        })
        .collect();
    let feeder = feed_thread(feed, records);
    let mut total = 0;
    loop {
        match block_on(out.read()) {
            Some(Record::Data(_)) => total += 1,
            Some(Record::Terminate) | None => break,
            Some(other) => panic!("Unexpected record {}", other),
        }
    }
    assert_eq!(total, 20);
    assert_eq!(seen.get(), 20);
    feeder.join().unwrap();
    rt.shutdown();
}
