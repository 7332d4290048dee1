//! Serial composition: the output of one network feeds the next. Pure
//! wiring, no entity of its own.

use std::sync::Arc;

use crate::runtime::sched::EntityKind;
use crate::runtime::stream::StreamRx;

use super::{NetFn, SpawnCtx};

pub fn serial(first: NetFn, second: NetFn) -> NetFn {
    Arc::new(move |ctx: &mut SpawnCtx, input: StreamRx| {
        let mut left = ctx.enter(EntityKind::Serial, 0);
        let mid = first(&mut left, input);
        let mut right = ctx.enter(EntityKind::Serial, 1);
        second(&mut right, mid)
    })
}
