use crate::location::Location;
use crate::runtime::sched::EntityKind;
use crate::runtime::stream::StreamRx;

/// What is being wired when a stream is offered to the router: which
/// construct the stream belongs to, and which of its streams this is. A
/// distributed router dispatches on this plus the location; the location
/// alone says where the construct sits, not what the stream does there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteInfo {
    /// The feed into branch `branch` of a `kind` construct.
    Feed { kind: EntityKind, branch: u32 },
    /// The output leaving a `kind` construct.
    Output { kind: EntityKind },
}

/// The distribution seam. A single-process runtime routes nothing, but
/// every stream crossing a combinator boundary is offered to the router so
/// a distributed layer can interpose transport without the combinators
/// knowing.
pub trait Router: Send + Sync {
    /// Called when `rx` crosses a construct boundary described by `info`
    /// at `at`. Identity by default; a distributed router may splice in a
    /// transport stream here.
    fn route_update(&self, info: RouteInfo, rx: StreamRx, at: &Location) -> StreamRx {
        let _ = (info, at);
        rx
    }

    /// Whether the construct at `at` is placed on this node.
    fn is_node_location(&self, at: &Location) -> bool {
        let _ = at;
        true
    }

    fn is_root_node(&self) -> bool {
        true
    }
}

/// The single-node router: everything is local, nothing moves.
pub struct SingleNode;

impl Router for SingleNode {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::stream::channel;

    #[test]
    fn single_node_is_identity() {
        let router = SingleNode;
        let at = Location::root();
        assert!(router.is_root_node());
        assert!(router.is_node_location(&at));
        let (_tx, rx) = channel(0);
        let id = rx.id();
        let info = RouteInfo::Output {
            kind: EntityKind::Box,
        };
        let routed = router.route_update(info, rx, &at);
        assert_eq!(routed.id(), id);
    }
}
