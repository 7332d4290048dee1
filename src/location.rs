use crate::runtime::sched::EntityKind;
use std::fmt;
use std::sync::Arc;

/// One step of a location path: which construct was entered, and which of
/// its branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    pub kind: EntityKind,
    pub branch: u32,
}

/// Position of an entity (or a record) in the unfolded network graph: the
/// ordered path of construct entries from the root.
///
/// Locations are pushed when wiring enters a combinator scope and stamped on
/// data records as they pass the boundary. They give entities stable
/// identities for monitoring and are what routing collaborators dispatch on.
/// Paths are immutable and shared, so stamping a record is one refcount.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    path: Arc<[Step]>,
}

impl Location {
    pub fn root() -> Self {
        Self {
            path: Arc::from([]),
        }
    }

    /// The location one scope deeper, entering `branch` of a `kind` construct.
    pub fn enter(&self, kind: EntityKind, branch: u32) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.extend_from_slice(&self.path);
        path.push(Step { kind, branch });
        Self {
            path: Arc::from(path),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            return write!(f, "/");
        }
        for step in self.path.iter() {
            write!(f, "/{}:{}", step.kind, step.branch)?;
        }
        Ok(())
    }
}
