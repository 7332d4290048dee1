//! Records: the self-describing data packets flowing through streams.
//!
//! A record is either a data record (fields, tags, binding tags, validated
//! against its variant) or one of the control kinds the combinators use to
//! manage the graph: stream splices, collector membership, deterministic
//! sort brackets, termination, and liveness probes. Control records travel
//! in-band, so ordering between control and data is exactly stream order.

pub mod payload;
mod tests;

use crate::label::{BTagId, FieldId, Labels, TagId, Variant};
use crate::location::Location;
use crate::runtime::stream::StreamRx;
use indexmap::IndexMap;
use payload::{InterfaceId, InterfaceRegistry, Payload};
use std::fmt;
use std::sync::Arc;

/// Bracket stamp for deterministic merge: the det scope that stamped it and
/// the input sequence number of the bracketed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortMark {
    pub level: u32,
    pub seq: u64,
}

#[derive(Debug)]
pub enum Record {
    Data(DataRecord),
    /// Splice: the receiving entity replaces its input descriptor with the
    /// carried one, without its own consumer noticing.
    Sync { rx: StreamRx },
    /// A new member stream for the receiving collector's set.
    Collect { rx: StreamRx },
    SortBegin(SortMark),
    SortEnd(SortMark),
    Terminate,
    Probe,
}

impl Record {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Sync { .. } => "sync",
            Self::Collect { .. } => "collect",
            Self::SortBegin(_) => "sort-begin",
            Self::SortEnd(_) => "sort-end",
            Self::Terminate => "terminate",
            Self::Probe => "probe",
        }
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate)
    }
}

impl Clone for Record {
    /// Record copy: scalar maps are deep-copied, payload references are
    /// shared by refcount. Stream-carrying records are consumed by the
    /// entity that receives them; copying one is a programming error.
    fn clone(&self) -> Self {
        match self {
            Self::Data(data) => Self::Data(data.clone()),
            Self::SortBegin(mark) => Self::SortBegin(*mark),
            Self::SortEnd(mark) => Self::SortEnd(*mark),
            Self::Terminate => Self::Terminate,
            Self::Probe => Self::Probe,
            Self::Sync { .. } | Self::Collect { .. } => {
                panic!("stream-carrying records cannot be copied")
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(data) => write!(
                f,
                "data(fields: {}, tags: {}, btags: {})",
                data.fields.len(),
                data.tags.len(),
                data.btags.len()
            ),
            Self::SortBegin(mark) => write!(f, "sort-begin({}, {})", mark.level, mark.seq),
            Self::SortEnd(mark) => write!(f, "sort-end({}, {})", mark.level, mark.seq),
            other => f.write_str(other.kind_name()),
        }
    }
}

/// A data record: payloads and integer tags keyed by label id, all declared
/// by the record's variant.
///
/// Setting an id the variant does not declare, or taking a value that is not
/// present, is a fatal programming error. Copying shares payloads; the last
/// holder of a payload frees it.
#[derive(Debug, Clone)]
pub struct DataRecord {
    variant: Arc<Variant>,
    interface: InterfaceId,
    location: Location,
    fields: IndexMap<FieldId, Payload>,
    tags: IndexMap<TagId, i64>,
    btags: IndexMap<BTagId, i64>,
}

impl DataRecord {
    pub fn new(variant: Arc<Variant>, interface: InterfaceId) -> Self {
        Self {
            variant,
            interface,
            location: Location::root(),
            fields: IndexMap::new(),
            tags: IndexMap::new(),
            btags: IndexMap::new(),
        }
    }

    pub fn variant(&self) -> &Arc<Variant> {
        &self.variant
    }

    pub fn interface(&self) -> InterfaceId {
        self.interface
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    pub fn set_field(&mut self, id: FieldId, payload: Payload) {
        if !self.variant.has_field(id) {
            panic!("field {:?} is not declared by the record's variant", id);
        }
        self.fields.insert(id, payload);
    }

    pub fn set_tag(&mut self, id: TagId, value: i64) {
        if !self.variant.has_tag(id) {
            panic!("tag {:?} is not declared by the record's variant", id);
        }
        self.tags.insert(id, value);
    }

    pub fn set_btag(&mut self, id: BTagId, value: i64) {
        if !self.variant.has_btag(id) {
            panic!("btag {:?} is not declared by the record's variant", id);
        }
        self.btags.insert(id, value);
    }

    pub fn field(&self, id: FieldId) -> Option<&Payload> {
        self.fields.get(&id)
    }

    pub fn tag(&self, id: TagId) -> Option<i64> {
        self.tags.get(&id).copied()
    }

    pub fn btag(&self, id: BTagId) -> Option<i64> {
        self.btags.get(&id).copied()
    }

    /// Transfers the field value out, clearing the slot. Taking a field that
    /// is absent (never set, or already taken) is fatal.
    pub fn take_field(&mut self, id: FieldId) -> Payload {
        match self.fields.swap_remove(&id) {
            Some(payload) => payload,
            None => panic!("field {:?} taken twice or never set", id),
        }
    }

    pub fn take_tag(&mut self, id: TagId) -> i64 {
        match self.tags.swap_remove(&id) {
            Some(value) => value,
            None => panic!("tag {:?} taken twice or never set", id),
        }
    }

    pub fn take_btag(&mut self, id: BTagId) -> i64 {
        match self.btags.swap_remove(&id) {
            Some(value) => value,
            None => panic!("btag {:?} taken twice or never set", id),
        }
    }

    /// True if the pattern's ids are all populated in this record.
    pub fn matches(&self, pattern: &Variant) -> bool {
        pattern.fields().iter().all(|id| self.fields.contains_key(id))
            && pattern.tags().iter().all(|id| self.tags.contains_key(id))
            && pattern.btags().iter().all(|id| self.btags.contains_key(id))
    }

    /// The currently populated ids as a variant.
    pub fn shape(&self) -> Variant {
        Variant::new(
            self.fields.keys().copied(),
            self.tags.keys().copied(),
            self.btags.keys().copied(),
        )
    }

    /// Merge for sync: entries of `other` are added where this record has
    /// none, and the variant widens to the union. Existing entries win.
    pub fn absorb(&mut self, other: DataRecord) {
        self.variant = Arc::new(self.variant.union(&other.variant));
        for (id, payload) in other.fields {
            self.fields.entry(id).or_insert(payload);
        }
        for (id, value) in other.tags {
            self.tags.entry(id).or_insert(value);
        }
        for (id, value) in other.btags {
            self.btags.entry(id).or_insert(value);
        }
    }

    /// Textual boundary form, payloads rendered through the interface kit.
    pub fn dump(&self, labels: &Labels, registry: &InterfaceRegistry) -> String {
        let kit = registry.kit(self.interface);
        let mut out = String::from("{");
        let mut sep = "";
        for (id, payload) in &self.fields {
            let name = labels.field_name(*id).map(|n| n.as_str()).unwrap_or("?");
            out.push_str(sep);
            out.push_str(name);
            out.push_str(" = ");
            let _ = kit.serialize(payload, &mut out);
            sep = ", ";
        }
        for (id, value) in &self.tags {
            let name = labels.tag_name(*id).map(|n| n.as_str()).unwrap_or("?");
            out.push_str(sep);
            let _ = fmt::Write::write_fmt(&mut out, format_args!("<{name}> = {value}"));
            sep = ", ";
        }
        for (id, value) in &self.btags {
            let name = labels.btag_name(*id).map(|n| n.as_str()).unwrap_or("?");
            out.push_str(sep);
            let _ = fmt::Write::write_fmt(&mut out, format_args!("<#{name}> = {value}"));
            sep = ", ";
        }
        out.push('}');
        out
    }

    pub fn to_json(&self, labels: &Labels, registry: &InterfaceRegistry) -> serde_json::Value {
        let kit = registry.kit(self.interface);
        let mut fields = serde_json::Map::new();
        for (id, payload) in &self.fields {
            let name = labels.field_name(*id).map(|n| n.as_str()).unwrap_or("?");
            let mut text = String::new();
            let _ = kit.serialize(payload, &mut text);
            fields.insert(name.to_string(), serde_json::Value::String(text));
        }
        let mut tags = serde_json::Map::new();
        for (id, value) in &self.tags {
            let name = labels.tag_name(*id).map(|n| n.as_str()).unwrap_or("?");
            tags.insert(name.to_string(), serde_json::Value::from(*value));
        }
        let mut btags = serde_json::Map::new();
        for (id, value) in &self.btags {
            let name = labels.btag_name(*id).map(|n| n.as_str()).unwrap_or("?");
            btags.insert(name.to_string(), serde_json::Value::from(*value));
        }
        serde_json::json!({
            "interface": kit.name(),
            "location": self.location.to_string(),
            "fields": fields,
            "tags": tags,
            "btags": btags,
        })
    }
}
