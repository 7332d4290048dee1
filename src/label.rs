use arcstr::ArcStr;
use indexmap::IndexSet;
use std::fmt::Write;

/// Dense id of a record field label, allocated by [`Labels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub u32);

/// Dense id of a signed tag label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(pub u32);

/// Dense id of a binding tag label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BTagId(pub u32);

/// Interning table mapping label names to dense ids.
///
/// Ids are allocated in insertion order and never reused within a run, so
/// they can index straight into per-record maps. Networks are built against
/// ids; names only matter at the boundary (construction, display, dumps).
#[derive(Debug, Clone, Default)]
pub struct Labels {
    fields: IndexSet<ArcStr>,
    tags: IndexSet<ArcStr>,
    btags: IndexSet<ArcStr>,
}

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&mut self, name: impl Into<ArcStr>) -> FieldId {
        FieldId(self.fields.insert_full(name.into()).0 as u32)
    }

    pub fn tag(&mut self, name: impl Into<ArcStr>) -> TagId {
        TagId(self.tags.insert_full(name.into()).0 as u32)
    }

    pub fn btag(&mut self, name: impl Into<ArcStr>) -> BTagId {
        BTagId(self.btags.insert_full(name.into()).0 as u32)
    }

    pub fn field_name(&self, id: FieldId) -> Option<&ArcStr> {
        self.fields.get_index(id.0 as usize)
    }

    pub fn tag_name(&self, id: TagId) -> Option<&ArcStr> {
        self.tags.get_index(id.0 as usize)
    }

    pub fn btag_name(&self, id: BTagId) -> Option<&ArcStr> {
        self.btags.get_index(id.0 as usize)
    }
}

/// An immutable set of label ids describing the shape of a record: which
/// fields, tags, and binding tags it carries.
///
/// Variants double as match patterns: a record matches a pattern variant when
/// the pattern's ids are a subset of the ids the record actually carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Variant {
    fields: Vec<FieldId>,
    tags: Vec<TagId>,
    btags: Vec<BTagId>,
}

impl Variant {
    pub fn new(
        fields: impl IntoIterator<Item = FieldId>,
        tags: impl IntoIterator<Item = TagId>,
        btags: impl IntoIterator<Item = BTagId>,
    ) -> Self {
        let mut fields: Vec<_> = fields.into_iter().collect();
        let mut tags: Vec<_> = tags.into_iter().collect();
        let mut btags: Vec<_> = btags.into_iter().collect();
        fields.sort_unstable();
        fields.dedup();
        tags.sort_unstable();
        tags.dedup();
        btags.sort_unstable();
        btags.dedup();
        Self {
            fields,
            tags,
            btags,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    pub fn tags(&self) -> &[TagId] {
        &self.tags
    }

    pub fn btags(&self) -> &[BTagId] {
        &self.btags
    }

    pub fn has_field(&self, id: FieldId) -> bool {
        self.fields.binary_search(&id).is_ok()
    }

    pub fn has_tag(&self, id: TagId) -> bool {
        self.tags.binary_search(&id).is_ok()
    }

    pub fn has_btag(&self, id: BTagId) -> bool {
        self.btags.binary_search(&id).is_ok()
    }

    /// Total number of declared ids. Match scoring prefers wider patterns.
    pub fn width(&self) -> usize {
        self.fields.len() + self.tags.len() + self.btags.len()
    }

    /// True if every id of `self` also appears in `other`.
    pub fn subset_of(&self, other: &Variant) -> bool {
        fn sub<T: Ord>(a: &[T], b: &[T]) -> bool {
            a.iter().all(|x| b.binary_search(x).is_ok())
        }
        sub(&self.fields, &other.fields)
            && sub(&self.tags, &other.tags)
            && sub(&self.btags, &other.btags)
    }

    /// True if `self` and `other` declare at least one common field id.
    /// Merging two records with a shared field would collide, so sync
    /// construction rejects such pattern pairs.
    pub fn fields_overlap(&self, other: &Variant) -> bool {
        self.fields.iter().any(|id| other.has_field(*id))
    }

    pub fn union(&self, other: &Variant) -> Variant {
        Variant::new(
            self.fields.iter().chain(&other.fields).copied(),
            self.tags.iter().chain(&other.tags).copied(),
            self.btags.iter().chain(&other.btags).copied(),
        )
    }

    pub fn render(&self, labels: &Labels) -> String {
        let mut out = String::from("{");
        let mut sep = "";
        for id in &self.fields {
            let name = labels.field_name(*id).map(ArcStr::as_str).unwrap_or("?");
            let _ = write!(out, "{sep}{name}");
            sep = ", ";
        }
        for id in &self.tags {
            let name = labels.tag_name(*id).map(ArcStr::as_str).unwrap_or("?");
            let _ = write!(out, "{sep}<{name}>");
            sep = ", ";
        }
        for id in &self.btags {
            let name = labels.btag_name(*id).map(ArcStr::as_str).unwrap_or("?");
            let _ = write!(out, "{sep}<#{name}>");
            sep = ", ";
        }
        out.push('}');
        out
    }
}
