//! Opaque box payloads and the interface capability table.
//!
//! A payload is an opaque value owned by records and interpreted only by the
//! capability kit registered for the owning record's interface id. Sharing is
//! by refcount: cloning a payload handle bumps the count, dropping releases
//! it, and the last holder frees the value. The "free" capability of the
//! classic table is therefore `Drop`; kits supply copy and (de)serialize.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Id of a payload interface. Dense index into the runtime's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub u32);

/// An opaque, shareable payload value.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
}

impl Payload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    /// Current number of holders. Observable so tests can verify fan-out
    /// sharing frees exactly once.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.value)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload(holders: {})", self.holders())
    }
}

#[derive(Debug)]
pub enum PayloadError {
    Parse { kit: &'static str, text: String },
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { kit, text } => {
                write!(f, "interface `{}` cannot parse payload text {:?}", kit, text)
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// Capability kit for one payload interface.
pub trait PayloadKit: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deep copy, for consumers that need a private mutable value. Record
    /// copies never call this; they share payloads by refcount.
    fn copy(&self, payload: &Payload) -> Payload;

    fn serialize(&self, payload: &Payload, out: &mut dyn fmt::Write) -> fmt::Result;

    fn deserialize(&self, text: &str) -> Result<Payload, PayloadError>;
}

/// The interface capability table. Owned by the runtime context; there is no
/// process-global registry. Looking up an unregistered id is a fatal
/// programming error.
#[derive(Default)]
pub struct InterfaceRegistry {
    kits: Vec<Arc<dyn PayloadKit>>,
}

impl InterfaceRegistry {
    pub const INT: InterfaceId = InterfaceId(0);
    pub const STRING: InterfaceId = InterfaceId(1);
    pub const JSON: InterfaceId = InterfaceId(2);

    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in kits, at the ids
    /// [`Self::INT`], [`Self::STRING`], [`Self::JSON`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(IntKit));
        registry.register(Arc::new(StringKit));
        registry.register(Arc::new(JsonKit));
        registry
    }

    pub fn register(&mut self, kit: Arc<dyn PayloadKit>) -> InterfaceId {
        let id = InterfaceId(self.kits.len() as u32);
        self.kits.push(kit);
        id
    }

    pub fn get(&self, id: InterfaceId) -> Option<&Arc<dyn PayloadKit>> {
        self.kits.get(id.0 as usize)
    }

    pub fn kit(&self, id: InterfaceId) -> &Arc<dyn PayloadKit> {
        match self.get(id) {
            Some(kit) => kit,
            None => panic!("no payload kit registered for interface id {}", id.0),
        }
    }
}

pub struct IntKit;

impl PayloadKit for IntKit {
    fn name(&self) -> &'static str {
        "i64"
    }

    fn copy(&self, payload: &Payload) -> Payload {
        Payload::new(*expect_value::<i64>(self, payload))
    }

    fn serialize(&self, payload: &Payload, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{}", expect_value::<i64>(self, payload))
    }

    fn deserialize(&self, text: &str) -> Result<Payload, PayloadError> {
        text.trim()
            .parse::<i64>()
            .map(Payload::new)
            .map_err(|_| PayloadError::Parse {
                kit: self.name(),
                text: text.to_string(),
            })
    }
}

pub struct StringKit;

impl PayloadKit for StringKit {
    fn name(&self) -> &'static str {
        "string"
    }

    fn copy(&self, payload: &Payload) -> Payload {
        Payload::new(expect_value::<String>(self, payload).clone())
    }

    fn serialize(&self, payload: &Payload, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{}", expect_value::<String>(self, payload))
    }

    fn deserialize(&self, text: &str) -> Result<Payload, PayloadError> {
        Ok(Payload::new(text.to_string()))
    }
}

pub struct JsonKit;

impl PayloadKit for JsonKit {
    fn name(&self) -> &'static str {
        "json"
    }

    fn copy(&self, payload: &Payload) -> Payload {
        Payload::new(expect_value::<serde_json::Value>(self, payload).clone())
    }

    fn serialize(&self, payload: &Payload, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{}", expect_value::<serde_json::Value>(self, payload))
    }

    fn deserialize(&self, text: &str) -> Result<Payload, PayloadError> {
        serde_json::from_str::<serde_json::Value>(text)
            .map(Payload::new)
            .map_err(|_| PayloadError::Parse {
                kit: self.name(),
                text: text.to_string(),
            })
    }
}

fn expect_value<'a, T: Any>(kit: &dyn PayloadKit, payload: &'a Payload) -> &'a T {
    match payload.downcast_ref::<T>() {
        Some(value) => value,
        None => panic!(
            "payload handed to interface `{}` holds a different type; \
             the record carries a wrong interface id",
            kit.name()
        ),
    }
}
