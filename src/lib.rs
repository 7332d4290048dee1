//! Weir is a coordination runtime for streaming networks of record
//! processors. A network is described with the combinators in [`net`],
//! mounted on a [`runtime::Runtime`], and from then on every entity runs as
//! a cooperative task over a small pool of worker threads.
//!
//! Entities talk through bounded streams ([`runtime::stream`]) carrying
//! [`record::Record`]s. Everything that travels, including shutdown and
//! ordering information, travels in-band; there is no control plane beside
//! the streams.

pub mod demos;
pub mod label;
pub mod location;
pub mod net;
pub mod record;
pub mod route;
pub mod runtime;

mod test;

pub use net::{BuildError, Mode, NetFn};
pub use record::Record;
pub use runtime::Runtime;
