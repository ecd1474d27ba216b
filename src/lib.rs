//! Middleware-agnostic message bus API for mission systems that speak
//! C2MS-style subjects and messages.
//!
//! The central abstraction is the [Connection](connection::Connection): it
//! owns a pluggable transport (a
//! [ConnectionInterface](connection::interface::ConnectionInterface)), layers
//! tracking-field injection, schema validation and request/reply correlation
//! on top of it, and exposes publish / subscribe / request / reply
//! operations. What goes over the wire is governed by a
//! [Policy](policy::Policy) (encoding, compression, access checks) and - when
//! validation is enabled - by a [Specification](specification::Specification)
//! loaded from a message template directory.
//!
//! [Generators](generator) publish standardized heartbeat and resource
//! messages from background tasks.
//!
//! The crate ships an in-process loopback middleware
//! ([test_util::loopback]) so applications and tests can run without an
//! external broker.

pub mod config;
pub mod connection;
pub mod field;
pub mod generator;
pub mod message;
pub mod policy;
pub mod specification;
pub mod status;
pub mod subject;
pub mod test_util;
pub mod util;
