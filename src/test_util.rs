//! Support code for tests and demos: canned template directories and an
//! in-process loopback middleware.

pub mod loopback;
pub mod templates;
