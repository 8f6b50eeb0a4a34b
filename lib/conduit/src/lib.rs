//! The shared wire layer for the `capstan` driver: computation keys, the
//! driver/scheduler message contracts, length-prefixed framing and the
//! logging bootstrap. Both ends of a scheduler connection agree on the types
//! in this crate and nothing else.

#![allow(clippy::new_without_default)]

pub mod frame;
pub mod key;
pub mod logging;
pub mod message;
pub mod support;
