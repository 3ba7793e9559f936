//! Foundational system components for Tally's services.
//!
//! Every long-running component of the server is a [`Service`]: a value that is moved onto the
//! runtime and drives itself until it observes a [`Shutdown`]. The [`Controller`] owns the
//! shutdown broadcast and hands out [`ShutdownHandle`]s to services.
#![warn(missing_docs)]

mod controller;
mod runtime;
mod service;

pub use self::controller::*;
pub use self::runtime::*;
pub use self::service::*;
