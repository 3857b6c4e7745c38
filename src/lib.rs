//! Collects provider inventory, quotas and metrics as framed agent sections.
//!
//! Sections of one region form a producer/consumer graph: upstream sections
//! publish their computed content so downstream ones can skip redundant API
//! calls. Each section caches its raw payload on disk and decides on its own
//! whether that cache is still usable.

pub mod agent;
pub mod cache;
pub mod client;
pub mod config;
pub mod distributor;
pub mod error;
pub mod fingerprint;
pub mod runner;
pub mod section;
pub mod services;
pub mod writer;

pub use error::{Error, Result};
