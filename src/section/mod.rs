//! The unit of work of a collection run.
//!
//! A [`Section`] owns identity, refresh interval and cache handling; the
//! [`SectionCollector`] behind it only knows how to fetch, compute and shape.

pub mod collector;
pub mod content;
pub mod kind;
pub mod lifecycle;

pub use collector::SectionCollector;
pub use content::{
    ColleagueContent, ComputedContent, LimitRecord, RawContent, Received, SectionIdentity,
    SectionResult,
};
pub use kind::SectionKind;
pub use lifecycle::{RunOptions, Section, SectionOutput, SectionState};
