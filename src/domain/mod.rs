//! Domain types for Bastion Core.
//!
//! This module contains the core value objects: verdicts, triggered rules,
//! per-pipeline results, aggregates, and detection rules.

mod result;
mod rules;
mod verdict;

pub use result::*;
pub use rules::*;
pub use verdict::*;
