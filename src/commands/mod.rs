//! Declarative description of what to run
//!
//! A [`RunConfig`](group::RunConfig) is an ordered list of groups, each group an ordered list of
//! commands sharing one timeout, retry budget, execution mode and failure policy.
//!
//! Working directories and environment overrides flow down from the configuration file to its
//! groups and from groups to their commands, while still allowing override at any level.

pub mod command;
pub mod group;
pub mod inherit;
