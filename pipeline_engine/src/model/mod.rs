//! Domain model for pipeline runs, stages, artifacts, and targets.

pub mod approval;
pub mod artifact;
pub mod run;
pub mod stage;
pub mod target;
