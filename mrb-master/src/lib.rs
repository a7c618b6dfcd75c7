//! The mrb master: accepts job submissions, splits inputs into map tasks,
//! hands work to polling workers, tracks attempts and completion, persists
//! job state to the lock service and holds the cluster-wide master lock.

pub mod alloc;
pub mod args;
pub mod core;
pub mod executor;
pub mod galaxy;
pub mod input;
pub mod job_tracker;
pub mod master_impl;
pub mod nexus;
pub mod snapshot;
