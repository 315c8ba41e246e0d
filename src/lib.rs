//! PowerJob worker: the worker-side agent of a distributed job scheduler.

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod scheduler;
pub mod store;
pub mod tracker;
pub mod worker;
