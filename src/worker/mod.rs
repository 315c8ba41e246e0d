//! Worker agent core.
//!
//! Core components:
//! - `state`: instance status codes and terminal transitions
//! - `dispatcher`: run / stop / query, execution routing into storage and the tracker
//! - `routes`: inbound HTTP endpoints called by the server
//! - `runtime`: assembles loops, dispatcher and listener under one root token

pub mod dispatcher;
pub mod routes;
pub mod runtime;
pub mod state;

pub use dispatcher::{Dispatcher, RunOutcome};
pub use routes::worker_routes;
pub use runtime::{WorkerDeps, WorkerRuntime};
pub use state::InstanceStatus;
