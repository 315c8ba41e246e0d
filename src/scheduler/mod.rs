//! Background loops that keep the worker in touch with the server.
//!
//! Each loop runs on its own task, ticks on a fixed interval (first tick one
//! interval after start) and exits when its cancellation token fires.

pub mod discovery;
pub mod heartbeat;
pub mod log_shipper;
pub mod reporter;

pub use discovery::{AddressCache, Discovery};
pub use heartbeat::Heartbeat;
pub use log_shipper::{LogShipper, LogShipperLoop};
pub use reporter::InstanceReporter;
