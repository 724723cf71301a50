pub mod error;
pub mod log;

pub use error::{ReplayError, ReplayReason, ReplayResult};
pub use log::{AckPolicy, DeliverPolicy, ReplayLog, ReplayMessage};
