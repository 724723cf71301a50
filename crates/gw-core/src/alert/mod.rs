mod sink;
mod types;

pub use sink::{AlertSink, ConsoleAlertSink, FileAlertSink};
pub use types::AlertRecord;
