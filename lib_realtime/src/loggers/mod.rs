/// Console and file logging via `fern`, with old log rotation.
pub mod loggerlocal;

pub use loggerlocal::{cleanup_old_logs, parse_level, setup_logging};
