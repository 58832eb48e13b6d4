pub mod error;
pub mod logging;
pub mod time;

pub use error::{AggregatorError, AggregatorResult};
pub use logging::init_logging;
pub use time::{format_duration_seconds, parse_duration_seconds, parse_timestamp};
