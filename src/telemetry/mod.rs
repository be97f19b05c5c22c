mod logger;
mod store;

pub use logger::{TelemetryLogger, TelemetryRecord, REFERENCE_FIELD};
pub use store::{ArraySpec, ArrayStore, ElementType};
