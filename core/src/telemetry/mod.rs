pub mod status;

pub use status::{MeterStatus, StatusTracker};
