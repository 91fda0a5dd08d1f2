pub mod buffer_pool;
pub mod dedup;
pub mod dispatcher;
pub mod meter;
pub mod receiver;
pub mod state;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer_pool::{BlockPool, SampleBlock};
pub use dedup::DedupFilter;
pub use dispatcher::{consumer_channel, DispatchOutcome, Dispatcher, Handoff, DELIVERY_TIMEOUT};
pub use meter::Meter;
pub use receiver::{Receiver, READ_DEADLINE};
pub use state::{PipelineState, StateCell};
pub use worker::{BlockReport, DecodeWorker, SharedBlocks};
