pub mod reducer;
pub mod worker;

pub use reducer::{reduce_min_max, remove_drift, SampleReducer, WaveformEnvelope, WaveformRequest};
pub use worker::{handle_request, ReducerWorker, WorkerRequest, WorkerResponse};
