//! Job orchestration for reportd.
//!
//! The engine accepts submissions, supervises out-of-process workers,
//! answers cache-first status queries and runs the reconciliation loop
//! that keeps the cache honest against the durable store.

pub mod context;
pub mod hunter;
pub mod status;
pub mod submit;
mod worker;

pub use context::{EngineConfig, RunnerContext};
pub use hunter::Reconciler;
pub use status::{
    delete_result, get_status, latest_job_id, latest_successful_job_id, list_result_keys,
    StatusError, DEFAULT_KEY_LIMIT,
};
pub use submit::{rerun, submit, SubmitError, SubmitRequest};
