//! Domain types for the reportd job orchestration core.
//!
//! This crate holds everything the other crates agree on:
//!
//! - [`JobStatus`]: the durable status state machine.
//! - [`JobResult`]: the tagged union of pending / error / complete
//!   results, carrying only the fields valid for each variant.
//! - [`constants`]: timeouts, the cancellation message, blob naming.
//! - [`validation`]: pure input checks applied at the submit boundary.
//!
//! It deliberately has no I/O dependencies; persistence lives in
//! `reportd-db` and orchestration in `reportd-engine`.

pub mod constants;
pub mod order;
pub mod result;
pub mod status;
pub mod types;
pub mod validation;

pub use order::WorkOrder;
pub use result::{CompleteResult, ErrorResult, JobResult, PendingResult, ResultKey};
pub use status::JobStatus;
pub use types::{JobId, Parameters, Timestamp};
