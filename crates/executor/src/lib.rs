//! The out-of-process worker.
//!
//! Spawned once per execution attempt with a [`reportd_core::WorkOrder`]
//! on stdin. Owns every status transition after SUBMITTED: it moves the
//! record to PENDING, executes and renders the template, and writes the
//! terminal DONE or ERROR record straight to the store. Progress goes to
//! stderr, which the supervising process streams into the record.

pub mod pipeline;
pub mod run;

pub use pipeline::{
    CommandRenderPipeline, CommandTemplateEngine, PipelineError, RenderPipeline, RenderedHtml,
    TemplateEngine,
};
pub use run::{run_order, ExecError};
