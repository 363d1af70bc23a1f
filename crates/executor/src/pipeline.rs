//! Template execution and rendering seams.
//!
//! [`TemplateEngine`] turns a parameterized template into a raw result
//! document; [`RenderPipeline`] turns that document into the published
//! HTML and, optionally, a PDF. Both have command-backed implementations
//! that pipe JSON over stdio, so the actual engine can be anything that
//! speaks that protocol.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use reportd_core::Parameters;

/// Maximum bytes captured per subprocess stream (10 MiB). Output beyond
/// this is truncated rather than exhausting memory.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline step {step} failed with exit code {code:?}: {stderr}")]
    StepFailed {
        step: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("pipeline step {step} produced invalid utf-8 output")]
    InvalidOutput { step: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A successful render: the standalone HTML report plus any extracted
/// resources (figures, stylesheets) keyed by relative filename.
#[derive(Debug, Default)]
pub struct RenderedHtml {
    pub html: String,
    pub resources: BTreeMap<String, Vec<u8>>,
}

/// Executes a parameterized template into a raw result document.
#[async_trait]
pub trait TemplateEngine: Send + Sync {
    async fn execute(
        &self,
        report_name: &str,
        parameters: &Parameters,
    ) -> Result<String, PipelineError>;
}

/// Renders a raw result document into its published forms.
#[async_trait]
pub trait RenderPipeline: Send + Sync {
    async fn render_html(&self, raw_document: &str) -> Result<RenderedHtml, PipelineError>;

    async fn render_pdf(&self, raw_document: &str) -> Result<Vec<u8>, PipelineError>;
}

/// Template engine backed by an external command. The command gets the
/// report name as its only argument and the parameters as JSON on stdin,
/// and writes the raw result document to stdout.
pub struct CommandTemplateEngine {
    program: PathBuf,
}

impl CommandTemplateEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("TEMPLATE_ENGINE_BIN").unwrap_or_else(|_| "reportd-template".into()),
        )
    }
}

#[async_trait]
impl TemplateEngine for CommandTemplateEngine {
    async fn execute(
        &self,
        report_name: &str,
        parameters: &Parameters,
    ) -> Result<String, PipelineError> {
        let input = serde_json::to_vec(parameters).unwrap_or_default();
        let mut cmd = Command::new(&self.program);
        cmd.arg(report_name);
        let output = run_step("execute", cmd, &input).await?;
        String::from_utf8(output).map_err(|_| PipelineError::InvalidOutput { step: "execute" })
    }
}

/// Render pipeline backed by an external command. The raw document goes
/// in on stdin and the rendered output comes back on stdout; the target
/// format is selected with `--to`. Extracted resources are the concern
/// of richer pipelines implementing [`RenderPipeline`] directly.
pub struct CommandRenderPipeline {
    program: PathBuf,
}

impl CommandRenderPipeline {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("RENDER_PIPELINE_BIN").unwrap_or_else(|_| "reportd-render".into()))
    }
}

#[async_trait]
impl RenderPipeline for CommandRenderPipeline {
    async fn render_html(&self, raw_document: &str) -> Result<RenderedHtml, PipelineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--to", "html"]);
        let output = run_step("render-html", cmd, raw_document.as_bytes()).await?;
        let html = String::from_utf8(output)
            .map_err(|_| PipelineError::InvalidOutput { step: "render-html" })?;
        Ok(RenderedHtml {
            html,
            resources: BTreeMap::new(),
        })
    }

    async fn render_pdf(&self, raw_document: &str) -> Result<Vec<u8>, PipelineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--to", "pdf"]);
        run_step("render-pdf", cmd, raw_document.as_bytes()).await
    }
}

/// Spawn one pipeline step, pipe `input` to its stdin and capture both
/// streams. Report execution is open-ended, so there is no timeout and
/// the child is never killed from here.
async fn run_step(
    step: &'static str,
    mut cmd: Command,
    input: &[u8],
) -> Result<Vec<u8>, PipelineError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        // Best-effort write; if the process closes stdin early, ignore it.
        let _ = stdin.write_all(input).await;
        drop(stdin);
    }

    // Read both streams in spawned tasks so `child.wait()` can borrow the
    // child mutably in the meantime.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    let status = child.wait().await?;
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    if status.success() {
        Ok(stdout)
    } else {
        Err(PipelineError::StepFailed {
            step,
            code: status.code(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Read an entire output stream into a buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}
