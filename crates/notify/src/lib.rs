//! Completion emails via SMTP.
//!
//! [`EmailNotifier`] sends a plain-text email when a job reaches a
//! terminal status, using the `lettre` async SMTP transport. Delivery is
//! optional: without `SMTP_HOST` in the environment no notifier is
//! constructed and jobs complete silently.

use reportd_core::{JobResult, JobStatus};

/// Why a completion email could not be sent.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP-level failure: connection, TLS, authentication.
    #[error("smtp transport failure: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// A recipient or the sender address did not parse.
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The message itself could not be assembled.
    #[error("could not assemble message: {0}")]
    Build(String),
}

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_FROM_ADDRESS: &str = "reportd@localhost";

/// SMTP settings, read from `SMTP_HOST`, `SMTP_PORT` (default 587,
/// STARTTLS), `SMTP_FROM` (default `reportd@localhost`) and the optional
/// `SMTP_USER` / `SMTP_PASSWORD` credential pair.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// `None` when `SMTP_HOST` is not set, signalling that delivery is
    /// not configured and should be skipped.
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        let smtp_port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_SMTP_PORT);
        let from_address =
            std::env::var("SMTP_FROM").unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string());
        Some(Self {
            smtp_host,
            smtp_port,
            from_address,
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

/// Sends job completion emails via SMTP.
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Construct a notifier from the environment, or `None` when SMTP is
    /// not configured.
    pub fn from_env() -> Option<Self> {
        EmailConfig::from_env().map(Self::new)
    }

    /// Email the terminal outcome of a job to `mailto`, a comma-separated
    /// recipient list.
    pub async fn send_result(&self, mailto: &str, result: &JobResult) -> Result<(), EmailError> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials,
            AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        };

        let subject = format!("[reportd] {}: {}", result.report_title(), result.status());

        let mut builder = Message::builder().from(self.config.from_address.parse()?);
        for recipient in mailto.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            builder = builder.to(recipient.parse()?);
        }
        let email = builder
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body_for(result))
            .map_err(|e| EmailError::Build(e.to_string()))?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let mailer = transport_builder.build();
        mailer.send(email).await?;

        tracing::info!(
            to = mailto,
            job_id = %result.job_id(),
            status = %result.status(),
            "Completion email sent"
        );
        Ok(())
    }
}

fn body_for(result: &JobResult) -> String {
    let outcome = match result {
        JobResult::Complete(_) => "The report ran to completion and its results are ready.".into(),
        JobResult::Error(error) if error.status == JobStatus::Cancelled => {
            format!("The report was cancelled before it started.\n\n{}", error.error_info)
        }
        JobResult::Error(error) => format!("The report failed:\n\n{}", error.error_info),
        JobResult::Pending(_) => "The report did not reach a terminal status.".into(),
    };
    format!(
        "Report: {}\nJob id: {}\nStatus: {}\nStarted: {}\n\n{}",
        result.report_name(),
        result.job_id(),
        result.status(),
        result.start_time(),
        outcome
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportd_core::{CompleteResult, Parameters};

    #[test]
    fn no_notifier_without_smtp_host() {
        std::env::remove_var("SMTP_HOST");
        assert!(EmailNotifier::from_env().is_none());
        assert!(EmailConfig::from_env().is_none());
    }

    #[test]
    fn failure_body_carries_the_diagnostics() {
        let result = JobResult::not_found("daily_pnl", uuid::Uuid::nil());
        let body = body_for(&result);
        assert!(body.contains("Report: daily_pnl"));
        assert!(body.contains("Status: ERROR"));
        assert!(body.contains("The report failed"));
        assert!(body.contains("not found"));
    }

    #[test]
    fn completion_body_announces_the_results() {
        let now = chrono::Utc::now();
        let result = JobResult::Complete(CompleteResult {
            job_id: uuid::Uuid::new_v4(),
            report_name: "daily_pnl".into(),
            report_title: "Daily PnL".into(),
            parameters: Parameters::new(),
            mailto: Some("team@example.com".into()),
            generate_pdf: false,
            start_time: now,
            finish_time: now,
            update_time: now,
            stdout: Vec::new(),
            raw_html: "<html/>".into(),
            html_resources: Default::default(),
            raw_document: "{}".into(),
            pdf: None,
        });
        let body = body_for(&result);
        assert!(body.contains("Status: DONE"));
        assert!(body.contains("results are ready"));
    }
}
