//! Shared orchestration state handed to every engine task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use reportd_cache::{set_with_retry, Cache, CacheKey, CacheValue};
use reportd_core::constants::{RECONCILE_INTERVAL, RUNNING_TIMEOUT_MINS, SUBMISSION_TIMEOUT_MINS};
use reportd_db::ResultStore;
use reportd_notify::EmailNotifier;

/// Engine configuration, loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker binary spawned once per execution attempt.
    pub executor_path: PathBuf,
    /// Handed to the worker through its environment.
    pub database_url: String,
    /// Execution attempts per submission before giving up.
    pub max_attempts: u32,
    /// SUBMITTED records older than this are timed out by the reconciler.
    pub submission_timeout: chrono::Duration,
    /// PENDING records older than this are timed out by the reconciler.
    pub running_timeout: chrono::Duration,
    /// Sleep between reconciliation iterations.
    pub reconcile_interval: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            executor_path: std::env::var("EXECUTOR_PATH")
                .unwrap_or_else(|_| "reportd-executor".to_string())
                .into(),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/reportd".to_string()),
            max_attempts: std::env::var("MAX_EXECUTION_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .expect("MAX_EXECUTION_ATTEMPTS must be a valid u32"),
            submission_timeout: chrono::Duration::minutes(SUBMISSION_TIMEOUT_MINS),
            running_timeout: chrono::Duration::minutes(RUNNING_TIMEOUT_MINS),
            reconcile_interval: RECONCILE_INTERVAL,
        }
    }
}

/// Everything a running engine task needs: store, cache, optional mailer
/// and the shutdown signal. Cheap to clone; all fields are shared.
///
/// The liveness flag lives in the cache rather than in a global so that
/// every component observes shutdown through the same read path it uses
/// for records.
#[derive(Clone)]
pub struct RunnerContext {
    pub store: Arc<dyn ResultStore>,
    pub cache: Arc<dyn Cache>,
    pub notifier: Option<Arc<EmailNotifier>>,
    pub config: Arc<EngineConfig>,
    cancel: CancellationToken,
}

impl RunnerContext {
    pub async fn new(
        store: Arc<dyn ResultStore>,
        cache: Arc<dyn Cache>,
        notifier: Option<Arc<EmailNotifier>>,
        config: EngineConfig,
    ) -> Self {
        let ctx = Self {
            store,
            cache,
            notifier,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        };
        if let Err(error) =
            set_with_retry(ctx.cache.as_ref(), CacheKey::Alive, CacheValue::Flag(true), None).await
        {
            tracing::warn!(%error, "Failed to publish the liveness flag");
        }
        ctx
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether work may still be started. Queued work that observes
    /// `false` here reports CANCELLED instead of running.
    pub async fn is_alive(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.cache.get(&CacheKey::Alive).await {
            Ok(Some(CacheValue::Flag(alive))) => alive,
            // A missing or unreadable flag is not a shutdown signal.
            Ok(_) | Err(_) => true,
        }
    }

    /// Flip the liveness flag and cancel background loops. In-flight
    /// worker processes are left to finish; only unstarted work reacts.
    pub async fn shutdown(&self) {
        if let Err(error) = set_with_retry(
            self.cache.as_ref(),
            CacheKey::Alive,
            CacheValue::Flag(false),
            None,
        )
        .await
        {
            tracing::warn!(%error, "Failed to clear the liveness flag");
        }
        self.cancel.cancel();
        tracing::info!("Engine shutdown requested");
    }
}
