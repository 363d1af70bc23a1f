use anyhow::Context;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reportd_core::WorkOrder;
use reportd_db::{create_pool, PgResultStore};
use reportd_executor::{run_order, CommandRenderPipeline, CommandTemplateEngine};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reportd_executor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(error) = run().await {
        tracing::error!(error = format!("{error:#}"), "Executor failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("reading the work order from stdin")?;
    let order: WorkOrder =
        serde_json::from_str(&input).context("parsing the work order")?;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url).await.context("connecting to the store")?;
    let store = PgResultStore::new(pool);

    let engine = CommandTemplateEngine::from_env();
    let renderer = CommandRenderPipeline::from_env();

    tracing::info!(job_id = %order.job_id, report_name = %order.report_name, "Work order accepted");
    run_order(&store, &engine, &renderer, &order).await?;
    Ok(())
}
