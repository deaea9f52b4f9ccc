//! GradeGym grading pipeline server.

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gradegym_db::SqlExerciseRepo;
use gradegym_executor::PipelineHandler;
use gradegym_scheduler::{AdvisoryWorker, StepQueue, WorkerPool};
use gradegym_server::advisor::HttpAdvisor;
use gradegym_server::config::{CREDENTIALS_FILE, Credentials, Settings};
use gradegym_server::delivery::DeliveryLoop;
use gradegym_server::ingress::IngressListener;
use gradegym_server::sink::IpcResultSink;

use gradegym_core::ResultSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let credentials = Credentials::load(CREDENTIALS_FILE)
        .context("credentials.txt with the shared key and the advisor key is required")?;
    let settings = Settings::from_env();

    info!("connecting to exercise store");
    let pool = gradegym_db::create_pool(&settings.database_url)
        .await
        .context("exercise store connection failed")?;
    let repo = Arc::new(SqlExerciseRepo::new(pool));

    let queue = Arc::new(StepQueue::new());
    info!(queued = queue.total_len(), "scheduler ready");

    let ingress = IngressListener::bind(
        &settings.ingress_addr,
        queue.clone(),
        credentials.shared_key.clone(),
    )
    .await
    .context("ingress bind failed")?;
    let _ingress = ingress.spawn();

    let _workers = WorkerPool::new(queue.clone(), Arc::new(PipelineHandler::new(repo))).spawn();

    let advisor = Arc::new(HttpAdvisor::new(
        settings.advisor_url.clone(),
        settings.advisor_model.clone(),
        credentials.advisor_api_key.clone(),
    ));
    let _advisory = AdvisoryWorker::new(queue.clone(), advisor).spawn();

    let sink_addr = settings.sink_addr.clone();
    let shared_key = credentials.shared_key.clone();
    let delivery = DeliveryLoop::new(queue, move || {
        Box::new(IpcResultSink::new(sink_addr.clone(), shared_key.clone())) as Box<dyn ResultSink>
    });

    let fatal = delivery.run().await;
    error!(%fatal, "delivery loop aborted");
    bail!("fatal: {fatal}");
}
