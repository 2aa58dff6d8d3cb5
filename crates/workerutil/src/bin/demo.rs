use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use workerutil::prelude::*;
use workerutil::telemetry::{init_tracing, TelemetryConfig};
use workerutil::RecordState;

/// Simulated indexing job
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexJob {
    id: RecordId,
    repository: String,
    commit: String,
}

impl Record for IndexJob {
    fn record_id(&self) -> RecordId {
        self.id
    }
}

/// Pretends to index a repository; some jobs fail on purpose
struct IndexHandler {
    work_time: Duration,
}

#[async_trait]
impl Handler<IndexJob> for IndexHandler {
    async fn handle(&self, ctx: &HandlerContext, job: &IndexJob) -> anyhow::Result<()> {
        tracing::info!(
            record_id = job.id,
            repository = %job.repository,
            commit = %job.commit,
            "Indexing"
        );

        tokio::select! {
            _ = ctx.cancelled() => anyhow::bail!("indexing cancelled"),
            _ = tokio::time::sleep(self.work_time) => {}
        }

        if job.id % 11 == 0 {
            let message = format!("{} is not a git repository", job.repository);
            return Err(NonRetryableError::new(message).into());
        }
        if job.id % 7 == 0 {
            anyhow::bail!("transient clone failure for {}", job.repository);
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "workerutil=debug")
    // - LOG_FORMAT: "pretty" or "json"
    // - WORKER_*: see WorkerOptions::from_env
    // - DEMO_NUM_JOBS: Number of seeded jobs (default: 25)
    // - DEMO_WORK_TIME_MS: Simulated handler time (default: 200)
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("workerutil=debug,workerutil_demo=info".to_string());
    }
    init_tracing(&telemetry_config).context("Failed to initialize tracing")?;

    let num_jobs: i64 = env_or("DEMO_NUM_JOBS", 25);
    let work_time = Duration::from_millis(env_or("DEMO_WORK_TIME_MS", 200));

    let store = Arc::new(InMemoryStore::new().with_max_num_retries(2));
    for id in 1..=num_jobs {
        store.push(IndexJob {
            id,
            repository: format!("github.com/example/repo-{id}"),
            commit: format!("{:040x}", id * 7919),
        });
    }

    let options = WorkerOptions::from_env();
    tracing::info!(
        worker = %options.name,
        worker_hostname = %options.worker_hostname,
        num_handlers = options.num_handlers,
        num_jobs,
        "Starting demo worker"
    );

    let worker = Arc::new(
        Worker::new(Arc::clone(&store), Arc::new(IndexHandler { work_time }), options)
            .context("Failed to create worker")?,
    );
    let handle = worker.start();

    // Stop once nothing is left to claim
    let drained = {
        let store = Arc::clone(&store);
        let interval = worker.options().interval;
        async move {
            loop {
                tokio::time::sleep(interval).await;
                let pending = store.count(RecordState::Queued)
                    + store.count(RecordState::Processing)
                    + store.count(RecordState::Errored);
                if pending == 0 {
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
        _ = drained => {
            tracing::info!("Queue drained");
        }
        _ = worker.wait() => {}
    }

    worker.shutdown().await;
    handle.await.context("Worker task panicked")??;

    tracing::info!(
        completed = store.count(RecordState::Completed),
        failed = store.count(RecordState::Failed),
        remaining = store.queued_count(),
        "Worker shutdown complete"
    );
    println!("{}", serde_json::to_string_pretty(&worker.metrics().snapshot())?);

    Ok(())
}
