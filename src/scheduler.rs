use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use ahash::AHashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;

use crate::classify::process_message;
use crate::core::Core;
use crate::message::SinkMessage;
use crate::model::ProbabilityModel;

// One of the fixed execution slots. The slot carries the worker's
// dedicated HTTP client and travels through a channel: receiving it is
// acquiring the slot, sending it back releases it.
pub struct WorkerSlot {
    pub id: usize,
    pub http: reqwest::Client,
}

struct Completion {
    seq: u64,
    line: String,
}

pub struct DispatchSummary {
    pub done: usize,
    pub timed_out: Vec<String>,
}

// Run `worker` over every file with at most `slots.len()` in flight.
// Completed log lines are emitted in completion order, which is not the
// submission order. Workers still busy when the drain timeout expires are
// logged and abandoned; their slot is simply never handed out again.
pub async fn dispatch<F, Fut>(
    files: Vec<PathBuf>,
    slots: Vec<WorkerSlot>,
    drain_timeout: Duration,
    worker: F,
) -> DispatchSummary
where
    F: Fn(WorkerSlot, PathBuf) -> Fut,
    Fut: Future<Output = (WorkerSlot, String)> + Send + 'static,
{
    let concurrency = slots.len().max(1);
    let (slot_tx, mut slot_rx) = mpsc::channel::<WorkerSlot>(concurrency);
    let (done_tx, mut done_rx) = mpsc::channel::<Completion>(concurrency * 2);
    for slot in slots {
        let _ = slot_tx.send(slot).await;
    }

    let mut in_flight: AHashMap<u64, String> = AHashMap::new();
    let mut done = 0;
    let mut seq = 0;

    for path in files {
        // Blocks until a worker slot is free again
        let Some(slot) = slot_rx.recv().await else {
            break;
        };
        seq += 1;
        in_flight.insert(seq, path.display().to_string());

        let task = worker(slot, path);
        let slot_tx = slot_tx.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let (slot, line) = task.await;
            let _ = slot_tx.send(slot).await;
            let _ = done_tx.send(Completion { seq, line }).await;
        });

        while let Ok(completion) = done_rx.try_recv() {
            emit(&mut in_flight, &mut done, completion);
        }
    }

    // Join the stragglers, bounded by the drain timeout
    let deadline = tokio::time::Instant::now() + drain_timeout;
    while !in_flight.is_empty() {
        match tokio::time::timeout_at(deadline, done_rx.recv()).await {
            Ok(Some(completion)) => emit(&mut in_flight, &mut done, completion),
            Ok(None) | Err(_) => break,
        }
    }

    let mut timed_out: Vec<String> = in_flight.into_values().collect();
    timed_out.sort();
    for file in &timed_out {
        tracing::warn!(
            context = "scheduler",
            event = "timeout",
            file = file.as_str(),
            "Worker still busy at drain timeout, abandoning slot."
        );
    }

    DispatchSummary { done, timed_out }
}

fn emit(in_flight: &mut AHashMap<u64, String>, done: &mut usize, completion: Completion) {
    in_flight.remove(&completion.seq);
    *done += 1;
    tracing::info!("{}", completion.line);
}

// Consume one spool file end to end: read, unlink (or archive), parse,
// classify, act. The file is gone before any network I/O happens, so a
// crash mid-processing can never replay a delivery.
pub async fn process_file(
    core: &Core,
    model: &ProbabilityModel,
    http: &reqwest::Client,
    path: &Path,
) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) => {
            core.store.increment("skipped").await;
            return format!("{name},,,!Failed to read: {err}");
        }
    };

    let message = SinkMessage::parse(&raw);
    let archive = message.as_ref().map_or(false, |m| m.archive_requested());
    if let Err(err) = consume(core, path, &name, archive).await {
        core.store.increment("skipped").await;
        return format!("{name},,,!Failed to consume: {err}");
    }

    match message {
        Some(message) => {
            let mut rng = StdRng::from_entropy();
            process_message(core, model, http, &name, &message, &mut rng).await
        }
        None => {
            core.store.increment("skipped").await;
            format!("{name},,,!Malformed message")
        }
    }
}

async fn consume(core: &Core, path: &Path, name: &str, archive: bool) -> std::io::Result<()> {
    if archive {
        if let Some(archive_path) = &core.config.archive_path {
            tokio::fs::create_dir_all(archive_path).await?;
            return tokio::fs::rename(path, archive_path.join(name)).await;
        }
    }
    tokio::fs::remove_file(path).await
}

// Process a backlog of spool files under the batch-wide bookkeeping:
// first-run marker, per-minute arrival series, retention trim and the
// closing summary line. A configuration problem halts the batch before
// any file is touched.
pub async fn run_batch(core: Arc<Core>, files: Vec<PathBuf>) -> crate::config::Result<()> {
    let started_at = Instant::now();
    let started = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());

    let model = Arc::new(ProbabilityModel::build_today(
        &core.config.model,
        &core.config.cohort,
        started,
    )?);

    if core.store.get_text("startedRunning").await.is_none() {
        let marker = mail_parser::DateTime::from_timestamp(started as i64).to_rfc3339();
        core.store.set_text("startedRunning", &marker, None).await;
        tracing::info!(
            context = "batch",
            event = "first-run",
            started = marker.as_str(),
        );
    }

    let mut slots = Vec::with_capacity(core.config.concurrency);
    for id in 0..core.config.concurrency {
        slots.push(WorkerSlot {
            id,
            http: core.http_client()?,
        });
    }

    tracing::info!(
        context = "batch",
        event = "start",
        files = files.len(),
        concurrency = slots.len(),
    );

    let worker_core = core.clone();
    let worker_model = model.clone();
    let summary = dispatch(
        files,
        slots,
        core.config.drain_timeout,
        move |slot, path| {
            let core = worker_core.clone();
            let model = worker_model.clone();
            async move {
                let line = process_file(&core, &model, &slot.http, &path).await;
                (slot, line)
            }
        },
    )
    .await;

    core.store
        .delete_ts_older_than(started.saturating_sub(core.config.results.retention.as_secs()))
        .await;

    let elapsed = started_at.elapsed().as_secs_f64();
    tracing::info!(
        context = "batch",
        event = "done",
        done = summary.done,
        timed_out = summary.timed_out.len(),
        run_time = format!("{elapsed:.3}").as_str(),
        rate = format!("{:.3}", summary.done as f64 / elapsed.max(f64::EPSILON)).as_str(),
    );

    Ok(())
}

// Single-message variant used for stdin ingestion; there is no spool file
// to consume.
pub async fn run_buffer(core: Arc<Core>, name: &str, raw: &[u8]) -> crate::config::Result<()> {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let model = ProbabilityModel::build_today(&core.config.model, &core.config.cohort, now)?;
    let http = core.http_client()?;

    let line = match SinkMessage::parse(raw) {
        Some(message) => {
            let mut rng = StdRng::from_entropy();
            process_message(&core, &model, &http, name, &message, &mut rng).await
        }
        None => {
            core.store.increment("skipped").await;
            format!("{name},,,!Malformed message")
        }
    };
    tracing::info!("{line}");
    Ok(())
}
