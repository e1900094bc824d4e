//! Live / Polling scheduler
//!
//! One periodic driver loop per process. Every tick it gathers readings,
//! runs the metrics pipeline on a blocking thread and publishes the result,
//! then sleeps for whatever is left of the interval. In live mode a source
//! watcher additionally pushes debounced change events, which are tailed into
//! the registry between ticks.
//!
//! A failed cycle is logged and the next tick runs as usual. Cancellation
//! stops the watcher and lets the in-flight cycle finish.

use chrono::{Local, NaiveDate, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cycle::{absorb, load_line_grades, CycleReport, MetricsPipeline};
use super::publisher::Publisher;
use crate::acquisition::discovery::check_root;
use crate::acquisition::{DeviceMap, FileBatchIngestor, IngestError, Ingestor, SourceEvent, SourceFilter, SourceWatcher, TailIngestor};
use crate::aggregation::lines_of;
use crate::config::{EngineConfig, RunMode};
use crate::reconciler::{CounterReconciler, DeviceRegistry};

/// Production date of the local wall clock.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Where each cycle's readings come from.
pub enum CycleSource {
    /// Tail cursors, fed by the watcher between ticks
    Live(Arc<TailIngestor>),
    /// Full re-read every tick
    Polling(Arc<dyn Ingestor>),
}

impl CycleSource {
    fn ingestor(&self) -> Arc<dyn Ingestor> {
        match self {
            Self::Live(tail) => Arc::clone(tail) as Arc<dyn Ingestor>,
            Self::Polling(ingestor) => Arc::clone(ingestor),
        }
    }
}

/// Counters returned when the engine stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub publish_failures: u64,
    pub change_events: u64,
    pub rollovers: u64,
}

pub struct Engine {
    pipeline: Arc<MetricsPipeline>,
    registry: Arc<DeviceRegistry>,
    publisher: Publisher,
    source: CycleSource,
    today: fn() -> NaiveDate,
}

impl Engine {
    /// Build an engine for the configured mode.
    pub fn new(config: EngineConfig, publisher: Publisher) -> Self {
        let filter = SourceFilter {
            lines: config.engine.lines.clone(),
            excluded_positions: vec![config.waste.classification_position.clone()],
        };
        let device_map = DeviceMap::new(&config.devices);
        let root = config.engine.log_root.clone();
        let source = match config.engine.mode {
            RunMode::Live => CycleSource::Live(Arc::new(TailIngestor::new(root, filter, device_map))),
            RunMode::Polling => CycleSource::Polling(Arc::new(FileBatchIngestor::new(root, filter, device_map))),
        };
        Self::with_source(config, publisher, source)
    }

    pub fn with_source(config: EngineConfig, publisher: Publisher, source: CycleSource) -> Self {
        let registry = DeviceRegistry::new(
            CounterReconciler::from_config(&config.reconciler),
            config.reconciler.window_size,
        );
        Self {
            pipeline: Arc::new(MetricsPipeline::new(config)),
            registry: Arc::new(registry),
            publisher,
            source,
            today: local_today,
        }
    }

    /// Replace the production-date clock.
    #[must_use]
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run until `cancel` fires.
    ///
    /// Fails only when the log root is unreadable at startup.
    pub async fn run(self, cancel: CancellationToken) -> Result<EngineStats, IngestError> {
        let config = self.pipeline.config();
        check_root(&config.engine.log_root)?;

        let interval = Duration::from_secs(config.engine.interval_secs);
        let mut stats = EngineStats::default();
        let mut date = (self.today)();

        let watcher_cancel = cancel.child_token();
        let (mut events, watcher_task) = match &self.source {
            CycleSource::Live(_) => {
                let (tx, rx) = mpsc::channel(256);
                let watcher = SourceWatcher::new(
                    config.engine.log_root.clone(),
                    Duration::from_millis(config.watcher.poll_ms),
                    Duration::from_millis(config.watcher.debounce_ms),
                );
                let task = tokio::spawn(watcher.run(self.today, tx, watcher_cancel.clone()));
                (Some(rx), Some(task))
            }
            CycleSource::Polling(_) => (None, None),
        };

        info!(
            mode = %config.engine.mode,
            root = %config.engine.log_root.display(),
            interval_secs = config.engine.interval_secs,
            sinks = self.publisher.sink_count(),
            "[Engine] Started"
        );

        let mut next_tick = Instant::now();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("[Engine] Shutdown signal received");
                    break;
                }
                () = tokio::time::sleep_until(next_tick) => {
                    let started = Instant::now();
                    self.roll_date(&mut date, (self.today)(), &mut stats);
                    self.tick(date, &mut stats).await;
                    let remaining = interval.saturating_sub(started.elapsed());
                    next_tick = Instant::now() + remaining;
                }
                event = next_event(&mut events) => match event {
                    Some(SourceEvent::Modified(path)) => {
                        let mut paths = vec![path];
                        if let Some(rx) = events.as_mut() {
                            while let Ok(SourceEvent::Modified(more)) = rx.try_recv() {
                                paths.push(more);
                            }
                        }
                        stats.change_events += paths.len() as u64;
                        self.apply_changes(date, paths).await;
                    }
                    Some(SourceEvent::DateRolled(new_date)) => self.roll_date(&mut date, new_date, &mut stats),
                    None => {
                        debug!("[Engine] Watcher channel closed");
                        events = None;
                    }
                },
            }
        }

        watcher_cancel.cancel();
        if let Some(task) = watcher_task {
            if let Err(e) = task.await {
                warn!(error = %e, "[Engine] Watcher task ended abnormally");
            }
        }
        info!(
            cycles = stats.cycles,
            failed = stats.failed_cycles,
            change_events = stats.change_events,
            "[Engine] Stopped"
        );
        Ok(stats)
    }

    /// Start a fresh day: forget cursors and device state.
    fn roll_date(&self, current: &mut NaiveDate, new: NaiveDate, stats: &mut EngineStats) {
        if new == *current {
            return;
        }
        info!(from = %current, to = %new, "[Engine] Production date rolled over");
        if let CycleSource::Live(tail) = &self.source {
            tail.reset();
        }
        self.registry.clear();
        stats.rollovers += 1;
        *current = new;
    }

    async fn tick(&self, date: NaiveDate, stats: &mut EngineStats) {
        stats.cycles += 1;
        let ingestor = self.source.ingestor();
        let registry = Arc::clone(&self.registry);
        let pipeline = Arc::clone(&self.pipeline);

        let result = tokio::task::spawn_blocking(move || run_cycle(ingestor.as_ref(), &registry, &pipeline, date)).await;
        match result {
            Ok(Ok(report)) => {
                let summary = self.publisher.publish(&report).await;
                stats.publish_failures += summary.failed as u64;
                debug!(
                    lines = report.lines.len(),
                    running = report.aggregate.running_devices,
                    delivered = summary.delivered,
                    "[Engine] Cycle complete"
                );
            }
            Ok(Err(e)) => {
                stats.failed_cycles += 1;
                warn!(error = %e, "[Engine] Cycle failed, retrying next tick");
            }
            Err(e) => {
                stats.failed_cycles += 1;
                error!(error = %e, "[Engine] Cycle task aborted");
            }
        }
    }

    async fn apply_changes(&self, date: NaiveDate, paths: Vec<PathBuf>) {
        let CycleSource::Live(tail) = &self.source else {
            return;
        };
        let tail = Arc::clone(tail);
        let registry = Arc::clone(&self.registry);
        let result = tokio::task::spawn_blocking(move || {
            let collected = tail.collect_paths(date, &paths);
            absorb(&registry, &collected)
        })
        .await;
        match result {
            Ok(summary) => debug!(
                applied = summary.applied,
                resets = summary.resets,
                out_of_order = summary.out_of_order,
                "[Engine] Change events applied"
            ),
            Err(e) => warn!(error = %e, "[Engine] Change event task aborted"),
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<SourceEvent>>) -> Option<SourceEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Collect, absorb and compute one cycle. Runs on a blocking thread.
pub fn run_cycle(
    ingestor: &dyn Ingestor,
    registry: &DeviceRegistry,
    pipeline: &MetricsPipeline,
    date: NaiveDate,
) -> Result<CycleReport, IngestError> {
    let collected = ingestor.collect(date)?;
    let summary = absorb(registry, &collected);
    if summary.resets > 0 {
        debug!(resets = summary.resets, source = ingestor.name(), "Resets absorbed this cycle");
    }

    let devices = registry.snapshot();
    let config = pipeline.config();
    let grades = load_line_grades(
        &config.engine.log_root,
        date,
        &lines_of(&devices),
        &config.waste.classification_position,
        registry.reconciler(),
    );
    Ok(pipeline.compute(date, &devices, &grades, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::date_dir;
    use crate::config::PublisherConfig;
    use crate::pipeline::publisher::line_key;
    use crate::pipeline::sink::MemoryBus;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::Path;

    fn fixed_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 21).unwrap()
    }

    fn append(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn config(root: &Path, mode: RunMode) -> EngineConfig {
        let mut config = EngineConfig::default_with_tables();
        config.engine.log_root = root.to_path_buf();
        config.engine.mode = mode;
        config.engine.interval_secs = 1;
        config.watcher.poll_ms = 20;
        config.watcher.debounce_ms = 50;
        config
    }

    async fn wait_for_total(bus: &MemoryBus, line: &str, expected: u64) -> bool {
        for _ in 0..100 {
            if let Some(snapshot) = bus.get(&line_key(line)).await {
                if snapshot["metrics"]["total_produced"] == expected {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_polling_engine_publishes_and_stops() {
        let tmp = tempfile::tempdir().unwrap();
        let file = date_dir(tmp.path(), fixed_day()).join("DC1/sau-me/sau-me-01.txt");
        append(
            &file,
            "[2025-11-21T06:00:00.000Z] Count: 1000\n[2025-11-21T06:00:10.000Z] Count: 1050\n[2025-11-21T06:00:20.000Z] Count: 40\n",
        );

        let bus = Arc::new(MemoryBus::new(16));
        let publisher = Publisher::new("analytics", &PublisherConfig::default()).with_sink(bus.clone());
        let engine = Engine::new(config(tmp.path(), RunMode::Polling), publisher).with_clock(fixed_day);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine.run(cancel.clone()));

        assert!(wait_for_total(&bus, "DC1", 90).await);
        cancel.cancel();
        let stats = handle.await.unwrap().unwrap();
        assert!(stats.cycles >= 1);
        assert_eq!(stats.failed_cycles, 0);
    }

    #[tokio::test]
    async fn test_live_engine_follows_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let file = date_dir(tmp.path(), fixed_day()).join("DC1/sau-me/sau-me-01.txt");
        append(&file, "[2025-11-21T06:00:00.000Z] Count: 100\n[2025-11-21T06:00:10.000Z] Count: 110\n");

        let bus = Arc::new(MemoryBus::new(16));
        let publisher = Publisher::new("analytics", &PublisherConfig::default()).with_sink(bus.clone());
        let engine = Engine::new(config(tmp.path(), RunMode::Live), publisher).with_clock(fixed_day);
        let registry = engine.registry();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine.run(cancel.clone()));

        assert!(wait_for_total(&bus, "DC1", 10).await);
        append(&file, "[2025-11-21T06:00:20.000Z] Count: 130\n");
        assert!(wait_for_total(&bus, "DC1", 30).await);
        assert_eq!(registry.len(), 1);

        cancel.cancel();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.rollovers, 0);
    }

    #[tokio::test]
    async fn test_unreadable_root_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let publisher = Publisher::new("analytics", &PublisherConfig::default());
        let engine = Engine::new(config(&tmp.path().join("missing"), RunMode::Polling), publisher);
        let result = engine.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(IngestError::RootUnreadable { .. })));
    }
}
