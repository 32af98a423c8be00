//! Engine orchestration
//!
//! Wires the pipeline together: readings arrive from a
//! [`ReadingSource`](crate::ingest::ReadingSource), get routed to one
//! worker task per pod (preserving per-pod ordering while pods evaluate
//! in parallel), and each worker runs the classify → evaluate → store →
//! persist cycle.
//!
//! The policy catalog and pod registry are held behind `ArcSwap` so an
//! administrator edit lands on the next reading without a restart.
//!
//! Ordering guarantee: one mpsc channel per pod, consumed by exactly one
//! task that owns that pod's [`PodEvaluator`]. Readings for a pod are
//! never evaluated out of order or concurrently.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::alarm_store::AlarmStore;
use crate::classifier;
use crate::config::EngineConfig;
use crate::evaluator::{Decision, PodEvaluator};
use crate::ingest::{ReadingEvent, ReadingSource};
use crate::metrics::calculate_vpd;
use crate::storage::HistoryStorage;
use crate::types::{AlarmPolicy, PodProfile, TelemetryReading};

/// Per-pod reading queue depth. A pod producing every 10 s never gets
/// close; the bound exists to surface a stuck worker instead of growing
/// without limit.
const POD_QUEUE_DEPTH: usize = 32;

// ============================================================================
// Catalogs
// ============================================================================

/// The administrator-owned alarm policy catalog, refreshable at runtime.
#[derive(Debug, Clone, Default)]
pub struct PolicyCatalog {
    pub policies: Vec<AlarmPolicy>,
}

impl PolicyCatalog {
    /// Policies applicable to a pod: organization match plus stage and
    /// pod-type filters. Non-matching policies are skipped entirely — no
    /// breach state is tracked for them.
    pub fn for_pod<'a>(&'a self, profile: &'a PodProfile) -> impl Iterator<Item = &'a AlarmPolicy> {
        self.policies.iter().filter(move |p| {
            p.org_id == profile.org_id && p.applies_to(profile.stage, profile.pod_type)
        })
    }
}

/// Pod metadata registry (owned by the excluded CRUD layer, read here).
#[derive(Debug, Clone, Default)]
pub struct PodRegistry {
    pods: HashMap<String, PodProfile>,
}

impl PodRegistry {
    pub fn new(pods: Vec<PodProfile>) -> Self {
        Self {
            pods: pods.into_iter().map(|p| (p.pod_id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, pod_id: &str) -> Option<&PodProfile> {
        self.pods.get(pod_id)
    }
}

/// Engine counters for the status endpoint.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub readings_processed: AtomicU64,
    pub readings_faulted: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub alarms_opened: AtomicU64,
}

// ============================================================================
// Pod worker
// ============================================================================

/// One pod's evaluation context. Owns the evaluator state; never shared.
pub struct PodWorker {
    evaluator: PodEvaluator,
    store: Arc<AlarmStore>,
    storage: Arc<HistoryStorage>,
    policies: Arc<arc_swap::ArcSwap<PolicyCatalog>>,
    pods: Arc<arc_swap::ArcSwap<PodRegistry>>,
    stats: Arc<EngineStats>,
    classifier_staleness_secs: u64,
    classifier_warning_ratio: f64,
    retry_attempts: u32,
    retry_base: Duration,
}

impl PodWorker {
    pub fn new(
        pod_id: &str,
        store: Arc<AlarmStore>,
        storage: Arc<HistoryStorage>,
        policies: Arc<arc_swap::ArcSwap<PolicyCatalog>>,
        pods: Arc<arc_swap::ArcSwap<PodRegistry>>,
        stats: Arc<EngineStats>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            evaluator: PodEvaluator::new(pod_id),
            store,
            storage,
            policies,
            pods,
            stats,
            classifier_staleness_secs: config.classifier.staleness_secs,
            classifier_warning_ratio: config.classifier.warning_ratio,
            retry_attempts: config.storage.retry_attempts,
            retry_base: Duration::from_millis(config.storage.retry_base_ms),
        }
    }

    /// Run one full evaluation cycle for one reading.
    ///
    /// `now` is passed in so tests and replays drive virtual time. A
    /// returned error means a required alarm write failed after retries;
    /// the evaluator state for that policy was *not* advanced, so the
    /// next reading re-attempts the same transition.
    pub async fn evaluate_cycle(
        &mut self,
        mut reading: TelemetryReading,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        // Backfill the derived metric when the source didn't provide it.
        if reading.vpd_kpa <= 0.0 {
            reading.vpd_kpa = calculate_vpd(reading.temperature_c, reading.humidity_pct);
        }

        // Faulted or not, the reading is persisted — gaps must be visible
        // in the audit trail. A failed reading write is logged but does
        // not block evaluation (alarm writes are the hard requirement).
        if let Err(e) = self.storage.persist_reading(&reading) {
            warn!(pod = %reading.pod_id, error = %e, "reading persist failed");
        }
        self.stats.readings_processed.fetch_add(1, Ordering::Relaxed);

        let pods = self.pods.load();
        let Some(profile) = pods.get(&reading.pod_id) else {
            warn!(pod = %reading.pod_id, "reading for unknown pod, skipping evaluation");
            return Ok(());
        };

        let verdicts = classifier::classify_reading(
            &reading,
            &profile.setpoints,
            profile.lights_on,
            now,
            self.classifier_staleness_secs,
            self.classifier_warning_ratio,
        );
        if verdicts
            .iter()
            .any(|v| !v.health.usable_for_evaluation())
        {
            self.stats.readings_faulted.fetch_add(1, Ordering::Relaxed);
        }

        let catalog = self.policies.load();
        let mut applicable = 0usize;
        for policy in catalog.for_pod(profile) {
            applicable += 1;
            let open = self.store.open_alarm(&reading.pod_id, policy.alarm_type);
            let last_resolved = self
                .store
                .last_resolved_at(&reading.pod_id, policy.alarm_type);
            let (decision, next_state) = self.evaluator.evaluate_policy(
                policy,
                &verdicts,
                open.as_ref(),
                last_resolved,
                now,
            );

            match decision {
                Decision::Trigger { value } => {
                    let message = format!(
                        "{} {:.1} breached {} threshold {:.1} on pod {}",
                        policy.alarm_type.parameter(),
                        value,
                        policy.alarm_type,
                        policy.threshold,
                        reading.pod_id
                    );
                    let alarm = self
                        .store
                        .open(policy, &reading.pod_id, value, message, now);
                    self.storage
                        .persist_alarm_with_retry(&alarm, self.retry_attempts, self.retry_base)
                        .await
                        .map_err(|e| {
                            self.stats.cycles_failed.fetch_add(1, Ordering::Relaxed);
                            anyhow::anyhow!("alarm open persist failed for {}: {e}", alarm.id)
                        })?;
                    self.stats.alarms_opened.fetch_add(1, Ordering::Relaxed);
                    info!(
                        pod = %reading.pod_id,
                        alarm_type = %policy.alarm_type,
                        value,
                        "alarm triggered"
                    );
                }
                Decision::Refresh { value } => {
                    let message = format!(
                        "{} now {:.1} (threshold {:.1}) on pod {}",
                        policy.alarm_type.parameter(),
                        value,
                        policy.threshold,
                        reading.pod_id
                    );
                    if let Some(alarm) = self.store.refresh(
                        &reading.pod_id,
                        policy.alarm_type,
                        value,
                        message,
                        now,
                    ) {
                        self.storage
                            .persist_alarm_with_retry(&alarm, self.retry_attempts, self.retry_base)
                            .await
                            .map_err(|e| {
                                self.stats.cycles_failed.fetch_add(1, Ordering::Relaxed);
                                anyhow::anyhow!("alarm refresh persist failed: {e}")
                            })?;
                        debug!(pod = %reading.pod_id, alarm_type = %policy.alarm_type, value, "alarm refreshed");
                    }
                }
                Decision::AutoClear => {
                    if let Some(alarm) = &open {
                        match self.store.resolve(
                            alarm.id,
                            "system",
                            "auto-resolved: condition returned to range".into(),
                            None,
                            None,
                            now,
                        ) {
                            Ok(resolved) => {
                                self.storage
                                    .persist_alarm_with_retry(
                                        &resolved,
                                        self.retry_attempts,
                                        self.retry_base,
                                    )
                                    .await
                                    .map_err(|e| {
                                        self.stats.cycles_failed.fetch_add(1, Ordering::Relaxed);
                                        anyhow::anyhow!("auto-clear persist failed: {e}")
                                    })?;
                                info!(pod = %reading.pod_id, alarm_type = %policy.alarm_type, "alarm auto-cleared");
                            }
                            Err(e) => {
                                // Lost a race with a manual resolve —
                                // the outcome is the same.
                                debug!(alarm_id = %alarm.id, error = %e, "auto-clear skipped");
                            }
                        }
                    }
                }
                Decision::Debouncing => {
                    trace!(pod = %reading.pod_id, alarm_type = %policy.alarm_type, "breach debouncing");
                }
                Decision::Suppressed => {
                    debug!(pod = %reading.pod_id, alarm_type = %policy.alarm_type, "trigger inside post-resolution suppression window");
                }
                Decision::None => {}
            }

            // The write (if any) succeeded — commit the breach timeline.
            self.evaluator.commit(policy.alarm_type, next_state);
        }

        if applicable == 0 {
            trace!(pod = %reading.pod_id, "no applicable alarm policies");
        }
        Ok(())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Owns the reading fan-out and the per-pod worker tasks.
pub struct Engine {
    store: Arc<AlarmStore>,
    storage: Arc<HistoryStorage>,
    policies: Arc<arc_swap::ArcSwap<PolicyCatalog>>,
    pods: Arc<arc_swap::ArcSwap<PodRegistry>>,
    stats: Arc<EngineStats>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        store: Arc<AlarmStore>,
        storage: Arc<HistoryStorage>,
        policies: PolicyCatalog,
        pods: PodRegistry,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            storage,
            policies: Arc::new(arc_swap::ArcSwap::from_pointee(policies)),
            pods: Arc::new(arc_swap::ArcSwap::from_pointee(pods)),
            stats: Arc::new(EngineStats::default()),
            config,
            cancel,
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Handle for refreshing the policy catalog without restart.
    pub fn policy_handle(&self) -> Arc<arc_swap::ArcSwap<PolicyCatalog>> {
        Arc::clone(&self.policies)
    }

    /// Handle for refreshing the pod registry without restart.
    pub fn pod_handle(&self) -> Arc<arc_swap::ArcSwap<PodRegistry>> {
        Arc::clone(&self.pods)
    }

    /// Spawn the persistence task: every lifecycle transition (including
    /// API-driven ones) is written to the audit trail and the alarm's
    /// stored snapshot is updated.
    pub fn spawn_transition_persister(&self) -> tokio::task::JoinHandle<()> {
        let mut events = self.store.subscribe();
        let storage = Arc::clone(&self.storage);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    event = events.recv() => {
                        let event = match event {
                            Ok(ev) => ev,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                warn!(missed = n, "transition persister lagged");
                                continue;
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                        };
                        if let Err(e) = storage.persist_transition(&event) {
                            error!(error = %e, "transition persist failed");
                        }
                        if let Err(e) = storage.persist_alarm(&event.alarm) {
                            error!(alarm_id = %event.alarm.id, error = %e, "alarm snapshot persist failed");
                        }
                    }
                }
            }
        })
    }

    /// Run the fan-out loop until the source ends or the engine is
    /// cancelled. Spawns one worker task per pod on first sight.
    pub async fn run<S: ReadingSource>(&self, mut source: S) -> anyhow::Result<()> {
        let mut workers: HashMap<String, mpsc::Sender<TelemetryReading>> = HashMap::new();
        info!(source = source.source_name(), "engine started");

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("engine cancelled, draining workers");
                    return Ok(());
                }
                event = source.next_reading() => event?,
            };
            let reading = match event {
                ReadingEvent::Reading(r) => r,
                ReadingEvent::Eof => {
                    info!("reading source exhausted");
                    // Dropping the senders lets workers drain and exit.
                    workers.clear();
                    return Ok(());
                }
            };

            let tx = workers
                .entry(reading.pod_id.clone())
                .or_insert_with(|| self.spawn_worker(&reading.pod_id))
                .clone();
            if let Err(e) = tx.send(reading).await {
                // Worker died; it will be respawned on the next reading.
                let pod_id = e.0.pod_id.clone();
                warn!(pod = %pod_id, "pod worker gone, respawning");
                workers.remove(&pod_id);
            }
        }
    }

    fn spawn_worker(&self, pod_id: &str) -> mpsc::Sender<TelemetryReading> {
        let (tx, mut rx) = mpsc::channel::<TelemetryReading>(POD_QUEUE_DEPTH);
        let mut worker = PodWorker::new(
            pod_id,
            Arc::clone(&self.store),
            Arc::clone(&self.storage),
            Arc::clone(&self.policies),
            Arc::clone(&self.pods),
            Arc::clone(&self.stats),
            &self.config,
        );
        let cancel = self.cancel.clone();
        let pod = pod_id.to_string();
        info!(pod = %pod, "pod worker spawned");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    reading = rx.recv() => {
                        let Some(reading) = reading else { return };
                        if let Err(e) = worker.evaluate_cycle(reading, Utc::now()).await {
                            // Fatal for this cycle only; state was not
                            // advanced, the next reading retries.
                            error!(pod = %pod, error = %e, "evaluation cycle failed");
                        }
                    }
                }
            }
        });
        tx
    }
}
