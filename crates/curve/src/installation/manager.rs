//! Installation Manager
//!
//! Spawns one task per installation, routes input events to them and
//! coordinates graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use hvac_analytics::{
    AnalyticsConfig, CollectionLevel, DrainSummary, Installation, InstallationStatus, Transport,
};

use crate::config::CollectorConfig;
use crate::identity::validate_anonymous_id;

use super::{
    CollectorError, EventPayload, InputEvent, InstallationCommand, InstallationHandle, Result,
    TaskState,
};

/// Local wall-clock time used for day boundaries
pub type Clock = fn() -> NaiveDateTime;

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Settings
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub analytics: AnalyticsConfig,
    pub collection_level: CollectionLevel,
    pub tick_interval: Duration,
    pub command_buffer: usize,
    pub shutdown_timeout: Duration,
    pub clock: Clock,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&CollectorConfig::default())
    }
}

impl RuntimeSettings {
    /// Longest a task may take to stop: one drain already in flight, then
    /// the final drain
    fn join_timeout(&self) -> Duration {
        self.shutdown_timeout * 2 + Duration::from_secs(1)
    }

    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            analytics: config.analytics.clone(),
            collection_level: config.collector.collection_level,
            tick_interval: config.collector.tick_interval(),
            command_buffer: config.collector.command_buffer.max(1),
            shutdown_timeout: config.collector.shutdown_timeout(),
            clock: local_now,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Installation Manager
// ─────────────────────────────────────────────────────────────────────────────

struct RunningInstallation {
    handle: InstallationHandle,
    join_handle: JoinHandle<()>,
}

/// Owner of all installation tasks
pub struct InstallationManager {
    installations: DashMap<String, RunningInstallation>,
    shutdown_tx: broadcast::Sender<()>,
    transport: Arc<dyn Transport>,
    settings: RuntimeSettings,
}

impl InstallationManager {
    pub fn new(transport: Arc<dyn Transport>, settings: RuntimeSettings) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            installations: DashMap::new(),
            shutdown_tx,
            transport,
            settings,
        }
    }

    pub fn new_shared(transport: Arc<dyn Transport>, settings: RuntimeSettings) -> Arc<Self> {
        Arc::new(Self::new(transport, settings))
    }

    /// Start a task for a new installation
    pub fn spawn(&self, anonymous_id: &str) -> Result<InstallationHandle> {
        match self.installations.entry(anonymous_id.to_string()) {
            Entry::Occupied(_) => Err(CollectorError::AlreadyRunning(anonymous_id.to_string())),
            Entry::Vacant(slot) => {
                let running = self.start(anonymous_id);
                let handle = running.handle.clone();
                slot.insert(running);
                Ok(handle)
            }
        }
    }

    /// Handle for an installation, starting its task on first use
    pub fn get_or_spawn(&self, anonymous_id: &str) -> InstallationHandle {
        self.installations
            .entry(anonymous_id.to_string())
            .or_insert_with(|| self.start(anonymous_id))
            .handle
            .clone()
    }

    pub fn get(&self, anonymous_id: &str) -> Option<InstallationHandle> {
        self.installations
            .get(anonymous_id)
            .map(|r| r.handle.clone())
    }

    /// Route an input event to its installation without waiting
    pub fn dispatch(&self, event: InputEvent, default_id: &str) -> Result<()> {
        let anonymous_id = event.installation_id(default_id);
        validate_anonymous_id(anonymous_id)?;
        let handle = self.get_or_spawn(anonymous_id);
        handle.record(event.payload)
    }

    fn start(&self, anonymous_id: &str) -> RunningInstallation {
        let settings = &self.settings;
        let today = (settings.clock)().date();
        let installation = Installation::new(anonymous_id, today, settings.analytics.clone())
            .with_collection_level(settings.collection_level);

        let (command_tx, command_rx) = mpsc::channel(settings.command_buffer);
        let state = Arc::new(AtomicU8::new(TaskState::Running as u8));
        let status = Arc::new(RwLock::new(installation.status()));
        let handle = InstallationHandle::new(
            anonymous_id.to_string(),
            command_tx,
            Arc::clone(&state),
            Arc::clone(&status),
        );

        let task = InstallationTask {
            installation,
            transport: Arc::clone(&self.transport),
            status,
            clock: settings.clock,
        };
        let join_handle = tokio::spawn(task.run(
            command_rx,
            self.shutdown_tx.subscribe(),
            state,
            settings.tick_interval,
            settings.shutdown_timeout,
        ));

        tracing::info!(anonymous_id, %today, "Installation started");
        RunningInstallation {
            handle,
            join_handle,
        }
    }

    /// Stop one installation, flushing what it has queued
    pub async fn stop(&self, anonymous_id: &str) -> Result<()> {
        let running = self
            .installations
            .remove(anonymous_id)
            .map(|(_, v)| v)
            .ok_or_else(|| CollectorError::NotRunning(anonymous_id.to_string()))?;

        let _ = running.handle.shutdown().await;

        let timeout = self.settings.join_timeout();
        match tokio::time::timeout(timeout, running.join_handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(anonymous_id, error = ?e, "Installation task panicked");
                Err(CollectorError::ChannelClosed)
            }
            Err(_) => {
                tracing::warn!(anonymous_id, "Installation shutdown timed out");
                Err(CollectorError::ShutdownTimeout)
            }
        }
    }

    /// Stop every installation
    pub async fn shutdown_all(&self) -> Result<()> {
        tracing::info!(installations = self.installations.len(), "Shutting down installations");
        let _ = self.shutdown_tx.send(());

        let ids: Vec<String> = self.installations.iter().map(|e| e.key().clone()).collect();
        let joins = ids.into_iter().filter_map(|id| {
            self.installations
                .remove(&id)
                .map(|(_, running)| running.join_handle)
        });

        let timeout = self.settings.join_timeout();
        match tokio::time::timeout(timeout, futures::future::join_all(joins)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::error!(error = ?e, "Installation task panicked");
                    }
                }
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Some installations did not stop within timeout");
                Err(CollectorError::ShutdownTimeout)
            }
        }
    }

    pub fn list(&self) -> Vec<(String, TaskState)> {
        self.installations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().handle.state()))
            .collect()
    }

    pub fn statuses(&self) -> Vec<InstallationStatus> {
        self.installations
            .iter()
            .map(|entry| entry.value().handle.status())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.installations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installations.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Installation Task
// ─────────────────────────────────────────────────────────────────────────────

struct InstallationTask {
    installation: Installation,
    transport: Arc<dyn Transport>,
    status: Arc<RwLock<InstallationStatus>>,
    clock: Clock,
}

impl InstallationTask {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<InstallationCommand>,
        mut shutdown_rx: broadcast::Receiver<()>,
        state: Arc<AtomicU8>,
        tick_interval: Duration,
        drain_timeout: Duration,
    ) {
        let start = tokio::time::Instant::now() + tick_interval;
        let mut tick_timer = tokio::time::interval_at(start, tick_interval);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    tracing::debug!(anonymous_id = %self.id(), "Received global shutdown signal");
                    break;
                }

                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        InstallationCommand::Shutdown => {
                            tracing::debug!(anonymous_id = %self.id(), "Received shutdown command");
                            break;
                        }
                        InstallationCommand::Event(payload) => {
                            self.handle_event(payload);
                            self.publish();
                        }
                        InstallationCommand::AdvanceClock(now, reply) => {
                            let report = self.installation.advance_clock(now);
                            self.publish();
                            let _ = reply.send(report);
                        }
                        InstallationCommand::Drain(reply) => {
                            let summary = self.drain_within(drain_timeout).await;
                            self.publish();
                            if let Some(summary) = summary {
                                let _ = reply.send(summary);
                            }
                        }
                        InstallationCommand::EstimateRates(reply) => {
                            let _ = reply.send(self.installation.estimate_now());
                        }
                        InstallationCommand::ClearQueue(reply) => {
                            let cleared = self.installation.clear_queue();
                            self.publish();
                            let _ = reply.send(cleared);
                        }
                    }
                }

                _ = tick_timer.tick() => {
                    self.installation.advance_clock((self.clock)());
                    self.drain_within(drain_timeout).await;
                    self.publish();
                }
            }
        }

        state.store(TaskState::Stopping as u8, Ordering::SeqCst);
        self.installation.flush_batch();
        self.drain_within(drain_timeout).await;
        self.publish();

        state.store(TaskState::Stopped as u8, Ordering::SeqCst);
        tracing::info!(
            anonymous_id = %self.id(),
            queued = self.installation.queue().len(),
            "Installation stopped"
        );
    }

    /// Drain with a deadline so a stalled transport cannot wedge the loop
    ///
    /// Items in flight when the deadline passes stay queued.
    async fn drain_within(&mut self, limit: Duration) -> Option<DrainSummary> {
        let transport = Arc::clone(&self.transport);
        match tokio::time::timeout(limit, self.installation.drain(transport.as_ref())).await {
            Ok(summary) => Some(summary),
            Err(_) => {
                tracing::warn!(
                    anonymous_id = %self.id(),
                    queued = self.installation.queue().len(),
                    "Drain timed out"
                );
                None
            }
        }
    }

    fn handle_event(&mut self, payload: EventPayload) {
        let result = match payload {
            EventPayload::Sample(sample) => self.installation.record_sample(sample).map(|_| ()),
            EventPayload::UserInput(input) => self.installation.record_user_input(input),
            EventPayload::Weather(reading) => self.installation.record_weather(reading),
        };
        if let Err(e) = result {
            tracing::warn!(anonymous_id = %self.id(), error = %e, "Dropped input event");
        }
    }

    fn publish(&self) {
        *self.status.write() = self.installation.status();
    }

    fn id(&self) -> &str {
        self.installation.anonymous_id()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use hvac_analytics::{
        BackendResponse, DayPhase, HvacState, Sample, SendOutcome, Transmission,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemoryTransport {
        sent: Mutex<Vec<(&'static str, String)>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, item: &Transmission) -> SendOutcome {
            self.sent
                .lock()
                .push((item.endpoint(), item.anonymous_id().to_string()));
            SendOutcome::Delivered(BackendResponse::default())
        }
    }

    fn fixed_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn manager() -> (InstallationManager, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::default());
        let settings = RuntimeSettings {
            tick_interval: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(1),
            clock: fixed_clock,
            ..RuntimeSettings::default()
        };
        (
            InstallationManager::new(transport.clone(), settings),
            transport,
        )
    }

    fn sample(h: u32, m: u32, state: HvacState, temp: f64) -> Sample {
        Sample::new(at(h, m), temp, state, 72.0)
    }

    #[tokio::test]
    async fn test_spawn_and_stop_installation() {
        let (manager, _) = manager();
        let handle = manager.spawn("install-1").unwrap();
        assert!(handle.is_running());
        assert!(matches!(
            manager.spawn("install-1"),
            Err(CollectorError::AlreadyRunning(_))
        ));

        manager.stop("install-1").await.unwrap();
        assert!(handle.is_terminal());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_events_reach_the_installation() {
        let (manager, _) = manager();
        let handle = manager.get_or_spawn("install-1");

        for (h, m, state, temp) in [
            (10, 0, HvacState::Off, 70.0),
            (10, 5, HvacState::Heating, 70.0),
            (10, 20, HvacState::Heating, 73.0),
            (10, 25, HvacState::Off, 73.0),
        ] {
            handle.record_sample(sample(h, m, state, temp)).unwrap();
        }
        // Commands are handled in order, so a drain acts as a barrier
        handle.drain().await.unwrap();

        let status = handle.status();
        assert_eq!(status.samples_today, 4);
        assert_eq!(status.cycles_today, 1);
        assert_eq!(status.phase, DayPhase::Collecting);

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_anonymous_id() {
        let (manager, _) = manager();
        let payload = EventPayload::Sample(sample(10, 0, HvacState::Off, 70.0));

        manager
            .dispatch(InputEvent::new(payload.clone()), "local")
            .unwrap();
        manager
            .dispatch(InputEvent::for_installation("remote", payload), "local")
            .unwrap();

        let mut ids: Vec<_> = manager.list().into_iter().map(|(id, _)| id).collect();
        ids.sort();
        assert_eq!(ids, vec!["local", "remote"]);

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_day_roll_over_and_drain() {
        let (manager, transport) = manager();
        let handle = manager.get_or_spawn("install-1");
        handle
            .record_sample(sample(10, 0, HvacState::Off, 70.0))
            .unwrap();

        let next_day = at(0, 0) + chrono::Duration::days(1);
        let report = handle.advance_clock(next_day).await.unwrap().unwrap();
        assert_eq!(report.date, fixed_clock().date());

        let summary = handle.drain().await.unwrap();
        assert_eq!(summary.delivered, 2);
        assert_eq!(
            transport
                .sent
                .lock()
                .iter()
                .map(|(endpoint, _)| *endpoint)
                .collect::<Vec<_>>(),
            vec!["sensor-data", "analytics-daily-report"]
        );

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_batch() {
        let (manager, transport) = manager();
        let handle = manager.get_or_spawn("install-1");
        handle
            .record_sample(sample(10, 0, HvacState::Off, 70.0))
            .unwrap();
        handle
            .record_sample(sample(10, 5, HvacState::Off, 70.1))
            .unwrap();
        handle.drain().await.unwrap();
        assert!(transport.sent.lock().is_empty());

        manager.shutdown_all().await.unwrap();

        assert_eq!(
            *transport.sent.lock(),
            vec![("sensor-data", "install-1".to_string())]
        );
        assert_eq!(handle.state(), TaskState::Stopped);
        assert_eq!(handle.status().pending_batch, 0);
    }

    struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        async fn send(&self, _item: &Transmission) -> SendOutcome {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_transport_does_not_block_shutdown() {
        let settings = RuntimeSettings {
            tick_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_millis(100),
            clock: fixed_clock,
            ..RuntimeSettings::default()
        };
        let manager = InstallationManager::new(Arc::new(StalledTransport), settings);
        let handle = manager.get_or_spawn("install-1");
        handle
            .record_sample(sample(10, 0, HvacState::Off, 70.0))
            .unwrap();
        handle
            .advance_clock(at(0, 0) + chrono::Duration::days(1))
            .await
            .unwrap();

        assert!(matches!(handle.drain().await, Err(CollectorError::ChannelClosed)));

        // Let a tick start its own stalled drain before shutting down
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.shutdown_all().await.unwrap();

        assert_eq!(handle.state(), TaskState::Stopped);
        assert_eq!(handle.status().queue.len, 2);
    }

    #[tokio::test]
    async fn test_estimate_rates_previews_open_day() {
        let (manager, transport) = manager();
        let handle = manager.get_or_spawn("install-1");
        for (h, m, state, temp) in [
            (10, 5, HvacState::Heating, 70.0),
            (10, 25, HvacState::Heating, 73.0),
        ] {
            handle.record_sample(sample(h, m, state, temp)).unwrap();
        }

        let rates = handle.estimate_rates().await.unwrap();
        let heating = &rates[&hvac_analytics::ThermalMode::Heating];
        assert!((heating.rate_per_30min - 4.5).abs() < 1e-9);
        assert_eq!(handle.status().phase, DayPhase::Collecting);
        assert!(transport.sent.lock().is_empty());

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_refuses_unsafe_ids() {
        let (manager, _) = manager();
        let payload = EventPayload::Sample(sample(10, 0, HvacState::Off, 70.0));

        assert!(matches!(
            manager.dispatch(InputEvent::for_installation("a/b", payload.clone()), "local"),
            Err(CollectorError::InvalidEvent(_))
        ));
        assert!(manager.dispatch(InputEvent::new(payload), "../up").is_err());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_minimal_level_sends_no_batches() {
        let transport = Arc::new(MemoryTransport::default());
        let settings = RuntimeSettings {
            tick_interval: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(1),
            collection_level: CollectionLevel::Minimal,
            clock: fixed_clock,
            ..RuntimeSettings::default()
        };
        let manager = InstallationManager::new(transport.clone(), settings);
        let handle = manager.get_or_spawn("install-1");
        handle
            .record_sample(sample(10, 0, HvacState::Off, 70.0))
            .unwrap();
        handle
            .advance_clock(at(0, 0) + chrono::Duration::days(1))
            .await
            .unwrap();
        manager.shutdown_all().await.unwrap();

        assert_eq!(
            *transport.sent.lock(),
            vec![("analytics-daily-report", "install-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_full_command_buffer_reports_backpressure() {
        let (command_tx, _command_rx) = mpsc::channel(1);
        let status = Installation::new("install-1", fixed_clock().date(), AnalyticsConfig::default())
            .status();
        let handle = InstallationHandle::new(
            "install-1".to_string(),
            command_tx,
            Arc::new(AtomicU8::new(TaskState::Running as u8)),
            Arc::new(RwLock::new(status)),
        );

        let payload = EventPayload::Sample(sample(10, 0, HvacState::Off, 70.0));
        handle.record(payload.clone()).unwrap();
        assert!(matches!(
            handle.record(payload),
            Err(CollectorError::Backpressure(_))
        ));
    }
}
