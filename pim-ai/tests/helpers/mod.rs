//! Shared test helpers for pim-ai integration tests

#![allow(dead_code)]

pub mod fake_collaborators;

use pim_ai::models::JobRecord;
use pim_ai::services::{Collaborators, JobStore, PipelineRunner};
use pim_common::config::PipelineSettings;
use pim_common::events::{EventBus, PimEvent};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use fake_collaborators::*;

/// Runner over a temporary jobs directory
///
/// The TempDir must be kept alive for the duration of the test.
pub struct TestPipeline {
    pub dir: TempDir,
    pub store: JobStore,
    pub event_bus: EventBus,
    pub runner: PipelineRunner,
}

impl TestPipeline {
    pub fn new(collaborators: Collaborators) -> Self {
        Self::with_settings(collaborators, test_settings())
    }

    pub fn with_settings(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new();
        let event_bus = EventBus::new(1000);
        let runner = PipelineRunner::new(
            store.clone(),
            event_bus.clone(),
            collaborators,
            settings,
            dir.path().join("jobs"),
        );

        Self {
            dir,
            store,
            event_bus,
            runner,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PimEvent> {
        self.event_bus.subscribe()
    }

    /// Submit and wait until the job is terminal
    pub async fn run_to_end(&self, url: &str) -> Arc<JobRecord> {
        let job_id = self.runner.submit(url).await;
        wait_for_terminal(&self.store, job_id).await
    }
}

pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        max_frames: 12,
        ..PipelineSettings::default()
    }
}

/// Poll the store until the job is Completed or Failed (10 s limit)
pub async fn wait_for_terminal(store: &JobStore, job_id: Uuid) -> Arc<JobRecord> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(record) = store.get(job_id).await {
            if record.is_terminal() {
                return record;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not finish in time",
            job_id
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Drain every event already sent for `job_id`
pub fn drain_events(rx: &mut broadcast::Receiver<PimEvent>, job_id: Uuid) -> Vec<PimEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.job_id() == job_id {
            events.push(event);
        }
    }
    events
}

/// Receive events for `job_id` until its JobCompleted or JobFailed (10 s limit)
pub async fn events_until_terminal(rx: &mut broadcast::Receiver<PimEvent>, job_id: Uuid) -> Vec<PimEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for terminal event")
            .expect("event bus closed");
        if event.job_id() != job_id {
            continue;
        }
        let terminal = matches!(event, PimEvent::JobCompleted { .. } | PimEvent::JobFailed { .. });
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Progress values of every JobProgress event, in order
pub fn progress_values(events: &[PimEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            PimEvent::JobProgress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}
