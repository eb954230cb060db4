// Aggregation service - runs discovery in the background and serves plan/apply
use crate::application::entity_store::EntityStore;
use crate::application::reconciler::{self, Directive, DirectiveOutcome, Reconciler};
use crate::application::topology_discoverer::{DiscoveryOptions, DiscoveryReport, TopologyDiscoverer};
use crate::domain::topology::{DesiredLevels, Topology};
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq)]
pub enum ServiceError {
    #[error("a discovery run is already in progress")]
    AlreadyRunning,
    #[error("no topology has been discovered yet")]
    NoTopology,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryStatus {
    pub running: bool,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RunState {
    active: Option<ActiveRun>,
    last_error: Option<String>,
}

#[derive(Clone)]
pub struct AggregationService {
    store: Arc<dyn EntityStore>,
    options: DiscoveryOptions,
    latest: Arc<ArcSwapOption<DiscoveryReport>>,
    progress: Arc<watch::Sender<f64>>,
    runs: Arc<Mutex<RunState>>,
    next_run: Arc<AtomicU64>,
}

impl AggregationService {
    pub fn new(store: Arc<dyn EntityStore>, options: DiscoveryOptions) -> Self {
        let (progress, _) = watch::channel(0.0);
        Self {
            store,
            options,
            latest: Arc::new(ArcSwapOption::empty()),
            progress: Arc::new(progress),
            runs: Arc::new(Mutex::new(RunState::default())),
            next_run: Arc::new(AtomicU64::new(1)),
        }
    }

    fn lock_runs(&self) -> MutexGuard<'_, RunState> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a discovery run on a background task. The previous report
    /// stays visible until the new one is complete.
    pub fn start_discovery(&self) -> Result<JoinHandle<()>, ServiceError> {
        let cancel = CancellationToken::new();
        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        {
            let mut runs = self.lock_runs();
            if runs.active.is_some() {
                return Err(ServiceError::AlreadyRunning);
            }
            runs.active = Some(ActiveRun { id, cancel: cancel.clone() });
            runs.last_error = None;
        }
        self.progress.send_replace(0.0);

        let discoverer = TopologyDiscoverer::new(self.store.clone(), self.options.clone())
            .with_progress(self.progress.clone())
            .with_cancellation(cancel);
        let latest = self.latest.clone();
        let runs = self.runs.clone();
        tracing::info!(run = id, "Discovery started");

        Ok(tokio::spawn(async move {
            let outcome = discoverer.discover().await;
            let mut state = runs.lock().unwrap_or_else(PoisonError::into_inner);
            match outcome {
                Ok(report) => {
                    latest.store(Some(Arc::new(report)));
                    tracing::info!(run = id, "Discovery published");
                }
                Err(err) => {
                    tracing::warn!(run = id, error = %err, "Discovery did not complete");
                    state.last_error = Some(err.to_string());
                }
            }
            if state.active.as_ref().is_some_and(|active| active.id == id) {
                state.active = None;
            }
        }))
    }

    /// Requests cancellation of the running discovery, if any.
    pub fn cancel(&self) -> bool {
        match &self.lock_runs().active {
            Some(active) => {
                active.cancel.cancel();
                tracing::info!(run = active.id, "Discovery cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> DiscoveryStatus {
        let runs = self.lock_runs();
        DiscoveryStatus {
            running: runs.active.is_some(),
            progress: *self.progress.borrow(),
            last_error: runs.last_error.clone(),
        }
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<f64> {
        self.progress.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<DiscoveryReport>> {
        self.latest.load_full()
    }

    fn desired_topology(&self, desired: &DesiredLevels) -> Result<Topology, ServiceError> {
        let report = self.latest().ok_or(ServiceError::NoTopology)?;
        let mut topology = report.topology.clone();
        topology.apply_desired(desired);
        Ok(topology)
    }

    pub fn plan(&self, desired: &DesiredLevels) -> Result<Vec<Directive>, ServiceError> {
        let topology = self.desired_topology(desired)?;
        Ok(reconciler::plan(&topology))
    }

    /// Applies the plan for `desired` against the latest topology. The
    /// published report is not touched; run discovery again to see the result.
    pub async fn apply(&self, desired: &DesiredLevels) -> Result<Vec<DirectiveOutcome>, ServiceError> {
        let topology = self.desired_topology(desired)?;
        let directives = reconciler::plan(&topology);
        tracing::info!(directives = directives.len(), "Applying reconciliation plan");
        Ok(Reconciler::new(self.store.clone()).apply(&topology, &directives).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregation_level::{AggregationLevel, AggregationUnit};
    use crate::domain::series::SeriesKind;
    use crate::infrastructure::memory_store::InMemoryStore;
    use std::collections::{BTreeMap, HashMap};

    fn service() -> (Arc<InMemoryStore>, AggregationService) {
        let store = Arc::new(InMemoryStore::new());
        let thing = store.add_thing("Weather station", None);
        store.add_series(SeriesKind::Datastream, "Temp", &thing);
        store.add_series(SeriesKind::MultiDatastream, "Temp[1 hour]", &thing);
        let service = AggregationService::new(store.clone(), DiscoveryOptions::default());
        (store, service)
    }

    fn want_daily() -> DesiredLevels {
        let day = AggregationLevel::new(AggregationUnit::Days, 1).unwrap();
        HashMap::from([("Temp".to_string(), BTreeMap::from([(day, true)]))])
    }

    #[tokio::test]
    async fn test_discovery_publishes_report() {
        let (_, service) = service();
        assert!(service.latest().is_none());
        assert_eq!(service.plan(&want_daily()), Err(ServiceError::NoTopology));

        service.start_discovery().unwrap().await.unwrap();
        let report = service.latest().unwrap();
        assert_eq!(report.topology.edge_count(), 1);

        let status = service.status();
        assert!(!status.running);
        assert_eq!(status.progress, 1.0);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (_, service) = service();
        let handle = service.start_discovery().unwrap();
        assert_eq!(service.start_discovery().err(), Some(ServiceError::AlreadyRunning));
        handle.await.unwrap();
        assert!(service.start_discovery().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_keeps_previous_report() {
        let (_, service) = service();
        service.start_discovery().unwrap().await.unwrap();
        let first = service.latest().unwrap();

        let handle = service.start_discovery().unwrap();
        assert!(service.cancel());
        handle.await.unwrap();

        assert!(Arc::ptr_eq(&first, &service.latest().unwrap()));
        assert_eq!(service.status().last_error.as_deref(), Some("discovery cancelled"));
        assert!(!service.cancel());
    }

    #[tokio::test]
    async fn test_plan_and_apply() {
        let (store, service) = service();
        service.start_discovery().unwrap().await.unwrap();

        let plan = service.plan(&want_daily()).unwrap();
        assert_eq!(plan.len(), 1);
        let outcomes = service.apply(&want_daily()).await.unwrap();
        assert!(outcomes.iter().all(DirectiveOutcome::succeeded));
        assert!(store.series_named(SeriesKind::MultiDatastream, "Temp[1 day]").is_some());

        service.start_discovery().unwrap().await.unwrap();
        assert!(service.plan(&want_daily()).unwrap().is_empty());
    }
}
