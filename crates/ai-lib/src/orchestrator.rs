//! Prediction orchestration: build a new model or reuse the latest one

use crate::artifact::{ArtifactProbe, FsArtifactProbe};
use crate::error::{PredictError, StoreError, WorkerError};
use crate::metrics::Quantiles;
use crate::model::{
    artifact_path, next_version, BuildOutputs, Clock, Model, ModelRepository, SystemClock,
};
use crate::observability::{PredictionPath, ServiceMetrics, StructuredLogger};
use crate::status::{classify, PredictionStatus};
use crate::worker::{BuildRequest, ModelWorker, PredictRequest, WorkerMode, WorkerResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Result of a prediction request
///
/// `predictions` and `quantiles` are forwarded verbatim and serialize as
/// `null` when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predictions: Option<Box<RawValue>>,
    pub quantiles: Option<Quantiles>,
    pub confidence: f32,
    pub status: PredictionStatus,
}

impl PredictionResponse {
    fn without_predictions(confidence: f32, status: PredictionStatus) -> Self {
        Self {
            predictions: None,
            quantiles: None,
            confidence,
            status,
        }
    }
}

/// Decides between building and reusing a model for each request
///
/// Builds for the same repository run one at a time; a request that waited
/// on another build reuses its model when that model is usable.
pub struct PredictionService {
    models: Arc<dyn ModelRepository>,
    worker: Arc<dyn ModelWorker>,
    probe: Arc<dyn ArtifactProbe>,
    clock: Arc<dyn Clock>,
    models_root: PathBuf,
    metrics: ServiceMetrics,
    logger: StructuredLogger,
    /// Serializes builds per repository
    build_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PredictionService {
    pub fn new(
        models: Arc<dyn ModelRepository>,
        worker: Arc<dyn ModelWorker>,
        models_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            models,
            worker,
            probe: Arc::new(FsArtifactProbe),
            clock: Arc::new(SystemClock),
            models_root: models_root.into(),
            metrics: ServiceMetrics::new(),
            logger: StructuredLogger::new("ai"),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ArtifactProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn models(&self) -> &Arc<dyn ModelRepository> {
        &self.models
    }

    /// Score the commits of `oldest_job..=current_job` for a repository.
    ///
    /// Builds a new model when the repository has none or the latest one is
    /// expired or missing its artifact; otherwise reuses the latest model.
    pub async fn predict(
        &self,
        repo_id: &str,
        oldest_job: &str,
        current_job: &str,
    ) -> Result<PredictionResponse, PredictError> {
        let outcome = self.serve(repo_id, oldest_job, current_job).await;
        match &outcome {
            Ok(response) => self.metrics.inc_prediction(response.status),
            Err(e) => self.metrics.inc_prediction_error(e.kind()),
        }
        outcome
    }

    async fn serve(
        &self,
        repo_id: &str,
        oldest_job: &str,
        current_job: &str,
    ) -> Result<PredictionResponse, PredictError> {
        if let (Some(model), true) = self.latest_model(repo_id).await? {
            return self.reuse(model, oldest_job, current_job).await;
        }

        let lock = self.build_lock(repo_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.build_unless_usable(repo_id, oldest_job, current_job)
                .await
        };
        self.release_build_lock(repo_id, lock);
        outcome
    }

    /// Runs under the repository's build lock
    async fn build_unless_usable(
        &self,
        repo_id: &str,
        oldest_job: &str,
        current_job: &str,
    ) -> Result<PredictionResponse, PredictError> {
        // A concurrent request may have built a model while this one waited
        let latest = match self.latest_model(repo_id).await? {
            (Some(model), true) => return self.reuse(model, oldest_job, current_job).await,
            (latest, _) => latest,
        };

        if let Some(stale) = &latest {
            debug!(
                repo_id = %repo_id,
                version = stale.version,
                expired = stale.expired,
                "Latest model is not usable, rebuilding"
            );
        }
        self.build(repo_id, next_version(latest.as_ref()), current_job)
            .await
    }

    /// Latest model of the repository and whether it can be reused
    async fn latest_model(&self, repo_id: &str) -> Result<(Option<Model>, bool), PredictError> {
        let latest = match self.models.find_latest(repo_id).await {
            Ok(model) => model,
            Err(StoreError::NotFound) => return Ok((None, false)),
            Err(e) => return Err(e.into()),
        };
        let reusable = latest.is_valid(self.probe.as_ref()).await;
        Ok((Some(latest), reusable))
    }

    fn build_lock(&self, repo_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.build_locks.lock();
        Arc::clone(locks.entry(repo_id.to_string()).or_default())
    }

    /// Drops the repository's entry once no other request holds its lock
    fn release_build_lock(&self, repo_id: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.build_locks.lock();
        // One reference in the map plus `lock`
        if Arc::strong_count(&lock) == 2 {
            locks.remove(repo_id);
        }
    }

    async fn build(
        &self,
        repo_id: &str,
        version: u32,
        current_job: &str,
    ) -> Result<PredictionResponse, PredictError> {
        self.metrics.inc_path(PredictionPath::Build);
        let path = artifact_path(&self.models_root, repo_id, version);

        let start = Instant::now();
        let result = self
            .worker
            .build(BuildRequest {
                repo_id,
                model_path: &path,
                last_job_id: current_job,
            })
            .await;
        let result = self.observe_worker(WorkerMode::Build, repo_id, start, result)?;

        let status = classify(&result);
        if !result.is_built {
            self.logger.log_build_skipped(repo_id, version, status);
            return Ok(PredictionResponse::without_predictions(0.0, status));
        }

        let WorkerResult {
            prediction,
            model_report,
            data_points,
            medians,
            quantiles,
            ..
        } = result;

        let mut model = Model::new(
            repo_id,
            version,
            path,
            status,
            BuildOutputs {
                report: model_report,
                data_points,
                medians,
                quantiles,
            },
            self.clock.now(),
        );

        model.id = match self.models.insert(&model).await {
            Ok(id) => id,
            Err(e) => {
                self.metrics.inc_insert_failure();
                self.logger
                    .log_orphaned_artifact(repo_id, version, &model.path, &e.to_string());
                return Err(e.into());
            }
        };

        let confidence = model.confidence();
        self.logger.log_model_built(
            repo_id,
            version,
            model.id.get(),
            model.status,
            confidence,
            start.elapsed().as_millis() as u64,
        );

        Ok(PredictionResponse {
            predictions: prediction,
            quantiles: model.quantiles,
            confidence,
            status: model.status,
        })
    }

    async fn reuse(
        &self,
        model: Model,
        oldest_job: &str,
        current_job: &str,
    ) -> Result<PredictionResponse, PredictError> {
        self.metrics.inc_path(PredictionPath::Reuse);

        let medians = match &model.medians {
            Some(medians) => medians.all,
            None => {
                warn!(
                    repo_id = %model.repo_id,
                    model_id = model.id.get(),
                    "Stored model has no medians, using defaults"
                );
                Default::default()
            }
        };
        let medians_score = match &model.report {
            Some(report) => report.median_score,
            None => {
                warn!(
                    repo_id = %model.repo_id,
                    model_id = model.id.get(),
                    "Stored model has no report, using a zero medians score"
                );
                0.0
            }
        };

        let start = Instant::now();
        let result = self
            .worker
            .predict(PredictRequest {
                repo_id: &model.repo_id,
                model_path: &model.path,
                medians: &medians,
                medians_score,
                start_job_id: oldest_job,
                last_job_id: current_job,
            })
            .await;
        let result = self.observe_worker(WorkerMode::Predict, &model.repo_id, start, result)?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.logger.log_model_reused(
            &model.repo_id,
            model.version,
            model.id.get(),
            result.is_predicted,
            elapsed_ms,
        );

        if !result.is_predicted {
            return Ok(PredictionResponse::without_predictions(
                model.confidence(),
                model.status,
            ));
        }

        if let Err(e) = self.models.log_usage(model.id).await {
            self.metrics.inc_usage_stamp_failure();
            self.logger
                .log_usage_stamp_failed(&model.repo_id, model.id.get(), &e.to_string());
        }

        let confidence = model.confidence();
        Ok(PredictionResponse {
            predictions: result.prediction,
            quantiles: model.quantiles,
            confidence,
            status: model.status,
        })
    }

    fn observe_worker(
        &self,
        mode: WorkerMode,
        repo_id: &str,
        start: Instant,
        result: Result<WorkerResult, WorkerError>,
    ) -> Result<WorkerResult, PredictError> {
        self.metrics
            .observe_worker_latency(mode, start.elapsed().as_secs_f64());

        result.map_err(|e| {
            self.metrics.inc_worker_failure(mode);
            self.logger.log_worker_failed(repo_id, mode, &e.to_string());
            PredictError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::metrics::{ChangeMeasures, ModelMedians};
    use crate::model::{InMemoryModelStore, ModelId, ModelStream};
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Build {
            repo_id: String,
            model_path: PathBuf,
            last_job_id: String,
        },
        Predict {
            repo_id: String,
            model_path: PathBuf,
            medians: ChangeMeasures,
            medians_score: f32,
            start_job_id: String,
            last_job_id: String,
        },
    }

    /// Worker replaying scripted outcomes
    #[derive(Default)]
    struct FakeWorker {
        outcomes: Mutex<VecDeque<Result<WorkerResult, WorkerError>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeWorker {
        fn returning(outcome: Result<WorkerResult, WorkerError>) -> Arc<Self> {
            let worker = Self::default();
            worker.outcomes.lock().unwrap().push_back(outcome);
            Arc::new(worker)
        }

        fn replying(stdout: &str) -> Arc<Self> {
            Self::returning(Ok(serde_json::from_str(stdout).unwrap()))
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn next(&self) -> Result<WorkerResult, WorkerError> {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected worker call")
        }
    }

    #[async_trait]
    impl ModelWorker for FakeWorker {
        async fn build(&self, request: BuildRequest<'_>) -> Result<WorkerResult, WorkerError> {
            self.calls.lock().unwrap().push(Call::Build {
                repo_id: request.repo_id.to_string(),
                model_path: request.model_path.to_path_buf(),
                last_job_id: request.last_job_id.to_string(),
            });
            self.next()
        }

        async fn predict(&self, request: PredictRequest<'_>) -> Result<WorkerResult, WorkerError> {
            self.calls.lock().unwrap().push(Call::Predict {
                repo_id: request.repo_id.to_string(),
                model_path: request.model_path.to_path_buf(),
                medians: *request.medians,
                medians_score: request.medians_score,
                start_job_id: request.start_job_id.to_string(),
                last_job_id: request.last_job_id.to_string(),
            });
            self.next()
        }
    }

    /// Probe reporting only the listed paths as present
    #[derive(Default)]
    struct FakeProbe(HashSet<PathBuf>);

    impl FakeProbe {
        fn with(paths: &[&str]) -> Arc<Self> {
            Arc::new(Self(paths.iter().map(PathBuf::from).collect()))
        }
    }

    #[async_trait]
    impl ArtifactProbe for FakeProbe {
        async fn exists(&self, path: &Path) -> bool {
            self.0.contains(path)
        }
    }

    /// Store whose writes can be made to fail
    struct FlakyStore {
        inner: InMemoryModelStore,
        fail_insert: bool,
        fail_usage: bool,
        fail_find: bool,
    }

    impl FlakyStore {
        fn new(inner: InMemoryModelStore) -> Self {
            Self {
                inner,
                fail_insert: false,
                fail_usage: false,
                fail_find: false,
            }
        }
    }

    #[async_trait]
    impl ModelRepository for FlakyStore {
        async fn insert(&self, model: &Model) -> Result<ModelId, StoreError> {
            if self.fail_insert {
                return Err(StoreError::Task("write rejected".to_string()));
            }
            self.inner.insert(model).await
        }

        async fn find_latest(&self, repo_id: &str) -> Result<Model, StoreError> {
            if self.fail_find {
                return Err(StoreError::Task("database unreachable".to_string()));
            }
            self.inner.find_latest(repo_id).await
        }

        async fn find_by_repo(&self, repo_id: &str, limit: usize) -> Result<ModelStream, StoreError> {
            self.inner.find_by_repo(repo_id, limit).await
        }

        async fn log_usage(&self, id: ModelId) -> Result<(), StoreError> {
            if self.fail_usage {
                return Err(StoreError::Task("stamp failed".to_string()));
            }
            self.inner.log_usage(id).await
        }

        async fn set_expired(&self, id: ModelId, expired: bool) -> Result<(), StoreError> {
            self.inner.set_expired(id, expired).await
        }
    }

    const QUANTILES: &str = r#"{"commit": {"la": {"0.25": 3, "0.5": 9}}, "developer": {}, "file": {}}"#;

    const HEALTHY_BUILD: &str = r#"{
        "is_built": true,
        "is_predicted": true,
        "data_points": {"train": {"True": 80, "False": 100}},
        "model_report": {"weighted_avg": {"f1-score": 0.73}, "medians_score": 0.41},
        "medians": {"all": {"la": 10}},
        "quantiles": {"commit": {"la": {"0.25": 3, "0.5": 9}}, "developer": {}, "file": {}},
        "prediction": [{"commit_id": "c1", "score": 0.91}]
    }"#;

    fn service(
        store: Arc<dyn ModelRepository>,
        worker: Arc<FakeWorker>,
        probe: Arc<FakeProbe>,
    ) -> PredictionService {
        PredictionService::new(store, worker, "/models").with_probe(probe)
    }

    async fn seed(store: &InMemoryModelStore, version: u32) -> Model {
        let mut model = Model::new(
            "R1",
            version,
            format!("/models/R1/{version}"),
            PredictionStatus::PredictOk,
            BuildOutputs {
                report: serde_json::from_str(
                    r#"{"weighted_avg": {"f1-score": 0.73}, "medians_score": 0.41}"#,
                )
                .unwrap(),
                medians: Some(ModelMedians {
                    all: ChangeMeasures {
                        la: 10.0,
                        nf: 2.0,
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                quantiles: Some(Quantiles::from_json(QUANTILES).unwrap()),
                ..Default::default()
            },
            chrono::Utc::now() - chrono::Duration::days(1),
        );
        model.id = store.insert(&model).await.unwrap();
        model
    }

    #[tokio::test]
    async fn test_cold_start_builds_first_version() {
        let store = InMemoryModelStore::new();
        let worker = FakeWorker::replying(HEALTHY_BUILD);
        let svc = service(Arc::new(store.clone()), worker.clone(), FakeProbe::with(&[]));

        let response = svc.predict("R1", "j1", "j2").await.unwrap();

        assert_eq!(response.status, PredictionStatus::PredictOk);
        assert_eq!(response.confidence, 0.73);
        assert_eq!(
            response.predictions.unwrap().get(),
            r#"[{"commit_id": "c1", "score": 0.91}]"#
        );
        assert_eq!(response.quantiles.unwrap().as_str(), QUANTILES);

        let stored = store.find_latest("R1").await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, PredictionStatus::PredictOk);
        assert_eq!(stored.path, PathBuf::from("/models/R1/1"));
        assert!(!stored.expired);
        assert_eq!(stored.created_at, stored.last_use);

        assert_eq!(
            worker.calls(),
            vec![Call::Build {
                repo_id: "R1".to_string(),
                model_path: PathBuf::from("/models/R1/1"),
                last_job_id: "j2".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_reuse_returns_stored_quantiles_and_stamps_usage() {
        let store = InMemoryModelStore::new();
        let seeded = seed(&store, 3).await;
        let worker = FakeWorker::replying(r#"{"is_predicted": true, "prediction": [1,2,3]}"#);
        let svc = service(
            Arc::new(store.clone()),
            worker.clone(),
            FakeProbe::with(&["/models/R1/3"]),
        );

        let response = svc.predict("R1", "j1", "j9").await.unwrap();

        assert_eq!(response.status, PredictionStatus::PredictOk);
        assert_eq!(response.confidence, 0.73);
        assert_eq!(response.predictions.unwrap().get(), "[1,2,3]");
        assert_eq!(response.quantiles, seeded.quantiles);

        let stored = store.get(seeded.id).await.unwrap();
        assert!(stored.last_use > seeded.last_use);
        assert_eq!(store.all().await.len(), 1);

        match &worker.calls()[..] {
            [Call::Predict {
                repo_id,
                model_path,
                medians,
                medians_score,
                start_job_id,
                last_job_id,
            }] => {
                assert_eq!(repo_id, "R1");
                assert_eq!(model_path, &PathBuf::from("/models/R1/3"));
                assert_eq!(medians.la, 10.0);
                assert_eq!(*medians_score, 0.41);
                assert_eq!(start_job_id, "j1");
                assert_eq!(last_job_id, "j9");
            }
            calls => panic!("unexpected calls: {calls:?}"),
        }
    }

    #[tokio::test]
    async fn test_reuse_ignores_worker_quantiles() {
        let store = InMemoryModelStore::new();
        seed(&store, 1).await;
        let worker = FakeWorker::replying(
            r#"{"is_predicted": true, "prediction": [], "quantiles": {"commit": {}}}"#,
        );
        let svc = service(Arc::new(store), worker, FakeProbe::with(&["/models/R1/1"]));

        let response = svc.predict("R1", "j1", "j1").await.unwrap();
        assert_eq!(response.quantiles.unwrap().as_str(), QUANTILES);
    }

    #[tokio::test]
    async fn test_reuse_without_prediction_reports_stored_state() {
        let store = InMemoryModelStore::new();
        let seeded = seed(&store, 2).await;
        let worker = FakeWorker::replying(r#"{"is_predicted": false}"#);
        let svc = service(
            Arc::new(store.clone()),
            worker,
            FakeProbe::with(&["/models/R1/2"]),
        );

        let response = svc.predict("R1", "j1", "j2").await.unwrap();

        assert_eq!(response.status, PredictionStatus::PredictOk);
        assert_eq!(response.confidence, 0.73);
        assert!(response.predictions.is_none());
        assert!(response.quantiles.is_none());
        assert_eq!(store.get(seeded.id).await.unwrap().last_use, seeded.last_use);
    }

    #[tokio::test]
    async fn test_low_training_data_inserts_nothing() {
        let store = InMemoryModelStore::new();
        let worker = FakeWorker::replying(
            r#"{"is_built": false, "is_predicted": false, "data_points": {"train": {"True": 5, "False": 5}}}"#,
        );
        let svc = service(Arc::new(store.clone()), worker, FakeProbe::with(&[]));

        let response = svc.predict("R1", "j1", "j1").await.unwrap();

        assert_eq!(response.status, PredictionStatus::PredictLowTrainingData);
        assert_eq!(response.confidence, 0.0);
        assert!(response.predictions.is_none());
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_worker_crash_surfaces_stderr() {
        let store = InMemoryModelStore::new();
        let worker = FakeWorker::returning(Err(WorkerError::Exited {
            status: "exit status: 1".to_string(),
            stderr: "oom".to_string(),
        }));
        let svc = service(Arc::new(store.clone()), worker, FakeProbe::with(&[]));

        let err = svc.predict("R1", "j1", "j1").await.unwrap_err();

        assert_eq!(err.kind(), "worker");
        assert!(err.to_string().contains("oom"));
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_worker_crash_on_reuse_leaves_usage_untouched() {
        let store = InMemoryModelStore::new();
        let seeded = seed(&store, 1).await;
        let worker = FakeWorker::returning(Err(WorkerError::Exited {
            status: "exit status: 1".to_string(),
            stderr: "oom".to_string(),
        }));
        let svc = service(
            Arc::new(store.clone()),
            worker,
            FakeProbe::with(&["/models/R1/1"]),
        );

        assert!(svc.predict("R1", "j1", "j1").await.is_err());
        assert_eq!(store.get(seeded.id).await.unwrap().last_use, seeded.last_use);
    }

    #[tokio::test]
    async fn test_missing_artifact_rebuilds_next_version() {
        let store = InMemoryModelStore::new();
        let seeded = seed(&store, 4).await;
        let worker = FakeWorker::replying(HEALTHY_BUILD);
        let svc = service(Arc::new(store.clone()), worker.clone(), FakeProbe::with(&[]));

        svc.predict("R1", "j1", "j7").await.unwrap();

        assert!(matches!(
            &worker.calls()[..],
            [Call::Build { model_path, .. }] if model_path == Path::new("/models/R1/5")
        ));
        let latest = store.find_latest("R1").await.unwrap();
        assert_eq!(latest.version, 5);
        assert!(latest.id > seeded.id);
    }

    #[tokio::test]
    async fn test_expired_model_rebuilds() {
        let store = InMemoryModelStore::new();
        let seeded = seed(&store, 1).await;
        store.set_expired(seeded.id, true).await.unwrap();
        let worker = FakeWorker::replying(HEALTHY_BUILD);
        let svc = service(
            Arc::new(store.clone()),
            worker.clone(),
            FakeProbe::with(&["/models/R1/1"]),
        );

        svc.predict("R1", "j1", "j2").await.unwrap();

        assert!(matches!(&worker.calls()[..], [Call::Build { .. }]));
        assert_eq!(store.find_latest("R1").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_unbalanced_classes_inserts_nothing() {
        let store = InMemoryModelStore::new();
        let worker =
            FakeWorker::replying(r#"{"is_built": false, "data_points": {"train": {"True": 2, "False": 200}}}"#);
        let svc = service(Arc::new(store.clone()), worker, FakeProbe::with(&[]));

        let response = svc.predict("R1", "j1", "j1").await.unwrap();

        assert_eq!(response.status, PredictionStatus::PredictClassUnbalanced);
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_usage_stamp_failure_is_not_observable() {
        let memory = InMemoryModelStore::new();
        seed(&memory, 1).await;
        let mut store = FlakyStore::new(memory);
        store.fail_usage = true;
        let worker = FakeWorker::replying(r#"{"is_predicted": true, "prediction": [0]}"#);
        let svc = service(Arc::new(store), worker, FakeProbe::with(&["/models/R1/1"]));

        let response = svc.predict("R1", "j1", "j1").await.unwrap();
        assert_eq!(response.predictions.unwrap().get(), "[0]");
    }

    #[tokio::test]
    async fn test_insert_failure_is_storage_error() {
        let mut store = FlakyStore::new(InMemoryModelStore::new());
        store.fail_insert = true;
        let svc = service(
            Arc::new(store),
            FakeWorker::replying(HEALTHY_BUILD),
            FakeProbe::with(&[]),
        );

        let err = svc.predict("R1", "j1", "j1").await.unwrap_err();
        assert_eq!(err.kind(), "storage");
    }

    #[tokio::test]
    async fn test_lookup_failure_is_storage_error() {
        let mut store = FlakyStore::new(InMemoryModelStore::new());
        store.fail_find = true;
        let worker = Arc::new(FakeWorker::default());
        let svc = service(Arc::new(store), worker.clone(), FakeProbe::with(&[]));

        let err = svc.predict("R1", "j1", "j1").await.unwrap_err();
        assert_eq!(err.kind(), "storage");
        assert!(worker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_decode_auth_and_timeout_kinds() {
        let decode = serde_json::from_str::<WorkerResult>("nope").unwrap_err();
        let cases = [
            (WorkerError::Decode(decode), "decode"),
            (WorkerError::Auth(AuthError::MissingAccessInfo), "auth"),
            (WorkerError::Timeout(Duration::from_secs(1)), "cancelled"),
        ];

        for (error, kind) in cases {
            let store = InMemoryModelStore::new();
            let svc = service(
                Arc::new(store.clone()),
                FakeWorker::returning(Err(error)),
                FakeProbe::with(&[]),
            );
            let err = svc.predict("R1", "j1", "j1").await.unwrap_err();
            assert_eq!(err.kind(), kind);
            assert!(store.all().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_consecutive_builds_increment_version() {
        let store = InMemoryModelStore::new();
        let worker = Arc::new(FakeWorker::default());
        for _ in 0..2 {
            worker
                .outcomes
                .lock()
                .unwrap()
                .push_back(Ok(serde_json::from_str(HEALTHY_BUILD).unwrap()));
        }
        // No artifact is ever present, so every request builds
        let svc = service(Arc::new(store.clone()), worker, FakeProbe::with(&[]));

        svc.predict("R1", "j1", "j1").await.unwrap();
        svc.predict("R1", "j1", "j2").await.unwrap();

        let versions: Vec<u32> = store.all().await.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    /// Delays builds so concurrent requests overlap
    struct SlowBuilds(Arc<FakeWorker>);

    #[async_trait]
    impl ModelWorker for SlowBuilds {
        async fn build(&self, request: BuildRequest<'_>) -> Result<WorkerResult, WorkerError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.build(request).await
        }

        async fn predict(&self, request: PredictRequest<'_>) -> Result<WorkerResult, WorkerError> {
            self.0.predict(request).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_build_once() {
        let store = InMemoryModelStore::new();
        let worker = Arc::new(FakeWorker::default());
        {
            let mut outcomes = worker.outcomes.lock().unwrap();
            outcomes.push_back(Ok(serde_json::from_str(HEALTHY_BUILD).unwrap()));
            outcomes.push_back(Ok(
                serde_json::from_str(r#"{"is_predicted": true, "prediction": [7]}"#).unwrap()
            ));
        }
        let svc = PredictionService::new(
            Arc::new(store.clone()),
            Arc::new(SlowBuilds(worker.clone())),
            "/models",
        )
        .with_probe(FakeProbe::with(&["/models/R1/1"]));

        let (first, second) = tokio::join!(
            svc.predict("R1", "j1", "j1"),
            svc.predict("R1", "j1", "j2")
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(store.all().await.len(), 1);
        assert!(matches!(
            &worker.calls()[..],
            [Call::Build { .. }, Call::Predict { .. }]
        ));
        assert!(svc.build_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_build_lock_released_after_failed_build() {
        let store = InMemoryModelStore::new();
        let worker = Arc::new(FakeWorker::default());
        worker
            .outcomes
            .lock()
            .unwrap()
            .push_back(Err(WorkerError::Timeout(Duration::from_secs(1))));
        let svc = PredictionService::new(Arc::new(store), worker, "/models")
            .with_probe(FakeProbe::with(&[]));

        assert!(svc.predict("R1", "j1", "j1").await.is_err());
        assert!(svc.build_locks.lock().is_empty());
    }

    #[test]
    fn test_response_serializes_nulls() {
        let response =
            PredictionResponse::without_predictions(0.0, PredictionStatus::PredictFailTraining);
        let json = serde_json::to_value(&response).unwrap();

        assert!(json["predictions"].is_null());
        assert!(json["quantiles"].is_null());
        assert_eq!(json["status"], "predict_fail_training");
    }
}
