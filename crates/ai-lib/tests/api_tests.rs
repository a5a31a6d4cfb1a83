//! Integration tests for the HTTP adapter

use ai_lib::{
    api::{create_router, AppState, ErrorMessage},
    artifact::ArtifactProbe,
    auth::{AccessClaims, AccessInfo, AuthCheck, LocalKeySource, Role, ACCOUNTS_ISSUER},
    error::WorkerError,
    health::{components, HealthRegistry},
    metrics::Quantiles,
    model::{BuildOutputs, InMemoryModelStore, Model, ModelRepository},
    observability::ServiceMetrics,
    orchestrator::PredictionService,
    status::PredictionStatus,
    worker::{BuildRequest, ModelWorker, PredictRequest, WorkerResult},
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const PRIVATE_PEM: &str = include_str!("fixtures/ec_private.pem");
const PUBLIC_PEM: &str = include_str!("fixtures/ec_public.pem");

const BODY_LIMIT: usize = 1 << 20;

/// Worker that always returns the same outcome and records job ranges
struct StubWorker {
    stdout: Option<String>,
    stderr: Option<String>,
    job_ranges: Mutex<Vec<(String, String)>>,
}

impl StubWorker {
    fn replying(stdout: &str) -> Arc<Self> {
        Arc::new(Self {
            stdout: Some(stdout.to_string()),
            stderr: None,
            job_ranges: Mutex::new(Vec::new()),
        })
    }

    fn crashing(stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            stdout: None,
            stderr: Some(stderr.to_string()),
            job_ranges: Mutex::new(Vec::new()),
        })
    }

    fn outcome(&self) -> Result<WorkerResult, WorkerError> {
        match (&self.stdout, &self.stderr) {
            (Some(stdout), _) => serde_json::from_str(stdout).map_err(WorkerError::Decode),
            (None, stderr) => Err(WorkerError::Exited {
                status: "exit status: 1".to_string(),
                stderr: stderr.clone().unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl ModelWorker for StubWorker {
    async fn build(&self, request: BuildRequest<'_>) -> Result<WorkerResult, WorkerError> {
        self.job_ranges
            .lock()
            .unwrap()
            .push((request.last_job_id.to_string(), request.last_job_id.to_string()));
        self.outcome()
    }

    async fn predict(&self, request: PredictRequest<'_>) -> Result<WorkerResult, WorkerError> {
        self.job_ranges.lock().unwrap().push((
            request.start_job_id.to_string(),
            request.last_job_id.to_string(),
        ));
        self.outcome()
    }
}

/// Every artifact exists
struct PresentProbe;

#[async_trait]
impl ArtifactProbe for PresentProbe {
    async fn exists(&self, _path: &Path) -> bool {
        true
    }
}

const HEALTHY_BUILD: &str = r#"{
    "is_built": true,
    "is_predicted": true,
    "data_points": {"train": {"True": 80, "False": 100}},
    "model_report": {"weighted_avg": {"f1-score": 0.73}},
    "prediction": [{"commit_id": "c1", "score": 0.9}]
}"#;

fn token(issuer: &str, access: &AccessInfo) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = AccessClaims::new(issuer, now, now + 300, access);
    let key = EncodingKey::from_ec_pem(PRIVATE_PEM.as_bytes()).unwrap();
    encode(&Header::new(Algorithm::ES256), &claims, &key).unwrap()
}

fn service_token() -> String {
    token("ingest", &AccessInfo::service("ingest"))
}

fn admin_token() -> String {
    token(
        ACCOUNTS_ISSUER,
        &AccessInfo {
            role: Role::SiteAdmin,
            service_id: None,
            user_id: Some("admin-1".to_string()),
        },
    )
}

async fn setup_test_app(
    store: InMemoryModelStore,
    worker: Arc<StubWorker>,
) -> (Router, HealthRegistry) {
    let keys = LocalKeySource::new()
        .add_ec_pem("ingest", PUBLIC_PEM.as_bytes())
        .unwrap()
        .add_ec_pem(ACCOUNTS_ISSUER, PUBLIC_PEM.as_bytes())
        .unwrap();

    let store: Arc<dyn ModelRepository> = Arc::new(store);
    let predictions = PredictionService::new(store, worker, "/models")
        .with_probe(Arc::new(PresentProbe));

    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL_STORE).await;
    health_registry.register(components::WORKER).await;

    let state = Arc::new(AppState::new(
        Arc::new(predictions),
        AuthCheck::new(Arc::new(keys)),
        health_registry.clone(),
        ServiceMetrics::new(),
    ));

    (create_router(state), health_registry)
}

fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .unwrap()
        .to_vec()
}

async fn seed(store: &InMemoryModelStore, version: u32) -> Model {
    let mut model = Model::new(
        "R1",
        version,
        format!("/models/R1/{version}"),
        PredictionStatus::PredictOk,
        BuildOutputs {
            report: serde_json::from_str(r#"{"weighted_avg": {"f1-score": 0.73}}"#).unwrap(),
            quantiles: Some(Quantiles::from_json(r#"{"commit":{}}"#).unwrap()),
            ..Default::default()
        },
        chrono::Utc::now() + chrono::Duration::seconds(version as i64),
    );
    model.id = store.insert(&model).await.unwrap();
    model
}

#[tokio::test]
async fn test_healthz_endpoint() {
    let (app, _) = setup_test_app(InMemoryModelStore::new(), StubWorker::replying("{}")).await;

    let response = app.oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["status"], "healthy");
    assert!(json["components"][components::MODEL_STORE].is_object());
}

#[tokio::test]
async fn test_readyz_follows_registry() {
    let (app, registry) =
        setup_test_app(InMemoryModelStore::new(), StubWorker::replying("{}")).await;

    let response = app.clone().oneshot(get("/readyz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    registry.set_ready(true).await;
    let response = app.oneshot(get("/readyz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup_test_app(InMemoryModelStore::new(), StubWorker::replying(HEALTHY_BUILD)).await;

    let uri = "/ai/repositories/R1/jobs/j1/prediction";
    app.clone()
        .oneshot(get(uri, Some(&service_token())))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("ai_predictions_total"));
}

#[tokio::test]
async fn test_prediction_requires_token() {
    let (app, _) = setup_test_app(InMemoryModelStore::new(), StubWorker::replying(HEALTHY_BUILD)).await;

    let response = app
        .oneshot(get("/ai/repositories/R1/jobs/j1/prediction", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_prediction_rejects_tampered_token() {
    let (app, _) = setup_test_app(InMemoryModelStore::new(), StubWorker::replying(HEALTHY_BUILD)).await;

    // Flip one character inside the signature
    let mut forged = service_token().into_bytes();
    let at = forged.len() - 10;
    forged[at] = if forged[at] == b'A' { b'B' } else { b'A' };
    let forged = String::from_utf8(forged).unwrap();

    let response = app
        .oneshot(get("/ai/repositories/R1/jobs/j1/prediction", Some(&forged)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_prediction_requires_service_role() {
    let (app, _) = setup_test_app(InMemoryModelStore::new(), StubWorker::replying(HEALTHY_BUILD)).await;

    let response = app
        .oneshot(get(
            "/ai/repositories/R1/jobs/j1/prediction",
            Some(&admin_token()),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_prediction_builds_model() {
    let store = InMemoryModelStore::new();
    let (app, _) = setup_test_app(store.clone(), StubWorker::replying(HEALTHY_BUILD)).await;

    let response = app
        .oneshot(get(
            "/ai/repositories/R1/jobs/j1/prediction",
            Some(&service_token()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["status"], "predict_ok");
    assert!((json["confidence"].as_f64().unwrap() - 0.73).abs() < 1e-6);
    assert_eq!(json["predictions"][0]["commit_id"], "c1");
    assert!(json["quantiles"].is_null());

    assert_eq!(store.find_latest("R1").await.unwrap().version, 1);
}

#[tokio::test]
async fn test_prediction_oldest_job_defaults_to_job() {
    let store = InMemoryModelStore::new();
    seed(&store, 1).await;
    let worker = StubWorker::replying(r#"{"is_predicted": true, "prediction": []}"#);
    let (app, _) = setup_test_app(store, worker.clone()).await;

    for uri in [
        "/ai/repositories/R1/jobs/j5/prediction",
        "/ai/repositories/R1/jobs/j5/prediction?oldest_job=",
        "/ai/repositories/R1/jobs/j5/prediction?oldest_job=j2",
    ] {
        let response = app
            .clone()
            .oneshot(get(uri, Some(&service_token())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let ranges = worker.job_ranges.lock().unwrap().clone();
    assert_eq!(
        ranges,
        vec![
            ("j5".to_string(), "j5".to_string()),
            ("j5".to_string(), "j5".to_string()),
            ("j2".to_string(), "j5".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_worker_crash_is_internal_error() {
    let store = InMemoryModelStore::new();
    let (app, _) = setup_test_app(store.clone(), StubWorker::crashing("oom")).await;

    let response = app
        .oneshot(get(
            "/ai/repositories/R1/jobs/j1/prediction",
            Some(&service_token()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: ErrorMessage = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(body.message.contains("oom"));
    assert!(store.all().await.is_empty());
}

#[tokio::test]
async fn test_token_from_cookie() {
    let (app, _) = setup_test_app(InMemoryModelStore::new(), StubWorker::replying(HEALTHY_BUILD)).await;

    let request = Request::builder()
        .uri("/ai/repositories/R1/jobs/j1/prediction")
        .header(header::COOKIE, format!("jwt={}", service_token()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_models_listing_streams_ndjson() {
    let store = InMemoryModelStore::new();
    for version in 1..=3 {
        seed(&store, version).await;
    }
    let (app, _) = setup_test_app(store, StubWorker::replying("{}")).await;

    let response = app
        .oneshot(get("/ai/repositories/R1/models", Some(&admin_token())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-ndjson"
    );

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    let versions: Vec<u64> = body
        .lines()
        .map(|line| {
            let json: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(json.get("path").is_none());
            json["version"].as_u64().unwrap()
        })
        .collect();
    assert_eq!(versions, vec![3, 2, 1]);
}

#[tokio::test]
async fn test_models_listing_requires_admin() {
    let (app, _) = setup_test_app(InMemoryModelStore::new(), StubWorker::replying("{}")).await;

    let response = app
        .oneshot(get("/ai/repositories/R1/models", Some(&service_token())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_models_listing_empty_repository() {
    let (app, _) = setup_test_app(InMemoryModelStore::new(), StubWorker::replying("{}")).await;

    let response = app
        .oneshot(get("/ai/repositories/none/models", Some(&admin_token())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}
