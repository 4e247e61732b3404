//! End-to-end lifecycle over the real SQLite metadata store and filesystem
//! artifact store.
//!
//! Covers:
//! 1. register -> deploy -> serving version
//! 2. redeploy retires the previous version
//! 3. rollback restores the previously deployed version
//! 4. performance-drop trigger
//! 5. batch with one failing item
//! 6. optimization never hides a size regression
//! 7. feedback -> trigger cycle -> training -> deploy -> prediction
//! 8. concurrent deploy/rollback keep a single active version
//! 9. tampered artifacts fail deployment
//! 10. cleanup is idempotent

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use model_app::{run_trigger_cycle, AppConfig, Services};
use model_features::StaticExtractor;
use model_registry::NewVersion;
use model_serving::PredictionRequest;
use model_storage::{ArtifactBundle, BlobStore, FsBlobStore};
use model_types::{
    ArtifactKind, Clock, DeploymentStrategy, Feature, FeedbackRecord, JobStatus, LifecycleError,
    ManualClock, MetricRecord, ModelStatus, OptimizationLevel, TrainingJob, TriggerType, DAY_MS,
};

struct Node {
    services: Services,
    clock: Arc<ManualClock>,
    extractor: Arc<StaticExtractor>,
    tmp: TempDir,
}

fn node() -> Node {
    let tmp = TempDir::new().unwrap();
    let config = AppConfig {
        data_dir: tmp.path().to_path_buf(),
        ..AppConfig::default()
    };
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let extractor = Arc::new(StaticExtractor::new(clock.clone()));
    let services = Services::build_with(config, clock.clone(), extractor.clone()).unwrap();
    Node {
        services,
        clock,
        extractor,
        tmp,
    }
}

fn bundle(seed: &str) -> ArtifactBundle {
    let mut b = ArtifactBundle::new();
    b.insert(ArtifactKind::Model, format!("model-{seed}").into_bytes());
    b.insert(ArtifactKind::Preprocessor, format!("scaler-{seed}").into_bytes());
    b
}

async fn register(n: &Node, model_type: &str, version: &str, f1: f64) -> String {
    n.services
        .registry
        .register(NewVersion {
            model_type: model_type.into(),
            version: version.into(),
            artifacts: bundle(version),
            metrics: [("f1_score".to_string(), f1)].into_iter().collect(),
            ..Default::default()
        })
        .await
        .unwrap()
}

async fn deploy(n: &Node, model_id: &str) {
    assert!(n
        .services
        .registry
        .deploy(model_id, DeploymentStrategy::Immediate, None)
        .await
        .unwrap());
}

fn status_of(n: &Node, model_type: &str, version: &str) -> ModelStatus {
    n.services
        .registry
        .get_version(model_type, version)
        .unwrap()
        .status
}

/// Separable feedback for `category`: `signal` is high for positives.
fn seed_feedback(n: &Node, category: &str, count: usize) {
    for i in 0..count {
        let label = if i % 2 == 0 { 1.0 } else { 0.0 };
        let entity = format!("{category}-e{i}");
        let signal = if label > 0.5 { 0.8 } else { 0.2 } + (i % 5) as f64 * 0.02;
        n.extractor.insert(
            &entity,
            "article",
            vec![
                Feature::numerical("signal", signal),
                Feature::numerical("noise", (i % 7) as f64),
            ],
        );
        n.services
            .metadata
            .insert_feedback(&FeedbackRecord {
                feedback_id: format!("{category}-fb{i}"),
                category: category.into(),
                entity_id: entity,
                entity_type: "article".into(),
                label,
                processed: false,
                created_at_ms: 1_700_000_000_000,
            })
            .unwrap();
    }
}

/// Train and deploy `impact_classifier` from seeded feedback.
async fn trained_impact_classifier(n: &Node) -> TrainingJob {
    seed_feedback(n, "impact_assessment", 120);
    let handle = n
        .services
        .trainer
        .start_training_job("impact_classifier", TriggerType::Manual, None)
        .unwrap();
    let job = handle.wait().await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    job
}

#[tokio::test]
async fn register_deploy_then_serve() {
    let n = node();
    let id = register(&n, "risk_scorer", "v1", 0.90).await;
    deploy(&n, &id).await;
    assert_eq!(
        n.services
            .registry
            .get_serving_version("risk_scorer", false)
            .unwrap(),
        "v1"
    );
}

#[tokio::test]
async fn redeploy_retires_previous_version() {
    let n = node();
    let v1 = register(&n, "risk_scorer", "v1", 0.90).await;
    deploy(&n, &v1).await;
    let v2 = register(&n, "risk_scorer", "v2", 0.91).await;
    deploy(&n, &v2).await;

    let old = n.services.registry.get_version("risk_scorer", "v1").unwrap();
    assert_eq!(old.status, ModelStatus::Inactive);
    assert!(old.deprecated_at_ms.is_some());
    assert_eq!(status_of(&n, "risk_scorer", "v2"), ModelStatus::Active);
}

#[tokio::test]
async fn rollback_restores_previous_deployment() {
    let n = node();
    let v1 = register(&n, "risk_scorer", "v1", 0.90).await;
    deploy(&n, &v1).await;
    let v2 = register(&n, "risk_scorer", "v2", 0.91).await;
    deploy(&n, &v2).await;

    assert!(n
        .services
        .registry
        .rollback("risk_scorer", None, "v2 regressed")
        .await
        .unwrap());
    assert_eq!(status_of(&n, "risk_scorer", "v1"), ModelStatus::Active);
    assert_eq!(status_of(&n, "risk_scorer", "v2"), ModelStatus::Inactive);
}

#[tokio::test]
async fn low_metric_triggers_retraining() {
    let n = node();
    n.services
        .metadata
        .record_metric(&MetricRecord {
            model_type: "impact_classifier".into(),
            model_version: "v1".into(),
            metric_name: "f1_score".into(),
            value: 0.70,
            recorded_at_ms: n.clock.now_ms(),
        })
        .unwrap();

    let triggers = n.services.trainer.check_retraining_triggers().unwrap();
    assert!(triggers.contains(&("impact_classifier".to_string(), TriggerType::PerformanceDrop)));
}

#[tokio::test]
async fn batch_item_failure_is_isolated() {
    let n = node();
    let (_tx, rx) = tokio::sync::watch::channel(false);
    let _background = n.services.start(rx);

    let mut reqs: Vec<PredictionRequest> = (0..5)
        .map(|i| PredictionRequest::new("risk_scorer", &format!("e{i}"), "article"))
        .collect();
    reqs[2].prediction_type = "no_such_model".into();
    let bad_id = reqs[2].request_id.clone();

    let batch_id = n.services.batch.submit_batch(reqs, 1);
    let res = tokio::time::timeout(
        Duration::from_secs(10),
        n.services.batch.wait_for_batch(&batch_id),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(res.entries.len(), 5);
    assert_eq!(res.successes(), 4);
    let failed: Vec<_> = res.entries.iter().filter(|e| !e.is_ok()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].request_id, bad_id);
    // nothing deployed, so the successful items are heuristic answers
    assert!(res
        .entries
        .iter()
        .filter_map(|e| e.result.as_ref())
        .all(|r| r.fallback_used));
}

#[tokio::test]
async fn basic_optimization_never_hides_growth() {
    let n = node();
    let job = trained_impact_classifier(&n).await;
    let res = n
        .services
        .optimizer
        .optimize(&job.new_model_version, "impact_classifier", OptimizationLevel::Basic)
        .await
        .unwrap();

    assert_eq!(res.size_regression, res.compression_ratio < 1.0);
    assert!(!(res.compression_ratio < 1.0 && res.is_improvement()));
    assert!(res.metrics_before.samples >= 1000);
}

#[tokio::test]
async fn feedback_to_prediction() {
    let n = node();
    seed_feedback(&n, "impact_assessment", 120);

    let started = run_trigger_cycle(&n.services.trainer);
    assert!(!started.is_empty());
    let mut impact = None;
    for handle in started {
        let job = handle.wait().await.unwrap();
        if job.model_type == "impact_classifier" {
            impact = Some(job);
        } else {
            // no feedback for the other types
            assert_eq!(job.status, JobStatus::Failed);
            assert!(job
                .error_message
                .as_deref()
                .unwrap()
                .contains("insufficient training data"));
        }
    }
    let impact = impact.unwrap();
    assert_eq!(impact.status, JobStatus::Completed, "{:?}", impact.error_message);
    assert_eq!(impact.trigger_type, TriggerType::FeedbackThreshold);

    let model_id = impact.new_model_id.clone().unwrap();
    deploy(&n, &model_id).await;

    n.extractor.insert(
        "fresh",
        "article",
        vec![
            Feature::numerical("signal", 0.85),
            Feature::numerical("noise", 3.0),
        ],
    );
    let res = n
        .services
        .inference
        .predict(&PredictionRequest::new("impact_classifier", "fresh", "article"), true)
        .await;
    assert!(!res.fallback_used);
    assert_eq!(res.model_version, impact.new_model_version);
    assert!(res.value > 0.5, "{res:?}");

    let snap = n.services.inference.get_performance_metrics(Some("impact_classifier"));
    assert_eq!(snap.requests, 1);
    assert_eq!(snap.fallbacks, 0);
}

#[tokio::test]
async fn concurrent_slot_changes_keep_one_active() {
    let n = node();
    let mut ids = Vec::new();
    for v in ["v1", "v2", "v3"] {
        ids.push(register(&n, "risk_scorer", v, 0.9).await);
    }
    deploy(&n, &ids[0]).await;

    let mut tasks = Vec::new();
    for i in 0..12 {
        let registry = n.services.registry.clone();
        let id = ids[i % 3].clone();
        tasks.push(tokio::spawn(async move {
            if i % 4 == 3 {
                let _ = registry.rollback("risk_scorer", None, "stress").await;
            } else {
                let _ = registry
                    .deploy(&id, DeploymentStrategy::Immediate, None)
                    .await;
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    let active = n
        .services
        .registry
        .list_models(Some("risk_scorer"), Some(ModelStatus::Active))
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn tampered_artifact_blocks_deploy() {
    let n = node();
    let id = register(&n, "risk_scorer", "v1", 0.9).await;
    let mv = n.services.registry.get_version("risk_scorer", "v1").unwrap();

    let blobs = FsBlobStore::open(n.tmp.path()).unwrap();
    blobs
        .put(&mv.artifact_refs[&ArtifactKind::Model], b"tampered")
        .unwrap();

    let err = n
        .services
        .registry
        .deploy(&id, DeploymentStrategy::Immediate, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Integrity { .. }), "{err}");
    assert_eq!(status_of(&n, "risk_scorer", "v1"), ModelStatus::Inactive);
}

#[tokio::test]
async fn cleanup_runs_twice_without_error() {
    let n = node();
    let v1 = register(&n, "risk_scorer", "v1", 0.9).await;
    deploy(&n, &v1).await;
    let v2 = register(&n, "risk_scorer", "v2", 0.9).await;
    deploy(&n, &v2).await;
    register(&n, "risk_scorer", "v3", 0.9).await;

    n.clock.advance(Duration::from_millis(40 * DAY_MS as u64));
    let removed = n.services.registry.cleanup_old(30).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(n.services.registry.cleanup_old(30).await.unwrap(), 0);

    assert_eq!(status_of(&n, "risk_scorer", "v2"), ModelStatus::Active);
    assert!(n.services.registry.get_version("risk_scorer", "v1").is_err());
    let stats = n.services.registry.get_registry_statistics().unwrap();
    assert_eq!(stats.total_versions, 1);
}
