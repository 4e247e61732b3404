//! Relational records for model versions, training jobs, A/B tests,
//! feedback and recorded metrics.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use model_types::{
    ABTestConfig, FeedbackRecord, JobStatus, MetricRecord, ModelStatus, ModelVersion,
    TrainingJob, TriggerType,
};

use crate::schema::create_schema;
use crate::Result;

const VERSION_COLUMNS: &str = "model_id, model_type, version, status, created_at_ms, \
     deployed_at_ms, deprecated_at_ms, metrics_json, config_json, artifacts_json, checksum, tags_json";

const JOB_COLUMNS: &str = "job_id, model_type, trigger_type, status, previous_model_version, \
     new_model_version, new_model_id, config_json, created_at_ms, started_at_ms, completed_at_ms, \
     performance_improvement, error_message";

const AB_COLUMNS: &str = "test_id, model_type, version_a, version_b, traffic_split, start_ms, \
     end_ms, success_metrics_json, minimum_samples";

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn enum_col<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{text}'").into(),
        )
    })
}

fn row_to_version(row: &Row) -> rusqlite::Result<ModelVersion> {
    Ok(ModelVersion {
        model_id: row.get(0)?,
        model_type: row.get(1)?,
        version: row.get(2)?,
        status: enum_col(row, 3, ModelStatus::parse)?,
        created_at_ms: row.get(4)?,
        deployed_at_ms: row.get(5)?,
        deprecated_at_ms: row.get(6)?,
        performance_metrics: json_col(row, 7)?,
        training_config: json_col(row, 8)?,
        artifact_refs: json_col(row, 9)?,
        checksum: row.get(10)?,
        tags: json_col(row, 11)?,
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<TrainingJob> {
    Ok(TrainingJob {
        job_id: row.get(0)?,
        model_type: row.get(1)?,
        trigger_type: enum_col(row, 2, TriggerType::parse)?,
        status: enum_col(row, 3, JobStatus::parse)?,
        previous_model_version: row.get(4)?,
        new_model_version: row.get(5)?,
        new_model_id: row.get(6)?,
        training_config: json_col(row, 7)?,
        created_at_ms: row.get(8)?,
        started_at_ms: row.get(9)?,
        completed_at_ms: row.get(10)?,
        performance_improvement: row.get(11)?,
        error_message: row.get(12)?,
    })
}

fn row_to_ab(row: &Row) -> rusqlite::Result<ABTestConfig> {
    Ok(ABTestConfig {
        test_id: row.get(0)?,
        model_type: row.get(1)?,
        version_a: row.get(2)?,
        version_b: row.get(3)?,
        traffic_split: row.get(4)?,
        start_ms: row.get(5)?,
        end_ms: row.get(6)?,
        success_metrics: json_col(row, 7)?,
        minimum_samples: row.get::<_, i64>(8)? as u64,
    })
}

fn row_to_feedback(row: &Row) -> rusqlite::Result<FeedbackRecord> {
    Ok(FeedbackRecord {
        feedback_id: row.get(0)?,
        category: row.get(1)?,
        entity_id: row.get(2)?,
        entity_type: row.get(3)?,
        label: row.get(4)?,
        processed: row.get::<_, i64>(5)? != 0,
        created_at_ms: row.get(6)?,
    })
}

fn row_to_metric(row: &Row) -> rusqlite::Result<MetricRecord> {
    Ok(MetricRecord {
        model_type: row.get(0)?,
        model_version: row.get(1)?,
        metric_name: row.get(2)?,
        value: row.get(3)?,
        recorded_at_ms: row.get(4)?,
    })
}

/// Thread-safe handle over one SQLite connection.
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---------- model versions ----------

    pub fn insert_version(&self, v: &ModelVersion) -> Result<()> {
        self.conn.lock().execute(
            &format!("INSERT INTO model_versions ({VERSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
            params![
                v.model_id,
                v.model_type,
                v.version,
                v.status.as_str(),
                v.created_at_ms,
                v.deployed_at_ms,
                v.deprecated_at_ms,
                serde_json::to_string(&v.performance_metrics)?,
                serde_json::to_string(&v.training_config)?,
                serde_json::to_string(&v.artifact_refs)?,
                v.checksum,
                serde_json::to_string(&v.tags)?,
            ],
        )?;
        Ok(())
    }

    /// Persist the mutable fields of a version (status, timestamps, metrics, tags).
    pub fn update_version(&self, v: &ModelVersion) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE model_versions
             SET status = ?2, deployed_at_ms = ?3, deprecated_at_ms = ?4,
                 metrics_json = ?5, tags_json = ?6
             WHERE model_id = ?1",
            params![
                v.model_id,
                v.status.as_str(),
                v.deployed_at_ms,
                v.deprecated_at_ms,
                serde_json::to_string(&v.performance_metrics)?,
                serde_json::to_string(&v.tags)?,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_version(&self, model_id: &str) -> Result<Option<ModelVersion>> {
        let conn = self.conn.lock();
        let v = conn
            .query_row(
                &format!("SELECT {VERSION_COLUMNS} FROM model_versions WHERE model_id = ?1"),
                params![model_id],
                row_to_version,
            )
            .optional()?;
        Ok(v)
    }

    pub fn find_version(&self, model_type: &str, version: &str) -> Result<Option<ModelVersion>> {
        let conn = self.conn.lock();
        let v = conn
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS} FROM model_versions WHERE model_type = ?1 AND version = ?2"
                ),
                params![model_type, version],
                row_to_version,
            )
            .optional()?;
        Ok(v)
    }

    /// Newest first.
    pub fn list_versions(
        &self,
        model_type: Option<&str>,
        status: Option<ModelStatus>,
    ) -> Result<Vec<ModelVersion>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM model_versions
             WHERE (?1 IS NULL OR model_type = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at_ms DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![model_type, status.map(|s| s.as_str())], row_to_version)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn active_version(&self, model_type: &str) -> Result<Option<ModelVersion>> {
        let active = self.list_versions(Some(model_type), Some(ModelStatus::Active))?;
        if active.len() > 1 {
            tracing::error!(model_type, count = active.len(), "more than one active version");
        }
        Ok(active.into_iter().next())
    }

    /// Make `model_id` the only active version of `model_type` in one
    /// transaction. Previously active versions become inactive with
    /// `deprecated_at_ms = now_ms`. Returns the ids that were demoted.
    pub fn activate(
        &self,
        model_type: &str,
        model_id: &str,
        deployed_at_ms: i64,
        now_ms: i64,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let demoted: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT model_id FROM model_versions
                 WHERE model_type = ?1 AND status = 'active' AND model_id != ?2",
            )?;
            let rows = stmt.query_map(params![model_type, model_id], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
            "UPDATE model_versions SET status = 'inactive', deprecated_at_ms = ?3
             WHERE model_type = ?1 AND status = 'active' AND model_id != ?2",
            params![model_type, model_id, now_ms],
        )?;
        let changed = tx.execute(
            "UPDATE model_versions SET status = 'active', deployed_at_ms = ?2, deprecated_at_ms = NULL
             WHERE model_id = ?1",
            params![model_id, deployed_at_ms],
        )?;
        if changed == 0 {
            // dropping the transaction rolls the demotion back
            return Err(crate::StorageError::NotFound(format!("model {model_id}")));
        }
        tx.commit()?;
        Ok(demoted)
    }

    pub fn set_status(&self, model_id: &str, status: ModelStatus) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE model_versions SET status = ?2 WHERE model_id = ?1",
            params![model_id, status.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Delete `model_id` only while it is still inactive or deprecated.
    /// Returns false when the row is gone or has since been put back into
    /// service.
    pub fn delete_retired_version(&self, model_id: &str) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "DELETE FROM model_versions
             WHERE model_id = ?1 AND status IN ('inactive', 'deprecated')",
            params![model_id],
        )?;
        Ok(changed > 0)
    }

    /// Inactive or deprecated versions created before `cutoff_ms`.
    pub fn retired_versions_before(&self, cutoff_ms: i64) -> Result<Vec<ModelVersion>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM model_versions
             WHERE status IN ('inactive', 'deprecated') AND created_at_ms < ?1
             ORDER BY created_at_ms ASC"
        ))?;
        let rows = stmt.query_map(params![cutoff_ms], row_to_version)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_versions_by(&self, column: VersionGrouping) -> Result<BTreeMap<String, usize>> {
        let conn = self.conn.lock();
        let col = match column {
            VersionGrouping::Status => "status",
            VersionGrouping::ModelType => "model_type",
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {col}, COUNT(*) FROM model_versions GROUP BY {col}"
        ))?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as usize)))?;
        Ok(rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?)
    }

    // ---------- training jobs ----------

    pub fn insert_job(&self, job: &TrainingJob) -> Result<()> {
        self.conn.lock().execute(
            &format!("INSERT INTO training_jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
            params![
                job.job_id,
                job.model_type,
                job.trigger_type.as_str(),
                job.status.as_str(),
                job.previous_model_version,
                job.new_model_version,
                job.new_model_id,
                serde_json::to_string(&job.training_config)?,
                job.created_at_ms,
                job.started_at_ms,
                job.completed_at_ms,
                job.performance_improvement,
                job.error_message,
            ],
        )?;
        Ok(())
    }

    pub fn update_job(&self, job: &TrainingJob) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE training_jobs
             SET status = ?2, new_model_id = ?3, started_at_ms = ?4, completed_at_ms = ?5,
                 performance_improvement = ?6, error_message = ?7
             WHERE job_id = ?1",
            params![
                job.job_id,
                job.status.as_str(),
                job.new_model_id,
                job.started_at_ms,
                job.completed_at_ms,
                job.performance_improvement,
                job.error_message,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<TrainingJob>> {
        let conn = self.conn.lock();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM training_jobs WHERE job_id = ?1"),
                params![job_id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn latest_completed_job(&self, model_type: &str) -> Result<Option<TrainingJob>> {
        let conn = self.conn.lock();
        let job = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM training_jobs
                     WHERE model_type = ?1 AND status = 'completed'
                     ORDER BY completed_at_ms DESC LIMIT 1"
                ),
                params![model_type],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Newest first.
    pub fn list_jobs(&self, model_type: Option<&str>, limit: usize) -> Result<Vec<TrainingJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM training_jobs
             WHERE (?1 IS NULL OR model_type = ?1)
             ORDER BY created_at_ms DESC, rowid DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![model_type, limit as i64], row_to_job)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---------- A/B tests ----------

    /// Store `cfg` as the single active test of its model type. When
    /// `testing_model_id` is given that version is marked `testing` in the
    /// same transaction.
    pub fn insert_ab_test(&self, cfg: &ABTestConfig, testing_model_id: Option<&str>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE ab_tests SET active = 0 WHERE model_type = ?1",
            params![cfg.model_type],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO ab_tests ({AB_COLUMNS}, active) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)"
            ),
            params![
                cfg.test_id,
                cfg.model_type,
                cfg.version_a,
                cfg.version_b,
                cfg.traffic_split,
                cfg.start_ms,
                cfg.end_ms,
                serde_json::to_string(&cfg.success_metrics)?,
                cfg.minimum_samples as i64,
            ],
        )?;
        if let Some(id) = testing_model_id {
            let changed = tx.execute(
                "UPDATE model_versions SET status = 'testing' WHERE model_id = ?1",
                params![id],
            )?;
            if changed == 0 {
                return Err(crate::StorageError::NotFound(format!("model {id}")));
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn active_ab_test(&self, model_type: &str) -> Result<Option<ABTestConfig>> {
        let conn = self.conn.lock();
        let cfg = conn
            .query_row(
                &format!(
                    "SELECT {AB_COLUMNS} FROM ab_tests WHERE model_type = ?1 AND active = 1 LIMIT 1"
                ),
                params![model_type],
                row_to_ab,
            )
            .optional()?;
        Ok(cfg)
    }

    /// End the running tests of `model_type` and move `loser_model_id` back
    /// to inactive if it is still `testing`, in one transaction.
    pub fn conclude_ab_tests(&self, model_type: &str, loser_model_id: Option<&str>) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let ended = tx.execute(
            "UPDATE ab_tests SET active = 0 WHERE model_type = ?1 AND active = 1",
            params![model_type],
        )?;
        if let Some(id) = loser_model_id {
            tx.execute(
                "UPDATE model_versions SET status = 'inactive' WHERE model_id = ?1 AND status = 'testing'",
                params![id],
            )?;
        }
        tx.commit()?;
        Ok(ended)
    }

    /// Tests flagged active whose window contains `now_ms`.
    pub fn count_running_ab_tests(&self, now_ms: i64) -> Result<usize> {
        let n: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM ab_tests WHERE active = 1 AND start_ms <= ?1 AND end_ms >= ?1",
            params![now_ms],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    // ---------- feedback ----------

    pub fn insert_feedback(&self, fb: &FeedbackRecord) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO feedback
             (feedback_id, category, entity_id, entity_type, label, processed, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                fb.feedback_id,
                fb.category,
                fb.entity_id,
                fb.entity_type,
                fb.label,
                fb.processed as i32,
                fb.created_at_ms,
            ],
        )?;
        Ok(())
    }

    /// Unprocessed feedback count per category.
    pub fn unprocessed_counts(&self) -> Result<BTreeMap<String, usize>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) FROM feedback WHERE processed = 0 GROUP BY category",
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as usize)))?;
        Ok(rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?)
    }

    pub fn unprocessed_feedback(&self, categories: &[String]) -> Result<Vec<FeedbackRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT feedback_id, category, entity_id, entity_type, label, processed, created_at_ms
             FROM feedback WHERE processed = 0 AND category = ?1 ORDER BY created_at_ms ASC",
        )?;
        let mut out = Vec::new();
        for category in categories {
            let rows = stmt.query_map(params![category], row_to_feedback)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    /// Store a finished training run's metrics and mark the feedback it
    /// consumed as processed, all or nothing. Returns how many feedback rows
    /// were marked.
    pub fn record_training_outcome(
        &self,
        metrics: &[MetricRecord],
        feedback_ids: &[String],
    ) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO performance_metrics
                 (model_type, model_version, metric_name, value, recorded_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for m in metrics {
                stmt.execute(params![
                    m.model_type,
                    m.model_version,
                    m.metric_name,
                    m.value,
                    m.recorded_at_ms
                ])?;
            }
        }
        let mut changed = 0;
        {
            let mut stmt = tx.prepare("UPDATE feedback SET processed = 1 WHERE feedback_id = ?1")?;
            for id in feedback_ids {
                changed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    // ---------- performance metrics ----------

    pub fn record_metric(&self, m: &MetricRecord) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO performance_metrics
             (model_type, model_version, metric_name, value, recorded_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![m.model_type, m.model_version, m.metric_name, m.value, m.recorded_at_ms],
        )?;
        Ok(())
    }

    pub fn latest_metric(&self, model_type: &str, metric_name: &str) -> Result<Option<MetricRecord>> {
        let conn = self.conn.lock();
        let m = conn
            .query_row(
                "SELECT model_type, model_version, metric_name, value, recorded_at_ms
                 FROM performance_metrics WHERE model_type = ?1 AND metric_name = ?2
                 ORDER BY recorded_at_ms DESC, id DESC LIMIT 1",
                params![model_type, metric_name],
                row_to_metric,
            )
            .optional()?;
        Ok(m)
    }

    /// Oldest first.
    pub fn metric_history(&self, model_type: &str, since_ms: i64) -> Result<Vec<MetricRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT model_type, model_version, metric_name, value, recorded_at_ms
             FROM performance_metrics WHERE model_type = ?1 AND recorded_at_ms >= ?2
             ORDER BY recorded_at_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![model_type, since_ms], row_to_metric)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum VersionGrouping {
    Status,
    ModelType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_types::{ArtifactKind, OpaqueConfig};
    use std::collections::BTreeSet;

    fn version(id: &str, model_type: &str, v: &str, created: i64) -> ModelVersion {
        let mut refs = BTreeMap::new();
        refs.insert(ArtifactKind::Model, format!("models/{model_type}/{id}/model.bin"));
        ModelVersion {
            model_id: id.into(),
            model_type: model_type.into(),
            version: v.into(),
            status: ModelStatus::Inactive,
            created_at_ms: created,
            deployed_at_ms: None,
            deprecated_at_ms: None,
            performance_metrics: [("f1_score".to_string(), 0.9)].into_iter().collect(),
            training_config: OpaqueConfig::new().with("epochs", 10i64),
            artifact_refs: refs,
            checksum: "abc".into(),
            tags: BTreeSet::from(["baseline".to_string()]),
        }
    }

    fn job(id: &str, status: JobStatus, completed: Option<i64>) -> TrainingJob {
        TrainingJob {
            job_id: id.into(),
            model_type: "risk_scorer".into(),
            trigger_type: TriggerType::Manual,
            status,
            previous_model_version: None,
            new_model_version: format!("v-{id}"),
            new_model_id: None,
            training_config: OpaqueConfig::new(),
            created_at_ms: 1,
            started_at_ms: None,
            completed_at_ms: completed,
            performance_improvement: None,
            error_message: None,
        }
    }

    #[test]
    fn version_round_trip() {
        let store = MetadataStore::open_in_memory().unwrap();
        let v = version("m1", "risk_scorer", "v1", 10);
        store.insert_version(&v).unwrap();
        assert_eq!(store.get_version("m1").unwrap(), Some(v.clone()));
        assert_eq!(store.find_version("risk_scorer", "v1").unwrap(), Some(v));
        assert!(store.get_version("nope").unwrap().is_none());
    }

    #[test]
    fn duplicate_version_string_rejected() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_version(&version("m1", "risk_scorer", "v1", 10)).unwrap();
        assert!(store.insert_version(&version("m2", "risk_scorer", "v1", 11)).is_err());
        // same version string under another type is fine
        store.insert_version(&version("m3", "trend_predictor", "v1", 12)).unwrap();
    }

    #[test]
    fn activate_keeps_single_active() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_version(&version("m1", "risk_scorer", "v1", 10)).unwrap();
        store.insert_version(&version("m2", "risk_scorer", "v2", 20)).unwrap();

        assert!(store.activate("risk_scorer", "m1", 100, 100).unwrap().is_empty());
        let demoted = store.activate("risk_scorer", "m2", 200, 200).unwrap();
        assert_eq!(demoted, vec!["m1".to_string()]);

        let active = store
            .list_versions(Some("risk_scorer"), Some(ModelStatus::Active))
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].model_id, "m2");
        assert_eq!(active[0].deployed_at_ms, Some(200));

        let m1 = store.get_version("m1").unwrap().unwrap();
        assert_eq!(m1.status, ModelStatus::Inactive);
        assert_eq!(m1.deprecated_at_ms, Some(200));
        assert_eq!(m1.deployed_at_ms, Some(100));
    }

    #[test]
    fn activate_unknown_rolls_back_demotion() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_version(&version("m1", "risk_scorer", "v1", 10)).unwrap();
        store.activate("risk_scorer", "m1", 100, 100).unwrap();

        assert!(store.activate("risk_scorer", "ghost", 200, 200).is_err());
        assert_eq!(
            store.active_version("risk_scorer").unwrap().unwrap().model_id,
            "m1"
        );
    }

    #[test]
    fn list_filters_and_orders() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_version(&version("m1", "risk_scorer", "v1", 10)).unwrap();
        store.insert_version(&version("m2", "risk_scorer", "v2", 20)).unwrap();
        store.insert_version(&version("m3", "trend_predictor", "v1", 30)).unwrap();
        store.set_status("m2", ModelStatus::Testing).unwrap();

        let all = store.list_versions(None, None).unwrap();
        assert_eq!(
            all.iter().map(|v| v.model_id.as_str()).collect::<Vec<_>>(),
            vec!["m3", "m2", "m1"]
        );
        let testing = store.list_versions(None, Some(ModelStatus::Testing)).unwrap();
        assert_eq!(testing.len(), 1);
        let risk = store.list_versions(Some("risk_scorer"), None).unwrap();
        assert_eq!(risk.len(), 2);

        let by_type = store.count_versions_by(VersionGrouping::ModelType).unwrap();
        assert_eq!(by_type["risk_scorer"], 2);
        let by_status = store.count_versions_by(VersionGrouping::Status).unwrap();
        assert_eq!(by_status["testing"], 1);
    }

    #[test]
    fn retired_before_cutoff() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_version(&version("m1", "risk_scorer", "v1", 10)).unwrap();
        store.insert_version(&version("m2", "risk_scorer", "v2", 20)).unwrap();
        store.insert_version(&version("m3", "risk_scorer", "v3", 30)).unwrap();
        store.activate("risk_scorer", "m1", 40, 40).unwrap();

        let retired = store.retired_versions_before(25).unwrap();
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].model_id, "m2");
    }

    #[test]
    fn job_lifecycle() {
        let store = MetadataStore::open_in_memory().unwrap();
        let mut j = job("j1", JobStatus::Pending, None);
        store.insert_job(&j).unwrap();

        j.status = JobStatus::Failed;
        j.error_message = Some("boom".into());
        j.completed_at_ms = Some(5);
        assert!(store.update_job(&j).unwrap());
        assert_eq!(store.get_job("j1").unwrap(), Some(j));

        store.insert_job(&job("j2", JobStatus::Completed, Some(50))).unwrap();
        store.insert_job(&job("j3", JobStatus::Completed, Some(70))).unwrap();
        let latest = store.latest_completed_job("risk_scorer").unwrap().unwrap();
        assert_eq!(latest.job_id, "j3");
        assert_eq!(store.list_jobs(Some("risk_scorer"), 2).unwrap().len(), 2);
    }

    #[test]
    fn one_active_ab_test_per_type() {
        let store = MetadataStore::open_in_memory().unwrap();
        let mut cfg = ABTestConfig {
            test_id: "t1".into(),
            model_type: "risk_scorer".into(),
            version_a: "v1".into(),
            version_b: "v2".into(),
            traffic_split: 0.2,
            start_ms: 0,
            end_ms: 1_000,
            success_metrics: vec!["f1_score".into()],
            minimum_samples: 100,
        };
        store.insert_ab_test(&cfg, None).unwrap();
        cfg.test_id = "t2".into();
        cfg.version_b = "v3".into();
        store.insert_ab_test(&cfg, None).unwrap();

        let active = store.active_ab_test("risk_scorer").unwrap().unwrap();
        assert_eq!(active.test_id, "t2");
        assert_eq!(store.count_running_ab_tests(500).unwrap(), 1);
        assert_eq!(store.count_running_ab_tests(5_000).unwrap(), 0);
        assert_eq!(store.conclude_ab_tests("risk_scorer", None).unwrap(), 1);
        assert!(store.active_ab_test("risk_scorer").unwrap().is_none());
    }

    #[test]
    fn ab_test_start_and_conclusion_move_statuses() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_version(&version("m1", "risk_scorer", "v1", 10)).unwrap();
        store.insert_version(&version("m2", "risk_scorer", "v2", 20)).unwrap();
        let cfg = ABTestConfig {
            test_id: "t1".into(),
            model_type: "risk_scorer".into(),
            version_a: "v1".into(),
            version_b: "v2".into(),
            traffic_split: 0.5,
            start_ms: 0,
            end_ms: 1_000,
            success_metrics: vec![],
            minimum_samples: 10,
        };

        // unknown candidate leaves no test behind
        assert!(store.insert_ab_test(&cfg, Some("ghost")).is_err());
        assert!(store.active_ab_test("risk_scorer").unwrap().is_none());

        store.insert_ab_test(&cfg, Some("m2")).unwrap();
        assert_eq!(store.get_version("m2").unwrap().unwrap().status, ModelStatus::Testing);

        assert_eq!(store.conclude_ab_tests("risk_scorer", Some("m2")).unwrap(), 1);
        assert_eq!(store.get_version("m2").unwrap().unwrap().status, ModelStatus::Inactive);
        assert!(store.active_ab_test("risk_scorer").unwrap().is_none());
    }

    #[test]
    fn delete_retired_skips_versions_back_in_service() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_version(&version("m1", "risk_scorer", "v1", 10)).unwrap();
        store.insert_version(&version("m2", "risk_scorer", "v2", 20)).unwrap();
        store.activate("risk_scorer", "m1", 30, 30).unwrap();

        assert!(!store.delete_retired_version("m1").unwrap());
        assert!(store.get_version("m1").unwrap().is_some());
        assert!(store.delete_retired_version("m2").unwrap());
        assert!(!store.delete_retired_version("m2").unwrap());
    }

    #[test]
    fn feedback_counts_and_processing() {
        let store = MetadataStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .insert_feedback(&FeedbackRecord {
                    feedback_id: format!("f{i}"),
                    category: if i < 3 { "risk_assessment" } else { "relevance" }.into(),
                    entity_id: format!("e{i}"),
                    entity_type: "competitor".into(),
                    label: 1.0,
                    processed: false,
                    created_at_ms: i,
                })
                .unwrap();
        }
        let counts = store.unprocessed_counts().unwrap();
        assert_eq!(counts["risk_assessment"], 3);
        assert_eq!(counts["relevance"], 2);

        let risk = store
            .unprocessed_feedback(&["risk_assessment".to_string()])
            .unwrap();
        let ids: Vec<String> = risk.iter().map(|f| f.feedback_id.clone()).collect();
        let metrics = vec![MetricRecord {
            model_type: "risk_scorer".into(),
            model_version: "v1".into(),
            metric_name: "f1_score".into(),
            value: 0.9,
            recorded_at_ms: 10,
        }];
        assert_eq!(store.record_training_outcome(&metrics, &ids).unwrap(), 3);

        let counts = store.unprocessed_counts().unwrap();
        assert!(!counts.contains_key("risk_assessment"));
        assert_eq!(counts["relevance"], 2);
        assert_eq!(store.latest_metric("risk_scorer", "f1_score").unwrap().unwrap().value, 0.9);
    }

    #[test]
    fn metric_latest_and_history() {
        let store = MetadataStore::open_in_memory().unwrap();
        for (ts, v) in [(10, 0.9), (20, 0.8), (30, 0.7)] {
            store
                .record_metric(&MetricRecord {
                    model_type: "impact_classifier".into(),
                    model_version: "v1".into(),
                    metric_name: "f1_score".into(),
                    value: v,
                    recorded_at_ms: ts,
                })
                .unwrap();
        }
        let latest = store
            .latest_metric("impact_classifier", "f1_score")
            .unwrap()
            .unwrap();
        assert_eq!(latest.value, 0.7);
        assert_eq!(store.metric_history("impact_classifier", 15).unwrap().len(), 2);
        assert!(store.latest_metric("impact_classifier", "rmse").unwrap().is_none());
    }

    #[test]
    fn open_on_disk_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("lifecycle.db");
        {
            let store = MetadataStore::open(&path).unwrap();
            store.insert_version(&version("m1", "risk_scorer", "v1", 10)).unwrap();
        }
        let store = MetadataStore::open(&path).unwrap();
        assert!(store.get_version("m1").unwrap().is_some());
    }
}
