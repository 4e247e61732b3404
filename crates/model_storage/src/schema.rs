//! SQLite schema for lifecycle records.
//!
//! Tables: model_versions, training_jobs, ab_tests, feedback, performance_metrics

use rusqlite::Connection;

use crate::Result;

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS model_versions (
            model_id          TEXT PRIMARY KEY,
            model_type        TEXT NOT NULL,
            version           TEXT NOT NULL,
            status            TEXT NOT NULL,
            created_at_ms     INTEGER NOT NULL,
            deployed_at_ms    INTEGER,
            deprecated_at_ms  INTEGER,
            metrics_json      TEXT NOT NULL DEFAULT '{}',
            config_json       TEXT NOT NULL DEFAULT '{}',
            artifacts_json    TEXT NOT NULL DEFAULT '{}',
            checksum          TEXT NOT NULL,
            tags_json         TEXT NOT NULL DEFAULT '[]',
            UNIQUE (model_type, version)
        );

        CREATE TABLE IF NOT EXISTS training_jobs (
            job_id                  TEXT PRIMARY KEY,
            model_type              TEXT NOT NULL,
            trigger_type            TEXT NOT NULL,
            status                  TEXT NOT NULL,
            previous_model_version  TEXT,
            new_model_version       TEXT NOT NULL,
            new_model_id            TEXT,
            config_json             TEXT NOT NULL DEFAULT '{}',
            created_at_ms           INTEGER NOT NULL,
            started_at_ms           INTEGER,
            completed_at_ms         INTEGER,
            performance_improvement REAL,
            error_message           TEXT
        );

        CREATE TABLE IF NOT EXISTS ab_tests (
            test_id               TEXT PRIMARY KEY,
            model_type            TEXT NOT NULL,
            version_a             TEXT NOT NULL,
            version_b             TEXT NOT NULL,
            traffic_split         REAL NOT NULL,
            start_ms              INTEGER NOT NULL,
            end_ms                INTEGER NOT NULL,
            success_metrics_json  TEXT NOT NULL DEFAULT '[]',
            minimum_samples       INTEGER NOT NULL DEFAULT 0,
            active                INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS feedback (
            feedback_id     TEXT PRIMARY KEY,
            category        TEXT NOT NULL,
            entity_id       TEXT NOT NULL,
            entity_type     TEXT NOT NULL,
            label           REAL NOT NULL,
            processed       INTEGER NOT NULL DEFAULT 0,
            created_at_ms   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS performance_metrics (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            model_type      TEXT NOT NULL,
            model_version   TEXT NOT NULL,
            metric_name     TEXT NOT NULL,
            value           REAL NOT NULL,
            recorded_at_ms  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_versions_type_status ON model_versions(model_type, status);
        CREATE INDEX IF NOT EXISTS idx_jobs_type_status ON training_jobs(model_type, status);
        CREATE INDEX IF NOT EXISTS idx_ab_type_active ON ab_tests(model_type, active);
        CREATE INDEX IF NOT EXISTS idx_feedback_processed ON feedback(processed, category);
        CREATE INDEX IF NOT EXISTS idx_metrics_type_name ON performance_metrics(model_type, metric_name, recorded_at_ms);
        ",
    )?;
    Ok(())
}
