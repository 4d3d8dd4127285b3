use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlite::{Connection, State, Statement};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::jobs::{JobEvent, JobRecord, JobStage};
use crate::styles::Style;

#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

const JOB_COLUMNS: &str = "id, user_id, product_name, stage, options, analysis, prompts, image_path, \
     image_url, clips, result, warnings, error, failed_stage, created_at, updated_at";

impl Database {
    pub async fn new(database_path: &str) -> Result<Self> {
        let connection = sqlite::open(database_path)?;
        let db = Database {
            connection: Arc::new(Mutex::new(connection)),
        };

        db.init_tables().await?;
        info!("Database initialized at: {}", database_path);
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    async fn init_tables(&self) -> Result<()> {
        let conn = self.connection.lock().await;

        // Optional values are stored as '' rather than NULL
        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                product_name TEXT NOT NULL,
                stage TEXT NOT NULL,
                options TEXT NOT NULL DEFAULT '',
                analysis TEXT NOT NULL DEFAULT '',
                prompts TEXT NOT NULL DEFAULT '',
                image_path TEXT NOT NULL DEFAULT '',
                image_url TEXT NOT NULL DEFAULT '',
                clips TEXT NOT NULL DEFAULT '[]',
                result TEXT NOT NULL DEFAULT '',
                warnings TEXT NOT NULL DEFAULT '[]',
                error TEXT NOT NULL DEFAULT '',
                failed_stage TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_user
             ON jobs(user_id, created_at)",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS job_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_job_events_job
             ON job_events(job_id, id)",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS style_overrides (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                name TEXT NOT NULL,
                image_prompt TEXT NOT NULL,
                video_prompts TEXT NOT NULL DEFAULT '[]',
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_access (
                user_id TEXT PRIMARY KEY,
                granted_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS usage_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                action TEXT NOT NULL,
                detail TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )?;

        Ok(())
    }

    // Jobs

    pub async fn save_job(&self, job: &JobRecord) -> Result<()> {
        let options = to_json(&job.options)?;
        let analysis = opt_json(&job.analysis)?;
        let prompts = opt_json(&job.prompts)?;
        let clips = to_json(&job.clips)?;
        let result = opt_json(&job.result)?;
        let warnings = to_json(&job.warnings)?;
        let created_at = job.created_at.to_rfc3339();
        let updated_at = job.updated_at.to_rfc3339();

        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(format!(
            "INSERT OR REPLACE INTO jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            JOB_COLUMNS
        ))?;
        statement.bind((1, job.id.as_str()))?;
        statement.bind((2, job.user_id.as_str()))?;
        statement.bind((3, job.product_name.as_str()))?;
        statement.bind((4, job.stage.as_str()))?;
        statement.bind((5, options.as_str()))?;
        statement.bind((6, analysis.as_str()))?;
        statement.bind((7, prompts.as_str()))?;
        statement.bind((8, job.image_path.as_deref().unwrap_or("")))?;
        statement.bind((9, job.image_url.as_deref().unwrap_or("")))?;
        statement.bind((10, clips.as_str()))?;
        statement.bind((11, result.as_str()))?;
        statement.bind((12, warnings.as_str()))?;
        statement.bind((13, job.error.as_deref().unwrap_or("")))?;
        statement.bind((14, job.failed_stage.map(|s| s.as_str()).unwrap_or("")))?;
        statement.bind((15, created_at.as_str()))?;
        statement.bind((16, updated_at.as_str()))?;
        statement.next()?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))?;
        statement.bind((1, job_id))?;

        match statement.next()? {
            State::Row => Ok(Some(read_job(&statement)?)),
            State::Done => Ok(None),
        }
    }

    pub async fn list_jobs(&self, user_id: &str, limit: i64) -> Result<Vec<JobRecord>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(format!(
            "SELECT {} FROM jobs WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
            JOB_COLUMNS
        ))?;
        statement.bind((1, user_id))?;
        statement.bind((2, limit))?;

        let mut jobs = Vec::new();
        while let State::Row = statement.next()? {
            jobs.push(read_job(&statement)?);
        }
        Ok(jobs)
    }

    pub async fn add_event(&self, job_id: &str, stage: JobStage, level: &str, message: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT INTO job_events (job_id, stage, level, message) VALUES (?, ?, ?, ?)",
        )?;
        statement.bind((1, job_id))?;
        statement.bind((2, stage.as_str()))?;
        statement.bind((3, level))?;
        statement.bind((4, message))?;
        statement.next()?;
        Ok(())
    }

    pub async fn get_events(&self, job_id: &str) -> Result<Vec<JobEvent>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "SELECT stage, level, message, created_at FROM job_events WHERE job_id = ? ORDER BY id ASC",
        )?;
        statement.bind((1, job_id))?;

        let mut events = Vec::new();
        while let State::Row = statement.next()? {
            let stage = statement.read::<String, _>("stage")?;
            events.push(JobEvent {
                stage: JobStage::from_str(&stage).ok_or_else(|| anyhow!("Unknown stage '{}'", stage))?,
                level: statement.read::<String, _>("level")?,
                message: statement.read::<String, _>("message")?,
                created_at: statement.read::<String, _>("created_at")?,
            });
        }
        Ok(events)
    }

    // Style overrides

    pub async fn upsert_style(&self, style: &Style) -> Result<()> {
        let video_prompts = to_json(&style.video_prompts)?;
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT OR REPLACE INTO style_overrides (id, category, name, image_prompt, video_prompts, updated_at)
             VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
        )?;
        statement.bind((1, style.id.as_str()))?;
        statement.bind((2, style.category.as_str()))?;
        statement.bind((3, style.name.as_str()))?;
        statement.bind((4, style.image_prompt.as_str()))?;
        statement.bind((5, video_prompts.as_str()))?;
        statement.next()?;
        info!("Stored style override {}", style.id);
        Ok(())
    }

    pub async fn delete_style(&self, style_id: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("DELETE FROM style_overrides WHERE id = ?")?;
        statement.bind((1, style_id))?;
        statement.next()?;
        Ok(())
    }

    pub async fn list_style_overrides(&self) -> Result<Vec<Style>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "SELECT id, category, name, image_prompt, video_prompts FROM style_overrides ORDER BY id",
        )?;

        let mut styles = Vec::new();
        while let State::Row = statement.next()? {
            styles.push(Style {
                id: statement.read::<String, _>("id")?,
                category: statement.read::<String, _>("category")?,
                name: statement.read::<String, _>("name")?,
                image_prompt: statement.read::<String, _>("image_prompt")?,
                video_prompts: from_json(&statement.read::<String, _>("video_prompts")?)?,
            });
        }
        Ok(styles)
    }

    // Access

    pub async fn grant_access(&self, user_id: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("INSERT OR IGNORE INTO user_access (user_id) VALUES (?)")?;
        statement.bind((1, user_id))?;
        statement.next()?;
        info!("Granted access to user {}", user_id);
        Ok(())
    }

    pub async fn revoke_access(&self, user_id: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("DELETE FROM user_access WHERE user_id = ?")?;
        statement.bind((1, user_id))?;
        statement.next()?;
        info!("Revoked access for user {}", user_id);
        Ok(())
    }

    pub async fn has_access(&self, user_id: &str) -> Result<bool> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("SELECT 1 AS granted FROM user_access WHERE user_id = ?")?;
        statement.bind((1, user_id))?;
        Ok(matches!(statement.next()?, State::Row))
    }

    // Usage

    pub async fn log_usage(&self, user_id: &str, action: &str, detail: Option<&str>) -> Result<()> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT INTO usage_stats (user_id, action, detail) VALUES (?, ?, ?)",
        )?;
        statement.bind((1, user_id))?;
        statement.bind((2, action))?;
        statement.bind((3, detail.unwrap_or("")))?;
        statement.next()?;
        Ok(())
    }

    pub async fn usage_count(&self, user_id: &str, action: &str) -> Result<i64> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "SELECT COUNT(*) AS total FROM usage_stats WHERE user_id = ? AND action = ?",
        )?;
        statement.bind((1, user_id))?;
        statement.bind((2, action))?;
        statement.next()?;
        Ok(statement.read::<i64, _>("total")?)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn opt_json<T: Serialize>(value: &Option<T>) -> Result<String> {
    match value {
        Some(v) => to_json(v),
        None => Ok(String::new()),
    }
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| anyhow!("Corrupt JSON column: {}", e))
}

fn opt_from_json<T: DeserializeOwned>(raw: &str) -> Result<Option<T>> {
    if raw.is_empty() {
        Ok(None)
    } else {
        from_json(raw).map(Some)
    }
}

fn non_empty(raw: String) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn read_job(statement: &Statement) -> Result<JobRecord> {
    let stage = statement.read::<String, _>("stage")?;
    let failed_stage = statement.read::<String, _>("failed_stage")?;

    Ok(JobRecord {
        id: statement.read::<String, _>("id")?,
        user_id: statement.read::<String, _>("user_id")?,
        product_name: statement.read::<String, _>("product_name")?,
        stage: JobStage::from_str(&stage).ok_or_else(|| anyhow!("Unknown stage '{}'", stage))?,
        options: from_json(&statement.read::<String, _>("options")?)?,
        analysis: opt_from_json(&statement.read::<String, _>("analysis")?)?,
        prompts: opt_from_json(&statement.read::<String, _>("prompts")?)?,
        image_path: non_empty(statement.read::<String, _>("image_path")?),
        image_url: non_empty(statement.read::<String, _>("image_url")?),
        clips: from_json(&statement.read::<String, _>("clips")?)?,
        result: opt_from_json(&statement.read::<String, _>("result")?)?,
        warnings: from_json(&statement.read::<String, _>("warnings")?)?,
        error: non_empty(statement.read::<String, _>("error")?),
        failed_stage: JobStage::from_str(&failed_stage),
        created_at: parse_time(&statement.read::<String, _>("created_at")?)?,
        updated_at: parse_time(&statement.read::<String, _>("updated_at")?)?,
    })
}
