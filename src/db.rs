use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::models::{
    DownloadJob, FormatType, JobPatch, JobStatus, NewJob, Platform, VideoQuality, clamp_progress,
};

#[derive(Debug)]
pub enum CreateOutcome {
    Created(DownloadJob),
    /// A job for the same URL exists and has not failed.
    Duplicate,
}

#[derive(Clone)]
pub struct JobDb {
    pool: SqlitePool,
}

impl JobDb {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed creating database directory {parent:?}"))?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await
            .context("failed to connect to sqlite")?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                title TEXT,
                platform TEXT NOT NULL DEFAULT 'other',
                format_type TEXT NOT NULL DEFAULT 'video',
                quality TEXT NOT NULL DEFAULT 'best',
                status TEXT NOT NULL DEFAULT 'pending',
                progress INTEGER NOT NULL DEFAULT 0,
                filename TEXT,
                file_size INTEGER,
                error_message TEXT,
                is_local_file INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed creating downloads table")?;

        // Older databases predate these columns.
        self.ensure_column("format_type", "TEXT NOT NULL DEFAULT 'video'")
            .await?;
        self.ensure_column("quality", "TEXT NOT NULL DEFAULT 'best'")
            .await?;
        self.ensure_column("is_local_file", "INTEGER NOT NULL DEFAULT 0")
            .await?;
        self.ensure_column("completed_at", "TEXT").await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_url_status ON downloads(url, status)")
            .execute(&self.pool)
            .await
            .context("failed creating idx_downloads_url_status")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_created ON downloads(created_at DESC)")
            .execute(&self.pool)
            .await
            .context("failed creating idx_downloads_created")?;

        Ok(())
    }

    async fn ensure_column(&self, column: &str, definition: &str) -> Result<()> {
        let rows = sqlx::query("PRAGMA table_info(downloads)")
            .fetch_all(&self.pool)
            .await
            .context("failed inspecting downloads table")?;

        let exists = rows.iter().any(|row| {
            row.try_get::<String, _>("name")
                .map(|name| name == column)
                .unwrap_or(false)
        });
        if exists {
            return Ok(());
        }

        sqlx::query(&format!(
            "ALTER TABLE downloads ADD COLUMN {column} {definition}"
        ))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed adding column {column}"))?;
        Ok(())
    }

    /// Inserts a pending job unless a non-failed job already exists for the
    /// same URL. The check and the insert run as one statement.
    pub async fn create_job(&self, job: &NewJob) -> Result<CreateOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO downloads (
                url, platform, format_type, quality, status, progress, is_local_file, created_at
            )
            SELECT ?, ?, ?, ?, 'pending', 0, ?, ?
            WHERE ? OR NOT EXISTS (
                SELECT 1 FROM downloads WHERE url = ? AND status != 'failed'
            )
            "#,
        )
        .bind(&job.url)
        .bind(job.platform.as_str())
        .bind(job.format_type.as_str())
        .bind(job.quality.as_str())
        .bind(job.is_local_file)
        .bind(format_timestamp(Utc::now()))
        .bind(job.is_local_file)
        .bind(&job.url)
        .execute(&self.pool)
        .await
        .context("failed inserting download")?;

        if result.rows_affected() == 0 {
            return Ok(CreateOutcome::Duplicate);
        }

        let id = result.last_insert_rowid();
        let created = self
            .get_job(id)
            .await?
            .with_context(|| format!("inserted download {id} vanished"))?;
        Ok(CreateOutcome::Created(created))
    }

    pub async fn get_job(&self, id: i64) -> Result<Option<DownloadJob>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed loading download")?;

        row.map(row_to_job).transpose()
    }

    pub async fn list_jobs(&self) -> Result<Vec<DownloadJob>> {
        let rows = sqlx::query("SELECT * FROM downloads ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await
            .context("failed listing downloads")?;

        rows.into_iter().map(row_to_job).collect()
    }

    pub async fn count_active(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM downloads WHERE status IN ('pending', 'downloading')",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed counting active downloads")?;

        row.try_get::<i64, _>("count")
            .context("missing count column")
    }

    pub async fn list_pending_job_ids(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT id FROM downloads WHERE status = 'pending' ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed listing pending downloads")?;

        rows.into_iter()
            .map(|row| row.try_get::<i64, _>("id").context("missing download id"))
            .collect()
    }

    /// Writes only the fields present in `patch`. Progress is clamped below
    /// 100; only `complete` may set it to 100.
    pub async fn update_job(&self, id: i64, patch: &JobPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(false);
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut binds: Vec<BindValue> = Vec::new();

        if let Some(title) = &patch.title {
            sets.push("title = ?");
            binds.push(BindValue::Text(title.clone()));
        }
        if let Some(progress) = patch.progress {
            sets.push("progress = ?");
            binds.push(BindValue::Int(clamp_progress(progress)));
        }
        if let Some(filename) = &patch.filename {
            sets.push("filename = ?");
            binds.push(BindValue::Text(filename.clone()));
        }
        if let Some(file_size) = patch.file_size {
            sets.push("file_size = ?");
            binds.push(BindValue::Int(file_size));
        }
        if let Some(message) = &patch.error_message {
            sets.push("error_message = ?");
            binds.push(BindValue::Text(message.clone()));
        }

        let query = format!("UPDATE downloads SET {} WHERE id = ?", sets.join(", "));
        let mut q = sqlx::query(&query);
        for bind in binds {
            q = match bind {
                BindValue::Text(value) => q.bind(value),
                BindValue::Int(value) => q.bind(value),
            };
        }

        let result = q
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed updating download")?;
        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-swap on `status`. Returns false when the row is not in
    /// `from` or the transition is not allowed.
    pub async fn transition(&self, id: i64, from: JobStatus, to: JobStatus) -> Result<bool> {
        if !from.can_transition(to) {
            return Ok(false);
        }

        let result = sqlx::query("UPDATE downloads SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .context("failed updating download status")?;
        Ok(result.rows_affected() > 0)
    }

    /// Raises progress while the job is downloading. Returns the stored value
    /// when it changed.
    pub async fn record_progress(&self, id: i64, raw: i64) -> Result<Option<i64>> {
        let progress = clamp_progress(raw);
        let result = sqlx::query(
            "UPDATE downloads SET progress = ? WHERE id = ? AND status = 'downloading' AND progress < ?",
        )
        .bind(progress)
        .bind(id)
        .bind(progress)
        .execute(&self.pool)
        .await
        .context("failed updating download progress")?;

        Ok((result.rows_affected() > 0).then_some(progress))
    }

    pub async fn complete(
        &self,
        id: i64,
        filename: Option<&str>,
        file_size: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = 'completed',
                progress = 100,
                filename = ?,
                file_size = ?,
                error_message = NULL,
                completed_at = ?
            WHERE id = ? AND status = 'downloading'
            "#,
        )
        .bind(filename)
        .bind(file_size)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed completing download")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn fail(&self, id: i64, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = 'failed',
                error_message = ?
            WHERE id = ? AND status IN ('pending', 'downloading')
            "#,
        )
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed marking download as failed")?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes the row and hands it back so the caller can clean up files.
    pub async fn delete_job(&self, id: i64) -> Result<Option<DownloadJob>> {
        let Some(job) = self.get_job(id).await? else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed deleting download")?;

        Ok(Some(job))
    }

    pub async fn fail_interrupted_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = 'failed',
                error_message = 'Interrupted by server restart'
            WHERE status = 'downloading'
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed marking interrupted downloads")?;

        Ok(result.rows_affected())
    }
}

enum BindValue {
    Text(String),
    Int(i64),
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<DownloadJob> {
    // Tables created by older releases left most columns nullable.
    let text = |column: &str| -> Result<Option<String>> {
        Ok(row.try_get::<Option<String>, _>(column)?)
    };

    let status = text("status")?
        .and_then(|v| JobStatus::from_str(&v).ok())
        .unwrap_or(JobStatus::Pending);
    let platform = text("platform")?
        .and_then(|v| Platform::from_str(&v).ok())
        .unwrap_or(Platform::Other);
    let format_type = text("format_type")?
        .and_then(|v| FormatType::from_str(&v).ok())
        .unwrap_or(FormatType::Video);
    let quality = text("quality")?
        .and_then(|v| VideoQuality::from_str(&v).ok())
        .unwrap_or(VideoQuality::Best);
    let timestamp = |column: &str| {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .and_then(|v| parse_timestamp(v).ok())
    };
    let created_at = timestamp("created_at").unwrap_or_default();
    let completed_at = timestamp("completed_at");

    Ok(DownloadJob {
        id: row.try_get("id")?,
        url: text("url")?.unwrap_or_default(),
        title: text("title")?,
        platform,
        format_type,
        quality,
        status,
        progress: row
            .try_get::<Option<i64>, _>("progress")?
            .unwrap_or_default(),
        filename: text("filename")?,
        // Legacy rows stored a formatted size string here.
        file_size: row.try_get::<Option<i64>, _>("file_size").ok().flatten(),
        error_message: text("error_message")?,
        is_local_file: row
            .try_get::<Option<i64>, _>("is_local_file")?
            .unwrap_or_default()
            != 0,
        created_at,
        completed_at,
    })
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: String) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP, optionally with fractional seconds.
    let naive = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
        .with_context(|| format!("invalid timestamp {s}"))?;
    Ok(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scratch_db() -> (tempfile::TempDir, JobDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = JobDb::new(&dir.path().join("data/downloads.db"))
            .await
            .expect("open db");
        (dir, db)
    }

    fn new_job(url: &str) -> NewJob {
        NewJob {
            url: url.to_string(),
            platform: Platform::Youtube,
            format_type: FormatType::Video,
            quality: VideoQuality::Best,
            is_local_file: false,
        }
    }

    async fn create(db: &JobDb, url: &str) -> DownloadJob {
        match db.create_job(&new_job(url)).await.expect("create") {
            CreateOutcome::Created(job) => job,
            CreateOutcome::Duplicate => panic!("unexpected duplicate for {url}"),
        }
    }

    #[tokio::test]
    async fn created_jobs_start_pending() {
        let (_dir, db) = scratch_db().await;
        let job = create(&db, "https://youtu.be/a").await;

        assert!(job.id > 0);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.title.is_none());
        assert!(job.filename.is_none());
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_url_rejected_until_previous_job_fails() {
        let (_dir, db) = scratch_db().await;
        let url = "https://youtu.be/dup";
        let first = create(&db, url).await;

        assert!(matches!(
            db.create_job(&new_job(url)).await.unwrap(),
            CreateOutcome::Duplicate
        ));

        assert!(db.transition(first.id, JobStatus::Pending, JobStatus::Downloading).await.unwrap());
        assert!(db.complete(first.id, Some("a.mp4"), Some(10)).await.unwrap());
        assert!(matches!(
            db.create_job(&new_job(url)).await.unwrap(),
            CreateOutcome::Duplicate
        ));

        let second_url = "https://youtu.be/retry";
        let failed = create(&db, second_url).await;
        assert!(db.fail(failed.id, "network down").await.unwrap());
        let retried = create(&db, second_url).await;
        assert_ne!(retried.id, failed.id);
    }

    #[tokio::test]
    async fn concurrent_submissions_create_a_single_job() {
        let (_dir, db) = scratch_db().await;
        let url = "https://www.youtube.com/watch?v=race";

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.create_job(&new_job(url)).await.unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CreateOutcome::Created(_)) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(db.list_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_files_skip_duplicate_check() {
        let (_dir, db) = scratch_db().await;
        let mut job = new_job("uploads/song.wav");
        job.platform = Platform::Local;
        job.is_local_file = true;

        assert!(matches!(db.create_job(&job).await.unwrap(), CreateOutcome::Created(_)));
        assert!(matches!(db.create_job(&job).await.unwrap(), CreateOutcome::Created(_)));
    }

    #[tokio::test]
    async fn status_never_regresses() {
        let (_dir, db) = scratch_db().await;
        let job = create(&db, "https://youtu.be/s").await;

        assert!(!db.complete(job.id, None, None).await.unwrap());
        assert!(db.transition(job.id, JobStatus::Pending, JobStatus::Downloading).await.unwrap());
        assert!(!db.transition(job.id, JobStatus::Pending, JobStatus::Downloading).await.unwrap());
        assert!(!db.transition(job.id, JobStatus::Downloading, JobStatus::Pending).await.unwrap());
        assert!(db.complete(job.id, None, None).await.unwrap());

        assert!(!db.fail(job.id, "late error").await.unwrap());
        assert!(!db.transition(job.id, JobStatus::Completed, JobStatus::Downloading).await.unwrap());

        let stored = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_capped_until_success() {
        let (_dir, db) = scratch_db().await;
        let job = create(&db, "https://youtu.be/p").await;

        // Ignored while pending.
        assert_eq!(db.record_progress(job.id, 30).await.unwrap(), None);

        db.transition(job.id, JobStatus::Pending, JobStatus::Downloading).await.unwrap();
        assert_eq!(db.record_progress(job.id, 30).await.unwrap(), Some(30));
        assert_eq!(db.record_progress(job.id, 10).await.unwrap(), None);
        assert_eq!(db.record_progress(job.id, 100).await.unwrap(), Some(99));
        assert_eq!(db.get_job(job.id).await.unwrap().unwrap().progress, 99);

        db.complete(job.id, Some("clip.mp4"), Some(2048)).await.unwrap();
        let done = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.filename.as_deref(), Some("clip.mp4"));
        assert_eq!(done.file_size, Some(2048));
        assert!(done.completed_at.is_some());

        assert_eq!(db.record_progress(job.id, 50).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failure_keeps_progress_below_hundred() {
        let (_dir, db) = scratch_db().await;
        let job = create(&db, "https://youtu.be/f").await;
        db.transition(job.id, JobStatus::Pending, JobStatus::Downloading).await.unwrap();
        db.record_progress(job.id, 64).await.unwrap();

        assert!(db.fail(job.id, "ERROR: Video unavailable").await.unwrap());
        let failed = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.progress, 64);
        assert_eq!(failed.error_message.as_deref(), Some("ERROR: Video unavailable"));
    }

    #[tokio::test]
    async fn partial_update_touches_only_given_fields() {
        let (_dir, db) = scratch_db().await;
        let job = create(&db, "https://youtu.be/u").await;

        assert!(!db.update_job(job.id, &JobPatch::default()).await.unwrap());

        let patch = JobPatch {
            title: Some("Never Gonna".to_string()),
            progress: Some(150),
            ..Default::default()
        };
        assert!(db.update_job(job.id, &patch).await.unwrap());

        let stored = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Never Gonna"));
        assert_eq!(stored.progress, 99);
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.filename.is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_delete_returns_row() {
        let (_dir, db) = scratch_db().await;
        let a = create(&db, "https://youtu.be/1").await;
        let b = create(&db, "https://youtu.be/2").await;
        let c = create(&db, "https://youtu.be/3").await;

        let ids: Vec<i64> = db.list_jobs().await.unwrap().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
        assert_eq!(db.count_active().await.unwrap(), 3);
        assert_eq!(db.list_pending_job_ids().await.unwrap(), vec![a.id, b.id, c.id]);

        let deleted = db.delete_job(b.id).await.unwrap().unwrap();
        assert_eq!(deleted.url, "https://youtu.be/2");
        assert!(db.get_job(b.id).await.unwrap().is_none());
        assert!(db.delete_job(b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interrupted_downloads_fail_on_restart() {
        let (_dir, db) = scratch_db().await;
        let running = create(&db, "https://youtu.be/r").await;
        let waiting = create(&db, "https://youtu.be/w").await;
        db.transition(running.id, JobStatus::Pending, JobStatus::Downloading).await.unwrap();

        assert_eq!(db.fail_interrupted_jobs().await.unwrap(), 1);
        let stored = db.get_job(running.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(db.list_pending_job_ids().await.unwrap(), vec![waiting.id]);
    }

    #[tokio::test]
    async fn legacy_tables_gain_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");

        let opts = SqliteConnectOptions::new().filename(&path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                title TEXT,
                platform TEXT,
                status TEXT DEFAULT 'pending',
                progress INTEGER DEFAULT 0,
                filename TEXT,
                file_size TEXT,
                error_message TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO downloads (url, platform, status, progress, filename, file_size) VALUES ('https://youtu.be/old', 'youtube', 'completed', 100, 'old.mp4', '1.2 MB')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let db = JobDb::new(&path).await.unwrap();
        let jobs = db.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].format_type, FormatType::Video);
        assert_eq!(jobs[0].quality, VideoQuality::Best);
        assert!(!jobs[0].is_local_file);
        assert!(jobs[0].file_size.is_none());
        assert!(jobs[0].completed_at.is_none());
    }

    #[tokio::test]
    async fn legacy_rows_with_nulls_still_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nullable.db");

        let opts = SqliteConnectOptions::new().filename(&path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url VARCHAR(512),
                title VARCHAR(256),
                platform VARCHAR(50),
                format_type VARCHAR(20),
                status VARCHAR(50),
                progress INTEGER,
                filename VARCHAR(256),
                file_size VARCHAR(50),
                error_message TEXT,
                created_at DATETIME,
                completed_at DATETIME
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO downloads (url) VALUES (NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO downloads (url, platform, status, progress, created_at, completed_at) VALUES ('https://youtu.be/frac', 'youtube', 'completed', 100, '2024-03-01 10:20:30.123456', '2024-03-01 10:25:00.5')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let db = JobDb::new(&path).await.unwrap();
        let jobs = db.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);

        let blank = jobs.iter().find(|j| j.url.is_empty()).unwrap();
        assert_eq!(blank.platform, Platform::Other);
        assert_eq!(blank.status, JobStatus::Pending);
        assert_eq!(blank.progress, 0);
        assert_eq!(blank.created_at.timestamp(), 0);

        let frac = jobs.iter().find(|j| j.url == "https://youtu.be/frac").unwrap();
        assert_eq!(frac.status, JobStatus::Completed);
        assert_eq!(
            frac.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-03-01 10:20:30"
        );
        assert!(frac.completed_at.is_some());
    }
}
