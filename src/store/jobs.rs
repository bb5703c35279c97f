use super::Store;
use crate::error::{CoreError, CoreResult};
use crate::models::{Job, JobParameters, JobPriority, JobStatus, JobType};
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

fn priority_str(p: JobPriority) -> &'static str {
    match p {
        JobPriority::Low => "LOW",
        JobPriority::Normal => "NORMAL",
        JobPriority::High => "HIGH",
    }
}

fn parse_priority(s: &str) -> JobPriority {
    match s {
        "HIGH" => JobPriority::High,
        "LOW" => JobPriority::Low,
        _ => JobPriority::Normal,
    }
}

fn status_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Pending => "PENDING",
        JobStatus::Running => "RUNNING",
        JobStatus::Completed => "COMPLETED",
        JobStatus::Failed => "FAILED",
    }
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "RUNNING" => JobStatus::Running,
        "COMPLETED" => JobStatus::Completed,
        "FAILED" => JobStatus::Failed,
        _ => JobStatus::Pending,
    }
}

impl Store {
    /// Inserts the job; if `dedup_key` collides with a non-terminal job
    /// (enforced by a partial unique index), returns that job's id instead
    /// of creating a duplicate.
    pub async fn enqueue(&self, job: Job) -> CoreResult<Uuid> {
        let insert = sqlx::query(
            "INSERT INTO jobs
             (id, job_type, status, priority, parameters, created_at, scheduled_for,
              retry_count, max_retries, dedup_key)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.job_type.to_string())
        .bind(status_str(job.status))
        .bind(priority_str(job.priority))
        .bind(serde_json::to_string(&job.parameters)?)
        .bind(Utc::now())
        .bind(job.scheduled_for)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(&job.dedup_key)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok(job.id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let key = job
                    .dedup_key
                    .as_deref()
                    .ok_or_else(|| CoreError::Internal("unique violation without dedup key".into()))?;
                let existing: (String,) = sqlx::query_as(
                    "SELECT id FROM jobs WHERE dedup_key = ? AND status IN ('PENDING', 'RUNNING')",
                )
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
                Uuid::parse_str(&existing.0).map_err(|e| CoreError::Internal(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn enqueue_many(&self, jobs: Vec<Job>) -> CoreResult<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(self.enqueue(job).await?);
        }
        Ok(ids)
    }

    /// Atomically claims the highest-priority, oldest pullable job and marks
    /// it RUNNING. At-most-one-worker-per-job because the UPDATE...RETURNING
    /// is a single statement against SQLite's serialized writer.
    pub async fn pull_next(&self) -> CoreResult<Option<Job>> {
        let now = Utc::now();
        let row = sqlx::query(
            "UPDATE jobs
             SET status = 'RUNNING', started_at = ?1
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status = 'PENDING' AND scheduled_for <= ?1
                 ORDER BY CASE priority WHEN 'HIGH' THEN 0 WHEN 'NORMAL' THEN 1 ELSE 2 END ASC,
                          created_at ASC
                 LIMIT 1
             )
             RETURNING *",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    pub async fn complete(&self, id: Uuid, result: Option<serde_json::Value>) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'COMPLETED', completed_at = ?, result = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(result.map(|v| v.to_string()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies the retry-with-backoff policy: PENDING with bumped retry
    /// count and pushed `scheduled_for` while under budget, else FAILED.
    pub async fn fail_or_retry(&self, id: Uuid, error_message: &str) -> CoreResult<()> {
        let job = self.get_job(id).await?;
        if job.retry_count < job.max_retries {
            let delay = Job::next_retry_delay(job.retry_count);
            sqlx::query(
                "UPDATE jobs SET status = 'PENDING', retry_count = retry_count + 1,
                 error_message = ?, scheduled_for = ? WHERE id = ?",
            )
            .bind(error_message)
            .bind(Utc::now() + delay)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE jobs SET status = 'FAILED', completed_at = ?, error_message = ? WHERE id = ?",
            )
            .bind(Utc::now())
            .bind(error_message)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Releases a job interrupted by shutdown (rate limiter or HTTP client
    /// cancellation) back to PENDING a second out, without touching its
    /// retry budget — cancellation isn't the job's fault, so it shouldn't
    /// spend a retry the way an ordinary failure does.
    pub async fn release_for_cancellation(&self, id: Uuid, error_message: &str) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'PENDING', started_at = NULL,
             error_message = ?, scheduled_for = ? WHERE id = ?",
        )
        .bind(error_message)
        .bind(Utc::now() + chrono::Duration::seconds(1))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Called once, after the shutdown grace period elapses: anything still
    /// RUNNING didn't finish in time, so hand it back to PENDING instead of
    /// leaving it stranded until the reaper's next interval (which, by then,
    /// belongs to a different process anyway). Same uncounted reschedule as
    /// `release_for_cancellation`.
    pub async fn release_running_for_shutdown(&self) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'PENDING', started_at = NULL, scheduled_for = ?
             WHERE status = 'RUNNING'",
        )
        .bind(Utc::now() + chrono::Duration::seconds(1))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_job(&self, id: Uuid) -> CoreResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;
        row_to_job(row)
    }

    pub async fn job_stats(&self) -> CoreResult<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            out.insert(status, n);
        }
        Ok(out)
    }

    /// Returns RUNNING jobs whose `started_at` predates `now - max_age` to
    /// PENDING. A worker that died mid-job doesn't hold the job forever.
    pub async fn reap_stuck_jobs(&self, max_age: chrono::Duration) -> CoreResult<u64> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query(
            "UPDATE jobs SET status = 'PENDING', started_at = NULL, scheduled_for = ?
             WHERE status = 'RUNNING' AND started_at <= ?",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deletes terminal (COMPLETED or FAILED) jobs whose `completed_at`
    /// predates the cutoff, bounding table growth for a long-running queue.
    pub async fn purge_terminal_jobs_older_than(&self, max_age: chrono::Duration) -> CoreResult<u64> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('COMPLETED', 'FAILED') AND completed_at <= ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> CoreResult<Job> {
    let id: String = row.try_get("id")?;
    let parameters: String = row.try_get("parameters")?;
    let priority: String = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    let result: Option<String> = row.try_get("result")?;
    let parameters: JobParameters = serde_json::from_str(&parameters)?;

    Ok(Job {
        id: Uuid::parse_str(&id).map_err(|e| CoreError::Internal(e.to_string()))?,
        job_type: parameters.job_type(),
        status: parse_status(&status),
        priority: parse_priority(&priority),
        parameters,
        scheduled_for: row.try_get::<DateTime<Utc>, _>("scheduled_for")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        error_message: row.try_get("error_message")?,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        dedup_key: row.try_get("dedup_key")?,
    })
}

// JobType already implements Display in models.rs; Store uses .to_string() above.
impl std::str::FromStr for JobType {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "POLL" => JobType::Poll,
            "INGEST" => JobType::Ingest,
            "DIFF" => JobType::Diff,
            "ALERT_FANOUT" => JobType::AlertFanout,
            "DELIVER" => JobType::Deliver,
            "PRICE_REFRESH" => JobType::PriceRefresh,
            "CLEANUP" => JobType::Cleanup,
            other => return Err(CoreError::Internal(format!("unknown job type {other}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobParameters;

    #[tokio::test]
    async fn dedup_key_collapses_non_terminal_duplicates() {
        let store = Store::in_memory().await.unwrap();
        let params = JobParameters::Poll { cik: "0000320193".into() };
        let job1 = Job::new(params.clone(), JobPriority::Normal).with_dedup_key("poll:320193:t1");
        let job2 = Job::new(params, JobPriority::Normal).with_dedup_key("poll:320193:t1");

        let id1 = store.enqueue(job1).await.unwrap();
        let id2 = store.enqueue(job2).await.unwrap();
        assert_eq!(id1, id2);

        let stats = store.job_stats().await.unwrap();
        assert_eq!(stats.get("PENDING").copied().unwrap_or(0), 1);
    }

    #[tokio::test]
    async fn pull_next_respects_priority_then_age() {
        let store = Store::in_memory().await.unwrap();
        let low = Job::new(
            JobParameters::Poll { cik: "1".into() },
            JobPriority::Low,
        );
        let high = Job::new(
            JobParameters::Poll { cik: "2".into() },
            JobPriority::High,
        );
        store.enqueue(low).await.unwrap();
        let high_id = store.enqueue(high).await.unwrap();

        let pulled = store.pull_next().await.unwrap().unwrap();
        assert_eq!(pulled.id, high_id);
        assert_eq!(pulled.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn retry_then_exhaust_marks_failed() {
        let store = Store::in_memory().await.unwrap();
        let mut job = Job::new(JobParameters::Cleanup, JobPriority::Normal);
        job.max_retries = 1;
        let id = store.enqueue(job).await.unwrap();
        store.pull_next().await.unwrap();

        store.fail_or_retry(id, "boom").await.unwrap();
        let j = store.get_job(id).await.unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.retry_count, 1);

        store.fail_or_retry(id, "boom again").await.unwrap();
        let j = store.get_job(id).await.unwrap();
        assert_eq!(j.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn release_for_cancellation_does_not_spend_a_retry() {
        let store = Store::in_memory().await.unwrap();
        let mut job = Job::new(JobParameters::Cleanup, JobPriority::Normal);
        job.max_retries = 1;
        let id = store.enqueue(job).await.unwrap();
        store.pull_next().await.unwrap();

        store.release_for_cancellation(id, "aborted: shutting down").await.unwrap();
        let j = store.get_job(id).await.unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.retry_count, 0, "cancellation must not consume retry budget");
        assert!(j.scheduled_for > Utc::now());

        // Can still exhaust the real retry budget afterwards.
        store.pull_next().await.unwrap();
        store.fail_or_retry(id, "boom").await.unwrap();
        let j = store.get_job(id).await.unwrap();
        assert_eq!(j.retry_count, 1);
    }

    #[tokio::test]
    async fn release_running_for_shutdown_reclaims_only_running_jobs() {
        let store = Store::in_memory().await.unwrap();
        let running = Job::new(JobParameters::Cleanup, JobPriority::Normal);
        let running_id = store.enqueue(running).await.unwrap();
        store.pull_next().await.unwrap();

        let pending = Job::new(JobParameters::Cleanup, JobPriority::Low);
        let pending_id = store.enqueue(pending).await.unwrap();

        let released = store.release_running_for_shutdown().await.unwrap();
        assert_eq!(released, 1);

        let j = store.get_job(running_id).await.unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.retry_count, 0);

        let untouched = store.get_job(pending_id).await.unwrap();
        assert_eq!(untouched.status, JobStatus::Pending);
    }
}
