//! Async operation poller
//!
//! Providers answer long-running calls with a job id. The helpers here poll
//! the job until it is terminal and pull the created resource ids out of it.

use crate::error::{CloudError, Result, ResultExt};
use crate::poll::PollConfig;
use crate::waiter::wait_until;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Job status. Only `Running` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = std::convert::Infallible;

    /// Provider vocabularies differ; anything that is neither a success nor a
    /// failure marker counts as still running (`INIT`, `RUNNING`, `PENDING`...)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let status = match s.to_ascii_uppercase().as_str() {
            "SUCCESS" | "SUCCEEDED" | "DONE" => JobStatus::Success,
            "FAIL" | "FAILED" | "ERROR" => JobStatus::Failed,
            _ => JobStatus::Running,
        };
        Ok(status)
    }
}

/// A provider job and its nested sub-jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncJob {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub entities: HashMap<String, String>,
    #[serde(default)]
    pub sub_jobs: Vec<AsyncJob>,
    #[serde(default)]
    pub fail_reason: Option<String>,
}

impl AsyncJob {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            entities: HashMap::new(),
            sub_jobs: Vec::new(),
            fail_reason: None,
        }
    }

    pub fn with_entity(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entities.insert(key.into(), value.into());
        self
    }

    pub fn with_sub_job(mut self, job: AsyncJob) -> Self {
        self.sub_jobs.push(job);
        self
    }

    pub fn with_fail_reason(mut self, reason: impl Into<String>) -> Self {
        self.fail_reason = Some(reason.into());
        self
    }

    /// Parse a provider job document.
    ///
    /// Sub-jobs are accepted both at the top level and nested inside
    /// `entities.sub_jobs`. Scalar entity values are stringified; other
    /// nested values are ignored.
    pub fn from_provider_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CloudError::ApiError(format!("job document is not an object: {}", value)))?;

        let job_id = obj
            .get("job_id")
            .and_then(scalar_to_string)
            .unwrap_or_default();
        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<JobStatus>().ok())
            .unwrap_or(JobStatus::Running);
        let fail_reason = obj
            .get("fail_reason")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let mut entities = HashMap::new();
        let mut sub_jobs = Vec::new();
        if let Some(map) = obj.get("entities").and_then(Value::as_object) {
            for (key, value) in map {
                if key == "sub_jobs" {
                    sub_jobs.extend(parse_sub_jobs(value)?);
                } else if let Some(text) = scalar_to_string(value) {
                    entities.insert(key.clone(), text);
                }
            }
        }
        if let Some(value) = obj.get("sub_jobs") {
            sub_jobs.extend(parse_sub_jobs(value)?);
        }

        Ok(Self {
            job_id,
            status,
            entities,
            sub_jobs,
            fail_reason,
        })
    }

    fn failure(&self) -> CloudError {
        CloudError::JobFailed {
            job_id: self.job_id.clone(),
            reason: self
                .fail_reason
                .clone()
                .unwrap_or_else(|| "no reason reported".to_string()),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_sub_jobs(value: &Value) -> Result<Vec<AsyncJob>> {
    match value {
        Value::Array(items) => items.iter().map(AsyncJob::from_provider_json).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(CloudError::ApiError(format!(
            "sub_jobs is not a list: {}",
            other
        ))),
    }
}

/// Job status lookup, implemented by providers
#[async_trait]
pub trait JobClient: Send + Sync {
    async fn get_task_status(&self, service_type: &str, job_id: &str) -> Result<AsyncJob>;
}

/// Poll a job until it reaches `target`.
///
/// A job reporting `Failed` ends the wait with `JobFailed` carrying the
/// provider's reason. Lookup errors are not retried.
pub async fn wait_task_status<J>(
    jobs: &J,
    service_type: &str,
    job_id: &str,
    target: JobStatus,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<AsyncJob>
where
    J: JobClient + ?Sized,
{
    let finished = OnceLock::new();
    let what = format!("job {} -> {}", job_id, target);
    let finished_ref = &finished;

    wait_until(poll, cancel, &what, move || async move {
        let job = jobs
            .get_task_status(service_type, job_id)
            .await
            .with_context(|| format!("GetTaskStatus({})", job_id))?;

        tracing::debug!("job {} status {}", job_id, job.status);
        if job.status == target {
            let _ = finished_ref.set(job);
            return Ok(true);
        }
        if job.status == JobStatus::Failed {
            return Err(job.failure());
        }
        Ok(false)
    })
    .await?;

    finished
        .into_inner()
        .ok_or_else(|| CloudError::AmbiguousResult(format!("job {} finished without a result", job_id)))
}

/// Run `submit`, then wait for the job it returns to reach `target`
pub async fn submit_and_await<J, F, Fut>(
    jobs: &J,
    service_type: &str,
    submit: F,
    target: JobStatus,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<AsyncJob>
where
    J: JobClient + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let job_id = submit().await.context("SubmitJob")?;
    tracing::info!("Submitted {} job {}", service_type, job_id);
    wait_task_status(jobs, service_type, &job_id, target, poll, cancel).await
}

/// Values of `key` in the job's own entities
pub fn task_entity_ids(job: &AsyncJob, key: &str) -> Vec<String> {
    job.entities.get(key).cloned().into_iter().collect()
}

/// Values of `key` across all sub-jobs of a batch job.
///
/// A failed sub-job fails the whole extraction.
pub fn all_sub_task_entity_ids(job: &AsyncJob, key: &str) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for sub in &job.sub_jobs {
        match sub.status {
            JobStatus::Failed => {
                return Err(sub.failure().context(format!("batch job {}", job.job_id)));
            }
            JobStatus::Success => ids.extend(sub.entities.get(key).cloned()),
            JobStatus::Running => {
                tracing::warn!("sub-job {} of {} still running", sub.job_id, job.job_id);
            }
        }
    }
    Ok(ids)
}

/// Exactly one id or an `AmbiguousResult` error
pub fn single_entity_id(ids: Vec<String>, what: &str) -> Result<String> {
    let mut ids = ids;
    match ids.len() {
        1 => Ok(ids.remove(0)),
        0 => Err(CloudError::AmbiguousResult(format!("no {} found", what))),
        n => Err(CloudError::AmbiguousResult(format!(
            "expected one {}, found {}: {}",
            what,
            n,
            ids.join(",")
        ))),
    }
}

/// Wait for a job to succeed and return the single `key` entity it created.
///
/// Batch jobs are read through their sub-jobs; plain jobs through their own
/// entities.
pub async fn await_entity_id<J>(
    jobs: &J,
    service_type: &str,
    job_id: &str,
    key: &str,
    poll: &PollConfig,
    cancel: &CancellationToken,
) -> Result<String>
where
    J: JobClient + ?Sized,
{
    let job = wait_task_status(jobs, service_type, job_id, JobStatus::Success, poll, cancel).await?;
    let ids = if job.sub_jobs.is_empty() {
        task_entity_ids(&job, key)
    } else {
        all_sub_task_entity_ids(&job, key)?
    };
    single_entity_id(ids, key).with_context(|| format!("job {}", job_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    struct ScriptedJobs {
        script: Mutex<Vec<Result<AsyncJob>>>,
        calls: AtomicUsize,
    }

    impl ScriptedJobs {
        /// The last entry repeats forever
        fn new(script: Vec<Result<AsyncJob>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobClient for ScriptedJobs {
        async fn get_task_status(&self, _service_type: &str, _job_id: &str) -> Result<AsyncJob> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                return script.remove(0);
            }
            match &script[0] {
                Ok(job) => Ok(job.clone()),
                Err(e) => Err(CloudError::ApiError(e.to_string())),
            }
        }
    }

    fn poll() -> PollConfig {
        PollConfig::new(Duration::from_secs(15), Duration::from_secs(900))
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_task_status_success() {
        let jobs = ScriptedJobs::new(vec![
            Ok(AsyncJob::new("job-1", JobStatus::Running)),
            Ok(AsyncJob::new("job-1", JobStatus::Success).with_entity("image_id", "img-1")),
        ]);
        let cancel = CancellationToken::new();

        let job = wait_task_status(&jobs, "ecs", "job-1", JobStatus::Success, &poll(), &cancel)
            .await
            .unwrap();
        assert_eq!(job.entities["image_id"], "img-1");
        assert_eq!(jobs.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_that_never_finishes_times_out() {
        let jobs = ScriptedJobs::new(vec![Ok(AsyncJob::new("job-1", JobStatus::Running))]);
        let cancel = CancellationToken::new();
        let poll = PollConfig::new(Duration::from_secs(15), Duration::from_secs(60));
        let started = Instant::now();

        let err = wait_task_status(&jobs, "ecs", "job-1", JobStatus::Success, &poll, &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed <= Duration::from_secs(75));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_carries_reason() {
        let jobs = ScriptedJobs::new(vec![Ok(
            AsyncJob::new("job-1", JobStatus::Failed).with_fail_reason("quota exceeded")
        )]);
        let cancel = CancellationToken::new();

        let err = wait_task_status(&jobs, "ecs", "job-1", JobStatus::Success, &poll(), &cancel)
            .await
            .unwrap_err();

        match err {
            CloudError::JobFailed { job_id, reason } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(reason, "quota exceeded");
            }
            other => panic!("Expected JobFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_errors_are_not_retried() {
        let jobs = ScriptedJobs::new(vec![Err(CloudError::Transient("reset".to_string()))]);
        let cancel = CancellationToken::new();

        let err = wait_task_status(&jobs, "ecs", "job-1", JobStatus::Success, &poll(), &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("GetTaskStatus(job-1)"));
        assert_eq!(jobs.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_and_await() {
        let jobs = ScriptedJobs::new(vec![Ok(AsyncJob::new("job-9", JobStatus::Success))]);
        let cancel = CancellationToken::new();

        let job = submit_and_await(
            &jobs,
            "ecs",
            || async { Ok("job-9".to_string()) },
            JobStatus::Success,
            &poll(),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(job.job_id, "job-9");
    }

    #[test]
    fn test_single_entity_id_rejects_ambiguity() {
        assert_eq!(
            single_entity_id(vec!["vm-1".to_string()], "server_id").unwrap(),
            "vm-1"
        );

        let none = single_entity_id(Vec::new(), "server_id").unwrap_err();
        assert_eq!(none.kind(), ErrorKind::AmbiguousResult);

        let many =
            single_entity_id(vec!["vm-1".to_string(), "vm-2".to_string()], "server_id").unwrap_err();
        assert_eq!(many.kind(), ErrorKind::AmbiguousResult);
    }

    #[test]
    fn test_failed_sub_job_fails_extraction() {
        let job = AsyncJob::new("batch", JobStatus::Success)
            .with_sub_job(AsyncJob::new("s1", JobStatus::Success).with_entity("server_id", "vm-1"))
            .with_sub_job(AsyncJob::new("s2", JobStatus::Failed).with_fail_reason("no capacity"));

        let err = all_sub_task_entity_ids(&job, "server_id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JobFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_entity_id_reads_sub_jobs() {
        let job = AsyncJob::new("batch", JobStatus::Success)
            .with_sub_job(AsyncJob::new("s1", JobStatus::Success).with_entity("server_id", "vm-1"));
        let jobs = ScriptedJobs::new(vec![Ok(job)]);
        let cancel = CancellationToken::new();

        let id = await_entity_id(&jobs, "ecs", "batch", "server_id", &poll(), &cancel)
            .await
            .unwrap();
        assert_eq!(id, "vm-1");
    }

    #[test]
    fn test_from_provider_json() {
        let doc = json!({
            "job_id": "ff80808",
            "status": "SUCCESS",
            "entities": {
                "sub_jobs": [
                    {"status": "SUCCESS", "entities": {"server_id": "vm-1"}},
                    {"status": "INIT", "entities": {}}
                ]
            },
            "fail_reason": null
        });

        let job = AsyncJob::from_provider_json(&doc).unwrap();
        assert_eq!(job.job_id, "ff80808");
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.sub_jobs.len(), 2);
        assert_eq!(job.sub_jobs[1].status, JobStatus::Running);
        assert_eq!(job.fail_reason, None);
        assert_eq!(
            all_sub_task_entity_ids(&job, "server_id").unwrap(),
            vec!["vm-1".to_string()]
        );
    }
}
