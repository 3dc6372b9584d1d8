//! Background jobs. The worker that runs them lives outside this service;
//! here we only enqueue, remember the job id as a task, and poll progress.

#[cfg(test)]
use std::collections::HashMap;

use async_trait::async_trait;
use log::{info, warn};
use redis::aio::MultiplexedConnection;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use thiserror::Error;
#[cfg(test)]
use tokio::sync::RwLock;

use crate::entity::task;

/// Prefix of the job function names understood by the worker.
const JOB_NAMESPACE: &str = "app.tasks.";

const QUEUE_KEY: &str = "rq:queue:default";
const JOB_KEY_PREFIX: &str = "rq:job:";
const JOB_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no such job: {0}")]
    NoSuchJob(String),
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("bad job meta: {0}")]
    Meta(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobStatus {
    pub meta: serde_json::Map<String, Value>,
}

impl JobStatus {
    pub fn progress(&self) -> i64 {
        self.meta.get("progress").and_then(Value::as_i64).unwrap_or(0)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns the id of the queued job.
    async fn enqueue(&self, job_name: &str, user_id: i32, args: Vec<Value>) -> Result<String, QueueError>;

    async fn fetch(&self, job_id: &str) -> Result<JobStatus, QueueError>;
}

/// Jobs live in Redis as hashes under `rq:job:<id>`; their ids are pushed
/// onto the default queue list where the worker pops them. The worker
/// writes progress into the `meta` field as a JSON object.
pub struct RedisJobQueue {
    client: redis::Client,
}

impl RedisJobQueue {
    pub fn new(url: &str) -> Result<Self, QueueError> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job_name: &str, user_id: i32, args: Vec<Value>) -> Result<String, QueueError> {
        let id = uuid::Uuid::new_v4().to_string();
        let key = format!("{}{}", JOB_KEY_PREFIX, id);
        let args = serde_json::to_string(&args)?;
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&key)
            .arg("func_name")
            .arg(job_name)
            .arg("user_id")
            .arg(user_id)
            .arg("args")
            .arg(args)
            .arg("status")
            .arg("queued")
            .arg("meta")
            .arg("{}")
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(JOB_TTL_SECS)
            .ignore()
            .cmd("RPUSH")
            .arg(QUEUE_KEY)
            .arg(&id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        info!("enqueued job {} ({}) for user {}", id, job_name, user_id);
        Ok(id)
    }

    async fn fetch(&self, job_id: &str) -> Result<JobStatus, QueueError> {
        let mut conn = self.connection().await?;
        let meta: Option<String> = redis::cmd("HGET")
            .arg(format!("{}{}", JOB_KEY_PREFIX, job_id))
            .arg("meta")
            .query_async(&mut conn)
            .await?;
        let meta = meta.ok_or_else(|| QueueError::NoSuchJob(job_id.to_string()))?;
        Ok(JobStatus {
            meta: serde_json::from_str(&meta)?,
        })
    }
}

#[cfg(test)]
#[derive(Clone, Debug)]
pub struct QueuedJob {
    pub name: String,
    pub user_id: i32,
    pub args: Vec<Value>,
    pub status: JobStatus,
}

/// In-process queue. Tests play the worker through
/// [`LocalJobQueue::report_progress`].
#[cfg(test)]
#[derive(Default)]
pub struct LocalJobQueue {
    jobs: RwLock<HashMap<String, QueuedJob>>,
}

#[cfg(test)]
impl LocalJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn report_progress(&self, job_id: &str, progress: i64) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::NoSuchJob(job_id.to_string()))?;
        job.status.meta.insert("progress".to_string(), Value::from(progress));
        Ok(())
    }

    pub async fn job(&self, job_id: &str) -> Option<QueuedJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn jobs_named(&self, name: &str) -> Vec<QueuedJob> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.name == name)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn enqueue(&self, job_name: &str, user_id: i32, args: Vec<Value>) -> Result<String, QueueError> {
        let id = uuid::Uuid::new_v4().to_string();
        info!("enqueued job {} ({}) for user {}", id, job_name, user_id);
        self.jobs.write().await.insert(
            id.clone(),
            QueuedJob {
                name: job_name.to_string(),
                user_id,
                args,
                status: JobStatus::default(),
            },
        );
        Ok(id)
    }

    async fn fetch(&self, job_id: &str) -> Result<JobStatus, QueueError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|job| job.status.clone())
            .ok_or_else(|| QueueError::NoSuchJob(job_id.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Enqueues `app.tasks.<name>` on behalf of `user_id`.
pub async fn enqueue_job(
    queue: &dyn JobQueue,
    name: &str,
    user_id: i32,
    args: Vec<Value>,
) -> Result<String, QueueError> {
    queue.enqueue(&format!("{}{}", JOB_NAMESPACE, name), user_id, args).await
}

/// Enqueues the job and records it as a task of the user.
pub async fn launch_task<C: ConnectionTrait>(
    db: &C,
    queue: &dyn JobQueue,
    user_id: i32,
    name: &str,
    description: Option<String>,
    args: Vec<Value>,
) -> Result<task::Model, TaskError> {
    let job_id = enqueue_job(queue, name, user_id, args).await?;
    let task = task::ActiveModel {
        id: Set(job_id),
        name: Set(name.to_string()),
        description: Set(description),
        user_id: Set(user_id),
        complete: Set(false),
    }
    .insert(db)
    .await?;
    Ok(task)
}

pub async fn get_tasks_in_progress<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<Vec<task::Model>, DbErr> {
    task::Entity::find()
        .filter(task::Column::UserId.eq(user_id))
        .filter(task::Column::Complete.eq(false))
        .all(db)
        .await
}

pub async fn get_task_in_progress<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    name: &str,
) -> Result<Option<task::Model>, DbErr> {
    task::Entity::find()
        .filter(task::Column::UserId.eq(user_id))
        .filter(task::Column::Name.eq(name))
        .filter(task::Column::Complete.eq(false))
        .one(db)
        .await
}

/// Queue failures read as "no job", which counts as finished.
pub async fn fetch_job(queue: &dyn JobQueue, task: &task::Model) -> Option<JobStatus> {
    match queue.fetch(&task.id).await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("task {} has no job: {}", task.id, e);
            None
        }
    }
}

pub async fn get_progress(queue: &dyn JobQueue, task: &task::Model) -> i64 {
    fetch_job(queue, task).await.map(|job| job.progress()).unwrap_or(100)
}

/// Reads the task's progress and marks it complete once it reaches 100.
pub async fn settle_task<C: ConnectionTrait>(
    db: &C,
    queue: &dyn JobQueue,
    task: &mut task::Model,
) -> Result<i64, DbErr> {
    let progress = get_progress(queue, task).await;
    if progress >= 100 && !task.complete {
        task::ActiveModel {
            id: Set(task.id.clone()),
            complete: Set(true),
            ..Default::default()
        }
        .update(db)
        .await?;
        task.complete = true;
        info!("task {} ({}) finished", task.id, task.name);
    }
    Ok(progress)
}
