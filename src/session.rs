use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::search::Searchable;

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Snapshot of a searchable record taken when it was staged.
#[derive(Clone, Debug, PartialEq)]
pub struct StagedRecord {
    pub index: &'static str,
    pub id: i32,
    pub document: Map<String, Value>,
}

impl StagedRecord {
    fn of<T: Searchable>(record: &T) -> Self {
        Self {
            index: T::INDEX,
            id: record.search_id(),
            document: record.search_document(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<StagedRecord>,
    pub updated: Vec<StagedRecord>,
    pub deleted: Vec<StagedRecord>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Runs after a session's transaction has been committed.
#[async_trait]
pub trait CommitHook: Send + Sync {
    async fn after_commit(&self, changes: &ChangeSet) -> Result<(), HookError>;
}

#[derive(Clone, Default)]
pub struct CommitHooks(Vec<Arc<dyn CommitHook>>);

impl CommitHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn CommitHook>) {
        self.0.push(hook);
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("commit failed: {0}")]
    Db(#[from] DbErr),
    #[error("post-commit hook failed: {0}")]
    Hook(HookError),
}

/// One unit of work: a database transaction plus the searchable records
/// it touched. Dropping a session without committing rolls it back and
/// fires no hooks.
pub struct Session {
    txn: DatabaseTransaction,
    changes: ChangeSet,
}

impl Session {
    pub async fn begin(db: &DatabaseConnection) -> Result<Self, DbErr> {
        Ok(Self {
            txn: db.begin().await?,
            changes: ChangeSet::default(),
        })
    }

    pub fn added<T: Searchable>(&mut self, record: &T) {
        self.changes.added.push(StagedRecord::of(record));
    }

    pub fn updated<T: Searchable>(&mut self, record: &T) {
        self.changes.updated.push(StagedRecord::of(record));
    }

    pub fn deleted<T: Searchable>(&mut self, record: &T) {
        self.changes.deleted.push(StagedRecord::of(record));
    }

    pub async fn commit(self, hooks: &CommitHooks) -> Result<(), CommitError> {
        let Session { txn, changes } = self;
        txn.commit().await?;
        for hook in &hooks.0 {
            hook.after_commit(&changes).await.map_err(CommitError::Hook)?;
        }
        Ok(())
    }
}

impl Deref for Session {
    type Target = DatabaseTransaction;

    fn deref(&self) -> &Self::Target {
        &self.txn
    }
}
