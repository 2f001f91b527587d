use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::domain::{Application, ApplicationDraft, ApplicationId, ApplicationStatus, GradeLevel};

/// Status write applied by the transition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ApplicationStatus,
    /// New grade level when the update opens a new enrollment cycle.
    pub new_cycle: Option<GradeLevel>,
    pub updated_at: DateTime<Utc>,
}

/// Optional criteria for listing applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
    pub grade_level: Option<GradeLevel>,
}

impl ApplicationFilter {
    pub fn matches(&self, application: &Application) -> bool {
        let status_ok = self
            .status
            .map_or(true, |status| application.status == status);
        let grade_ok = self
            .grade_level
            .as_ref()
            .map_or(true, |grade| application.grade_level.same_level(grade));
        status_ok && grade_ok
    }
}

/// Durable record of applications, keyed by application id.
///
/// Calls are synchronous and may block. The transition engine makes them while
/// holding a per-application `std::sync::Mutex`, so async callers run status
/// changes on the blocking pool (`tokio::task::spawn_blocking`), as the HTTP
/// handlers do.
pub trait ApplicationStore: Send + Sync {
    fn insert(&self, draft: ApplicationDraft) -> Result<Application, RepositoryError>;
    fn get(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError>;
    fn find_by_username(&self, username: &str) -> Result<Option<Application>, RepositoryError>;
    /// Atomically writes `update` only if the stored status still equals `expected`.
    fn update_status(
        &self,
        id: ApplicationId,
        expected: ApplicationStatus,
        update: StatusUpdate,
    ) -> Result<Application, RepositoryError>;
    fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, RepositoryError>;
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("username is already registered")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stored status is {current}")]
    StatusMismatch { current: ApplicationStatus },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    records: BTreeMap<ApplicationId, Application>,
}

/// Process-local store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryApplicationStore {
    state: Mutex<MemoryState>,
}

impl MemoryApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ApplicationStore for MemoryApplicationStore {
    fn insert(&self, draft: ApplicationDraft) -> Result<Application, RepositoryError> {
        let mut state = self.lock();
        let taken = state.records.values().any(|existing| {
            existing
                .credentials
                .username
                .eq_ignore_ascii_case(&draft.credentials.username)
        });
        if taken {
            return Err(RepositoryError::Conflict);
        }

        state.next_id += 1;
        let id = ApplicationId(state.next_id);
        let application = Application::from_draft(id, draft);
        state.records.insert(id, application.clone());
        Ok(application)
    }

    fn get(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Ok(self.lock().records.get(&id).cloned())
    }

    fn find_by_username(&self, username: &str) -> Result<Option<Application>, RepositoryError> {
        Ok(self
            .lock()
            .records
            .values()
            .find(|record| record.credentials.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    fn update_status(
        &self,
        id: ApplicationId,
        expected: ApplicationStatus,
        update: StatusUpdate,
    ) -> Result<Application, RepositoryError> {
        let mut state = self.lock();
        let record = state
            .records
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;

        if record.status != expected {
            return Err(RepositoryError::StatusMismatch {
                current: record.status,
            });
        }

        record.status = update.status;
        record.updated_at = update.updated_at;
        if let Some(grade_level) = update.new_cycle {
            record.grade_level = grade_level;
            record.enrollment_cycle += 1;
        }
        Ok(record.clone())
    }

    fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, RepositoryError> {
        Ok(self
            .lock()
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }
}
