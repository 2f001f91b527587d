//! Status state machine for enrollment applications.
//!
//! Transitions for one application id are linearized through a per-id lock and
//! committed with a compare-and-set on the stored status, so a second request
//! always validates against the first one's result. Different ids never share
//! a lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::domain::{Application, ApplicationId, ApplicationStatus, GradeLevel, StudentName};
use super::repository::{ApplicationStore, RepositoryError, StatusUpdate};

const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Which path requested the change. Re-enrollment is the only way back to review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionKind {
    Review,
    Reenrollment { grade_level: GradeLevel },
}

/// Whether `from -> to` is permitted for the given kind of request.
pub fn is_allowed(from: ApplicationStatus, to: ApplicationStatus, kind: &TransitionKind) -> bool {
    use ApplicationStatus::*;

    match kind {
        TransitionKind::Review => matches!((from, to), (PendingReview, Approved | Rejected)),
        TransitionKind::Reenrollment { .. } => matches!((from, to), (Approved, PendingReview)),
    }
}

/// Committed status change together with what the notification side needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedTransition {
    pub application_id: ApplicationId,
    pub previous_status: ApplicationStatus,
    pub new_status: ApplicationStatus,
    pub student: StudentName,
    pub recipient: String,
    pub grade_level: GradeLevel,
    pub enrollment_cycle: u32,
    pub applied_at: DateTime<Utc>,
}

impl AppliedTransition {
    fn from_committed(previous_status: ApplicationStatus, record: Application) -> Self {
        Self {
            application_id: record.id,
            previous_status,
            new_status: record.status,
            student: record.name,
            recipient: record.email,
            grade_level: record.grade_level,
            enrollment_cycle: record.enrollment_cycle,
            applied_at: record.updated_at,
        }
    }

    pub fn is_reenrollment(&self) -> bool {
        self.previous_status == ApplicationStatus::Approved
            && self.new_status == ApplicationStatus::PendingReview
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("application {0} was not found")]
    NotFound(ApplicationId),
    #[error("application {id} is already {status}")]
    NoChange {
        id: ApplicationId,
        status: ApplicationStatus,
    },
    #[error("application {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ApplicationId,
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    #[error("application {id} is already enrolled for {grade_level}")]
    SameGradeLevel {
        id: ApplicationId,
        grade_level: GradeLevel,
    },
    #[error("application store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("application {0} kept changing underneath the update; retry")]
    Contention(ApplicationId),
}

impl TransitionError {
    /// Failures where repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransitionError::StoreUnavailable(_) | TransitionError::Contention(_)
        )
    }
}

impl From<RepositoryError> for TransitionError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Unavailable(reason) => TransitionError::StoreUnavailable(reason),
            other => TransitionError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Per-id mutexes, dropped from the table once no caller holds them.
#[derive(Debug, Default)]
struct StatusLocks {
    table: Mutex<HashMap<ApplicationId, Arc<Mutex<()>>>>,
}

impl StatusLocks {
    fn with_lock<T>(&self, id: ApplicationId, work: impl FnOnce() -> T) -> T {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entry(id).or_default().clone()
        };

        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            work()
        };

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table plus ours means nobody else is queued.
        if Arc::strong_count(&slot) == 2 {
            table.remove(&id);
        }
        result
    }

    fn held(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Validates and commits status changes against an [`ApplicationStore`].
pub struct TransitionEngine<S> {
    store: Arc<S>,
    locks: StatusLocks,
}

impl<S> TransitionEngine<S>
where
    S: ApplicationStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: StatusLocks::default(),
        }
    }

    /// Apply an admin review decision.
    pub fn transition(
        &self,
        id: ApplicationId,
        requested: ApplicationStatus,
    ) -> Result<AppliedTransition, TransitionError> {
        self.apply(id, requested, TransitionKind::Review)
    }

    /// Reopen an approved application for a new grade-level cycle.
    pub fn reenroll(
        &self,
        id: ApplicationId,
        grade_level: GradeLevel,
    ) -> Result<AppliedTransition, TransitionError> {
        self.apply(
            id,
            ApplicationStatus::PendingReview,
            TransitionKind::Reenrollment { grade_level },
        )
    }

    pub fn apply(
        &self,
        id: ApplicationId,
        requested: ApplicationStatus,
        kind: TransitionKind,
    ) -> Result<AppliedTransition, TransitionError> {
        self.apply_then(id, requested, kind, |_| ())
            .map(|(applied, ())| applied)
    }

    /// Like [`apply`](Self::apply), but runs `on_commit` before the per-id lock
    /// is released. Side effects started there are ordered per application the
    /// same way the commits are. `on_commit` must not wait on I/O.
    pub fn apply_then<R>(
        &self,
        id: ApplicationId,
        requested: ApplicationStatus,
        kind: TransitionKind,
        on_commit: impl FnOnce(&AppliedTransition) -> R,
    ) -> Result<(AppliedTransition, R), TransitionError> {
        self.locks.with_lock(id, || {
            let applied = self.apply_locked(id, requested, &kind)?;
            let followup = on_commit(&applied);
            Ok((applied, followup))
        })
    }

    fn apply_locked(
        &self,
        id: ApplicationId,
        requested: ApplicationStatus,
        kind: &TransitionKind,
    ) -> Result<AppliedTransition, TransitionError> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let current = self
                .store
                .get(id)?
                .ok_or(TransitionError::NotFound(id))?;

            let update = validate(&current, requested, kind)?;
            let previous = current.status;

            match self.store.update_status(id, previous, update) {
                Ok(committed) => {
                    let applied = AppliedTransition::from_committed(previous, committed);
                    info!(
                        application_id = %id,
                        from = previous.as_str(),
                        to = applied.new_status.as_str(),
                        cycle = applied.enrollment_cycle,
                        "application status committed"
                    );
                    return Ok(applied);
                }
                Err(RepositoryError::StatusMismatch { current }) => {
                    debug!(
                        application_id = %id,
                        attempt,
                        observed = current.as_str(),
                        "status changed outside the engine; revalidating"
                    );
                }
                Err(RepositoryError::NotFound) => return Err(TransitionError::NotFound(id)),
                Err(other) => return Err(other.into()),
            }
        }

        Err(TransitionError::Contention(id))
    }

    /// Number of ids with a transition in flight.
    pub fn in_flight(&self) -> usize {
        self.locks.held()
    }
}

fn validate(
    current: &Application,
    requested: ApplicationStatus,
    kind: &TransitionKind,
) -> Result<StatusUpdate, TransitionError> {
    let id = current.id;
    let from = current.status;

    if from == requested {
        return Err(TransitionError::NoChange {
            id,
            status: requested,
        });
    }

    if !is_allowed(from, requested, kind) {
        return Err(TransitionError::InvalidTransition {
            id,
            from,
            to: requested,
        });
    }

    let new_cycle = match kind {
        TransitionKind::Review => None,
        TransitionKind::Reenrollment { grade_level } => {
            if grade_level.same_level(&current.grade_level) {
                return Err(TransitionError::SameGradeLevel {
                    id,
                    grade_level: current.grade_level.clone(),
                });
            }
            Some(grade_level.clone())
        }
    };

    Ok(StatusUpdate {
        status: requested,
        new_cycle,
        updated_at: Utc::now(),
    })
}
