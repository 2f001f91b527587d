use std::sync::Arc;

use chrono::Utc;

use super::domain::{
    Application, ApplicationId, ApplicationStatus, EnrollmentSubmission, GradeLevel,
};
use super::intake::{verify_password, IntakeGuard, IntakeViolation};
use super::repository::{ApplicationFilter, ApplicationStore, RepositoryError};
use super::transition::{AppliedTransition, TransitionEngine, TransitionError, TransitionKind};
use crate::workflows::notifications::{
    ClientDirectory, DispatchReceipt, EmailComposer, NotificationDispatcher, StatusMailer,
};

/// Service composing intake validation, the store, the status state machine,
/// and the notification dispatcher.
pub struct EnrollmentService<S, M> {
    intake: IntakeGuard,
    store: Arc<S>,
    engine: TransitionEngine<S>,
    dispatcher: NotificationDispatcher<M>,
}

/// What a status-change request did.
#[derive(Debug)]
pub enum StatusChange {
    Applied {
        transition: AppliedTransition,
        receipt: DispatchReceipt,
    },
    /// The application already had the requested status; nothing was sent.
    Unchanged {
        application_id: ApplicationId,
        status: ApplicationStatus,
    },
}

impl StatusChange {
    pub fn is_applied(&self) -> bool {
        matches!(self, StatusChange::Applied { .. })
    }

    pub fn message(&self) -> String {
        match self {
            StatusChange::Applied { transition, .. } if transition.is_reenrollment() => format!(
                "Re-enrollment for application {} into {} is pending review",
                transition.application_id, transition.grade_level
            ),
            StatusChange::Applied { transition, .. } => format!(
                "Application {} status updated to {}",
                transition.application_id, transition.new_status
            ),
            StatusChange::Unchanged {
                application_id,
                status,
            } => format!("Application {application_id} is already {status}"),
        }
    }
}

impl<S, M> EnrollmentService<S, M>
where
    S: ApplicationStore + 'static,
    M: StatusMailer + 'static,
{
    pub fn new(
        store: Arc<S>,
        mailer: Arc<M>,
        directory: Arc<ClientDirectory>,
        composer: EmailComposer,
    ) -> Self {
        Self {
            intake: IntakeGuard::new(),
            engine: TransitionEngine::new(Arc::clone(&store)),
            dispatcher: NotificationDispatcher::new(directory, mailer, composer),
            store,
        }
    }

    pub fn directory(&self) -> &Arc<ClientDirectory> {
        self.dispatcher.directory()
    }

    /// Validate and store a new application in `PendingReview`.
    pub fn submit(&self, submission: EnrollmentSubmission) -> Result<Application, ServiceError> {
        let draft = self
            .intake
            .draft_from_submission(submission, Utc::now())?;
        let stored = self.store.insert(draft)?;
        tracing::info!(application_id = %stored.id, grade = %stored.grade_level, "enrollment application submitted");
        Ok(stored)
    }

    pub fn get(&self, application_id: ApplicationId) -> Result<Application, ServiceError> {
        self.store
            .get(application_id)?
            .ok_or(ServiceError::NotFound(application_id))
    }

    pub fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, ServiceError> {
        Ok(self.store.list(filter)?)
    }

    /// Verify student credentials for the dashboard.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Application, ServiceError> {
        match self.store.find_by_username(username.trim())? {
            Some(application)
                if verify_password(&application.credentials.password_hash, password) =>
            {
                Ok(application)
            }
            _ => Err(ServiceError::InvalidCredentials),
        }
    }

    /// Apply an admin decision and notify on success.
    pub fn change_status(
        &self,
        application_id: ApplicationId,
        requested: ApplicationStatus,
    ) -> Result<StatusChange, ServiceError> {
        let outcome = self.engine.apply_then(
            application_id,
            requested,
            TransitionKind::Review,
            |transition| self.dispatcher.notify(transition),
        );
        Self::finish(outcome)
    }

    /// Open a new cycle for an approved application and notify on success.
    pub fn reenroll(
        &self,
        application_id: ApplicationId,
        grade_level: GradeLevel,
    ) -> Result<StatusChange, ServiceError> {
        if grade_level.as_str().trim().is_empty() {
            return Err(ServiceError::Intake(IntakeViolation::MissingField(
                "grade level",
            )));
        }
        let outcome = self.engine.apply_then(
            application_id,
            ApplicationStatus::PendingReview,
            TransitionKind::Reenrollment { grade_level },
            |transition| self.dispatcher.notify(transition),
        );
        Self::finish(outcome)
    }

    /// The dispatch already ran under the engine's per-id lock, so events
    /// and e-mails for one application go out in commit order.
    fn finish(
        outcome: Result<(AppliedTransition, DispatchReceipt), TransitionError>,
    ) -> Result<StatusChange, ServiceError> {
        match outcome {
            Ok((transition, receipt)) => Ok(StatusChange::Applied {
                transition,
                receipt,
            }),
            Err(TransitionError::NoChange { id, status }) => Ok(StatusChange::Unchanged {
                application_id: id,
                status,
            }),
            Err(TransitionError::NotFound(id)) => Err(ServiceError::NotFound(id)),
            Err(other) => Err(ServiceError::Transition(other)),
        }
    }
}

/// Error raised by the enrollment service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Intake(#[from] IntakeViolation),
    #[error("application {0} was not found")]
    NotFound(ApplicationId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Transition(TransitionError),
    #[error("invalid username or password")]
    InvalidCredentials,
}
