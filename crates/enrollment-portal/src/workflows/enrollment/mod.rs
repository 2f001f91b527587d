//! Enrollment intake, review state machine, and HTTP surface.

pub mod domain;
pub mod intake;
pub mod repository;
pub mod router;
pub mod service;
pub mod transition;

#[cfg(test)]
mod tests;

pub use domain::{
    Application, ApplicationDraft, ApplicationId, ApplicationStatus, ApplicationView,
    Credentials, DocumentKind, DocumentReference, EnrollmentSubmission, GradeLevel, PasswordHash,
    StudentName,
};
pub use intake::{IntakeGuard, IntakeViolation};
pub use repository::{
    ApplicationFilter, ApplicationStore, MemoryApplicationStore, RepositoryError, StatusUpdate,
};
pub use router::{enrollment_router, StatusChangeRequest, StatusChangeResponse};
pub use service::{EnrollmentService, ServiceError, StatusChange};
pub use transition::{AppliedTransition, TransitionEngine, TransitionError, TransitionKind};
