use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use crate::config::NotificationConfig;
use crate::workflows::enrollment::domain::{
    Application, ApplicationDraft, ApplicationId, ApplicationStatus, DocumentKind,
    DocumentReference, EnrollmentSubmission,
};
use crate::workflows::enrollment::repository::{
    ApplicationFilter, ApplicationStore, MemoryApplicationStore, RepositoryError, StatusUpdate,
};
use crate::workflows::enrollment::EnrollmentService;
use crate::workflows::notifications::{
    ClientDirectory, EmailComposer, EmailError, StatusEmail, StatusMailer,
};

pub(super) fn submission(username: &str) -> EnrollmentSubmission {
    EnrollmentSubmission {
        first_name: "Maya".to_string(),
        middle_name: Some("Reyes".to_string()),
        last_name: "Santos".to_string(),
        email: "maya.parent@example.com".to_string(),
        phone: "+1 (515) 555-0142".to_string(),
        birthdate: NaiveDate::from_ymd_opt(2012, 4, 18).expect("valid date"),
        grade_level: "Grade 7".to_string(),
        documents: vec![
            DocumentReference {
                kind: DocumentKind::BirthCertificate,
                path: "uploads/maya/birth-certificate.pdf".to_string(),
            },
            DocumentReference {
                kind: DocumentKind::ReportCard,
                path: "uploads/maya/report-card.pdf".to_string(),
            },
        ],
        username: username.to_string(),
        password: "correct-horse-42".to_string(),
    }
}

#[derive(Default)]
pub(super) struct RecordingMailer {
    sent: Mutex<Vec<StatusEmail>>,
}

impl RecordingMailer {
    pub(super) fn sent(&self) -> Vec<StatusEmail> {
        self.sent.lock().expect("mailer lock").clone()
    }
}

impl StatusMailer for RecordingMailer {
    fn send_status_email(&self, email: &StatusEmail) -> Result<(), EmailError> {
        self.sent.lock().expect("mailer lock").push(email.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct FailingMailer;

impl StatusMailer for FailingMailer {
    fn send_status_email(&self, _email: &StatusEmail) -> Result<(), EmailError> {
        Err(EmailError::Transport("smtp relay refused connection".to_string()))
    }
}

/// Store whose every operation fails.
pub(super) struct UnavailableStore;

impl ApplicationStore for UnavailableStore {
    fn insert(&self, _draft: ApplicationDraft) -> Result<Application, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn get(&self, _id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn find_by_username(&self, _username: &str) -> Result<Option<Application>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update_status(
        &self,
        _id: ApplicationId,
        _expected: ApplicationStatus,
        _update: StatusUpdate,
    ) -> Result<Application, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list(&self, _filter: &ApplicationFilter) -> Result<Vec<Application>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

/// Reads succeed but the status write fails.
#[derive(Default)]
pub(super) struct ReadOnlyStore {
    pub(super) inner: MemoryApplicationStore,
}

impl ApplicationStore for ReadOnlyStore {
    fn insert(&self, draft: ApplicationDraft) -> Result<Application, RepositoryError> {
        self.inner.insert(draft)
    }

    fn get(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        self.inner.get(id)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<Application>, RepositoryError> {
        self.inner.find_by_username(username)
    }

    fn update_status(
        &self,
        _id: ApplicationId,
        _expected: ApplicationStatus,
        _update: StatusUpdate,
    ) -> Result<Application, RepositoryError> {
        Err(RepositoryError::Unavailable("write timeout".to_string()))
    }

    fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, RepositoryError> {
        self.inner.list(filter)
    }
}

pub(super) fn directory() -> Arc<ClientDirectory> {
    Arc::new(ClientDirectory::new(NotificationConfig {
        connection_buffer: 4,
    }))
}

pub(super) type MemoryService = EnrollmentService<MemoryApplicationStore, RecordingMailer>;

pub(super) struct Harness {
    pub(super) store: Arc<MemoryApplicationStore>,
    pub(super) mailer: Arc<RecordingMailer>,
    pub(super) directory: Arc<ClientDirectory>,
    pub(super) service: Arc<MemoryService>,
}

pub(super) fn harness() -> Harness {
    let store = Arc::new(MemoryApplicationStore::new());
    let mailer = Arc::new(RecordingMailer::default());
    let directory = directory();
    let service = Arc::new(EnrollmentService::new(
        store.clone(),
        mailer.clone(),
        directory.clone(),
        EmailComposer::default(),
    ));
    Harness {
        store,
        mailer,
        directory,
        service,
    }
}

impl Harness {
    pub(super) fn submit(&self, username: &str) -> Application {
        self.service
            .submit(submission(username))
            .expect("submission accepted")
    }
}
