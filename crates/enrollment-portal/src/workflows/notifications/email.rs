use serde::Serialize;

use crate::config::EmailConfig;
use crate::workflows::enrollment::{AppliedTransition, ApplicationId, ApplicationStatus};

/// Rendered status e-mail ready for a transactional mail API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub application_id: ApplicationId,
    pub new_status: ApplicationStatus,
}

/// Outbound e-mail hook (transactional mail API, SMTP relay, test outbox).
pub trait StatusMailer: Send + Sync {
    fn send_status_email(&self, email: &StatusEmail) -> Result<(), EmailError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmailError {
    #[error("mail provider rejected the message: {0}")]
    Rejected(String),
    #[error("mail transport unavailable: {0}")]
    Transport(String),
    #[error("mail task stopped before completion")]
    Aborted,
}

/// Renders the e-mail that accompanies a committed transition.
#[derive(Debug, Clone)]
pub struct EmailComposer {
    from: String,
    school_name: String,
}

impl EmailComposer {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            from: config.from_address.clone(),
            school_name: config.school_name.clone(),
        }
    }

    pub fn compose(&self, transition: &AppliedTransition) -> StatusEmail {
        let student = transition.student.full();
        let id = transition.application_id;
        let grade = &transition.grade_level;
        let school = &self.school_name;

        let (subject, summary) = match transition.new_status {
            ApplicationStatus::Approved => (
                format!("{school}: enrollment application #{id} approved"),
                format!(
                    "Congratulations! The enrollment application for {student} ({grade}) has been approved."
                ),
            ),
            ApplicationStatus::Rejected => (
                format!("{school}: enrollment application #{id} update"),
                format!(
                    "After review, the enrollment application for {student} ({grade}) was not approved. \
                     Please contact the registrar if you have questions."
                ),
            ),
            ApplicationStatus::PendingReview if transition.is_reenrollment() => (
                format!("{school}: re-enrollment request #{id} received"),
                format!(
                    "We received the re-enrollment request for {student} into {grade}. \
                     It is now pending review."
                ),
            ),
            ApplicationStatus::PendingReview => (
                format!("{school}: enrollment application #{id} pending review"),
                format!("The enrollment application for {student} ({grade}) is pending review."),
            ),
        };

        let body = format!(
            "Dear {first},\n\n{summary}\n\nApplication number: {id}\nCurrent status: {status}\n\n{school}",
            first = transition.student.first,
            status = transition.new_status.label(),
        );

        StatusEmail {
            from: self.from.clone(),
            to: transition.recipient.clone(),
            subject,
            body,
            application_id: id,
            new_status: transition.new_status,
        }
    }
}

impl Default for EmailComposer {
    fn default() -> Self {
        Self::new(&EmailConfig::default())
    }
}
