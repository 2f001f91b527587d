use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier for an enrollment application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub u64);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Review status of an application within its current enrollment cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationStatus {
    #[serde(alias = "Pending Review", alias = "pending_review")]
    PendingReview,
    #[serde(alias = "approved")]
    Approved,
    #[serde(alias = "rejected")]
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 3] = [
        ApplicationStatus::PendingReview,
        ApplicationStatus::Approved,
        ApplicationStatus::Rejected,
    ];

    /// Wire name, matching the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::PendingReview => "PendingReview",
            ApplicationStatus::Approved => "Approved",
            ApplicationStatus::Rejected => "Rejected",
        }
    }

    /// Human-facing label used in messages and e-mails.
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::PendingReview => "Pending Review",
            ApplicationStatus::Approved => "Approved",
            ApplicationStatus::Rejected => "Rejected",
        }
    }

    /// Lenient parse accepting the wire name, the label, or snake case.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|ch| !matches!(ch, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "pendingreview" | "pending" => Some(Self::PendingReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ApplicationStatus::Rejected)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Grade level an application targets, e.g. "Grade 7".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GradeLevel(pub String);

impl GradeLevel {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison ignoring surrounding whitespace.
    pub fn same_level(&self, other: &GradeLevel) -> bool {
        self.0.trim().eq_ignore_ascii_case(other.0.trim())
    }
}

impl fmt::Display for GradeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentName {
    pub first: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle: Option<String>,
    pub last: String,
}

impl StudentName {
    pub fn full(&self) -> String {
        match self.middle.as_deref() {
            Some(middle) if !middle.is_empty() => {
                format!("{} {} {}", self.first, middle, self.last)
            }
            _ => format!("{} {}", self.first, self.last),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentKind {
    BirthCertificate,
    ReportCard,
    GoodMoralCertificate,
    IdPhoto,
}

/// Pointer to an uploaded document held by external file storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReference {
    pub kind: DocumentKind,
    pub path: String,
}

/// Salted password digest in `salt$hex` form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(pub String);

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub password_hash: PasswordHash,
}

/// Raw enrollment form payload as received from the public form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentSubmission {
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub birthdate: NaiveDate,
    pub grade_level: String,
    #[serde(default)]
    pub documents: Vec<DocumentReference>,
    pub username: String,
    pub password: String,
}

/// Validated application contents awaiting an id from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDraft {
    pub name: StudentName,
    pub email: String,
    pub phone: String,
    pub birthdate: NaiveDate,
    pub grade_level: GradeLevel,
    pub documents: Vec<DocumentReference>,
    pub credentials: Credentials,
    pub submitted_at: DateTime<Utc>,
}

/// Stored enrollment application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: ApplicationId,
    pub name: StudentName,
    pub email: String,
    pub phone: String,
    pub birthdate: NaiveDate,
    pub grade_level: GradeLevel,
    pub status: ApplicationStatus,
    pub enrollment_cycle: u32,
    pub documents: Vec<DocumentReference>,
    pub credentials: Credentials,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn from_draft(id: ApplicationId, draft: ApplicationDraft) -> Self {
        Self {
            id,
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            birthdate: draft.birthdate,
            grade_level: draft.grade_level,
            status: ApplicationStatus::PendingReview,
            enrollment_cycle: 1,
            documents: draft.documents,
            credentials: draft.credentials,
            created_at: draft.submitted_at,
            updated_at: draft.submitted_at,
        }
    }

    pub fn view(&self) -> ApplicationView {
        ApplicationView {
            application_id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            birthdate: self.birthdate,
            grade_level: self.grade_level.clone(),
            status: self.status,
            enrollment_cycle: self.enrollment_cycle,
            documents: self.documents.clone(),
            username: self.credentials.username.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Client-facing projection that omits the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    pub application_id: ApplicationId,
    pub name: StudentName,
    pub email: String,
    pub phone: String,
    pub birthdate: NaiveDate,
    pub grade_level: GradeLevel,
    pub status: ApplicationStatus,
    pub enrollment_cycle: u32,
    pub documents: Vec<DocumentReference>,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
