use chrono::{DateTime, Utc};

use super::domain::{
    ApplicationDraft, Credentials, EnrollmentSubmission, GradeLevel, PasswordHash, StudentName,
};

pub const MAX_DOCUMENTS: usize = 4;
const MIN_PASSWORD_LEN: usize = 8;
const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=32;
const PHONE_DIGITS: std::ops::RangeInclusive<usize> = 7..=15;

/// Validation errors raised while accepting an enrollment submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeViolation {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("'{0}' is not a valid e-mail address")]
    InvalidEmail(String),
    #[error("phone number must contain between 7 and 15 digits")]
    InvalidPhone,
    #[error("birthdate cannot be in the future")]
    BirthdateInFuture,
    #[error("at most {max} documents may be attached (found {found})")]
    TooManyDocuments { max: usize, found: usize },
    #[error("document {index} has no storage path")]
    MissingDocumentPath { index: usize },
    #[error("username must be 3-32 characters of letters, digits, '.', '_' or '-'")]
    InvalidUsername,
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },
}

/// Turns raw form submissions into store-ready drafts.
#[derive(Debug, Clone, Default)]
pub struct IntakeGuard;

impl IntakeGuard {
    pub fn new() -> Self {
        Self
    }

    pub fn draft_from_submission(
        &self,
        submission: EnrollmentSubmission,
        now: DateTime<Utc>,
    ) -> Result<ApplicationDraft, IntakeViolation> {
        let first = required(&submission.first_name, "first name")?;
        let last = required(&submission.last_name, "last name")?;
        let middle = submission
            .middle_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let email = required(&submission.email, "email")?;
        validate_email(&email)?;

        let phone = required(&submission.phone, "phone")?;
        let digits = phone.chars().filter(char::is_ascii_digit).count();
        let allowed = phone
            .chars()
            .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | '-' | '(' | ')' | '.' | ' '));
        if !allowed || !PHONE_DIGITS.contains(&digits) {
            return Err(IntakeViolation::InvalidPhone);
        }

        if submission.birthdate > now.date_naive() {
            return Err(IntakeViolation::BirthdateInFuture);
        }

        let grade_level = required(&submission.grade_level, "grade level")?;

        if submission.documents.len() > MAX_DOCUMENTS {
            return Err(IntakeViolation::TooManyDocuments {
                max: MAX_DOCUMENTS,
                found: submission.documents.len(),
            });
        }
        if let Some(index) = submission
            .documents
            .iter()
            .position(|document| document.path.trim().is_empty())
        {
            return Err(IntakeViolation::MissingDocumentPath { index });
        }

        let username = submission.username.trim().to_string();
        let username_ok = USERNAME_LEN.contains(&username.chars().count())
            && username
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));
        if !username_ok {
            return Err(IntakeViolation::InvalidUsername);
        }

        if submission.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(IntakeViolation::WeakPassword {
                min: MIN_PASSWORD_LEN,
            });
        }

        Ok(ApplicationDraft {
            name: StudentName {
                first,
                middle,
                last,
            },
            email,
            phone,
            birthdate: submission.birthdate,
            grade_level: GradeLevel::new(grade_level),
            documents: submission.documents,
            credentials: Credentials {
                username,
                password_hash: hash_password(&submission.password),
            },
            submitted_at: now,
        })
    }
}

fn required(value: &str, field: &'static str) -> Result<String, IntakeViolation> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(IntakeViolation::MissingField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

fn validate_email(email: &str) -> Result<(), IntakeViolation> {
    let invalid = || IntakeViolation::InvalidEmail(email.to_string());
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    let domain_ok = !domain.contains('@')
        && domain
            .split('.')
            .filter(|label| !label.is_empty())
            .count()
            >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    Ok(())
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> PasswordHash {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    PasswordHash(format!("{salt}${}", digest(&salt, password).to_hex()))
}

/// Check a candidate password against a stored `salt$hex` digest.
pub fn verify_password(hash: &PasswordHash, candidate: &str) -> bool {
    let Some((salt, expected)) = hash.0.split_once('$') else {
        return false;
    };
    match blake3::Hash::from_hex(expected) {
        // `blake3::Hash` equality is constant-time.
        Ok(expected) => digest(salt, candidate) == expected,
        Err(_) => false,
    }
}

fn digest(salt: &str, password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(password.as_bytes());
    hasher.finalize()
}
