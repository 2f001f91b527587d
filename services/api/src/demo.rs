use crate::infra::OutboxMailer;
use chrono::NaiveDate;
use clap::Args;
use enrollment_portal::config::{EmailConfig, NotificationConfig};
use enrollment_portal::error::AppError;
use enrollment_portal::workflows::enrollment::{
    ApplicationStatus, EnrollmentService, EnrollmentSubmission, GradeLevel,
    MemoryApplicationStore, ServiceError, StatusChange,
};
use enrollment_portal::workflows::notifications::{ClientDirectory, EmailComposer, Subscription};
use std::sync::Arc;

type DemoService = EnrollmentService<MemoryApplicationStore, OutboxMailer>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// School name used in the status e-mails.
    #[arg(long, default_value = "Enrollment Office")]
    pub(crate) school_name: String,
    /// Grade level for the sample application.
    #[arg(long, default_value = "Grade 7")]
    pub(crate) grade_level: String,
    /// Grade level requested when the approved student re-enrolls.
    #[arg(long, default_value = "Grade 8")]
    pub(crate) next_grade_level: String,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            school_name: "Enrollment Office".to_string(),
            grade_level: "Grade 7".to_string(),
            next_grade_level: "Grade 8".to_string(),
        }
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let directory = Arc::new(ClientDirectory::new(NotificationConfig::default()));
    let outbox = OutboxMailer::default();
    let service: Arc<DemoService> = Arc::new(EnrollmentService::new(
        Arc::new(MemoryApplicationStore::new()),
        Arc::new(outbox.clone()),
        directory.clone(),
        EmailComposer::new(&EmailConfig {
            school_name: args.school_name.clone(),
            ..EmailConfig::default()
        }),
    ));

    println!("=== Enrollment Status Notification Demo ===");

    let student = service.submit(sample_submission("ana.lucero", &args.grade_level))?;
    println!(
        "Submitted application {} for {} ({}), status {}",
        student.id,
        student.name.full(),
        student.grade_level,
        student.status
    );

    let mut dashboard = directory.subscribe();
    let mut second_tab = directory.subscribe();
    dashboard.register(student.id);
    second_tab.register(student.id);
    println!(
        "Registered {} live connections for application {}",
        directory.connections_for(student.id),
        student.id
    );

    println!("\n-- Admin approves the application --");
    let change = service.change_status(student.id, ApplicationStatus::Approved)?;
    settle(change).await;
    print_received("dashboard", &mut dashboard);
    print_received("second tab", &mut second_tab);

    println!("\n-- Admin approves it again --");
    let change = service.change_status(student.id, ApplicationStatus::Approved)?;
    settle(change).await;
    print_received("dashboard", &mut dashboard);

    println!("\n-- A rejected application cannot be approved --");
    let sibling = service.submit(sample_submission("ben.lucero", &args.grade_level))?;
    let change = service.change_status(sibling.id, ApplicationStatus::Rejected)?;
    settle(change).await;
    match service.change_status(sibling.id, ApplicationStatus::Approved) {
        Ok(change) => settle(change).await,
        Err(err @ ServiceError::Transition(_)) => println!("refused: {err}"),
        Err(other) => return Err(other.into()),
    }

    println!("\n-- Approved student re-enrolls for the next grade --");
    let change = service.reenroll(student.id, GradeLevel::new(&args.next_grade_level))?;
    settle(change).await;
    print_received("dashboard", &mut dashboard);

    let current = service.get(student.id)?;
    println!(
        "Application {} is now {} in cycle {} ({})",
        current.id, current.status, current.enrollment_cycle, current.grade_level
    );

    println!("\nOutbox:");
    for email in outbox.sent() {
        println!("- to {}: {}", email.to, email.subject);
    }

    directory.shutdown();
    Ok(())
}

async fn settle(change: StatusChange) {
    println!("{}", change.message());
    if let StatusChange::Applied { receipt, .. } = change {
        println!(
            "pushed to {} connection(s), {} dropped",
            receipt.delivered, receipt.dropped
        );
        if let Err(err) = receipt.email.outcome().await {
            println!("e-mail failed: {err}");
        }
    }
}

fn print_received(label: &str, subscription: &mut Subscription) {
    let mut received = 0;
    while let Some(event) = subscription.try_next() {
        received += 1;
        println!(
            "{label} received statusUpdated for {}: {} -> {}",
            event.application_id, event.previous_status, event.new_status
        );
    }
    if received == 0 {
        println!("{label} received nothing");
    }
}

fn sample_submission(username: &str, grade_level: &str) -> EnrollmentSubmission {
    EnrollmentSubmission {
        first_name: "Ana".to_string(),
        middle_name: Some("Marie".to_string()),
        last_name: "Lucero".to_string(),
        email: format!("{username}@families.example.org"),
        phone: "+1 (402) 555-0117".to_string(),
        birthdate: NaiveDate::from_ymd_opt(2012, 9, 3).unwrap_or_default(),
        grade_level: grade_level.to_string(),
        documents: Vec::new(),
        username: username.to_string(),
        password: "paper-lantern-77".to_string(),
    }
}
