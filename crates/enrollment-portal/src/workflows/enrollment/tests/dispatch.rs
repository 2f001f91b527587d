use super::common::*;
use std::sync::Arc;

use crate::workflows::enrollment::domain::{ApplicationId, ApplicationStatus};
use crate::workflows::enrollment::StatusChange;
use crate::workflows::notifications::{
    EmailComposer, EmailDelivery, EmailError, NotificationDispatcher, StatusEmail, StatusMailer,
};

fn applied(change: StatusChange) -> crate::workflows::notifications::DispatchReceipt {
    match change {
        StatusChange::Applied { receipt, .. } => receipt,
        other => panic!("expected applied change, got {other:?}"),
    }
}

#[tokio::test]
async fn every_registered_connection_gets_exactly_one_event() {
    let harness = harness();
    let application = harness.submit("maya");
    let mut first_tab = harness.directory.subscribe();
    let mut second_tab = harness.directory.subscribe();
    first_tab.register(application.id);
    second_tab.register(application.id);

    let receipt = applied(
        harness
            .service
            .change_status(application.id, ApplicationStatus::Approved)
            .expect("approval applies"),
    );
    assert_eq!(receipt.delivered, 2);
    assert_eq!(receipt.dropped, 0);
    receipt.email.outcome().await.expect("email sent");

    for tab in [&mut first_tab, &mut second_tab] {
        let event = tab.try_next().expect("event queued");
        assert_eq!(event.application_id, application.id);
        assert_eq!(event.previous_status, ApplicationStatus::PendingReview);
        assert_eq!(event.new_status, ApplicationStatus::Approved);
        assert!(tab.try_next().is_none(), "exactly one event per connection");
    }
}

#[tokio::test]
async fn deregistered_connection_receives_nothing() {
    let harness = harness();
    let application = harness.submit("leo");
    let mut closed_tab = harness.directory.subscribe();
    let mut open_tab = harness.directory.subscribe();
    closed_tab.register(application.id);
    open_tab.register(application.id);

    harness.directory.deregister(closed_tab.id());

    let receipt = applied(
        harness
            .service
            .change_status(application.id, ApplicationStatus::Rejected)
            .expect("rejection applies"),
    );

    assert_eq!(receipt.delivered, 1);
    assert!(closed_tab.try_next().is_none());
    let event = open_tab.next_event().await.expect("open tab notified");
    assert_eq!(event.new_status, ApplicationStatus::Rejected);
}

#[tokio::test]
async fn email_is_sent_even_without_live_connections() {
    let harness = harness();
    let application = harness.submit("ana");

    let receipt = applied(
        harness
            .service
            .change_status(application.id, ApplicationStatus::Approved)
            .expect("approval applies"),
    );
    assert_eq!(receipt.delivered, 0);
    receipt.email.outcome().await.expect("email sent");

    let sent = harness.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "maya.parent@example.com");
    assert_eq!(sent[0].application_id, application.id);
    assert_eq!(sent[0].new_status, ApplicationStatus::Approved);
}

#[tokio::test]
async fn email_failure_leaves_commit_and_push_intact() {
    let store = Arc::new(crate::workflows::enrollment::MemoryApplicationStore::new());
    let directory = directory();
    let service = crate::workflows::enrollment::EnrollmentService::new(
        store.clone(),
        Arc::new(FailingMailer),
        directory.clone(),
        EmailComposer::default(),
    );
    let application = service.submit(submission("kai")).expect("submitted");
    let mut tab = directory.subscribe();
    tab.register(application.id);

    let change = service
        .change_status(application.id, ApplicationStatus::Approved)
        .expect("status still changes");
    assert!(change.is_applied());
    let receipt = applied(change);

    assert!(matches!(
        receipt.email.outcome().await,
        Err(EmailError::Transport(_))
    ));
    assert!(tab.try_next().is_some());
    assert_eq!(
        service.get(application.id).expect("stored").status,
        ApplicationStatus::Approved
    );
}

#[tokio::test]
async fn full_queue_drops_only_for_that_connection() {
    let harness = harness();
    let first = harness.submit("ivy");
    let mut slow_tab = harness.directory.subscribe();
    let mut fast_tab = harness.directory.subscribe();
    slow_tab.register(first.id);
    fast_tab.register(first.id);

    // Fill the slow tab's queue (capacity 4) with unrelated traffic.
    for index in 0..4 {
        let other = harness.submit(&format!("filler{index}"));
        slow_tab.register(other.id);
        harness
            .service
            .change_status(other.id, ApplicationStatus::Approved)
            .expect("filler approved");
    }
    slow_tab.register(first.id);
    while fast_tab.try_next().is_some() {}

    let receipt = applied(
        harness
            .service
            .change_status(first.id, ApplicationStatus::Approved)
            .expect("approval applies"),
    );

    assert_eq!(receipt.delivered, 1);
    assert_eq!(receipt.dropped, 1);
    assert_eq!(
        fast_tab.try_next().map(|event| event.application_id),
        Some(first.id)
    );
    let mut backlog = 0;
    while slow_tab.try_next().is_some() {
        backlog += 1;
    }
    assert_eq!(backlog, 4, "the overflowing event was dropped, not queued");
}

#[tokio::test]
async fn vanished_receiver_is_pruned_from_directory() {
    let harness = harness();
    let application = harness.submit("omar");
    let tab = harness.directory.subscribe();
    let orphan = tab.handle().clone();
    drop(tab);
    harness.directory.register(application.id, &orphan);
    assert_eq!(harness.directory.connections_for(application.id), 1);

    let receipt = applied(
        harness
            .service
            .change_status(application.id, ApplicationStatus::Approved)
            .expect("approval applies"),
    );

    assert_eq!(receipt.delivered, 0);
    assert_eq!(receipt.dropped, 1);
    assert_eq!(harness.directory.entry_count(), 0);
}

#[tokio::test]
async fn no_change_sends_neither_event_nor_email() {
    let harness = harness();
    let application = harness.submit("noor");
    let mut tab = harness.directory.subscribe();
    tab.register(application.id);

    let first = applied(
        harness
            .service
            .change_status(application.id, ApplicationStatus::Approved)
            .expect("approval applies"),
    );
    first.email.outcome().await.expect("email sent");
    tab.try_next().expect("first event");

    let repeat = harness
        .service
        .change_status(application.id, ApplicationStatus::Approved)
        .expect("repeat is a no-op");

    assert!(matches!(repeat, StatusChange::Unchanged { .. }));
    assert!(tab.try_next().is_none());
    assert_eq!(harness.mailer.sent().len(), 1);
}

#[test]
fn email_runs_inline_without_a_runtime() {
    let harness = harness();
    let application = harness.submit("sol");
    let dispatcher = NotificationDispatcher::new(
        harness.directory.clone(),
        harness.mailer.clone(),
        EmailComposer::default(),
    );
    let transition = crate::workflows::enrollment::TransitionEngine::new(harness.store.clone())
        .transition(application.id, ApplicationStatus::Approved)
        .expect("approval applies");

    let receipt = dispatcher.notify(&transition);

    assert!(matches!(receipt.email, EmailDelivery::Finished(Ok(()))));
    assert_eq!(harness.mailer.sent().len(), 1);
}

#[test]
fn racing_transitions_reach_clients_in_commit_order() {
    use crate::workflows::enrollment::domain::GradeLevel;
    use std::sync::Barrier;

    let harness = harness();

    for round in 0..300 {
        let application = harness.submit(&format!("racer{round}"));
        let id = application.id;
        let mut tab = harness.directory.subscribe();
        tab.register(id);
        let barrier = Arc::new(Barrier::new(2));

        let approve = {
            let service = harness.service.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                service
                    .change_status(id, ApplicationStatus::Approved)
                    .expect("approval applies")
            })
        };
        let reenroll = {
            let service = harness.service.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                loop {
                    let change = service
                        .reenroll(id, GradeLevel::new("Grade 9"))
                        .expect("re-enrollment request accepted");
                    if change.is_applied() {
                        break;
                    }
                    std::thread::yield_now();
                }
            })
        };
        approve.join().expect("approver finished");
        reenroll.join().expect("re-enroller finished");

        let stored = harness.service.get(id).expect("stored").status;
        assert_eq!(stored, ApplicationStatus::PendingReview);

        let mut events = Vec::new();
        while let Some(event) = tab.try_next() {
            events.push((event.previous_status, event.new_status));
        }
        assert_eq!(
            events,
            vec![
                (ApplicationStatus::PendingReview, ApplicationStatus::Approved),
                (ApplicationStatus::Approved, ApplicationStatus::PendingReview),
            ],
            "round {round}"
        );

        let last_email = harness
            .mailer
            .sent()
            .into_iter()
            .rev()
            .find(|email| email.application_id == id)
            .expect("e-mails recorded");
        assert_eq!(last_email.new_status, stored, "round {round}");
    }
}

/// Mailer where earlier applications take longer to send.
#[derive(Default)]
struct SlowEarlyMailer {
    order: std::sync::Mutex<Vec<ApplicationId>>,
}

impl StatusMailer for SlowEarlyMailer {
    fn send_status_email(&self, email: &StatusEmail) -> Result<(), EmailError> {
        let delay = 10u64.saturating_sub(email.application_id.0) * 5;
        std::thread::sleep(std::time::Duration::from_millis(delay));
        self.order
            .lock()
            .expect("mailer lock")
            .push(email.application_id);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_emails_reach_the_mailer_in_commit_order() {
    let mailer = Arc::new(SlowEarlyMailer::default());
    let service = crate::workflows::enrollment::EnrollmentService::new(
        Arc::new(crate::workflows::enrollment::MemoryApplicationStore::new()),
        mailer.clone(),
        directory(),
        EmailComposer::default(),
    );

    let mut receipts = Vec::new();
    let mut committed = Vec::new();
    for index in 0..8 {
        let application = service
            .submit(submission(&format!("sibling{index}")))
            .expect("submitted");
        receipts.push(applied(
            service
                .change_status(application.id, ApplicationStatus::Approved)
                .expect("approval applies"),
        ));
        committed.push(application.id);
    }

    for receipt in receipts {
        assert!(matches!(receipt.email, EmailDelivery::Queued(_)));
        receipt.email.outcome().await.expect("email sent");
    }

    assert_eq!(*mailer.order.lock().expect("mailer lock"), committed);
}
