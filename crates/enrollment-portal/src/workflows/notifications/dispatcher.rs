use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::directory::{ClientDirectory, DeliveryFailure};
use super::email::{EmailComposer, EmailError, StatusMailer};
use super::events::StatusEvent;
use crate::workflows::enrollment::AppliedTransition;

const MAX_TURN_WAIT: Duration = Duration::from_secs(30);

/// Converts committed transitions into real-time events and status e-mails.
pub struct NotificationDispatcher<M> {
    directory: Arc<ClientDirectory>,
    mailer: Arc<M>,
    composer: EmailComposer,
    sequencer: Arc<EmailSequencer>,
}

/// Hands out send turns so blocking-pool e-mail tasks reach the mailer in the
/// order they were queued.
#[derive(Debug, Default)]
struct EmailSequencer {
    issued: AtomicU64,
    serving: Mutex<u64>,
    turn: Condvar,
}

impl EmailSequencer {
    fn ticket(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst)
    }

    /// Waits for earlier tickets to finish. A ticket whose task never ran
    /// (runtime shutdown) is skipped after `MAX_TURN_WAIT`.
    fn run_in_turn<T>(&self, ticket: u64, work: impl FnOnce() -> T) -> T {
        let serving = self.serving.lock().unwrap_or_else(PoisonError::into_inner);
        let (serving, _) = self
            .turn
            .wait_timeout_while(serving, MAX_TURN_WAIT, |serving| *serving < ticket)
            .unwrap_or_else(PoisonError::into_inner);
        drop(serving);

        let _release = TurnRelease {
            sequencer: self,
            ticket,
        };
        work()
    }
}

/// Advances the turn even if the mailer panics.
struct TurnRelease<'a> {
    sequencer: &'a EmailSequencer,
    ticket: u64,
}

impl Drop for TurnRelease<'_> {
    fn drop(&mut self) {
        let mut serving = self
            .sequencer
            .serving
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *serving = (*serving).max(self.ticket + 1);
        self.sequencer.turn.notify_all();
    }
}

/// Outcome of the real-time fan-out plus the pending e-mail side effect.
#[derive(Debug)]
pub struct DispatchReceipt {
    pub delivered: usize,
    pub dropped: usize,
    pub email: EmailDelivery,
}

/// E-mail side effect, either running on the blocking pool or already done.
#[derive(Debug)]
pub enum EmailDelivery {
    Queued(JoinHandle<Result<(), EmailError>>),
    Finished(Result<(), EmailError>),
}

impl EmailDelivery {
    /// Wait for the e-mail attempt to settle. Failures were already logged.
    pub async fn outcome(self) -> Result<(), EmailError> {
        match self {
            EmailDelivery::Queued(task) => task.await.unwrap_or(Err(EmailError::Aborted)),
            EmailDelivery::Finished(result) => result,
        }
    }
}

impl<M> NotificationDispatcher<M>
where
    M: StatusMailer + 'static,
{
    pub fn new(directory: Arc<ClientDirectory>, mailer: Arc<M>, composer: EmailComposer) -> Self {
        Self {
            directory,
            mailer,
            composer,
            sequencer: Arc::default(),
        }
    }

    pub fn directory(&self) -> &Arc<ClientDirectory> {
        &self.directory
    }

    /// Push the event to every connection registered for the application and
    /// fire the status e-mail. Neither path blocks on a client or the mail API.
    pub fn notify(&self, transition: &AppliedTransition) -> DispatchReceipt {
        let application_id = transition.application_id;
        let event = StatusEvent::from(transition);

        let mut delivered = 0;
        let mut dropped = 0;
        for handle in self.directory.lookup(application_id) {
            match handle.try_deliver(event.clone()) {
                Ok(()) => delivered += 1,
                Err(failure) => {
                    dropped += 1;
                    warn!(
                        application_id = %application_id,
                        connection = %handle.id(),
                        %failure,
                        "status event not delivered"
                    );
                    if failure == DeliveryFailure::Disconnected {
                        self.directory.deregister(handle.id());
                    }
                }
            }
        }

        if delivered == 0 && dropped == 0 {
            debug!(application_id = %application_id, "no live connection for application");
        }

        let email = self.send_email(transition);

        DispatchReceipt {
            delivered,
            dropped,
            email,
        }
    }

    fn send_email(&self, transition: &AppliedTransition) -> EmailDelivery {
        let message = self.composer.compose(transition);
        let mailer = Arc::clone(&self.mailer);
        let deliver = move || {
            let result = mailer.send_status_email(&message);
            if let Err(err) = &result {
                warn!(
                    application_id = %message.application_id,
                    to = %message.to,
                    error = %err,
                    "status e-mail failed"
                );
            }
            result
        };

        match Handle::try_current() {
            Ok(runtime) => {
                let sequencer = Arc::clone(&self.sequencer);
                let ticket = sequencer.ticket();
                EmailDelivery::Queued(
                    runtime.spawn_blocking(move || sequencer.run_in_turn(ticket, deliver)),
                )
            }
            Err(_) => EmailDelivery::Finished(deliver()),
        }
    }
}
