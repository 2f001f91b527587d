use enrollment_portal::workflows::notifications::{
    ClientDirectory, EmailError, StatusEmail, StatusMailer,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

const OUTBOX_CAPACITY: usize = 256;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) directory: Arc<ClientDirectory>,
}

/// Mailer that logs each status e-mail and keeps the most recent ones instead
/// of calling a mail provider.
#[derive(Default, Clone)]
pub(crate) struct OutboxMailer {
    sent: Arc<Mutex<VecDeque<StatusEmail>>>,
}

impl StatusMailer for OutboxMailer {
    fn send_status_email(&self, email: &StatusEmail) -> Result<(), EmailError> {
        info!(
            application_id = %email.application_id,
            to = %email.to,
            subject = %email.subject,
            "status e-mail queued in outbox"
        );
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        if sent.len() == OUTBOX_CAPACITY {
            sent.pop_front();
        }
        sent.push_back(email.clone());
        Ok(())
    }
}

impl OutboxMailer {
    pub(crate) fn sent(&self) -> Vec<StatusEmail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
