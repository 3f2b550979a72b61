//! Outbound mail seam. Delivery transports are out of scope; the in-process
//! implementation emits structured log events and tests capture sends.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// A rendered outbound email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail transport seam. Sends are best-effort; failures never bubble into
/// the business operation that triggered them.
pub trait Mailer: Send + Sync {
    fn send(&self, mail: OutboundEmail);
}

/// Logs each send instead of delivering it.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, mail: OutboundEmail) {
        info!(to = %mail.to, subject = %mail.subject, "Outbound email");
    }
}

/// Captures sends for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().clone()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, mail: OutboundEmail) {
        self.sent.lock().push(mail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_mailer() {
        let mailer = RecordingMailer::new();
        mailer.send(OutboundEmail {
            to: "a@acme.test".into(),
            subject: "Welcome".into(),
            body: "Hello".into(),
        });
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@acme.test");
    }
}
