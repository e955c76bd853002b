use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{escape_html, Candidate, Metrics, ScoutError};

/// The chat session as seen from the pipeline.
///
/// The session owns the subscriber set; the notifier only reads it.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn current_subscribers(&self) -> Vec<String>;

    async fn send(&self, subscriber: &str, message: &Message) -> Result<(), ScoutError>;
}

/// A message with a plain body and an HTML body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub plain: String,
    pub html: String,
}

impl Message {
    /// Announcement for a found screenshot.
    ///
    /// The URL sits on its own line of the plain body so clients can preview
    /// it; the HTML body links the candidate to it.
    pub fn announcement(candidate: &Candidate, url: &str) -> Self {
        Self {
            plain: format!("Screenshot found at {candidate}\n{url}"),
            html: format!(
                "Screenshot found at <a href=\"{}\">{}</a>",
                escape_html(url),
                escape_html(candidate.as_str())
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

pub struct Notifier {
    transport: Arc<dyn ChatTransport>,
    metrics: Arc<Metrics>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn ChatTransport>, metrics: Arc<Metrics>) -> Self {
        Self { transport, metrics }
    }

    /// Send the announcement once to every current subscriber.
    ///
    /// Each delivery stands alone: a failing subscriber is logged and the
    /// rest still get the message.
    pub async fn announce(&self, candidate: &Candidate, url: &str) -> DeliveryReport {
        let message = Message::announcement(candidate, url);
        let subscribers = self.transport.current_subscribers().await;
        let mut report = DeliveryReport::default();

        if subscribers.is_empty() {
            warn!("Found {} but there are no subscribers to tell", candidate);
            return report;
        }

        for subscriber in subscribers {
            match self.transport.send(&subscriber, &message).await {
                Ok(()) => {
                    info!("Sent to {}: {} -> {}", subscriber, candidate, url);
                    report.delivered.push(subscriber);
                }
                Err(e) => {
                    warn!("Could not notify {}: {}", subscriber, e);
                    self.metrics.record_delivery_failure();
                    report.failed.push(subscriber);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport that records every attempt and fails for selected rooms.
    #[derive(Default)]
    struct RecordingTransport {
        subscribers: Vec<String>,
        failing: Vec<String>,
        attempts: Mutex<Vec<(String, Message)>>,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn current_subscribers(&self) -> Vec<String> {
            self.subscribers.clone()
        }

        async fn send(&self, subscriber: &str, message: &Message) -> Result<(), ScoutError> {
            self.attempts
                .lock()
                .unwrap()
                .push((subscriber.to_string(), message.clone()));
            if self.failing.iter().any(|f| f == subscriber) {
                return Err(ScoutError::Delivery {
                    room: subscriber.to_string(),
                    reason: "forbidden".to_string(),
                });
            }
            Ok(())
        }
    }

    fn rooms(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_announcement_format() {
        let message = Message::announcement(&Candidate::new("sabcde"), "https://img.example/x.png");
        assert_eq!(
            message.plain,
            "Screenshot found at sabcde\nhttps://img.example/x.png"
        );
        assert_eq!(
            message.html,
            "Screenshot found at <a href=\"https://img.example/x.png\">sabcde</a>"
        );
    }

    #[test]
    fn test_announcement_escapes_html() {
        let message = Message::announcement(&Candidate::new("sabcde"), "https://x.test/a?b=1&c=2");
        assert!(message.html.contains("href=\"https://x.test/a?b=1&amp;c=2\""));
        assert!(message.plain.contains("https://x.test/a?b=1&c=2"));
    }

    #[tokio::test]
    async fn test_fan_out_survives_one_failure() {
        let transport = Arc::new(RecordingTransport {
            subscribers: rooms(&["!a:hs", "!b:hs", "!c:hs"]),
            failing: rooms(&["!b:hs"]),
            ..Default::default()
        });
        let notifier = Notifier::new(transport.clone(), Arc::new(Metrics::new()));

        let report = notifier
            .announce(&Candidate::new("sabcde"), "https://img.example/x.png")
            .await;

        assert_eq!(report.delivered, rooms(&["!a:hs", "!c:hs"]));
        assert_eq!(report.failed, rooms(&["!b:hs"]));
        assert_eq!(report.attempted(), 3);

        let attempts = transport.attempts.lock().unwrap();
        let attempted: Vec<&str> = attempts.iter().map(|(room, _)| room.as_str()).collect();
        assert_eq!(attempted, vec!["!a:hs", "!b:hs", "!c:hs"]);
        assert!(attempts.iter().all(|(_, m)| m.plain.contains("sabcde")));
    }

    #[tokio::test]
    async fn test_no_subscribers_sends_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = Notifier::new(transport.clone(), Arc::new(Metrics::new()));

        let report = notifier
            .announce(&Candidate::new("sabcde"), "https://img.example/x.png")
            .await;

        assert_eq!(report.attempted(), 0);
        assert!(transport.attempts.lock().unwrap().is_empty());
    }
}
