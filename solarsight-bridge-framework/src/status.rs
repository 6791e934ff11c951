//! Per-cycle status reporting.

use solarsight_common::{CycleStatus, TopicBuilder};

use crate::publisher::{Publish, PublishError};

/// Publishes the aggregate `ok`/`err` flag after each poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPublisher {
    topic: String,
}

impl StatusPublisher {
    /// Create a status publisher for an explicit topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    /// Create a status publisher on `<prefix>/status`.
    pub fn for_topics(topics: &TopicBuilder) -> Self {
        Self::new(topics.status_topic())
    }

    /// The status topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish the status of a finished cycle.
    pub async fn publish<P: Publish>(
        &self,
        publisher: &mut P,
        status: CycleStatus,
    ) -> Result<(), PublishError> {
        publisher.publish(&self.topic, status.as_payload()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        messages: Vec<(String, String)>,
    }

    impl Publish for Recorder {
        async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
            self.messages.push((topic.to_string(), payload.to_string()));
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), PublishError> {
            Ok(())
        }

        async fn service_inbound(&mut self) -> Result<(), PublishError> {
            Ok(())
        }
    }

    #[test]
    fn test_default_status_topic() {
        let status = StatusPublisher::for_topics(&TopicBuilder::default());
        assert_eq!(status.topic(), "inverter/status");
    }

    #[tokio::test]
    async fn test_publish_status_payloads() {
        let status = StatusPublisher::new("inverter/status");
        let mut recorder = Recorder::default();

        status.publish(&mut recorder, CycleStatus::Ok).await.unwrap();
        status.publish(&mut recorder, CycleStatus::Err).await.unwrap();

        assert_eq!(
            recorder.messages,
            vec![
                ("inverter/status".to_string(), "ok".to_string()),
                ("inverter/status".to_string(), "err".to_string()),
            ]
        );
    }
}
