use crate::error::{Error, Result};

/// Default topic prefix for inverter readings.
pub const DEFAULT_TOPIC_PREFIX: &str = "inverter";

/// Suffix of the per-cycle status topic.
const STATUS_SUFFIX: &str = "status";

/// Builder for SolarSight MQTT topics.
///
/// Topics follow the pattern `<prefix>/<name>`, with the aggregate cycle
/// status on `<prefix>/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    prefix: String,
}

impl Default for TopicBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

impl TopicBuilder {
    /// Create a builder with a custom prefix. Trailing slashes are dropped.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// The prefix this builder was created with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the topic for a named sensor.
    ///
    /// # Example
    /// ```
    /// use solarsight_common::topic::TopicBuilder;
    ///
    /// let builder = TopicBuilder::default();
    /// assert_eq!(builder.build("inverter_temp"), "inverter/inverter_temp");
    /// ```
    pub fn build(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    /// Build the aggregate status topic.
    ///
    /// # Example
    /// ```
    /// use solarsight_common::topic::TopicBuilder;
    ///
    /// assert_eq!(TopicBuilder::default().status_topic(), "inverter/status");
    /// ```
    pub fn status_topic(&self) -> String {
        self.build(STATUS_SUFFIX)
    }
}

/// Check that `topic` is usable as a publish topic.
///
/// Publish topics must be non-empty, must not contain the `+`/`#` wildcards
/// or NUL, and must fit the MQTT 16-bit length prefix.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::Topic("topic cannot be empty".to_string()));
    }
    if topic.len() > u16::MAX as usize {
        return Err(Error::Topic(format!(
            "topic is {} bytes, limit is {}",
            topic.len(),
            u16::MAX
        )));
    }
    if let Some(c) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(Error::Topic(format!(
            "'{}' contains reserved character {:?}",
            topic, c
        )));
    }
    Ok(())
}
