//! MQTT transport configuration

use std::time::Duration;
use crate::error::{MqttError, Result};

/// Default MQTT 5 receive maximum (protocol upper bound)
pub const DEFAULT_RECEIVE_MAXIMUM: usize = 65_535;

/// Default window in which a redelivered message ID is ignored
pub const DEFAULT_REPEATED_MESSAGE_IGNORE_PERIOD: Duration = Duration::from_secs(1);

/// Default in-progress count at which deferred acknowledgements are flushed
pub const DEFAULT_BACKPRESSURE_LOWER_THRESHOLD: usize = 20;

#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Topic this participant receives on; `init` subscribes to `{own_topic}/#`
    pub own_topic: String,
    /// Prefix of multicast topics
    pub multicast_topic_prefix: String,
    /// Bound on un-acknowledged in-flight messages per skeleton; 0 disables the bound
    pub max_incoming_requests: usize,
    /// Receive maximum negotiated with the broker
    pub receive_maximum: usize,
    pub backpressure_enabled: bool,
    /// In-progress count at or below which backpressure disengages
    pub backpressure_lower_threshold: usize,
    /// How long a processed message ID keeps rejecting redeliveries
    pub repeated_message_ignore_period: Duration,
    /// Broker connections sharing one backpressure observer
    pub backend_count: usize,
}

impl MqttConfig {
    pub fn new(own_topic: impl Into<String>) -> Self {
        Self {
            own_topic: own_topic.into(),
            multicast_topic_prefix: String::new(),
            max_incoming_requests: 0,
            receive_maximum: DEFAULT_RECEIVE_MAXIMUM,
            backpressure_enabled: false,
            backpressure_lower_threshold: DEFAULT_BACKPRESSURE_LOWER_THRESHOLD,
            repeated_message_ignore_period: DEFAULT_REPEATED_MESSAGE_IGNORE_PERIOD,
            backend_count: 1,
        }
    }

    pub fn with_max_incoming_requests(mut self, max: usize) -> Self {
        self.max_incoming_requests = max;
        self
    }

    pub fn with_receive_maximum(mut self, receive_maximum: usize) -> Self {
        self.receive_maximum = receive_maximum;
        self
    }

    /// Enable backpressure with the given disengage threshold
    pub fn with_backpressure(mut self, lower_threshold: usize) -> Self {
        self.backpressure_enabled = true;
        self.backpressure_lower_threshold = lower_threshold;
        self
    }

    pub fn with_repeated_message_ignore_period(mut self, period: Duration) -> Self {
        self.repeated_message_ignore_period = period;
        self
    }

    pub fn with_backend_count(mut self, count: usize) -> Self {
        self.backend_count = count;
        self
    }

    pub fn with_multicast_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.multicast_topic_prefix = prefix.into();
        self
    }

    /// In-progress count up to which messages are acknowledged immediately
    pub fn backpressure_upper_threshold(&self) -> usize {
        self.max_incoming_requests
            .saturating_sub(self.backend_count.saturating_mul(self.receive_maximum))
    }

    pub fn validate(&self) -> Result<()> {
        if self.own_topic.is_empty() {
            return Err(MqttError::Config("own_topic must not be empty".to_string()));
        }
        if self.receive_maximum == 0 {
            return Err(MqttError::Config("receive_maximum must be positive".to_string()));
        }
        if self.backend_count == 0 {
            return Err(MqttError::Config("backend_count must be positive".to_string()));
        }
        if !self.backpressure_enabled {
            return Ok(());
        }

        if self.max_incoming_requests == 0 {
            return Err(MqttError::Config(
                "backpressure needs a bounded max_incoming_requests".to_string(),
            ));
        }
        let reserved = self.backend_count.saturating_mul(self.receive_maximum);
        if reserved >= self.max_incoming_requests {
            return Err(MqttError::Config(format!(
                "receive_maximum {} x {} backend(s) must be below max_incoming_requests {}",
                self.receive_maximum, self.backend_count, self.max_incoming_requests
            )));
        }
        let upper = self.backpressure_upper_threshold();
        let lower = self.backpressure_lower_threshold;
        if lower == 0 || lower >= upper {
            return Err(MqttError::Config(format!(
                "backpressure lower threshold {} must lie strictly between 0 and {}",
                lower, upper
            )));
        }
        Ok(())
    }
}
