//! Messaging error types, using thiserror for structured errors instead of
//! `Box<dyn Error>` patterns.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Topology declaration failed: {name}: {message}")]
    Topology { name: String, message: String },

    #[error("Publish failed: routing key {routing_key}: {message}")]
    Publish {
        routing_key: String,
        message: String,
    },

    #[error("Publish confirmation timed out after {timeout_secs}s: routing key {routing_key}")]
    PublishConfirmTimeout {
        routing_key: String,
        timeout_secs: u64,
    },

    #[error("Consume failed: queue {queue_name}: {message}")]
    Consume { queue_name: String, message: String },

    #[error("Ack failed: delivery tag {delivery_tag}: {message}")]
    Ack { delivery_tag: u64, message: String },

    #[error("Nack failed: delivery tag {delivery_tag}: {message}")]
    Nack { delivery_tag: u64, message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Broker reconnect exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn topology(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Topology {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn publish(routing_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    pub fn publish_confirm_timeout(routing_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self::PublishConfirmTimeout {
            routing_key: routing_key.into(),
            timeout_secs,
        }
    }

    pub fn consume(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    pub fn ack(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Ack {
            delivery_tag,
            message: message.into(),
        }
    }

    pub fn nack(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Nack {
            delivery_tag,
            message: message.into(),
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is worth an in-process retry (transport-level
    /// transience, not a schema problem).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Publish { .. }
                | Self::PublishConfirmTimeout { .. }
                | Self::Consume { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            Self::MessageDeserialization {
                message: err.to_string(),
            }
        } else {
            Self::MessageSerialization {
                message: err.to_string(),
            }
        }
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        Self::Connection {
            message: err.to_string(),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
