// Event publication to the broker: a durable topic exchange carrying
// verification and reset notifications with correlation headers.

use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ExchangeDeclareOptions},
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::context::RequestContext;

pub const EVENTS_EXCHANGE: &str = "auth.events";

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification payloads. The raw one-time secret travels only inside these
/// URLs, never in the store.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    EmailVerification {
        email: String,
        verification_url: String,
    },
    PasswordReset {
        email: String,
        reset_url: String,
    },
}

impl AuthEvent {
    pub fn routing_key(&self) -> &'static str {
        match self {
            AuthEvent::EmailVerification { .. } => "email.verification",
            AuthEvent::PasswordReset { .. } => "email.password_reset",
        }
    }

    pub fn email(&self) -> &str {
        match self {
            AuthEvent::EmailVerification { email, .. } => email,
            AuthEvent::PasswordReset { email, .. } => email,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("event serialization failed: {0}")]
    Encoding(String),
}

impl crate::services::circuit_breaker::BreakerError for PublishError {
    fn is_dependency_failure(&self) -> bool {
        !matches!(self, PublishError::Encoding(_))
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, ctx: &RequestContext, event: AuthEvent) -> Result<(), PublishError>;
}

/// AMQP-backed publisher. Declares the durable topic exchange on connect and
/// publishes JSON bodies with `X-Request-ID` / `X-Trace-ID` headers copied
/// from the request context.
pub struct AmqpEventPublisher {
    channel: Channel,
}

impl AmqpEventPublisher {
    pub async fn connect(url: &str) -> Result<Self, PublishError> {
        let mut properties = ConnectionProperties::default();
        properties.locale = "en_US".to_string();

        let connection = tokio::time::timeout(DIAL_TIMEOUT, Connection::connect(url, properties))
            .await
            .map_err(|_| PublishError::Connection("broker dial timed out".to_string()))?
            .map_err(|e| PublishError::Connection(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))?;

        channel
            .exchange_declare(
                EVENTS_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))?;

        info!("Declared durable topic exchange '{}'", EVENTS_EXCHANGE);
        Ok(Self { channel })
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish(&self, ctx: &RequestContext, event: AuthEvent) -> Result<(), PublishError> {
        let payload =
            serde_json::to_vec(&event).map_err(|e| PublishError::Encoding(e.to_string()))?;

        let mut headers = FieldTable::default();
        if let Some(request_id) = &ctx.request_id {
            headers.insert(
                "X-Request-ID".into(),
                AMQPValue::LongString(request_id.clone().into()),
            );
        }
        if let Some(trace_id) = &ctx.trace_id {
            headers.insert(
                "X-Trace-ID".into(),
                AMQPValue::LongString(trace_id.clone().into()),
            );
        }

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_headers(headers);

        self.channel
            .basic_publish(
                EVENTS_EXCHANGE,
                event.routing_key(),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| PublishError::Publish(e.to_string()))?
            .await
            .map_err(|e| PublishError::Publish(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_payload_matches_the_wire_shape() {
        let event = AuthEvent::EmailVerification {
            email: "a@b.co".to_string(),
            verification_url: "https://app.example.com/verify-email?token=T".to_string(),
        };

        assert_eq!(event.routing_key(), "email.verification");
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "email_verification",
                "email": "a@b.co",
                "verification_url": "https://app.example.com/verify-email?token=T",
            })
        );
    }

    #[test]
    fn reset_payload_matches_the_wire_shape() {
        let event = AuthEvent::PasswordReset {
            email: "a@b.co".to_string(),
            reset_url: "https://app.example.com/reset-password?token=T".to_string(),
        };

        assert_eq!(event.routing_key(), "email.password_reset");
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "password_reset",
                "email": "a@b.co",
                "reset_url": "https://app.example.com/reset-password?token=T",
            })
        );
    }
}
