//! Admission checks for candidate messages.

use chrono::{DateTime, Utc};
use courier_config::QueueConfig;

use crate::error::RejectReason;
use crate::message::{Message, generate_id};

/// Record form of a validation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<RejectReason>,
}

impl From<Result<(), RejectReason>> for ValidationOutcome {
    fn from(result: Result<(), RejectReason>) -> Self {
        match result {
            Ok(()) => Self {
                valid: true,
                reason: None,
            },
            Err(reason) => Self {
                valid: false,
                reason: Some(reason),
            },
        }
    }
}

/// Structural, size, TTL and retry checks run before a message enters a
/// queue. Checks short-circuit on the first failure.
pub struct MessageValidator;

impl MessageValidator {
    /// Validate `message` against `config`, assigning an id if it has none.
    pub fn validate(
        message: &mut Message,
        config: &QueueConfig,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        Self::check_required(message)?;
        Self::check_size(message, config)?;
        Self::check_ttl(message, now)?;
        Self::check_retries(message, config)?;
        Ok(())
    }

    /// Convenience wrapper returning [`ValidationOutcome`].
    pub fn outcome(
        message: &mut Message,
        config: &QueueConfig,
        now: DateTime<Utc>,
    ) -> ValidationOutcome {
        Self::validate(message, config, now).into()
    }

    fn check_required(message: &mut Message) -> Result<(), RejectReason> {
        if message.id.trim().is_empty() {
            message.id = generate_id();
        }
        if message.source.trim().is_empty() {
            return Err(RejectReason::MissingField("source"));
        }
        if message.destination.trim().is_empty() {
            return Err(RejectReason::MissingField("destination"));
        }
        Ok(())
    }

    fn check_size(message: &Message, config: &QueueConfig) -> Result<(), RejectReason> {
        let size = message.encoded_size();
        let max = config.performance.max_message_size;
        if size > max {
            return Err(RejectReason::MessageTooLarge { size, max });
        }
        Ok(())
    }

    fn check_ttl(message: &Message, now: DateTime<Utc>) -> Result<(), RejectReason> {
        if let Some(ttl_ms) = message.ttl_ms {
            let age_ms = message.age_ms(now);
            if age_ms > ttl_ms {
                return Err(RejectReason::MessageExpired { age_ms, ttl_ms });
            }
        }
        Ok(())
    }

    fn check_retries(message: &Message, config: &QueueConfig) -> Result<(), RejectReason> {
        let max_retries = config.delivery.max_retries;
        if message.retry_count > max_retries {
            return Err(RejectReason::RetriesExhausted {
                retry_count: message.retry_count,
                max_retries,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use chrono::Duration;
    use serde_json::json;

    fn msg() -> Message {
        Message::new("reporter", "ops", MessageType::Status, json!({"cpu": 0.4}))
    }

    #[test]
    fn test_valid_message() {
        let mut m = msg();
        let config = QueueConfig::default();
        assert!(MessageValidator::validate(&mut m, &config, Utc::now()).is_ok());
    }

    #[test]
    fn test_empty_id_is_generated() {
        let mut m = msg().with_id("");
        let config = QueueConfig::default();
        MessageValidator::validate(&mut m, &config, Utc::now()).unwrap();
        assert!(!m.id.is_empty());
    }

    #[test]
    fn test_missing_source_rejected() {
        let mut m = msg();
        m.source.clear();
        let result = MessageValidator::validate(&mut m, &QueueConfig::default(), Utc::now());
        assert_eq!(result, Err(RejectReason::MissingField("source")));
    }

    #[test]
    fn test_missing_destination_rejected() {
        let mut m = msg();
        m.destination = "  ".to_string();
        let result = MessageValidator::validate(&mut m, &QueueConfig::default(), Utc::now());
        assert_eq!(result, Err(RejectReason::MissingField("destination")));
    }

    #[test]
    fn test_too_large_rejected() {
        let mut config = QueueConfig::default();
        config.performance.max_message_size = 64;
        let mut m = Message::new("a", "b", MessageType::Data, json!("x".repeat(200)));

        let result = MessageValidator::validate(&mut m, &config, Utc::now());
        assert!(matches!(result, Err(RejectReason::MessageTooLarge { max: 64, .. })));
    }

    #[test]
    fn test_expired_rejected() {
        let now = Utc::now();
        let mut m = msg()
            .with_timestamp(now - Duration::seconds(10))
            .with_ttl_ms(1_000);

        let result = MessageValidator::validate(&mut m, &QueueConfig::default(), now);
        assert!(matches!(result, Err(RejectReason::MessageExpired { ttl_ms: 1_000, .. })));
    }

    #[test]
    fn test_retry_ceiling() {
        let mut config = QueueConfig::default();
        config.delivery.max_retries = 2;

        let mut at_limit = msg();
        at_limit.retry_count = 2;
        assert!(MessageValidator::validate(&mut at_limit, &config, Utc::now()).is_ok());

        let mut over = msg();
        over.retry_count = 3;
        let result = MessageValidator::validate(&mut over, &config, Utc::now());
        assert_eq!(
            result,
            Err(RejectReason::RetriesExhausted {
                retry_count: 3,
                max_retries: 2
            })
        );
    }

    #[test]
    fn test_checks_short_circuit_in_order() {
        // Missing source wins over size and expiry.
        let mut config = QueueConfig::default();
        config.performance.max_message_size = 1;
        let now = Utc::now();
        let mut m = msg().with_timestamp(now - Duration::hours(1)).with_ttl_ms(1);
        m.source.clear();

        let result = MessageValidator::validate(&mut m, &config, now);
        assert_eq!(result, Err(RejectReason::MissingField("source")));
    }

    #[test]
    fn test_outcome_record() {
        let mut m = msg();
        m.destination.clear();
        let outcome = MessageValidator::outcome(&mut m, &QueueConfig::default(), Utc::now());
        assert!(!outcome.valid);
        assert_eq!(outcome.reason, Some(RejectReason::MissingField("destination")));
    }
}
