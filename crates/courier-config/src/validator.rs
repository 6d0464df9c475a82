//! Configuration validation.

use crate::schema::QueueConfig;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &QueueConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_persistence(config, &mut result);
        Self::validate_delivery(config, &mut result);
        Self::validate_ordering(config, &mut result);
        Self::validate_dead_letter(config, &mut result);
        Self::validate_performance(config, &mut result);

        result
    }

    fn validate_persistence(config: &QueueConfig, result: &mut ValidationResult) {
        let persistence = &config.persistence;
        if !persistence.enabled {
            return;
        }

        if persistence.sync_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "persistence.sync_interval_ms",
                "sync_interval_ms must be greater than 0 when persistence is enabled",
            ));
        }

        if persistence.storage_path.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                "persistence.storage_path",
                "storage_path cannot be empty",
            ));
        }

        if persistence.encryption && std::env::var_os(&persistence.encryption_key_env).is_none() {
            result.add_warning(ValidationWarning::new(
                "persistence.encryption_key_env",
                format!(
                    "encryption is enabled but {} is not set; records cannot be written encrypted",
                    persistence.encryption_key_env
                ),
            ));
        }
    }

    fn validate_delivery(config: &QueueConfig, result: &mut ValidationResult) {
        let delivery = &config.delivery;

        if !delivery.backoff_multiplier.is_finite() || delivery.backoff_multiplier < 1.0 {
            result.add_error(ValidationError::new(
                "delivery.backoff_multiplier",
                "backoff_multiplier must be a finite value >= 1.0",
            ));
        }

        if delivery.exactly_once {
            result.add_warning(ValidationWarning::new(
                "delivery.exactly_once",
                "exactly_once is an intent flag; delivery is at-least-once and consumers must be idempotent",
            ));
        }

        if delivery.max_retries == 0 {
            result.add_warning(ValidationWarning::new(
                "delivery.max_retries",
                "max_retries is 0, the first failure dead-letters a message",
            ));
        }
    }

    fn validate_ordering(config: &QueueConfig, result: &mut ValidationResult) {
        if config.ordering.enabled {
            result.add_warning(ValidationWarning::new(
                "ordering",
                "ordering is advisory: sequence numbers are assigned but out-of-order delivery is not prevented",
            ));
        }
    }

    fn validate_dead_letter(config: &QueueConfig, result: &mut ValidationResult) {
        let dead_letter = &config.dead_letter;

        if !dead_letter.enabled {
            result.add_warning(ValidationWarning::new(
                "dead_letter.enabled",
                "dead lettering is disabled: messages that exhaust their retries are dropped",
            ));
            return;
        }

        if dead_letter.auto_cleanup && dead_letter.cleanup_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "dead_letter.cleanup_interval_ms",
                "cleanup_interval_ms must be greater than 0 when auto_cleanup is enabled",
            ));
        }

        if dead_letter.max_retries != config.delivery.max_retries {
            result.add_warning(ValidationWarning::new(
                "dead_letter.max_retries",
                format!(
                    "dead_letter.max_retries ({}) differs from delivery.max_retries ({}); the delivery value decides when a message is dead-lettered",
                    dead_letter.max_retries, config.delivery.max_retries
                ),
            ));
        }
    }

    fn validate_performance(config: &QueueConfig, result: &mut ValidationResult) {
        let performance = &config.performance;

        if performance.batch_size == 0 {
            result.add_error(ValidationError::new(
                "performance.batch_size",
                "batch_size must be greater than 0",
            ));
        }

        if performance.processing_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "performance.processing_interval_ms",
                "processing_interval_ms must be greater than 0",
            ));
        }

        if performance.max_message_size == 0 {
            result.add_error(ValidationError::new(
                "performance.max_message_size",
                "max_message_size must be greater than 0",
            ));
        }

        if performance.max_queue_size == 0 {
            result.add_warning(ValidationWarning::new(
                "performance.max_queue_size",
                "max_queue_size is 0, queues are unbounded",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
