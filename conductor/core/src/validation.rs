//! Input Validation
//!
//! Checks a chat message before any work is done for it.
//!
//! # Design Philosophy
//!
//! Validation runs at the boundary where untrusted input enters the system,
//! before the session is claimed. A rejected message never reaches a
//! provider and never changes session state.

use serde::{Deserialize, Serialize};

/// Limits applied to incoming chat messages
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLimits {
    /// Maximum message length in characters (default: 32768)
    pub max_input_length: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_input_length: 32 * 1024,
        }
    }
}

/// Verdict on one chat message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationResult {
    /// The message may be processed
    Valid,
    /// The message is refused; carries the client-facing reason
    Invalid(String),
}

impl ValidationResult {
    /// Whether the message was accepted
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Why the message was refused
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid(msg) => Some(msg),
        }
    }
}

/// Checks chat messages against [`InputLimits`]
#[derive(Clone, Debug, Default)]
pub struct InputValidator {
    limits: InputLimits,
}

impl InputValidator {
    /// Validator enforcing `limits`
    #[must_use]
    pub fn new(limits: InputLimits) -> Self {
        Self { limits }
    }

    /// Accept or refuse one user message
    #[must_use]
    pub fn validate_message(&self, content: &str) -> ValidationResult {
        if content.trim().is_empty() {
            return ValidationResult::Invalid("Message is empty".to_string());
        }

        let length = content.chars().count();
        if length > self.limits.max_input_length {
            return ValidationResult::Invalid(format!(
                "Message too long: {} characters (max: {})",
                length, self.limits.max_input_length
            ));
        }

        let forbidden = |c: char| c.is_control() && !matches!(c, '\n' | '\t' | '\r');
        if content.chars().any(forbidden) {
            return ValidationResult::Invalid("Message contains control characters".to_string());
        }

        ValidationResult::Valid
    }

    /// Limits in force
    #[must_use]
    pub fn limits(&self) -> &InputLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(max: usize) -> InputValidator {
        InputValidator::new(InputLimits {
            max_input_length: max,
        })
    }

    #[test]
    fn test_valid_message() {
        assert!(validator(100).validate_message("Hello, world!").is_valid());
    }

    #[test]
    fn test_empty_message() {
        let result = validator(100).validate_message("  \n ");
        assert_eq!(result.reason(), Some("Message is empty"));
    }

    #[test]
    fn test_oversized_message() {
        let v = validator(5);
        assert!(v.validate_message("12345").is_valid());
        let result = v.validate_message("123456");
        assert!(result.reason().unwrap().contains("too long"));
    }

    #[test]
    fn test_length_counts_characters() {
        // Five characters, ten bytes
        assert!(validator(5).validate_message("ééééé").is_valid());
    }

    #[test]
    fn test_control_characters() {
        let v = validator(100);
        assert!(!v.validate_message("bad\u{0007}bell").is_valid());
        assert!(v.validate_message("line one\nline two\ttab\r\n").is_valid());
    }
}
