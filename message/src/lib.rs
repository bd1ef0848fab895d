#![forbid(unsafe_code)]

use common::{digest_parts, Digest32, DOMAIN};
use limits::{ValidationLimits, DEFAULT_LIMITS};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Agent id whose messages are accepted without checksum or location checks.
///
/// Reserved for the system/test agent. Kept as a fixed rule; see DESIGN.md before changing.
pub const WILDCARD_AGENT_ID: u64 = 0;

/// A single agent location report.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Message {
    pub message_number: u64,
    pub agent_id: u64,
    pub location_x: u64,
    pub location_y: u64,
    pub checksum: u64,
}

impl Message {
    pub fn new(
        message_number: u64,
        agent_id: u64,
        location_x: u64,
        location_y: u64,
        checksum: u64,
    ) -> Self {
        Self {
            message_number,
            agent_id,
            location_x,
            location_y,
            checksum,
        }
    }

    /// Build a message whose checksum matches its fields. Saturates on overflow,
    /// which then fails the checksum check.
    pub fn with_checksum(
        message_number: u64,
        agent_id: u64,
        location_x: u64,
        location_y: u64,
    ) -> Self {
        let checksum = expected_checksum(agent_id, location_x, location_y).unwrap_or(u64::MAX);
        Self::new(message_number, agent_id, location_x, location_y, checksum)
    }

    /// Domain-separated digest over every field.
    pub fn digest(&self) -> Digest32 {
        digest_parts(
            DOMAIN,
            "Message",
            "v1",
            &[
                &self.message_number.to_le_bytes(),
                &self.agent_id.to_le_bytes(),
                &self.location_x.to_le_bytes(),
                &self.location_y.to_le_bytes(),
                &self.checksum.to_le_bytes(),
            ],
        )
    }

    pub fn is_wildcard(&self) -> bool {
        self.agent_id == WILDCARD_AGENT_ID
    }
}

fn expected_checksum(agent_id: u64, location_x: u64, location_y: u64) -> Option<u64> {
    agent_id.checked_add(location_x)?.checked_add(location_y)
}

/// Outcome of every individual check, for diagnostics.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationReport {
    pub checksum_ok: bool,
    pub agent_id_ok: bool,
    pub location_ok: bool,
    pub wildcard: bool,
    pub valid: bool,
}

impl ValidationReport {
    /// Stable labels for the checks that failed. Empty for valid messages.
    pub fn failed_checks(&self) -> Vec<&'static str> {
        if self.valid {
            return Vec::new();
        }
        let mut failed = Vec::new();
        if !self.checksum_ok {
            failed.push("CHECKSUM");
        }
        if !self.agent_id_ok {
            failed.push("AGENT_ID_RANGE");
        }
        if !self.location_ok {
            failed.push("LOCATION");
        }
        failed
    }
}

/// Pure validity predicate over single messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageValidator {
    limits: ValidationLimits,
}

impl MessageValidator {
    pub const fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub const fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// `checksum == agent_id + location_x + location_y`, exact.
    pub fn checksum_valid(&self, message: &Message) -> bool {
        expected_checksum(message.agent_id, message.location_x, message.location_y)
            == Some(message.checksum)
    }

    pub fn agent_id_valid(&self, message: &Message) -> bool {
        message.agent_id == WILDCARD_AGENT_ID || message.agent_id <= self.limits.agent_id_max
    }

    /// X in `[0, x_max]`, Y in `[y_min, y_max]`, and Y strictly greater than X.
    pub fn location_valid(&self, message: &Message) -> bool {
        let x_ok = message.location_x <= self.limits.location_x_max;
        let y_ok = (self.limits.location_y_min..=self.limits.location_y_max)
            .contains(&message.location_y);
        x_ok && y_ok && message.location_y > message.location_x
    }

    pub fn is_valid(&self, message: &Message) -> bool {
        message.is_wildcard()
            || (self.checksum_valid(message)
                && self.agent_id_valid(message)
                && self.location_valid(message))
    }

    /// Alias of [`MessageValidator::is_valid`].
    pub fn overall_valid(&self, message: &Message) -> bool {
        self.is_valid(message)
    }

    pub fn report(&self, message: &Message) -> ValidationReport {
        ValidationReport {
            checksum_ok: self.checksum_valid(message),
            agent_id_ok: self.agent_id_valid(message),
            location_ok: self.location_valid(message),
            wildcard: message.is_wildcard(),
            valid: self.is_valid(message),
        }
    }
}

/// Strictly greater than the current watermark.
pub fn is_number_higher(message: &Message, current_watermark: u64) -> bool {
    message.message_number > current_watermark
}

/// The authoritative state-transition rule.
///
/// A message moves the watermark to its number only if that number is strictly
/// higher and the message is valid; otherwise the watermark is unchanged.
pub fn transition(validator: &MessageValidator, current: u64, message: &Message) -> u64 {
    if is_number_higher(message, current) && validator.is_valid(message) {
        message.message_number
    } else {
        current
    }
}

/// Validity under [`DEFAULT_LIMITS`].
pub fn is_valid(message: &Message) -> bool {
    MessageValidator::new(DEFAULT_LIMITS).is_valid(message)
}

/// Highest message number among the messages valid under `validator`, or 0.
///
/// Invalid messages are skipped, so this is the watermark a chain folded from 0
/// over `messages` ends at, whatever their order.
pub fn highest_message_number(validator: &MessageValidator, messages: &[Message]) -> u64 {
    messages
        .iter()
        .filter(|message| validator.is_valid(message))
        .map(|message| message.message_number)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn validator() -> MessageValidator {
        MessageValidator::default()
    }

    #[test]
    fn well_formed_message_is_valid() {
        let message = Message::new(1, 1000, 6000, 8000, 15000);
        let report = validator().report(&message);
        assert!(report.valid);
        assert!(report.failed_checks().is_empty());
    }

    #[test]
    fn agent_id_boundary_is_inclusive() {
        let at_max = Message::with_checksum(1, 3000, 100, 5000);
        let past_max = Message::with_checksum(1, 3001, 100, 5000);
        assert!(validator().is_valid(&at_max));
        assert!(!validator().agent_id_valid(&past_max));
        assert!(!validator().is_valid(&past_max));
    }

    #[test]
    fn location_x_boundary_is_inclusive() {
        assert!(validator().is_valid(&Message::with_checksum(1, 10, 15000, 20000)));
        assert!(!validator().is_valid(&Message::with_checksum(1, 10, 15001, 20000)));
    }

    #[test]
    fn location_y_boundaries_are_inclusive() {
        assert!(validator().is_valid(&Message::with_checksum(1, 10, 0, 5000)));
        assert!(!validator().is_valid(&Message::with_checksum(1, 10, 0, 4999)));
        assert!(validator().is_valid(&Message::with_checksum(1, 10, 0, 20000)));
        assert!(!validator().is_valid(&Message::with_checksum(1, 10, 0, 20001)));
    }

    #[test]
    fn equal_coordinates_are_invalid() {
        let message = Message::new(2, 2000, 6000, 6000, 14000);
        assert!(validator().checksum_valid(&message));
        assert!(!validator().location_valid(&message));
        assert_eq!(validator().report(&message).failed_checks(), vec!["LOCATION"]);
    }

    #[test]
    fn wrong_checksum_is_invalid() {
        let message = Message::new(2, 2000, 6000, 8000, 16001);
        assert!(!validator().is_valid(&message));
        assert_eq!(validator().report(&message).failed_checks(), vec!["CHECKSUM"]);
    }

    #[test]
    fn checksum_overflow_is_invalid() {
        let message = Message::new(1, 1, u64::MAX, 5000, 4);
        assert!(!validator().checksum_valid(&message));
    }

    #[test]
    fn wildcard_agent_bypasses_every_check() {
        let message = Message::new(3, 0, 16000, 8000, 30000);
        let report = validator().report(&message);
        assert!(!report.checksum_ok);
        assert!(!report.location_ok);
        assert!(report.wildcard);
        assert!(report.valid);
    }

    #[test]
    fn number_comparison_is_strict() {
        let message = Message::with_checksum(5, 10, 0, 5000);
        assert!(is_number_higher(&message, 4));
        assert!(!is_number_higher(&message, 5));
    }

    #[test]
    fn transition_advances_only_on_valid_higher_numbers() {
        let validator = validator();
        assert_eq!(transition(&validator, 0, &Message::new(1, 1000, 6000, 8000, 15000)), 1);
        assert_eq!(transition(&validator, 1, &Message::new(2, 3005, 100, 5000, 8105)), 1);
        assert_eq!(transition(&validator, 1, &Message::new(0, 2000, 6000, 8000, 16000)), 1);
        assert_eq!(transition(&validator, 2, &Message::new(3, 0, 16000, 8000, 30000)), 3);
    }

    #[test]
    fn highest_number_ignores_invalid_messages() {
        let messages = [
            Message::with_checksum(4, 10, 0, 5000),
            Message::new(9, 3005, 100, 5000, 8105),
            Message::with_checksum(2, 10, 0, 5000),
        ];
        assert_eq!(highest_message_number(&validator(), &messages), 4);
        assert_eq!(highest_message_number(&validator(), &[]), 0);
    }

    #[test]
    fn digest_binds_every_field() {
        let base = Message::new(1, 2, 3, 4, 5);
        let variants = [
            Message::new(9, 2, 3, 4, 5),
            Message::new(1, 9, 3, 4, 5),
            Message::new(1, 2, 9, 4, 5),
            Message::new(1, 2, 3, 9, 5),
            Message::new(1, 2, 3, 4, 9),
        ];
        for variant in variants {
            assert_ne!(base.digest(), variant.digest());
        }
    }

    proptest! {
        #[test]
        fn wildcard_is_always_valid(
            number in any::<u64>(),
            x in any::<u64>(),
            y in any::<u64>(),
            checksum in any::<u64>(),
        ) {
            let message = Message::new(number, WILDCARD_AGENT_ID, x, y, checksum);
            prop_assert!(validator().is_valid(&message));
        }

        #[test]
        fn generated_in_range_messages_are_valid(
            agent_id in 1u64..=3000,
            x in 0u64..=14999,
            y_offset in 1u64..=20000,
        ) {
            let y = (x + y_offset).clamp(5000, 20000);
            prop_assume!(y > x);
            let message = Message::with_checksum(1, agent_id, x, y);
            prop_assert!(validator().is_valid(&message));
        }
    }
}
