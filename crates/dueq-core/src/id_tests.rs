//! Tests for message id generation and validation.

use super::*;

mod generation {
    use super::*;

    /// Verify generated ids have the fixed length and allowed alphabet.
    #[test]
    fn test_generated_id_shape() {
        let generator = IdGenerator::seeded(7);
        let id = generator.generate(StoreTime::new(1_700_000_000, 123_456)).unwrap();

        assert_eq!(id.as_str().len(), ID_LENGTH);
        assert!(MessageId::parse(id.as_str()).is_ok());
    }

    /// Verify the timestamp prefix encodes the `<secs><micros:06>` digits.
    #[test]
    fn test_timestamp_prefix_is_base36_digits() {
        let at = StoreTime::new(1_700_000_000, 123_456);
        let id = IdGenerator::seeded(1).generate(at).unwrap();

        let prefix = &id.as_str()[..TIMESTAMP_WIDTH];
        assert_eq!(
            u64::from_str_radix(prefix, 36).unwrap(),
            1_700_000_000_123_456
        );
    }

    /// Verify a seeded generator is reproducible.
    #[test]
    fn test_seeded_generation_is_deterministic() {
        let at = StoreTime::new(1_700_000_000, 0);
        let a = IdGenerator::seeded(42).generate(at).unwrap();
        let b = IdGenerator::seeded(42).generate(at).unwrap();
        assert_eq!(a, b);
    }

    /// Verify consecutive ids at one instant differ only in the suffix.
    #[test]
    fn test_same_instant_ids_share_prefix() {
        let generator = IdGenerator::seeded(3);
        let at = StoreTime::new(1_700_000_000, 5);

        let a = generator.generate(at).unwrap();
        let b = generator.generate(at).unwrap();

        assert_ne!(a, b);
        assert_eq!(a.as_str()[..TIMESTAMP_WIDTH], b.as_str()[..TIMESTAMP_WIDTH]);
    }

    /// Verify ids at strictly increasing times sort in the same order.
    #[test]
    fn test_ids_sort_by_time() {
        let generator = IdGenerator::new();
        let times = [
            StoreTime::new(999_999_999, 999_999),
            StoreTime::new(1_000_000_000, 0),
            StoreTime::new(1_000_000_000, 1),
            StoreTime::new(1_700_000_000, 500_000),
            StoreTime::new(1_700_000_001, 0),
            StoreTime::new(2_000_000_000, 0),
        ];

        let ids: Vec<MessageId> = times
            .iter()
            .map(|t| generator.generate(*t).unwrap())
            .collect();
        for pair in ids.windows(2) {
            assert!(
                pair[0].as_str() < pair[1].as_str(),
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    /// Verify the send time decodes back to milliseconds.
    #[test]
    fn test_sent_at_millis() {
        let at = StoreTime::new(1_700_000_000, 123_456);
        let id = IdGenerator::seeded(9).generate(at).unwrap();
        assert_eq!(id.sent_at_millis(), Some(1_700_000_000_123));
    }

    /// Verify times before the epoch are rejected rather than encoded as zero.
    #[test]
    fn test_pre_epoch_time_is_rejected() {
        let result = IdGenerator::seeded(1).generate(StoreTime::new(-5, 0));
        assert!(matches!(
            result,
            Err(ValidationError::OutOfRange { ref field, .. }) if field == "timestamp"
        ));
    }

    /// Verify the epoch itself encodes as an all-zero prefix.
    #[test]
    fn test_epoch_encodes_as_zero_prefix() {
        let id = IdGenerator::seeded(1).generate(StoreTime::from_secs(0)).unwrap();
        assert_eq!(&id.as_str()[..TIMESTAMP_WIDTH], "0000000000");
    }

    /// Verify times past the prefix width are rejected instead of widening the id.
    #[test]
    fn test_time_beyond_prefix_width_is_rejected() {
        let at = StoreTime::from_micros(36i64.pow(TIMESTAMP_WIDTH as u32));
        assert!(IdGenerator::seeded(1).generate(at).is_err());

        let last = StoreTime::from_micros(36i64.pow(TIMESTAMP_WIDTH as u32) - 1);
        let id = IdGenerator::seeded(1).generate(last).unwrap();
        assert_eq!(id.as_str().len(), ID_LENGTH);
    }
}

mod validation {
    use super::*;

    #[test]
    fn test_rejects_short_id() {
        assert!(matches!(
            MessageId::parse("123456"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_rejects_invalid_characters() {
        let id = format!("{}-", "a".repeat(31));
        assert!(MessageId::parse(id).is_err());
    }

    /// Verify colons are part of the accepted alphabet.
    #[test]
    fn test_accepts_colons() {
        let id = format!("{}:", "Z".repeat(31));
        assert!(MessageId::parse(id).is_ok());
    }

    #[test]
    fn test_from_str() {
        let raw = "a".repeat(32);
        let id: MessageId = raw.parse().unwrap();
        assert_eq!(id.as_str(), raw);
    }
}
