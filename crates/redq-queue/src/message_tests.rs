
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_new() {
        let message = Message::new("bake", json!({"version": "v1"}));
        assert_eq!(message.kind, "bake");
        assert_eq!(message.attempts(), 0);
        assert!(message.ack_timeout().is_none());
    }

    #[test]
    fn test_builders_set_attributes() {
        let message = Message::new("bake", json!({}))
            .with_max_attempts(3)
            .with_ack_timeout(Duration::from_secs(90))
            .with_label("team", "images");

        assert_eq!(message.attributes.max_attempts, Some(3));
        assert_eq!(message.ack_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(message.attributes.labels["team"], "images");
    }

    #[test]
    fn test_zero_ack_timeout_is_ignored() {
        let mut message = Message::new("bake", json!({}));
        message.attributes.ack_timeout_ms = Some(0);
        assert!(message.ack_timeout().is_none());
    }

    #[test]
    fn test_unset_attributes_are_omitted() {
        let json = Message::new("bake", json!({"version": "v1"})).to_json().unwrap();
        assert_eq!(json, r#"{"kind":"bake","payload":{"version":"v1"},"attributes":{}}"#);
    }

    #[test]
    fn test_from_json_defaults_missing_fields() {
        let message = Message::from_json(r#"{"kind":"ping"}"#).unwrap();
        assert_eq!(message.kind, "ping");
        assert!(message.payload.is_null());
        assert_eq!(message.attributes, MessageAttributes::default());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let result = Message::from_json("{not json");
        assert!(matches!(result, Err(QueueError::Serialization(_))));
    }
