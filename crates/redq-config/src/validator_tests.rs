
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "store.backend"));
    }

    #[test]
    fn test_validate_empty_queue_name() {
        let mut config = Config::default();
        config.queue.name = String::new();

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "queue.name"));
    }

    #[test]
    fn test_validate_zero_ack_timeout() {
        let mut config = Config::default();
        config.queue.ack_timeout_ms = 0;

        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.path == "queue.ack_timeout_ms"));
    }

    #[test]
    fn test_validate_zero_max_attempts() {
        let mut config = Config::default();
        config.queue.max_attempts = 0;

        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.path == "queue.max_attempts"));
    }

    #[test]
    fn test_validate_lock_ttl_longer_than_ack_timeout() {
        let mut config = Config::default();
        config.queue.ack_timeout_ms = 1_000;
        config.queue.lock_ttl_secs = 30;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "queue.lock_ttl_secs"));
    }

    #[test]
    fn test_validate_bad_redis_url() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Redis;
        config.store.redis_url = "http://localhost:6379".to_string();

        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.path == "store.redis_url"));
    }

    #[test]
    fn test_validate_redis_url_ok() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Redis;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.iter().all(|w| w.path != "store.backend"));
    }

    #[test]
    fn test_validate_zero_retry_interval_only_when_enabled() {
        let mut config = Config::default();
        config.supervisor.retry_interval_ms = 0;
        assert!(!ConfigValidator::validate(&config).is_valid());

        config.supervisor.enabled = false;
        assert!(ConfigValidator::validate(&config).is_valid());
    }

    #[test]
    fn test_validate_processor_limits() {
        let mut config = Config::default();
        config.processor.max_workers = 0;
        config.processor.poll_batch = 0;

        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.path == "processor.max_workers"));
        assert!(result.errors.iter().any(|e| e.path == "processor.poll_batch"));
    }

    #[test]
    fn test_into_result_reports_first_error() {
        let mut config = Config::default();
        config.queue.poll_candidates = 0;

        let err = ConfigValidator::validate(&config).into_result().unwrap_err();
        assert!(err.to_string().contains("queue.poll_candidates"));
    }

    #[test]
    fn test_into_result_returns_warnings() {
        let warnings = ConfigValidator::validate(&Config::default())
            .into_result()
            .unwrap();
        assert!(!warnings.is_empty());
    }
