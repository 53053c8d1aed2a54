#[cfg(test)]
mod integration_tests {
    use crate::enrichment::MockTextExtractor;
    use crate::testing::{test_config, FakeBackend};
    use crate::{
        CaptureCoordinator, CaptureError, Config, EnrichmentStatus, ErrorSeverity, NoopExtractor,
        TextExtractor,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{advance, sleep, Instant};

    fn coordinator_with(
        config: Config,
        backend: Arc<FakeBackend>,
        extractor: Arc<dyn TextExtractor>,
    ) -> CaptureCoordinator {
        CaptureCoordinator::new(config, backend, extractor)
    }

    async fn started(config: Config, backend: Arc<FakeBackend>) -> CaptureCoordinator {
        let coordinator = coordinator_with(config, backend, Arc::new(NoopExtractor));
        coordinator.start().await.unwrap();
        coordinator
    }

    /// Wait for detached enrichment tasks to settle
    async fn until_enriched(coordinator: &CaptureCoordinator, url: &str) -> EnrichmentStatus {
        for _ in 0..100 {
            match coordinator.get_enrichment(url) {
                EnrichmentStatus::Ready(enrichment) => return EnrichmentStatus::Ready(enrichment),
                _ => sleep(Duration::from_millis(10)).await,
            }
        }
        coordinator.get_enrichment(url)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_bounded_by_max_concurrent() {
        let backend = Arc::new(FakeBackend::new().with_render_time(Duration::from_secs(1)));
        let coordinator = started(test_config(), backend.clone()).await;

        let start = Instant::now();
        let captures = (0..5).map(|i| {
            let coordinator = coordinator.clone();
            async move { coordinator.capture(&format!("https://site{i}.test/")).await }
        });
        let results = futures::future::join_all(captures).await;
        let elapsed = start.elapsed();

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(backend.peak_active(), 2);
        // Three waves of two, two and one
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3500), "elapsed {elapsed:?}");

        let stats = coordinator.pool_stats();
        assert_eq!(stats.available, 2);
        assert_eq!(stats.in_use, 0);
        assert_eq!(coordinator.queue_stats().running, 0);
        assert!(results
            .iter()
            .all(|r| !r.as_ref().unwrap().overflow));
    }

    #[tokio::test]
    async fn test_overflow_worker_used_and_destroyed() {
        let backend = Arc::new(FakeBackend::new().with_render_time(Duration::from_millis(50)));
        let config = Config {
            pool_size: 1,
            max_concurrent: 2,
            ..test_config()
        };
        let coordinator = started(config, backend.clone()).await;

        let (a, b) = tokio::join!(
            coordinator.capture("https://a.test/"),
            coordinator.capture("https://b.test/")
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert!(a.overflow != b.overflow);

        sleep(Duration::from_millis(20)).await;

        let stats = coordinator.pool_stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.overflow_in_use, 0);
        assert_eq!(backend.launch_count(), 2);
        assert_eq!(backend.shutdown_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_captures_start_by_priority() {
        let backend = Arc::new(FakeBackend::new().with_render_time(Duration::from_secs(1)));
        let config = Config {
            pool_size: 1,
            max_concurrent: 1,
            ..test_config()
        };
        let coordinator = started(config, backend.clone()).await;

        let (blocker, low, high) = tokio::join!(
            coordinator.capture_with_priority("https://blocker.test/", 0),
            coordinator.capture_with_priority("https://low.test/", 1),
            coordinator.capture_with_priority("https://high.test/", 5),
        );
        assert!(blocker.is_ok() && low.is_ok() && high.is_ok());

        assert_eq!(
            backend.navigated(),
            vec![
                "https://blocker.test/",
                "https://high.test/",
                "https://low.test/"
            ]
        );
    }

    #[tokio::test]
    async fn test_cache_hit_bypasses_pool() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = started(test_config(), backend.clone()).await;

        let first = coordinator.capture("https://example.com/").await.unwrap();
        let stats_before = coordinator.pool_stats();

        let second = coordinator.capture("https://example.com/").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.navigation_count(), 1);
        assert_eq!(coordinator.pool_stats(), stats_before);
        assert!(coordinator.get_cached("https://example.com/").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_recaptured() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = started(test_config(), backend.clone()).await;

        coordinator.capture("https://example.com/").await.unwrap();
        advance(Duration::from_secs(301)).await;

        assert!(coordinator.get_cached("https://example.com/").is_none());
        coordinator.capture("https://example.com/").await.unwrap();

        assert_eq!(backend.navigation_count(), 2);
        assert_eq!(coordinator.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_identical_cold_urls_are_not_deduplicated() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = started(test_config(), backend.clone()).await;

        let (a, b) = tokio::join!(
            coordinator.capture("https://same.test/"),
            coordinator.capture("https://same.test/")
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.navigation_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_worker() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = started(test_config(), backend.clone()).await;

        let result = coordinator.capture("https://slow.test/").await;

        match result {
            Err(CaptureError::NavigationTimeout(after)) => {
                assert_eq!(after, Duration::from_secs(5))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(coordinator.pool_stats().in_use, 0);
        assert_eq!(coordinator.pool_stats().available, 2);
        assert_eq!(backend.active(), 0);
        assert!(coordinator.get_cached("https://slow.test/").is_none());
    }

    #[tokio::test]
    async fn test_failure_releases_worker_and_caches_nothing() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = started(test_config(), backend.clone()).await;

        let result = coordinator.capture("https://fail.test/").await;

        assert!(matches!(result, Err(CaptureError::CaptureFailed(_))));
        assert_eq!(coordinator.pool_stats().in_use, 0);
        assert_eq!(coordinator.cache_len(), 0);
        assert_eq!(backend.active(), 0);
    }

    #[tokio::test]
    async fn test_invalid_url_touches_nothing() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator =
            coordinator_with(test_config(), backend.clone(), Arc::new(NoopExtractor));

        let result = coordinator.capture("not a url").await;

        assert!(matches!(result, Err(CaptureError::InvalidUrl(_))));
        assert_eq!(backend.launch_count(), 0);
        assert_eq!(coordinator.queue_stats().queued, 0);
    }

    #[tokio::test]
    async fn test_capture_after_shutdown_fails() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = started(test_config(), backend.clone()).await;

        coordinator.shutdown().await;

        assert!(matches!(
            coordinator.capture("https://example.com/").await,
            Err(CaptureError::PoolClosed)
        ));
        assert_eq!(backend.shutdown_count(), 2);
    }

    #[tokio::test]
    async fn test_enrichment_attached_after_capture() {
        let backend = Arc::new(FakeBackend::new());
        let mut extractor = MockTextExtractor::new();
        extractor
            .expect_extract()
            .times(1)
            .returning(|artifact| Ok(format!("text of {}", artifact.url)));
        let coordinator = coordinator_with(test_config(), backend, Arc::new(extractor));
        coordinator.start().await.unwrap();

        coordinator.capture("https://example.com/").await.unwrap();
        // A cache hit does not trigger a second pass
        coordinator.capture("https://example.com/").await.unwrap();

        match until_enriched(&coordinator, "https://example.com/").await {
            EnrichmentStatus::Ready(enrichment) => {
                assert_eq!(enrichment.text, "text of https://example.com/")
            }
            other => panic!("expected ready enrichment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_enrichment_failure_keeps_capture() {
        let backend = Arc::new(FakeBackend::new());
        let mut extractor = MockTextExtractor::new();
        extractor
            .expect_extract()
            .times(1)
            .returning(|_| Err(CaptureError::EnrichmentFailed("ocr unavailable".to_string())));
        let coordinator = coordinator_with(test_config(), backend, Arc::new(extractor));
        coordinator.start().await.unwrap();

        let artifact = coordinator.capture("https://example.com/").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(
            coordinator.get_enrichment("https://example.com/"),
            EnrichmentStatus::Absent
        );
        let cached = coordinator.get_cached("https://example.com/").unwrap();
        assert!(Arc::ptr_eq(&artifact, &cached));
    }

    #[test]
    fn test_error_retryable() {
        assert!(CaptureError::NavigationTimeout(Duration::from_secs(1)).is_retryable());
        assert!(CaptureError::CaptureFailed("test".to_string()).is_retryable());
        assert!(CaptureError::PoolExhausted { limit: 3 }.is_retryable());
        assert!(!CaptureError::InvalidUrl("test".to_string()).is_retryable());
        assert!(!CaptureError::PoolClosed.is_retryable());
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            CaptureError::InvalidUrl("test".to_string()).severity(),
            ErrorSeverity::Low
        );
        assert_eq!(
            CaptureError::CaptureFailed("test".to_string()).severity(),
            ErrorSeverity::Medium
        );
        assert_eq!(
            CaptureError::ConfigurationError("test".to_string()).severity(),
            ErrorSeverity::High
        );
        assert_eq!(CaptureError::PoolClosed.severity(), ErrorSeverity::Critical);
    }
}
