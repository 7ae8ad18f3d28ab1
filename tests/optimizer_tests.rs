//! Request optimizer behaviour: caching, deduplication, throttling, retries.

use async_trait::async_trait;
use fetchgate::domain::model::{HttpRequest, HttpResponse};
use fetchgate::{
    OptimizerConfig, Priority, RequestError, RequestOptimizer, RequestOptions, Transport,
};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{advance, Instant};

struct MockTransport {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    script: Mutex<VecDeque<Result<HttpResponse, RequestError>>>,
    fallback: Result<HttpResponse, RequestError>,
    delay: Duration,
    echo: bool,
    missing: Option<String>,
}

impl MockTransport {
    fn new(fallback: Result<HttpResponse, RequestError>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            echo: false,
            missing: None,
        }
    }

    fn ok(body: Value) -> Self {
        Self::new(Ok(HttpResponse::new(200, body.to_string())))
    }

    fn echo() -> Self {
        Self {
            echo: true,
            ..Self::ok(Value::Null)
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn missing(mut self, endpoint: &str) -> Self {
        self.missing = Some(endpoint.to_string());
        self
    }

    fn scripted(self, script: Vec<Result<HttpResponse, RequestError>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_url(&self) -> Option<String> {
        self.urls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(request.url.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.missing.as_deref() == Some(request.url.as_str()) {
            return Ok(HttpResponse::new(404, ""));
        }
        if self.echo {
            return Ok(HttpResponse::new(
                200,
                json!({ "url": request.url }).to_string(),
            ));
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

fn optimizer(transport: &Arc<MockTransport>) -> RequestOptimizer {
    RequestOptimizer::new(transport.clone(), OptimizerConfig::default())
}

fn server_error() -> Result<HttpResponse, RequestError> {
    Ok(HttpResponse::new(500, r#"{"message":"database unavailable"}"#))
}

#[tokio::test(start_paused = true)]
async fn test_cached_value_reused_within_ttl_and_refetched_after() {
    let transport = Arc::new(MockTransport::ok(json!([{"id": 1}])));
    let optimizer = optimizer(&transport);
    let options = || RequestOptions::new().cache_ttl(Duration::from_millis(1000));

    let first = optimizer.request("/resources", options()).await.unwrap();
    assert_eq!(first, json!([{"id": 1}]));
    assert_eq!(transport.calls(), 1);

    let second = optimizer.request("/resources", options()).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(transport.calls(), 1);

    advance(Duration::from_millis(1100)).await;
    optimizer.request("/resources", options()).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_bypass_cache_forces_network_call() {
    let transport = Arc::new(MockTransport::ok(json!({"ok": true})));
    let optimizer = optimizer(&transport);

    optimizer.request("/comments", RequestOptions::new()).await.unwrap();
    optimizer
        .request("/comments", RequestOptions::new().bypass_cache(true))
        .await
        .unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_get_requests_are_not_cached() {
    let transport = Arc::new(MockTransport::ok(json!({"id": 9})));
    let optimizer = optimizer(&transport);
    let post = || {
        RequestOptions::new()
            .method(Method::POST)
            .body(json!({"title": "Rust"}))
    };

    optimizer.request("/resources", post()).await.unwrap();
    optimizer.request("/resources", post()).await.unwrap();
    assert_eq!(transport.calls(), 2);
    assert_eq!(optimizer.stats().cached_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_param_order_does_not_split_cache() {
    let transport = Arc::new(MockTransport::ok(json!([])));
    let optimizer = optimizer(&transport);

    optimizer
        .request(
            "/comments",
            RequestOptions::new()
                .param("resource_id", 4)
                .param("order", "created_at.desc"),
        )
        .await
        .unwrap();
    optimizer
        .request(
            "/comments",
            RequestOptions::new()
                .param("order", "created_at.desc")
                .param("resource_id", 4)
                .param("cursor", Value::Null),
        )
        .await
        .unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(
        transport.last_url().as_deref(),
        Some("/comments?order=created_at.desc&resource_id=4")
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_requests_share_one_call() {
    let transport =
        Arc::new(MockTransport::ok(json!({"n": 42})).delayed(Duration::from_millis(100)));
    let optimizer = optimizer(&transport);

    let (a, b) = tokio::join!(
        optimizer.request("/resources", RequestOptions::new()),
        optimizer.request("/resources", RequestOptions::new()),
    );

    assert_eq!(a.unwrap(), json!({"n": 42}));
    assert_eq!(b.unwrap(), json!({"n": 42}));
    assert_eq!(transport.calls(), 1);
    assert_eq!(optimizer.stats().deduplicated, 1);
    assert_eq!(optimizer.stats().pending, 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_receives_same_failure() {
    let transport =
        Arc::new(MockTransport::new(server_error()).delayed(Duration::from_millis(200)));
    let optimizer = optimizer(&transport);
    let options = || RequestOptions::new().retry_count(0);

    let first = optimizer.request("/resources", options());
    let second = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        optimizer.request("/resources", options()).await
    };
    let (a, b) = tokio::join!(first, second);

    let a = a.unwrap_err();
    assert_eq!(a, b.unwrap_err());
    assert_eq!(a.status(), Some(500));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_callers_are_deduplicated() {
    let transport =
        Arc::new(MockTransport::ok(json!("shared")).delayed(Duration::from_millis(50)));
    let optimizer = optimizer(&transport);

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let optimizer = optimizer.clone();
            tokio::spawn(async move {
                optimizer
                    .request("/resources", RequestOptions::new().priority(Priority::High))
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), json!("shared"));
    }
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_burst_throttles_low_priority_and_serves_stale_cache() {
    let transport = Arc::new(MockTransport::ok(json!({"fresh": true})));
    let optimizer = optimizer(&transport);

    optimizer
        .request(
            "/comments",
            RequestOptions::new()
                .param("v", 0)
                .cache_ttl(Duration::from_millis(10)),
        )
        .await
        .unwrap();
    advance(Duration::from_millis(20)).await;

    for i in 1..=10 {
        optimizer
            .request(
                "/comments",
                RequestOptions::new().param("v", i).priority(Priority::High),
            )
            .await
            .unwrap();
    }
    assert!(optimizer.is_throttled("/comments"));
    assert!(!optimizer.is_throttled("/resources"));

    let rejected = optimizer
        .request(
            "/comments",
            RequestOptions::new().param("v", 99).priority(Priority::Low),
        )
        .await;
    assert_eq!(
        rejected,
        Err(RequestError::Throttled {
            endpoint: "/comments".to_string()
        })
    );

    let calls_before = transport.calls();
    let stale = optimizer
        .request(
            "/comments",
            RequestOptions::new().param("v", 0).priority(Priority::Low),
        )
        .await;
    assert_eq!(stale, Ok(json!({"fresh": true})));
    assert_eq!(transport.calls(), calls_before);

    let stats = optimizer.stats();
    assert_eq!(stats.throttled_rejections, 1);
    assert_eq!(stats.stale_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_normal_priority_pauses_then_proceeds() {
    let transport = Arc::new(MockTransport::ok(json!(1)));
    let optimizer = optimizer(&transport);

    for i in 0..11 {
        optimizer
            .request("/comments", RequestOptions::new().param("v", i))
            .await
            .unwrap();
    }
    assert!(optimizer.is_throttled("/comments"));

    let started = Instant::now();
    let result = optimizer
        .request("/comments", RequestOptions::new().param("v", "new"))
        .await;
    assert_eq!(result, Ok(json!(1)));
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_ignores_throttle() {
    let transport = Arc::new(MockTransport::ok(json!(1)));
    let optimizer = optimizer(&transport);

    for i in 0..12 {
        optimizer
            .request("/comments", RequestOptions::new().param("v", i).priority(Priority::High))
            .await
            .unwrap();
    }
    assert!(optimizer.is_throttled("/comments"));
    assert_eq!(transport.calls(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_clears_after_ten_seconds() {
    let transport = Arc::new(MockTransport::ok(json!(1)));
    let optimizer = optimizer(&transport);

    for _ in 0..11 {
        optimizer.request("/resources", RequestOptions::new()).await.unwrap();
    }
    assert!(optimizer.is_throttled("/resources"));

    advance(Duration::from_secs(10)).await;
    assert!(!optimizer.is_throttled("/resources"));

    let result = optimizer
        .request("/resources", RequestOptions::new().param("page", 2).priority(Priority::Low))
        .await;
    assert!(result.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_retries_with_increasing_delay() {
    let transport = Arc::new(
        MockTransport::ok(json!({"id": 3})).scripted(vec![
            Err(RequestError::Network("connection reset".to_string())),
            server_error(),
        ]),
    );
    let optimizer = optimizer(&transport);

    let started = Instant::now();
    let result = optimizer
        .request(
            "/resources/3",
            RequestOptions::new()
                .retry_count(2)
                .retry_delay(Duration::from_millis(1000)),
        )
        .await;

    assert_eq!(result, Ok(json!({"id": 3})));
    assert_eq!(transport.calls(), 3);
    // 1000ms after the first failure, 2000ms after the second
    assert!(started.elapsed() >= Duration::from_millis(3000));
    assert_eq!(optimizer.stats().retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_last_error() {
    let transport = Arc::new(MockTransport::new(server_error()));
    let optimizer = optimizer(&transport);

    let err = optimizer
        .request("/resources", RequestOptions::new().retry_count(1))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RequestError::Http {
            status: 500,
            message: "database unavailable".to_string(),
            code: None,
        }
    );
    assert_eq!(transport.calls(), 2);
    assert_eq!(optimizer.stats().pending, 0);
    assert_eq!(optimizer.stats().cached_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_transport_times_out() {
    let transport = Arc::new(MockTransport::ok(json!(1)).delayed(Duration::from_secs(60)));
    let optimizer = optimizer(&transport);

    let err = optimizer
        .request("/resources", RequestOptions::new().retry_count(0))
        .await
        .unwrap_err();
    assert_eq!(err, RequestError::Timeout(Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_json_is_a_decode_error() {
    let transport = Arc::new(MockTransport::new(Ok(HttpResponse::new(200, "<html>"))));
    let optimizer = optimizer(&transport);

    let err = optimizer
        .request("/resources", RequestOptions::new().retry_count(0))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Decode(_)));
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_by_endpoint_and_everything() {
    let transport = Arc::new(MockTransport::ok(json!([])));
    let optimizer = optimizer(&transport);

    optimizer.request("/resources", RequestOptions::new()).await.unwrap();
    optimizer.request("/comments", RequestOptions::new()).await.unwrap();
    assert_eq!(transport.calls(), 2);

    optimizer.invalidate(Some("/resources"));
    optimizer.request("/comments", RequestOptions::new()).await.unwrap();
    assert_eq!(transport.calls(), 2);
    optimizer.request("/resources", RequestOptions::new()).await.unwrap();
    assert_eq!(transport.calls(), 3);

    optimizer.invalidate(None);
    assert_eq!(optimizer.stats().cached_entries, 0);
    optimizer.request("/comments", RequestOptions::new()).await.unwrap();
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_batch_preserves_input_order() {
    let transport = Arc::new(MockTransport::echo());
    let optimizer = optimizer(&transport);

    let results = optimizer
        .batch(vec![
            ("/resources".to_string(), RequestOptions::new()),
            ("/comments".to_string(), RequestOptions::new().param("resource_id", 1)),
            ("/profiles".to_string(), RequestOptions::new()),
        ])
        .await;

    let urls: Vec<Value> = results.into_iter().map(|r| r.unwrap()["url"].clone()).collect();
    assert_eq!(
        urls,
        vec![
            json!("/resources"),
            json!("/comments?resource_id=1"),
            json!("/profiles")
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_does_not_cancel_siblings() {
    let transport = Arc::new(MockTransport::ok(json!("ok")).missing("/missing"));
    let optimizer = optimizer(&transport);

    let results = optimizer
        .batch(vec![
            ("/missing".to_string(), RequestOptions::new().retry_count(0)),
            ("/resources".to_string(), RequestOptions::new()),
        ])
        .await;

    assert_eq!(results[0].as_ref().unwrap_err().status(), Some(404));
    assert_eq!(results[1], Ok(json!("ok")));
}
