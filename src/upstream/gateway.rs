//! Upstream call gateway.
//!
//! # Responsibilities
//! - Admit or reject callers through the rate limiter
//! - Serve repeated retrieval queries from the result cache
//! - Fail fast while the circuit is open
//! - Run non-streaming calls under the retry controller with a deadline
//!   per attempt
//! - Open streaming calls and hand them to the stream relay
//!
//! # Design Decisions
//! - All shared state is owned here behind `Arc`s and injected into the
//!   HTTP layer; nothing is global
//! - Cache hits bypass the breaker and the retry controller entirely
//! - Only complete retrieval results are cached; document management and
//!   generation calls never are
//! - Streams are never retried

use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResultCache;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retries::{RetryController, RetryPolicy};
use crate::resilience::timeouts::with_timeout;
use crate::security::rate_limit::RateLimiter;
use crate::streaming::{EventStream, RelaySettings, StreamEvent, StreamRelay};
use crate::upstream::client::Upstream;
use crate::upstream::types::{is_partial_result, GenerateRequest, UpstreamRequest};

/// Entry point for every upstream call.
#[derive(Clone)]
pub struct Gateway {
    upstream: Arc<dyn Upstream>,
    breaker: Arc<CircuitBreaker>,
    limiter: Option<Arc<RateLimiter>>,
    cache: Option<Arc<ResultCache<Value>>>,
    retrier: RetryController,
    relay: StreamRelay,
    request_timeout: Duration,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, upstream: Arc<dyn Upstream>) -> Self {
        let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));

        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit)));
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(ResultCache::new(Duration::from_secs(config.cache.ttl_secs))));

        let retrier = RetryController::new(RetryPolicy::from(&config.retries), breaker.clone());
        let relay = StreamRelay::new(
            breaker.clone(),
            RelaySettings::from_config(&config.upstream, &config.stream),
        );

        Self {
            upstream,
            breaker,
            limiter,
            cache,
            retrier,
            relay,
            request_timeout: config.upstream.request_timeout(),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache<Value>>> {
        self.cache.as_ref()
    }

    pub fn retrier(&self) -> &RetryController {
        &self.retrier
    }

    /// Requests `identity` may still make in the current window.
    pub fn remaining(&self, identity: &str) -> Option<u32> {
        self.limiter.as_ref().map(|l| l.remaining(identity))
    }

    fn check_rate_limit(&self, identity: &str) -> GatewayResult<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        if limiter.is_allowed(identity) {
            return Ok(());
        }

        let retry_after = limiter.retry_after(identity);
        tracing::warn!(identity = %identity, retry_after = ?retry_after, "Rate limit exceeded");
        Err(GatewayError::RateLimited { retry_after })
    }

    fn check_breaker(&self) -> GatewayResult<()> {
        if self.breaker.admit() {
            return Ok(());
        }

        let retry_after = self.breaker.retry_after();
        tracing::warn!(retry_after = ?retry_after, "Circuit open, rejecting upstream call");
        Err(GatewayError::ServiceUnavailable { retry_after })
    }

    /// Perform one logical non-streaming call.
    pub async fn call_non_streaming(
        &self,
        identity: &str,
        request: UpstreamRequest,
    ) -> GatewayResult<Value> {
        self.check_rate_limit(identity)?;

        let cache_key = match (&request, &self.cache) {
            (UpstreamRequest::Query(query), Some(cache)) => {
                let key = query.cache_key();
                if let Some(hit) = cache.get(&key) {
                    tracing::debug!(query = %query.query, "Serving query from cache");
                    return Ok(hit);
                }
                Some(key)
            }
            _ => None,
        };

        self.check_breaker()?;

        let upstream = self.upstream.as_ref();
        let pending = &request;
        let limit = self.request_timeout;
        let result = self
            .retrier
            .execute(move || async move { with_timeout(limit, dispatch(upstream, pending)).await })
            .await;

        match result {
            Ok(value) => {
                if let (Some(key), Some(cache)) = (cache_key, &self.cache) {
                    if is_partial_result(&value) {
                        tracing::debug!("Partial query result, not caching");
                    } else {
                        cache.set(key, value.clone());
                    }
                }
                Ok(value)
            }
            Err(err) => {
                tracing::error!(kind = request.kind(), error = %err, "Upstream call failed");
                Err(err)
            }
        }
    }

    /// Admit and open a streaming generation.
    ///
    /// Rejections come back as `Err` before anything is spawned; once the
    /// stream exists every failure arrives as its terminal `Error` event.
    pub fn open_stream(&self, identity: &str, request: GenerateRequest) -> GatewayResult<EventStream> {
        self.check_rate_limit(identity)?;
        self.check_breaker()?;
        Ok(self.relay.spawn(self.upstream.clone(), request))
    }

    /// Like [`open_stream`](Self::open_stream), with rejections folded into
    /// the stream as a single `Error` event.
    pub fn call_streaming(&self, identity: &str, request: GenerateRequest) -> EventStream {
        match self.open_stream(identity, request) {
            Ok(events) => events,
            Err(err) => tokio_stream::once(StreamEvent::Error(err.to_string())).boxed(),
        }
    }
}

/// One attempt of a non-streaming call.
async fn dispatch(upstream: &dyn Upstream, request: &UpstreamRequest) -> GatewayResult<Value> {
    match request {
        UpstreamRequest::Query(query) => upstream.query(query).await,
        UpstreamRequest::Generate(generate) => upstream.generate(generate).await,
        UpstreamRequest::ListDocuments(page) => upstream.list_documents(page).await,
        UpstreamRequest::DeleteDocument(name) => upstream.delete_document(name).await,
        UpstreamRequest::GetOperation(name) => upstream.get_operation(name).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::upstream::client::ByteStream;
    use crate::upstream::types::{ListDocumentsRequest, QueryRequest};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Upstream that replays scripted outcomes, then a fixed fallback.
    #[derive(Default)]
    struct ScriptedUpstream {
        outcomes: Mutex<VecDeque<GatewayResult<Value>>>,
        stream_chunks: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedUpstream {
        fn with(outcomes: Vec<GatewayResult<Value>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Default::default()
            })
        }

        fn next(&self) -> GatewayResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"relevant_chunks": []})))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn query(&self, _request: &QueryRequest) -> GatewayResult<Value> {
            self.next()
        }

        async fn generate(&self, _request: &GenerateRequest) -> GatewayResult<Value> {
            self.next()
        }

        async fn generate_stream(&self, _request: &GenerateRequest) -> GatewayResult<ByteStream> {
            self.next()?;
            let chunks: Vec<GatewayResult<Bytes>> = self
                .stream_chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            Ok(futures_util::stream::iter(chunks).boxed())
        }

        async fn list_documents(&self, _request: &ListDocumentsRequest) -> GatewayResult<Value> {
            self.next()
        }

        async fn delete_document(&self, _name: &str) -> GatewayResult<Value> {
            self.next()
        }

        async fn get_operation(&self, _name: &str) -> GatewayResult<Value> {
            self.next()
        }
    }

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.rate_limit.max_requests = 100;
        config
    }

    fn limited() -> GatewayError {
        GatewayError::UpstreamRateLimited("quota".into())
    }

    fn query(text: &str) -> UpstreamRequest {
        UpstreamRequest::Query(QueryRequest::new(text))
    }

    #[tokio::test]
    async fn test_cache_hit_skips_upstream() {
        let upstream = ScriptedUpstream::with(vec![Ok(json!({"answer": 1}))]);
        let gateway = Gateway::new(&config(), upstream.clone());

        let first = gateway.call_non_streaming("a", query("X")).await.unwrap();
        let second = gateway.call_non_streaming("a", query("X")).await.unwrap();

        assert_eq!(first, json!({"answer": 1}));
        assert_eq!(second, first);
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_ignores_open_circuit() {
        let upstream = ScriptedUpstream::with(vec![Ok(json!({"answer": 1}))]);
        let gateway = Gateway::new(&config(), upstream.clone());
        gateway.call_non_streaming("a", query("X")).await.unwrap();

        for _ in 0..5 {
            gateway.breaker().record_failure();
        }
        assert!(gateway.call_non_streaming("a", query("X")).await.is_ok());
        assert!(matches!(
            gateway.call_non_streaming("a", query("Y")).await,
            Err(GatewayError::ServiceUnavailable { .. })
        ));
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_generation_is_not_cached() {
        let upstream = ScriptedUpstream::with(vec![]);
        let gateway = Gateway::new(&config(), upstream.clone());
        let request = UpstreamRequest::Generate(GenerateRequest::new("hello"));

        gateway.call_non_streaming("a", request.clone()).await.unwrap();
        gateway.call_non_streaming("a", request).await.unwrap();

        assert_eq!(upstream.calls(), 2);
        assert_eq!(gateway.cache().unwrap().size(), 0);
    }

    #[tokio::test]
    async fn test_partial_result_is_not_cached() {
        let partial = json!({"relevant_chunks": [], "documents_skipped": 1});
        let upstream = ScriptedUpstream::with(vec![Ok(partial.clone()), Ok(partial)]);
        let gateway = Gateway::new(&config(), upstream.clone());

        gateway.call_non_streaming("a", query("X")).await.unwrap();
        gateway.call_non_streaming("a", query("X")).await.unwrap();

        assert_eq!(upstream.calls(), 2);
        assert_eq!(gateway.cache().unwrap().size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_document_calls_are_retried_and_not_cached() {
        let upstream = ScriptedUpstream::with(vec![
            Err(limited()),
            Ok(json!({"documents": [], "nextPageToken": ""})),
            Ok(json!({"name": "fileSearchStores/s/documents/d"})),
        ]);
        let gateway = Gateway::new(&config(), upstream.clone());

        let page = gateway
            .call_non_streaming("a", UpstreamRequest::ListDocuments(ListDocumentsRequest::default()))
            .await
            .unwrap();
        assert_eq!(page["documents"], json!([]));
        assert_eq!(upstream.calls(), 2);
        assert_eq!(gateway.breaker().snapshot().failure_count, 0);

        gateway
            .call_non_streaming(
                "a",
                UpstreamRequest::DeleteDocument("fileSearchStores/s/documents/d".into()),
            )
            .await
            .unwrap();
        assert_eq!(upstream.calls(), 3);
        assert_eq!(gateway.cache().unwrap().size(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_caller_never_reaches_upstream() {
        let mut config = config();
        config.rate_limit.max_requests = 2;
        let upstream = ScriptedUpstream::with(vec![]);
        let gateway = Gateway::new(&config, upstream.clone());

        assert!(gateway.call_non_streaming("a", query("1")).await.is_ok());
        assert!(gateway.call_non_streaming("a", query("2")).await.is_ok());
        let err = gateway.call_non_streaming("a", query("3")).await.unwrap_err();

        assert!(matches!(err, GatewayError::RateLimited { retry_after } if retry_after > Duration::ZERO));
        assert_eq!(upstream.calls(), 2);
        assert_eq!(gateway.remaining("a"), Some(0));
        assert_eq!(gateway.remaining("b"), Some(2));
        // Other identities are unaffected
        assert!(gateway.call_non_streaming("b", query("3")).await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_everyone() {
        let mut config = config();
        config.rate_limit.enabled = false;
        config.rate_limit.max_requests = 1;
        let gateway = Gateway::new(&config, ScriptedUpstream::with(vec![]));

        for i in 0..5 {
            assert!(gateway.call_non_streaming("a", query(&i.to_string())).await.is_ok());
        }
        assert_eq!(gateway.remaining("a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds_and_caches() {
        let upstream = ScriptedUpstream::with(vec![Err(limited()), Ok(json!({"ok": true}))]);
        let gateway = Gateway::new(&config(), upstream.clone());

        let value = gateway.call_non_streaming("a", query("X")).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(upstream.calls(), 2);
        assert_eq!(gateway.breaker().state(), CircuitState::Closed);
        assert_eq!(gateway.cache().unwrap().size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_and_are_not_cached() {
        let upstream = ScriptedUpstream::with(vec![Err(limited()), Err(limited()), Err(limited())]);
        let gateway = Gateway::new(&config(), upstream.clone());

        let err = gateway.call_non_streaming("a", query("X")).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamRateLimited(_)));
        assert_eq!(upstream.calls(), 3);
        assert_eq!(gateway.breaker().snapshot().failure_count, 3);
        assert_eq!(gateway.cache().unwrap().size(), 0);
    }

    #[tokio::test]
    async fn test_generic_error_is_not_retried() {
        let upstream = ScriptedUpstream::with(vec![Err(GatewayError::Upstream {
            status: Some(500),
            message: "boom".into(),
        })]);
        let gateway = Gateway::new(&config(), upstream.clone());

        let err = gateway.call_non_streaming("a", query("X")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { status: Some(500), .. }));
        assert_eq!(upstream.calls(), 1);
        assert_eq!(gateway.breaker().snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_overload_opens_circuit() {
        let mut config = config();
        config.circuit_breaker.failure_threshold = 3;
        let upstream = ScriptedUpstream::with(vec![Err(limited()), Err(limited()), Err(limited())]);
        let gateway = Gateway::new(&config, upstream.clone());

        assert!(gateway.call_non_streaming("a", query("X")).await.is_err());
        assert_eq!(gateway.breaker().state(), CircuitState::Open);

        let err = gateway.call_non_streaming("a", query("Y")).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceUnavailable { .. }));
        assert_eq!(upstream.calls(), 3);
    }

    #[tokio::test]
    async fn test_stream_relays_events() {
        let upstream = Arc::new(ScriptedUpstream {
            stream_chunks: vec![
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}]}\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" there\"}]}}]}\n",
            ],
            ..Default::default()
        });
        let gateway = Gateway::new(&config(), upstream);

        let events: Vec<_> = gateway
            .call_streaming("a", GenerateRequest::new("q"))
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Text("Hi".into()),
                StreamEvent::Text(" there".into()),
                StreamEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_open_rate_limit_is_recorded() {
        let mut config = config();
        config.circuit_breaker.failure_threshold = 1;
        let upstream = ScriptedUpstream::with(vec![Err(limited())]);
        let gateway = Gateway::new(&config, upstream.clone());

        let events: Vec<_> = gateway
            .call_streaming("a", GenerateRequest::new("q"))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error(_)));
        assert_eq!(gateway.breaker().state(), CircuitState::Open);

        // Open circuit: rejected up front, single terminal event, no upstream call
        assert!(matches!(
            gateway.open_stream("a", GenerateRequest::new("q")),
            Err(GatewayError::ServiceUnavailable { .. })
        ));
        let events: Vec<_> = gateway
            .call_streaming("a", GenerateRequest::new("q"))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_stream_counts_against_rate_limit() {
        let mut config = config();
        config.rate_limit.max_requests = 1;
        let gateway = Gateway::new(&config, Arc::new(ScriptedUpstream::default()));

        assert!(gateway.open_stream("a", GenerateRequest::new("q")).is_ok());
        assert!(matches!(
            gateway.open_stream("a", GenerateRequest::new("q")),
            Err(GatewayError::RateLimited { .. })
        ));
    }
}
