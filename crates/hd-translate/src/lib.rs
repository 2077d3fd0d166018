//! Herald Translation Engine
//!
//! On-demand translation of short user-facing text with the same resilience
//! discipline as the notification adapters. Request flow:
//!
//! 1. in-process LRU+TTL cache
//! 2. distributed cache (Redis, 24 h TTL)
//! 3. coalescing: concurrent identical requests share one in-flight call
//! 4. provider chain: primary first, then the fallback tiers in a rotating
//!    round-robin order, skipping providers with an open circuit or an
//!    exhausted monthly quota
//! 5. quality scoring; a low score falls through to the next tier
//! 6. persistence plus both cache layers on success
//!
//! Quota checks are fail-open: an unreachable counter store never blocks a
//! provider, its own API is left to refuse.

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use hd_common::{ErrorCode, HeraldError, ProviderStatus, TranslationRecord};
use hd_config::TranslationConfig;
use hd_resilience::{CircuitRegistry, QuotaGate, RetryBudget};
use hd_store::translations::{current_month, source_hash};
use hd_store::{TranslationQueueRepository, TranslationRepository};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod cache;
pub mod providers;
pub mod quality;

pub use providers::{TranslateAttempt, TranslateProvider};

use cache::LruTtlCache;

#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub context: Option<String>,
    /// Natural-key metadata for persisted translations; ad-hoc requests
    /// default to ("adhoc", <source hash>, "text").
    pub content_type: Option<String>,
    pub content_id: Option<String>,
    pub field_name: Option<String>,
}

impl TranslationRequest {
    pub fn adhoc(text: impl Into<String>, source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            context: None,
            content_type: None,
            content_id: None,
            field_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationOutcome {
    pub text: String,
    pub provider: String,
    pub quality: f64,
    #[serde(skip, default)]
    pub cached: bool,
}

type ChainResult = Result<TranslationOutcome, (ErrorCode, String)>;
type SharedChain = Shared<BoxFuture<'static, ChainResult>>;

struct Inner {
    providers: Vec<Arc<dyn TranslateProvider>>,
    circuits: Arc<CircuitRegistry>,
    budget: Arc<RetryBudget>,
    quota_gate: Arc<QuotaGate>,
    repo: Arc<dyn TranslationRepository>,
    queue: Arc<dyn TranslationQueueRepository>,
    redis: Option<ConnectionManager>,
    config: TranslationConfig,
    cache: LruTtlCache<String, TranslationOutcome>,
    inflight: DashMap<String, SharedChain>,
    rr: AtomicUsize,
}

#[derive(Clone)]
pub struct TranslationService {
    inner: Arc<Inner>,
}

impl TranslationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TranslationConfig,
        providers: Vec<Arc<dyn TranslateProvider>>,
        circuits: Arc<CircuitRegistry>,
        budget: Arc<RetryBudget>,
        quota_gate: Arc<QuotaGate>,
        repo: Arc<dyn TranslationRepository>,
        queue: Arc<dyn TranslationQueueRepository>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        let cache = LruTtlCache::new(config.cache_capacity, Duration::from_secs(config.cache_ttl_secs));
        info!(
            providers = providers.len(),
            cache_capacity = config.cache_capacity,
            "Translation service initialized"
        );
        Self {
            inner: Arc::new(Inner {
                providers,
                circuits,
                budget,
                quota_gate,
                repo,
                queue,
                redis,
                config,
                cache,
                inflight: DashMap::new(),
                rr: AtomicUsize::new(0),
            }),
        }
    }

    fn cache_key(request: &TranslationRequest) -> String {
        format!(
            "tr:{}:{}:{}",
            request.source_lang,
            request.target_lang,
            source_hash(&request.text)
        )
    }

    pub async fn translate(&self, request: TranslationRequest) -> hd_common::Result<TranslationOutcome> {
        let key = Self::cache_key(&request);

        if let Some(mut hit) = self.inner.cache.get(&key) {
            hit.cached = true;
            metrics::counter!("herald.translate.cache_hit", "layer" => "lru").increment(1);
            return Ok(hit);
        }

        if let Some(mut hit) = self.redis_get(&key).await {
            hit.cached = true;
            self.inner.cache.put(key.clone(), hit.clone());
            metrics::counter!("herald.translate.cache_hit", "layer" => "redis").increment(1);
            return Ok(hit);
        }

        // Coalesce concurrent identical requests onto one in-flight chain.
        let chain = match self.inner.inflight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                metrics::counter!("herald.translate.coalesced").increment(1);
                entry.get().clone()
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let inner = Arc::clone(&self.inner);
                let request = request.clone();
                let chain: SharedChain = async move { run_chain(inner, request).await }
                    .boxed()
                    .shared();
                entry.insert(chain.clone());
                chain
            }
        };

        let result = chain.await;
        self.inner.inflight.remove(&key);

        match result {
            Ok(outcome) => {
                self.inner.cache.put(key.clone(), outcome.clone());
                self.redis_put(&key, &outcome).await;
                Ok(outcome)
            }
            Err((code, message)) => Err(chain_error(code, message)),
        }
    }

    /// Translate a batch toward one target locale, in chunks of five.
    pub async fn batch_translate(
        &self,
        items: Vec<TranslationRequest>,
        target_locale: &str,
    ) -> Vec<hd_common::Result<TranslationOutcome>> {
        let mut results = Vec::with_capacity(items.len());
        for chunk in items.chunks(5) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|item| {
                    let mut request = item.clone();
                    request.target_lang = target_locale.to_string();
                    self.translate(request)
                })
                .collect();
            results.extend(futures::future::join_all(futures).await);
        }
        results
    }

    /// Drain the durable translation queue. Returns (done, failed).
    pub async fn process_queue(&self, limit: u32) -> hd_common::Result<(u32, u32)> {
        let items = self
            .inner
            .queue
            .claim(limit)
            .await
            .map_err(|e| HeraldError::Database(e.to_string()))?;

        let mut done = 0;
        let mut failed = 0;

        for item in items {
            let request = TranslationRequest {
                text: item.source_text.clone(),
                source_lang: item.source_locale.clone(),
                target_lang: item.target_locale.clone(),
                context: None,
                content_type: Some(item.content_type.clone()),
                content_id: Some(item.content_id.clone()),
                field_name: Some(item.field_name.clone()),
            };
            match self.translate(request).await {
                Ok(_) => {
                    if let Err(e) = self.inner.queue.mark_done(item.id).await {
                        warn!(error = %e, "Failed to mark translation item done");
                    }
                    done += 1;
                }
                Err(e) => {
                    if let Err(mark_err) =
                        self.inner.queue.mark_failed(item.id, &e.to_string(), 3).await
                    {
                        warn!(error = %mark_err, "Failed to mark translation item failed");
                    }
                    failed += 1;
                }
            }
        }

        if done + failed > 0 {
            info!(done, failed, "Translation queue pass complete");
        }
        Ok((done, failed))
    }

    /// Per-provider health snapshot for the translation health endpoint.
    pub async fn health(&self) -> HashMap<String, ProviderStatus> {
        let month = current_month();
        let mut services = HashMap::new();
        for provider in &self.inner.providers {
            let name = provider.name();
            let stats = self.inner.circuits.get(name).stats();
            let quota_percent = match self.inner.repo.get_usage(name, &month).await {
                Ok(Some(usage)) => Some(usage.percent_used()),
                _ => None,
            };
            services.insert(
                name.to_string(),
                ProviderStatus {
                    circuit_state: stats.state.as_str().to_string(),
                    quota_percent,
                    last_success: stats.last_success,
                },
            );
        }
        services
    }

    async fn redis_get(&self, key: &str) -> Option<TranslationOutcome> {
        let redis = self.inner.redis.as_ref()?;
        let mut conn = redis.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .ok()?;
        value.and_then(|v| serde_json::from_str(&v).ok())
    }

    async fn redis_put(&self, key: &str, outcome: &TranslationOutcome) {
        let Some(redis) = self.inner.redis.as_ref() else {
            return;
        };
        let Ok(value) = serde_json::to_string(outcome) else {
            return;
        };
        let mut conn = redis.clone();
        let result: redis::RedisResult<()> = redis::cmd("SETEX")
            .arg(key)
            .arg(self.inner.config.redis_ttl_secs)
            .arg(value)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            debug!(error = %e, "Distributed translation cache write failed");
        }
    }
}

fn chain_error(code: ErrorCode, message: String) -> HeraldError {
    match code {
        ErrorCode::AllServicesFailed => HeraldError::AllServicesFailed,
        ErrorCode::DeadlineExceeded => HeraldError::DeadlineExceeded,
        ErrorCode::QuotaExhausted => HeraldError::QuotaExhausted(message),
        _ => HeraldError::ServiceUnavailable(message),
    }
}

/// The provider chain: primary first, then fallbacks rotated for load
/// spreading. The first attempt is free; every further hop consumes one
/// token from the shared retry budget.
async fn run_chain(inner: Arc<Inner>, request: TranslationRequest) -> ChainResult {
    if inner.providers.is_empty() {
        return Err((ErrorCode::AllServicesFailed, "no translation providers configured".into()));
    }

    let mut chain: Vec<Arc<dyn TranslateProvider>> = Vec::with_capacity(inner.providers.len());
    chain.push(Arc::clone(&inner.providers[0]));
    let fallbacks = &inner.providers[1..];
    if !fallbacks.is_empty() {
        let start = inner.rr.fetch_add(1, Ordering::Relaxed) % fallbacks.len();
        for i in 0..fallbacks.len() {
            chain.push(Arc::clone(&fallbacks[(start + i) % fallbacks.len()]));
        }
    }

    let timeout = Duration::from_secs(inner.config.request_deadline_secs);
    let month = current_month();
    let mut attempted = 0u32;
    let mut best: Option<TranslationOutcome> = None;

    for provider in chain {
        let name = provider.name();

        if inner.quota_gate.is_exhausted(name) {
            debug!(provider = %name, "Skipping provider in quota cooldown");
            continue;
        }
        if let Some(limit) = inner.config.monthly_quota.get(name) {
            // Fail-open: a store error does not exclude the provider.
            if let Ok(Some(usage)) = inner.repo.get_usage(name, &month).await {
                if usage.used >= *limit {
                    debug!(provider = %name, "Skipping provider over monthly quota");
                    continue;
                }
            }
        }

        let breaker = inner.circuits.get(name);
        if !breaker.allow_request() {
            debug!(provider = %name, "Skipping provider with open circuit");
            continue;
        }

        if attempted > 0 && !inner.budget.try_consume() {
            warn!("Retry budget exhausted, stopping translation fallback chain");
            break;
        }
        attempted += 1;

        let attempt = provider
            .translate(
                &request.text,
                &request.source_lang,
                &request.target_lang,
                request.context.as_deref(),
                timeout,
            )
            .await;

        match attempt {
            TranslateAttempt::Translated { text, latency_ms } => {
                breaker.record_success();
                let chars = request.text.chars().count() as i64;
                let limit = inner.config.monthly_quota.get(name).copied().unwrap_or(0);
                if let Err(e) = inner.repo.record_usage(name, &month, chars, limit).await {
                    debug!(error = %e, "Usage counter write failed");
                }
                let _ = inner
                    .repo
                    .record_provider_metric(name, true, Some(latency_ms as i64), None)
                    .await;

                let quality = quality::score(&request.text, &text);
                let outcome = TranslationOutcome {
                    text,
                    provider: name.to_string(),
                    quality,
                    cached: false,
                };

                if quality >= inner.config.quality_threshold {
                    persist(&inner, &request, &outcome).await;
                    metrics::counter!("herald.translate.success", "provider" => name.to_string())
                        .increment(1);
                    return Ok(outcome);
                }

                debug!(provider = %name, quality, "Low quality translation, trying next tier");
                if best.as_ref().map(|b| quality > b.quality).unwrap_or(true) {
                    best = Some(outcome);
                }
            }
            TranslateAttempt::Retryable { message } => {
                breaker.record_failure();
                let _ = inner
                    .repo
                    .record_provider_metric(name, false, None, Some(&message))
                    .await;
                warn!(provider = %name, message = %message, "Translation provider failed");
            }
            TranslateAttempt::Fatal { message } => {
                breaker.record_non_retryable();
                let _ = inner
                    .repo
                    .record_provider_metric(name, false, None, Some(&message))
                    .await;
                warn!(provider = %name, message = %message, "Translation provider rejected request");
            }
            TranslateAttempt::QuotaRejected { message } => {
                breaker.record_non_retryable();
                inner.quota_gate.mark_exhausted(name);
                warn!(provider = %name, message = %message, "Provider reported quota exhausted");
            }
        }
    }

    // Every tier failed or scored low; a low-quality translation still beats
    // none at all.
    match best {
        Some(outcome) => {
            persist(&inner, &request, &outcome).await;
            Ok(outcome)
        }
        None => Err((
            ErrorCode::AllServicesFailed,
            "all translation providers failed".into(),
        )),
    }
}

async fn persist(inner: &Inner, request: &TranslationRequest, outcome: &TranslationOutcome) {
    let record = TranslationRecord {
        content_type: request.content_type.clone().unwrap_or_else(|| "adhoc".into()),
        content_id: request
            .content_id
            .clone()
            .unwrap_or_else(|| source_hash(&request.text)),
        field_name: request.field_name.clone().unwrap_or_else(|| "text".into()),
        target_locale: request.target_lang.clone(),
        translated_text: outcome.text.clone(),
        source_hash: source_hash(&request.text),
        quality: outcome.quality,
        provider: outcome.provider.clone(),
        expires_at: Some(chrono::Utc::now() + chrono::Duration::days(30)),
    };
    if let Err(e) = inner.repo.store(&record).await {
        // Persistence failures do not fail the user-visible translation.
        warn!(error = %e, "Failed to persist translation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hd_resilience::CircuitBreakerConfig;
    use hd_store::memory::{MemoryTranslationQueue, MemoryTranslations};
    use hd_store::TranslationQueueItem;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    struct FakeProvider {
        name: &'static str,
        script: Mutex<Vec<TranslateAttempt>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl FakeProvider {
        fn new(name: &'static str, script: Vec<TranslateAttempt>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(vec![]),
                calls: AtomicU32::new(0),
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslateProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn translate(
            &self,
            text: &str,
            _source: &str,
            _target: &str,
            _context: Option<&str>,
            _timeout: Duration,
        ) -> TranslateAttempt {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock();
            if script.is_empty() {
                TranslateAttempt::Translated {
                    text: format!("übersetzt: {}", text),
                    latency_ms: 2,
                }
            } else {
                script.remove(0)
            }
        }
    }

    fn service(providers: Vec<Arc<dyn TranslateProvider>>) -> (TranslationService, Arc<RetryBudget>, Arc<QuotaGate>) {
        let budget = Arc::new(RetryBudget::new(20, Duration::from_secs(60)));
        let quota_gate = Arc::new(QuotaGate::default());
        let service = TranslationService::new(
            TranslationConfig::default(),
            providers,
            Arc::new(CircuitRegistry::new(CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                reset_timeout: Duration::from_secs(60),
                half_open_max_probes: 2,
            })),
            Arc::clone(&budget),
            Arc::clone(&quota_gate),
            Arc::new(MemoryTranslations::new()),
            Arc::new(MemoryTranslationQueue::new()),
            None,
        );
        (service, budget, quota_gate)
    }

    #[tokio::test]
    async fn test_primary_success_no_budget_spent() {
        let primary = FakeProvider::new("llm", vec![]);
        let (service, budget, _) = service(vec![primary.clone()]);

        let outcome = service
            .translate(TranslationRequest::adhoc("Hello world", "en", "de"))
            .await
            .unwrap();

        assert_eq!(outcome.provider, "llm");
        assert!(!outcome.cached);
        assert_eq!(primary.calls(), 1);
        assert_eq!(budget.remaining(), 20);
    }

    #[tokio::test]
    async fn test_cache_hit_on_second_call() {
        let primary = FakeProvider::new("llm", vec![]);
        let (service, _, _) = service(vec![primary.clone()]);

        let first = service
            .translate(TranslationRequest::adhoc("Hello world", "en", "de"))
            .await
            .unwrap();
        let second = service
            .translate(TranslationRequest::adhoc("Hello world", "en", "de"))
            .await
            .unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.text, first.text);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let primary = FakeProvider::slow("llm", Duration::from_millis(50));
        let (service, _, _) = service(vec![primary.clone()]);

        let a = service.translate(TranslationRequest::adhoc("Hello", "en", "cs"));
        let b = service.translate(TranslationRequest::adhoc("Hello", "en", "cs"));
        let (a, b) = tokio::join!(a, b);

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_chain_spends_budget() {
        let primary = FakeProvider::new(
            "llm",
            vec![TranslateAttempt::Retryable {
                message: "timeout".to_string(),
            }],
        );
        let deepl = FakeProvider::new("deepl", vec![]);
        let google = FakeProvider::new("google", vec![]);
        let (service, budget, quota_gate) =
            service(vec![primary.clone(), deepl.clone(), google.clone()]);
        // DeepL in quota cooldown: skipped without a call and without
        // consuming budget.
        quota_gate.mark_exhausted("deepl");

        let outcome = service
            .translate(TranslationRequest::adhoc("Hello there my friend", "en", "fr"))
            .await
            .unwrap();

        assert_eq!(outcome.provider, "google");
        assert_eq!(primary.calls(), 1);
        assert_eq!(deepl.calls(), 0);
        assert_eq!(google.calls(), 1);
        // One fallback hop consumed one retry token.
        assert_eq!(budget.remaining(), 19);
    }

    #[tokio::test]
    async fn test_low_quality_triggers_fallback() {
        // Identity output scores far below the threshold.
        let primary = FakeProvider::new(
            "llm",
            vec![TranslateAttempt::Translated {
                text: "Hello world".to_string(),
                latency_ms: 1,
            }],
        );
        let backup = FakeProvider::new("deepl", vec![]);
        let (service, _, _) = service(vec![primary.clone(), backup.clone()]);

        let outcome = service
            .translate(TranslationRequest::adhoc("Hello world", "en", "de"))
            .await
            .unwrap();

        assert_eq!(outcome.provider, "deepl");
        assert!(outcome.quality >= 0.5);
        assert_eq!(backup.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_failed() {
        let primary = FakeProvider::new(
            "llm",
            vec![TranslateAttempt::Retryable { message: "down".to_string() }; 2],
        );
        let (service, _, _) = service(vec![primary]);

        let err = service
            .translate(TranslationRequest::adhoc("Hello", "en", "de"))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::AllServicesFailed));
    }

    #[tokio::test]
    async fn test_process_queue_marks_done() {
        let primary = FakeProvider::new("llm", vec![]);
        let queue = Arc::new(MemoryTranslationQueue::new());
        let service = TranslationService::new(
            TranslationConfig::default(),
            vec![primary],
            Arc::new(CircuitRegistry::default()),
            Arc::new(RetryBudget::default()),
            Arc::new(QuotaGate::default()),
            Arc::new(MemoryTranslations::new()),
            queue.clone(),
            None,
        );

        let item = TranslationQueueItem {
            id: uuid::Uuid::new_v4(),
            content_type: "listing".to_string(),
            content_id: "42".to_string(),
            field_name: "title".to_string(),
            source_text: "Wooden chair for sale".to_string(),
            source_locale: "en".to_string(),
            target_locale: "cs".to_string(),
            attempts: 0,
        };
        queue.enqueue(&item).await.unwrap();

        let (done, failed) = service.process_queue(10).await.unwrap();
        assert_eq!((done, failed), (1, 0));
        assert_eq!(
            queue.status(item.id),
            Some(hd_common::QueueStatus::Completed)
        );
    }
}
