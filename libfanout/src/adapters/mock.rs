//! Mock adapter for testing
//!
//! A scripted adapter used by unit and integration tests to exercise the
//! worker pipeline without credentials or network access. Behavior is set
//! up front (always succeed, fail N times then succeed, always fail) and
//! every call is counted and recorded for verification.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{AdapterResult, PlatformAdapter};
use crate::error::AdapterError;
use crate::types::{Credential, MetricMap, Platform, Post};

#[derive(Clone)]
pub struct MockAdapter {
    inner: Arc<MockState>,
}

struct MockState {
    platform: Platform,
    /// Failures consumed one per publish call before publishes succeed.
    scripted_failures: Mutex<VecDeque<AdapterError>>,
    /// When set, every publish fails with this error.
    publish_error: Mutex<Option<AdapterError>>,
    /// When set, every analytics fetch fails with this error.
    fetch_error: Mutex<Option<AdapterError>>,
    /// Metrics returned by successful fetches.
    metrics: Mutex<MetricMap>,
    publish_calls: Mutex<usize>,
    fetch_calls: Mutex<usize>,
    published_posts: Mutex<Vec<String>>,
}

impl MockAdapter {
    fn with_state(platform: Platform) -> Self {
        Self {
            inner: Arc::new(MockState {
                platform,
                scripted_failures: Mutex::new(VecDeque::new()),
                publish_error: Mutex::new(None),
                fetch_error: Mutex::new(None),
                metrics: Mutex::new(MetricMap::new()),
                publish_calls: Mutex::new(0),
                fetch_calls: Mutex::new(0),
                published_posts: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Adapter where every call succeeds.
    pub fn succeeding(platform: Platform) -> Self {
        Self::with_state(platform)
    }

    /// Adapter where every publish fails with `error`.
    pub fn failing(platform: Platform, error: AdapterError) -> Self {
        let adapter = Self::with_state(platform);
        *adapter.inner.publish_error.lock().unwrap() = Some(error);
        adapter
    }

    /// Adapter that fails `failures` publishes transiently, then succeeds.
    pub fn flaky(platform: Platform, failures: usize) -> Self {
        let adapter = Self::with_state(platform);
        {
            let mut scripted = adapter.inner.scripted_failures.lock().unwrap();
            for _ in 0..failures {
                scripted.push_back(AdapterError::Transient("scripted transient".to_string()));
            }
        }
        adapter
    }

    /// Make analytics fetches fail with `error`.
    pub fn with_fetch_error(self, error: AdapterError) -> Self {
        *self.inner.fetch_error.lock().unwrap() = Some(error);
        self
    }

    /// Set the metrics returned by successful fetches.
    pub fn with_metrics(self, metrics: MetricMap) -> Self {
        *self.inner.metrics.lock().unwrap() = metrics;
        self
    }

    pub fn publish_calls(&self) -> usize {
        *self.inner.publish_calls.lock().unwrap()
    }

    pub fn fetch_calls(&self) -> usize {
        *self.inner.fetch_calls.lock().unwrap()
    }

    pub fn published_posts(&self) -> Vec<String> {
        self.inner.published_posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.inner.platform
    }

    async fn publish(&self, post: &Post, _credential: &Credential) -> AdapterResult<String> {
        *self.inner.publish_calls.lock().unwrap() += 1;

        if let Some(error) = self.inner.publish_error.lock().unwrap().clone() {
            return Err(error);
        }

        if let Some(error) = self.inner.scripted_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        self.inner
            .published_posts
            .lock()
            .unwrap()
            .push(post.id.clone());

        Ok(format!(
            "{}-remote-{}",
            self.inner.platform,
            uuid::Uuid::new_v4()
        ))
    }

    async fn fetch_analytics(
        &self,
        _remote_post_id: &str,
        _credential: &Credential,
    ) -> AdapterResult<MetricMap> {
        *self.inner.fetch_calls.lock().unwrap() += 1;

        if let Some(error) = self.inner.fetch_error.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(self.inner.metrics.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> Post {
        Post::new("t-1", "c-1", "Title", "Body", vec![Platform::Website])
    }

    #[tokio::test]
    async fn test_succeeding_adapter() {
        let adapter = MockAdapter::succeeding(Platform::Website);
        let credential = Credential::new("tok");

        let remote = adapter.publish(&post(), &credential).await.unwrap();
        assert!(remote.starts_with("website-remote-"));
        assert_eq!(adapter.publish_calls(), 1);
        assert_eq!(adapter.published_posts().len(), 1);
    }

    #[tokio::test]
    async fn test_flaky_adapter_fails_then_succeeds() {
        let adapter = MockAdapter::flaky(Platform::Facebook, 2);
        let credential = Credential::new("tok");
        let post = post();

        assert!(adapter.publish(&post, &credential).await.is_err());
        assert!(adapter.publish(&post, &credential).await.is_err());
        assert!(adapter.publish(&post, &credential).await.is_ok());
        assert_eq!(adapter.publish_calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_adapter_never_recovers() {
        let adapter = MockAdapter::failing(
            Platform::Instagram,
            AdapterError::Permanent("content rejected".to_string()),
        );
        let credential = Credential::new("tok");
        let post = post();

        for _ in 0..3 {
            let error = adapter.publish(&post, &credential).await.unwrap_err();
            assert!(matches!(error, AdapterError::Permanent(_)));
        }
        assert!(adapter.published_posts().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_metrics() {
        let mut metrics = MetricMap::new();
        metrics.insert("likes".to_string(), 12.0);
        let adapter = MockAdapter::succeeding(Platform::Website).with_metrics(metrics);

        let credential = Credential::new("tok");
        let fetched = adapter
            .fetch_analytics("remote-1", &credential)
            .await
            .unwrap();
        assert_eq!(fetched["likes"], 12.0);
        assert_eq!(adapter.fetch_calls(), 1);
    }
}
