//! Platform adapters
//!
//! One capability interface over every publishing destination. Workers
//! never know which network they are talking to; they hand the adapter a
//! post and a resolved credential and get back a remote post id or a
//! classified failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::types::{Credential, MetricMap, Platform, Post};

pub mod mock;
pub mod website;

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Capability over one publishing destination.
///
/// Implementations classify every failure as transient or permanent; the
/// retry policy decides what happens next. They must be safe to call
/// concurrently from multiple workers.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// The platform this adapter serves.
    fn platform(&self) -> Platform;

    /// Publish the post, returning the platform-assigned remote post id.
    async fn publish(&self, post: &Post, credential: &Credential) -> AdapterResult<String>;

    /// Fetch current metrics for a previously published post.
    async fn fetch_analytics(
        &self,
        remote_post_id: &str,
        credential: &Credential,
    ) -> AdapterResult<MetricMap>;
}

/// Maps platforms to adapter instances. Built once at startup and handed to
/// the workers; there are no process-wide adapter globals.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}
