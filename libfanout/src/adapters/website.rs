//! Website adapter
//!
//! Publishes to a client-owned site through its publishing endpoint: a
//! small HTTP API the site exposes (`POST /posts`, `GET /posts/:id/metrics`)
//! authenticated with the tenant's bearer token. Serves as the reference
//! adapter implementation; the social-network adapters follow the same
//! shape against their vendor APIs.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{AdapterResult, PlatformAdapter};
use crate::error::AdapterError;
use crate::types::{Credential, MetricMap, Platform, Post};

pub struct WebsiteAdapter {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct PublishResponse {
    id: String,
}

impl WebsiteAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn classify_status(status: StatusCode, context: &str) -> AdapterError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            AdapterError::Transient(format!("{}: rate limited (429)", context))
        } else if status.is_server_error() {
            AdapterError::Transient(format!("{}: server error ({})", context, status))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            AdapterError::Permanent(format!("{}: credential rejected ({})", context, status))
        } else {
            AdapterError::Permanent(format!("{}: request rejected ({})", context, status))
        }
    }

    fn classify_request_error(error: reqwest::Error, context: &str) -> AdapterError {
        // Connection refusals, DNS hiccups, and timeouts are all worth a
        // retry; the endpoint may just be mid-deploy.
        AdapterError::Transient(format!("{}: {}", context, error))
    }
}

#[async_trait]
impl PlatformAdapter for WebsiteAdapter {
    fn platform(&self) -> Platform {
        Platform::Website
    }

    async fn publish(&self, post: &Post, credential: &Credential) -> AdapterResult<String> {
        let url = format!("{}/posts", self.endpoint);
        let payload = json!({
            "title": post.title,
            "body": post.body,
            "assets": post.assets,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.token())
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::classify_request_error(e, "website publish"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, "website publish"));
        }

        let body: PublishResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Permanent(format!("website publish: malformed response: {}", e)))?;

        Ok(body.id)
    }

    async fn fetch_analytics(
        &self,
        remote_post_id: &str,
        credential: &Credential,
    ) -> AdapterResult<MetricMap> {
        let url = format!("{}/posts/{}/metrics", self.endpoint, remote_post_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.token())
            .send()
            .await
            .map_err(|e| Self::classify_request_error(e, "website analytics"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, "website analytics"));
        }

        response.json::<MetricMap>().await.map_err(|e| {
            AdapterError::Permanent(format!("website analytics: malformed response: {}", e))
        })
    }
}
