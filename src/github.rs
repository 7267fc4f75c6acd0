#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! [`PullRequestHost`] over the GitHub REST API.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::host::{PullRequestHost, PullRequestRef, PullRequestState};

/// Media type for JSON responses.
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
/// Media type that makes the pulls endpoint return a mailbox patch.
const PATCH_MEDIA_TYPE: &str = "application/vnd.github.v3.patch";

/// Subset of the pull request resource the grader reads.
#[derive(Debug, Deserialize)]
struct PullRequestResource {
    /// Author of the pull request.
    user:      UserResource,
    /// Whether it has been merged.
    #[serde(default)]
    merged:    bool,
    /// `null` while GitHub is still computing it.
    mergeable: Option<bool>,
}

/// Subset of the user resource.
#[derive(Debug, Deserialize)]
struct UserResource {
    /// Numeric account id.
    id: u64,
}

/// Talks to GitHub on behalf of the grader account.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    /// HTTP client.
    client:   Client,
    /// API base URL without a trailing slash.
    base_url: String,
    /// Personal access or app token.
    token:    String,
}

impl GitHubClient {
    /// Creates a client for the API at `base_url`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("classgrade/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Could not build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// URL of the pull request resource.
    fn pull_url(&self, pr: &PullRequestRef) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}",
            self.base_url, pr.owner, pr.repo, pr.number
        )
    }

    /// Adds the headers every request carries.
    fn authorized(&self, request: RequestBuilder, accept: &str) -> RequestBuilder {
        request
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("Authorization", format!("Bearer {}", self.token))
    }

    /// Sends `request`, turning non-success statuses into errors.
    async fn send(request: RequestBuilder, what: &str, pr: &PullRequestRef) -> Result<Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Could not {what} for {pr}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub returned {status} trying to {what} for {pr}: {body}");
        }
        Ok(response)
    }

    /// Fetches the pull request resource.
    async fn pull_request(&self, pr: &PullRequestRef) -> Result<PullRequestResource> {
        let request = self.authorized(self.client.get(self.pull_url(pr)), JSON_MEDIA_TYPE);
        Self::send(request, "load the pull request", pr)
            .await?
            .json()
            .await
            .with_context(|| format!("Unexpected pull request payload for {pr}"))
    }
}

#[async_trait]
impl PullRequestHost for GitHubClient {
    async fn author_id(&self, pr: &PullRequestRef) -> Result<u64> {
        Ok(self.pull_request(pr).await?.user.id)
    }

    async fn patch(&self, pr: &PullRequestRef) -> Result<Vec<u8>> {
        let request = self.authorized(self.client.get(self.pull_url(pr)), PATCH_MEDIA_TYPE);
        let bytes = Self::send(request, "download the patch", pr)
            .await?
            .bytes()
            .await
            .with_context(|| format!("Could not read the patch for {pr}"))?;
        debug!(pull_request = %pr, size = bytes.len(), "downloaded patch");
        Ok(bytes.to_vec())
    }

    async fn post_comment(&self, pr: &PullRequestRef, body: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.base_url, pr.owner, pr.repo, pr.number
        );
        let request = self
            .authorized(self.client.post(url), JSON_MEDIA_TYPE)
            .json(&json!({ "body": body }));
        Self::send(request, "post a comment", pr).await?;
        Ok(())
    }

    async fn merge(&self, pr: &PullRequestRef) -> Result<()> {
        let url = format!("{}/merge", self.pull_url(pr));
        let request = self
            .authorized(self.client.put(url), JSON_MEDIA_TYPE)
            .json(&json!({ "merge_method": "merge" }));
        Self::send(request, "merge", pr).await?;
        Ok(())
    }

    async fn is_mergeable(&self, pr: &PullRequestRef) -> Result<bool> {
        Ok(self.pull_request(pr).await?.mergeable.unwrap_or(false))
    }

    async fn is_merged(&self, pr: &PullRequestRef) -> Result<bool> {
        Ok(self.pull_request(pr).await?.merged)
    }

    async fn close(&self, pr: &PullRequestRef) -> Result<()> {
        let request = self
            .authorized(self.client.patch(self.pull_url(pr)), JSON_MEDIA_TYPE)
            .json(&json!({ "state": "closed" }));
        Self::send(request, "close", pr).await?;
        Ok(())
    }

    async fn state(&self, pr: &PullRequestRef) -> Result<PullRequestState> {
        let resource = self.pull_request(pr).await?;
        Ok(PullRequestState {
            merged:    resource.merged,
            mergeable: resource.mergeable.unwrap_or(false),
        })
    }
}
