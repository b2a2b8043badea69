#![doc = "Publisher integration for the CLI: implements the core `Publisher` trait against the GitHub REST contents API."]
//
//! # GitHub publisher
//!
//! [`GitHubClient`] reads and overwrites single files in a repository
//! through `GET`/`PUT /repos/{owner}/{repo}/contents/{path}`. Authentication
//! is a personal access token sent as `Authorization: token <token>`.
//!
//! - `fetch_file` returns the blob sha of an existing file, which GitHub
//!   requires before it lets a `PUT` overwrite that file.
//! - `put_file` base64-encodes the content and commits it on the configured
//!   branch. A non-2xx answer is returned as [`PublishRejected`] so the
//!   pipeline can record it and move on.

use async_trait::async_trait;
use base64::Engine;
use dataset_pipeline_core::contract::{
    BoxError, PublishRejected, Publisher, PutFileRequest, PutFileResponse, RemoteFile,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::load_config::GitHubSettings;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("dataset-pipeline/", env!("CARGO_PKG_VERSION"));

pub struct GitHubClient {
    client: reqwest::Client,
    settings: GitHubSettings,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PutContentsBody<'a> {
    pub message: &'a str,
    pub content: String,
    pub branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    path: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: ContentsEntry,
}

impl GitHubClient {
    pub fn new(settings: GitHubSettings, token: &str) -> Result<Self, BoxError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("token {token}")).map_err(|e| {
            tracing::error!(error = ?e, "GitHub token contains characters not allowed in a header");
            e
        })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        tracing::info!(
            owner = %settings.owner,
            repo = %settings.repo,
            branch = %settings.branch,
            token_set = !token.is_empty(),
            "Initialized GitHubClient"
        );
        Ok(Self { client, settings })
    }

    pub fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.owner,
            self.settings.repo,
            path.trim_start_matches('/')
        )
    }
}

/// JSON body for a contents `PUT`.
pub fn put_body(req: &PutFileRequest) -> PutContentsBody<'_> {
    PutContentsBody {
        message: &req.message,
        content: base64::engine::general_purpose::STANDARD.encode(&req.content),
        branch: &req.branch,
        sha: req.sha.as_deref(),
    }
}

#[async_trait]
impl Publisher for GitHubClient {
    async fn fetch_file(&self, path: &str) -> Result<Option<RemoteFile>, BoxError> {
        let url = self.contents_url(path);
        tracing::info!(url = %url, branch = %self.settings.branch, "Fetching remote file metadata");

        let resp = self
            .client
            .get(&url)
            .query(&[("ref", self.settings.branch.as_str())])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, url = %url, "Failed to reach GitHub");
                e
            })?;

        match resp.status() {
            StatusCode::OK => {
                let entry: ContentsEntry = resp.json().await?;
                tracing::info!(path = %entry.path, sha = %entry.sha, "Remote file exists");
                Ok(Some(RemoteFile {
                    path: entry.path,
                    sha: entry.sha,
                }))
            }
            StatusCode::NOT_FOUND => {
                tracing::info!(path, "Remote file does not exist yet");
                Ok(None)
            }
            status => {
                // Treated as absent; a real problem surfaces on the PUT.
                tracing::warn!(status = %status, path, "Unexpected status looking up remote file");
                Ok(None)
            }
        }
    }

    async fn put_file(&self, req: PutFileRequest) -> Result<PutFileResponse, BoxError> {
        let url = self.contents_url(&req.path);
        tracing::info!(
            url = %url,
            bytes = req.content.len(),
            replacing = req.sha.is_some(),
            "Uploading file to GitHub"
        );

        let resp = self
            .client
            .put(&url)
            .json(&put_body(&req))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, url = %url, "Failed to reach GitHub");
                e
            })?;

        let status = resp.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            let body: PutContentsResponse = resp.json().await?;
            tracing::info!(
                path = %body.content.path,
                sha = %body.content.sha,
                created = status == StatusCode::CREATED,
                "Successfully uploaded file"
            );
            return Ok(PutFileResponse {
                path: body.content.path,
                sha: body.content.sha,
                created: status == StatusCode::CREATED,
            });
        }

        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
        tracing::error!(status = %status, path = %req.path, body = %body, "GitHub rejected upload");
        Err(Box::new(PublishRejected {
            path: req.path,
            status: status.as_u16(),
            body,
        }))
    }
}
