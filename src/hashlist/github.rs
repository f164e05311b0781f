//! Commit history access for the hashlist repository
//!
//! The walker only needs three calls: list recent commits on the tracked
//! branch, fetch one commit with its changed files, and fetch a file body.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::hashlist::config_loader::AppConfig;

/// Error types for remote fetches. Every variant is transient from the
/// walker's point of view.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for remote fetches
pub type FetchResult<T> = Result<T, FetchError>;

/// One entry of the commit listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub sha: String,
    pub author_date: Option<DateTime<Utc>>,
}

/// A file touched by a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    /// Content hash of the file at this commit
    pub blob_sha: Option<String>,
    pub raw_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetail {
    pub sha: String,
    pub author_date: DateTime<Utc>,
    pub parents: Vec<String>,
    pub files: Vec<ChangedFile>,
}

impl CommitDetail {
    pub fn first_parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }
}

/// Read access to the remote commit history
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Most recent commits on the tracked branch, newest first
    async fn list_commits(&self, per_page: usize, page: usize) -> FetchResult<Vec<CommitSummary>>;

    async fn get_commit(&self, sha: &str) -> FetchResult<CommitDetail>;

    async fn fetch_raw(&self, url: &str) -> FetchResult<String>;
}

/// Settings for the GitHub client
#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    pub api_base_url: String,
    pub raw_base_url: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub user_agent: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl GithubClientConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            api_base_url: config.source.api_base_url.trim_end_matches('/').to_string(),
            raw_base_url: config.source.raw_base_url.trim_end_matches('/').to_string(),
            owner: config.source.owner.clone(),
            repo: config.source.repo.clone(),
            branch: config.source.branch.clone(),
            user_agent: config.source.user_agent.clone(),
            api_token: config.source.api_token.clone().filter(|token| !token.is_empty()),
            timeout: Duration::from_secs(config.http.timeout_secs),
            connect_timeout: Duration::from_secs(config.http.connect_timeout_secs),
        }
    }
}

#[derive(Deserialize)]
struct ApiCommit {
    sha: Option<String>,
    #[serde(default)]
    commit: Option<ApiCommitBody>,
    #[serde(default)]
    parents: Vec<ApiParent>,
    #[serde(default)]
    files: Vec<ApiFile>,
}

#[derive(Deserialize)]
struct ApiCommitBody {
    author: Option<ApiAuthor>,
}

#[derive(Deserialize)]
struct ApiAuthor {
    date: Option<String>,
}

#[derive(Deserialize)]
struct ApiParent {
    sha: Option<String>,
}

#[derive(Deserialize)]
struct ApiFile {
    filename: Option<String>,
    sha: Option<String>,
    raw_url: Option<String>,
}

impl ApiCommit {
    fn author_date(&self) -> Option<DateTime<Utc>> {
        self.commit
            .as_ref()
            .and_then(|body| body.author.as_ref())
            .and_then(|author| author.date.as_deref())
            .and_then(parse_commit_date)
    }
}

/// Parse an ISO-8601 commit timestamp
pub fn parse_commit_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// GitHub REST implementation of [`CommitSource`]
pub struct GithubClient {
    client: Client,
    config: GithubClientConfig,
}

impl GithubClient {
    pub fn new(config: GithubClientConfig) -> FetchResult<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = &config.api_token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| FetchError::InvalidResponse(format!("invalid api token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .build()?;

        Ok(Self { client, config })
    }

    fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.config.api_base_url, self.config.owner, self.config.repo
        )
    }

    /// Raw URL for a path on the tracked branch, used when the API omits one
    pub fn fallback_raw_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.config.raw_base_url, self.config.owner, self.config.repo, self.config.branch, path
        )
    }

    async fn get_checked(&self, url: &str, query: &[(&str, String)]) -> FetchResult<reqwest::Response> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CommitSource for GithubClient {
    async fn list_commits(&self, per_page: usize, page: usize) -> FetchResult<Vec<CommitSummary>> {
        let url = format!("{}/commits", self.repo_url());
        let query = [
            ("sha", self.config.branch.clone()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        let commits: Vec<ApiCommit> = self.get_checked(&url, &query).await?.json().await?;
        debug!(count = commits.len(), "Listed commits");

        Ok(commits
            .into_iter()
            .filter_map(|commit| {
                let author_date = commit.author_date();
                commit
                    .sha
                    .filter(|sha| !sha.is_empty())
                    .map(|sha| CommitSummary { sha, author_date })
            })
            .collect())
    }

    async fn get_commit(&self, sha: &str) -> FetchResult<CommitDetail> {
        let url = format!("{}/commits/{}", self.repo_url(), sha);
        let commit: ApiCommit = self.get_checked(&url, &[]).await?.json().await?;

        let author_date = commit.author_date().unwrap_or_else(Utc::now);
        let parents = commit
            .parents
            .into_iter()
            .filter_map(|parent| parent.sha)
            .filter(|sha| !sha.is_empty())
            .collect();
        let files = commit
            .files
            .into_iter()
            .filter_map(|file| {
                let path = file.filename?;
                let raw_url = file
                    .raw_url
                    .filter(|url| !url.is_empty())
                    .unwrap_or_else(|| self.fallback_raw_url(&path));
                Some(ChangedFile {
                    path,
                    blob_sha: file.sha.filter(|sha| !sha.is_empty()),
                    raw_url,
                })
            })
            .collect();

        Ok(CommitDetail {
            sha: commit.sha.unwrap_or_else(|| sha.to_string()),
            author_date,
            parents,
            files,
        })
    }

    async fn fetch_raw(&self, url: &str) -> FetchResult<String> {
        Ok(self.get_checked(url, &[]).await?.text().await?)
    }
}
