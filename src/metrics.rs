use async_trait::async_trait;
use reqwest::{header, Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::error::{Result, TrackerError};
use crate::models::SkillMetrics;

const USER_AGENT: &str = concat!("cohort-progress-tracker/", env!("CARGO_PKG_VERSION"));
const SEARCH_PAGE_SIZE: &str = "100";

#[async_trait]
pub trait SkillRanking: Send + Sync {
    async fn fetch(&self, username: &str) -> SkillMetrics;
}

/// Never fails: any lookup error yields zero.
#[async_trait]
pub trait Contributions: Send + Sync {
    async fn fetch(&self, username: &str) -> i32;
}

#[derive(Debug, Deserialize)]
struct CodewarsProfile {
    ranks: CodewarsRanks,
}

#[derive(Debug, Deserialize)]
struct CodewarsRanks {
    overall: CodewarsRank,
    #[serde(default)]
    languages: HashMap<String, CodewarsLanguage>,
}

#[derive(Debug, Deserialize)]
struct CodewarsRank {
    rank: i64,
}

#[derive(Debug, Deserialize)]
struct CodewarsLanguage {
    score: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct IssueSearch {
    items: Vec<IssueItem>,
}

#[derive(Debug, Deserialize)]
struct IssueItem {
    pull_request: Option<PullRequestRef>,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    url: String,
}

// Better ranks are more negative numbers; the absolute value is stored.
pub fn parse_codewars_profile(body: &[u8], language: &str) -> Result<SkillMetrics> {
    let profile: CodewarsProfile = serde_json::from_slice(body)
        .map_err(|err| TrackerError::ExternalService(format!("malformed profile: {err}")))?;

    let score = profile
        .ranks
        .languages
        .get(language)
        .and_then(|entry| entry.score)
        .ok_or_else(|| TrackerError::ExternalService(format!("no {language} score in profile")))?;

    Ok(SkillMetrics {
        rank: to_i32(profile.ranks.overall.rank.unsigned_abs())?,
        score: to_i32(score.unsigned_abs())?,
    })
}

pub fn count_org_pull_requests(body: &[u8], org: &str) -> Result<i32> {
    let search: IssueSearch = serde_json::from_slice(body)
        .map_err(|err| TrackerError::ExternalService(format!("malformed search result: {err}")))?;

    let count = search
        .items
        .iter()
        .filter_map(|item| item.pull_request.as_ref())
        .filter(|pr| pr.url.contains(org))
        .count();

    to_i32(count as u64)
}

fn to_i32(value: u64) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| TrackerError::ExternalService(format!("value {value} out of range")))
}

fn http_client(config: &ExtractionConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.http_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|err| TrackerError::Configuration(format!("failed to build HTTP client: {err}")))
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TrackerError::Configuration(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn pull_request_search(base: &Url, username: &str) -> Result<Url> {
    let mut url = endpoint(base, &["search", "issues"])?;
    url.query_pairs_mut()
        .append_pair("per_page", SEARCH_PAGE_SIZE)
        .append_pair("q", &format!("is:pr author:{username}"));
    Ok(url)
}

#[derive(Clone)]
pub struct CodewarsClient {
    client: Client,
    base_url: Url,
    language: String,
}

impl CodewarsClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.codewars_base_url.clone(),
            language: config.language.clone(),
        })
    }

    async fn try_fetch(&self, username: &str) -> Result<SkillMetrics> {
        let url = endpoint(&self.base_url, &["users", username])?;
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TrackerError::ExternalService(format!("unknown user {username}")));
        }
        let body = response.error_for_status()?.bytes().await?;
        parse_codewars_profile(&body, &self.language)
    }
}

#[async_trait]
impl SkillRanking for CodewarsClient {
    async fn fetch(&self, username: &str) -> SkillMetrics {
        match self.try_fetch(username).await {
            Ok(metrics) => {
                debug!(username, rank = metrics.rank, score = metrics.score, "fetched codewars profile");
                metrics
            }
            Err(err) => {
                warn!(username, error = %err, "codewars lookup failed, using default rank");
                SkillMetrics::DEFAULT
            }
        }
    }
}

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    base_url: Url,
    org: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.github_base_url.clone(),
            org: config.github_org.clone(),
            token: config.github_token.clone(),
        })
    }

    async fn try_fetch(&self, username: &str) -> Result<i32> {
        let url = pull_request_search(&self.base_url, username)?;
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let body = request.send().await?.error_for_status()?.bytes().await?;
        count_org_pull_requests(&body, &self.org)
    }
}

#[async_trait]
impl Contributions for GithubClient {
    async fn fetch(&self, username: &str) -> i32 {
        match self.try_fetch(username).await {
            Ok(count) => {
                debug!(username, prs = count, "fetched github pull requests");
                count
            }
            Err(err) => {
                warn!(username, error = %err, "github lookup failed, counting zero pull requests");
                0
            }
        }
    }
}
