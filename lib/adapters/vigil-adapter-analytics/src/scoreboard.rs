use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;

use vigil_domain::{Group, GroupId, IngestionConfig, ScoreboardRow, TimeRange};
use vigil_ports::ScoreboardPort;

#[derive(Debug, Deserialize)]
struct ScoreboardResponse {
    #[serde(default)]
    scoreboard: Vec<ScoreboardRow>,
}

pub fn decode_groups(body: &[u8]) -> Result<Vec<Group>> {
    serde_json::from_slice(body).context("malformed groups payload")
}

pub fn decode_scoreboard(body: &[u8]) -> Result<Vec<ScoreboardRow>> {
    let response: ScoreboardResponse =
        serde_json::from_slice(body).context("malformed scoreboard payload")?;
    Ok(response.scoreboard)
}

/// HTTP client for the external group and scoreboard endpoints.
#[derive(Clone)]
pub struct HttpScoreboardSource {
    client: reqwest::Client,
    groups_url: String,
    scoreboard_url: String,
}

impl HttpScoreboardSource {
    pub fn new(
        groups_url: impl Into<String>,
        scoreboard_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build scoreboard http client")?;
        Ok(Self {
            client,
            groups_url: groups_url.into(),
            scoreboard_url: scoreboard_url.into(),
        })
    }

    pub fn from_config(config: &IngestionConfig) -> Result<Self> {
        Self::new(
            config.groups_url.clone(),
            config.scoreboard_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    async fn fetch(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        tracing::debug!(url, ?query, "fetching");
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("unexpected status code {status} from {url}");
        }
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body from {url}"))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ScoreboardPort for HttpScoreboardSource {
    async fn fetch_groups(&self, group_id: Option<GroupId>) -> Result<Vec<Group>> {
        let mut query = Vec::new();
        if let Some(group_id) = group_id {
            query.push(("cycle_id", group_id.to_string()));
        }
        let body = self.fetch(&self.groups_url, &query).await?;
        decode_groups(&body)
    }

    async fn fetch_scoreboard(
        &self,
        group_id: GroupId,
        window: Option<TimeRange>,
    ) -> Result<Vec<ScoreboardRow>> {
        let mut query = vec![("cycle_id", group_id.to_string())];
        if let Some(window) = window.filter(|w| w.from != 0 && w.to != 0) {
            query.push(("from_ts", window.from.to_string()));
            query.push(("to_ts", window.to.to_string()));
        }
        let body = self.fetch(&self.scoreboard_url, &query).await?;
        decode_scoreboard(&body)
    }
}
