//! search_hadith tool — Kalimat hadith collection search.

use async_trait::async_trait;
use tracing::debug;

use ansari_core::config::KalimatConfig;

use crate::{SearchHit, SearchResults, SearchTool};

const DEFAULT_BASE_URL: &str = "https://api.kalimat.dev";

pub struct SearchHadith {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SearchHadith {
    pub fn new(config: &KalimatConfig) -> anyhow::Result<Self> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("Kalimat API key not configured"))?;
        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()?,
        })
    }
}

/// Parse a Kalimat hadith-search response body.
pub fn parse_hadith_results(body: &serde_json::Value) -> SearchResults {
    let empty = vec![];
    let hits = body
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|r| {
            let id = r["id"].as_str()?.to_string();
            let book = r["source_book"].as_str().unwrap_or("Unknown collection");
            let number = r["hadith_number"].as_str().unwrap_or(&id);
            Some(SearchHit {
                source: format!("{book} {number}"),
                id,
                arabic: r["ar_text"].as_str().map(str::to_string),
                english: r["en_text"].as_str().map(str::to_string),
                grade: r["grade_en"].as_str().map(str::to_string),
            })
        })
        .collect();
    SearchResults { hits }
}

#[async_trait]
impl SearchTool for SearchHadith {
    fn name(&self) -> &str {
        "search_hadith"
    }

    fn description(&self) -> &str {
        "Search the major hadith collections for narrations relevant to a \
         topic. Returns matching hadiths with source collection, number, \
         authenticity grade, Arabic text, and English translation."
    }

    async fn run(&self, query: &str) -> anyhow::Result<SearchResults> {
        debug!(query, "search_hadith");

        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .header("x-api-key", &self.api_key)
            .query(&[
                ("query", query),
                ("numResults", "10"),
                ("indexes", "hadith"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Kalimat API returned HTTP {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        Ok(parse_hadith_results(&body))
    }
}
