//! search_quran tool — Kalimat semantic ayah search.

use async_trait::async_trait;
use tracing::debug;

use ansari_core::config::KalimatConfig;

use crate::{SearchHit, SearchResults, SearchTool};

const DEFAULT_BASE_URL: &str = "https://api.kalimat.dev";

pub struct SearchQuran {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SearchQuran {
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

/// Parse a Kalimat ayah-search response body.
pub fn parse_ayah_results(body: &serde_json::Value) -> SearchResults {
    let empty = vec![];
    let hits = body
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|r| {
            let id = r["id"].as_str()?.to_string();
            Some(SearchHit {
                source: format!("Quran {id}"),
                id,
                arabic: r["text"].as_str().map(str::to_string),
                english: r["en_text"].as_str().map(str::to_string),
                grade: None,
            })
        })
        .collect();
    SearchResults { hits }
}

#[async_trait]
impl SearchTool for SearchQuran {
    fn name(&self) -> &str {
        "search_quran"
    }

    fn description(&self) -> &str {
        "Search the Holy Quran for ayahs relevant to a topic or phrase. \
         Returns matching ayahs with their Arabic text and English translation. \
         Use this when the question concerns what the Quran says."
    }

    async fn run(&self, query: &str) -> anyhow::Result<SearchResults> {
        debug!(query, "search_quran");

        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .header("x-api-key", &self.api_key)
            .query(&[
                ("query", query),
                ("numResults", "10"),
                ("getText", "2"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Kalimat API returned HTTP {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        Ok(parse_ayah_results(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ayah_results() {
        let body = serde_json::json!([
            {
                "id": "55:22",
                "text": "يَخْرُجُ مِنْهُمَا اللُّؤْلُؤُ وَالْمَرْجَانُ",
                "en_text": "From both of them emerge pearl and coral."
            },
            {
                "id": "35:12",
                "text": "وَتَسْتَخْرِجُونَ حِلْيَةً تَلْبَسُونَهَا",
                "en_text": "And you extract ornaments which you wear."
            }
        ]);
        let results = parse_ayah_results(&body);
        assert_eq!(results.hits.len(), 2);
        assert_eq!(results.hits[0].id, "55:22");
        assert_eq!(results.hits[0].source, "Quran 55:22");
        assert!(results.hits[1].english.as_ref().unwrap().contains("ornaments"));
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let body = serde_json::json!([
            { "text": "missing id" },
            { "id": "2:255", "text": "آية الكرسي" }
        ]);
        let results = parse_ayah_results(&body);
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].id, "2:255");
        assert!(results.hits[0].english.is_none());
    }

    #[test]
    fn test_parse_empty_results() {
        assert!(parse_ayah_results(&serde_json::json!([])).hits.is_empty());
        assert!(parse_ayah_results(&serde_json::json!({"error": "x"})).hits.is_empty());
    }
}
