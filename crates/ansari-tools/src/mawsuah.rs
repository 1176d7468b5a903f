//! search_mawsuah tool — Vectara corpus search over the Kuwaiti
//! Encyclopedia of Islamic Jurisprudence (الموسوعة الفقهية الكويتية).

use async_trait::async_trait;
use tracing::debug;

use ansari_core::config::VectaraConfig;

use crate::{SearchHit, SearchResults, SearchTool};

const DEFAULT_BASE_URL: &str = "https://api.vectara.io";

pub struct SearchMawsuah {
    base_url: String,
    api_key: String,
    corpus: String,
    client: reqwest::Client,
}

impl SearchMawsuah {
    pub fn new(config: &VectaraConfig) -> anyhow::Result<Self> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("Vectara API key not configured"))?;
        let corpus = config
            .mawsuah_corpus
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Vectara mawsuah corpus not configured"))?;
        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            corpus,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()?,
        })
    }
}

/// Parse a Vectara v2 query response into hits.
///
/// Shared by the encyclopedia and tafsir tools; `source_label` names the
/// corpus for citation rendering.
pub fn parse_corpus_results(body: &serde_json::Value, source_label: &str) -> SearchResults {
    let empty = vec![];
    let hits = body["search_results"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .enumerate()
        .filter_map(|(i, r)| {
            let text = r["text"].as_str()?.to_string();
            let title = r["document_metadata"]["title"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{source_label}, passage {}", i + 1));
            Some(SearchHit {
                id: r["document_id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("passage-{}", i + 1)),
                source: title,
                arabic: Some(text),
                english: None,
                grade: None,
            })
        })
        .collect();
    SearchResults { hits }
}

/// Issue a Vectara v2 corpus query.
pub async fn query_corpus(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    corpus: &str,
    query: &str,
) -> anyhow::Result<serde_json::Value> {
    let response = client
        .post(format!("{base_url}/v2/corpora/{corpus}/query"))
        .header("x-api-key", api_key)
        .header("content-type", "application/json")
        .json(&serde_json::json!({
            "query": query,
            "search": { "limit": 5 },
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("Vectara API returned HTTP {}", response.status());
    }

    Ok(response.json().await?)
}

#[async_trait]
impl SearchTool for SearchMawsuah {
    fn name(&self) -> &str {
        "search_mawsuah"
    }

    fn description(&self) -> &str {
        "Search the Kuwaiti Encyclopedia of Islamic Jurisprudence \
         (al-Mawsuah al-Fiqhiyyah) for rulings and juristic discussion. \
         Returns relevant passages in Arabic. Use this for fiqh questions."
    }

    async fn run(&self, query: &str) -> anyhow::Result<SearchResults> {
        debug!(query, corpus = %self.corpus, "search_mawsuah");
        let body = query_corpus(
            &self.client,
            &self.base_url,
            &self.api_key,
            &self.corpus,
            query,
        )
        .await?;
        Ok(parse_corpus_results(&body, "Mawsuah"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_corpus_results() {
        let body = serde_json::json!({
            "search_results": [
                {
                    "document_id": "mawsuah-123",
                    "text": "اتفق الفقهاء على ...",
                    "score": 0.91,
                    "document_metadata": { "title": "الطهارة" }
                },
                {
                    "text": "وذهب الجمهور إلى ...",
                    "score": 0.85,
                    "document_metadata": {}
                }
            ]
        });
        let results = parse_corpus_results(&body, "Mawsuah");
        assert_eq!(results.hits.len(), 2);
        assert_eq!(results.hits[0].id, "mawsuah-123");
        assert_eq!(results.hits[0].source, "الطهارة");
        assert_eq!(results.hits[1].source, "Mawsuah, passage 2");
        assert!(results.hits[1].arabic.as_ref().unwrap().contains("الجمهور"));
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert!(
            parse_corpus_results(&serde_json::json!({"search_results": []}), "Mawsuah")
                .hits
                .is_empty()
        );
        assert!(parse_corpus_results(&serde_json::json!({}), "Mawsuah")
            .hits
            .is_empty());
    }
}
