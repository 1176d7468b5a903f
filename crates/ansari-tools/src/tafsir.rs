//! search_tafsir tool — Vectara corpus search over classical Qur'anic
//! commentary.

use async_trait::async_trait;
use tracing::debug;

use ansari_core::config::VectaraConfig;

use crate::mawsuah::{parse_corpus_results, query_corpus};
use crate::{SearchResults, SearchTool};

const DEFAULT_BASE_URL: &str = "https://api.vectara.io";

pub struct SearchTafsir {
    base_url: String,
    api_key: String,
    corpus: String,
    client: reqwest::Client,
}

impl SearchTafsir {
    pub fn new(config: &VectaraConfig) -> anyhow::Result<Self> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("Vectara API key not configured"))?;
        let corpus = config
            .tafsir_corpus
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Vectara tafsir corpus not configured"))?;
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

#[async_trait]
impl SearchTool for SearchTafsir {
    fn name(&self) -> &str {
        "search_tafsir"
    }

    fn description(&self) -> &str {
        "Search classical tafsir (Qur'anic commentary) for the scholarly \
         interpretation of an ayah or theme. Returns relevant commentary \
         passages. Use this when the question asks what an ayah means."
    }

    async fn run(&self, query: &str) -> anyhow::Result<SearchResults> {
        debug!(query, corpus = %self.corpus, "search_tafsir");
        let body = query_corpus(
            &self.client,
            &self.base_url,
            &self.api_key,
            &self.corpus,
            query,
        )
        .await?;
        Ok(parse_corpus_results(&body, "Tafsir"))
    }
}
