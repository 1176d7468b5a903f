//! Retrieval tool adapters for the agent runtime.
//!
//! Each search backend (Qur'an, Hadith, fiqh encyclopedia, tafsir)
//! implements the [`SearchTool`] trait: a machine name and call schema for
//! the LLM's function-calling protocol, a `run` that queries the backend,
//! and pure formatters that turn raw results into citation references and
//! a compact tool-result string.

use async_trait::async_trait;

use ansari_core::message::SourceDoc;

pub mod hadith;
pub mod mawsuah;
pub mod quran;
pub mod tafsir;

/// One raw result from a search backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHit {
    /// Backend identifier, e.g. an ayah key like "55:22".
    pub id: String,
    /// Human-readable source, e.g. "Quran 55:22" or "Sahih al-Bukhari 52".
    pub source: String,
    pub arabic: Option<String>,
    pub english: Option<String>,
    /// Authenticity grading, where the backend supplies one.
    pub grade: Option<String>,
}

/// Raw results of one `run` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
}

/// Call schema advertised to the LLM.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Standard single-argument schema: one free-text `query`.
pub fn query_schema(description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": description,
            }
        },
        "required": ["query"]
    })
}

/// The retrieval tool trait.
///
/// `run` may fail on transport errors and is not retried by the agent;
/// the formatters are pure and total over well-formed results, with empty
/// results formatting to empty sequences.
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Tool name as exposed to the LLM (e.g., "search_quran").
    fn name(&self) -> &str;

    /// Human-readable description for the LLM.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value {
        query_schema("The search query, in English or Arabic")
    }

    /// Query the backend.
    async fn run(&self, query: &str) -> anyhow::Result<SearchResults>;

    /// Render hits as human-readable reference strings, one per hit.
    fn format_as_list(&self, results: &SearchResults) -> Vec<String> {
        results
            .hits
            .iter()
            .map(|hit| {
                let mut parts = vec![format!("Source: {}", hit.source)];
                if let Some(arabic) = &hit.arabic {
                    parts.push(format!("Arabic: {arabic}"));
                }
                if let Some(english) = &hit.english {
                    parts.push(format!("English: {english}"));
                }
                if let Some(grade) = &hit.grade {
                    parts.push(format!("Grade: {grade}"));
                }
                parts.join("\n")
            })
            .collect()
    }

    /// Render hits as reference documents for citation-style prompting.
    fn format_as_ref_list(&self, results: &SearchResults) -> Vec<SourceDoc> {
        results
            .hits
            .iter()
            .map(|hit| {
                let mut body = String::new();
                if let Some(arabic) = &hit.arabic {
                    body.push_str(arabic);
                }
                if let Some(english) = &hit.english {
                    if !body.is_empty() {
                        body.push_str("\n\n");
                    }
                    body.push_str(english);
                }
                SourceDoc {
                    title: hit.source.clone(),
                    body,
                    origin: format!("{} ({})", hit.source, self.name()),
                    citable: true,
                }
            })
            .collect()
    }

    /// The schema triple sent to the provider.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Registry of available tools. Built once at startup and shared read-only
/// across conversations.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn SearchTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn SearchTool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn SearchTool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTool;

    #[async_trait]
    impl SearchTool for FakeTool {
        fn name(&self) -> &str {
            "fake"
        }
        fn description(&self) -> &str {
            "fake tool"
        }
        async fn run(&self, _query: &str) -> anyhow::Result<SearchResults> {
            Ok(SearchResults::default())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(FakeTool));
        assert!(registry.get("fake").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.list(), vec!["fake"]);
    }

    #[test]
    fn test_default_formatters_empty_results() {
        let tool = FakeTool;
        let results = SearchResults::default();
        assert!(tool.format_as_list(&results).is_empty());
        assert!(tool.format_as_ref_list(&results).is_empty());
    }

    #[test]
    fn test_default_formatters_fields() {
        let tool = FakeTool;
        let results = SearchResults {
            hits: vec![SearchHit {
                id: "55:22".into(),
                source: "Quran 55:22".into(),
                arabic: Some("يَخْرُجُ مِنْهُمَا اللُّؤْلُؤُ وَالْمَرْجَانُ".into()),
                english: Some("From both of them emerge pearl and coral.".into()),
                grade: None,
            }],
        };
        let list = tool.format_as_list(&results);
        assert_eq!(list.len(), 1);
        assert!(list[0].contains("Source: Quran 55:22"));
        assert!(list[0].contains("English: From both"));

        let refs = tool.format_as_ref_list(&results);
        assert_eq!(refs[0].title, "Quran 55:22");
        assert!(refs[0].body.contains("pearl and coral"));
        assert!(refs[0].origin.contains("fake"));
    }

    #[test]
    fn test_query_schema_shape() {
        let schema = query_schema("the query");
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"][0], "query");
    }
}
