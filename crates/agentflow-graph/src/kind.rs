//! Static capability table for every node kind.
//!
//! This table is the single source of truth for connection rules, fault
//! tolerance, retry caps and timeouts. Both the validator and the execution
//! engine read from it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Palette category a kind belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Trigger,
    Action,
}

/// Functional grouping used by connection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    DataSource,
    VectorStore,
    Llm,
    Control,
    Integration,
}

/// How many incoming edges a kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxIncoming {
    Zero,
    One,
    Unbounded,
}

impl MaxIncoming {
    pub fn admits(self, existing: usize) -> bool {
        match self {
            Self::Zero => false,
            Self::One => existing < 1,
            Self::Unbounded => true,
        }
    }
}

/// A config key a kind expects, with its default.
#[derive(Debug, Clone, Copy)]
pub struct ConfigField {
    pub key: &'static str,
    pub required: bool,
    /// JSON literal used when building a default config.
    pub default: Option<&'static str>,
}

/// Declared capability of a node kind.
#[derive(Debug)]
pub struct KindSpec {
    pub kind: NodeKind,
    pub label: &'static str,
    pub description: &'static str,
    pub category: Category,
    pub family: Family,
    pub max_incoming: MaxIncoming,
    /// Kinds this kind may receive edges from; empty means any.
    pub allowed_sources: &'static [NodeKind],
    /// Kinds this kind may send edges to; empty means any.
    pub allowed_targets: &'static [NodeKind],
    /// Runs even when an upstream node failed or was skipped.
    pub continue_on_error: bool,
    /// Retry cap; `Some(0)` for handlers that are not safely retryable.
    pub max_retries: Option<u32>,
    /// Handler timeout; `None` uses the engine default.
    pub timeout_secs: Option<u64>,
    pub config_fields: &'static [ConfigField],
}

impl KindSpec {
    /// Build a config map holding every field that has a default.
    pub fn default_config(&self) -> agentflow_core::NodeConfig {
        let mut config = agentflow_core::NodeConfig::new();
        for field in self.config_fields {
            if let Some(literal) = field.default {
                if let Ok(value) = serde_json::from_str(literal) {
                    config.insert(field.key.to_string(), value);
                }
            }
        }
        config
    }

    /// Required config keys missing from `config`.
    pub fn missing_fields(&self, config: &agentflow_core::NodeConfig) -> Vec<&'static str> {
        self.config_fields
            .iter()
            .filter(|f| f.required && !config.contains_key(f.key))
            .map(|f| f.key)
            .collect()
    }
}

/// Step type of a workflow node.
///
/// Serialized by its display label so persisted documents read like the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "File Upload")]
    FileUpload,
    #[serde(rename = "URL Scraper")]
    UrlScraper,
    #[serde(rename = "Wikipedia Search")]
    WikipediaSearch,
    #[serde(rename = "Google Drive")]
    GoogleDrive,
    #[serde(rename = "SQL DB")]
    SqlDb,
    Pinecone,
    Qdrant,
    #[serde(rename = "GPT-4o")]
    Gpt4o,
    #[serde(rename = "GPT-o1")]
    GptO1,
    #[serde(rename = "AWS Bedrock")]
    AwsBedrock,
    Condition,
    Trigger,
    Action,
    Wait,
    Email,
    Slack,
    Notion,
    Discord,
    #[serde(rename = "Google Calendar")]
    GoogleCalendar,
    Webhook,
    #[serde(rename = "Custom Webhook")]
    CustomWebhook,
    Docker,
}

const DATA_SOURCES: &[NodeKind] = &[
    NodeKind::FileUpload,
    NodeKind::UrlScraper,
    NodeKind::WikipediaSearch,
];
const VECTOR_STORES: &[NodeKind] = &[NodeKind::Pinecone, NodeKind::Qdrant];
const VECTOR_STORE_TARGETS: &[NodeKind] = &[
    NodeKind::Gpt4o,
    NodeKind::GptO1,
    NodeKind::AwsBedrock,
    NodeKind::Condition,
];

const NO_FIELDS: &[ConfigField] = &[];
const LLM_FIELDS: &[ConfigField] = &[
    ConfigField { key: "prompt", required: false, default: Some("\"\"") },
    ConfigField { key: "temperature", required: false, default: Some("0.7") },
];

macro_rules! kind_spec {
    ($kind:ident, $label:literal, $desc:literal, $cat:ident, $fam:ident) => {
        KindSpec {
            kind: NodeKind::$kind,
            label: $label,
            description: $desc,
            category: Category::$cat,
            family: Family::$fam,
            max_incoming: MaxIncoming::Unbounded,
            allowed_sources: &[],
            allowed_targets: &[],
            continue_on_error: false,
            max_retries: None,
            timeout_secs: None,
            config_fields: NO_FIELDS,
        }
    };
}

/// Indexed by `NodeKind as usize`.
static KINDS: [KindSpec; 22] = [
    KindSpec {
        timeout_secs: Some(60),
        config_fields: &[ConfigField { key: "url", required: true, default: None }],
        ..kind_spec!(FileUpload, "File Upload", "Upload a file to the workflow.", Action, DataSource)
    },
    KindSpec {
        timeout_secs: Some(60),
        config_fields: &[ConfigField { key: "urlSearch", required: true, default: None }],
        ..kind_spec!(UrlScraper, "URL Scraper", "Scrape contents of a web URL.", Action, DataSource)
    },
    KindSpec {
        timeout_secs: Some(60),
        config_fields: &[ConfigField { key: "query", required: true, default: None }],
        ..kind_spec!(WikipediaSearch, "Wikipedia Search", "Search Wikipedia without going to it.", Action, DataSource)
    },
    KindSpec {
        timeout_secs: Some(60),
        ..kind_spec!(GoogleDrive, "Google Drive", "Connect with Google Drive to trigger actions or to create files and folders.", Trigger, DataSource)
    },
    KindSpec {
        timeout_secs: Some(60),
        config_fields: &[
            ConfigField { key: "connection_string", required: true, default: None },
            ConfigField { key: "query", required: false, default: None },
        ],
        ..kind_spec!(SqlDb, "SQL DB", "Connect your database to give more context to your AI agent.", Trigger, DataSource)
    },
    KindSpec {
        allowed_targets: VECTOR_STORE_TARGETS,
        ..kind_spec!(Pinecone, "Pinecone", "Use the power of vector databases.", Action, VectorStore)
    },
    KindSpec {
        allowed_targets: VECTOR_STORE_TARGETS,
        config_fields: &[ConfigField { key: "collection", required: false, default: Some("\"user_data\"") }],
        ..kind_spec!(Qdrant, "Qdrant", "A high-performance vector database for storing and searching embeddings.", Action, VectorStore)
    },
    KindSpec {
        timeout_secs: Some(120),
        config_fields: LLM_FIELDS,
        ..kind_spec!(Gpt4o, "GPT-4o", "Use GPT-4o to generate text.", Trigger, Llm)
    },
    KindSpec {
        timeout_secs: Some(300),
        config_fields: LLM_FIELDS,
        ..kind_spec!(GptO1, "GPT-o1", "Use the reflective power of GPT-o1 to generate high quality results.", Trigger, Llm)
    },
    KindSpec {
        timeout_secs: Some(120),
        config_fields: LLM_FIELDS,
        ..kind_spec!(AwsBedrock, "AWS Bedrock", "Call a model hosted on AWS Bedrock.", Action, Llm)
    },
    KindSpec {
        config_fields: &[ConfigField { key: "expression", required: true, default: None }],
        ..kind_spec!(Condition, "Condition", "Boolean operator that creates different condition lanes.", Action, Control)
    },
    KindSpec {
        max_incoming: MaxIncoming::Zero,
        ..kind_spec!(Trigger, "Trigger", "An event that starts the workflow.", Trigger, Control)
    },
    KindSpec {
        continue_on_error: true,
        ..kind_spec!(Action, "Action", "An event that happens after the workflow begins.", Action, Control)
    },
    KindSpec {
        max_incoming: MaxIncoming::One,
        timeout_secs: Some(3_600),
        config_fields: &[ConfigField { key: "seconds", required: false, default: Some("1") }],
        ..kind_spec!(Wait, "Wait", "Delay the next action step by using the wait timer.", Action, Control)
    },
    KindSpec {
        continue_on_error: true,
        max_retries: Some(0),
        config_fields: &[ConfigField { key: "to", required: true, default: None }],
        ..kind_spec!(Email, "Email", "Send an email to a user.", Action, Integration)
    },
    KindSpec {
        continue_on_error: true,
        max_retries: Some(0),
        ..kind_spec!(Slack, "Slack", "Send a notification to Slack.", Action, Integration)
    },
    KindSpec {
        continue_on_error: true,
        max_retries: Some(0),
        ..kind_spec!(Notion, "Notion", "Create entries directly in Notion.", Action, Integration)
    },
    KindSpec {
        continue_on_error: true,
        max_retries: Some(0),
        ..kind_spec!(Discord, "Discord", "Post messages to your Discord server.", Action, Integration)
    },
    KindSpec {
        continue_on_error: true,
        max_retries: Some(0),
        ..kind_spec!(GoogleCalendar, "Google Calendar", "Create a calendar invite.", Action, Integration)
    },
    KindSpec {
        continue_on_error: true,
        max_retries: Some(0),
        config_fields: &[ConfigField { key: "url", required: true, default: None }],
        ..kind_spec!(Webhook, "Webhook", "Connect any app that has an API key and send data to your application.", Action, Integration)
    },
    KindSpec {
        continue_on_error: true,
        max_retries: Some(0),
        config_fields: &[ConfigField { key: "url", required: true, default: None }],
        ..kind_spec!(CustomWebhook, "Custom Webhook", "Send data to a custom HTTP endpoint.", Action, Integration)
    },
    KindSpec {
        timeout_secs: Some(600),
        ..kind_spec!(Docker, "Docker", "Dockerize your workflow.", Action, Integration)
    },
];

impl NodeKind {
    pub const ALL: [NodeKind; 22] = [
        Self::FileUpload,
        Self::UrlScraper,
        Self::WikipediaSearch,
        Self::GoogleDrive,
        Self::SqlDb,
        Self::Pinecone,
        Self::Qdrant,
        Self::Gpt4o,
        Self::GptO1,
        Self::AwsBedrock,
        Self::Condition,
        Self::Trigger,
        Self::Action,
        Self::Wait,
        Self::Email,
        Self::Slack,
        Self::Notion,
        Self::Discord,
        Self::GoogleCalendar,
        Self::Webhook,
        Self::CustomWebhook,
        Self::Docker,
    ];

    /// Capability record for this kind.
    pub fn spec(self) -> &'static KindSpec {
        &KINDS[self as usize]
    }

    pub fn label(self) -> &'static str {
        self.spec().label
    }

    pub fn family(self) -> Family {
        self.spec().family
    }

    pub fn is_data_source(self) -> bool {
        DATA_SOURCES.contains(&self)
    }

    pub fn is_vector_store(self) -> bool {
        VECTOR_STORES.contains(&self)
    }

    /// The sanctioned data-source → vector-store pairing, exempt from the
    /// single-outgoing-edge limit.
    pub fn is_sanctioned_pair(source: NodeKind, target: NodeKind) -> bool {
        source.is_data_source() && target.is_vector_store()
    }

    /// Whether kind rules allow an edge of this shape at all.
    pub fn accepts(source: NodeKind, target: NodeKind) -> bool {
        let s = source.spec();
        let t = target.spec();
        (s.allowed_targets.is_empty() || s.allowed_targets.contains(&target))
            && (t.allowed_sources.is_empty() || t.allowed_sources.contains(&source))
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    /// Accepts the display label ("URL Scraper") or a slug ("url-scraper", "url_scraper").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        NodeKind::ALL
            .iter()
            .copied()
            .find(|k| normalize(k.label()) == wanted)
            .ok_or_else(|| format!("unknown node kind: {}", s))
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
