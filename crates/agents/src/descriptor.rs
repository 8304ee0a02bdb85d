//! The agent definition file format.
//!
//! ```text
//! id: amy_cfo
//! displayName: Amy (CFO)
//! defaultModel: openai/gpt-4o-mini
//! costTier: mid
//! capabilityTags: finance, budget, forecasting
//! toolIDs: web_search, sql_query
//! ---
//! You are Amy, the chief financial officer...
//! ```
//!
//! Unknown header keys are rejected at load so typos surface immediately.

use serde::{Deserialize, Serialize};

use orch_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Cheap,
    #[default]
    Mid,
    Premium,
}

impl CostTier {
    pub fn parse(s: &str) -> Option<CostTier> {
        match s {
            "cheap" => Some(CostTier::Cheap),
            "mid" => Some(CostTier::Mid),
            "premium" => Some(CostTier::Premium),
            _ => None,
        }
    }

    /// Ordering key for tie-breaks: cheaper wins.
    pub fn rank(self) -> u8 {
        match self {
            CostTier::Cheap => 0,
            CostTier::Mid => 1,
            CostTier::Premium => 2,
        }
    }

    /// Advisory efficiency signal in [0, 1].
    pub fn score(self) -> f64 {
        match self {
            CostTier::Cheap => 1.0,
            CostTier::Mid => 0.6,
            CostTier::Premium => 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub display_name: String,
    pub system_prompt: String,
    pub capability_tags: Vec<String>,
    pub tool_ids: Vec<String>,
    /// `provider/model`, e.g. `openai/gpt-4o-mini`. Empty = use the
    /// process default.
    pub default_model: String,
    pub cost_tier: CostTier,
}

impl AgentDescriptor {
    /// Split the default model into (provider, model). Either side may be
    /// empty when unset.
    pub fn provider_and_model(&self) -> (&str, &str) {
        match self.default_model.split_once('/') {
            Some((p, m)) => (p, m),
            None => ("", self.default_model.as_str()),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.capability_tags.iter().any(|t| t == tag)
    }

    /// Parse one descriptor file.
    pub fn parse(source_name: &str, raw: &str) -> Result<AgentDescriptor> {
        let Some((header, body)) = raw.split_once("\n---") else {
            return Err(Error::Config(format!("{source_name}: missing `---` separator")));
        };
        // The body starts after the separator line.
        let body = body.trim_start_matches('-').trim_start_matches('\n');

        let mut id = None;
        let mut display_name = None;
        let mut default_model = String::new();
        let mut cost_tier = CostTier::default();
        let mut capability_tags = Vec::new();
        let mut tool_ids = Vec::new();

        for (line_no, line) in header.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(Error::Config(format!(
                    "{source_name}:{}: expected `key: value`, got {line:?}",
                    line_no + 1
                )));
            };
            let value = value.trim();
            match key.trim() {
                "id" => id = Some(value.to_string()),
                "displayName" => display_name = Some(value.to_string()),
                "defaultModel" => default_model = value.to_string(),
                "costTier" => {
                    cost_tier = CostTier::parse(value).ok_or_else(|| {
                        Error::Config(format!("{source_name}: unknown costTier {value:?}"))
                    })?;
                }
                "capabilityTags" => capability_tags = split_list(value),
                "toolIDs" => tool_ids = split_list(value),
                other => {
                    return Err(Error::Config(format!(
                        "{source_name}: unknown header key {other:?}"
                    )));
                }
            }
        }

        let id = id.ok_or_else(|| Error::Config(format!("{source_name}: missing `id`")))?;
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Config(format!("{source_name}: invalid id {id:?}")));
        }
        let system_prompt = body.trim().to_string();
        if system_prompt.is_empty() {
            return Err(Error::Config(format!("{source_name}: empty system prompt body")));
        }

        Ok(AgentDescriptor {
            display_name: display_name.unwrap_or_else(|| id.clone()),
            id,
            system_prompt,
            capability_tags,
            tool_ids,
            default_model,
            cost_tier,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
