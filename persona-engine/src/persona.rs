//! Persona configuration, the on-disk registry, and system prompt rendering.
//!
//! Each persona lives under `personas/<id>/persona.json`. The config is the
//! single source of truth for identity, retrieval tuning, and the embeddable
//! widget; the engine core only reads it, never writes it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{Datelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::chunking::ChunkingConfig;
use crate::types::EngineError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonaMetadata {
    pub name: String,
    pub birth_year: i32,
    #[serde(default)]
    pub death_year: Option<i32>,
    #[serde(default)]
    pub famous_work: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub collection_name: String,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonaPrompt {
    pub system_prompt_template: String,
    #[serde(default)]
    pub voice_characteristics: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chunk_target_size")]
    pub chunk_target_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_top_k() -> usize {
    5
}
fn default_chunk_target_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_history_turns() -> usize {
    20
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            chunk_target_size: default_chunk_target_size(),
            chunk_overlap: default_chunk_overlap(),
            history_turns: default_history_turns(),
        }
    }
}

/// Embeddable-widget section, passed through to clients mostly untouched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WidgetConfig {
    pub conversation_starters: Vec<String>,
    #[serde(default)]
    pub theme: Value,
    pub ui: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Filled from the directory name when the file omits it.
    #[serde(default)]
    pub id: String,
    pub metadata: PersonaMetadata,
    pub corpus: CorpusConfig,
    pub persona: PersonaPrompt,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub widget: WidgetConfig,
}

impl PersonaConfig {
    /// Structural checks beyond what deserialization already enforces.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut problems = Vec::new();
        if self.id.trim().is_empty() {
            problems.push("id must not be empty".to_string());
        }
        if self.metadata.name.trim().is_empty() {
            problems.push("metadata.name must not be empty".to_string());
        }
        if self.persona.system_prompt_template.trim().is_empty() {
            problems.push("persona.system_prompt_template must not be empty".to_string());
        }
        if self.widget.conversation_starters.len() != 4 {
            problems.push(format!(
                "widget.conversation_starters must contain exactly 4 entries, found {}",
                self.widget.conversation_starters.len()
            ));
        }
        if self.widget.ui.get("header_title").is_none() {
            problems.push("widget.ui.header_title is required".to_string());
        }
        if self.retrieval.top_k == 0 {
            problems.push("retrieval.top_k must be at least 1".to_string());
        }
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_target_size {
            problems.push(format!(
                "retrieval.chunk_overlap ({}) must be smaller than chunk_target_size ({})",
                self.retrieval.chunk_overlap, self.retrieval.chunk_target_size
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Config(format!(
                "persona '{}': {}",
                self.id,
                problems.join("; ")
            )))
        }
    }

    pub fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            target_size: self.retrieval.chunk_target_size,
            overlap: self.retrieval.chunk_overlap,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(id: &str, name: &str, birth_year: i32) -> Self {
        Self {
            id: id.to_string(),
            metadata: PersonaMetadata {
                name: name.to_string(),
                birth_year,
                death_year: None,
                famous_work: None,
            },
            corpus: CorpusConfig {
                collection_name: format!("{id}_corpus"),
                author: Some(name.to_string()),
            },
            persona: PersonaPrompt {
                system_prompt_template: "You are {name}, born {birth_year}.".to_string(),
                voice_characteristics: vec!["plainspoken".to_string()],
                constraints: vec!["stay in character".to_string()],
            },
            retrieval: RetrievalConfig::default(),
            widget: WidgetConfig {
                conversation_starters: vec![
                    "one".into(),
                    "two".into(),
                    "three".into(),
                    "four".into(),
                ],
                theme: Value::Null,
                ui: serde_json::json!({ "header_title": name }),
            },
        }
    }
}

/// All personas known to the engine, loaded once at startup.
#[derive(Default)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, PersonaConfig>,
}

impl PersonaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `dir` for `<id>/persona.json` entries. A directory missing the
    /// file is skipped with a warning; an invalid config is a hard error so
    /// misconfiguration surfaces at startup, not mid-conversation.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let dir = dir.as_ref();
        let mut registry = Self::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|err| EngineError::Config(format!("reading {}: {err}", dir.display())))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| EngineError::Config(err.to_string()))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let config_path = path.join("persona.json");
            if !config_path.is_file() {
                warn!(dir = %path.display(), "persona directory has no persona.json, skipping");
                continue;
            }
            let fallback_id = entry.file_name().to_string_lossy().into_owned();
            let config = Self::load_file(&config_path, &fallback_id).await?;
            registry.personas.insert(config.id.clone(), config);
        }
        Ok(registry)
    }

    pub async fn load_file(path: &Path, fallback_id: &str) -> Result<PersonaConfig, EngineError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| EngineError::Config(format!("reading {}: {err}", path.display())))?;
        let mut config: PersonaConfig = serde_json::from_str(&raw)
            .map_err(|err| EngineError::Config(format!("parsing {}: {err}", path.display())))?;
        if config.id.trim().is_empty() {
            config.id = fallback_id.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn get(&self, persona_id: &str) -> Result<&PersonaConfig, EngineError> {
        self.personas
            .get(persona_id)
            .ok_or_else(|| EngineError::UnknownPersona(persona_id.to_string()))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.personas.keys().map(String::as_str).collect()
    }

    pub fn insert(&mut self, config: PersonaConfig) {
        self.personas.insert(config.id.clone(), config);
    }
}

/// Renders the persona's system prompt from its template.
///
/// Recognized placeholders: `{name}`, `{birth_year}`, `{death_year}`,
/// `{current_year}`, `{current_age}`, `{famous_work}`,
/// `{voice_characteristics}`, `{constraints}`. Unknown placeholders are left
/// verbatim and logged so a typo in a template shows up in the output rather
/// than vanishing.
pub fn system_prompt(config: &PersonaConfig) -> String {
    let current_year = Utc::now().year();
    let mut bindings: BTreeMap<&str, String> = BTreeMap::new();
    bindings.insert("name", config.metadata.name.clone());
    bindings.insert("birth_year", config.metadata.birth_year.to_string());
    bindings.insert(
        "death_year",
        config
            .metadata
            .death_year
            .map_or_else(String::new, |y| y.to_string()),
    );
    bindings.insert("current_year", current_year.to_string());
    bindings.insert(
        "current_age",
        (current_year - config.metadata.birth_year).to_string(),
    );
    bindings.insert(
        "famous_work",
        config.metadata.famous_work.clone().unwrap_or_default(),
    );
    bindings.insert(
        "voice_characteristics",
        as_bullet_list(&config.persona.voice_characteristics),
    );
    bindings.insert("constraints", as_bullet_list(&config.persona.constraints));

    render_template(&config.persona.system_prompt_template, &bindings)
}

fn as_bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_template(template: &str, bindings: &BTreeMap<&str, String>) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([a-z_]+)\}").unwrap_or_else(|_| unreachable!()));

    placeholder
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match bindings.get(key) {
                Some(value) => value.clone(),
                None => {
                    warn!(placeholder = key, "unknown placeholder in prompt template");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config_json() -> String {
        serde_json::json!({
            "id": "jane-jacobs",
            "metadata": {
                "name": "Jane Jacobs",
                "birth_year": 1916,
                "death_year": 2006,
                "famous_work": "The Death and Life of Great American Cities"
            },
            "corpus": { "collection_name": "jane_jacobs_corpus", "author": "Jane Jacobs" },
            "persona": {
                "system_prompt_template": "You are {name} ({birth_year}-{death_year}), author of {famous_work}.\nVoice:\n{voice_characteristics}\nRules:\n{constraints}",
                "voice_characteristics": ["direct", "observational"],
                "constraints": ["never break character"]
            },
            "retrieval": { "top_k": 3 },
            "widget": {
                "conversation_starters": ["a", "b", "c", "d"],
                "ui": { "header_title": "Ask Jane Jacobs" }
            }
        })
        .to_string()
    }

    #[test]
    fn parses_and_validates_a_full_config() {
        let config: PersonaConfig = serde_json::from_str(&full_config_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        // Unspecified retrieval fields fall back to defaults.
        assert_eq!(config.retrieval.chunk_target_size, 2000);
        assert_eq!(config.retrieval.history_turns, 20);
    }

    #[test]
    fn validation_rejects_wrong_starter_count() {
        let mut config: PersonaConfig = serde_json::from_str(&full_config_json()).unwrap();
        config.widget.conversation_starters.pop();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().contains("conversation_starters"));
    }

    #[test]
    fn validation_rejects_overlap_at_or_above_target() {
        let mut config: PersonaConfig = serde_json::from_str(&full_config_json()).unwrap();
        config.retrieval.chunk_overlap = config.retrieval.chunk_target_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn system_prompt_substitutes_known_placeholders() {
        let config: PersonaConfig = serde_json::from_str(&full_config_json()).unwrap();
        let prompt = system_prompt(&config);
        assert!(prompt.starts_with("You are Jane Jacobs (1916-2006)"));
        assert!(prompt.contains("- direct\n- observational"));
        assert!(prompt.contains("- never break character"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn unknown_placeholders_survive_verbatim() {
        let mut bindings = BTreeMap::new();
        bindings.insert("name", "Jane".to_string());
        let rendered = render_template("{name} wrote {unknown_thing}", &bindings);
        assert_eq!(rendered, "Jane wrote {unknown_thing}");
    }

    #[tokio::test]
    async fn registry_loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let persona_dir = dir.path().join("jane-jacobs");
        tokio::fs::create_dir_all(&persona_dir).await.unwrap();

        // Strip the id so it must be recovered from the directory name.
        let mut value: serde_json::Value = serde_json::from_str(&full_config_json()).unwrap();
        value.as_object_mut().unwrap().remove("id");
        tokio::fs::write(persona_dir.join("persona.json"), value.to_string())
            .await
            .unwrap();
        // A directory without persona.json is skipped.
        tokio::fs::create_dir_all(dir.path().join("incomplete"))
            .await
            .unwrap();

        let registry = PersonaRegistry::load(dir.path()).await.unwrap();
        assert_eq!(registry.ids(), vec!["jane-jacobs"]);
        let config = registry.get("jane-jacobs").unwrap();
        assert_eq!(config.metadata.name, "Jane Jacobs");

        let err = registry.get("missing").unwrap_err();
        assert!(matches!(err, EngineError::UnknownPersona(_)));
    }
}
