use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::categorize::Category;

pub const DEFAULT_USER_AGENT: &str = "wikiupdater/0.2";
pub const DEFAULT_API_URL: &str = "https://pzwiki.net/w/api.php";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_SUMMARY_PREFIX: &str = "Automated updating";
pub const DEFAULT_SAVE_TAG: &str = "bot";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct UpdaterConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub updater: UpdaterSection,
    #[serde(default)]
    pub orchestrators: OrchestratorSection,
    #[serde(default)]
    pub sort_order: SortOrderSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PathsSection {
    pub parser_output: Option<String>,
    pub history: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdaterSection {
    pub threads: usize,
    pub batch_size: usize,
    pub rate_limit_secs: u64,
    pub default_language: String,
    /// Include language-suffixed titles such as `Axe/fr` in the scan.
    pub language_pages: bool,
    pub test_page: Option<String>,
    pub summary_prefix: String,
    pub save_tag: String,
}

impl Default for UpdaterSection {
    fn default() -> Self {
        Self {
            threads: 8,
            batch_size: 500,
            rate_limit_secs: 0,
            default_language: DEFAULT_LANGUAGE.to_string(),
            language_pages: false,
            test_page: None,
            summary_prefix: DEFAULT_SUMMARY_PREFIX.to_string(),
            save_tag: DEFAULT_SAVE_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorSection {
    pub loot: bool,
    pub item: bool,
    pub tile: bool,
    pub fluid: bool,
    pub vehicle: bool,
    pub tag: bool,
    pub formatter: bool,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            loot: false,
            item: true,
            tile: true,
            fluid: true,
            vehicle: true,
            tag: true,
            formatter: false,
        }
    }
}

impl OrchestratorSection {
    pub fn enabled(&self, category: Category) -> bool {
        match category {
            Category::Item => self.item,
            Category::Tile => self.tile,
            Category::Vehicle => self.vehicle,
            Category::Fluid => self.fluid,
            Category::Tag => self.tag,
            Category::VehiclePart => false,
        }
    }

    /// Keep only the listed categories enabled; loot and formatter flags are untouched.
    pub fn restrict_to(&mut self, categories: &[Category]) {
        self.item &= categories.contains(&Category::Item);
        self.tile &= categories.contains(&Category::Tile);
        self.vehicle &= categories.contains(&Category::Vehicle);
        self.fluid &= categories.contains(&Category::Fluid);
        self.tag &= categories.contains(&Category::Tag);
    }
}

/// Replacement field-order tables; an absent key keeps the built-in table.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SortOrderSection {
    pub item: Option<Vec<String>>,
    pub tile: Option<Vec<String>>,
    pub vehicle: Option<Vec<String>>,
}

impl UpdaterConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        env_override("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn threads(&self) -> usize {
        self.updater.threads.max(1)
    }

    pub fn batch_size(&self) -> usize {
        self.updater.batch_size.max(1)
    }
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load and parse an UpdaterConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<UpdaterConfig> {
    if !config_path.exists() {
        return Ok(UpdaterConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: UpdaterConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
