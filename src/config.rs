use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::rchain::provider::Provider;
use crate::refine::ScoreParse;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub panel: Option<Vec<String>>,
    pub evaluator: Option<String>,
    pub initial_model: Option<String>,
    pub rephrase_model: Option<String>,
    pub threshold: Option<f64>,
    pub alert_iterations: Option<u32>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay: Option<u64>,
    pub score_parse: Option<String>,
    pub output: Option<String>,
    pub improve_instruction: Option<String>,
    pub evaluate_prompt: Option<String>,
    pub rephrase_prompt: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    profiles: Option<HashMap<String, ProfileConfig>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Text,
    Json,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn load_profile(name: &str) -> Result<ProfileConfig, String> {
    let path = config_path()?;
    let profiles = read_profiles(&path)?;

    let profile = profiles.get(name).cloned().ok_or_else(|| {
        format!(
            "Profile '{}' not found in config file '{}'.",
            name,
            path.display()
        )
    })?;
    validate_profile(name, &profile)?;
    Ok(profile)
}

/// Parses the config file and validates every profile, or only `profile` when given.
pub fn validate_config(profile: Option<&str>) -> Result<PathBuf, String> {
    let path = config_path()?;
    let profiles = read_profiles(&path)?;

    match profile {
        Some(name) => {
            let config = profiles.get(name).ok_or_else(|| {
                format!(
                    "Profile '{}' not found in config file '{}'.",
                    name,
                    path.display()
                )
            })?;
            validate_profile(name, config)?;
        }
        None => {
            let mut names: Vec<_> = profiles.keys().collect();
            names.sort();
            for name in names {
                validate_profile(name, &profiles[name])?;
            }
        }
    }

    Ok(path)
}

pub fn validate_profile(name: &str, profile: &ProfileConfig) -> Result<(), String> {
    if let Some(provider) = &profile.provider {
        if Provider::from_name(provider).is_none() {
            return Err(format!(
                "Invalid profile provider '{provider}' in profile '{name}'. Supported values: {}.",
                Provider::SUPPORTED
            ));
        }
    }

    if let Some(output) = &profile.output {
        if OutputMode::from_name(output).is_none() {
            return Err(format!(
                "Invalid profile output '{output}' in profile '{name}'. Supported values: text, json."
            ));
        }
    }

    if let Some(mode) = &profile.score_parse {
        if ScoreParse::from_name(mode).is_none() {
            return Err(format!(
                "Invalid profile score_parse '{mode}' in profile '{name}'. Supported values: {}.",
                ScoreParse::SUPPORTED
            ));
        }
    }

    if let Some(threshold) = profile.threshold {
        check_threshold(threshold)
            .map_err(|err| format!("Invalid profile threshold in profile '{name}': {err}"))?;
    }

    if let Some(panel) = &profile.panel {
        if panel.iter().any(|model| model.trim().is_empty()) {
            return Err(format!(
                "Invalid profile panel in profile '{name}': model ids must not be empty."
            ));
        }
    }

    Ok(())
}

pub fn check_threshold(threshold: f64) -> Result<f64, String> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(format!("{threshold} is outside the range 0 to 1."))
    }
}

fn read_profiles(path: &Path) -> Result<HashMap<String, ProfileConfig>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config file '{}': {err}", path.display()))?;

    parse_profiles(&raw)
        .map_err(|err| format!("Failed to parse config file '{}': {err}", path.display()))?
        .ok_or_else(|| {
            format!(
                "Config file '{}' does not contain a [profiles] section.",
                path.display()
            )
        })
}

fn parse_profiles(raw: &str) -> Result<Option<HashMap<String, ProfileConfig>>, toml::de::Error> {
    let config: ConfigFile = toml::from_str(raw)?;
    Ok(config.profiles)
}

pub fn config_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var("MR_CONFIG") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let trimmed = xdg.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed).join("mrefine").join("config.toml"));
        }
    }

    let home = env::var("HOME").map_err(|_| {
        "Cannot resolve config path: set MR_CONFIG or HOME/XDG_CONFIG_HOME.".to_string()
    })?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("mrefine")
        .join("config.toml"))
}
