//! Chat data and tuning knobs, loaded from TOML.
//!
//! The built-in table lives in `data/default.toml` and is compiled into the
//! binary. A user file passed with `--config` replaces it wholesale; every
//! section except `[usernames]` and `[pools]` falls back to the defaults below.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, SimError};

/// The embedded default data table.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../data/default.toml");

/// Slider positions run from 0 (slowest) to this value (fastest).
pub const MAX_SPEED: u8 = 100;

/// Map a 0-100 speed slider value to the upper bound of the random spam
/// delay, in milliseconds. Values above `MAX_SPEED` are clamped.
pub fn speed_to_bound_ms(speed: u8) -> u64 {
    2200 - 20 * u64::from(speed.min(MAX_SPEED))
}

/// Map a microphone level in `[0, 1]` onto the speed slider. `None` for
/// levels outside that range (or NaN).
pub fn volume_to_speed(level: f64) -> Option<u8> {
    if !(0.0..=1.0).contains(&level) {
        return None;
    }
    Some((level * f64::from(MAX_SPEED)).round() as u8)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub spam: SpamSettings,
    pub usernames: UsernameSettings,
    #[serde(default)]
    pub emotes: EmoteSettings,
    /// category name -> weighted messages, in file order
    pub pools: BTreeMap<String, Vec<PoolEntry>>,
    #[serde(default)]
    pub voice: VoiceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatSettings {
    /// Entry count above which the log is trimmed.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Number of oldest entries removed per trim.
    #[serde(default = "default_trim_batch")]
    pub trim_batch: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            trim_batch: default_trim_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpamSettings {
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_speed")]
    pub speed: u8,
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl Default for SpamSettings {
    fn default() -> Self {
        Self {
            category: default_category(),
            speed: default_speed(),
            autostart: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsernameSettings {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    /// CSS color classes handed to the page (also mapped to terminal colors).
    pub colors: Vec<String>,
    #[serde(default = "default_numeric_chance")]
    pub numeric_suffix_chance: f64,
    /// Exclusive upper bound of the numeric suffix.
    #[serde(default = "default_numeric_max")]
    pub numeric_suffix_max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmoteSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Directory served under `/emotes/`. Without it images fall back to alt text.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// (token, image file) in match order
    #[serde(default)]
    pub table: Vec<(String, String)>,
}

impl Default for EmoteSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            dir: None,
            table: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolEntry {
    pub text: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceSettings {
    #[serde(default)]
    pub keywords: Vec<KeywordRule>,
}

/// Switch to `category` when a transcript contains `phrase` (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordRule {
    pub phrase: String,
    pub category: String,
}

fn default_capacity() -> usize {
    170
}
fn default_trim_batch() -> usize {
    30
}
fn default_category() -> String {
    "laughing".to_string()
}
fn default_speed() -> u8 {
    50
}
fn default_true() -> bool {
    true
}
fn default_numeric_chance() -> f64 {
    0.5
}
fn default_numeric_max() -> u32 {
    120
}
fn default_base_url() -> String {
    "/emotes/".to_string()
}

impl SimConfig {
    /// Parse and validate the embedded default table.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(DEFAULT_CONFIG_TOML)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| SimError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether `category` exists and has at least one drawable message.
    pub fn is_selectable(&self, category: &str) -> bool {
        self.pools
            .get(category)
            .is_some_and(|entries| entries.iter().any(|e| e.weight > 0))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SimError::Validation(msg));

        if self.chat.trim_batch == 0 {
            return invalid("chat.trim_batch must be at least 1".to_string());
        }
        if self.chat.trim_batch > self.chat.capacity {
            return invalid(format!(
                "chat.trim_batch ({}) must not exceed chat.capacity ({})",
                self.chat.trim_batch, self.chat.capacity
            ));
        }
        if self.spam.speed > MAX_SPEED {
            return invalid(format!(
                "spam.speed must be between 0 and {MAX_SPEED}, got {}",
                self.spam.speed
            ));
        }
        if !self.is_selectable(&self.spam.category) {
            return invalid(format!(
                "spam.category '{}' is missing or has no positive weights",
                self.spam.category
            ));
        }

        let names = &self.usernames;
        if names.prefixes.is_empty() || names.suffixes.is_empty() {
            return invalid("usernames.prefixes and usernames.suffixes must be non-empty".to_string());
        }
        if names.colors.is_empty() {
            return invalid("usernames.colors must be non-empty".to_string());
        }
        if !(0.0..=1.0).contains(&names.numeric_suffix_chance) {
            return invalid(format!(
                "usernames.numeric_suffix_chance must be within [0, 1], got {}",
                names.numeric_suffix_chance
            ));
        }
        if names.numeric_suffix_max == 0 {
            return invalid("usernames.numeric_suffix_max must be at least 1".to_string());
        }

        if let Some((token, _)) = self.emotes.table.iter().find(|(token, _)| token.is_empty()) {
            return invalid(format!("emote token must be non-empty (got '{token}')"));
        }

        for rule in &self.voice.keywords {
            if rule.phrase.is_empty() {
                return invalid(format!(
                    "voice keyword for '{}' has an empty phrase",
                    rule.category
                ));
            }
            if !self.pools.contains_key(&rule.category) {
                return invalid(format!(
                    "voice keyword '{}' points at unknown category '{}'",
                    rule.phrase, rule.category
                ));
            }
        }
        Ok(())
    }
}
