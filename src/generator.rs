//! Random usernames and frequency-weighted message selection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};

use crate::config::{PoolEntry, SimConfig, UsernameSettings};
use crate::error::{Result, SimError};

/// Returned when a draw lands outside every span. Unreachable with
/// consistent weights.
pub const UNDEFINED_MESSAGE: &str = "<UNDEFINED>";

/// Walk the cumulative spans and return the entry containing `index`.
///
/// Each entry's weight is a span on a number line of length `sum(weights)`;
/// `index` must be in `[0, total)` to hit anything.
pub fn select_weighted(entries: &[PoolEntry], index: u64) -> Option<&str> {
    let mut running = 0u64;
    for entry in entries {
        running += u64::from(entry.weight);
        if index < running {
            return Some(entry.text.as_str());
        }
    }
    None
}

pub fn total_weight(entries: &[PoolEntry]) -> u64 {
    entries.iter().map(|e| u64::from(e.weight)).sum()
}

pub struct MessageGenerator {
    pools: BTreeMap<String, Vec<PoolEntry>>,
    /// Lazily computed per-category weight sums. Cleared per category in `set_pool`.
    totals: HashMap<String, u64>,
    usernames: UsernameSettings,
    rng: StdRng,
}

impl MessageGenerator {
    pub fn new(config: &SimConfig, rng: StdRng) -> Self {
        Self {
            pools: config.pools.clone(),
            totals: HashMap::new(),
            usernames: config.usernames.clone(),
            rng,
        }
    }

    /// Seeded generators replay the same chat; `None` draws from OS entropy.
    pub fn from_config(config: &SimConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(config, rng)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn is_selectable(&self, category: &str) -> bool {
        self.pools
            .get(category)
            .is_some_and(|entries| total_weight(entries) > 0)
    }

    /// Replace (or add) a category's messages.
    pub fn set_pool(&mut self, category: impl Into<String>, entries: Vec<PoolEntry>) {
        let category = category.into();
        self.totals.remove(&category);
        self.pools.insert(category, entries);
    }

    fn total_for(&mut self, category: &str) -> Result<u64> {
        if let Some(total) = self.totals.get(category) {
            return Ok(*total);
        }
        let entries = self
            .pools
            .get(category)
            .ok_or_else(|| SimError::UnknownCategory(category.to_string()))?;
        let total = total_weight(entries);
        self.totals.insert(category.to_string(), total);
        Ok(total)
    }

    /// Draw one message text from `category`, proportionally to weight.
    pub fn pick_message(&mut self, category: &str) -> Result<String> {
        let total = self.total_for(category)?;
        if total == 0 {
            return Err(SimError::EmptyCategory(category.to_string()));
        }
        let index = self.rng.gen_range(0..total);
        let text = self
            .pools
            .get(category)
            .and_then(|entries| select_weighted(entries, index))
            .unwrap_or(UNDEFINED_MESSAGE);
        Ok(text.to_string())
    }

    /// prefix + suffix, plus a numeric tail about half of the time.
    pub fn username(&mut self) -> String {
        let prefix = pick(&mut self.rng, &self.usernames.prefixes);
        let suffix = pick(&mut self.rng, &self.usernames.suffixes);
        let mut name = format!("{prefix}{suffix}");
        if self.rng.gen_bool(self.usernames.numeric_suffix_chance) {
            let n = self.rng.gen_range(0..self.usernames.numeric_suffix_max);
            name.push_str(&n.to_string());
        }
        name
    }

    pub fn username_color(&mut self) -> String {
        pick(&mut self.rng, &self.usernames.colors).to_string()
    }

    /// Uniform delay in `[0, bound_ms)`; zero when the bound is zero.
    pub fn spam_delay_ms(&mut self, bound_ms: u64) -> u64 {
        if bound_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..bound_ms)
        }
    }
}

fn pick<'a>(rng: &mut StdRng, items: &'a [String]) -> &'a str {
    if items.is_empty() {
        return "";
    }
    items[rng.gen_range(0..items.len())].as_str()
}
