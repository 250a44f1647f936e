//! Paid-channel classification.
//!
//! Only paid entities are allocated budget. The allocator's caller filters
//! beliefs through a [`PaidPredicate`] and the verifier re-checks membership
//! with the same predicate.

use std::collections::HashSet;

use crate::config::ChannelPolicyConfig;
use crate::types::EntityKey;

/// Decides whether an entity is a paid spend unit.
pub trait PaidPredicate {
    /// Whether budget may be allocated to this entity.
    fn is_paid(&self, key: &EntityKey) -> bool;
}

/// Channel an entity is capped and aggregated under.
pub fn channel_of(key: &EntityKey) -> &str {
    &key.channel
}

/// Keyword and exact-list channel classifier.
#[derive(Debug, Clone)]
pub struct ChannelPolicy {
    include: Vec<String>,
    exclude: Vec<String>,
    exact_paid: HashSet<String>,
    exact_unpaid: HashSet<String>,
}

impl ChannelPolicy {
    /// Build from configuration, normalizing every keyword once.
    pub fn from_config(config: &ChannelPolicyConfig) -> Self {
        let norm_all = |list: &[String]| list.iter().map(|k| normalize(k)).collect::<Vec<_>>();
        Self {
            include: norm_all(&config.include_keywords),
            exclude: norm_all(&config.exclude_keywords),
            exact_paid: config.exact_paid_channels.iter().map(|k| normalize(k)).collect(),
            exact_unpaid: config.exact_unpaid_channels.iter().map(|k| normalize(k)).collect(),
        }
    }
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self::from_config(&ChannelPolicyConfig::default())
    }
}

impl PaidPredicate for ChannelPolicy {
    fn is_paid(&self, key: &EntityKey) -> bool {
        let channel = normalize(channel_of(key));
        let whole = normalize(&key.to_string());

        if self.exact_unpaid.contains(&channel) {
            return false;
        }
        if self.exact_paid.contains(&channel) {
            return true;
        }

        let hit = |k: &String| channel.contains(k.as_str()) || whole.contains(k.as_str());
        if self.exclude.iter().any(hit) {
            return false;
        }
        self.include.iter().any(hit)
    }
}

impl<F> PaidPredicate for F
where
    F: Fn(&EntityKey) -> bool,
{
    fn is_paid(&self, key: &EntityKey) -> bool {
        self(key)
    }
}

/// Lowercase, collapse non-alphanumeric runs to one space, trim.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}
