//! Token pool
//!
//! Thin lookup over the configured upstream credentials. Super-tier
//! models draw only from the super pool; basic-tier models fall back
//! from basic to super. Selection is round-robin within a pool.

use crate::service::settings::{TokenEntry, TokenSettings, TokenTier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

pub struct TokenPool {
    entries: RwLock<Vec<TokenEntry>>,
    super_models: RwLock<Vec<String>>,
    cursor: AtomicUsize,
}

impl TokenPool {
    pub fn from_settings(settings: &TokenSettings) -> Self {
        Self {
            entries: RwLock::new(settings.tokens.clone()),
            super_models: RwLock::new(settings.super_models.clone()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Replace the pool contents after a settings save.
    pub fn reload(&self, settings: &TokenSettings) {
        *self.entries.write().unwrap_or_else(|p| p.into_inner()) = settings.tokens.clone();
        *self.super_models.write().unwrap_or_else(|p| p.into_inner()) =
            settings.super_models.clone();
    }

    pub fn is_super_model(&self, model: &str) -> bool {
        self.super_models
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .any(|m| m == model)
    }

    /// Pick a credential for `model`, or `None` when the eligible pools
    /// are empty.
    pub fn pick(&self, model: &str) -> Option<TokenEntry> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let pick_from = |tier: TokenTier| -> Vec<&TokenEntry> {
            entries.iter().filter(|e| e.tier == tier).collect()
        };

        let candidates = if self.is_super_model(model) {
            pick_from(TokenTier::Super)
        } else {
            let basic = pick_from(TokenTier::Basic);
            if basic.is_empty() {
                pick_from(TokenTier::Super)
            } else {
                basic
            }
        };
        if candidates.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].clone())
    }

    /// All entries, the item list for the refresh batch job.
    pub fn entries(&self) -> Vec<TokenEntry> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Last four characters, for log rows. Never the full credential.
pub fn token_suffix(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let start = chars.len().saturating_sub(4);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, tier: TokenTier) -> TokenEntry {
        TokenEntry {
            key_name: name.to_string(),
            token: format!("sso-token-{}", name),
            tier,
        }
    }

    fn pool(entries: Vec<TokenEntry>) -> TokenPool {
        TokenPool::from_settings(&TokenSettings {
            tokens: entries,
            super_models: vec!["grok-4-heavy".to_string()],
            ..TokenSettings::default()
        })
    }

    #[test]
    fn test_super_model_only_draws_super() {
        let pool1 = pool(vec![entry("b1", TokenTier::Basic)]);
        assert!(pool1.pick("grok-4-heavy").is_none());

        let pool2 = pool(vec![
            entry("b1", TokenTier::Basic),
            entry("s1", TokenTier::Super),
        ]);
        let picked = pool2.pick("grok-4-heavy").unwrap();
        assert_eq!(picked.key_name, "s1");
    }

    #[test]
    fn test_basic_model_falls_back_to_super() {
        let pool = pool(vec![entry("s1", TokenTier::Super)]);
        let picked = pool.pick("grok-4").unwrap();
        assert_eq!(picked.key_name, "s1");
    }

    #[test]
    fn test_round_robin_within_pool() {
        let pool = pool(vec![
            entry("b1", TokenTier::Basic),
            entry("b2", TokenTier::Basic),
        ]);
        let first = pool.pick("grok-4").unwrap().key_name;
        let second = pool.pick("grok-4").unwrap().key_name;
        assert_ne!(first, second);
    }

    #[test]
    fn test_empty_pool() {
        let pool = pool(Vec::new());
        assert!(pool.pick("grok-4").is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_token_suffix() {
        assert_eq!(token_suffix("abcdefgh"), "efgh");
        assert_eq!(token_suffix("ab"), "ab");
        assert_eq!(token_suffix(""), "");
    }
}
