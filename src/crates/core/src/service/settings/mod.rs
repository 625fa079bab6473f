//! Settings service
//!
//! Reads all six sections in one batch fetch and merges stored values
//! over defaults; writes upsert all six sections in one transaction with
//! a shared timestamp.

pub mod types;

pub use types::{
    normalize_image_generation_method, CacheSettings, GlobalSettings, GrokSettings,
    PerformanceSettings, RegisterSettings, SettingsBundle, TokenEntry, TokenSettings, TokenTier,
};

use crate::infrastructure::storage::SqliteStore;
use crate::util::errors::GatewayResult;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// Settings service over the SQLite store.
#[derive(Clone)]
pub struct SettingsService {
    store: SqliteStore,
}

impl SettingsService {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Load the full bundle. A missing section, or one whose stored JSON
    /// fails to parse, falls back to that section's defaults.
    pub async fn load(&self) -> GatewayResult<SettingsBundle> {
        let rows: HashMap<String, String> = self
            .store
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM settings WHERE key IN \
                     ('global','grok','token','cache','performance','register')",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect()
            })
            .await?;

        let mut bundle = SettingsBundle {
            global: parse_section(&rows, "global"),
            grok: parse_section(&rows, "grok"),
            token: parse_section(&rows, "token"),
            cache: parse_section(&rows, "cache"),
            performance: parse_section(&rows, "performance"),
            register: parse_section(&rows, "register"),
        };

        // Expose the cookie value re-prefixed, the method canonicalized.
        bundle.grok.cf_clearance = types::prefix_cf_clearance(&bundle.grok.cf_clearance);
        bundle.grok.image_generation_method =
            normalize_image_generation_method(&bundle.grok.image_generation_method).to_string();
        Ok(bundle)
    }

    /// Persist the full bundle: six upserts in one transaction sharing
    /// one `updated_at` timestamp.
    pub async fn save(&self, bundle: &SettingsBundle) -> GatewayResult<()> {
        let mut stored = bundle.clone();
        stored.grok.cf_clearance = types::strip_cf_clearance(&stored.grok.cf_clearance);
        stored.grok.image_generation_method =
            normalize_image_generation_method(&stored.grok.image_generation_method).to_string();

        let sections: Vec<(String, String)> = vec![
            ("global".to_string(), to_json(&stored.global)),
            ("grok".to_string(), to_json(&stored.grok)),
            ("token".to_string(), to_json(&stored.token)),
            ("cache".to_string(), to_json(&stored.cache)),
            ("performance".to_string(), to_json(&stored.performance)),
            ("register".to_string(), to_json(&stored.register)),
        ];
        let updated_at = chrono::Utc::now().timestamp();

        self.store
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (key, value) in &sections {
                    tx.execute(
                        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                         updated_at = excluded.updated_at",
                        rusqlite::params![key, value, updated_at],
                    )?;
                }
                tx.commit()
            })
            .await?;
        Ok(())
    }
}

fn parse_section<T: DeserializeOwned + Default>(rows: &HashMap<String, String>, key: &str) -> T {
    match rows.get(key) {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!("settings section '{}' failed to parse ({}), using defaults", key, e);
            T::default()
        }),
        None => T::default(),
    }
}

fn to_json<T: Serialize>(section: &T) -> String {
    serde_json::to_string(section).unwrap_or_else(|_| "{}".to_string())
}
