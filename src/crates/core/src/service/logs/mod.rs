//! Request logs
//!
//! Append-only per-request rows and the statistics query: one scan of the
//! last 14 days deriving hourly buckets from the last 24h and daily
//! buckets over the full window.

use crate::infrastructure::storage::SqliteStore;
use crate::util::errors::GatewayResult;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

const HOURLY_WINDOW: i64 = 24;
const DAILY_WINDOW: i64 = 14;

/// One request log row.
#[derive(Debug, Clone, Default)]
pub struct RequestLogEntry {
    pub ip: String,
    pub model: String,
    pub duration_seconds: f64,
    pub status: u16,
    pub key_name: String,
    pub token_suffix: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourlyBucket {
    pub hour: String,
    pub success: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyBucket {
    pub date: String,
    pub success: u64,
    pub failed: u64,
}

/// Aggregates over the 14-day window. `hourly` always has 24 entries,
/// `daily` always 14, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub hourly: Vec<HourlyBucket>,
    pub daily: Vec<DailyBucket>,
}

#[derive(Clone)]
pub struct RequestLogStore {
    store: SqliteStore,
}

impl RequestLogStore {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Append one row. Never fails the request path; storage errors are
    /// the caller's to log.
    pub async fn insert(&self, entry: RequestLogEntry) -> GatewayResult<()> {
        let now = Utc::now();
        let time = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let timestamp = now.timestamp();
        self.store
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO request_logs \
                     (time, timestamp, ip, model, duration, status, key_name, token_suffix, error) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        time,
                        timestamp,
                        entry.ip,
                        entry.model,
                        entry.duration_seconds,
                        entry.status,
                        entry.key_name,
                        entry.token_suffix,
                        entry.error,
                    ],
                )
            })
            .await?;
        Ok(())
    }

    /// Aggregate the last 14 days in one scan.
    pub async fn stats(&self) -> GatewayResult<StatsSummary> {
        self.stats_at(Utc::now()).await
    }

    async fn stats_at(&self, now: DateTime<Utc>) -> GatewayResult<StatsSummary> {
        let now_ts = now.timestamp();
        let cutoff = now_ts - DAILY_WINDOW * 86400;
        let rows: Vec<(i64, i64)> = self
            .store
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT timestamp, status FROM request_logs WHERE timestamp >= ?1",
                )?;
                let rows = stmt.query_map([cutoff], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })?;
                rows.collect()
            })
            .await?;

        let mut total = 0u64;
        let mut success = 0u64;
        let mut hourly = vec![(0u64, 0u64); HOURLY_WINDOW as usize];
        let mut daily = vec![(0u64, 0u64); DAILY_WINDOW as usize];

        for (timestamp, status) in rows {
            let ok = (200..400).contains(&status);
            total += 1;
            if ok {
                success += 1;
            }

            let age = now_ts - timestamp;
            let hour_offset = age / 3600;
            if (0..HOURLY_WINDOW).contains(&hour_offset) {
                let bucket = &mut hourly[(HOURLY_WINDOW - 1 - hour_offset) as usize];
                if ok {
                    bucket.0 += 1;
                } else {
                    bucket.1 += 1;
                }
            }
            let day_offset = age / 86400;
            if (0..DAILY_WINDOW).contains(&day_offset) {
                let bucket = &mut daily[(DAILY_WINDOW - 1 - day_offset) as usize];
                if ok {
                    bucket.0 += 1;
                } else {
                    bucket.1 += 1;
                }
            }
        }

        let failed = total - success;
        let success_rate = if total == 0 {
            0.0
        } else {
            (success as f64 / total as f64 * 1000.0).round() / 10.0
        };

        let hourly = hourly
            .into_iter()
            .enumerate()
            .map(|(i, (ok, fail))| {
                let start = now_ts - (HOURLY_WINDOW - 1 - i as i64) * 3600;
                HourlyBucket {
                    hour: format_hour(start),
                    success: ok,
                    failed: fail,
                }
            })
            .collect();
        let daily = daily
            .into_iter()
            .enumerate()
            .map(|(i, (ok, fail))| {
                let start = now_ts - (DAILY_WINDOW - 1 - i as i64) * 86400;
                DailyBucket {
                    date: format_day(start),
                    success: ok,
                    failed: fail,
                }
            })
            .collect();

        Ok(StatsSummary {
            total,
            success,
            failed,
            success_rate,
            hourly,
            daily,
        })
    }
}

fn format_hour(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|t| t.format("%m-%d %H:00").to_string())
        .unwrap_or_default()
}

fn format_day(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
