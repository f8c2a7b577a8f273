//! Conflict resolver - decides what a divergent record pair becomes
//!
//! Pure strategy logic lives in [`resolve`]; the webhook strategy consults
//! an external endpoint through [`WebhookResolver`] and falls back to a
//! pending conflict when the endpoint does not answer in time.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::mapper::FieldMapper;
use crate::models::{ConflictStrategy, Record};

/// Outcome of resolving one record pair
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Flush this record to the slave
    Write(Record),
    /// Leave the slave untouched
    Noop,
    /// Park as a pending conflict over these master-side fields
    Conflict(Vec<String>),
}

/// Inputs the strategy needs beyond the record pair
pub struct ResolveContext<'a> {
    /// Configured strategy
    pub strategy: ConflictStrategy,
    /// Slave column holding a unix-ms modification timestamp
    pub slave_modified_column: Option<&'a str>,
    /// Completion time of the last successful job (unix ms)
    pub last_synced_at: Option<i64>,
    /// External decider for the webhook strategy
    pub webhook: Option<&'a WebhookResolver>,
}

/// Decide what to do with one mapped candidate against the current slave
/// record, if any.
///
/// A missing slave record is an insert for every strategy; `target_wins`
/// inserts only the key so the record is marked as seen without adopting
/// master values.
pub async fn resolve(
    mapper: &FieldMapper,
    candidate: &Record,
    slave: Option<&Record>,
    ctx: &ResolveContext<'_>,
) -> Result<Resolution> {
    let Some(slave) = slave else {
        if ctx.strategy == ConflictStrategy::TargetWins {
            let mut key_only = Record::new();
            let key_column = mapper.slave_key_column();
            let key_value = candidate.get(key_column).cloned().unwrap_or(Value::Null);
            key_only.insert(key_column.to_string(), key_value);
            return Ok(Resolution::Write(key_only));
        }
        return Ok(Resolution::Write(candidate.clone()));
    };

    let divergent = mapper.conflicting_fields(candidate, slave);
    if divergent.is_empty() {
        return Ok(Resolution::Noop);
    }

    match ctx.strategy {
        ConflictStrategy::SourceWins => Ok(Resolution::Write(candidate.clone())),
        ConflictStrategy::TargetWins => Ok(Resolution::Noop),
        ConflictStrategy::Manual => Ok(Resolution::Conflict(divergent)),
        ConflictStrategy::Merge => Ok(resolve_merge(candidate, slave, divergent, ctx)),
        ConflictStrategy::Webhook => {
            let Some(webhook) = ctx.webhook else {
                return Err(Error::InvalidInput(
                    "Webhook strategy without a configured endpoint".to_string(),
                ));
            };
            match webhook.decide(candidate, slave).await {
                Ok(decision) => Ok(apply_decision(decision, candidate, divergent)),
                Err(e) => {
                    warn!(error = %e, "webhook resolution failed, parking as conflict");
                    Ok(Resolution::Conflict(divergent))
                }
            }
        }
    }
}

/// Merge: master wins unless the slave changed after the last successful
/// sync. Without a usable slave modification timestamp the strategy cannot
/// tell stale from fresh and degrades to manual review.
fn resolve_merge(
    candidate: &Record,
    slave: &Record,
    divergent: Vec<String>,
    ctx: &ResolveContext<'_>,
) -> Resolution {
    let Some(column) = ctx.slave_modified_column else {
        return Resolution::Conflict(divergent);
    };
    let Some(modified_at) = slave.get(column).and_then(Value::as_i64) else {
        return Resolution::Conflict(divergent);
    };

    let last_synced = ctx.last_synced_at.unwrap_or(0);
    if modified_at > last_synced {
        // The slave moved since we last synced; the divergent fields are
        // irreconcilable without a reviewer.
        Resolution::Conflict(divergent)
    } else {
        Resolution::Write(candidate.clone())
    }
}

/// The decision an external webhook endpoint returns
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookDecision {
    /// One of `source`, `slave`, `merged`, `skipped`
    pub resolution: String,
    /// Replacement record, required for `merged`
    #[serde(default)]
    pub merged_data: Option<Record>,
}

fn apply_decision(
    decision: WebhookDecision,
    candidate: &Record,
    divergent: Vec<String>,
) -> Resolution {
    match decision.resolution.as_str() {
        "source" => Resolution::Write(candidate.clone()),
        "slave" | "skipped" => Resolution::Noop,
        "merged" => decision
            .merged_data
            .map_or(Resolution::Conflict(divergent), Resolution::Write),
        other => {
            warn!(resolution = other, "unknown webhook resolution, parking as conflict");
            Resolution::Conflict(divergent)
        }
    }
}

/// Payload sent to the webhook endpoint
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    master_record: &'a Record,
    slave_record: &'a Record,
}

/// HTTP client for the webhook strategy
pub struct WebhookResolver {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookResolver {
    /// Build a resolver for the given endpoint
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// POST the record pair and parse the decision
    pub async fn decide(&self, candidate: &Record, slave: &Record) -> Result<WebhookDecision> {
        let payload = WebhookPayload {
            master_record: candidate,
            slave_record: slave,
        };
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Connection(format!(
                "Webhook returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}
