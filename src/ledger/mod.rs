//! Token Ledger: per-provider, per-purpose accounting for one run.
//!
//! Grounded in `other_examples`' `model_router.rs` (`ModelUsageStats`,
//! `record_usage`, `cost_savings`, `generate_report`), generalized from a
//! fixed `AgentType × TaskComplexity` table into an append-only entry log
//! keyed by `(provider, purpose)`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Chars-per-token ratio used to estimate tokens saved by summarisation.
const CHARS_PER_TOKEN: f64 = 4.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Provider {
    OnDevice,
    LocalRunner,
    CloudFast,
    CloudStrong,
    NativeClassifier,
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Provider::OnDevice => "on_device",
            Provider::LocalRunner => "local_runner",
            Provider::CloudFast => "cloud_fast",
            Provider::CloudStrong => "cloud_strong",
            Provider::NativeClassifier => "native_classifier",
        }
    }

    fn is_free(&self) -> bool {
        matches!(self, Provider::OnDevice | Provider::LocalRunner | Provider::NativeClassifier)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct Rate {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Provider-keyed price table. `cloud_strong` is further keyed by model name
/// (haiku/sonnet/opus-class sub-tiers); an unknown model name falls back to
/// `cloud_strong_default` and logs a warning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceTable {
    pub cloud_fast: Rate,
    pub cloud_strong_default: Rate,
    pub cloud_strong_by_model: HashMap<String, Rate>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let mut cloud_strong_by_model = HashMap::new();
        cloud_strong_by_model.insert(
            "haiku".to_string(),
            Rate { input_per_million: 0.8, output_per_million: 4.0 },
        );
        cloud_strong_by_model.insert(
            "sonnet".to_string(),
            Rate { input_per_million: 3.0, output_per_million: 15.0 },
        );
        cloud_strong_by_model.insert(
            "opus".to_string(),
            Rate { input_per_million: 15.0, output_per_million: 75.0 },
        );
        Self {
            cloud_fast: Rate { input_per_million: 0.15, output_per_million: 0.6 },
            cloud_strong_default: Rate { input_per_million: 3.0, output_per_million: 15.0 },
            cloud_strong_by_model,
        }
    }
}

impl PriceTable {
    pub fn rate_for(&self, provider: &Provider, model_name: &str) -> Rate {
        if provider.is_free() {
            return Rate::default();
        }
        match provider {
            Provider::CloudFast => self.cloud_fast,
            Provider::CloudStrong => {
                let lower = model_name.to_lowercase();
                self.cloud_strong_by_model
                    .iter()
                    .find(|(key, _)| lower.contains(key.as_str()))
                    .map(|(_, rate)| *rate)
                    .unwrap_or_else(|| {
                        tracing::warn!(model = %model_name, "unknown cloud_strong model, using default rate");
                        self.cloud_strong_default
                    })
            }
            _ => Rate::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerEntry {
    pub provider: Provider,
    pub purpose: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub bytes_saved: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Copy)]
pub struct Totals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl Totals {
    fn add(&mut self, entry: &LedgerEntry) {
        self.input_tokens += entry.input_tokens;
        self.output_tokens += entry.output_tokens;
        self.cost += entry.cost;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Append-only per-run token/cost log. Single-threaded within a run; no
/// locking (§4.1).
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    entries: Vec<LedgerEntry>,
    price_table: PriceTable,
}

impl TokenLedger {
    pub fn new(price_table: PriceTable) -> Self {
        Self { entries: Vec::new(), price_table }
    }

    pub fn record(
        &mut self,
        provider: Provider,
        purpose: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        model_name: &str,
        bytes_saved: u64,
    ) {
        let rate = self.price_table.rate_for(&provider, model_name);
        let cost = (input_tokens as f64 / 1_000_000.0) * rate.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * rate.output_per_million;
        self.entries.push(LedgerEntry {
            provider,
            purpose: purpose.into(),
            input_tokens,
            output_tokens,
            cost,
            bytes_saved,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }

    pub fn totals_by_provider(&self) -> HashMap<&'static str, Totals> {
        let mut map: HashMap<&'static str, Totals> = HashMap::new();
        for entry in &self.entries {
            map.entry(entry.provider.label()).or_default().add(entry);
        }
        map
    }

    pub fn totals_by_purpose(&self) -> HashMap<String, Totals> {
        let mut map: HashMap<String, Totals> = HashMap::new();
        for entry in &self.entries {
            map.entry(entry.purpose.clone()).or_default().add(entry);
        }
        map
    }

    pub fn overall_totals(&self) -> Totals {
        let mut totals = Totals::default();
        for entry in &self.entries {
            totals.add(entry);
        }
        totals
    }

    /// Estimated tokens saved by summarisation, using the fixed
    /// chars-per-token ratio.
    pub fn savings(&self) -> u64 {
        let bytes: u64 = self.entries.iter().map(|e| e.bytes_saved).sum();
        (bytes as f64 / CHARS_PER_TOKEN) as u64
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn format_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Token Ledger Report");
        let _ = writeln!(out, "===================");

        let mut by_provider: Vec<_> = self.totals_by_provider().into_iter().collect();
        by_provider.sort_by_key(|(label, _)| *label);
        for (label, totals) in &by_provider {
            let _ = writeln!(
                out,
                "  provider {:<16} tokens={:<8} cost=${:.4}",
                label,
                totals.total_tokens(),
                totals.cost
            );
        }

        let mut by_purpose: Vec<_> = self.totals_by_purpose().into_iter().collect();
        by_purpose.sort_by(|a, b| a.0.cmp(&b.0));
        for (purpose, totals) in &by_purpose {
            let _ = writeln!(
                out,
                "  purpose  {:<16} tokens={:<8} cost=${:.4}",
                purpose,
                totals.total_tokens(),
                totals.cost
            );
        }

        let overall = self.overall_totals();
        let _ = writeln!(
            out,
            "-------------------\n  total tokens={} cost=${:.4}",
            overall.total_tokens(),
            overall.cost
        );

        let savings = self.savings();
        if savings > 0 {
            let _ = writeln!(out, "  est. tokens saved by summarisation: {savings}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_providers_cost_zero() {
        let mut ledger = TokenLedger::new(PriceTable::default());
        ledger.record(Provider::OnDevice, "agent", 10_000, 5_000, "llama3", 0);
        assert_eq!(ledger.overall_totals().cost, 0.0);
    }

    #[test]
    fn cloud_strong_selects_submodel_rate() {
        let table = PriceTable::default();
        let opus_rate = table.rate_for(&Provider::CloudStrong, "claude-opus-4-1");
        let haiku_rate = table.rate_for(&Provider::CloudStrong, "claude-haiku");
        assert!(opus_rate.input_per_million > haiku_rate.input_per_million);
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        let table = PriceTable::default();
        let rate = table.rate_for(&Provider::CloudStrong, "some-unlisted-model");
        assert_eq!(rate.input_per_million, table.cloud_strong_default.input_per_million);
    }

    #[test]
    fn ledger_additivity() {
        let mut ledger = TokenLedger::new(PriceTable::default());
        ledger.record(Provider::CloudFast, "agent", 1000, 500, "fast", 0);
        ledger.record(Provider::CloudStrong, "summary", 2000, 1000, "claude-sonnet", 0);

        let overall = ledger.overall_totals();
        let by_provider_total: f64 = ledger.totals_by_provider().values().map(|t| t.cost).sum();
        let by_purpose_total: f64 = ledger.totals_by_purpose().values().map(|t| t.cost).sum();

        assert!((by_provider_total - overall.cost).abs() < 1e-9);
        assert!((by_purpose_total - overall.cost).abs() < 1e-9);
        assert!(overall.cost >= 0.0);
    }

    #[test]
    fn savings_use_fixed_ratio() {
        let mut ledger = TokenLedger::new(PriceTable::default());
        ledger.record(Provider::CloudFast, "summary", 0, 0, "fast", 400);
        assert_eq!(ledger.savings(), 100);
    }

    #[test]
    fn empty_ledger_has_zero_totals() {
        let ledger = TokenLedger::new(PriceTable::default());
        assert_eq!(ledger.overall_totals().total_tokens(), 0);
        assert_eq!(ledger.overall_totals().cost, 0.0);
    }
}
