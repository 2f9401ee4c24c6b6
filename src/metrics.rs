//! Token, latency and cost accounting for a single generation.

use crate::config::PricingEntry;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;

/// Built-in USD prices per million tokens: (model, input, output).
const BUILTIN_PRICING: &[(&str, f64, f64)] = &[
    ("zai-glm-4.6", 2.25, 2.75),
    ("gpt-oss-120b", 0.35, 0.75),
    ("llama3.1-8b", 0.10, 0.10),
    ("llama-3.3-70b", 0.85, 1.20),
    ("qwen-3-32b", 0.40, 0.80),
    ("qwen-3-235b-a22b-instruct-2507", 0.60, 1.20),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: HashMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PricingTable {
    pub fn builtin() -> Self {
        let entries = BUILTIN_PRICING
            .iter()
            .map(|(model, input, output)| {
                (
                    model.to_string(),
                    ModelPricing {
                        input_per_million: *input,
                        output_per_million: *output,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Built-in table with configured entries layered on top.
    pub fn with_overrides(overrides: &[PricingEntry]) -> Self {
        let mut table = Self::builtin();
        for entry in overrides {
            table.entries.insert(
                entry.model.clone(),
                ModelPricing {
                    input_per_million: entry.input,
                    output_per_million: entry.output,
                },
            );
        }
        table
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.entries.get(model).copied()
    }

    /// USD cost, or `None` when the model has no known price.
    pub fn cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> Option<f64> {
        let pricing = self.get(model)?;
        let input = (prompt_tokens as f64 / 1_000_000.0) * pricing.input_per_million;
        let output = (completion_tokens as f64 / 1_000_000.0) * pricing.output_per_million;
        Some(input + output)
    }
}

pub fn format_cost(cost: f64) -> String {
    format!("{:.6}", cost)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Raw timings and counters captured around one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub usage: Option<TokenUsage>,
    /// Non-empty text fragments received (1 for a non-streaming reply).
    pub fragments: u64,
    /// Call start to full return.
    pub elapsed: Duration,
    /// Call start to first observable output.
    pub ttft: Duration,
    /// First output to end of stream; equals `elapsed` without streaming.
    pub generation: Duration,
}

impl Measurement {
    /// A blocking call: nothing is observable before the whole reply arrives.
    pub fn non_streaming(elapsed: Duration, usage: Option<TokenUsage>) -> Self {
        Self {
            usage,
            fragments: 1,
            elapsed,
            ttft: elapsed,
            generation: elapsed,
        }
    }
}

/// Records fragment arrival times of a streamed reply. Times are offsets
/// from the moment the request was issued.
#[derive(Debug, Default)]
pub struct StreamMeter {
    first_fragment: Option<Duration>,
    fragments: u64,
    usage: Option<TokenUsage>,
}

impl StreamMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fragment(&mut self, at: Duration, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.first_fragment.is_none() {
            self.first_fragment = Some(at);
        }
        self.fragments += 1;
    }

    /// Usage usually arrives on the terminal chunk; the last report wins.
    pub fn record_usage(&mut self, usage: TokenUsage) {
        self.usage = Some(usage);
    }

    pub fn finish(self, end: Duration) -> Measurement {
        let ttft = self.first_fragment.unwrap_or(end);
        Measurement {
            usage: self.usage,
            fragments: self.fragments,
            elapsed: end,
            ttft,
            generation: end.saturating_sub(ttft),
        }
    }
}

/// Where `total_tokens` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    /// Counters reported by the provider.
    Usage,
    /// Count of streamed fragments; only an approximation of tokens.
    FragmentCount,
}

/// Tokens per second, or "N/A" when there is no generation interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Throughput {
    PerSecond(f64),
    NotApplicable,
}

impl std::fmt::Display for Throughput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerSecond(v) => write!(f, "{:.2}", v),
            Self::NotApplicable => f.write_str("N/A"),
        }
    }
}

impl Serialize for Throughput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::PerSecond(v) => serializer.serialize_f64(*v),
            Self::NotApplicable => serializer.serialize_str("N/A"),
        }
    }
}

impl<'de> Deserialize<'de> for Throughput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(f64),
            Text(String),
        }
        Ok(match Wire::deserialize(deserializer)? {
            Wire::Number(v) => Self::PerSecond(v),
            Wire::Text(t) => match t.parse::<f64>() {
                Ok(v) => Self::PerSecond(v),
                Err(_) => Self::NotApplicable,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_tokens: u64,
    /// Seconds, two decimals.
    pub elapsed_time: f64,
    pub tps: Throughput,
    /// Seconds, two decimals.
    pub ttft: f64,
    /// USD with six decimals; absent for unpriced models or approximate counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<String>,
    pub token_source: TokenSource,
}

impl Metrics {
    pub fn compute(measurement: &Measurement, model: &str, pricing: &PricingTable) -> Self {
        let (total_tokens, completion_tokens, token_source, cost) = match measurement.usage {
            Some(usage) => {
                let total = if usage.total_tokens > 0 {
                    usage.total_tokens
                } else {
                    usage.prompt_tokens + usage.completion_tokens
                };
                let cost = pricing
                    .cost(model, usage.prompt_tokens, usage.completion_tokens)
                    .map(format_cost);
                (total, usage.completion_tokens, TokenSource::Usage, cost)
            }
            None => (
                measurement.fragments,
                measurement.fragments,
                TokenSource::FragmentCount,
                None,
            ),
        };

        let generation_secs = measurement.generation.as_secs_f64();
        let tps = if completion_tokens > 0 && generation_secs > 0.0 {
            Throughput::PerSecond(round2(completion_tokens as f64 / generation_secs))
        } else {
            Throughput::NotApplicable
        };

        Self {
            total_tokens,
            elapsed_time: round2(measurement.elapsed.as_secs_f64()),
            tps,
            ttft: round2(measurement.ttft.as_secs_f64()),
            cost,
            token_source,
        }
    }

    pub fn is_approximate(&self) -> bool {
        self.token_source == TokenSource::FragmentCount
    }

    /// One-line footer: `TTFT: 0.20s  TPS: 2.50  Total Time: 1.00s  Tokens: 2`.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "TTFT: {:.2}s  TPS: {}  Total Time: {:.2}s  Tokens: {}",
            self.ttft, self.tps, self.elapsed_time, self.total_tokens
        );
        if self.is_approximate() {
            line.push_str(" (approx., counted fragments)");
        }
        if let Some(cost) = &self.cost {
            line.push_str(&format!("  Cost: ${}", cost));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn cost_for_gpt_oss() {
        let table = PricingTable::builtin();
        let cost = table.cost("gpt-oss-120b", 1000, 2000).unwrap();
        assert!((cost - 0.00185).abs() < 1e-12);
        assert_eq!(format_cost(cost), "0.001850");
    }

    #[test]
    fn unknown_model_has_no_cost() {
        let table = PricingTable::builtin();
        assert_eq!(table.cost("mystery-model", 10, 10), None);

        let m = Metrics::compute(
            &Measurement::non_streaming(
                secs(1.0),
                Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 10,
                    total_tokens: 20,
                }),
            ),
            "mystery-model",
            &table,
        );
        assert_eq!(m.cost, None);
    }

    #[test]
    fn overrides_replace_builtin_prices() {
        let table = PricingTable::with_overrides(&[PricingEntry {
            model: "gpt-oss-120b".into(),
            input: 1.0,
            output: 1.0,
        }]);
        let pricing = table.get("gpt-oss-120b").unwrap();
        assert_eq!(pricing.input_per_million, 1.0);
        assert!(table.get("llama3.1-8b").is_some());
    }

    #[test]
    fn streaming_timing_scenario() {
        let mut meter = StreamMeter::new();
        meter.record_fragment(Duration::from_millis(200), "Hello");
        meter.record_fragment(Duration::from_millis(500), " world");
        meter.record_usage(TokenUsage {
            prompt_tokens: 0,
            completion_tokens: 2,
            total_tokens: 2,
        });
        let measurement = meter.finish(Duration::from_millis(1000));

        assert_eq!(measurement.ttft, Duration::from_millis(200));
        assert_eq!(measurement.generation, Duration::from_millis(800));

        let metrics = Metrics::compute(&measurement, "unpriced", &PricingTable::builtin());
        assert!((metrics.ttft - 0.2).abs() < 1e-9);
        match metrics.tps {
            Throughput::PerSecond(v) => assert!((v - 2.5).abs() < 1e-9),
            Throughput::NotApplicable => panic!("expected a rate"),
        }
        assert_eq!(metrics.token_source, TokenSource::Usage);
    }

    #[test]
    fn empty_fragments_do_not_set_ttft() {
        let mut meter = StreamMeter::new();
        meter.record_fragment(Duration::from_millis(100), "");
        meter.record_fragment(Duration::from_millis(300), "x");
        let measurement = meter.finish(secs(1.0));
        assert_eq!(measurement.fragments, 1);
        assert_eq!(measurement.ttft, Duration::from_millis(300));
    }

    #[test]
    fn missing_usage_falls_back_to_labeled_fragment_count() {
        let mut meter = StreamMeter::new();
        for (i, frag) in ["a", "b", "c", "d"].iter().enumerate() {
            meter.record_fragment(Duration::from_millis(100 * (i as u64 + 1)), frag);
        }
        let metrics = Metrics::compute(
            &meter.finish(Duration::from_millis(500)),
            "gpt-oss-120b",
            &PricingTable::builtin(),
        );
        assert_eq!(metrics.total_tokens, 4);
        assert!(metrics.is_approximate());
        assert_eq!(metrics.cost, None);
        assert!(metrics.summary_line().contains("approx."));
    }

    #[test]
    fn non_streaming_ttft_equals_elapsed() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 300,
            total_tokens: 400,
        };
        let m = Metrics::compute(
            &Measurement::non_streaming(Duration::from_millis(1500), Some(usage)),
            "gpt-oss-120b",
            &PricingTable::builtin(),
        );
        assert_eq!(m.ttft, m.elapsed_time);
        assert_eq!(m.elapsed_time, 1.5);
        assert_eq!(m.tps, Throughput::PerSecond(200.0));
        assert_eq!(m.total_tokens, 400);
    }

    #[test]
    fn zero_elapsed_is_not_applicable() {
        let m = Metrics::compute(
            &Measurement::non_streaming(Duration::ZERO, None),
            "gpt-oss-120b",
            &PricingTable::builtin(),
        );
        assert_eq!(m.tps, Throughput::NotApplicable);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["tps"], "N/A");
        let back: Metrics = serde_json::from_value(json).unwrap();
        assert_eq!(back.tps, Throughput::NotApplicable);
    }
}
