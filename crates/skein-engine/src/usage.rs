use std::collections::HashMap;

use serde::Serialize;

use skein_core::config::EngineConfig;

/// One billed model call, or an aggregate of calls made by one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub module_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_points: f64,
}

impl UsageEntry {
    /// Same counts, no charge. Used when the user calls the model with
    /// their own key.
    pub fn waived(self) -> Self {
        Self {
            total_points: 0.0,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ModelPrice {
    input: f64,
    output: f64,
}

/// Converts token counts into billed points using per-model prices
/// (points per 1000 tokens).
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    prices: HashMap<String, ModelPrice>,
}

impl UsageAccumulator {
    pub fn from_config(config: &EngineConfig) -> Self {
        let prices = config
            .models
            .iter()
            .map(|m| {
                (
                    m.id.clone(),
                    ModelPrice {
                        input: m.input_price,
                        output: m.output_price,
                    },
                )
            })
            .collect();
        Self { prices }
    }

    /// Points for a call. Unknown models cost nothing.
    pub fn points(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.prices.get(model) {
            Some(price) => {
                (input_tokens as f64 * price.input + output_tokens as f64 * price.output) / 1000.0
            }
            None => 0.0,
        }
    }

    pub fn bill(
        &self,
        module_name: impl Into<String>,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> UsageEntry {
        UsageEntry {
            module_name: module_name.into(),
            model: Some(model.to_string()),
            input_tokens,
            output_tokens,
            total_points: self.points(model, input_tokens, output_tokens),
        }
    }
}

pub fn total_points(entries: &[UsageEntry]) -> f64 {
    entries.iter().map(|e| e.total_points).sum()
}
