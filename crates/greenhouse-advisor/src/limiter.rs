use std::collections::HashMap;

use greenhouse_common::{Reading, SensorType};
use greenhouse_config::AdviceConfig;
use tracing::info;

use crate::prompt;

/// Halving stops once the selection is this small.
const HALVING_FLOOR: usize = 10;

/// Budgets for the reading selection. Heuristic, so configurable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    pub max_readings: usize,
    pub max_prompt_tokens: usize,
    pub tokens_per_char: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_readings: 10,
            max_prompt_tokens: 2000,
            tokens_per_char: 0.25,
        }
    }
}

impl From<&AdviceConfig> for LimiterConfig {
    fn from(config: &AdviceConfig) -> Self {
        Self {
            max_readings: config.max_readings,
            max_prompt_tokens: config.max_prompt_tokens,
            tokens_per_char: config.tokens_per_char,
        }
    }
}

/// Linear token estimate: `ceil(len(prompt) * tokens_per_char)`.
pub fn estimate_tokens(prompt: &str, tokens_per_char: f64) -> usize {
    (prompt.len() as f64 * tokens_per_char).ceil() as usize
}

/// Picks a bounded, representative subset of readings for the prompt.
///
/// Every sensor type present gets a fair share of the `max_readings` slots
/// (at least one while room allows), the most recent readings win, and the
/// result is ordered most-recent-first. If the rendered prompt still exceeds
/// the token budget the selection is thinned by keeping every other reading.
/// The limiter never rejects input; an oversized set only loses detail.
#[derive(Debug, Clone, Default)]
pub struct ReadingLimiter {
    config: LimiterConfig,
}

impl ReadingLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn limit(&self, mut readings: Vec<Reading>) -> Vec<Reading> {
        if readings.is_empty() {
            return readings;
        }

        // Stable, so equal timestamps keep fetch order.
        readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let groups = group_by_sensor(readings);
        let per_sensor = (self.config.max_readings / groups.len()).max(1);

        let mut selection: Vec<Reading> = groups
            .into_iter()
            .flat_map(|(_, group)| group.into_iter().take(per_sensor))
            .collect();
        selection.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        selection.truncate(self.config.max_readings);

        let original_count = selection.len();
        let mut estimated = self.estimate(&selection);
        while estimated > self.config.max_prompt_tokens && selection.len() > HALVING_FLOOR {
            selection = selection.into_iter().step_by(2).collect();
            estimated = self.estimate(&selection);
        }

        if selection.len() < original_count {
            info!(
                from = original_count,
                to = selection.len(),
                estimated_tokens = estimated,
                "reduced readings to fit token budget"
            );
        }

        selection
    }

    fn estimate(&self, selection: &[Reading]) -> usize {
        estimate_tokens(&prompt::build("test", selection), self.config.tokens_per_char)
    }
}

/// Partition readings by sensor type. Groups come out in order of first
/// appearance and each keeps the input order.
fn group_by_sensor(readings: Vec<Reading>) -> Vec<(SensorType, Vec<Reading>)> {
    let mut index: HashMap<SensorType, usize> = HashMap::new();
    let mut groups: Vec<(SensorType, Vec<Reading>)> = Vec::new();

    for reading in readings {
        match index.get(&reading.sensor_type) {
            Some(&i) => groups[i].1.push(reading),
            None => {
                index.insert(reading.sensor_type.clone(), groups.len());
                groups.push((reading.sensor_type.clone(), vec![reading]));
            }
        }
    }

    groups
}
