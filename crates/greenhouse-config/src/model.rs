use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub advice: AdviceConfig,
    pub thresholds: ThresholdConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("greenhouse.db"),
        }
    }
}

/// Upstream chat completion endpoint (OpenAI-compatible).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub max_response_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: "gpt-3.5-turbo".to_string(),
            max_response_tokens: 1000,
        }
    }
}

// Hand-written so the key never lands in a log line.
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_response_tokens", &self.max_response_tokens)
            .finish()
    }
}

/// Token signing and password hashing for operator accounts.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret. When unset a random per-process secret is used,
    /// so issued tokens stop working after a restart.
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: u64,
    pub bcrypt_cost: u32,
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: 10 * 365 * 24 * 60 * 60,
            bcrypt_cost: 12,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

/// Tuning for the advice pipeline.
///
/// The reading/token budgets are empirically tuned heuristics, not proven
/// bounds, so they are exposed here instead of being baked in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdviceConfig {
    /// How far back readings are considered relevant.
    pub lookback_secs: u64,
    /// Deadline for the whole advice request (store call + upstream stream).
    pub deadline_secs: u64,
    pub max_readings: usize,
    pub max_prompt_tokens: usize,
    pub tokens_per_char: f64,
    /// Largest chunk the relay hands to the HTTP body in one flush.
    pub relay_chunk_size: usize,
    /// Number of pending writes the relay conduit buffers before the producer blocks.
    pub conduit_capacity: usize,
    pub default_plant: String,
}

impl AdviceConfig {
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl Default for AdviceConfig {
    fn default() -> Self {
        Self {
            lookback_secs: 6 * 60 * 60,
            deadline_secs: 60,
            max_readings: 10,
            max_prompt_tokens: 2000,
            tokens_per_char: 0.25,
            relay_chunk_size: 1024,
            conduit_capacity: 16,
            default_plant: "strawberry".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub light_min: i64,
    pub light_max: i64,
    pub soil_min: i64,
    pub soil_max: i64,
    pub temp_min: i64,
    pub temp_max: i64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            light_min: 100,
            light_max: 800,
            soil_min: 200,
            soil_max: 600,
            temp_min: 15,
            temp_max: 30,
        }
    }
}
