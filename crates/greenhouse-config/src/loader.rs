use std::path::{Path, PathBuf};

use greenhouse_common::{Error, Result};
use tracing::{info, warn};

use crate::model::AppConfig;

const DEFAULT_CONFIG_FILE: &str = "greenhouse.yaml";

pub const MAX_LOOKBACK_SECS: u64 = 365 * 24 * 60 * 60;
pub const MAX_DEADLINE_SECS: u64 = 60 * 60;
pub const MAX_TOKEN_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Loads [`AppConfig`] from defaults, an optional YAML file and the environment.
///
/// Precedence, lowest first: built-in defaults, the YAML file, variables from
/// `.env`, then real environment variables.
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<AppConfig> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("failed to read .env file: {}", e);
            }
        }

        let mut config = match &self.path {
            Some(path) => Self::read_file(path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::read_file(fallback)?
                } else {
                    AppConfig::default()
                }
            }
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        validate(&config)?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<AppConfig> {
        info!("loading config from {}", path.display());
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }
}

/// Apply environment overrides using `lookup` to resolve variable names.
pub fn apply_env_overrides(
    config: &mut AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
        config.llm.api_key = Some(key);
    }
    if let Some(url) = lookup("OPENAI_BASE_URL").filter(|u| !u.is_empty()) {
        config.llm.base_url = Some(url);
    }
    if let Some(model) = lookup("GREENHOUSE_LLM_MODEL").filter(|m| !m.is_empty()) {
        config.llm.model = model;
    }
    if let Some(port) = lookup("GREENHOUSE_PORT") {
        config.gateway.port = port
            .parse()
            .map_err(|e| Error::Config(format!("invalid GREENHOUSE_PORT {port:?}: {e}")))?;
    }
    if let Some(path) = lookup("GREENHOUSE_DB_PATH").filter(|p| !p.is_empty()) {
        config.database.path = PathBuf::from(path);
    }
    if let Some(secret) = lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
        config.auth.jwt_secret = Some(secret);
    }
    Ok(())
}

pub fn validate(config: &AppConfig) -> Result<()> {
    if config.gateway.port == 0 {
        return Err(Error::Config("gateway.port must be non-zero".into()));
    }
    let advice = &config.advice;
    if advice.max_readings == 0 {
        return Err(Error::Config("advice.max_readings must be positive".into()));
    }
    if advice.max_prompt_tokens == 0 {
        return Err(Error::Config("advice.max_prompt_tokens must be positive".into()));
    }
    if !(advice.tokens_per_char > 0.0) {
        return Err(Error::Config("advice.tokens_per_char must be positive".into()));
    }
    if advice.relay_chunk_size == 0 || advice.conduit_capacity == 0 {
        return Err(Error::Config(
            "advice.relay_chunk_size and advice.conduit_capacity must be positive".into(),
        ));
    }
    if advice.deadline_secs == 0 || advice.deadline_secs > MAX_DEADLINE_SECS {
        return Err(Error::Config(format!(
            "advice.deadline_secs must be between 1 and {MAX_DEADLINE_SECS}"
        )));
    }
    if advice.lookback_secs > MAX_LOOKBACK_SECS {
        return Err(Error::Config(format!(
            "advice.lookback_secs must be at most {MAX_LOOKBACK_SECS}"
        )));
    }
    let auth = &config.auth;
    if auth.token_ttl_secs == 0 || auth.token_ttl_secs > MAX_TOKEN_TTL_SECS {
        return Err(Error::Config(format!(
            "auth.token_ttl_secs must be between 1 and {MAX_TOKEN_TTL_SECS}"
        )));
    }
    if !(4..=31).contains(&auth.bcrypt_cost) {
        return Err(Error::Config("auth.bcrypt_cost must be between 4 and 31".into()));
    }
    if auth.jwt_secret.as_deref().is_some_and(str::is_empty) {
        return Err(Error::Config("auth.jwt_secret must not be empty".into()));
    }
    Ok(())
}
