//! Runtime configuration.
//!
//! Configuration arrives as a flat string map (environment, `.env`, CLI flags)
//! and is validated once into a [`Config`]. Nothing below the binary reads
//! process-wide state; the pipeline receives the `Config` at construction.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::commit::prompt::{StyleOptions, Tone};
use crate::error::ConfigError;
use crate::llm::retry::RetryPolicy;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MAX_DIFF_BYTES: usize = 30_000;
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 40_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TARGET_LANGUAGE: &str = "English";
pub const DEFAULT_MAX_SUBJECT_LENGTH: usize = 72;
pub const DEFAULT_CANDIDATE_COUNT: usize = 3;
pub const DEFAULT_EMPTY_RETRIES: u32 = 1;

const MIN_PROMPT_CHARS: usize = 2_000;
const MIN_SUBJECT_LENGTH: usize = 10;
const MAX_CANDIDATE_COUNT: usize = 10;

/// Environment variable holding the API key.
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Prefix for every other environment override (`COMMI_MAX_RETRIES`, ...).
pub const ENV_PREFIX: &str = "COMMI_";

/// Keys recognized in the flat configuration map.
pub const KNOWN_KEYS: &[&str] = &[
    "api_key",
    "model",
    "endpoint",
    "max_diff_bytes",
    "max_prompt_chars",
    "max_retries",
    "timeout_seconds",
    "target_language",
    "max_subject_length",
    "candidate_count",
    "empty_retries",
    "tone",
    "conventional",
    "verbose",
];

/// The API secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Validated configuration for one pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub model: String,
    pub endpoint: String,
    pub max_diff_bytes: usize,
    pub max_prompt_chars: usize,
    /// Total attempts per generation request, including the first.
    pub max_retries: u32,
    pub timeout: Duration,
    pub target_language: String,
    pub max_subject_length: usize,
    pub candidate_count: usize,
    /// Re-sends allowed when a response yields no usable candidate.
    pub empty_retries: u32,
    pub tone: Tone,
    /// Ask for Conventional Commits prefixes.
    pub conventional: bool,
    /// Log prompt and response bodies.
    pub verbose: bool,
}

impl Config {
    /// Configuration with defaults for everything but the key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(api_key),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_diff_bytes: DEFAULT_MAX_DIFF_BYTES,
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            target_language: DEFAULT_TARGET_LANGUAGE.to_string(),
            max_subject_length: DEFAULT_MAX_SUBJECT_LENGTH,
            candidate_count: DEFAULT_CANDIDATE_COUNT,
            empty_retries: DEFAULT_EMPTY_RETRIES,
            tone: Tone::default(),
            conventional: false,
            verbose: false,
        }
    }

    /// Parse and validate a flat key/value map.
    ///
    /// Unknown keys are ignored. Empty values count as unset.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        for key in map.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!("Ignoring unknown configuration key '{key}'");
            }
        }

        let get = |key: &str| map.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let api_key = get("api_key").ok_or(ConfigError::MissingApiKey)?;
        let mut config = Config::new(api_key);

        if let Some(model) = get("model") {
            config.model = validate_model_name(model);
        }
        if let Some(endpoint) = get("endpoint") {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(invalid("endpoint", endpoint, "must be an http(s) URL"));
            }
            config.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("max_diff_bytes") {
            config.max_diff_bytes = parse_at_least("max_diff_bytes", v, 1)?;
        }
        if let Some(v) = get("max_prompt_chars") {
            config.max_prompt_chars = parse_at_least("max_prompt_chars", v, MIN_PROMPT_CHARS)?;
        }
        if let Some(v) = get("max_retries") {
            config.max_retries = parse_at_least("max_retries", v, 1u32)?;
        }
        if let Some(v) = get("timeout_seconds") {
            config.timeout = Duration::from_secs(parse_at_least("timeout_seconds", v, 1u64)?);
        }
        if let Some(v) = get("target_language") {
            config.target_language = v.to_string();
        }
        if let Some(v) = get("max_subject_length") {
            config.max_subject_length =
                parse_at_least("max_subject_length", v, MIN_SUBJECT_LENGTH)?;
        }
        if let Some(v) = get("candidate_count") {
            let count: usize = parse_at_least("candidate_count", v, 1)?;
            if count > MAX_CANDIDATE_COUNT {
                return Err(invalid(
                    "candidate_count",
                    v,
                    &format!("must be at most {MAX_CANDIDATE_COUNT}"),
                ));
            }
            config.candidate_count = count;
        }
        if let Some(v) = get("empty_retries") {
            config.empty_retries = parse_at_least("empty_retries", v, 0u32)?;
        }
        if let Some(v) = get("tone") {
            config.tone = parse_tone(v)?;
        }
        if let Some(v) = get("conventional") {
            config.conventional = parse_bool("conventional", v)?;
        }
        if let Some(v) = get("verbose") {
            config.verbose = parse_bool("verbose", v)?;
        }

        Ok(config)
    }

    /// Style options derived from this configuration.
    pub fn style(&self) -> StyleOptions {
        StyleOptions {
            max_subject_length: self.max_subject_length,
            target_language: self.target_language.clone(),
            candidate_count: self.candidate_count,
            tone: self.tone,
            conventional: self.conventional,
        }
    }

    /// Retry policy for the generation client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

/// Collect configuration overrides from the process environment.
///
/// Reads `GEMINI_API_KEY` for the key and `COMMI_<KEY>` for every other
/// known key. Only the binary calls this.
pub fn env_overrides() -> HashMap<String, String> {
    let mut map = HashMap::new();

    if let Ok(key) = env::var(API_KEY_ENV_VAR) {
        map.insert("api_key".to_string(), key);
    }

    for key in KNOWN_KEYS {
        let var = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
        if let Ok(value) = env::var(&var) {
            map.insert((*key).to_string(), value);
        }
    }

    map
}

/// Accept Gemini model names; anything else falls back to the default.
pub fn validate_model_name(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("gemini-") && model.len() > "gemini-".len() {
        model.to_string()
    } else {
        warn!("Unknown model '{model}', using default {DEFAULT_MODEL}");
        DEFAULT_MODEL.to_string()
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_at_least<T>(key: &str, value: &str, min: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display + Copy,
{
    let parsed: T = value
        .parse()
        .map_err(|_| invalid(key, value, "expected a non-negative integer"))?;
    if parsed < min {
        return Err(invalid(key, value, &format!("must be at least {min}")));
    }
    Ok(parsed)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}

fn parse_tone(value: &str) -> Result<Tone, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "neutral" => Ok(Tone::Neutral),
        "concise" => Ok(Tone::Concise),
        "detailed" => Ok(Tone::Detailed),
        _ => Err(invalid("tone", value, "expected neutral, concise or detailed")),
    }
}
