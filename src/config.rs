//! Environment configuration
//!
//! Every knob has a default except the Gemini API key. Binaries call
//! `dotenv::dotenv().ok()` before `Settings::from_env()`.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::OrchestrationError;
use crate::Result;

pub const DEFAULT_BANKING_BASE_URL: &str = "http://localhost:8080/api/v1/bank-ia";

#[derive(Debug, Clone)]
pub struct Settings {
    pub gemini: GeminiSettings,
    pub gateway: GatewaySettings,
    pub session: SessionSettings,
    pub pacing: PacingConfig,
    pub offers: OfferHeuristics,
    pub fast_path: FastPathConfig,
    pub cache_ttl: Duration,
    pub database_url: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub triage_model: String,
    pub specialist_model: String,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BANKING_BASE_URL.to_string(),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Window size in (human, ai) pairs
    pub max_turn_pairs: usize,
    pub ttl: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_turn_pairs: 5,
            ttl: Duration::from_secs(86_400),
        }
    }
}

/// Sleeps inserted to stay under the inference backend's requests-per-minute quota.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    pub before_second_call: Duration,
    pub before_option_choice: Duration,
    pub before_escalation: Duration,
    pub rate_limit_cooldown: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            before_second_call: Duration::from_millis(3_000),
            before_option_choice: Duration::from_millis(2_000),
            before_escalation: Duration::from_millis(2_000),
            rate_limit_cooldown: Duration::from_millis(15_000),
        }
    }
}

impl PacingConfig {
    pub fn none() -> Self {
        Self {
            before_second_call: Duration::ZERO,
            before_option_choice: Duration::ZERO,
            before_escalation: Duration::ZERO,
            rate_limit_cooldown: Duration::ZERO,
        }
    }
}

/// Thresholds behind the trade-off notes rendered next to each refinance option.
#[derive(Debug, Clone)]
pub struct OfferHeuristics {
    /// Rates at or above this are flagged as "more total interest"
    pub high_rate_threshold: f64,
    /// Rates at or below this are flagged as "lower total cost"
    pub low_rate_threshold: f64,
    /// Quota counts at or above this are flagged as "lower monthly payment"
    pub long_term_quotas: u32,
}

impl Default for OfferHeuristics {
    fn default() -> Self {
        Self {
            high_rate_threshold: 85.0,
            low_rate_threshold: 60.0,
            long_term_quotas: 48,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FastPathConfig {
    /// Messages longer than this with a loan keyword skip triage classification
    pub refinance_intent_min_len: usize,
}

impl Default for FastPathConfig {
    fn default() -> Self {
        Self {
            refinance_intent_min_len: 50,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults_pacing = PacingConfig::default();
        let defaults_offers = OfferHeuristics::default();

        Ok(Self {
            gemini: GeminiSettings {
                api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
                triage_model: env_or("GEMINI_TRIAGE_MODEL", "gemini-2.0-flash-lite"),
                specialist_model: env_or("GEMINI_SPECIALIST_MODEL", "gemini-2.0-flash"),
            },
            gateway: GatewaySettings {
                base_url: env_or("BANKING_API_BASE_URL", DEFAULT_BANKING_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                read_timeout: Duration::from_secs(parse_env("BANKING_READ_TIMEOUT_SECS", 5)?),
                write_timeout: Duration::from_secs(parse_env("BANKING_WRITE_TIMEOUT_SECS", 10)?),
            },
            session: SessionSettings {
                max_turn_pairs: parse_env("SESSION_MAX_TURN_PAIRS", 5)?,
                ttl: Duration::from_secs(parse_env("SESSION_TTL_SECS", 86_400)?),
            },
            pacing: PacingConfig {
                before_second_call: millis_env("PACING_SECOND_CALL_MS", defaults_pacing.before_second_call)?,
                before_option_choice: millis_env("PACING_OPTION_CHOICE_MS", defaults_pacing.before_option_choice)?,
                before_escalation: millis_env("PACING_ESCALATION_MS", defaults_pacing.before_escalation)?,
                rate_limit_cooldown: millis_env("RATE_LIMIT_COOLDOWN_MS", defaults_pacing.rate_limit_cooldown)?,
            },
            offers: OfferHeuristics {
                high_rate_threshold: parse_env("OFFER_HIGH_RATE_THRESHOLD", defaults_offers.high_rate_threshold)?,
                low_rate_threshold: parse_env("OFFER_LOW_RATE_THRESHOLD", defaults_offers.low_rate_threshold)?,
                long_term_quotas: parse_env("OFFER_LONG_TERM_QUOTAS", defaults_offers.long_term_quotas)?,
            },
            fast_path: FastPathConfig {
                refinance_intent_min_len: parse_env("REFINANCE_INTENT_MIN_LEN", 50)?,
            },
            cache_ttl: Duration::from_secs(parse_env("RESPONSE_CACHE_TTL_SECS", 300)?),
            database_url: env::var("DATABASE_URL")
                .or_else(|_| env::var("POSTGRES_URL"))
                .ok()
                .filter(|v| !v.trim().is_empty()),
            port: env::var("PORT")
                .or_else(|_| env::var("API_PORT"))
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|e| OrchestrationError::Config(format!("PORT: {}", e)))?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| OrchestrationError::Config(format!("{}: {}", key, e))),
        _ => Ok(default),
    }
}

fn millis_env(key: &str, default: Duration) -> Result<Duration> {
    let ms: u64 = parse_env(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}
