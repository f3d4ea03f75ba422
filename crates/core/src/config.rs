use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpq::pricing::{MarkupTiers, PricingCalculator};

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["enquote.toml", "config/enquote.toml"];

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub pricing: PricingConfig,
    pub quotation: QuotationConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingConfig {
    pub retail_markup_pct: Decimal,
    pub wholesale_markup_pct: Decimal,
    pub tax_rate_pct: Decimal,
    pub currency_scale: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotationConfig {
    pub number_prefix: String,
    pub validity_days: i64,
    pub default_terms: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub port: Option<u16>,
    pub tax_rate_pct: Option<Decimal>,
    pub validity_days: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://enquote.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            pricing: PricingConfig {
                retail_markup_pct: Decimal::new(70, 0),
                wholesale_markup_pct: Decimal::new(40, 0),
                tax_rate_pct: Decimal::new(5, 0),
                currency_scale: 2,
            },
            quotation: QuotationConfig {
                number_prefix: "QT".to_string(),
                validity_days: 30,
                default_terms: Some(
                    "Prices valid for the stated validity period. Payment due within 30 days of invoice."
                        .to_string(),
                ),
            },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl PricingConfig {
    pub fn calculator(&self) -> PricingCalculator {
        PricingCalculator {
            markups: MarkupTiers {
                retail: self.retail_markup_pct,
                wholesale: self.wholesale_markup_pct,
            },
            tax_rate_percent: self.tax_rate_pct,
            currency_scale: self.currency_scale,
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(retail) = pricing.retail_markup_pct {
                self.pricing.retail_markup_pct = retail;
            }
            if let Some(wholesale) = pricing.wholesale_markup_pct {
                self.pricing.wholesale_markup_pct = wholesale;
            }
            if let Some(tax_rate) = pricing.tax_rate_pct {
                self.pricing.tax_rate_pct = tax_rate;
            }
            if let Some(scale) = pricing.currency_scale {
                self.pricing.currency_scale = scale;
            }
        }

        if let Some(quotation) = patch.quotation {
            if let Some(prefix) = quotation.number_prefix {
                self.quotation.number_prefix = prefix;
            }
            if let Some(validity_days) = quotation.validity_days {
                self.quotation.validity_days = validity_days;
            }
            if let Some(terms) = quotation.default_terms {
                self.quotation.default_terms = Some(terms).filter(|value| !value.trim().is_empty());
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ENQUOTE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ENQUOTE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("ENQUOTE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ENQUOTE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("ENQUOTE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ENQUOTE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("ENQUOTE_SERVER_PORT") {
            self.server.port = parse_env("ENQUOTE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("ENQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("ENQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("ENQUOTE_LOGGING_LEVEL").or_else(|| read_env("ENQUOTE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ENQUOTE_LOGGING_FORMAT").or_else(|| read_env("ENQUOTE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("ENQUOTE_PRICING_RETAIL_MARKUP_PCT") {
            self.pricing.retail_markup_pct =
                parse_env("ENQUOTE_PRICING_RETAIL_MARKUP_PCT", &value)?;
        }
        if let Some(value) = read_env("ENQUOTE_PRICING_WHOLESALE_MARKUP_PCT") {
            self.pricing.wholesale_markup_pct =
                parse_env("ENQUOTE_PRICING_WHOLESALE_MARKUP_PCT", &value)?;
        }
        if let Some(value) = read_env("ENQUOTE_PRICING_TAX_RATE_PCT") {
            self.pricing.tax_rate_pct = parse_env("ENQUOTE_PRICING_TAX_RATE_PCT", &value)?;
        }
        if let Some(value) = read_env("ENQUOTE_PRICING_CURRENCY_SCALE") {
            self.pricing.currency_scale = parse_env("ENQUOTE_PRICING_CURRENCY_SCALE", &value)?;
        }

        if let Some(value) = read_env("ENQUOTE_QUOTATION_NUMBER_PREFIX") {
            self.quotation.number_prefix = value;
        }
        if let Some(value) = read_env("ENQUOTE_QUOTATION_VALIDITY_DAYS") {
            self.quotation.validity_days = parse_env("ENQUOTE_QUOTATION_VALIDITY_DAYS", &value)?;
        }
        if let Some(value) = read_env("ENQUOTE_QUOTATION_DEFAULT_TERMS") {
            self.quotation.default_terms = Some(value);
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(tax_rate_pct) = overrides.tax_rate_pct {
            self.pricing.tax_rate_pct = tax_rate_pct;
        }
        if let Some(validity_days) = overrides.validity_days {
            self.quotation.validity_days = validity_days;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_pricing(&self.pricing)?;
        validate_quotation(&self.quotation)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.retail_markup_pct < Decimal::ZERO || pricing.wholesale_markup_pct < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "pricing.retail_markup_pct and pricing.wholesale_markup_pct must not be negative"
                .to_string(),
        ));
    }

    if pricing.tax_rate_pct < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "pricing.tax_rate_pct must not be negative".to_string(),
        ));
    }

    if pricing.currency_scale > 6 {
        return Err(ConfigError::Validation(
            "pricing.currency_scale must be in range 0..=6".to_string(),
        ));
    }

    Ok(())
}

fn validate_quotation(quotation: &QuotationConfig) -> Result<(), ConfigError> {
    let prefix = quotation.number_prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation(
            "quotation.number_prefix must be a non-empty alphanumeric string".to_string(),
        ));
    }

    if !(1..=365).contains(&quotation.validity_days) {
        return Err(ConfigError::Validation(
            "quotation.validity_days must be in range 1..=365".to_string(),
        ));
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    pricing: Option<PricingPatch>,
    quotation: Option<QuotationPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    retail_markup_pct: Option<Decimal>,
    wholesale_markup_pct: Option<Decimal>,
    tax_rate_pct: Option<Decimal>,
    currency_scale: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotationPatch {
    number_prefix: Option<String>,
    validity_days: Option<i64>,
    default_terms: Option<String>,
}
