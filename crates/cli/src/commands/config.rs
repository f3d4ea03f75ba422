use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use enquote_core::config::{AppConfig, DEFAULT_CONFIG_FILES};
use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_key) in effective_values(&config) {
        let source =
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    vec![
        ("database.url", config.database.url.clone(), "ENQUOTE_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "ENQUOTE_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "ENQUOTE_DATABASE_TIMEOUT_SECS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "ENQUOTE_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "ENQUOTE_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "ENQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "ENQUOTE_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "ENQUOTE_LOGGING_FORMAT"),
        (
            "pricing.retail_markup_pct",
            config.pricing.retail_markup_pct.to_string(),
            "ENQUOTE_PRICING_RETAIL_MARKUP_PCT",
        ),
        (
            "pricing.wholesale_markup_pct",
            config.pricing.wholesale_markup_pct.to_string(),
            "ENQUOTE_PRICING_WHOLESALE_MARKUP_PCT",
        ),
        (
            "pricing.tax_rate_pct",
            config.pricing.tax_rate_pct.to_string(),
            "ENQUOTE_PRICING_TAX_RATE_PCT",
        ),
        (
            "pricing.currency_scale",
            config.pricing.currency_scale.to_string(),
            "ENQUOTE_PRICING_CURRENCY_SCALE",
        ),
        (
            "quotation.number_prefix",
            config.quotation.number_prefix.clone(),
            "ENQUOTE_QUOTATION_NUMBER_PREFIX",
        ),
        (
            "quotation.validity_days",
            config.quotation.validity_days.to_string(),
            "ENQUOTE_QUOTATION_VALIDITY_DAYS",
        ),
        (
            "quotation.default_terms",
            config.quotation.default_terms.clone().unwrap_or_else(|| "<unset>".to_string()),
            "ENQUOTE_QUOTATION_DEFAULT_TERMS",
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn file_keys_are_attributed_to_the_file() {
        let doc: Value = "[pricing]\ntax_rate_pct = \"7.5\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "pricing.tax_rate_pct"));
        assert!(!contains_path(&doc, "pricing.currency_scale"));
        assert_eq!(
            field_source(
                "pricing.tax_rate_pct",
                "ENQUOTE_TEST_UNSET_VARIABLE",
                Some(&doc),
                Some(Path::new("enquote.toml"))
            ),
            "file (enquote.toml)"
        );
        assert_eq!(
            field_source(
                "quotation.validity_days",
                "ENQUOTE_TEST_UNSET_VARIABLE",
                Some(&doc),
                None
            ),
            "default"
        );
    }
}
