use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tillbot_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

struct Field {
    path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(
        path: &'static str,
        env_keys: &'static [&'static str],
        value: impl Into<String>,
    ) -> Self {
        Self { path, env_keys, value: value.into() }
    }
}

pub fn run() -> String {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> String {
    let file_path = resolve_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let file_doc = load_config_file_doc(file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(&field, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.path, field.value));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new(
            "chat.bot_token",
            &["TILLBOT_CHAT_BOT_TOKEN"],
            redact_secret(config.chat.bot_token.as_ref()),
        ),
        Field::new(
            "chat.category_id",
            &["TILLBOT_CHAT_CATEGORY_ID"],
            display_optional(config.chat.category_id.as_deref()),
        ),
        Field::new(
            "payments.cashapp_link",
            &["TILLBOT_PAYMENTS_CASHAPP_LINK"],
            display_optional(config.payments.cashapp_link.as_deref()),
        ),
        Field::new(
            "payments.paypal_link",
            &["TILLBOT_PAYMENTS_PAYPAL_LINK"],
            display_optional(config.payments.paypal_link.as_deref()),
        ),
        Field::new(
            "pricing.cash_rate",
            &["TILLBOT_PRICING_CASH_RATE"],
            config.pricing.cash_rate.to_string(),
        ),
        Field::new(
            "pricing.points_rate",
            &["TILLBOT_PRICING_POINTS_RATE"],
            config.pricing.points_rate.to_string(),
        ),
        Field::new(
            "pricing.max_quantity",
            &["TILLBOT_PRICING_MAX_QUANTITY"],
            config.pricing.max_quantity.to_string(),
        ),
        Field::new(
            "pricing.points_label",
            &["TILLBOT_PRICING_POINTS_LABEL"],
            config.pricing.points_label.clone(),
        ),
        Field::new("llm.provider", &["TILLBOT_LLM_PROVIDER"], format!("{:?}", config.llm.provider)),
        Field::new("llm.base_url", &["TILLBOT_LLM_BASE_URL"], config.llm.effective_base_url()),
        Field::new("llm.model", &["TILLBOT_LLM_MODEL"], config.llm.model.clone()),
        Field::new(
            "llm.api_key",
            &["TILLBOT_LLM_API_KEY"],
            redact_secret(config.llm.api_key.as_ref()),
        ),
        Field::new(
            "llm.timeout_secs",
            &["TILLBOT_LLM_TIMEOUT_SECS"],
            config.llm.timeout_secs.to_string(),
        ),
        Field::new(
            "llm.history_limit",
            &["TILLBOT_LLM_HISTORY_LIMIT"],
            config.llm.history_limit.to_string(),
        ),
        Field::new(
            "server.bind_address",
            &["TILLBOT_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        Field::new("server.port", &["TILLBOT_SERVER_PORT"], config.server.port.to_string()),
        Field::new(
            "server.admin_secret",
            &["TILLBOT_SERVER_ADMIN_SECRET"],
            redact_secret(config.server.admin_secret.as_ref()),
        ),
        Field::new(
            "server.graceful_shutdown_secs",
            &["TILLBOT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        Field::new(
            "logging.level",
            &["TILLBOT_LOGGING_LEVEL", "TILLBOT_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        Field::new(
            "logging.format",
            &["TILLBOT_LOGGING_FORMAT", "TILLBOT_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(field: &Field, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }
    if file_doc.is_some_and(|doc| contains_path(doc, field.path)) {
        let file_path = file_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("config file"));
        return format!("file ({})", file_path.display());
    }
    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}

fn display_optional(value: Option<&str>) -> String {
    value.map(str::to_owned).unwrap_or_else(|| "<unset>".to_string())
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim().is_empty()) {
        None => "<unset>".to_string(),
        Some(true) => "<empty>".to_string(),
        Some(false) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_their_value() {
        let secret = SecretString::from("panel-secret".to_owned());

        assert_eq!(redact_secret(Some(&secret)), "<redacted>");
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(redact_secret(Some(&SecretString::from("  ".to_owned()))), "<empty>");
    }

    #[test]
    fn nested_paths_are_found_in_the_file_document() {
        let doc: Value = "[pricing]\nmax_quantity = 10\n".parse().expect("toml");

        assert!(contains_path(&doc, "pricing.max_quantity"));
        assert!(!contains_path(&doc, "pricing.cash_rate"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
