use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpq::pricing::PricingRates;
use crate::domain::conversation::HISTORY_LIMIT;

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["tillbot.toml", "config/tillbot.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub chat: ChatConfig,
    pub payments: PaymentsConfig,
    pub pricing: PricingConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub bot_token: Option<SecretString>,
    /// Parent category a channel must sit in for the bot to answer there.
    pub category_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    pub cashapp_link: Option<String>,
    pub paypal_link: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub cash_rate: Decimal,
    pub points_rate: Decimal,
    pub max_quantity: u64,
    pub points_label: String,
}

impl PricingConfig {
    pub fn rates(&self) -> PricingRates {
        PricingRates { cash_per_basis: self.cash_rate, points_per_basis: self.points_rate }
    }
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// History entries sent with each assistant request.
    pub history_limit: usize,
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Hosted providers need a key; a local ollama does not.
    pub fn is_enabled(&self) -> bool {
        match self.provider {
            LlmProvider::Groq | LlmProvider::OpenAi => self
                .api_key
                .as_ref()
                .map(|key| !key.expose_secret().trim().is_empty())
                .unwrap_or(false),
            LlmProvider::Ollama => true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub admin_secret: Option<SecretString>,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Groq,
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
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
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub chat_bot_token: Option<String>,
    pub chat_category_id: Option<String>,
    pub server_port: Option<u16>,
    pub admin_secret: Option<String>,
    pub max_quantity: Option<u64>,
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
            chat: ChatConfig { bot_token: None, category_id: None },
            payments: PaymentsConfig { cashapp_link: None, paypal_link: None },
            pricing: PricingConfig {
                cash_rate: Decimal::new(150, 2),
                points_rate: Decimal::from(150),
                max_quantity: 1_750_000,
                points_label: "Robux".to_string(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Groq,
                api_key: None,
                base_url: None,
                model: "llama-3.1-8b-instant".to_string(),
                timeout_secs: 20,
                history_limit: HISTORY_LIMIT,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 3000,
                admin_secret: None,
                graceful_shutdown_secs: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected groq|openai|ollama)"
            ))),
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
        if let Some(chat) = patch.chat {
            if let Some(bot_token_value) = chat.bot_token {
                self.chat.bot_token = Some(secret_value(bot_token_value));
            }
            if let Some(category_id) = chat.category_id {
                self.chat.category_id = Some(category_id);
            }
        }

        if let Some(payments) = patch.payments {
            if let Some(cashapp_link) = payments.cashapp_link {
                self.payments.cashapp_link = Some(cashapp_link);
            }
            if let Some(paypal_link) = payments.paypal_link {
                self.payments.paypal_link = Some(paypal_link);
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(cash_rate) = pricing.cash_rate {
                self.pricing.cash_rate = cash_rate;
            }
            if let Some(points_rate) = pricing.points_rate {
                self.pricing.points_rate = points_rate;
            }
            if let Some(max_quantity) = pricing.max_quantity {
                self.pricing.max_quantity = max_quantity;
            }
            if let Some(points_label) = pricing.points_label {
                self.pricing.points_label = points_label;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(history_limit) = llm.history_limit {
                self.llm.history_limit = history_limit;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(admin_secret_value) = server.admin_secret {
                self.server.admin_secret = Some(secret_value(admin_secret_value));
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
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TILLBOT_CHAT_BOT_TOKEN") {
            self.chat.bot_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("TILLBOT_CHAT_CATEGORY_ID") {
            self.chat.category_id = Some(value);
        }

        if let Some(value) = read_env("TILLBOT_PAYMENTS_CASHAPP_LINK") {
            self.payments.cashapp_link = Some(value);
        }
        if let Some(value) = read_env("TILLBOT_PAYMENTS_PAYPAL_LINK") {
            self.payments.paypal_link = Some(value);
        }

        if let Some(value) = read_env("TILLBOT_PRICING_CASH_RATE") {
            self.pricing.cash_rate = parse_decimal("TILLBOT_PRICING_CASH_RATE", &value)?;
        }
        if let Some(value) = read_env("TILLBOT_PRICING_POINTS_RATE") {
            self.pricing.points_rate = parse_decimal("TILLBOT_PRICING_POINTS_RATE", &value)?;
        }
        if let Some(value) = read_env("TILLBOT_PRICING_MAX_QUANTITY") {
            self.pricing.max_quantity = parse_u64("TILLBOT_PRICING_MAX_QUANTITY", &value)?;
        }
        if let Some(value) = read_env("TILLBOT_PRICING_POINTS_LABEL") {
            self.pricing.points_label = value;
        }

        if let Some(value) = read_env("TILLBOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("TILLBOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TILLBOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("TILLBOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("TILLBOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("TILLBOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TILLBOT_LLM_HISTORY_LIMIT") {
            self.llm.history_limit = parse_usize("TILLBOT_LLM_HISTORY_LIMIT", &value)?;
        }

        if let Some(value) = read_env("TILLBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TILLBOT_SERVER_PORT") {
            self.server.port = parse_u16("TILLBOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TILLBOT_SERVER_ADMIN_SECRET") {
            self.server.admin_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("TILLBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TILLBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("TILLBOT_LOGGING_LEVEL").or_else(|| read_env("TILLBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TILLBOT_LOGGING_FORMAT").or_else(|| read_env("TILLBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(chat_bot_token) = overrides.chat_bot_token {
            self.chat.bot_token = Some(secret_value(chat_bot_token));
        }
        if let Some(chat_category_id) = overrides.chat_category_id {
            self.chat.category_id = Some(chat_category_id);
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(admin_secret) = overrides.admin_secret {
            self.server.admin_secret = Some(secret_value(admin_secret));
        }
        if let Some(max_quantity) = overrides.max_quantity {
            self.pricing.max_quantity = max_quantity;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_chat(&self.chat)?;
        validate_payments(&self.payments)?;
        validate_pricing(&self.pricing)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// First config file that exists, honouring an explicit path when given.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
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

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    let has_token = chat
        .bot_token
        .as_ref()
        .is_some_and(|token| !token.expose_secret().trim().is_empty());
    let has_category =
        chat.category_id.as_ref().map(|id| !id.trim().is_empty()).unwrap_or(false);

    if has_token && !has_category {
        return Err(ConfigError::Validation(
            "chat.category_id is required when chat.bot_token is set; use the id of the \
             ticket category whose channels the bot should answer in"
                .to_string(),
        ));
    }

    if let Some(category_id) = &chat.category_id {
        if !category_id.trim().chars().all(|character| character.is_ascii_digit()) {
            return Err(ConfigError::Validation(format!(
                "chat.category_id must be a numeric channel id, got `{category_id}`"
            )));
        }
    }

    Ok(())
}

fn validate_payments(payments: &PaymentsConfig) -> Result<(), ConfigError> {
    let links = [
        ("payments.cashapp_link", &payments.cashapp_link),
        ("payments.paypal_link", &payments.paypal_link),
    ];
    for (key, link) in links {
        if let Some(link) = link {
            if !link.starts_with("http://") && !link.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{key} must start with http:// or https://"
                )));
            }
        }
    }
    Ok(())
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.cash_rate <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "pricing.cash_rate must be greater than zero".to_string(),
        ));
    }
    if pricing.points_rate <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "pricing.points_rate must be greater than zero".to_string(),
        ));
    }
    if pricing.max_quantity == 0 {
        return Err(ConfigError::Validation(
            "pricing.max_quantity must be greater than zero".to_string(),
        ));
    }
    if pricing.points_label.trim().is_empty() {
        return Err(ConfigError::Validation("pricing.points_label must not be empty".to_string()));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.history_limit == 0 || llm.history_limit > HISTORY_LIMIT {
        return Err(ConfigError::Validation(format!(
            "llm.history_limit must be in range 1..={HISTORY_LIMIT}"
        )));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if let Some(secret) = &server.admin_secret {
        if secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.admin_secret must not be blank; unset it to disable the admin panel"
                    .to_string(),
            ));
        }
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    chat: Option<ChatPatch>,
    payments: Option<PaymentsPatch>,
    pricing: Option<PricingPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    bot_token: Option<String>,
    category_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentsPatch {
    cashapp_link: Option<String>,
    paypal_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    cash_rate: Option<Decimal>,
    points_rate: Option<Decimal>,
    max_quantity: Option<u64>,
    points_label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    history_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    admin_secret: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
