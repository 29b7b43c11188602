use secrecy::ExposeSecret;
use tillbot_core::config::{AppConfig, LoadOptions};
use tillbot_core::{DenominationCatalog, DeterministicQuoteRuntime, FixedRatePricingEngine};

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_SETUP};

/// Preflight: config validates and the pass catalog fits the pricing rates.
pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            let message = error.to_string();
            return CommandResult::failure("start", "config_validation", message, EXIT_CONFIG);
        }
    };

    let pricing = match FixedRatePricingEngine::new(config.pricing.rates()) {
        Ok(pricing) => pricing,
        Err(error) => {
            return CommandResult::failure("start", "pricing_setup", error.to_string(), EXIT_SETUP)
        }
    };
    if let Err(error) = DeterministicQuoteRuntime::new(
        pricing,
        DenominationCatalog::default(),
        config.pricing.max_quantity,
    ) {
        return CommandResult::failure("start", "allocation_setup", error.to_string(), EXIT_SETUP);
    }

    let transport = if config.chat.bot_token.is_some() { "gateway" } else { "noop" };
    let assistant = if config.llm.is_enabled() { "enabled" } else { "disabled" };
    let admin = match &config.server.admin_secret {
        Some(secret) if !secret.expose_secret().is_empty() => "enabled",
        _ => "locked",
    };

    CommandResult::success(
        "start",
        format!(
            "preflight passed: transport={transport}, assistant={assistant}, admin={admin}, \
             listen={}:{}",
            config.server.bind_address, config.server.port
        ),
    )
}
