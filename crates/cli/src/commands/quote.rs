use clap::ValueEnum;
use serde::Serialize;
use tillbot_core::config::{AppConfig, LoadOptions};
use tillbot_core::cpq::allocation::LineSummary;
use tillbot_core::{
    parse_amount, DenominationCatalog, DeterministicQuoteRuntime, FixedRatePricingEngine,
    QuoteRuntime,
};

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_SETUP, EXIT_UNRESOLVED};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Cash,
    Points,
}

#[derive(Debug, Serialize)]
struct QuoteOutput {
    command: &'static str,
    status: &'static str,
    desired_quantity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cash: Option<CashOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    points: Option<PointsOutput>,
}

#[derive(Debug, Serialize)]
struct CashOutput {
    total: String,
}

#[derive(Debug, Serialize)]
struct PointsOutput {
    total: u64,
    label: String,
    adjusted_quantity: u64,
    adjusted: bool,
    passes: Vec<LineSummary>,
}

pub fn run(amount: &str, method: Option<MethodArg>) -> CommandResult {
    run_with(amount, method, LoadOptions::default())
}

pub fn run_with(amount: &str, method: Option<MethodArg>, options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            let message = error.to_string();
            return CommandResult::failure("quote", "config_validation", message, EXIT_CONFIG);
        }
    };
    let runtime = match FixedRatePricingEngine::new(config.pricing.rates())
        .map_err(|error| error.to_string())
        .and_then(|pricing| {
            DeterministicQuoteRuntime::new(
                pricing,
                DenominationCatalog::default(),
                config.pricing.max_quantity,
            )
            .map_err(|error| error.to_string())
        }) {
        Ok(runtime) => runtime,
        Err(message) => {
            return CommandResult::failure("quote", "pricing_setup", message, EXIT_SETUP);
        }
    };

    let Some(parsed) = parse_amount(amount) else {
        return CommandResult::failure(
            "quote",
            "amount_unresolved",
            format!("could not read an amount from `{amount}`"),
            EXIT_UNRESOLVED,
        );
    };
    let desired_quantity = parsed.clamp_to(runtime.max_quantity());

    let cash = (method != Some(MethodArg::Points))
        .then(|| CashOutput { total: runtime.cash_quote(desired_quantity).display_total() });

    let points = if method != Some(MethodArg::Cash) {
        match runtime.points_quote(desired_quantity) {
            Ok(quote) => Some(PointsOutput {
                total: quote.total_points(),
                label: config.pricing.points_label.clone(),
                adjusted_quantity: quote.quantity(),
                adjusted: quote.plan.adjusted(),
                passes: quote.plan.summary(),
            }),
            Err(error) => {
                return CommandResult::failure("quote", "allocation", error.to_string(), EXIT_SETUP)
            }
        }
    } else {
        None
    };

    CommandResult::json(
        0,
        &QuoteOutput { command: "quote", status: "ok", desired_quantity, cash, points },
    )
}
