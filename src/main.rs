#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::{anyhow, Context, Result};
use socialrs::{
    pipeline::StepRegistry, settings::SocialSettings, utils::logging::LoggingHelper,
};

/// Validate the configuration without serving anything
///
/// Loads `Settings.toml` and the environment, checks that every pipeline
/// step resolves against the built-in steps and prints a summary.
fn main() -> Result<()> {
    // This also loads the .env file and initializes the logger
    let settings =
        SocialSettings::load().map_err(|e| anyhow!("Failed to load settings: {e}"))?;

    let registry = StepRegistry::with_defaults();
    LoggingHelper::log_step_registry_summary(&registry.addresses());

    registry
        .validate(&settings.pipeline.authentication)
        .context("Invalid authentication pipeline")?;
    registry
        .validate(&settings.pipeline.disconnect)
        .context("Invalid disconnect pipeline")?;

    print_summary(&settings);
    Ok(())
}

fn print_summary(settings: &SocialSettings) {
    println!("socialrs {} configuration OK", socialrs::VERSION);
    println!();
    println!("Authentication pipeline:");
    for (index, address) in settings.pipeline.authentication.iter().enumerate() {
        println!("  {index:>2}. {address}");
    }
    println!();
    println!("Disconnect pipeline:");
    for (index, address) in settings.pipeline.disconnect.iter().enumerate() {
        println!("  {index:>2}. {address}");
    }
    println!();
    println!("Enabled providers:");
    for provider in settings.get_enabled_providers() {
        let key = if provider.get_key().is_some() {
            "key set"
        } else {
            "no key"
        };
        println!(
            "  {} ({key}) - callback {}/complete/{}/",
            provider.name,
            settings.application.redirect_base_url.trim_end_matches('/'),
            provider.name
        );
    }
}
