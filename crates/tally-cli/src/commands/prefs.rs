//! Preferences commands

use anyhow::Result;

use super::App;
use crate::cli::PrefsCommands;

pub fn run(app: &App, command: PrefsCommands) -> Result<()> {
    match command {
        PrefsCommands::Show => {
            let prefs = app.store.preferences();
            println!("default_currency:     {}", prefs.default_currency);
            println!("default_payment_mode: {}", prefs.default_payment_mode);
            println!("llm_enabled:          {}", prefs.llm_enabled);
            if prefs.custom_rates.is_empty() {
                println!("custom_rates:         none");
            } else {
                for (pair, rate) in &prefs.custom_rates {
                    println!("custom_rate:          {} = {}", pair, rate);
                }
            }
        }
        PrefsCommands::Currency { code } => {
            let code = code.to_uppercase();
            app.store
                .update_preferences(|p| p.default_currency = code.clone())?;
            println!("Default currency set to {}.", code);
            println!("Note: existing books keep the rates locked at their creation.");
        }
        PrefsCommands::Mode { mode } => {
            let mode = mode.parse().map_err(anyhow::Error::msg)?;
            app.store
                .update_preferences(|p| p.default_payment_mode = mode)?;
            println!("Fallback payment mode set to {}.", mode);
        }
        PrefsCommands::Llm { state } => {
            let enabled = state == "on";
            app.store.update_preferences(|p| p.llm_enabled = enabled)?;
            if enabled && !app.config.llm.enabled {
                println!(
                    "Preference saved, but no LLM is configured; enable it in the config file."
                );
            } else {
                println!("LLM step {}.", if enabled { "enabled" } else { "disabled" });
            }
        }
        PrefsCommands::Rate { from, to, rate } => {
            app.store.set_custom_rate(&from, &to, rate)?;
            println!(
                "Custom rate {} -> {} = {} recorded.",
                from.to_uppercase(),
                to.to_uppercase(),
                rate
            );
        }
    }
    Ok(())
}
