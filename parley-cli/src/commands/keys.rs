//! Key pool inspection.

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use parley_models::keys::env_var_for_provider;

use crate::config::ParleyConfig;
use crate::runtime::Runtime;

#[derive(Args, Debug)]
pub struct KeysArgs {
    /// Only inspect this provider
    pub provider: Option<String>,
}

pub fn run(args: KeysArgs, config: ParleyConfig) -> Result<()> {
    let runtime = Runtime::build(&config)?;

    let providers = match &args.provider {
        Some(provider) => vec![provider.clone()],
        None => runtime.registry.list_providers(),
    };
    for provider in &providers {
        runtime.keys.load_from_environment(provider);
    }

    let loaded = runtime.keys.providers();
    if loaded.is_empty() {
        println!("No API keys found.");
        println!();
        println!(
            "Set {} (comma-separated for several keys).",
            env_var_for_provider(args.provider.as_deref().unwrap_or("openai"))
        );
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Provider").fg(Color::Cyan),
        Cell::new("Key").fg(Color::Cyan),
        Cell::new("Uses").fg(Color::Cyan),
    ]);

    for provider in loaded {
        let mut counts: Vec<(String, u64)> =
            runtime.keys.get_usage_counts(&provider).into_iter().collect();
        counts.sort();
        for (key, uses) in counts {
            table.add_row(vec![
                Cell::new(&provider),
                Cell::new(mask_key(&key)),
                Cell::new(uses),
            ]);
        }
    }

    println!("{table}");
    Ok(())
}

/// Show only the first and last four characters of a key.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
