//! Provider listing.

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use parley_models::ProviderRegistry;

use crate::config::ParleyConfig;
use crate::runtime::Runtime;

#[derive(Args, Debug)]
pub struct ProvidersArgs {
    /// Only show providers using this adapter (openai, anthropic, google, openrouter)
    #[arg(long)]
    pub adapter: Option<String>,
}

pub fn run(args: ProvidersArgs, config: ParleyConfig) -> Result<()> {
    let runtime = Runtime::build(&config)?;
    let table = providers_table(&runtime.registry, args.adapter.as_deref())?;
    println!("{table}");
    Ok(())
}

fn providers_table(registry: &ProviderRegistry, adapter: Option<&str>) -> Result<Table> {
    let names = match adapter {
        Some(adapter) => registry.providers_of_kind(adapter.parse()?),
        None => registry.list_providers(),
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Provider").fg(Color::Cyan),
        Cell::new("Adapter").fg(Color::Cyan),
        Cell::new("Base URL").fg(Color::Cyan),
        Cell::new("Default model").fg(Color::Cyan),
    ]);

    for name in names {
        let Some(entry) = registry.get(&name) else {
            continue;
        };
        table.add_row(vec![
            Cell::new(&name),
            Cell::new(entry.kind.name()),
            Cell::new(entry.base_url.as_deref().unwrap_or("-")),
            Cell::new(entry.default_model().unwrap_or("-")),
        ]);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lists_builtin_providers() {
        let registry = ProviderRegistry::with_defaults();
        let rendered = providers_table(&registry, None).unwrap().to_string();
        assert!(rendered.contains("openai"));
        assert!(rendered.contains("anthropic"));
        assert!(rendered.contains("openrouter"));
    }

    #[test]
    fn test_adapter_filter() {
        let registry = ProviderRegistry::with_defaults();
        let rendered = providers_table(&registry, Some("google"))
            .unwrap()
            .to_string();
        assert!(rendered.contains("google"));
        assert!(!rendered.contains("anthropic"));
    }

    #[test]
    fn test_unknown_adapter_is_an_error() {
        let registry = ProviderRegistry::with_defaults();
        assert!(providers_table(&registry, Some("cohere")).is_err());
    }
}
