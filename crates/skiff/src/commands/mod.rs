//! CLI command handlers.

pub mod config;
pub mod inspect;
pub mod query;
pub mod serve;

use skiff_config::LoadedConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Layered configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Print a JSON value, pretty unless `--json` asked for compact output.
pub fn print_json(value: &serde_json::Value, ctx: &Context) -> anyhow::Result<()> {
    let text = if ctx.json_output {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{text}");
    Ok(())
}
