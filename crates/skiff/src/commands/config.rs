//! Config command - configuration inspection.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Show the user configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;

    println!("# skiff configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("# No config files loaded (using defaults)");
    } else {
        for path in sources {
            println!("# Loaded from {}", path.display());
        }
    }
    for var in &loaded.env_overrides {
        println!("# Overridden by ${var}");
    }
    println!();
    print!("{}", loaded.config.to_toml()?);
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    println!("Config files (lowest precedence first):");
    for source in &ctx.loaded.sources {
        let marker = if source.loaded { "loaded" } else { "missing" };
        println!("  [{marker}] {}", source.path.display());
    }
    for warning in &ctx.loaded.warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

fn cmd_path() -> Result<()> {
    match skiff_config::xdg_config_path() {
        Some(path) => println!("{}", path.display()),
        None => println!("(no config directory available)"),
    }
    Ok(())
}
