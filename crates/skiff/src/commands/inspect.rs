//! Inspect command - decodes a payload the way the dispatcher would.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::json;
use skiff_runtime::{extract_configurations, trigger_data};
use skiff_types::IncomingPayload;

use super::{Context, print_json};

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Payload JSON file, or - for stdin
    pub path: PathBuf,
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Run the inspect command.
pub async fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    let text = read_input(&args.path)?;
    let payload = IncomingPayload::from_json(&text).context("Invalid payload")?;

    let (Some(kind), Some(name), Some(header)) = (payload.kind(), payload.name(), payload.header())
    else {
        bail!("Unrecognized payload type");
    };

    let configurations = extract_configurations(&header.skill, &header.workspace_id);
    let data = trigger_data(&payload);

    if ctx.json_output {
        return print_json(
            &json!({
                "kind": kind,
                "name": name,
                "workspace_id": header.workspace_id,
                "correlation_id": payload.correlation_id(),
                "skill": header.skill.qualified_name(),
                "configurations": configurations,
                "data": data,
            }),
            ctx,
        );
    }

    println!("Trigger:      {kind} '{name}'");
    println!("Workspace:    {}", header.workspace_id);
    println!("Correlation:  {}", payload.correlation_id().unwrap_or("-"));
    println!("Skill:        {}", header.skill.qualified_name());
    let names: Vec<&str> = configurations.iter().map(|c| c.name.as_str()).collect();
    if names.is_empty() {
        println!("Configs:      (none)");
    } else {
        println!("Configs:      {}", names.join(", "));
    }
    if ctx.verbose {
        println!("\nPayload (redacted):");
        println!("{}", serde_json::to_string_pretty(&payload.redacted())?);
    }
    println!("\nData:");
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}
