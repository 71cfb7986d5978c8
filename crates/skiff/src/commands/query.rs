//! Query command - runs a templated query and prints the mapped rows.

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use skiff_datalog::{
    DatalogClient, PRODUCTION_ENDPOINT, Params, QueryMode, QueryOptions, QueryResult,
    STAGING_ENDPOINT, Value,
};

use super::{Context, print_json};

/// Arguments for the query command.
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Query template text
    #[arg(required_unless_present = "file")]
    pub query: Option<String>,

    /// Read the query template from a file
    #[arg(short, long, conflicts_with = "query")]
    pub file: Option<PathBuf>,

    /// Template parameter as name=value (repeatable)
    #[arg(short = 'P', long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Workspace to query
    #[arg(short, long, env = "SKIFF_WORKSPACE_ID")]
    pub workspace: String,

    /// API key for the query endpoint
    #[arg(long, env = "SKIFF_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Query endpoint (overrides config)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Lower bound of the transaction range
    #[arg(long)]
    pub tx: Option<i64>,

    /// Print the response text without mapping it
    #[arg(long)]
    pub raw: bool,
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{s}'")),
    }
}

/// Integers and booleans keep their type; everything else is a string.
fn param_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    match raw {
        "true" => Value::from(true),
        "false" => Value::from(false),
        _ => Value::from(raw),
    }
}

/// Run the query command.
pub async fn run(args: QueryArgs, ctx: &Context) -> Result<()> {
    let template = match (&args.query, &args.file) {
        (Some(query), _) => query.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read query from {}", path.display()))?,
        (None, None) => bail!("A query or --file is required"),
    };

    let datalog = ctx.loaded.config.datalog();
    let endpoint = match (args.endpoint.clone(), datalog.endpoint.clone()) {
        (Some(endpoint), _) | (None, Some(endpoint)) => endpoint,
        (None, None) if datalog.staging => STAGING_ENDPOINT.to_string(),
        (None, None) => PRODUCTION_ENDPOINT.to_string(),
    };

    let client = DatalogClient::builder()
        .endpoint(endpoint)
        .workspace_id(&args.workspace)
        .api_key(&args.api_key)
        .timeout(datalog.timeout())
        .build()?;

    let params: Params = args
        .params
        .iter()
        .map(|(name, value)| (name.clone(), param_value(value)))
        .collect();

    let mut options = QueryOptions::new();
    if let Some(tx) = args.tx {
        options = options.tx(tx);
    }
    if args.raw {
        options = options.mode(QueryMode::Raw);
    }

    tracing::debug!(url = %client.url(), "Running query");
    match client.query(&template, &params, options).await? {
        QueryResult::Raw(text) => println!("{text}"),
        result => print_json(&result.to_json(), ctx)?,
    }
    Ok(())
}
