//! One-shot model build
//!
//! Usage: forge_build <part> [name=value ...] [-o <file>]
//!
//! Values parse as booleans (`true`/`false`), then numbers, otherwise text.
//! Wrap a value in double quotes to force text. Writes the model to stdout
//! unless `-o` is given.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use goews_forge::build::{ParamValue, Part};
use goews_forge::config::ForgeConfig;

struct Invocation {
    part: Part,
    params: Vec<(String, ParamValue)>,
    output: Option<PathBuf>,
}

fn parse_value(raw: &str) -> ParamValue {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return ParamValue::Text(raw[1..raw.len() - 1].to_string());
    }
    match raw {
        "true" => ParamValue::Bool(true),
        "false" => ParamValue::Bool(false),
        _ => raw
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(ParamValue::Number)
            .unwrap_or_else(|| ParamValue::Text(raw.to_string())),
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Invocation> {
    let mut args = args.into_iter();
    let part = match args.next() {
        Some(p) => p.parse::<Part>()?,
        None => bail!("usage: forge_build <part> [name=value ...] [-o <file>]"),
    };

    let mut params = Vec::new();
    let mut output = None;
    while let Some(arg) = args.next() {
        if arg == "-o" || arg == "--output" {
            output = Some(PathBuf::from(args.next().context("-o requires a file name")?));
            continue;
        }
        let (name, value) = arg
            .split_once('=')
            .with_context(|| format!("expected name=value, got '{}'", arg))?;
        params.push((name.to_string(), parse_value(value)));
    }

    Ok(Invocation { part, params, output })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    // Logs go to stderr so stdout stays clean for the model.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("goews_forge=warn")),
        )
        .init();

    let invocation = parse_args(std::env::args().skip(1))?;
    let config = ForgeConfig::from_env()?;
    let pipeline = config.build_pipeline();

    let artifact = pipeline
        .build(invocation.part, invocation.params)
        .await
        .map_err(|e| match e.diagnostics() {
            Some(diag) => anyhow::anyhow!("{}\n{}", e, diag.trim()),
            None => anyhow::anyhow!(e),
        })?;

    match invocation.output {
        Some(path) => {
            tokio::fs::write(&path, artifact.bytes())
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote {} bytes to {}", artifact.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(artifact.bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}
