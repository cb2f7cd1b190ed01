//! The probe run: launch a server, shake hands, print its capabilities.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use tether_session::{ServerSpec, SessionError, SessionManager, SessionOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config;

pub const USAGE: &str = "\
Usage: tether [OPTIONS] [COMMAND [ARGS...]]

Launch a language server, perform the initialization handshake, and print
the capabilities it declares as JSON.

Options:
  --config FILE    Load server specs from a TOML catalog
  --server NAME    Which catalog entry to launch (requires --config)
  --file PATH      File whose project context the server is started for
  -h, --help       Show this help

Logging goes to stderr; set RUST_LOG to adjust verbosity.

Examples:
  tether typescript-language-server --stdio
  tether --config servers.toml --server typescript --file src/main.ts
";

/// Parsed command line.
#[derive(Debug, Default)]
pub struct ProbeArgs {
    pub config: Option<PathBuf>,
    pub server: Option<String>,
    pub file: Option<PathBuf>,
    /// Print usage instead of running.
    pub help: bool,
    /// Positional server command with its arguments.
    pub command: Vec<String>,
}

impl ProbeArgs {
    /// Parse arguments. The first positional argument starts the server
    /// command; everything after it belongs to the server, flags included,
    /// so `--help` only counts when it appears before the command.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut parsed = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value_of(&mut iter, "--config")?)),
                "--server" => parsed.server = Some(value_of(&mut iter, "--server")?),
                "--file" => parsed.file = Some(PathBuf::from(value_of(&mut iter, "--file")?)),
                "--help" | "-h" => parsed.help = true,
                flag if flag.starts_with('-') => return Err(format!("unknown option {}", flag)),
                _ => {
                    parsed.command.push(arg.clone());
                    parsed.command.extend(iter.by_ref().cloned());
                }
            }
        }
        Ok(parsed)
    }
}

fn value_of(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> Result<String, String> {
    iter.next()
        .cloned()
        .ok_or_else(|| format!("{} needs a value", flag))
}

/// Run the probe to completion.
pub fn run(args: ProbeArgs) -> anyhow::Result<()> {
    init_tracing();

    let spec = resolve_spec(&args)?;
    let file = match args.file {
        Some(file) => file,
        None => std::env::current_dir()
            .context("determine current directory")?
            .join("probe.target"),
    };

    info!("probing server capabilities for {}", file.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("build async runtime")?;

    let capabilities = runtime
        .block_on(async {
            let manager = SessionManager::new(spec, SessionOptions::default());
            manager.ensure_active(&file).await?;
            let capabilities = manager.capabilities().await;
            manager.end().await;
            Ok::<_, SessionError>(capabilities)
        })
        .context("session probe failed")?;

    println!("{}", serde_json::to_string_pretty(capabilities.raw())?);

    runtime.shutdown_timeout(Duration::from_secs(2));
    Ok(())
}

/// Pick the server spec from the command line or the catalog.
fn resolve_spec(args: &ProbeArgs) -> anyhow::Result<ServerSpec> {
    if args.server.is_some() && args.config.is_none() {
        bail!("--server requires --config");
    }
    match (&args.config, args.command.is_empty()) {
        (Some(_), false) => bail!("give either a command or --config, not both"),
        (None, true) => bail!("no server given; pass a command or --config with --server"),
        (Some(path), true) => {
            let name = args
                .server
                .as_deref()
                .context("--config requires --server NAME")?;
            let catalog = config::load_catalog(path)?;
            catalog.get(name).cloned().with_context(|| {
                format!("no server named '{}' in {}", name, path.display())
            })
        }
        (None, false) => Ok(ServerSpec::command(args.command[0].as_str())
            .with_args(args.command[1..].iter().cloned())),
    }
}

fn init_tracing() {
    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(filter_str).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
