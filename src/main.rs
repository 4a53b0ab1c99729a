//! HTTP Mock Resolver - CLI Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use http::Request;
use mockhttp_resolver::source::{config_sources, DefinitionSource};
use mockhttp_resolver::{MockHttpConfig, ReplayReader, Resolver};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mockhttp",
    about = "HTTP mock resolver - validate mock definitions and resolve requests against them",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mockhttp.yaml")]
    config: PathBuf,

    /// Extra directory of definition files (repeatable)
    #[arg(short = 'D', long = "definitions", value_name = "DIR")]
    definitions: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Validate configuration and definitions, then exit
    #[arg(long)]
    validate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a single request and print the mock response
    Resolve {
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Absolute request URL
        #[arg(short, long)]
        url: String,

        /// Request header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header", value_name = "HEADER")]
        headers: Vec<String>,

        /// Request body
        #[arg(short = 'd', long)]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockHttpConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else if args.validate && args.definitions.is_empty() {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration");
        MockHttpConfig::default()
    };
    config.definition_dirs.extend(args.definitions);

    let sources = config_sources(&config)?;
    let sources: Vec<&dyn DefinitionSource> = sources.iter().map(|s| s.as_ref()).collect();

    let resolver = Resolver::new(config.settings.clone());
    let count = resolver.load(&sources)?;

    if args.validate {
        println!(
            "Configuration is valid ({} definitions from {} sources)",
            count,
            sources.len()
        );
        return Ok(());
    }

    match args.command {
        Some(Command::Resolve {
            method,
            url,
            headers,
            data,
        }) => resolve(&resolver, &method, &url, &headers, data).await,
        None => {
            println!("{} definitions loaded; use `resolve` to test a request", count);
            Ok(())
        }
    }
}

async fn resolve(
    resolver: &Resolver,
    method: &str,
    url: &str,
    headers: &[String],
    data: Option<String>,
) -> Result<()> {
    let mut builder = Request::builder().method(method.to_uppercase().as_str()).uri(url);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Invalid header `{}`, expected `Name: value`", header))?;
        builder = builder.header(name.trim(), value.trim());
    }
    let body = data.map(ReplayReader::from_bytes).unwrap_or_default();
    let mut request = builder.body(body).context("Invalid request")?;

    match resolver.resolve(&mut request) {
        Ok(response) => {
            println!("HTTP {}", response.status);
            for (name, value) in &response.headers {
                println!("{}: {}", name, value);
            }
            if !response.delay.is_zero() {
                info!(delay_ms = response.delay.as_millis() as u64, "Applying delay");
                tokio::time::sleep(response.delay).await;
            }
            println!();
            println!("{}", String::from_utf8_lossy(&response.body));
            Ok(())
        }
        Err(e) if e.is_pass_through() => {
            println!("pass-through: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
