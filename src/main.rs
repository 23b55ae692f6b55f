//! bsync - Inspect and rearrange backlog stories on a remote tracker.

use backlog_sync::cli::{Cli, Commands, ConfigCommands};
use backlog_sync::commands::{self, Output, Session};
use backlog_sync::config::{self, ConfigOverrides, OutputFormat, ResolvedConfig};
use backlog_sync::transport::HttpTransport;
use backlog_sync::{Error, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = cli.base_url {
        overrides = overrides.with_base_url(url.clone());
    }
    if cli.keep_stale {
        overrides = overrides.with_discard_stale_responses(false);
    }
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }

    let resolved = config::resolve_config(cli.config_path.as_deref(), &overrides);
    let result = match resolved {
        Ok(resolved) => {
            let human = *resolved.output_format() == OutputFormat::Human;
            run_command(cli.command, cli.config_path, &resolved, human)
                .await
                .map(|_| human)
                .map_err(|e| (e, human))
        }
        Err(e) => Err((e, cli.human_readable)),
    };

    if let Err((e, human)) = result {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Log to stderr so stdout stays parseable. `RUST_LOG` overrides the level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

async fn run_command(
    command: Commands,
    config_override: Option<PathBuf>,
    resolved: &ResolvedConfig,
    human: bool,
) -> Result<()> {
    match command {
        Commands::Show { id } => {
            let session = connect(resolved)?;
            output(&commands::show(&session, &id).await?, human);
        }
        Commands::Metrics { id } => {
            let session = connect(resolved)?;
            output(&commands::metrics(&session, &id).await?, human);
        }
        Commands::Rank {
            id,
            direction,
            target,
            backlog,
            backlog_kind,
        } => {
            let session = connect(resolved)?;
            let backlog = backlog.as_deref().map(|b| (b, backlog_kind.as_str()));
            output(
                &commands::rank(&session, &id, direction, &target, backlog).await?,
                human,
            );
        }
        Commands::Move {
            id,
            backlog,
            backlog_kind,
        } => {
            let session = connect(resolved)?;
            output(
                &commands::move_story(&session, &id, &backlog, &backlog_kind).await?,
                human,
            );
        }
        Commands::Delete { id, params } => {
            let session = connect(resolved)?;
            output(&commands::delete(&session, &id, &params).await?, human);
        }
        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => output(&commands::config_get(resolved, &key)?, human),
            ConfigCommands::Set { key, value } => {
                let path = file_path(config_override)?;
                output(&commands::config_set(&path, &key, &value)?, human);
            }
            ConfigCommands::List => output(&commands::config_list(resolved), human),
            ConfigCommands::Path => {
                let path = file_path(config_override)?;
                output(&commands::config_path(&path), human);
            }
        },
    }
    Ok(())
}

fn connect(resolved: &ResolvedConfig) -> Result<Session> {
    let base_url = resolved.base_url().ok_or_else(|| {
        Error::Config(format!(
            "No base URL configured. Pass --base-url, set {} or run `bsync config set base-url <url>`",
            config::BASE_URL_ENV
        ))
    })?;
    let transport = HttpTransport::new(base_url)?;
    Ok(Session::new(Arc::new(transport), resolved))
}

fn file_path(config_override: Option<PathBuf>) -> Result<PathBuf> {
    config_override
        .or_else(config::config_path)
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
