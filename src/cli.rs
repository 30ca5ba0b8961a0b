//! CLI struct definitions and command handlers for the `backroom` binary.
//!
//! All clap-derived types live here; `lib.rs` parses them and hands off to
//! the `run_*` functions below.

use crate::core::config::Config;
use crate::core::error::BackroomError;
use crate::core::output;
use crate::core::store::{Payload, payload_from_value};
use crate::hooks::{AdapterSet, HookRegistry};
use crate::service::Backroom;
use crate::{http, logging};

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{IsTerminal, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(
    name = "backroom",
    version = env!("CARGO_PKG_VERSION"),
    about = "Keep JSON records in cages and fire hooks when they change.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Config file (defaults to $BACKROOM_CONFIG, then ./backroom.toml).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Serve the HTTP API
    Serve(ServeCli),
    /// Manage caged records
    Cage(CageCli),
    /// Inspect configured hooks
    Hooks(HooksCli),
    /// Print the version
    Version,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ServeCli {
    /// Listen address, overriding `api_listen`.
    #[clap(long)]
    pub listen: Option<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct CageCli {
    #[clap(subcommand)]
    pub command: CageCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CageCommand {
    /// Create a record from a JSON string, a JSON file, or stdin
    Create {
        cage: String,
        /// JSON text or path to a JSON file; stdin when omitted.
        input: Option<String>,
    },
    /// Show a record's payload
    Get {
        id: String,
        /// Clean output suitable for machine parsing.
        #[clap(long, short = 'c')]
        clean: bool,
    },
    /// List records in a cage, most recent first
    List { cage: String },
    /// List every cage name
    ListCages,
    /// Replace a record's payload
    Update {
        id: String,
        /// JSON text or path to a JSON file; stdin when omitted.
        input: Option<String>,
    },
    /// Delete one record
    Delete { id: String },
    /// Delete every record in a cage
    DeleteCage { cage: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct HooksCli {
    #[clap(subcommand)]
    pub command: HooksCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum HooksCommand {
    /// List configured hook rules
    List {
        /// Only rules bound to this cage.
        #[clap(long)]
        cage: Option<String>,
    },
    /// Report rules whose adapter is not available
    Check,
}

/// Reads a payload from JSON text, a file path, or stdin (`None` or `-`).
fn read_payload(input: Option<&str>) -> Result<Payload, BackroomError> {
    let text = match input {
        None | Some("-") => {
            if std::io::stdin().is_terminal() {
                eprintln!("Reading JSON from stdin...");
            }
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
        Some(arg) if Path::new(arg).is_file() => {
            tracing::debug!(path = arg, "reading JSON from file");
            std::fs::read_to_string(arg)?
        }
        Some(arg) => arg.to_string(),
    };
    let value = serde_json::from_str(&text)
        .map_err(|e| BackroomError::ValidationError(format!("invalid JSON payload: {}", e)))?;
    payload_from_value(value)
}

pub(crate) fn run_cage(config: &Config, command: CageCommand) -> Result<(), BackroomError> {
    let backroom = Backroom::from_config(config)?;

    match command {
        CageCommand::Create { cage, input } => {
            let data = read_payload(input.as_deref())?;
            let record = backroom.create_record(&cage, data)?;
            println!("Caged record created with id: {}", record.id);
        }
        CageCommand::Get { id, clean } => {
            let record = backroom.get_record(&id)?;
            let data = serde_json::to_string_pretty(&record.data)?;
            if clean {
                println!("{}", data);
            } else {
                println!("{}", output::numbered_lines(&data, std::io::stdout().is_terminal()));
            }
        }
        CageCommand::List { cage } => {
            let records = backroom.list_records(&cage)?;
            if records.is_empty() {
                eprintln!("No caged records found in cage: {}", cage);
            }
            for record in records {
                println!("{}\t{}", record.id, serde_json::to_string(&record.data)?);
            }
        }
        CageCommand::ListCages => {
            let cages = backroom.list_cages()?;
            if cages.is_empty() {
                eprintln!("No cages found");
            }
            for cage in cages {
                println!("{}", cage);
            }
        }
        CageCommand::Update { id, input } => {
            let data = read_payload(input.as_deref())?;
            let record = backroom.update_record(&id, None, data)?;
            println!("Caged record updated with id: {}", record.id);
        }
        CageCommand::Delete { id } => {
            let record = backroom.delete_record(&id)?;
            println!("Caged record deleted with id: {}", record.id);
        }
        CageCommand::DeleteCage { cage } => {
            let count = backroom.delete_cage(&cage)?;
            println!("{} caged records deleted from cage: {}", count, cage);
        }
    }
    Ok(())
}

pub(crate) fn run_hooks(config: &Config, command: HooksCommand) -> Result<(), BackroomError> {
    let registry = HookRegistry::from_configs(&config.hooks)?;

    match command {
        HooksCommand::List { cage } => {
            let rules = match cage.as_deref() {
                Some(cage) => registry.rules_for_cage(cage),
                None => registry.rules().iter().collect(),
            };
            if rules.is_empty() {
                eprintln!("No hooks configured");
            }
            for rule in rules {
                let actions: Vec<&str> = rule.actions.iter().map(|a| a.as_str()).collect();
                let condition = rule
                    .condition
                    .as_ref()
                    .map(|c| output::compact_line(c.source(), 60))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "#{}\t{}\t{}\t{} -> {}\tif {}",
                    rule.index,
                    rule.cage,
                    actions.join(","),
                    rule.adapter,
                    rule.target,
                    condition
                );
            }
        }
        HooksCommand::Check => {
            let adapters = AdapterSet::from_config(config)?;
            registry.check_targets(&adapters)?;
            let missing = registry.unresolved_adapters(&adapters);
            if missing.is_empty() {
                println!(
                    "{} {} hook(s) ok; adapters: {}",
                    "✓".green(),
                    registry.rules().len(),
                    adapters.names().join(", ")
                );
                return Ok(());
            }
            for rule in &missing {
                println!(
                    "{} hook #{} (cage '{}') uses unknown adapter '{}'",
                    "✗".red(),
                    rule.index,
                    rule.cage,
                    rule.adapter
                );
            }
            return Err(BackroomError::ConfigError(format!(
                "{} hook(s) reference unavailable adapters",
                missing.len()
            )));
        }
    }
    Ok(())
}

pub(crate) fn run_serve(config: &Config, serve: ServeCli) -> Result<(), BackroomError> {
    let addr = match serve.listen {
        Some(listen) => listen.parse::<SocketAddr>().map_err(|e| {
            BackroomError::ConfigError(format!("--listen '{}': {}", listen, e))
        })?,
        None => config.listen_addr()?,
    };

    let backroom = Arc::new(Backroom::from_config(config)?);
    let dispatcher = backroom.dispatcher();
    for rule in dispatcher.registry().unresolved_adapters(dispatcher.adapters()) {
        tracing::warn!(
            rule = rule.index,
            cage = %rule.cage,
            adapter = %rule.adapter,
            "hook names an adapter that is not configured; dispatch for it will fail"
        );
    }
    tracing::info!(
        environment = ?config.environment,
        hooks = dispatcher.registry().rules().len(),
        db = %config.database.path.display(),
        "starting backroom"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        http::serve(listener, backroom).await
    })
}

/// Loads config, installs logging, and runs the parsed command.
pub(crate) fn run_cli(cli: Cli) -> Result<(), BackroomError> {
    if let Command::Version = cli.command {
        println!("v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.log)?;

    match cli.command {
        Command::Serve(serve) => run_serve(&config, serve),
        Command::Cage(cage) => run_cage(&config, cage.command),
        Command::Hooks(hooks) => run_hooks(&config, hooks.command),
        Command::Version => Ok(()),
    }
}
