mod state;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use hp_core::{DEFAULT_CONFIG_PATH, HostportConfig, PodPortMapping, PortMapping};
use hp_iptables::{
    FlushFlag, HostportManager, Iptables, RestoreCountersFlag, RulePosition, diff_rulesets,
};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::state::{load_engine, persist_engine, replay_file};

#[derive(Parser)]
#[command(name = "hpctl")]
#[command(version, about = "Host-port forwarding rule management", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override the state file from the configuration
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    /// Increase log verbosity
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current rule state
    Show {
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Validate an iptables-restore file without applying it
    Check {
        file: PathBuf,
        #[arg(long)]
        table: Option<String>,
    },
    /// Replay an iptables-restore file into the current state
    Restore {
        file: PathBuf,
        #[arg(long)]
        table: Option<String>,
        /// Replace declared chains instead of merging into them
        #[arg(long)]
        flush: bool,
    },
    /// Chain operations
    Chain {
        #[command(subcommand)]
        action: ChainAction,
    },
    /// Rule operations
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },
    /// Pod host-port forwarding
    Hostport {
        #[command(subcommand)]
        action: HostportAction,
    },
    /// Show differences between two iptables-save files
    Diff {
        current: PathBuf,
        desired: PathBuf,
        #[arg(long)]
        table: Option<String>,
    },
}

#[derive(Subcommand)]
enum ChainAction {
    /// Create a chain if it does not exist
    Ensure { table: String, chain: String },
    /// Remove all rules from a chain
    Flush { table: String, chain: String },
    /// Delete a chain
    Delete { table: String, chain: String },
    /// Report whether a chain exists
    Exists { table: String, chain: String },
}

#[derive(Subcommand)]
enum RuleAction {
    /// Add a rule unless an equivalent one exists
    Ensure {
        table: String,
        chain: String,
        #[arg(long)]
        prepend: bool,
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
    /// Delete a rule if present
    Delete {
        table: String,
        chain: String,
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum HostportAction {
    /// Forward host ports to a pod
    Add {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        ip: IpAddr,
        /// [HOST_IP:]HOST_PORT:CONTAINER_PORT[/PROTO], repeatable
        #[arg(long = "map", required = true)]
        mappings: Vec<PortMapping>,
    },
    /// Remove all forwards of a pod
    Remove {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        name: String,
    },
}

fn init_tracing(verbose: u8, default_level: &str) {
    let level = match verbose {
        0 => default_level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = HostportConfig::from_file(&cli.config)?;
    init_tracing(cli.verbose, &config.log_level);

    let state_path = cli.state.clone().unwrap_or_else(|| config.state_file.clone());

    match cli.command {
        Commands::Show { table, json } => show_state(&config, &state_path, table.as_deref(), json)?,
        Commands::Check { file, table } => check_file(&config, &file, table.as_deref())?,
        Commands::Restore { file, table, flush } => {
            restore_file(&config, &state_path, &file, table.as_deref(), flush)?
        }
        Commands::Chain { action } => handle_chain_action(&config, &state_path, action)?,
        Commands::Rule { action } => handle_rule_action(&config, &state_path, action)?,
        Commands::Hostport { action } => handle_hostport_action(&config, &state_path, action)?,
        Commands::Diff {
            current,
            desired,
            table,
        } => diff_files(&config, &current, &desired, table.as_deref())?,
    }

    Ok(())
}

fn show_state(
    config: &HostportConfig,
    state_path: &Path,
    table: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let ipt = load_engine(state_path, config.protocol)?;

    if json {
        let rendered = match table {
            Some(name) => serde_json::to_string_pretty(ipt.store().get_table(name)?)?,
            None => serde_json::to_string_pretty(ipt.store())?,
        };
        println!("{}", rendered);
        return Ok(());
    }

    match table {
        Some(name) => {
            let mut out = String::new();
            ipt.save_into(name, &mut out)?;
            print!("{}", out);
        }
        None => print!("{}", ipt.save_all()),
    }
    Ok(())
}

fn check_file(config: &HostportConfig, file: &Path, table: Option<&str>) -> anyhow::Result<()> {
    let ipt = replay_file(file, table, config.protocol)?;

    let (chains, rules) = ipt
        .store()
        .table_names()
        .filter_map(|name| ipt.store().get_table(name).ok())
        .flat_map(|t| t.chains.values())
        .fold((0, 0), |(chains, rules), chain| (chains + 1, rules + chain.rules.len()));

    println!("✅ {:?} is valid: {} chains, {} rules", file, chains, rules);
    Ok(())
}

fn restore_file(
    config: &HostportConfig,
    state_path: &Path,
    file: &Path,
    table: Option<&str>,
    flush: bool,
) -> anyhow::Result<()> {
    let mut ipt = load_engine(state_path, config.protocol)?;
    let data = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    let flush = if flush {
        FlushFlag::FlushTables
    } else {
        FlushFlag::NoFlushTables
    };

    // a failed restore leaves the engine half-applied; the state file is only
    // rewritten on success
    let result = match table {
        Some(table) => ipt.restore(table, &data, flush, RestoreCountersFlag::NoRestoreCounters),
        None => ipt.restore_all(&data, flush, RestoreCountersFlag::NoRestoreCounters),
    };
    result.with_context(|| format!("Failed to restore {:?}", file))?;

    persist_engine(&ipt, state_path)?;
    info!(file = %file.display(), "restored");
    Ok(())
}

fn handle_chain_action(
    config: &HostportConfig,
    state_path: &Path,
    action: ChainAction,
) -> anyhow::Result<()> {
    let mut ipt = load_engine(state_path, config.protocol)?;

    match action {
        ChainAction::Ensure { table, chain } => {
            let existed = ipt.ensure_chain(&table, &chain)?;
            println!(
                "{} chain {}/{}",
                if existed { "Kept" } else { "Created" },
                table,
                chain
            );
        }
        ChainAction::Flush { table, chain } => {
            ipt.flush_chain(&table, &chain)?;
            println!("Flushed chain {}/{}", table, chain);
        }
        ChainAction::Delete { table, chain } => {
            ipt.delete_chain(&table, &chain)?;
            println!("Deleted chain {}/{}", table, chain);
        }
        ChainAction::Exists { table, chain } => {
            println!("{}", ipt.chain_exists(&table, &chain));
            return Ok(());
        }
    }

    persist_engine(&ipt, state_path)
}

fn handle_rule_action(
    config: &HostportConfig,
    state_path: &Path,
    action: RuleAction,
) -> anyhow::Result<()> {
    let mut ipt = load_engine(state_path, config.protocol)?;

    match action {
        RuleAction::Ensure {
            table,
            chain,
            prepend,
            args,
        } => {
            let position = if prepend {
                RulePosition::Prepend
            } else {
                RulePosition::Append
            };
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let existed = ipt.ensure_rule(position, &table, &chain, &args)?;
            println!(
                "{} rule in {}/{}",
                if existed { "Kept existing" } else { "Added" },
                table,
                chain
            );
        }
        RuleAction::Delete { table, chain, args } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            ipt.delete_rule(&table, &chain, &args)?;
            println!("Deleted rule from {}/{} (if present)", table, chain);
        }
    }

    persist_engine(&ipt, state_path)
}

fn handle_hostport_action(
    config: &HostportConfig,
    state_path: &Path,
    action: HostportAction,
) -> anyhow::Result<()> {
    let mut ipt = load_engine(state_path, config.protocol)?;

    match action {
        HostportAction::Add {
            namespace,
            name,
            ip,
            mappings,
        } => {
            let pod = PodPortMapping {
                namespace,
                name,
                ip,
                mappings,
            };
            let added = HostportManager::new(&mut ipt, config).add(&pod)?;
            println!("Forwarded {} port(s) to {} ({})", added, pod.full_name(), pod.ip);
        }
        HostportAction::Remove { namespace, name } => {
            let removed = HostportManager::new(&mut ipt, config).remove(&namespace, &name)?;
            if removed == 0 {
                println!("No hostports found for {}_{}", namespace, name);
                return Ok(());
            }
            println!("Removed {} hostport chain(s) for {}_{}", removed, namespace, name);
        }
    }

    persist_engine(&ipt, state_path)
}

fn diff_files(
    config: &HostportConfig,
    current: &Path,
    desired: &Path,
    table: Option<&str>,
) -> anyhow::Result<()> {
    let current_ipt = replay_file(current, table, config.protocol)?;
    let desired_ipt = replay_file(desired, table, config.protocol)?;

    let result = diff_rulesets(&current_ipt, &desired_ipt, table)?;
    match &result.diff {
        None => println!("✅ Rulesets match ({})", result.scope()),
        Some(diff) => {
            println!("Differences in {}:", result.scope());
            print!("{}", diff);
        }
    }
    Ok(())
}
