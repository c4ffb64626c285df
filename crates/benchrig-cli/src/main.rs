mod config;
#[cfg(test)]
mod test_util;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};

use benchrig_core::suite::{Outcome, PrerequisitePolicy, Suite, SuiteOptions, SuiteReport};
use benchrig_core::{Config, ProcessRunner, default_registry};

use config::{BenchrigConfig, Overrides};

#[derive(Parser)]
#[command(name = "benchrig", about = "Fetch, build and benchmark third-party projects with a toolchain under test")]
struct Cli {
    /// Config file path (defaults to $XDG_CONFIG_HOME/benchrig/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Toolchain root (overrides BENCHRIG_TOOLCHAIN_ROOT and GOROOT)
    #[arg(long, global = true)]
    toolchain_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a benchrig config file
    Init {
        /// Directory for sources, binaries and scratch space
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// List registered harnesses
    List {
        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Fetch harness sources
    Get {
        #[command(flatten)]
        select: Selection,
        /// Discard existing sources and fetch again
        #[arg(long)]
        refetch: bool,
        #[command(flatten)]
        suite: SuiteArgs,
    },
    /// Build harnesses from fetched sources
    Build {
        #[command(flatten)]
        select: Selection,
        #[command(flatten)]
        suite: SuiteArgs,
    },
    /// Run harness benchmarks, building first unless --no-build
    Run {
        #[command(flatten)]
        select: Selection,
        /// Reduced workloads for a quick validation pass
        #[arg(long)]
        short: bool,
        /// Skip the build stage and run existing binaries
        #[arg(long)]
        no_build: bool,
        /// Extra argument passed to every benchmark variant (repeatable)
        #[arg(long = "bench-arg", allow_hyphen_values = true)]
        bench_args: Vec<String>,
        #[command(flatten)]
        suite: SuiteArgs,
    },
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
struct Selection {
    /// Harness names
    #[arg(required_unless_present = "all")]
    names: Vec<String>,
    /// Select every registered harness
    #[arg(long, conflicts_with = "names")]
    all: bool,
}

impl Selection {
    /// Names for the suite driver; empty means all.
    fn names(&self) -> &[String] {
        if self.all { &[] } else { &self.names[..] }
    }
}

#[derive(Args)]
struct SuiteArgs {
    /// What to do when a harness cannot run on this host: skip or abort
    #[arg(long)]
    on_unmet: Option<PrerequisitePolicy>,
    /// Wall-clock limit per stage in seconds (0 disables)
    #[arg(long)]
    stage_timeout: Option<u64>,
}

/// Execute `benchrig init`: write a config file.
fn cmd_init(config_path: &Path, toolchain_root: Option<PathBuf>, work_dir: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    let toolchain_root = toolchain_root.or_else(|| std::env::var_os("GOROOT").map(PathBuf::from));

    let cfg = config::ConfigFile {
        toolchain: config::ToolchainSection {
            root: toolchain_root.clone(),
        },
        paths: config::PathsSection {
            work_dir: work_dir.clone(),
            ..Default::default()
        },
        ..Default::default()
    };
    config::save_config(config_path, &cfg)?;

    println!("Config written to {}", config_path.display());
    match toolchain_root {
        Some(root) => println!("  toolchain.root = {}", root.display()),
        None => println!("  toolchain.root is unset; edit the file or pass --toolchain-root"),
    }
    if let Some(dir) = work_dir {
        println!("  paths.work_dir = {}", dir.display());
    }
    Ok(())
}

/// Execute `benchrig list`.
fn cmd_list(json: bool) -> anyhow::Result<()> {
    let registry = default_registry();
    let names = registry.list();
    if json {
        println!("{}", serde_json::to_string(&names).context("failed to encode harness list")?);
    } else {
        for name in names {
            println!("{name}");
        }
    }
    Ok(())
}

fn print_report(report: &SuiteReport) {
    for h in &report.harnesses {
        match &h.outcome {
            Outcome::Completed => println!("{}: completed", h.name),
            Outcome::Skipped { reason } => println!("{}: skipped ({reason})", h.name),
        }
    }
}

/// The lifecycle stages a suite command drives.
#[derive(Clone, Copy)]
enum SuiteCommand {
    Get,
    Build,
    Run { build_first: bool },
}

fn resolve(cli_config: Option<&Path>, toolchain_root: Option<PathBuf>, suite: &SuiteArgs) -> anyhow::Result<BenchrigConfig> {
    let path = config::config_path(cli_config);
    let overrides = Overrides {
        toolchain_root,
        on_unmet: suite.on_unmet,
        stage_timeout_secs: suite.stage_timeout,
    };
    BenchrigConfig::resolve(&path, &overrides)
}

async fn cmd_suite(resolved: BenchrigConfig, names: &[String], options: SuiteOptions, command: SuiteCommand) -> anyhow::Result<()> {
    let registry = default_registry();
    let config = Config::new(
        resolved.toolchain_root,
        resolved.build_env,
        resolved.exec_env,
        Arc::new(ProcessRunner),
    );
    tracing::debug!(?config, "resolved configuration");

    let suite = Suite::new(&registry, config, resolved.layout, options);
    let report = match command {
        SuiteCommand::Get => suite.get(names).await?,
        SuiteCommand::Build => suite.build(names).await?,
        SuiteCommand::Run { build_first } => suite.run(names, build_first).await?,
    };

    print_report(&report);
    if matches!(command, SuiteCommand::Run { .. }) {
        for name in report.completed() {
            println!("  results: {}", suite.layout().results_file(name).display());
        }
    }
    Ok(())
}

fn suite_options(resolved: &BenchrigConfig) -> SuiteOptions {
    SuiteOptions {
        policy: resolved.policy,
        stage_timeout: resolved.stage_timeout,
        ..SuiteOptions::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cli_config = cli.config.as_deref();

    match cli.command {
        Commands::Init { work_dir, force } => {
            cmd_init(&config::config_path(cli_config), cli.toolchain_root, work_dir, force)?;
        }
        Commands::List { json } => cmd_list(json)?,
        Commands::Get {
            select,
            refetch,
            suite,
        } => {
            let resolved = resolve(cli_config, cli.toolchain_root, &suite)?;
            let options = SuiteOptions {
                refetch,
                ..suite_options(&resolved)
            };
            cmd_suite(resolved, select.names(), options, SuiteCommand::Get).await?;
        }
        Commands::Build { select, suite } => {
            let resolved = resolve(cli_config, cli.toolchain_root, &suite)?;
            let options = suite_options(&resolved);
            cmd_suite(resolved, select.names(), options, SuiteCommand::Build).await?;
        }
        Commands::Run {
            select,
            short,
            no_build,
            bench_args,
            suite,
        } => {
            let resolved = resolve(cli_config, cli.toolchain_root, &suite)?;
            let options = SuiteOptions {
                short,
                args: bench_args,
                ..suite_options(&resolved)
            };
            let command = SuiteCommand::Run { build_first: !no_build };
            cmd_suite(resolved, select.names(), options, command).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "benchrig", &mut std::io::stdout());
        }
    }

    Ok(())
}
