use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Build orchestration for language specification projects.
///
/// Drives an `lspec.toml` project through its stages: generate sources,
/// build, compile, package, archive, then build examples and run tests
/// against the archive. Stages whose inputs and outputs are unchanged
/// since their last successful run are skipped.
///
/// EXAMPLES:
///     lspec build --compiler ./spoofax-bridge   Build the current project
///     lspec build a b --no-tests                Build two projects in parallel
///     lspec check --json                        Show the effective configuration
///     lspec graph                               Show stage order and inputs
///     lspec clean --compiler ./spoofax-bridge   Remove build outputs
///
/// ENVIRONMENT VARIABLES:
///     LSPEC_COMPILER    Compiler executable used by build and clean
///     LSPEC_REPOSITORY  Local artifact repository for dependency resolution
///     LSPEC_GROUP, LSPEC_ID, LSPEC_VERSION, LSPEC_FORMAT
///                       Override the configuration file
///     LSPEC_JSON        Set to 'true' for JSON output by default
///     RUST_LOG          Log filter (overrides -v)
#[derive(Parser)]
#[command(name = "lspec")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one or more projects
    ///
    /// Every project directory gets its own compiler engine. Projects build
    /// concurrently; a compiler that cannot start stops all of them.
    ///
    /// EXAMPLES:
    ///     lspec build                         Build the current directory
    ///     lspec build --conservative          Fingerprint the whole project tree
    ///     lspec build --compile-dep acme:bar:2.0 --lang-version 1.1.0
    #[command(visible_alias = "b")]
    Build {
        /// Project directories
        #[arg(default_value = ".")]
        dirs: Vec<PathBuf>,
        #[command(flatten)]
        overrides: commands::OverrideArgs,
        #[command(flatten)]
        host: commands::HostArgs,
        /// Fingerprint every project file instead of per-stage inputs
        #[arg(long)]
        conservative: bool,
        /// Skip the test stage
        #[arg(long)]
        no_tests: bool,
        /// Skip the build-examples stage
        #[arg(long)]
        no_examples: bool,
        /// Run every stage regardless of fingerprints
        #[arg(long, short = 'f')]
        force: bool,
        /// Output the report as JSON
        #[arg(long, env = "LSPEC_JSON")]
        json: bool,
    },

    /// Validate a project's effective configuration
    ///
    /// Applies environment and command line overrides to the configuration
    /// file and, with a repository, resolves and classifies dependencies.
    #[command(visible_alias = "c")]
    Check {
        /// Project directory
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[command(flatten)]
        overrides: commands::OverrideArgs,
        /// Local artifact repository
        #[arg(long, env = "LSPEC_REPOSITORY")]
        repository: Option<PathBuf>,
        /// Output as JSON
        #[arg(long, env = "LSPEC_JSON")]
        json: bool,
    },

    /// Remove generated sources and build outputs
    Clean {
        /// Project directories
        #[arg(default_value = ".")]
        dirs: Vec<PathBuf>,
        #[command(flatten)]
        host: commands::HostArgs,
    },

    /// Print the stage graph of a project
    Graph {
        /// Project directory
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Output as JSON
        #[arg(long, env = "LSPEC_JSON")]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            dirs,
            overrides,
            host,
            conservative,
            no_tests,
            no_examples,
            force,
            json,
        } => {
            let args = commands::build::BuildArgs {
                dirs,
                overrides,
                host,
                conservative,
                no_tests,
                no_examples,
                force,
                json,
            };
            commands::build::run(args)?;
        }
        Commands::Check {
            dir,
            overrides,
            repository,
            json,
        } => {
            commands::check::run(&dir, &overrides, repository.as_deref(), json)?;
        }
        Commands::Clean { dirs, host } => {
            commands::clean::run(&dirs, &host)?;
        }
        Commands::Graph { dir, json } => {
            commands::graph::run(&dir, json)?;
        }
    }

    Ok(())
}
