use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};

mod commands;

/// kerbpm - A mod package manager for Kerbal-style games
#[derive(Parser)]
#[command(name = "kerbpm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh repository metadata
    Update {
        /// Re-download everything, ignoring recorded ETags
        #[arg(long)]
        force: bool,
    },

    /// Resolve and fetch mods (metadata plan + archive download only)
    Install {
        /// Mod identifiers, optionally with a version (e.g. SomeMod=1.2.0)
        mods: Vec<String>,

        /// Do not expand recommendations
        #[arg(long)]
        no_recommends: bool,

        /// Also expand suggestions
        #[arg(long)]
        with_suggests: bool,

        /// Show the plan without downloading anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove installed mods
    Remove {
        /// Mod identifiers
        mods: Vec<String>,

        /// Remove even if other installed mods depend on these
        #[arg(long)]
        force: bool,
    },

    /// List installed mods and their status
    List,

    /// Search loaded metadata for mods
    Search {
        /// Substring matched against identifiers and names
        query: String,
    },

    /// Manage metadata repositories
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum RepoAction {
    /// List configured and referenced repositories
    List,

    /// Add a repository
    Add {
        name: String,
        uri: String,

        /// Lower values take precedence
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },

    /// Remove a configured repository
    Remove { name: String },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = TermLogger::init(
        level,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    let result = match cli.command {
        Commands::Update { force } => commands::update::run(force),
        Commands::Install {
            mods,
            no_recommends,
            with_suggests,
            dry_run,
        } => commands::install::run(mods, no_recommends, with_suggests, dry_run),
        Commands::Remove { mods, force } => commands::remove::run(mods, force),
        Commands::List => commands::list::run(),
        Commands::Search { query } => commands::search::run(query),
        Commands::Repo { action } => match action {
            RepoAction::List => commands::repo::run_list(),
            RepoAction::Add {
                name,
                uri,
                priority,
            } => commands::repo::run_add(name, uri, priority),
            RepoAction::Remove { name } => commands::repo::run_remove(name),
        },
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "kerbpm", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(&e));
    }
}

/// Structured resolver errors map to dedicated exit codes so scripts can
/// tell "nothing provides X" from "these two mods clash".
fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<kerbpm::Error>() {
        Some(kerbpm::Error::UnmetDependencies { .. }) => 2,
        Some(kerbpm::Error::Conflicts { .. }) => 3,
        Some(kerbpm::Error::Inconsistent { .. }) => 3,
        _ => 1,
    }
}
