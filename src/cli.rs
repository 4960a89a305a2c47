use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Apply a declarative catalog of resources in dependency order", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring the system in line with a catalog
    Apply(ApplyArgs),

    /// Show the relationship graph and the order resources would run in
    Graph(GraphArgs),

    /// Inspect or reset the values remembered between runs
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Parser)]
pub struct ApplyArgs {
    /// Catalog file (TOML)
    pub catalog: PathBuf,

    /// Report what would change without changing anything
    #[arg(long, short = 'n')]
    pub noop: bool,

    /// Only apply resources with these tags (comma-separated)
    #[arg(long, short)]
    pub tags: Option<String>,

    /// Never apply resources with these tags (comma-separated)
    #[arg(long)]
    pub skip_tags: Option<String>,

    /// Skip resources whose dependencies failed
    #[arg(long)]
    pub skip_failed_deps: bool,

    /// Apply resources even outside their schedules
    #[arg(long)]
    pub ignore_schedules: bool,

    /// State file [default: ~/.local/share/converge/state.json]
    #[arg(long, env = "CONVERGE_STATE")]
    pub state: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Parser)]
pub struct GraphArgs {
    /// Catalog file (TOML)
    pub catalog: PathBuf,
}

// ============================================================================
// State
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// Show recorded values
    Show {
        /// State file
        #[arg(long, env = "CONVERGE_STATE")]
        state: Option<String>,

        /// Only show this resource (e.g. 'File[/etc/motd]')
        resource: Option<String>,
    },

    /// Forget every recorded value
    Clear {
        /// State file
        #[arg(long, env = "CONVERGE_STATE")]
        state: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::parse_from([
            "converge", "-vv", "apply", "site.toml", "--noop", "--tags", "web,db", "--format",
            "json",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.noop);
        assert_eq!(args.tags.as_deref(), Some("web,db"));
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.catalog, PathBuf::from("site.toml"));
    }
}
