use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use file_concierge::config::{EmbedderKind, Overrides};

#[derive(Debug, Parser)]
#[command(
    name = "file-concierge",
    about = "A personal file concierge: index, tag, collect and search your files"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory whose files are indexed
    #[arg(long, global = true)]
    pub sandbox: Option<PathBuf>,

    /// Embedding backend (hashed works offline)
    #[arg(long, value_enum, global = true)]
    pub embedder: Option<EmbedderKind>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            sandbox_dir: self.sandbox.clone(),
            embedder: self.embedder,
            embedding_model: self.model.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index every file in the sandbox
    Index(IndexArgs),
    /// Search files by meaning and/or tags
    Search(SearchArgs),
    /// Ask the concierge a single question
    Query(QueryArgs),
    /// Start an interactive conversation
    Chat,
    /// Show index statistics
    Stats(StatsArgs),
    /// Manage file tags
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
    /// Manage collections of files
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Browse sandbox files
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Show or persist settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Reprocess files that already have a record
    #[arg(long)]
    pub force: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Natural language query
    pub query: Option<String>,

    /// Only boost or return files carrying this tag (repeatable)
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,

    /// Number of results to return
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The question or request
    pub text: String,
}

// -- Stats --

#[derive(Debug, Parser)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Tag subcommands --

#[derive(Debug, Subcommand)]
pub enum TagAction {
    /// Apply tags to a file
    Apply {
        /// Path relative to the sandbox
        file: String,
        /// Tags to apply
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Remove a tag from a file
    Remove {
        /// Path relative to the sandbox
        file: String,
        tag: String,
    },
    /// Show the tags of a file
    Show {
        /// Path relative to the sandbox
        file: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List every tag
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List files carrying all the given tags
    Files {
        #[arg(required = true)]
        tags: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the language model for tag suggestions
    Suggest {
        /// Path relative to the sandbox
        file: String,
        /// Apply the suggested tags
        #[arg(long)]
        apply: bool,
    },
}

// -- Collection subcommands --

#[derive(Debug, Subcommand)]
pub enum CollectionAction {
    /// Create a named collection
    Create {
        name: String,
        /// What the collection is for
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Add files to a collection
    Add {
        name: String,
        /// Paths relative to the sandbox
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// List the files of a collection
    Show {
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List every collection
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Files subcommands --

#[derive(Debug, Subcommand)]
pub enum FilesAction {
    /// List sandbox files
    List {
        /// Directory relative to the sandbox
        directory: Option<String>,
        /// Glob pattern, e.g. "*.py"
        #[arg(short, long)]
        pattern: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the full text of a file
    Read {
        /// Path relative to the sandbox
        file: String,
    },
}

// -- Config subcommands --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show resolved settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting
    Set { key: String, value: String },
    /// Remove a persisted setting (revert to default)
    Clear { key: String },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "file-concierge",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_with_tags() {
        let cli = Cli::parse_from([
            "file-concierge",
            "search",
            "budget",
            "-t",
            "finance",
            "--tag",
            "2024",
            "-n",
            "3",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query.as_deref(), Some("budget"));
                assert_eq!(args.tags, vec!["finance", "2024"]);
                assert_eq!(args.count, Some(3));
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_tag_only_search() {
        let cli = Cli::parse_from(["file-concierge", "search", "-t", "x"]);
        match cli.command {
            Command::Search(args) => assert!(args.query.is_none()),
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn global_overrides() {
        let cli = Cli::parse_from([
            "file-concierge",
            "index",
            "--force",
            "--embedder",
            "hashed",
            "--sandbox",
            "/tmp/box",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.embedder, Some(EmbedderKind::Hashed));
        assert_eq!(overrides.sandbox_dir, Some(PathBuf::from("/tmp/box")));
        assert!(matches!(
            cli.command,
            Command::Index(IndexArgs { force: true })
        ));
    }

    #[test]
    fn tag_apply_requires_tags() {
        let parsed =
            Cli::try_parse_from(["file-concierge", "tag", "apply", "a.txt"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }
}
