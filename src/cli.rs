use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docsift",
    about = "Structure-aware indexing and hybrid search for technical manuals"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

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

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Structure, validate and index a file or directory
    Index(IndexArgs),
    /// Hybrid search across indexed documents
    Search(SearchArgs),
    /// Suggest section titles starting with a prefix
    Suggest(SuggestArgs),
    /// Answer a question from indexed content
    Answer(AnswerArgs),
    /// Show a document's structure and validation report
    Show(ShowArgs),
    /// Print one chunk of a document
    Get(GetArgs),
    /// Remove a document from every index
    Remove(RemoveArgs),
    /// Rebuild the lexical index from stored chunks
    Rebuild,
    /// Show system status and statistics
    Status(StatusArgs),
    /// Inspect and change engine settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// File or directory to index
    pub path: PathBuf,

    /// Reprocess documents even when unchanged
    #[arg(long)]
    pub force: bool,

    /// Only index paths matching these globs (relative to the directory)
    #[arg(long = "include", value_name = "GLOB")]
    pub include: Vec<String>,

    /// Output the per-document report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Search only within this document (file name or id)
    #[arg(short = 'd', long)]
    pub document: Option<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip the vector and rerank stages
    #[arg(long)]
    pub lexical_only: bool,

    /// Skip ColBERT reranking
    #[arg(long)]
    pub no_rerank: bool,
}

// -- Suggest --

#[derive(Debug, Parser)]
pub struct SuggestArgs {
    /// Title prefix
    pub prefix: String,

    /// Maximum number of suggestions
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,
}

// -- Answer --

#[derive(Debug, Parser)]
pub struct AnswerArgs {
    /// The question
    pub query: String,

    /// Output the answer and its sources as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Show --

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Document file name or id
    pub document: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Get --

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Document file name or id
    pub document: String,

    /// Chunk ordinal within the document
    pub ordinal: usize,

    /// Resolve the complete section content instead of the stored chunk
    #[arg(long)]
    pub full: bool,

    /// Start at this line (1-indexed)
    #[arg(long, default_value = "1")]
    pub from_line: usize,

    /// Print at most this many lines
    #[arg(short = 'l', long)]
    pub max_lines: Option<usize>,

    /// Prefix lines with their numbers
    #[arg(long)]
    pub line_numbers: bool,

    /// Output as JSON with metadata
    #[arg(long)]
    pub json: bool,
}

// -- Remove --

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Document file name or id
    pub document: String,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every setting with its effective value
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Store a setting (validated before it is written)
    Set {
        /// Setting key, e.g. search.alpha
        key: String,
        /// New value
        value: String,
    },
    /// Remove a stored setting (revert to default)
    Unset {
        /// Setting key
        key: String,
    },
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
            "docsift",
            &mut std::io::stdout(),
        );
    }
}
