mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::Context;
use notegraph_mcp::DataPaths;

#[derive(Parser)]
#[command(name = "notegraph")]
#[command(about = "Local knowledge base with semantic search and a similarity graph", long_about = None)]
#[command(version)]
struct Cli {
    /// Data directory (default: $DATA_DIR, then ./data)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at info level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, database and a default config.toml
    Init {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Store or overwrite a note (body from --body or stdin)
    Store {
        key: String,
        #[arg(long, short, help = "Note body (default: read stdin)")]
        body: Option<String>,
        #[arg(long, short, help = "Comma-separated tags")]
        tags: Option<String>,
        #[arg(long, help = "Add tags suggested from similar notes")]
        auto_tag: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Print a note
    Get {
        key: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// List notes, optionally by tag
    List {
        #[arg(long, help = "Only notes with this tag")]
        tag: Option<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Delete a note and its embedding
    Delete {
        key: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Semantic search (or substring search with --keyword)
    Search {
        query: String,
        #[arg(long, short, help = "Case-insensitive substring search")]
        keyword: bool,
        #[arg(long, short, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Embed every note that lacks a valid embedding
    Backfill {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Nearest-neighbour similarity graph
    Graph {
        #[arg(long, short, help = "Neighbours per note")]
        neighbors: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Suggest tags for a note from similar notes
    #[command(name = "suggest-tags")]
    SuggestTags {
        key: String,
        #[arg(long, help = "Add the suggested tags to the note")]
        apply: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Database and embedding status
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    /// Serve the HTTP graph API
    #[cfg(feature = "web")]
    Serve {
        #[arg(long, help = "Address to bind (default from config)")]
        bind: Option<String>,
    },

    /// Start MCP server on stdio
    #[cfg(feature = "mcp")]
    Mcp {
        #[arg(long, help = "Show MCP client configuration")]
        install: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let paths = DataPaths::resolve(cli.data_dir.as_deref());
    let ctx = Context::load(paths)?;

    match cli.command {
        Commands::Init { json } => commands::init::run(&ctx, json),
        Commands::Store {
            key,
            body,
            tags,
            auto_tag,
            json,
        } => commands::store::run(&ctx, &key, body, tags.as_deref(), auto_tag, json),
        Commands::Get { key, json } => commands::get::run(&ctx, &key, json),
        Commands::List { tag, json } => commands::list::run(&ctx, tag.as_deref(), json),
        Commands::Delete { key, json } => commands::delete::run(&ctx, &key, json),
        Commands::Search {
            query,
            keyword,
            limit,
            json,
        } => commands::search::run(&ctx, &query, keyword, limit, json),
        Commands::Backfill { json } => commands::backfill::run(&ctx, json),
        Commands::Graph { neighbors, json } => commands::graph::run(&ctx, neighbors, json),
        Commands::SuggestTags { key, apply, json } => {
            commands::suggest_tags::run(&ctx, &key, apply, json)
        }
        Commands::Status { json } => commands::status::run(&ctx, json),

        #[cfg(feature = "web")]
        Commands::Serve { bind } => commands::serve::run(&ctx, bind),

        #[cfg(feature = "mcp")]
        Commands::Mcp { install } => {
            if install {
                print_mcp_install_instructions(&ctx);
                Ok(())
            } else {
                run_mcp_server(ctx)
            }
        }
    }
}

/// Logs go to stderr; stdout carries command output and the MCP transport.
fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(feature = "mcp")]
fn run_mcp_server(ctx: Context) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(notegraph_mcp::mcp::run_mcp_server(ctx.paths, ctx.settings))
}

#[cfg(feature = "mcp")]
fn print_mcp_install_instructions(ctx: &Context) {
    use colored::Colorize;

    let data_dir = std::fs::canonicalize(&ctx.paths.root)
        .unwrap_or_else(|_| ctx.paths.root.clone())
        .to_string_lossy()
        .to_string();

    let binary_path = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "notegraph".to_string());

    println!("{}", "MCP Server Installation Guide".bold().cyan());
    println!();
    println!("Add the following to your MCP client configuration");
    println!(
        "{}",
        "(e.g. ~/.config/claude/claude_desktop_config.json or ~/.cursor/mcp.json):".dimmed()
    );
    println!();
    println!(
        r#"{{
  "mcpServers": {{
    "notegraph": {{
      "command": "{}",
      "args": ["mcp"],
      "env": {{ "DATA_DIR": "{}" }}
    }}
  }}
}}"#,
        binary_path, data_dir
    );
    println!();
    println!("{}", "Available tools:".bold());
    println!("  • {} - Health check", "ping".green());
    println!("  • {} - Save a note under a key", "store_note".green());
    println!("  • {} - Get a note by key", "get_note".green());
    println!("  • {} - Semantic or keyword search", "search_notes".green());
    println!("  • {} - List notes, optionally by tag", "list_notes".green());
    println!("  • {} - Delete a note", "delete_note".green());
    println!("  • {} - Suggest tags from similar notes", "suggest_tags".green());
    println!("  • {} - Similarity graph", "note_graph".green());
    println!();
    println!("{}", "Resources:".bold());
    println!("  • {} - Every stored note, as plain text", "notes://{key}".green());
}
