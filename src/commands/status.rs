use anyhow::Result;
use colored::*;
use serde::Serialize;

use notegraph_mcp::core::config::EmbeddingBackend;
use notegraph_mcp::search::IndexStats;

use super::Context;

#[derive(Serialize)]
struct Status<'a> {
    data_dir: String,
    backend: EmbeddingBackend,
    model: &'a str,
    #[serde(flatten)]
    index: IndexStats,
}

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let kb = ctx.open()?;
    let status = Status {
        data_dir: ctx.paths.root.display().to_string(),
        backend: ctx.settings.embedding.backend,
        model: &ctx.settings.embedding.model,
        index: kb.stats()?,
    };

    if json {
        return super::print_json(&status);
    }

    let index = &status.index;
    println!("{}", "notegraph status".bold());
    println!("{}", "=".repeat(50));
    println!("   {:<12} {}", "Data dir", status.data_dir);
    println!("   {:<12} {:?} ({})", "Backend", status.backend, status.model);
    println!("   {:<12} {}", "Dimensions", index.dimensions);
    println!("   {:<12} {}", "Notes", index.note_count);
    println!("   {:<12} {}", "Embedded", index.embedding_count);
    if let Some(ts) = index.last_updated {
        println!("   {:<12} {}", "Updated", ts.format("%Y-%m-%d %H:%M:%S"));
    }

    if index.missing_count > 0 || !index.corrupt_keys.is_empty() {
        println!();
        println!("{}", "Needs attention".yellow());
        println!("{}", "-".repeat(30));
        if index.missing_count > 0 {
            println!("   {} notes without embeddings", index.missing_count);
        }
        for key in &index.corrupt_keys {
            println!("   corrupt embedding: {}", key.red());
        }
        println!("   {} notegraph backfill", "→".dimmed());
    }

    Ok(())
}
