//! Backfill command - embed notes that have no valid embedding

use std::time::Instant;

use anyhow::Result;
use colored::*;

use super::Context;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let kb = ctx.open()?;

    if !json {
        println!("{} Embedding notes without vectors...", "→".dimmed());
    }

    let start = Instant::now();
    let report = kb.backfill()?;
    let duration_ms = start.elapsed().as_millis();

    if json {
        return super::print_json(&serde_json::json!({
            "candidates": report.candidates,
            "embedded": report.embedded,
            "failed": report.failed,
            "duration_ms": duration_ms,
        }));
    }

    if report.candidates == 0 {
        println!("{} Every note already has an embedding", "✓".green().bold());
        return Ok(());
    }

    println!(
        "{} Embedded {} of {} notes in {:.2}s",
        "✓".green().bold(),
        report.embedded.to_string().cyan(),
        report.candidates,
        duration_ms as f64 / 1000.0
    );
    if report.failed > 0 {
        println!("  {} {} notes failed (see log)", "✗".red(), report.failed);
        std::process::exit(1);
    }

    Ok(())
}
