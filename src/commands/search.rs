//! Search command - semantic by default, keyword with `--keyword`

use anyhow::Result;
use colored::*;

use notegraph_mcp::{Error, SearchMode};

use super::{truncate, Context};

pub fn run(ctx: &Context, query: &str, keyword: bool, limit: Option<usize>, json: bool) -> Result<()> {
    let kb = ctx.open()?;
    let mode = if keyword {
        SearchMode::Keyword
    } else {
        SearchMode::Semantic
    };

    let results = match kb.search_notes(query, mode, limit) {
        Ok(results) => results,
        Err(e @ Error::ModelUnavailable(_)) => {
            if json {
                super::print_json(&serde_json::json!({
                    "error": e.to_string(),
                    "hint": "retry with --keyword",
                }))?;
            } else {
                eprintln!("{} {}", "Error:".red().bold(), e);
                eprintln!("  {} notegraph search --keyword {:?}", "→".dimmed(), query);
            }
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        return super::print_json(&results);
    }

    if results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }

    println!(
        "{} {} results for: {}",
        "→".dimmed(),
        results.len(),
        query.cyan()
    );
    println!();

    for (i, hit) in results.iter().enumerate() {
        let label = match hit.score {
            Some(score) => {
                let text = format!("{:.2}", score);
                if score > 0.8 {
                    text.green()
                } else if score > 0.5 {
                    text.yellow()
                } else {
                    text.dimmed()
                }
            }
            None => "kw".dimmed(),
        };

        println!(
            "{}. [{}] {} {}",
            (i + 1).to_string().bold(),
            label,
            hit.title.cyan(),
            format!("({})", hit.key).dimmed()
        );
        println!("   {}", truncate(&hit.snippet, 100).dimmed());
        if !hit.tags.is_empty() {
            println!("   {}", hit.tags.join(", "));
        }
        println!();
    }

    Ok(())
}
