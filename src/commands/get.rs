use anyhow::Result;
use colored::*;

use notegraph_mcp::Error;

use super::Context;

pub fn run(ctx: &Context, key: &str, json: bool) -> Result<()> {
    let kb = ctx.open()?;

    let note = match kb.get_note(key) {
        Ok(note) => note,
        Err(Error::KeyNotFound(_)) => {
            if json {
                super::print_json(&serde_json::json!({ "error": "not found", "key": key }))?;
            } else {
                eprintln!("{} Note not found: {}", "✗".red(), key.cyan());
            }
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        return super::print_json(&note);
    }

    println!("{}", note.title().bold());
    println!("{}", "=".repeat(50));
    println!("{} {}", "key:".dimmed(), note.key.cyan());
    if !note.tags.is_empty() {
        println!("{} {}", "tags:".dimmed(), note.tags.join(", "));
    }
    println!(
        "{} {}   {} {}",
        "created:".dimmed(),
        note.created_at.format("%Y-%m-%d %H:%M"),
        "updated:".dimmed(),
        note.updated_at.format("%Y-%m-%d %H:%M")
    );
    println!();
    println!("{}", note.body);

    Ok(())
}
