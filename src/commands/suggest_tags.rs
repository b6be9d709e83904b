use anyhow::Result;
use colored::*;

use super::Context;

pub fn run(ctx: &Context, key: &str, apply: bool, json: bool) -> Result<()> {
    let kb = ctx.open()?;
    let suggestions = kb.suggest_tags(key)?;

    if apply && !suggestions.is_empty() {
        let mut tags = kb.get_note(key)?.tags;
        tags.extend(suggestions.iter().map(|s| s.tag.clone()));
        kb.db().set_tags(key, &tags)?;
    }

    if json {
        return super::print_json(&serde_json::json!({
            "key": key,
            "suggestions": suggestions,
            "applied": apply && !suggestions.is_empty(),
        }));
    }

    if suggestions.is_empty() {
        println!("{} No tag suggestions for {}", "→".dimmed(), key.cyan());
        return Ok(());
    }

    println!("{} Suggested tags for {}", "→".dimmed(), key.cyan());
    for s in &suggestions {
        println!("  {:<24} {:.2}", s.tag.green(), s.score);
    }
    if apply {
        println!();
        println!("{} Added {} tags", "✓".green().bold(), suggestions.len());
    }

    Ok(())
}
