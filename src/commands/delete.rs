use anyhow::Result;
use colored::*;

use super::Context;

pub fn run(ctx: &Context, key: &str, json: bool) -> Result<()> {
    let kb = ctx.open()?;
    let deleted = kb.delete_note(key)?;

    if json {
        super::print_json(&serde_json::json!({ "key": key, "deleted": deleted }))?;
    } else if deleted {
        println!("{} Deleted note {}", "✓".green().bold(), key.cyan());
    } else {
        eprintln!("{} Note not found: {}", "✗".red(), key.cyan());
    }

    if !deleted {
        std::process::exit(1);
    }
    Ok(())
}
