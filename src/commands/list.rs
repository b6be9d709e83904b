use anyhow::Result;
use colored::*;
use unicode_width::UnicodeWidthStr;

use super::Context;

pub fn run(ctx: &Context, tag: Option<&str>, json: bool) -> Result<()> {
    let kb = ctx.open()?;
    let notes = kb.list_notes(tag)?;

    if json {
        return super::print_json(&notes);
    }

    if notes.is_empty() {
        match tag {
            Some(tag) => println!("{} No notes tagged {}", "→".dimmed(), tag.cyan()),
            None => println!("{} No notes yet", "→".dimmed()),
        }
        return Ok(());
    }

    let width = notes
        .iter()
        .map(|n| UnicodeWidthStr::width(n.key.as_str()))
        .max()
        .unwrap_or(0)
        .min(48);

    for note in &notes {
        let pad = width.saturating_sub(UnicodeWidthStr::width(note.key.as_str()));
        println!(
            "{}{}  {}  {}",
            note.key.cyan(),
            " ".repeat(pad),
            note.updated_at.format("%Y-%m-%d").to_string().dimmed(),
            note.tags.join(", ")
        );
    }
    println!();
    println!("{} notes", notes.len().to_string().bold());

    Ok(())
}
