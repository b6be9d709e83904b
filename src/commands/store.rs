use std::io::Read;

use anyhow::Result;
use colored::*;

use notegraph_mcp::parse_tags;

use super::Context;

/// Store a note. The body comes from `--body`, or from stdin when absent.
/// An empty body is stored as is.
pub fn run(
    ctx: &Context,
    key: &str,
    body: Option<String>,
    tags: Option<&str>,
    auto_tag: bool,
    json: bool,
) -> Result<()> {
    let body = match body {
        Some(body) => body,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let tags = tags.map(parse_tags).unwrap_or_default();

    let kb = ctx.open()?;
    let stored = kb.store_note(key, &body, &tags, auto_tag)?;

    if json {
        return super::print_json(&stored);
    }

    println!("{} Stored note {}", "✓".green().bold(), stored.note.key.cyan());
    if !stored.note.tags.is_empty() {
        println!("  {} tags: {}", "→".dimmed(), stored.note.tags.join(", "));
    }
    if !stored.added_tags.is_empty() {
        println!(
            "  {} auto-tags: {}",
            "→".dimmed(),
            stored.added_tags.join(", ").green()
        );
    }
    if let Some(reason) = &stored.embedding_error {
        println!("  {} not embedded: {}", "!".yellow(), reason);
        println!("  {} run `notegraph backfill` once the model is available", "→".dimmed());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_mcp::{DataPaths, Settings};

    #[test]
    fn test_empty_body_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context {
            paths: DataPaths::from_root(dir.path().to_path_buf()),
            settings: Settings::default(),
        };

        run(&ctx, "blank", Some(String::new()), None, false, true).unwrap();
        assert_eq!(ctx.open().unwrap().get_note("blank").unwrap().body, "");
    }
}
