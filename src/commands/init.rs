use std::fs;

use anyhow::Result;
use colored::*;

use super::Context;

const CONFIG_TEMPLATE: &str = r#"# notegraph configuration. Every key is optional.

[embedding]
# "harmonic" (built in, deterministic) or "fastembed" (needs the `fastembed` feature)
backend = "harmonic"
model = "all-MiniLM-L6-v2"
dimensions = 384

[search]
default_limit = 10
max_limit = 100

[graph]
neighbors_per_node = 3
max_neighbors = 50
timeout_ms = 10000

[auto_tag]
threshold = 0.45
max_tags = 5
skip = ["conversation", "context"]

[server]
bind = "127.0.0.1:8080"
"#;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let paths = &ctx.paths;
    paths.ensure_dirs()?;

    let wrote_config = if paths.config.exists() {
        false
    } else {
        fs::write(&paths.config, CONFIG_TEMPLATE)?;
        true
    };

    // Opening creates the schema and records the vector dimension.
    let kb = ctx.open()?;
    let stats = kb.stats()?;

    if json {
        super::print_json(&serde_json::json!({
            "data_dir": paths.root.display().to_string(),
            "database": paths.db.display().to_string(),
            "config": paths.config.display().to_string(),
            "config_created": wrote_config,
            "dimensions": stats.dimensions,
            "notes": stats.note_count,
        }))?;
        return Ok(());
    }

    println!("{}", "notegraph data directory".bold());
    println!("{}", "=".repeat(50));
    println!("{} {}", "✓".green(), paths.root.display());
    println!("{} {}", "✓".green(), paths.db.display());
    if wrote_config {
        println!("{} Created {}", "✓".green(), paths.config.display());
    } else {
        println!("{} {} exists", "✓".green(), paths.config.display());
    }
    println!();
    println!(
        "Dimensions: {}   Notes: {}",
        stats.dimensions.to_string().cyan(),
        stats.note_count.to_string().cyan()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_mcp::Settings;

    #[test]
    fn test_config_template_parses_to_defaults() {
        let parsed: Settings = toml::from_str(CONFIG_TEMPLATE).unwrap();
        let defaults = Settings::default();
        assert_eq!(parsed.embedding.dimensions, defaults.embedding.dimensions);
        assert_eq!(parsed.graph.neighbors_per_node, defaults.graph.neighbors_per_node);
        assert_eq!(parsed.auto_tag.skip, defaults.auto_tag.skip);
        assert_eq!(parsed.server.bind, defaults.server.bind);
    }
}
