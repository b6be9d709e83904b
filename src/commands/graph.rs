//! Graph command - print the similarity graph

use anyhow::Result;
use colored::*;

use notegraph_mcp::GraphOptions;

use super::Context;

pub fn run(ctx: &Context, neighbors: Option<usize>, json: bool) -> Result<()> {
    let graph_settings = &ctx.settings.graph;
    let k = graph_settings.clamp_neighbors(neighbors);
    let options = GraphOptions::new(k).with_timeout(graph_settings.timeout());

    let kb = ctx.open()?;
    let graph = kb.get_graph(&options)?;

    if json {
        return super::print_json(&graph);
    }

    let embedded = graph.nodes.iter().filter(|n| n.has_embedding).count();
    println!("{}", "Similarity graph".bold());
    println!("{}", "=".repeat(50));
    println!(
        "Nodes: {} ({} embedded)   Edges: {}   k = {}",
        graph.nodes.len().to_string().cyan(),
        embedded,
        graph.edges.len().to_string().cyan(),
        k
    );
    println!();

    for edge in &graph.edges {
        let sim = format!("{:.3}", edge.similarity);
        let sim = if edge.similarity > 0.8 {
            sim.green()
        } else if edge.similarity > 0.5 {
            sim.yellow()
        } else {
            sim.dimmed()
        };
        println!("  {} {} {}  [{}]", edge.source, "↔".dimmed(), edge.target, sim);
    }

    let isolated = graph.nodes.len() - embedded;
    if isolated > 0 {
        println!();
        println!(
            "{} {} notes without embeddings (run `notegraph backfill`)",
            "!".yellow(),
            isolated
        );
    }

    Ok(())
}
