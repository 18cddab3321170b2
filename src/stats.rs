//! Index statistics and consistency checks.
//!
//! `sidx stats` summarizes what is indexed; `sidx verify` compares the
//! metadata store against the vector file. Neither needs an embedding
//! provider, so both open the index with a [`DisabledEmbedder`].

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::DisabledEmbedder;
use crate::index::SemanticIndex;
use crate::progress::format_number;

fn open_read_only(config: &Config) -> SemanticIndex {
    SemanticIndex::open(config.clone(), Arc::new(DisabledEmbedder))
}

/// Run the stats command: load the index and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let index = open_read_only(config);
    let stats = index.stats().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Semantic Index Stats");
    println!("====================");
    println!();
    println!("  Index dir:   {}", config.index.dir.display());
    println!(
        "  Size:        {} (metadata {}, vectors {})",
        format_bytes(stats.metadata_bytes + stats.vectors_bytes),
        format_bytes(stats.metadata_bytes),
        format_bytes(stats.vectors_bytes)
    );
    println!();
    println!("  Documents:   {}", format_number(stats.documents as u64));
    println!("  Vectors:     {}", format_number(stats.vectors as u64));
    println!(
        "  Dimension:   {}",
        stats
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unset".to_string())
    );
    println!("  Model:       {}", stats.model.as_deref().unwrap_or("unset"));
    println!("  Metric:      {}", stats.metric);
    println!(
        "  Updated:     {}",
        stats
            .last_updated
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    Ok(())
}

/// Run the verify command. Fails when the two halves disagree.
pub async fn run_verify(config: &Config) -> Result<()> {
    let index = open_read_only(config);
    let drift = index.verify().await;

    if drift.is_consistent() {
        println!("verify");
        println!("  index is consistent");
        return Ok(());
    }

    println!("verify");
    println!("  vectors without records: {}", drift.orphan_vectors.len());
    for id in &drift.orphan_vectors {
        println!("    {}", id);
    }
    println!("  records without vectors: {}", drift.missing_vectors.len());
    for id in &drift.missing_vectors {
        println!("    {}", id);
    }
    bail!("Index drift detected. Run `sidx index` to repair.")
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
