//! `brain chunk`: preview how a text would be split before indexing.

use anyhow::{Context, Result};
use brain_core::chunk::chunk_with_metadata;
use brain_core::models::Metadata;
use std::io::Read;
use std::path::Path;

use crate::config::ChunkingConfig;

/// Read `path` (or stdin for `-`) and print its chunks.
pub fn run_chunk(chunking: &ChunkingConfig, path: &Path, json: bool) -> Result<()> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };

    let params = chunking.params()?;
    let chunks = chunk_with_metadata(&text, params, &Metadata::new());

    if json {
        let out: Vec<serde_json::Value> = chunks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "index": c.index,
                    "chars": c.text.chars().count(),
                    "hash": c.hash,
                    "loc": c.metadata.get("loc"),
                    "text": c.text,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for c in &chunks {
        println!(
            "[chunk {}] {} chars, sha256 {}",
            c.index,
            c.text.chars().count(),
            &c.hash[..12]
        );
        println!("{}", c.text);
        println!();
    }
    println!(
        "{} chunks (window {}, overlap {})",
        chunks.len(),
        params.chunk_size(),
        params.chunk_overlap()
    );
    Ok(())
}
