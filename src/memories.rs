//! `brain list` and `brain get`: read memories straight from SQLite.

use anyhow::{bail, Result};
use brain_core::models::MemoryRecord;
use brain_core::store::MemoryStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteMemoryStore;

async fn open_store(config: &Config) -> Result<SqliteMemoryStore> {
    let pool = db::connect(&config.db).await?;
    crate::migrate::run_migrations(&pool).await?;
    Ok(SqliteMemoryStore::new(pool))
}

fn format_ts(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn preview(content: &str, max_chars: usize) -> String {
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > max_chars || content.contains('\n') {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{}…", cut)
    } else {
        line.to_string()
    }
}

/// CLI entry point — lists a user's memories, newest update first.
pub async fn run_list(config: &Config, user_id: &str, limit: usize, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let memories = store.list(user_id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&memories)?);
        return Ok(());
    }

    if memories.is_empty() {
        println!("No memories for user {}.", user_id);
        return Ok(());
    }

    for m in &memories {
        println!(
            "{}  {}  {}  {}",
            m.id,
            format_ts(&m.updated_at),
            m.title().unwrap_or("(untitled)"),
            preview(&m.content, 60)
        );
    }
    println!("{} memories", memories.len());
    Ok(())
}

/// CLI entry point — prints one memory.
pub async fn run_get(config: &Config, user_id: &str, id: &str, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let Some(memory): Option<MemoryRecord> = store.get(user_id, id).await? else {
        bail!("memory not found: {}", id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&memory)?);
        return Ok(());
    }

    println!("--- Memory ---");
    println!("id:         {}", memory.id);
    println!("title:      {}", memory.title().unwrap_or("(untitled)"));
    println!("user_id:    {}", memory.user_id);
    println!("created_at: {}", format_ts(&memory.created_at));
    println!("updated_at: {}", format_ts(&memory.updated_at));
    println!("metadata:   {}", serde_json::Value::Object(memory.metadata.clone()));
    println!();
    println!("--- Content ---");
    println!("{}", memory.content);
    Ok(())
}
