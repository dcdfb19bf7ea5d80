use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use shelf_notion_sync::config;
use shelf_notion_sync::notion::NotionClient;

/// Print the book database's properties and flag required ones that are missing.
#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Database ID to inspect (defaults to notion.database_id)
    #[arg(long)]
    db_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let client = NotionClient::new(cfg.notion.token.clone(), cfg.notion.version.clone());
    let db_id = args.db_id.unwrap_or_else(|| cfg.notion.database_id.clone());

    let db = client.retrieve_database(&db_id).await?;
    println!("Database ID: {}", db.id);
    println!("Properties:");
    let mut props: Vec<_> = db.properties.iter().collect();
    props.sort_by(|a, b| a.0.cmp(b.0));
    for (name, prop) in props {
        println!("  {} -> {{ id: {}, type: {} }}", name, prop.id, prop.typ);
    }

    let missing: Vec<String> = cfg
        .required_fields()
        .into_iter()
        .filter(|f| !db.properties.contains_key(f))
        .collect();
    if missing.is_empty() {
        println!("All required fields present.");
    } else {
        println!("Missing required fields: {}", missing.join(", "));
    }
    Ok(())
}
