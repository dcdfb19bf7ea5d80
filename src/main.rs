use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use shelf_notion_sync::config;
use shelf_notion_sync::db::{self, CursorStore};
use shelf_notion_sync::notion::NotionClient;
use shelf_notion_sync::sync::{self, SyncContext, SyncRequest};
use shelf_notion_sync::upstream::{Session, UpstreamSource, WeReadClient};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Sync bookshelf highlights and thoughts into a Notion database"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Sync a single book by id
    #[arg(long)]
    book_id: Option<String>,

    /// Sync every book on the shelf or with notes
    #[arg(short = 'a', long)]
    all: bool,

    /// Ignore stored cursors and rewrite every section
    #[arg(short = 'f', long)]
    full_sync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.book_id.is_none() && !args.all {
        println!("Nothing to do: pass --book-id <ID> to sync one book or --all to sync the whole shelf.");
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    let store = CursorStore::new(pool);

    let base_url = reqwest::Url::parse(&cfg.upstream.base_url).context("invalid upstream.base_url")?;
    let upstream = WeReadClient::new(base_url, Duration::from_millis(cfg.app.refresh_pause_ms));
    let notion = NotionClient::new(cfg.notion.token.clone(), cfg.notion.version.clone());
    let ids = cfg.notion_ids();

    let mut session = Session::new(cfg.upstream.cookie.clone());
    match upstream.refresh_session(&session).await {
        Ok(renewed) => session = renewed,
        Err(err) => warn!(%err, "initial session refresh failed; using configured cookie"),
    }

    let gate = sync::check_schema(&store, &notion, &ids.database_id, &cfg.required_fields()).await?;
    let incremental = !args.full_sync && !gate.force_full_resync;
    if gate.force_full_resync && !args.full_sync {
        info!("schema gate requested a full resync");
    }

    let request = SyncRequest {
        book_id: args.book_id,
        sync_all: args.all,
        incremental,
    };
    sync::orchestrator::validate_request(&request)?;

    let ctx = SyncContext {
        upstream: &upstream,
        sink: &notion,
        store: &store,
        ids: &ids,
        sections: &cfg.notion.sections,
        pacing: cfg.pacing(),
        retry: cfg.session_retry(),
    };

    let (summary, _session) = sync::run(&ctx, session, &request).await;
    match summary {
        Ok(summary) => {
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                "done"
            );
            Ok(())
        }
        Err(err) => {
            error!(?err, "sync run aborted");
            Err(err)
        }
    }
}
