use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::config::Sections;
use crate::db::CursorStore;
use crate::model::{BatchContent, Book, Provenance, ReadStatus, StreamKind, SyncCursor};
use crate::notion::{blocks, NotionIds, NotionService};
use crate::sync::fetcher::{fetch_changes, FetchOutcome};
use crate::sync::identity::{self, book_from_detail};
use crate::sync::reconcile::{replace_section, EmptyPolicy, SectionOutcome};
use crate::sync::retry::{call_with_refresh, RetryPolicy};
use crate::sync::Pacing;
use crate::upstream::{Session, UpstreamSource};

/// Collaborators and settings shared by every book of a run.
pub struct SyncContext<'a> {
    pub upstream: &'a dyn UpstreamSource,
    pub sink: &'a dyn NotionService,
    pub store: &'a CursorStore,
    pub ids: &'a NotionIds,
    pub sections: &'a Sections,
    pub pacing: Pacing,
    pub retry: RetryPolicy,
}

/// What to sync. With neither `book_id` nor `sync_all` nothing runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub book_id: Option<String>,
    pub sync_all: bool,
    pub incremental: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOutcome {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReport {
    pub book_id: String,
    pub title: String,
    pub outcome: EntityOutcome,
    pub page_id: Option<String>,
    pub highlights: Option<SectionOutcome>,
    pub annotations: Option<SectionOutcome>,
    pub cursor_saved: bool,
    pub diagnostics: Vec<String>,
}

impl EntityReport {
    fn new(book_id: &str, title: &str) -> Self {
        Self {
            book_id: book_id.to_string(),
            title: title.to_string(),
            outcome: EntityOutcome::Failed,
            page_id: None,
            highlights: None,
            annotations: None,
            cursor_saved: false,
            diagnostics: Vec::new(),
        }
    }

    fn fail(mut self, diagnostic: String) -> Self {
        self.outcome = EntityOutcome::Failed;
        self.diagnostics.push(diagnostic);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub reports: Vec<EntityReport>,
}

impl RunSummary {
    pub fn record(&mut self, report: EntityReport) {
        match report.outcome {
            EntityOutcome::Succeeded => self.succeeded += 1,
            EntityOutcome::Failed => self.failed += 1,
            EntityOutcome::Skipped => self.skipped += 1,
        }
        self.reports.push(report);
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

async fn ensure_page(ctx: &SyncContext<'_>, book: &Book) -> Result<String> {
    if let Some(id) = ctx.sink.query_page(ctx.ids, &book.title, &book.author).await? {
        info!(page_id = %id, "reusing existing page");
        return Ok(id);
    }
    let id = ctx.sink.create_page(ctx.ids, book).await?;
    info!(page_id = %id, "created page");
    Ok(id)
}

fn section_items(batch: &BatchContent) -> Vec<serde_json::Value> {
    match batch {
        BatchContent::Highlights(chapters) => blocks::highlight_blocks(chapters),
        BatchContent::Annotations(chapters) => blocks::annotation_blocks(chapters),
    }
}

fn fetch_failure(label: &str, fetch: &FetchOutcome) -> SectionOutcome {
    SectionOutcome::failed(
        label,
        format!(
            "{} fetch failed: {}",
            fetch.kind.as_str(),
            fetch.diagnostic.as_deref().unwrap_or("no payload")
        ),
    )
}

/// Syncs one book: page, both streams, both sections, then the cursor.
#[instrument(
    skip(ctx, session, book),
    fields(
        book_id = %book.book_id,
        title = %book.title,
        from = %book.provenance_label(),
        has_notes = book.has_notes,
        note_count = book.note_count,
    )
)]
pub async fn sync_book(
    ctx: &SyncContext<'_>,
    session: Session,
    book: &Book,
    incremental: bool,
) -> (EntityReport, Session) {
    let mut report = EntityReport::new(&book.book_id, &book.title);

    let page_id = match ensure_page(ctx, book).await {
        Ok(id) => id,
        Err(err) => {
            error!(?err, "failed to ensure page");
            return (report.fail(format!("page: {:#}", err)), session);
        }
    };
    report.page_id = Some(page_id.clone());

    let cursor = if incremental {
        ctx.store.get(&book.book_id).await
    } else {
        SyncCursor::initial(&book.book_id)
    };

    let (highlights, session) = fetch_changes(
        ctx.upstream,
        &ctx.retry,
        session,
        &book.book_id,
        &cursor.highlight_cursor,
        StreamKind::Highlights,
    )
    .await;
    let (annotations, session) = fetch_changes(
        ctx.upstream,
        &ctx.retry,
        session,
        &book.book_id,
        &cursor.annotation_cursor,
        StreamKind::Annotations,
    )
    .await;

    for fetch in [&highlights, &annotations] {
        if let Some(diag) = &fetch.diagnostic {
            report.diagnostics.push(format!("{}: {}", fetch.kind.as_str(), diag));
        }
    }

    let has_update = highlights.has_update() || annotations.has_update() || !incremental;
    if !has_update {
        if highlights.succeeded() && annotations.succeeded() {
            info!("no changes; skipping");
            report.outcome = EntityOutcome::Skipped;
        } else {
            warn!("nothing fetched; leaving page and cursor as they are");
            report.outcome = EntityOutcome::Failed;
        }
        return (report, session);
    }

    let labels = [
        ctx.sections.highlights.as_str(),
        ctx.sections.annotations.as_str(),
    ];

    let highlight_section = match &highlights.batch {
        None => fetch_failure(&ctx.sections.highlights, &highlights),
        Some(batch) if batch.has_update || !incremental => {
            replace_section(
                ctx.sink,
                &page_id,
                &ctx.sections.highlights,
                &labels,
                section_items(&batch.content),
                &ctx.sections.placeholder,
                EmptyPolicy::Placeholder,
                &ctx.pacing,
            )
            .await
        }
        Some(_) => SectionOutcome::unchanged(&ctx.sections.highlights),
    };

    let annotation_section = match &annotations.batch {
        None => fetch_failure(&ctx.sections.annotations, &annotations),
        Some(batch) => {
            let policy = if incremental {
                EmptyPolicy::Preserve
            } else {
                EmptyPolicy::Placeholder
            };
            replace_section(
                ctx.sink,
                &page_id,
                &ctx.sections.annotations,
                &labels,
                section_items(&batch.content),
                &ctx.sections.placeholder,
                policy,
                &ctx.pacing,
            )
            .await
        }
    };

    for section in [&highlight_section, &annotation_section] {
        if let Some(diag) = section.diagnostic.as_ref().filter(|_| !section.success) {
            report.diagnostics.push(format!("{}: {}", section.label, diag));
        }
    }

    let succeeded = highlight_section.success && annotation_section.success;
    report.highlights = Some(highlight_section);
    report.annotations = Some(annotation_section);

    ctx.store
        .put(&SyncCursor {
            book_id: book.book_id.clone(),
            highlight_cursor: highlights.cursor.clone(),
            annotation_cursor: annotations.cursor.clone(),
            last_sync_time: Utc::now(),
        })
        .await;
    report.cursor_saved = true;

    report.outcome = if succeeded {
        EntityOutcome::Succeeded
    } else {
        EntityOutcome::Failed
    };
    info!(outcome = ?report.outcome, "book synced");
    (report, session)
}

/// Merged book list from both listings, each retried once on session expiry.
pub async fn resolve_all(ctx: &SyncContext<'_>, session: Session) -> (Result<Vec<Book>>, Session) {
    let upstream = ctx.upstream;
    let (shelf, session) = call_with_refresh(upstream, &ctx.retry, session, |s| async move {
        upstream.list_by_ownership(&s).await
    })
    .await;
    let (notebook, session) = call_with_refresh(upstream, &ctx.retry, session, |s| async move {
        upstream.list_by_annotation_presence(&s).await
    })
    .await;

    let books = match (shelf, notebook) {
        (Err(a), Err(b)) => Err(anyhow::anyhow!(
            "both listings failed: shelf: {}; notebook: {}",
            a,
            b
        )),
        (shelf, notebook) => {
            let shelf = shelf.unwrap_or_else(|err| {
                warn!(%err, "shelf listing failed; continuing with notebook only");
                Vec::new()
            });
            let notebook = notebook.unwrap_or_else(|err| {
                warn!(%err, "notebook listing failed; continuing with shelf only");
                Vec::new()
            });
            Ok(identity::resolve(shelf, notebook))
        }
    };
    (books, session)
}

/// Book record for a single-book run, from the detail lookup.
pub async fn resolve_one(
    ctx: &SyncContext<'_>,
    session: Session,
    book_id: &str,
) -> (Result<Book>, Session) {
    let upstream = ctx.upstream;
    let (detail, session) = call_with_refresh(upstream, &ctx.retry, session, |s| async move {
        upstream.get_entity_detail(&s, book_id).await
    })
    .await;
    let book = match detail {
        Ok(Some(detail)) => {
            let status = ReadStatus::from_finished(detail.finish_reading.unwrap_or(false));
            Ok(book_from_detail(
                book_id,
                detail,
                status,
                false,
                0,
                vec![Provenance::Detail],
            ))
        }
        Ok(None) => Err(anyhow::anyhow!("book {} not found upstream", book_id)),
        Err(err) => Err(anyhow::anyhow!("detail lookup for {} failed: {}", book_id, err)),
    };
    (book, session)
}

/// Runs a single-book or whole-shelf sync. Per-book failures are counted,
/// never raised; only a failure to list any books at all is an error.
#[instrument(skip(ctx, session))]
pub async fn run(
    ctx: &SyncContext<'_>,
    session: Session,
    request: &SyncRequest,
) -> (Result<RunSummary>, Session) {
    let mut summary = RunSummary::default();

    if let Some(book_id) = &request.book_id {
        let (book, session) = resolve_one(ctx, session, book_id).await;
        let session = match book {
            Ok(book) => {
                let (report, session) = sync_book(ctx, session, &book, request.incremental).await;
                summary.record(report);
                session
            }
            Err(err) => {
                error!(?err, "cannot resolve book");
                summary.record(EntityReport::new(book_id, "").fail(format!("{:#}", err)));
                session
            }
        };
        log_summary(&summary);
        return (Ok(summary), session);
    }

    if !request.sync_all {
        return (Ok(summary), session);
    }

    let (books, mut session) = resolve_all(ctx, session).await;
    let books = match books {
        Ok(books) => books,
        Err(err) => return (Err(err), session),
    };
    if books.is_empty() {
        warn!("no books found upstream");
    }
    info!(count = books.len(), incremental = request.incremental, "syncing books");

    for (i, book) in books.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(ctx.pacing.between_entities).await;
        }
        let (report, next) = sync_book(ctx, session, book, request.incremental).await;
        session = next;
        summary.record(report);
    }

    log_summary(&summary);
    (Ok(summary), session)
}

fn log_summary(summary: &RunSummary) {
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        "sync run finished"
    );
    for report in summary
        .reports
        .iter()
        .filter(|r| r.outcome == EntityOutcome::Failed)
    {
        warn!(book_id = %report.book_id, diagnostics = ?report.diagnostics, "book failed");
    }
}

/// Fails fast when a single-book run gets an empty id.
pub fn validate_request(request: &SyncRequest) -> Result<()> {
    if let Some(id) = &request.book_id {
        if id.trim().is_empty() {
            bail!("book id must not be empty");
        }
    }
    Ok(())
}
