use diesel::sql_query;
use diesel_async::RunQueryDsl;

use crate::cli::helpers::note;
use crate::cli::AppContext;
use crate::error::{PipelineError, Result};
use crate::search::{SearchEntry, SearchSource};
use crate::with_conn;

/// `--vacuum`/`--analyze` run against both the repository and main
/// databases; `--rebuild-index` re-derives every `SearchEntry` from the
/// repository store and calls `SearchIndex::reindex`, matching `promote`'s
/// source of truth (the repository store, not the search index) for what
/// exists.
pub async fn cmd_maintenance(ctx: &AppContext, vacuum: bool, analyze: bool, rebuild_index: bool) -> Result<()> {
    if vacuum {
        run_pragma(ctx, "VACUUM").await?;
        note("vacuumed repository and main databases");
    }
    if analyze {
        run_pragma(ctx, "ANALYZE").await?;
        note("analyzed repository and main databases");
    }
    if rebuild_index {
        let count = rebuild_search_index(ctx).await?;
        note(&format!("rebuilt search index with {count} document(s)"));
    }
    if !vacuum && !analyze && !rebuild_index {
        note("no maintenance flags given; nothing to do");
    }
    Ok(())
}

async fn run_pragma(ctx: &AppContext, statement: &str) -> Result<()> {
    with_conn!(ctx.repo.pool(), conn, {
        sql_query(statement).execute(&mut conn).await.map_err(PipelineError::from)
    })?;
    with_conn!(ctx.main_pool, conn, {
        sql_query(statement).execute(&mut conn).await.map_err(PipelineError::from)
    })?;
    Ok(())
}

async fn rebuild_search_index(ctx: &AppContext) -> Result<usize> {
    const BATCH_LIMIT: i64 = 500;
    let mut entries = Vec::new();
    let mut offset = 0i64;
    loop {
        let pages = ctx
            .repo
            .search_pages(&crate::repository::PageSearch::default(), BATCH_LIMIT, offset)
            .await?;
        if pages.is_empty() {
            break;
        }
        for page in &pages {
            for segment in ctx.repo.list_segments_for_page(&page.page_id).await? {
                entries.push(SearchEntry {
                    source: SearchSource::Repository,
                    source_id: segment.segment_id,
                    title: page.publication_id.clone(),
                    body: segment.text,
                    date: Some(page.issue_date),
                    doc_type: segment.kind.as_str().to_string(),
                    facets: std::collections::HashMap::new(),
                });
            }
        }
        offset += pages.len() as i64;
    }
    ctx.search.reindex(SearchSource::Repository, entries).await
}
