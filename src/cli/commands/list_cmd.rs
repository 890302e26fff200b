use crate::cli::helpers::print_table;
use crate::cli::AppContext;
use crate::error::{PipelineError, Result};
use crate::repository::PageSearch;

/// `--source` is accepted for symmetry with `search`/`download` but
/// `list` only ever reads the repository store's own page index; there is
/// no main-store page listing, since the main store holds promoted events,
/// not pages.
pub async fn cmd_list(
    ctx: &AppContext,
    source: Option<String>,
    publication: Option<String>,
    limit: i64,
    offset: i64,
) -> Result<()> {
    if let Some(source) = source {
        if source != "repo" && source != "repository" {
            return Err(PipelineError::Validation(format!(
                "unknown --source {source}, list only reads the repository store"
            )));
        }
    }

    let predicate = PageSearch {
        publication_id: publication,
        ..Default::default()
    };
    let pages = ctx.repo.search_pages(&predicate, limit, offset).await?;

    let rows: Vec<Vec<String>> = pages
        .iter()
        .map(|page| {
            vec![
                page.page_id.clone(),
                page.publication_id.clone(),
                page.issue_date.to_string(),
                page.sequence.to_string(),
                page.status.as_str().to_string(),
            ]
        })
        .collect();
    print_table(&["page_id", "publication", "date", "seq", "status"], &rows);
    println!("{} page(s)", pages.len());
    Ok(())
}
