use crate::cli::helpers::print_table;
use crate::cli::AppContext;
use crate::error::{PipelineError, Result};
use crate::search::{SearchOptions, SearchSource};

pub async fn cmd_search(
    ctx: &AppContext,
    query: String,
    source: String,
    limit: usize,
    offset: usize,
    fuzzy: bool,
    threshold: u8,
) -> Result<()> {
    let source = match source.as_str() {
        "all" => None,
        "repo" | "repository" => Some(SearchSource::Repository),
        "main" => Some(SearchSource::Main),
        other => {
            return Err(PipelineError::Validation(format!(
                "unknown --source {other}, expected repo, main, or all"
            )))
        }
    };

    let options = SearchOptions {
        query,
        source,
        limit,
        offset,
        fuzzy: if fuzzy { Some(threshold) } else { None },
        ..Default::default()
    };

    let response = ctx.search.search(&options)?;
    println!(
        "{} result(s) of {} total ({} ms)",
        response.results.len(),
        response.total,
        response.execution_time_ms
    );

    let rows: Vec<Vec<String>> = response
        .results
        .iter()
        .map(|hit| {
            vec![
                hit.source.as_str().to_string(),
                hit.source_id.clone(),
                hit.doc_type.clone(),
                hit.date.map(|d| d.to_string()).unwrap_or_default(),
                format!("{:.2}", hit.score),
                if hit.matched_fuzzy { "fuzzy" } else { "exact" }.to_string(),
                hit.snippet.clone(),
            ]
        })
        .collect();
    print_table(&["source", "id", "type", "date", "score", "match", "snippet"], &rows);

    for (facet, counts) in &response.facet_counts {
        println!("facet {facet}:");
        for (value, count) in counts {
            println!("  {value}: {count}");
        }
    }

    Ok(())
}
