use crate::cli::helpers::note;
use crate::cli::AppContext;
use crate::error::Result;

/// Data directories and migrations are both applied eagerly in
/// `build_context`, so `setup` just confirms the result and reports the
/// resolved paths — useful on first run to see where things landed.
pub async fn cmd_setup(ctx: &AppContext) -> Result<()> {
    note(&format!("repository path:   {}", ctx.settings.repository_path.display()));
    note(&format!("repository db:     {}", ctx.settings.database_path.display()));
    note(&format!("search index:      {}", ctx.settings.search_index_path.display()));
    note(&format!("main db:           {}", ctx.settings.main_database_path.display()));
    note("migrations applied, directories ready");
    Ok(())
}
