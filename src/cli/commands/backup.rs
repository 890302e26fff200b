use std::path::PathBuf;

use crate::cli::helpers::note;
use crate::cli::AppContext;
use crate::error::{PipelineError, Result};

/// Copy both SQLite databases and the search index directory into
/// `output`. Not a hot backup: callers should pause the service first if
/// writers may be active, since a copy mid-write can capture a torn
/// SQLite file.
pub async fn cmd_backup(ctx: &AppContext, output: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&output)?;

    copy_file(&ctx.settings.database_path, &output.join("repository.sqlite"))?;
    copy_file(&ctx.settings.main_database_path, &output.join("main.sqlite"))?;
    copy_dir(&ctx.settings.search_index_path, &output.join("search_index"))?;

    note(&format!("backed up to {}", output.display()));
    Ok(())
}

fn copy_file(from: &std::path::Path, to: &std::path::Path) -> Result<()> {
    if !from.exists() {
        return Ok(());
    }
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| PipelineError::Internal(format!("copying {} to {}: {e}", from.display(), to.display())))
}

fn copy_dir(from: &std::path::Path, to: &std::path::Path) -> Result<()> {
    if !from.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            copy_file(&entry.path(), &dest)?;
        }
    }
    Ok(())
}
