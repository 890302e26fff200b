//! One module per command group: each holds the `cmd_*` functions its
//! `Commands` variants dispatch to.

pub mod backup;
pub mod bulk_cmd;
pub mod download;
pub mod export_cmd;
pub mod import_cmd;
pub mod list_cmd;
pub mod maintenance;
pub mod process;
pub mod search_cmd;
pub mod service_cmd;
pub mod setup;
