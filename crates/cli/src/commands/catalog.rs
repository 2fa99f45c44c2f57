use std::path::{Path, PathBuf};

use shopassist_core::config::{AppConfig, LoadOptions};
use shopassist_core::domain::catalog::Catalog;

use super::{CommandResult, EXIT_CATALOG, EXIT_CONFIG};

const COMMAND: &str = "catalog";

/// Loads and normalizes the catalog. An explicit path bypasses config
/// loading entirely so a catalog can be checked without credentials.
pub fn run(path: Option<&Path>) -> CommandResult {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match configured_path() {
            Ok(path) => path,
            Err(result) => return result,
        },
    };

    let catalog = match Catalog::load_json(&path) {
        Ok(catalog) => catalog,
        Err(error) => {
            return CommandResult::failure(COMMAND, "catalog_invalid", error.to_string(), EXIT_CATALOG);
        }
    };

    match serde_json::to_value(catalog.entries()) {
        Ok(entries) => CommandResult::success_with_data(
            COMMAND,
            format!("loaded {} entries from `{}`", catalog.len(), path.display()),
            Some(entries),
        ),
        Err(error) => CommandResult::failure(COMMAND, "serialization", error.to_string(), 1),
    }
}

fn configured_path() -> Result<PathBuf, CommandResult> {
    AppConfig::load(LoadOptions::default()).map(|config| config.catalog.path).map_err(|error| {
        CommandResult::failure(
            COMMAND,
            "config_validation",
            format!("config validation failed: {error}"),
            EXIT_CONFIG,
        )
    })
}
