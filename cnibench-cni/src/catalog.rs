//! Plugin configuration catalog

use std::path::Path;

use cnibench_core::{Error, PluginId, Result};
use tokio::fs;
use tracing::{debug, warn};

/// List the plugins configured in `dir`, in lexical order
///
/// One identifier per regular file, with [`PluginId::CONF_SUFFIX`] stripped.
/// Subdirectories are skipped and not descended into. Files whose name is
/// not a usable identifier are skipped with a warning.
///
/// # Errors
/// Returns [`Error::DirectoryUnreadable`] if the directory cannot be read
pub async fn list(dir: impl AsRef<Path>) -> Result<Vec<PluginId>> {
    let dir = dir.as_ref();
    let unreadable = |source| Error::DirectoryUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(unreadable)?;
    let mut plugins = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        // file_type does not follow symlinks; a link to a directory is skipped below
        let file_type = entry.file_type().await.map_err(unreadable)?;
        if file_type.is_dir() {
            debug!(path = %entry.path().display(), "Skipping directory");
            continue;
        }
        if file_type.is_symlink() && fs::metadata(entry.path()).await.is_ok_and(|m| m.is_dir()) {
            continue;
        }

        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
            continue;
        };

        match PluginId::from_file_name(name) {
            Ok(plugin) => plugins.push(plugin),
            Err(e) => warn!(file = name, error = %e, "Skipping configuration file"),
        }
    }

    plugins.sort();
    plugins.dedup();
    Ok(plugins)
}
