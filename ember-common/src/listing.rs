//! Output directory listing shared by the agent and host backends

use crate::messages::FileEntry;
use std::path::Path;

/// Regular, non-hidden files directly inside `dir`, sorted by name.
///
/// Symlinks and directories are skipped, as are names that are not UTF-8.
pub async fn list_output_files(dir: &Path) -> std::io::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        // file_type() does not follow symlinks.
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let size = entry.metadata().await?.len();
        entries.push(FileEntry::new(name, size));
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
