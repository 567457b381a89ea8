use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::opml::export_opml;
use crate::storage::Feed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExportFormat {
    #[default]
    Opml,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Opml => "opml",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Resolves the file an export is written to.
///
/// A directory gets `myfeed-subscriptions.<ext>` inside it; a path without
/// an extension gets the format's extension appended.
pub fn export_path(path: &Path, format: ExportFormat) -> PathBuf {
    if path.is_dir() {
        return path.join(format!("myfeed-subscriptions.{}", format.extension()));
    }
    if path.extension().is_none() {
        return path.with_extension(format.extension());
    }
    path.to_path_buf()
}

/// Renders the subscription list in the requested format.
pub fn render(feeds: &[Feed], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Opml => export_opml(feeds),
        ExportFormat::Csv => Ok(export_csv(feeds)),
    }
}

/// One row per feed under a `Title,URL,Category,Added` header.
///
/// Every field is quoted; the added date is `YYYY-MM-DD` in UTC.
pub fn export_csv(feeds: &[Feed]) -> String {
    let mut out = String::from("Title,URL,Category,Added\n");
    for feed in feeds {
        let added = chrono::DateTime::from_timestamp(feed.created_at, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let row = [
            feed.title.as_str(),
            feed.url.as_str(),
            feed.category.as_str(),
            added.as_str(),
        ]
        .map(quote)
        .join(",");
        out.push_str(&row);
        out.push('\n');
    }
    out
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Writes `content` to `path` through a temporary sibling and a rename, so
/// the destination is never left half-written.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{suffix:016x}"));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temporary file '{}'", temp_path.display()))?;

    let written = std::io::Write::write_all(&mut file, content.as_bytes())
        .and_then(|()| file.sync_all());
    drop(file);

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to write '{}'", temp_path.display()));
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to rename '{}' to '{}'", temp_path.display(), path.display())
    })
}
