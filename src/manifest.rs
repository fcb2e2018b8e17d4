use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One row of the download manifest.
///
/// Records are immutable once loaded; `subcategory` is optional and an empty
/// CSV cell is normalized to `None`.
#[derive(Debug, Clone, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
}

impl PageRecord {
    pub fn new(url: &str, title: &str, category: &str, subcategory: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            subcategory: subcategory.map(str::to_string),
        }
    }

    /// Filesystem-safe variant of the title. Characters that are not portable
    /// across filesystems are replaced with underscores.
    pub fn safe_title(&self) -> String {
        self.title
            .chars()
            .map(|c| match c {
                '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
                c => c,
            })
            .collect()
    }

    /// Deterministic save location:
    /// `{output_root}/{category}[/{subcategory}]/{safe_title}.html`.
    ///
    /// Two records with the same category/subcategory/title collide here; the
    /// second one is skipped at fetch time, never overwritten.
    pub fn save_path(&self, output_root: &Path) -> PathBuf {
        let mut path = output_root.join(&self.category);
        if let Some(subcategory) = &self.subcategory {
            path.push(subcategory);
        }
        path.join(format!("{}.html", self.safe_title()))
    }
}

/// Load the manifest CSV into ordered records.
///
/// Requires `url`, `title` and `category` columns; `subcategory` is optional.
/// Any missing file, missing required column or malformed row is fatal for
/// the whole run.
pub fn load_manifest(path: &Path) -> Result<Vec<PageRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open manifest file: {}", path.display()))?;

    let mut records = Vec::new();
    for (index, row) in reader.deserialize().enumerate() {
        let mut record: PageRecord = row.with_context(|| {
            format!("Malformed manifest row {} in {}", index + 1, path.display())
        })?;
        if record.subcategory.as_deref().is_some_and(|s| s.trim().is_empty()) {
            record.subcategory = None;
        }
        records.push(record);
    }

    Ok(records)
}
