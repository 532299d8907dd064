//! Loading cleaned corpus files from disk.
//!
//! A persona's corpus directory holds plain-text files, each optionally
//! paired with a JSON sidecar of the same stem carrying `title` and `year`.
//! Files whose names start with `_` are working files and are skipped.

use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::chunking::SourceDocument;
use crate::types::EngineError;

#[derive(Debug, Default, Deserialize)]
struct SidecarMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_year")]
    year: Option<i32>,
}

/// Sidecars in the wild carry the year as a number or a string.
fn deserialize_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum YearField {
        Num(i64),
        Text(String),
    }

    Ok(match Option::<YearField>::deserialize(deserializer)? {
        Some(YearField::Num(n)) => i32::try_from(n).ok(),
        Some(YearField::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Reads every eligible `.txt` file under `dir`, in filename order. The
/// title falls back to the file stem when no sidecar provides one; a
/// malformed sidecar is logged and treated as absent.
pub async fn load_cleaned_corpus(dir: &Path) -> Result<Vec<SourceDocument>, EngineError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| EngineError::Ingestion(format!("reading {}: {err}", dir.display())))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| EngineError::Ingestion(err.to_string()))?
    {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.extension().is_some_and(|ext| ext == "txt") && !name.starts_with('_') {
            paths.push(path);
        }
    }
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| EngineError::Ingestion(format!("reading {}: {err}", path.display())))?;

        let sidecar_path = path.with_extension("json");
        let sidecar = match tokio::fs::read_to_string(&sidecar_path).await {
            Ok(raw) => serde_json::from_str::<SidecarMetadata>(&raw).unwrap_or_else(|err| {
                warn!(path = %sidecar_path.display(), error = %err, "malformed sidecar, ignoring");
                SidecarMetadata::default()
            }),
            Err(_) => SidecarMetadata::default(),
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        documents.push(SourceDocument {
            text,
            title: sidecar.title.unwrap_or(stem),
            year: sidecar.year,
        });
    }
    Ok(documents)
}
