//! Shared helpers for provider adapters: heuristic field mapping from an
//! arbitrary provider JSON payload (grounded on the original Python
//! `api/model.py::convert_to_searchresult`'s fallback-chain field lookups)
//! and the small amount of file-writing boilerplate every adapter repeats.

use std::path::Path;

use serde_json::Value;

use crate::context::WorkContext;
use crate::net::{ContentKind, HttpRequester};
use crate::provider::{Downloaded, ProviderError};

/// Returns the first present, non-empty string field among `keys`.
pub fn field_str(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(found) = value.get(*key) {
            if let Some(s) = found.as_str() {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            } else if let Some(n) = found.as_i64() {
                return Some(n.to_string());
            }
        }
    }
    None
}

/// Returns a list of creator names, accepting either a JSON array of
/// strings or a single scalar string field.
pub fn creators_from(value: &Value, keys: &[&str]) -> Vec<String> {
    for key in keys {
        match value.get(*key) {
            Some(Value::Array(items)) => {
                let names: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                if !names.is_empty() {
                    return names;
                }
            }
            Some(Value::String(s)) if !s.is_empty() => return vec![s.clone()],
            _ => {}
        }
    }
    Vec::new()
}

/// Streams `url` into `output_folder/objects/<file_name>`, classifying the
/// bytes into the right budget bucket by `kind`.
pub async fn download_object(
    requester: &HttpRequester,
    provider_key: &str,
    url: &str,
    settings: &crate::config::NetworkSettings,
    output_folder: &Path,
    file_name: &str,
    kind: ContentKind,
) -> Result<Downloaded, ProviderError> {
    let dest = output_folder.join("objects").join(file_name);
    let bytes = requester
        .download_file(url, Some(provider_key), settings, &dest, kind)
        .await?;

    let mut downloaded = Downloaded {
        files_written: 1,
        ..Downloaded::default()
    };
    match kind {
        ContentKind::Pdf | ContentKind::Epub => downloaded.bytes_pdfs = bytes,
        ContentKind::Image => downloaded.bytes_images = bytes,
    }
    Ok(downloaded)
}

/// Writes `payload` as pretty JSON under `output_folder/metadata/<file_name>`,
/// returning the byte count written (classified as metadata for budgeting).
pub async fn write_metadata(
    output_folder: &Path,
    file_name: &str,
    payload: &Value,
) -> Result<Downloaded, ProviderError> {
    let dir = output_folder.join("metadata");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| crate::net::NetworkError::io(&dir, source))?;
    let text = serde_json::to_vec_pretty(payload).unwrap_or_default();
    let dest = dir.join(file_name);
    tokio::fs::write(&dest, &text)
        .await
        .map_err(|source| crate::net::NetworkError::io(&dest, source))?;
    Ok(Downloaded {
        files_written: 0,
        bytes_metadata: text.len() as u64,
        ..Downloaded::default()
    })
}

/// File name for the primary object of a work, namespaced by file sequence
/// so repeated calls within one worker (e.g. `download_strategy=all`) don't
/// collide.
pub fn object_file_name(work_ctx: &WorkContext, extension: &str) -> String {
    format!("{}_{}.{}", work_ctx.work_stem, work_ctx.next_file_sequence(), extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ==== field_str ====

    #[test]
    fn picks_first_present_field() {
        let v = json!({"name": "A Title", "label": "ignored"});
        assert_eq!(field_str(&v, &["title", "name", "label"]), Some("A Title".to_string()));
    }

    #[test]
    fn falls_back_through_chain() {
        let v = json!({"label": "Fallback Title"});
        assert_eq!(field_str(&v, &["title", "name", "label"]), Some("Fallback Title".to_string()));
    }

    #[test]
    fn missing_field_is_none() {
        let v = json!({});
        assert_eq!(field_str(&v, &["title"]), None);
    }

    // ==== creators_from ====

    #[test]
    fn reads_array_of_creators() {
        let v = json!({"creators": ["Jane Doe", "John Smith"]});
        assert_eq!(creators_from(&v, &["creators"]), vec!["Jane Doe", "John Smith"]);
    }

    #[test]
    fn reads_scalar_creator() {
        let v = json!({"creator": "Jane Doe"});
        assert_eq!(creators_from(&v, &["creators", "creator"]), vec!["Jane Doe"]);
    }
}
