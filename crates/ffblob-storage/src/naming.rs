//! Output object naming.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::reference::StoreReference;

/// Extension used when the input has none we can reuse.
pub const DEFAULT_EXTENSION: &str = "mp4";

const MAX_STEM_CHARS: usize = 64;

/// Extension of the input object if it is 1-5 ASCII alphanumerics.
pub fn output_extension(input: &StoreReference) -> String {
    input
        .file_name()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// `<stem>-<yyyymmddTHHMMSSZ>-<uuid>.<ext>` for an output derived from `input`.
pub fn generate_object_name(input: &StoreReference, now: DateTime<Utc>) -> String {
    let stem = input
        .file_name()
        .map(|name| match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        })
        .map(sanitize_stem)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());

    format!(
        "{}-{}-{}.{}",
        stem,
        now.format("%Y%m%dT%H%M%SZ"),
        Uuid::new_v4().simple(),
        output_extension(input)
    )
}

fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_CHARS)
        .collect()
}
