//! Work identity and directory naming (§3, §8 property 1).
//!
//! Grounded on the original Python `main/work_manager.py::compute_work_id` /
//! `compute_work_dir` for the exact formula, and the teacher's
//! `project/mod.rs` for the segment-sanitisation idiom (illegal chars
//! mapped to `-`, runs collapsed, length-capped).

use sha1::{Digest, Sha1};

use crate::normalize::normalize;

/// Title slug length cap used when building a work directory name (§3).
pub const DEFAULT_TITLE_SLUG_MAX_LEN: usize = 80;

/// `sha1_hex(normalise(title) || "|" || normalise(creator))[:10]` (§3).
/// Deterministic and invariant to case/punctuation variation covered by
/// the normaliser (§8 property 1).
pub fn compute_work_id(title: &str, creator: Option<&str>) -> String {
    let normalized_title = normalize(title);
    let normalized_creator = creator.map(normalize).unwrap_or_default();
    let input = format!("{normalized_title}|{normalized_creator}");
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let full_hex = hex_encode(&digest);
    full_hex[..10].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Replaces any run of non-alphanumeric characters with a single `_`,
/// inserts a boundary `_` at every letter/digit transition (e.g. `E0001`
/// becomes `e_0001`), collapses the underscore runs that introduces,
/// lowercases, and trims leading/trailing `_`.
fn snake_segment(s: &str) -> String {
    let mut collapsed = String::with_capacity(s.len());
    let mut prev_underscore = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            collapsed.push(c);
            prev_underscore = false;
        } else if !prev_underscore {
            collapsed.push('_');
            prev_underscore = true;
        }
    }

    let mut with_boundaries = String::with_capacity(collapsed.len() * 2);
    let mut prev: Option<char> = None;
    for c in collapsed.chars() {
        if let Some(p) = prev {
            if (p.is_ascii_alphabetic() && c.is_ascii_digit()) || (p.is_ascii_digit() && c.is_ascii_alphabetic()) {
                with_boundaries.push('_');
            }
        }
        with_boundaries.push(c);
        prev = Some(c);
    }

    let mut out = String::with_capacity(with_boundaries.len());
    let mut prev_underscore = false;
    for c in with_boundaries.chars() {
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c.to_ascii_lowercase());
            prev_underscore = false;
        }
    }
    out.trim_matches('_').to_string()
}

fn truncate_chars(s: &str, max_len: usize) -> String {
    s.chars().take(max_len).collect()
}

/// `{snake_entry_id}_{snake_title_truncated}` when `entry_id` is present,
/// else `{snake_title_truncated}` (§3). Idempotent: recomputing from the
/// same inputs yields the same name.
pub fn compute_work_dir_name(entry_id: Option<&str>, title: &str, title_slug_max_len: usize) -> String {
    let title_slug = truncate_chars(&snake_segment(title), title_slug_max_len);
    match entry_id {
        Some(id) if !id.is_empty() => format!("{}_{}", snake_segment(id), title_slug),
        _ => title_slug,
    }
}
