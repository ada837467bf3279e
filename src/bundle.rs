use crate::results::cumulative_result;
use crate::roster::list_students;
use anyhow::{anyhow, Context};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const BUNDLE_FORMAT_V1: &str = "resultsd-cumulative-v1";

#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub bundle_format: String,
    pub student_count: usize,
    pub entry_count: usize,
}

/// Writes one cumulative session result per active student of the class,
/// plus a manifest with a SHA-256 per entry.
pub fn export_cumulative_bundle(
    conn: &Connection,
    class_id: &str,
    session_id: &str,
    out_path: &Path,
) -> anyhow::Result<BundleSummary> {
    let class_name: Option<String> = conn
        .query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(class_name) = class_name else {
        return Err(anyhow!("class not found: {}", class_id));
    };
    let session_name: Option<String> = conn
        .query_row(
            "SELECT name FROM academic_sessions WHERE id = ?",
            [session_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(session_name) = session_name else {
        return Err(anyhow!("session not found: {}", session_id));
    };

    let students: Vec<_> = list_students(conn, class_id)?
        .into_iter()
        .filter(|s| s.active)
        .collect();

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::with_capacity(students.len());
    let mut used_stems: HashSet<String> = HashSet::new();
    for student in &students {
        let report = cumulative_result(conn, &student.id, session_id)
            .with_context(|| format!("cumulative result for student {}", student.id))?;
        let mut stem = student
            .admission_number
            .as_deref()
            .map(entry_stem)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| student.id.clone());
        // `JSS/1` and `JSS_1` sanitize to the same stem.
        if used_stems.contains(&stem) {
            stem = format!("{}-{}", stem, student.id);
        }
        used_stems.insert(stem.clone());
        let name = format!("students/{}.json", stem);
        let body = serde_json::to_vec_pretty(&report)
            .context("failed to serialize cumulative result")?;

        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", name))?;
        zip.write_all(&body)
            .with_context(|| format!("failed to write entry {}", name))?;
        entries.push(json!({
            "name": name,
            "studentId": student.id,
            "sha256": format!("{:x}", Sha256::digest(&body)),
        }));
    }

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "class": { "id": class_id, "name": class_name },
        "session": { "id": session_id, "name": session_name },
        "entries": entries,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    info!(
        class = %class_id,
        session = %session_id,
        students = students.len(),
        path = %out_path.to_string_lossy(),
        "cumulative bundle exported"
    );
    Ok(BundleSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        student_count: students.len(),
        entry_count: students.len() + 1,
    })
}

/// Keeps admission numbers like `JSS/2024/017` usable as file names.
fn entry_stem(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
