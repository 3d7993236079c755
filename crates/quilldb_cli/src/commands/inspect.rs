//! Inspect command implementation.

use super::Target;
use quilldb_core::ALL;
use serde::Serialize;
use std::io::Write;

/// Store summary.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store file path.
    pub path: String,
    /// Store file size in bytes.
    pub file_size: u64,
    /// Whether the store is protected by credentials.
    pub encrypted: bool,
    /// Journals replayed at open.
    pub replayed: usize,
    /// Journals discarded at open.
    pub discarded: usize,
    /// Per collection statistics, sorted by name.
    pub collections: Vec<CollectionStats>,
}

/// Statistics for one collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Number of documents.
    pub documents: usize,
    /// Number of distinct top-level fields across all documents.
    pub fields: usize,
}

/// Runs the inspect command.
pub fn run(
    target: &Target,
    json: bool,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = analyze(target)?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?;
        return Ok(());
    }

    writeln!(out, "Store: {}", result.path)?;
    writeln!(out, "  Size:        {} bytes", result.file_size)?;
    writeln!(out, "  Encrypted:   {}", if result.encrypted { "yes" } else { "no" })?;
    writeln!(
        out,
        "  Recovery:    {} replayed, {} discarded",
        result.replayed, result.discarded
    )?;
    writeln!(out)?;

    if result.collections.is_empty() {
        writeln!(out, "No collections")?;
        return Ok(());
    }

    writeln!(out, "{:<32} {:>10} {:>8}", "Collection", "Documents", "Fields")?;
    writeln!(out, "{}", "-".repeat(52))?;
    for stats in &result.collections {
        writeln!(out, "{:<32} {:>10} {:>8}", stats.name, stats.documents, stats.fields)?;
    }

    Ok(())
}

/// Collects statistics, then closes the database.
pub fn analyze(target: &Target) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let file_size = target.file_size()?;
    let db = target.open()?;
    let report = db.recovery_report();

    let mut collections = Vec::new();
    for name in db.list_collection_names()? {
        let docs = db.collection(&name)?.find(&ALL)?;
        let mut fields: Vec<&str> = docs
            .iter()
            .flat_map(|doc| doc.iter().map(|(key, _)| key))
            .collect();
        fields.sort_unstable();
        fields.dedup();
        collections.push(CollectionStats {
            fields: fields.len(),
            documents: docs.len(),
            name,
        });
    }

    let result = InspectResult {
        path: target.path.display().to_string(),
        file_size,
        encrypted: db.is_encrypted(),
        replayed: report.replayed,
        discarded: report.discarded,
        collections,
    };
    db.close()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::populated;

    #[test]
    fn counts_documents_per_collection() {
        let (_dir, target) = populated(None);
        let result = analyze(&target).unwrap();

        assert!(!result.encrypted);
        assert!(result.file_size > 0);
        let names: Vec<_> = result.collections.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["empty", "people"]);
        assert_eq!(result.collections[0].documents, 0);
        assert_eq!(result.collections[1].documents, 2);
        // _id, name, tags
        assert_eq!(result.collections[1].fields, 3);
    }

    #[test]
    fn json_output_parses() {
        let (_dir, target) = populated(Some(("u", "p")));
        let mut out = Vec::new();
        run(&target, true, &mut out).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["encrypted"], true);
        assert_eq!(parsed["collections"][1]["documents"], 2);
    }

    #[test]
    fn text_output_lists_collections() {
        let (_dir, target) = populated(None);
        let mut out = Vec::new();
        run(&target, false, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("people"));
        assert!(text.contains("Encrypted:   no"));
    }

    #[test]
    fn protected_store_needs_credentials() {
        let (_dir, mut target) = populated(Some(("u", "p")));
        target.credentials = None;
        assert!(analyze(&target).is_err());
    }
}
