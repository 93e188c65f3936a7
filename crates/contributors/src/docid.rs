use std::collections::HashSet;
use std::path::Path;

use rand::Rng;
use tracing::{info, warn};

use crate::scan::{
    looks_like_generated_id, parse_frontmatter, relative_posix, split_frontmatter, walk_doc_files,
    ScanError, SkippedFile,
};

const ID_LENGTH: usize = 24;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedId {
    pub path: String,
    pub doc_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignReport {
    pub assigned: Vec<AssignedId>,
    pub already_tagged: usize,
    /// Paths whose existing docId does not look generated; left untouched.
    pub suspicious: Vec<String>,
    /// Files that could not be tagged safely; left untouched.
    pub failed: Vec<SkippedFile>,
    pub dry_run: bool,
}

/// Lowercase id starting with a letter, unique within `existing`.
pub fn generate_doc_id<R: Rng + ?Sized>(rng: &mut R, existing: &HashSet<String>) -> String {
    loop {
        let mut id = String::with_capacity(ID_LENGTH);
        id.push(char::from(LETTERS[rng.gen_range(0..LETTERS.len())]));
        for _ in 1..ID_LENGTH {
            id.push(char::from(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())]));
        }
        if !existing.contains(&id) {
            return id;
        }
    }
}

fn is_blank_yaml_value(value: &str) -> bool {
    matches!(value.trim(), "" | "\"\"" | "''" | "~" | "null")
}

/// Writes `docId: <id>` into the frontmatter, creating the block when absent.
/// A blank `docId:` line is filled in place. Returns `None` when the
/// frontmatter already carries a docId value, which is never replaced.
pub fn insert_doc_id(content: &str, doc_id: &str) -> Option<String> {
    let Some(span) = split_frontmatter(content) else {
        return Some(format!("---\ndocId: {doc_id}\n---\n\n{content}"));
    };
    let yaml_start = span.yaml.start;
    let newline = if content[..yaml_start].ends_with("\r\n") {
        "\r\n"
    } else {
        "\n"
    };

    let mut offset = yaml_start;
    for line in content[span.yaml].split_inclusive('\n') {
        if let Some(value) = line.strip_prefix("docId:") {
            if !is_blank_yaml_value(value) {
                return None;
            }
            let end = offset + line.len();
            return Some(format!(
                "{}docId: {doc_id}{newline}{}",
                &content[..offset],
                &content[end..]
            ));
        }
        offset += line.len();
    }

    Some(format!(
        "{}docId: {doc_id}{newline}{}",
        &content[..yaml_start],
        &content[yaml_start..]
    ))
}

/// Gives every doc under `repo_root/docs_dir` without a docId a fresh one.
pub fn assign_missing_ids<R: Rng + ?Sized>(
    repo_root: &Path,
    docs_dir: &str,
    dry_run: bool,
    rng: &mut R,
) -> Result<AssignReport, ScanError> {
    let files = walk_doc_files(repo_root, docs_dir)?;
    let mut contents = Vec::with_capacity(files.len());
    let mut existing = HashSet::new();
    let mut report = AssignReport {
        dry_run,
        ..Default::default()
    };

    for path in files {
        let content = std::fs::read_to_string(&path).map_err(|source| ScanError::Read {
            path: path.clone(),
            source,
        })?;
        let relative = relative_posix(repo_root, &path);
        let meta = match parse_frontmatter(&content) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %relative, error = %err, "invalid frontmatter; file left untouched");
                report.failed.push(SkippedFile {
                    path: relative,
                    reason: format!("invalid frontmatter: {err}"),
                });
                continue;
            }
        };
        if let Some(doc_id) = &meta.doc_id {
            if !looks_like_generated_id(doc_id) {
                warn!(path = %relative, doc_id = %doc_id, "existing docId does not look generated");
                report.suspicious.push(relative.clone());
            }
            existing.insert(doc_id.clone());
        }
        contents.push((path, relative, content, meta.doc_id.is_some()));
    }

    for (path, relative, content, tagged) in contents {
        if tagged {
            report.already_tagged += 1;
            continue;
        }
        let doc_id = generate_doc_id(rng, &existing);
        let Some(updated) = insert_doc_id(&content, &doc_id) else {
            warn!(path = %relative, "docId line present but unreadable; file left untouched");
            report.failed.push(SkippedFile {
                path: relative,
                reason: "existing docId line could not be read".to_string(),
            });
            continue;
        };
        existing.insert(doc_id.clone());
        if !dry_run {
            std::fs::write(&path, updated).map_err(|source| ScanError::Write {
                path: path.clone(),
                source,
            })?;
        }
        info!(path = %relative, doc_id = %doc_id, dry_run, "assigned docId");
        report.assigned.push(AssignedId {
            path: relative,
            doc_id,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_ids_have_the_expected_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let existing = HashSet::new();
        for _ in 0..50 {
            let id = generate_doc_id(&mut rng, &existing);
            assert_eq!(id.len(), ID_LENGTH);
            assert!(looks_like_generated_id(&id), "{id}");
        }
    }

    #[test]
    fn generated_ids_avoid_existing_ones() {
        let taken = generate_doc_id(&mut StdRng::seed_from_u64(1), &HashSet::new());
        let existing = HashSet::from([taken.clone()]);
        let next = generate_doc_id(&mut StdRng::seed_from_u64(1), &existing);
        assert_ne!(next, taken);
    }

    #[test]
    fn inserts_into_existing_frontmatter() {
        let updated = insert_doc_id("---\ntitle: Intro\n---\nbody\n", "abc123").unwrap();
        assert_eq!(updated, "---\ndocId: abc123\ntitle: Intro\n---\nbody\n");
        assert_eq!(parse_frontmatter(&updated).unwrap().title.as_deref(), Some("Intro"));
    }

    #[test]
    fn creates_frontmatter_when_missing() {
        let updated = insert_doc_id("# Heading\n", "abc123").unwrap();
        assert_eq!(updated, "---\ndocId: abc123\n---\n\n# Heading\n");
        assert_eq!(parse_frontmatter(&updated).unwrap().doc_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn replaces_a_blank_doc_id_line() {
        let updated = insert_doc_id("---\ntitle: T\ndocId: \"\"\n---\n", "abc123").unwrap();
        assert_eq!(updated, "---\ntitle: T\ndocId: abc123\n---\n");
    }

    #[test]
    fn never_replaces_a_doc_id_value() {
        assert_eq!(insert_doc_id("---\ndocId: keepme1\n---\n", "abc123"), None);
        assert_eq!(
            insert_doc_id("---\ntitle: [broken\ndocId: keepme1\n---\n", "abc123"),
            None
        );
    }

    #[test]
    fn keeps_crlf_line_endings() {
        let updated = insert_doc_id("---\r\ntitle: T\r\n---\r\n", "abc123").unwrap();
        assert_eq!(updated, "---\r\ndocId: abc123\r\ntitle: T\r\n---\r\n");
    }
}
