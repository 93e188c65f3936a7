use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use walkdir::WalkDir;

const DOC_EXTENSIONS: &[&str] = &["md", "mdx", "markdown"];

static DOC_ID_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9]{1,31}$").expect("doc id pattern"));

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("docs directory {0} does not exist")]
    MissingDir(PathBuf),
    #[error("walking {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocFile {
    pub doc_id: String,
    pub title: Option<String>,
    /// Repository-relative, `/`-separated.
    pub repo_path: String,
    pub abs_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub docs: Vec<DocFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Every file sharing a docId, in scan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocGroup {
    pub doc_id: String,
    pub title: Option<String>,
    pub paths: Vec<String>,
}

impl DocGroup {
    pub fn primary_path(&self) -> Option<&str> {
        self.paths.first().map(String::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    #[serde(default, rename = "docId")]
    doc_id: Option<serde_yaml::Value>,
    #[serde(default)]
    title: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocMeta {
    pub doc_id: Option<String>,
    pub title: Option<String>,
}

/// Byte ranges of a leading `---` fenced block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FrontmatterSpan {
    pub yaml: Range<usize>,
    pub body_start: usize,
}

pub(crate) fn split_frontmatter(content: &str) -> Option<FrontmatterSpan> {
    let content_start = content.strip_prefix('\u{feff}').map_or(0, |_| 3);
    let rest = &content[content_start..];
    let first_line_end = rest.find('\n')?;
    if rest[..first_line_end].trim_end() != "---" {
        return None;
    }
    let yaml_start = content_start + first_line_end + 1;
    let mut offset = yaml_start;
    for line in content[yaml_start..].split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(FrontmatterSpan {
                yaml: yaml_start..offset,
                body_start: offset + line.len(),
            });
        }
        offset += line.len();
    }
    None
}

/// Reads `docId` and `title` from the leading frontmatter block. A file
/// without frontmatter yields empty metadata; a block that is not valid YAML
/// is an error.
pub fn parse_frontmatter(content: &str) -> Result<DocMeta, serde_yaml::Error> {
    let Some(span) = split_frontmatter(content) else {
        return Ok(DocMeta::default());
    };
    let yaml = &content[span.yaml];
    if yaml.trim().is_empty() {
        return Ok(DocMeta::default());
    }
    let parsed: Option<Frontmatter> = serde_yaml::from_str(yaml)?;
    let parsed = parsed.unwrap_or_default();
    Ok(DocMeta {
        doc_id: parsed.doc_id.as_ref().and_then(scalar_string),
        title: parsed.title.as_ref().and_then(scalar_string),
    })
}

fn scalar_string(value: &serde_yaml::Value) -> Option<String> {
    let text = match value {
        serde_yaml::Value::String(s) => s.trim().to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub fn is_doc_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| DOC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn looks_like_generated_id(doc_id: &str) -> bool {
    DOC_ID_SHAPE.is_match(doc_id)
}

pub(crate) fn relative_posix(repo_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(repo_root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Doc files under `repo_root/docs_dir`, sorted by repository-relative path.
pub(crate) fn walk_doc_files(repo_root: &Path, docs_dir: &str) -> Result<Vec<PathBuf>, ScanError> {
    let root = repo_root.join(docs_dir);
    if !root.is_dir() {
        return Err(ScanError::MissingDir(root));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(false) {
        let entry = entry.map_err(|source| ScanError::Walk {
            path: root.clone(),
            source,
        })?;
        if entry.file_type().is_file() && is_doc_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort_by_key(|path| relative_posix(repo_root, path));
    Ok(files)
}

pub fn scan_docs(repo_root: &Path, docs_dir: &str) -> Result<ScanResult, ScanError> {
    let mut result = ScanResult::default();
    for abs_path in walk_doc_files(repo_root, docs_dir)? {
        let content = std::fs::read_to_string(&abs_path).map_err(|source| ScanError::Read {
            path: abs_path.clone(),
            source,
        })?;
        let repo_path = relative_posix(repo_root, &abs_path);
        let meta = match parse_frontmatter(&content) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %repo_path, error = %err, "skipping doc with invalid frontmatter");
                result.skipped.push(SkippedFile {
                    path: repo_path,
                    reason: format!("invalid frontmatter: {err}"),
                });
                continue;
            }
        };
        match meta.doc_id {
            Some(doc_id) => {
                if !looks_like_generated_id(&doc_id) {
                    warn!(path = %repo_path, doc_id = %doc_id, "docId does not look like a generated id");
                }
                result.docs.push(DocFile {
                    doc_id,
                    title: meta.title,
                    repo_path,
                    abs_path,
                });
            }
            None => {
                warn!(path = %repo_path, "skipping doc without docId");
                result.skipped.push(SkippedFile {
                    path: repo_path,
                    reason: "missing docId".to_string(),
                });
            }
        }
    }
    Ok(result)
}

/// Groups scanned files by docId. Groups keep the order in which their first
/// path was scanned, so the report follows file path order.
pub fn group_by_doc_id(docs: &[DocFile]) -> Vec<DocGroup> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<DocGroup> = Vec::new();
    for doc in docs {
        let slot = *index.entry(doc.doc_id.as_str()).or_insert_with(|| {
            groups.push(DocGroup {
                doc_id: doc.doc_id.clone(),
                title: None,
                paths: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        if group.title.is_none() {
            group.title = doc.title.clone();
        }
        if !group.paths.contains(&doc.repo_path) {
            group.paths.push(doc.repo_path.clone());
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_doc_id_and_title() {
        let meta = parse_frontmatter("---\ntitle: Intro\ndocId: abc123\n---\n# Body\n").unwrap();
        assert_eq!(meta.doc_id.as_deref(), Some("abc123"));
        assert_eq!(meta.title.as_deref(), Some("Intro"));
    }

    #[test]
    fn missing_frontmatter_yields_nothing() {
        assert_eq!(parse_frontmatter("# No frontmatter\n").unwrap(), DocMeta::default());
        assert_eq!(parse_frontmatter("---\ntitle: open\n").unwrap(), DocMeta::default());
        assert_eq!(parse_frontmatter("---\n---\nbody\n").unwrap(), DocMeta::default());
        assert_eq!(parse_frontmatter("---\ndocId: \"  \"\n---\n").unwrap().doc_id, None);
    }

    #[test]
    fn broken_frontmatter_is_an_error() {
        assert!(parse_frontmatter("---\ntitle: [unclosed\ndocId: abc123\n---\n").is_err());
    }

    #[test]
    fn frontmatter_split_reports_body_offset() {
        let content = "---\r\ndocId: x1\r\n---\r\nbody";
        let span = split_frontmatter(content).unwrap();
        assert_eq!(&content[span.yaml], "docId: x1\r\n");
        assert_eq!(&content[span.body_start..], "body");
    }

    #[test]
    fn generated_id_shape() {
        assert!(looks_like_generated_id("k3x9q2m7a1b4c8d0e5f6g7h8"));
        assert!(!looks_like_generated_id("Intro"));
        assert!(!looks_like_generated_id("1abc"));
    }

    #[test]
    fn groups_collect_every_path_for_a_doc() {
        let file = |id: &str, path: &str, title: Option<&str>| DocFile {
            doc_id: id.into(),
            title: title.map(Into::into),
            repo_path: path.into(),
            abs_path: PathBuf::from(path),
        };
        let groups = group_by_doc_id(&[
            file("b", "app/docs/b.md", None),
            file("a", "app/docs/a.md", None),
            file("a", "app/docs/zh/a.mdx", Some("A")),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].doc_id, "b");
        assert_eq!(groups[1].doc_id, "a");
        assert_eq!(groups[1].paths, vec!["app/docs/a.md", "app/docs/zh/a.mdx"]);
        assert_eq!(groups[1].title.as_deref(), Some("A"));
        assert_eq!(groups[1].primary_path(), Some("app/docs/a.md"));
    }
}
