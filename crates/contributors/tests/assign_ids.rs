use std::fs;

use contributors::docid::assign_missing_ids;
use contributors::scan::{parse_frontmatter, scan_docs};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn assigns_ids_only_where_missing() {
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("app/docs");
    fs::create_dir_all(docs.join("zh")).unwrap();
    fs::write(docs.join("tagged.md"), "---\ndocId: existing1\ntitle: T\n---\nbody\n").unwrap();
    fs::write(docs.join("zh/plain.mdx"), "# no frontmatter\n").unwrap();
    fs::write(docs.join("untagged.markdown"), "---\ntitle: U\n---\nbody\n").unwrap();
    fs::write(docs.join("legacy.md"), "---\ndocId: Legacy-Id\n---\n").unwrap();
    fs::write(docs.join("notes.txt"), "ignored").unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let report = assign_missing_ids(dir.path(), "app/docs", false, &mut rng).unwrap();

    assert_eq!(report.already_tagged, 2);
    assert_eq!(report.suspicious, vec!["app/docs/legacy.md"]);
    let assigned: Vec<_> = report.assigned.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(assigned, vec!["app/docs/untagged.markdown", "app/docs/zh/plain.mdx"]);

    let untagged = fs::read_to_string(docs.join("untagged.markdown")).unwrap();
    let meta = parse_frontmatter(&untagged).unwrap();
    assert_eq!(meta.doc_id.as_deref(), Some(report.assigned[0].doc_id.as_str()));
    assert_eq!(meta.title.as_deref(), Some("U"));
    assert_eq!(
        fs::read_to_string(docs.join("tagged.md")).unwrap(),
        "---\ndocId: existing1\ntitle: T\n---\nbody\n"
    );

    let scan = scan_docs(dir.path(), "app/docs").unwrap();
    assert!(scan.skipped.is_empty());
    assert_eq!(scan.docs.len(), 4);

    let again = assign_missing_ids(dir.path(), "app/docs", false, &mut rng).unwrap();
    assert!(again.assigned.is_empty());
    assert_eq!(again.already_tagged, 4);
}

#[test]
fn dry_run_leaves_files_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("app/docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("a.md"), "# A\n").unwrap();

    let report =
        assign_missing_ids(dir.path(), "app/docs", true, &mut StdRng::seed_from_u64(1)).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(fs::read_to_string(docs.join("a.md")).unwrap(), "# A\n");
}

#[test]
fn broken_frontmatter_keeps_its_doc_id() {
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("app/docs");
    fs::create_dir_all(&docs).unwrap();
    let broken = "---\ntitle: [unclosed\ndocId: abcdefghijk123\n---\nbody\n";
    fs::write(docs.join("a.md"), broken).unwrap();
    fs::write(docs.join("b.md"), "# B\n").unwrap();

    let report =
        assign_missing_ids(dir.path(), "app/docs", false, &mut StdRng::seed_from_u64(3)).unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "app/docs/a.md");
    assert!(report.failed[0].reason.starts_with("invalid frontmatter"));
    let assigned: Vec<_> = report.assigned.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(assigned, vec!["app/docs/b.md"]);
    assert_eq!(fs::read_to_string(docs.join("a.md")).unwrap(), broken);

    let scan = scan_docs(dir.path(), "app/docs").unwrap();
    assert_eq!(scan.skipped.len(), 1);
    assert!(scan.skipped[0].reason.starts_with("invalid frontmatter"));
}
