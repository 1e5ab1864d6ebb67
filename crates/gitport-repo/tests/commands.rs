//! End-to-end command flows against temporary repositories.

use gitport_repo::{CommitOptions, InitOptions, Repository};

fn repo_with_commit() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), &InitOptions::default()).unwrap();
    std::fs::write(dir.path().join("README.md"), "# project\n").unwrap();
    repo.add(&["README.md"]).unwrap();
    repo.commit("initial commit", &CommitOptions::default())
        .unwrap();
    (dir, repo)
}

#[test]
fn add_commit_log_roundtrip() {
    let (dir, repo) = repo_with_commit();

    std::fs::write(dir.path().join("src.rs"), "fn main() {}\n").unwrap();
    repo.add(&["src.rs"]).unwrap();
    let second = repo.commit("add source", &CommitOptions::default()).unwrap();

    let log = repo.log(None, None).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].oid, second);
    assert_eq!(log[0].commit.summary().to_string(), "add source");
    assert_eq!(log[1].commit.summary().to_string(), "initial commit");
    assert_eq!(log[0].commit.parents, vec![log[1].oid]);
}

#[test]
fn lightweight_tag_lifecycle() {
    let (_dir, repo) = repo_with_commit();
    let head = repo.resolve_ref("HEAD").unwrap();

    // Tagging points the ref at HEAD.
    let tagged = repo.tag("latest", None, false).unwrap();
    assert_eq!(tagged, head);
    assert_eq!(repo.resolve_ref("refs/tags/latest").unwrap(), head);
    assert_eq!(repo.resolve_ref("latest").unwrap(), head);

    // A second tag without force fails with AlreadyExists.
    let err = repo.tag("latest", None, false).unwrap_err();
    assert_eq!(err.code(), "AlreadyExistsError");

    // With force it succeeds.
    repo.tag("latest", None, true).unwrap();
    assert_eq!(repo.resolve_ref("refs/tags/latest").unwrap(), head);

    repo.delete_tag("latest").unwrap();
    assert!(repo.resolve_ref("refs/tags/latest").is_err());
}

#[test]
fn annotated_tag_creates_tag_object() {
    let (_dir, repo) = repo_with_commit();
    let head = repo.resolve_ref("HEAD").unwrap();

    let tag_oid = repo
        .tag_annotated("v1.0.0", "Release 1.0.0", None, false)
        .unwrap();
    assert_ne!(tag_oid, head);

    let (_, tag) = repo.read_tag("v1.0.0").unwrap();
    assert_eq!(tag.object, head);
    assert_eq!(tag.name.to_string(), "v1.0.0");
    assert_eq!(tag.message.to_string(), "Release 1.0.0\n");

    // resolve_ref returns the tag object; read_commit peels it.
    let (peeled, _) = repo.read_commit("v1.0.0").unwrap();
    assert_eq!(peeled, head);
}

#[test]
fn invalid_tag_name_carries_suggestion() {
    let (_dir, repo) = repo_with_commit();
    let err = repo.tag("bad name", None, false).unwrap_err();
    assert_eq!(err.code(), "InvalidRefNameError");
    assert!(err.to_string().contains("bad-name"));
}

#[test]
fn branch_create_switch_delete() {
    let (dir, repo) = repo_with_commit();
    let main_tip = repo.resolve_ref("HEAD").unwrap();

    repo.branch("feature", None).unwrap();
    assert_eq!(repo.resolve_ref("feature").unwrap(), main_tip);
    assert_eq!(repo.list_branches().unwrap(), vec!["feature", "main"]);

    repo.switch("feature").unwrap();
    assert_eq!(
        repo.current_branch().unwrap().unwrap().as_str(),
        "refs/heads/feature"
    );

    std::fs::write(dir.path().join("feature.txt"), "work\n").unwrap();
    repo.add(&["feature.txt"]).unwrap();
    repo.commit("feature work", &CommitOptions::default())
        .unwrap();

    repo.switch("main").unwrap();
    assert!(!dir.path().join("feature.txt").exists());

    // The checked-out branch cannot be deleted; others can.
    assert!(repo.delete_branch("main").is_err());
    repo.delete_branch("feature").unwrap();
    assert!(repo.resolve_ref("feature").is_err());
}

#[test]
fn status_reports_all_buckets() {
    let (dir, repo) = repo_with_commit();

    // Staged: a new file added to the index.
    std::fs::write(dir.path().join("staged.txt"), "staged\n").unwrap();
    repo.add(&["staged.txt"]).unwrap();
    // Unstaged: a tracked file modified in the worktree.
    std::fs::write(dir.path().join("README.md"), "# changed\n").unwrap();
    // Untracked.
    std::fs::write(dir.path().join("scratch.tmp"), "x").unwrap();
    // Ignored.
    std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
    std::fs::write(dir.path().join("noise.log"), "x").unwrap();

    let status = repo.status().unwrap();
    assert_eq!(status.branch.as_deref(), Some("main"));
    assert!(status
        .staged
        .iter()
        .any(|e| e.path.to_string() == "staged.txt"));
    assert!(status
        .unstaged
        .iter()
        .any(|e| e.path.to_string() == "README.md"));
    let untracked: Vec<String> = status.untracked.iter().map(|p| p.to_string()).collect();
    assert!(untracked.contains(&"scratch.tmp".to_string()));
    assert!(untracked.contains(&".gitignore".to_string()));
    assert!(!untracked.contains(&"noise.log".to_string()));
}

#[test]
fn empty_commit_rejected_without_flag() {
    let (_dir, repo) = repo_with_commit();
    let err = repo
        .commit("nothing changed", &CommitOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "EmptyCommitError");

    repo.commit(
        "deliberate empty",
        &CommitOptions {
            allow_empty: true,
            ..Default::default()
        },
    )
    .unwrap();
}

#[test]
fn short_oid_resolution() {
    let (_dir, repo) = repo_with_commit();
    let head = repo.resolve_ref("HEAD").unwrap();
    let hex = head.to_hex();
    assert_eq!(repo.resolve_ref(&hex[..8]).unwrap(), head);
    assert_eq!(repo.expand_oid(&hex[..8]).unwrap(), head);
}

#[test]
fn rm_removes_file_and_entry() {
    let (dir, repo) = repo_with_commit();
    repo.rm(&["README.md"]).unwrap();
    assert!(!dir.path().join("README.md").exists());
    let index = repo.index().unwrap();
    assert!(index.is_empty());
    assert_eq!(repo.rm(&["README.md"]).unwrap_err().code(), "NotFoundError");
}
