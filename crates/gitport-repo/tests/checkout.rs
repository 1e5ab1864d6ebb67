//! Checkout behaviour: restores, clobber guards, branch switching.

use gitport_repo::{CheckoutOptions, CommitOptions, InitOptions, Repository};

fn repo_with_files() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), &InitOptions::default()).unwrap();
    std::fs::write(dir.path().join("kept.txt"), "kept content\n").unwrap();
    std::fs::create_dir_all(dir.path().join("nested")).unwrap();
    std::fs::write(dir.path().join("nested/deep.txt"), "deep\n").unwrap();
    repo.add(&["kept.txt", "nested/deep.txt"]).unwrap();
    repo.commit("base", &CommitOptions::default()).unwrap();
    (dir, repo)
}

#[test]
fn force_checkout_restores_missing_files() {
    let (dir, repo) = repo_with_files();

    std::fs::remove_file(dir.path().join("kept.txt")).unwrap();
    std::fs::remove_file(dir.path().join("nested/deep.txt")).unwrap();
    std::fs::remove_dir(dir.path().join("nested")).unwrap();

    repo.checkout("HEAD", CheckoutOptions { force: true }).unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("kept.txt")).unwrap(),
        "kept content\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("nested/deep.txt")).unwrap(),
        "deep\n"
    );
}

#[test]
fn switching_branches_refuses_to_clobber_local_edits() {
    let (dir, repo) = repo_with_files();

    repo.branch("topic", None).unwrap();
    repo.switch("topic").unwrap();
    std::fs::write(dir.path().join("kept.txt"), "topic version\n").unwrap();
    repo.add(&["kept.txt"]).unwrap();
    repo.commit("topic edit", &CommitOptions::default()).unwrap();

    repo.switch("main").unwrap();
    // A dirty local edit on the target path blocks the switch.
    std::fs::write(dir.path().join("kept.txt"), "local uncommitted\n").unwrap();
    let err = repo.checkout("topic", CheckoutOptions::default()).unwrap_err();
    assert_eq!(err.code(), "CheckoutConflictError");

    // Force wins and installs the branch content.
    repo.checkout("topic", CheckoutOptions { force: true }).unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("kept.txt")).unwrap(),
        "topic version\n"
    );
}

#[test]
fn checkout_commit_detaches_head() {
    let (dir, repo) = repo_with_files();
    let first = repo.resolve_ref("HEAD").unwrap();

    std::fs::write(dir.path().join("second.txt"), "2\n").unwrap();
    repo.add(&["second.txt"]).unwrap();
    repo.commit("second", &CommitOptions::default()).unwrap();

    repo.checkout(&first.to_hex(), CheckoutOptions { force: true })
        .unwrap();
    assert!(repo.current_branch().unwrap().is_none());
    assert_eq!(repo.resolve_ref("HEAD").unwrap(), first);
    assert!(!dir.path().join("second.txt").exists());

    // Switching back re-attaches and restores the file.
    repo.switch("main").unwrap();
    assert!(dir.path().join("second.txt").exists());
}

#[test]
fn restore_overwrites_single_path() {
    let (dir, repo) = repo_with_files();
    std::fs::write(dir.path().join("kept.txt"), "scribbled\n").unwrap();
    repo.restore(&["kept.txt"]).unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("kept.txt")).unwrap(),
        "kept content\n"
    );
    assert_eq!(
        repo.restore(&["never-tracked.txt"]).unwrap_err().code(),
        "NotFoundError"
    );
}
