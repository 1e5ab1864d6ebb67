//! Merge and cherry-pick flows, clean and conflicted.

use bstr::BStr;
use gitport_index::Stage;
use gitport_repo::{
    CommitOptions, InitOptions, MergeCommandOptions, MergeOutcome, Repository,
};

fn write_and_commit(
    dir: &tempfile::TempDir,
    repo: &Repository,
    path: &str,
    content: &str,
    message: &str,
) -> gitport_hash::Oid {
    std::fs::write(dir.path().join(path), content).unwrap();
    repo.add(&[path]).unwrap();
    repo.commit(message, &CommitOptions::default()).unwrap()
}

fn base_repo() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), &InitOptions::default()).unwrap();
    write_and_commit(&dir, &repo, "shared.txt", "line one\nline two\nline three\n", "base");
    (dir, repo)
}

#[test]
fn fast_forward_moves_ref_without_commit() {
    let (dir, repo) = base_repo();
    let base_tip = repo.resolve_ref("HEAD").unwrap();

    repo.branch("topic", None).unwrap();
    repo.switch("topic").unwrap();
    let topic_tip = write_and_commit(&dir, &repo, "new.txt", "topic\n", "topic work");

    repo.switch("main").unwrap();
    match repo.merge("topic", MergeCommandOptions::default()).unwrap() {
        MergeOutcome::FastForward(oid) => assert_eq!(oid, topic_tip),
        other => panic!("expected fast-forward, got {other:?}"),
    }
    assert_eq!(repo.resolve_ref("main").unwrap(), topic_tip);
    assert!(dir.path().join("new.txt").exists());
    assert_ne!(base_tip, topic_tip);
    // ORIG_HEAD records where we were.
    assert_eq!(repo.orig_head().unwrap(), Some(base_tip));
}

#[test]
fn no_ff_creates_merge_commit() {
    let (dir, repo) = base_repo();
    repo.branch("topic", None).unwrap();
    repo.switch("topic").unwrap();
    write_and_commit(&dir, &repo, "new.txt", "topic\n", "topic work");
    repo.switch("main").unwrap();

    match repo
        .merge(
            "topic",
            MergeCommandOptions {
                no_ff: true,
                ..Default::default()
            },
        )
        .unwrap()
    {
        MergeOutcome::Merged(oid) => {
            let (_, commit) = repo.read_commit(&oid.to_hex()).unwrap();
            assert_eq!(commit.parents.len(), 2);
        }
        other => panic!("expected merge commit, got {other:?}"),
    }
}

#[test]
fn diverged_branches_merge_cleanly_when_disjoint() {
    let (dir, repo) = base_repo();

    repo.branch("topic", None).unwrap();
    write_and_commit(&dir, &repo, "main.txt", "main side\n", "main work");

    repo.switch("topic").unwrap();
    write_and_commit(&dir, &repo, "topic.txt", "topic side\n", "topic work");

    repo.switch("main").unwrap();
    match repo.merge("topic", MergeCommandOptions::default()).unwrap() {
        MergeOutcome::Merged(oid) => {
            let (_, commit) = repo.read_commit(&oid.to_hex()).unwrap();
            assert!(commit.is_merge());
        }
        other => panic!("expected merge, got {other:?}"),
    }
    assert!(dir.path().join("main.txt").exists());
    assert!(dir.path().join("topic.txt").exists());
    assert!(!repo.is_merge_in_progress());
}

#[test]
fn conflicting_merge_pauses_with_stages_and_markers() {
    let (dir, repo) = base_repo();

    repo.branch("topic", None).unwrap();
    write_and_commit(&dir, &repo, "shared.txt", "line MAIN\nline two\nline three\n", "main edit");

    repo.switch("topic").unwrap();
    write_and_commit(&dir, &repo, "shared.txt", "line TOPIC\nline two\nline three\n", "topic edit");

    repo.switch("main").unwrap();
    let outcome = repo.merge("topic", MergeCommandOptions::default()).unwrap();
    let paths = match outcome {
        MergeOutcome::Conflicts(paths) => paths,
        other => panic!("expected conflicts, got {other:?}"),
    };
    assert_eq!(paths[0].to_string(), "shared.txt");

    // Operation state persisted.
    assert!(repo.is_merge_in_progress());
    assert_eq!(
        repo.merge_head().unwrap(),
        Some(repo.resolve_ref("topic").unwrap())
    );

    // Index carries stages 1/2/3.
    let index = repo.index().unwrap();
    let stages = index.get_all(BStr::new("shared.txt"));
    assert_eq!(stages.len(), 3);
    assert!(stages.iter().any(|e| e.stage == Stage::Base));
    assert!(stages.iter().any(|e| e.stage == Stage::Ours));
    assert!(stages.iter().any(|e| e.stage == Stage::Theirs));

    // Working tree holds the marked-up content.
    let text = std::fs::read_to_string(dir.path().join("shared.txt")).unwrap();
    assert!(text.contains("<<<<<<< main"));
    assert!(text.contains("======="));
    assert!(text.contains(">>>>>>> topic"));

    // Resolve, stage, and the merge commit completes with two parents.
    std::fs::write(dir.path().join("shared.txt"), "line RESOLVED\nline two\nline three\n")
        .unwrap();
    repo.add(&["shared.txt"]).unwrap();
    let merge_commit = repo
        .commit("merge topic into main", &CommitOptions::default())
        .unwrap();
    let (_, commit) = repo.read_commit(&merge_commit.to_hex()).unwrap();
    assert_eq!(commit.parents.len(), 2);
    assert!(!repo.is_merge_in_progress());
}

#[test]
fn merge_already_up_to_date() {
    let (dir, repo) = base_repo();
    repo.branch("old", None).unwrap();
    write_and_commit(&dir, &repo, "more.txt", "x\n", "advance main");
    assert!(matches!(
        repo.merge("old", MergeCommandOptions::default()).unwrap(),
        MergeOutcome::AlreadyUpToDate
    ));
}

#[test]
fn cherry_pick_applies_single_commit() {
    let (dir, repo) = base_repo();

    repo.branch("topic", None).unwrap();
    repo.switch("topic").unwrap();
    write_and_commit(&dir, &repo, "picked.txt", "cherry\n", "pickable change");
    let picked = repo.resolve_ref("HEAD").unwrap();
    write_and_commit(&dir, &repo, "unwanted.txt", "no\n", "later change");

    repo.switch("main").unwrap();
    match repo.cherry_pick(&picked.to_hex()).unwrap() {
        MergeOutcome::Merged(oid) => {
            let (_, commit) = repo.read_commit(&oid.to_hex()).unwrap();
            assert_eq!(commit.parents.len(), 1);
            assert_eq!(commit.summary().to_string(), "pickable change");
        }
        other => panic!("expected pick commit, got {other:?}"),
    }
    assert!(dir.path().join("picked.txt").exists());
    assert!(!dir.path().join("unwanted.txt").exists());
}

#[test]
fn rebase_replays_commits_onto_target() {
    let (dir, repo) = base_repo();

    repo.branch("feature", None).unwrap();
    repo.switch("feature").unwrap();
    write_and_commit(&dir, &repo, "f1.txt", "1\n", "feature 1");
    write_and_commit(&dir, &repo, "f2.txt", "2\n", "feature 2");

    repo.switch("main").unwrap();
    write_and_commit(&dir, &repo, "mainline.txt", "m\n", "mainline");
    let main_tip = repo.resolve_ref("main").unwrap();

    repo.switch("feature").unwrap();
    match repo.rebase("main").unwrap() {
        MergeOutcome::Merged(tip) => {
            // The rebased branch contains both feature commits on top of main.
            let log = repo.log(Some(&tip.to_hex()), None).unwrap();
            let summaries: Vec<String> = log
                .iter()
                .map(|e| e.commit.summary().to_string())
                .collect();
            assert_eq!(summaries[0], "feature 2");
            assert_eq!(summaries[1], "feature 1");
            assert!(summaries.contains(&"mainline".to_string()));
            assert!(gitport_merge::is_descendant(repo.odb(), &main_tip, &tip).unwrap());
        }
        other => panic!("expected completed rebase, got {other:?}"),
    }
    assert!(!repo.is_rebase_in_progress());
    assert!(dir.path().join("mainline.txt").exists());
    assert!(dir.path().join("f2.txt").exists());
    assert_eq!(
        repo.current_branch().unwrap().unwrap().as_str(),
        "refs/heads/feature"
    );
}
