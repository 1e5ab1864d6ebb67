//! Fetch, clone, and push against a scripted in-memory remote.

use gitport_hash::Oid;
use gitport_object::ObjectType;
use gitport_pack::writer::PackWriter;
use gitport_protocol::pktline::{encode, FLUSH};
use gitport_repo::{CommitOptions, FetchOptions, InitOptions, Repository};
use gitport_transport::{Service, SmartTransport, TransportError};

/// A fake smart-HTTP remote backed by another gitport repository.
struct ScriptedRemote {
    refs: Vec<(Oid, String)>,
    head_target: String,
    pack: Vec<u8>,
    push_report: Vec<u8>,
    last_request: Vec<u8>,
}

impl ScriptedRemote {
    fn from_repo(remote: &Repository) -> Self {
        let mut refs = Vec::new();
        let head = remote.resolve_ref("HEAD").unwrap();
        refs.push((head, "HEAD".to_string()));
        for (name, oid) in remote.list_refs("refs/").unwrap() {
            refs.push((oid, name));
        }

        // A pack holding every object the remote has.
        let mut writer = PackWriter::new();
        for oid in remote.odb().iter_oids().unwrap() {
            let (kind, data) = remote.odb().read(&oid).unwrap();
            writer.push(kind, data);
        }

        Self {
            refs,
            head_target: remote.current_branch().unwrap().unwrap().as_str().to_string(),
            pack: writer.finish().unwrap().bytes,
            push_report: Vec::new(),
            last_request: Vec::new(),
        }
    }

    fn advertisement(&self, service: Service) -> Vec<u8> {
        let caps = format!(
            "side-band-64k ofs-delta shallow report-status delete-refs \
             symref=HEAD:{}",
            self.head_target
        );
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(
            format!("# service={}\n", service.as_str()).as_bytes(),
        ));
        buf.extend_from_slice(FLUSH);
        for (i, (oid, name)) in self.refs.iter().enumerate() {
            let line = if i == 0 {
                format!("{} {}\0{}\n", oid.to_hex(), name, caps)
            } else {
                format!("{} {}\n", oid.to_hex(), name)
            };
            buf.extend_from_slice(&encode(line.as_bytes()));
        }
        buf.extend_from_slice(FLUSH);
        buf
    }
}

impl SmartTransport for ScriptedRemote {
    fn discover(&mut self, service: Service) -> Result<Vec<u8>, TransportError> {
        Ok(self.advertisement(service))
    }

    fn request(&mut self, service: Service, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.last_request = body;
        match service {
            Service::UploadPack => {
                // NAK, then the pack on band 1, chunked.
                let mut buf = Vec::new();
                buf.extend_from_slice(&encode(b"NAK\n"));
                for chunk in self.pack.chunks(8192) {
                    let mut banded = vec![1u8];
                    banded.extend_from_slice(chunk);
                    buf.extend_from_slice(&encode(&banded));
                }
                buf.extend_from_slice(FLUSH);
                Ok(buf)
            }
            Service::ReceivePack => Ok(self.push_report.clone()),
        }
    }

    fn set_protocol_v2(&mut self, _enabled: bool) {}
}

fn remote_repo() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), &InitOptions::default()).unwrap();
    std::fs::write(dir.path().join("lib.rs"), "pub fn answer() -> u8 { 42 }\n").unwrap();
    repo.add(&["lib.rs"]).unwrap();
    repo.commit("remote initial", &CommitOptions::default())
        .unwrap();
    (dir, repo)
}

#[test]
fn fetch_ingests_pack_and_updates_tracking_refs() {
    let (_remote_dir, remote) = remote_repo();
    let remote_tip = remote.resolve_ref("HEAD").unwrap();
    let mut transport = ScriptedRemote::from_repo(&remote);

    let local_dir = tempfile::tempdir().unwrap();
    let mut local = Repository::init(local_dir.path(), &InitOptions::default()).unwrap();
    local
        .set_remote("origin", "https://example.com/repo.git")
        .unwrap();
    let local = Repository::open(local_dir.path()).unwrap();

    let summary = local
        .fetch(&mut transport, "origin", &FetchOptions::default())
        .unwrap();

    assert!(summary.received_objects >= 3); // commit + tree + blob
    assert_eq!(
        local.resolve_ref("refs/remotes/origin/main").unwrap(),
        remote_tip
    );
    // The fetched commit is fully readable locally.
    let (_, commit) = local.read_commit(&remote_tip.to_hex()).unwrap();
    assert_eq!(commit.summary().to_string(), "remote initial");
    // FETCH_HEAD names the remote HEAD branch as merge candidate.
    assert_eq!(local.fetch_head().unwrap(), Some(remote_tip));
}

#[test]
fn fetch_without_refspec_fails() {
    let (_remote_dir, remote) = remote_repo();
    let mut transport = ScriptedRemote::from_repo(&remote);

    let local_dir = tempfile::tempdir().unwrap();
    let local = Repository::init(local_dir.path(), &InitOptions::default()).unwrap();
    // A remote with a URL but no fetch refspec.
    let file = std::fs::read_to_string(local.git_dir().join("config")).unwrap();
    std::fs::write(
        local.git_dir().join("config"),
        format!("{file}[remote \"bare\"]\n\turl = https://example.com/x.git\n"),
    )
    .unwrap();
    let local = Repository::open(local_dir.path()).unwrap();

    let err = local
        .fetch(&mut transport, "bare", &FetchOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "NoRefspecError");
}

#[test]
fn clone_checks_out_remote_head_branch() {
    let (_remote_dir, remote) = remote_repo();
    let remote_tip = remote.resolve_ref("HEAD").unwrap();
    let mut transport = ScriptedRemote::from_repo(&remote);

    let dest = tempfile::tempdir().unwrap();
    let cloned = gitport_repo::clone(
        &mut transport,
        "https://example.com/repo.git",
        dest.path(),
        &FetchOptions::default(),
    )
    .unwrap();

    assert_eq!(cloned.resolve_ref("HEAD").unwrap(), remote_tip);
    assert_eq!(
        cloned.current_branch().unwrap().unwrap().as_str(),
        "refs/heads/main"
    );
    assert_eq!(
        std::fs::read_to_string(dest.path().join("lib.rs")).unwrap(),
        "pub fn answer() -> u8 { 42 }\n"
    );
    // The origin remote is configured for later fetches.
    assert_eq!(
        cloned.remote("origin").unwrap().url,
        "https://example.com/repo.git"
    );
}

#[test]
fn push_sends_commands_and_mirrors_tracking_ref() {
    let (_remote_dir, remote) = remote_repo();
    let mut transport = ScriptedRemote::from_repo(&remote);

    // Build the report the fake server answers with.
    let report = {
        let mut inner = Vec::new();
        inner.extend_from_slice(&encode(b"unpack ok\n"));
        inner.extend_from_slice(&encode(b"ok refs/heads/main\n"));
        inner.extend_from_slice(FLUSH);
        let mut outer = Vec::new();
        let mut banded = vec![1u8];
        banded.extend_from_slice(&inner);
        outer.extend_from_slice(&encode(&banded));
        outer.extend_from_slice(FLUSH);
        outer
    };
    transport.push_report = report;

    // Local repo: clone-equivalent state plus one new commit.
    let dest = tempfile::tempdir().unwrap();
    let local = gitport_repo::clone(
        &mut transport,
        "https://example.com/repo.git",
        dest.path(),
        &FetchOptions::default(),
    )
    .unwrap();
    std::fs::write(dest.path().join("new.rs"), "// new\n").unwrap();
    local.add(&["new.rs"]).unwrap();
    let new_tip = local.commit("local work", &CommitOptions::default()).unwrap();

    let report = local
        .push(
            &mut transport,
            "origin",
            "refs/heads/main",
            "refs/heads/main",
            false,
        )
        .unwrap();
    assert!(report.all_ok());

    // The request carried the update command and a pack payload.
    let sent = String::from_utf8_lossy(&transport.last_request).into_owned();
    assert!(sent.contains(&format!(" {} refs/heads/main", new_tip.to_hex())));
    assert!(sent.contains("report-status"));
    let pack_pos = transport
        .last_request
        .windows(4)
        .position(|w| w == b"PACK")
        .expect("pack payload present");
    assert!(pack_pos > 0);

    // Tracking ref mirrors the accepted update.
    assert_eq!(
        local.resolve_ref("refs/remotes/origin/main").unwrap(),
        new_tip
    );
}

#[test]
fn push_rejects_non_fast_forward_locally() {
    let (_remote_dir, remote) = remote_repo();
    let mut transport = ScriptedRemote::from_repo(&remote);

    let dest = tempfile::tempdir().unwrap();
    let local = gitport_repo::clone(
        &mut transport,
        "https://example.com/repo.git",
        dest.path(),
        &FetchOptions::default(),
    )
    .unwrap();

    // Rewrite history: an unrelated root commit.
    let orphan = {
        let empty_tree = local
            .write_object(ObjectType::Tree, &gitport_object::Tree::new().serialize_content())
            .unwrap();
        let sig = local.identity();
        let commit = gitport_object::Commit {
            tree: empty_tree,
            parents: vec![],
            author: sig.clone(),
            committer: sig,
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: "rewritten\n".into(),
        };
        local
            .write_object(ObjectType::Commit, &commit.serialize_content())
            .unwrap()
    };

    let err = local
        .push(
            &mut transport,
            "origin",
            &orphan.to_hex(),
            "refs/heads/main",
            false,
        )
        .unwrap_err();
    assert_eq!(err.code(), "PushRejectedError");
}
