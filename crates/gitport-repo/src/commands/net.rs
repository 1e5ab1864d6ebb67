//! Network commands: fetch, push, clone, pull, remote info.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use gitport_hash::Oid;
use gitport_object::Object;
use gitport_pack::indexer::{index_pack, install_pack};
use gitport_pack::writer::PackWriter;
use gitport_protocol::fetch as proto_fetch;
use gitport_protocol::push as proto_push;
use gitport_protocol::v1::RefAdvertisement;
use gitport_protocol::ProtocolVersion;
use gitport_ref::{Expect, RefName};
use gitport_transport::{
    GitUrl, ReqwestClient, Service, SmartHttpTransport, SmartTransport,
};
use tracing::{debug, info};

use crate::error::{ctx, CommandError, ErrorKind};
use crate::remote::Refspec;
use crate::{CheckoutOptions, InitOptions, Repository};

/// Connect to a remote URL over smart HTTP with the default client.
/// SSH-shaped URLs are rewritten to HTTPS only when `rewrite_ssh` is set.
pub fn connect(
    url: &str,
    rewrite_ssh: bool,
) -> Result<SmartHttpTransport<ReqwestClient>, CommandError> {
    let url = GitUrl::parse(url, rewrite_ssh).map_err(ctx("connect"))?;
    Ok(SmartHttpTransport::new(url, ReqwestClient::new()))
}

/// Options shared by the fetch-shaped commands.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub depth: Option<u32>,
    pub protocol_version: ProtocolVersion,
}

/// Summary of a completed fetch.
#[derive(Debug, Default)]
pub struct FetchSummary {
    /// Tracking refs updated, as `(local name, new oid)`.
    pub updated: Vec<(String, Oid)>,
    /// Objects received in the pack.
    pub received_objects: usize,
    pub shallow: Vec<Oid>,
}

impl Repository {
    /// The remote's advertised refs (`getRemoteInfo`).
    pub fn remote_info(
        &self,
        transport: &mut dyn SmartTransport,
        version: ProtocolVersion,
    ) -> Result<RefAdvertisement, CommandError> {
        let caller = "getRemoteInfo";
        let mut advert = proto_fetch::discover(transport, Service::UploadPack, version)
            .map_err(ctx(caller))?;
        if advert.version == 2 {
            // v2 needs an explicit ls-refs round to see the refs.
            let refs = proto_fetch::ls_refs(transport, &["refs/".into(), "HEAD".into()])
                .map_err(ctx(caller))?;
            advert.refs = refs.iter().map(|r| (r.oid, r.name.clone())).collect();
            for r in &refs {
                if let Some(target) = &r.symref_target {
                    advert
                        .symrefs
                        .push((r.name.to_string(), target.to_string()));
                }
                if let Some(peeled) = r.peeled {
                    advert.peeled.insert(r.name.clone(), peeled);
                }
            }
        }
        Ok(advert)
    }

    /// Fetch from a configured remote: negotiate, ingest the pack, and
    /// update tracking refs plus FETCH_HEAD.
    pub fn fetch(
        &self,
        transport: &mut dyn SmartTransport,
        remote_name: &str,
        options: &FetchOptions,
    ) -> Result<FetchSummary, CommandError> {
        let caller = "fetch";
        let remote = self.remote(remote_name)?;
        if remote.fetch.is_empty() {
            return Err(CommandError::new(
                caller,
                ErrorKind::NoRefspec {
                    remote: remote_name.to_string(),
                },
            ));
        }

        let advert = self.remote_info(transport, options.protocol_version)?;

        // Wants: advertised refs any refspec maps, skipping ones we have.
        let mut wants = Vec::new();
        let mut mapped: Vec<(String, String, Oid)> = Vec::new(); // (remote ref, local ref, oid)
        for (oid, name) in &advert.refs {
            let Ok(name) = std::str::from_utf8(name) else {
                continue;
            };
            for spec in &remote.fetch {
                if let Some(local) = spec.map(name) {
                    mapped.push((name.to_string(), local, *oid));
                    if !self.odb().has(oid) && !wants.contains(oid) {
                        wants.push(*oid);
                    }
                }
            }
        }

        // Haves: the tips of everything we already store.
        let haves: Vec<Oid> = self
            .refs()
            .list("refs/")
            .map_err(ctx(caller))?
            .into_iter()
            .map(|(_, oid)| oid)
            .collect();

        let outcome = proto_fetch::fetch(
            transport,
            &advert,
            &proto_fetch::FetchRequest {
                wants,
                haves,
                depth: options.depth,
                protocol_version: options.protocol_version,
                ..Default::default()
            },
        )
        .map_err(ctx(caller))?;

        let mut summary = FetchSummary {
            shallow: outcome.shallow.clone(),
            ..Default::default()
        };

        if !outcome.pack.is_empty() {
            summary.received_objects = self.ingest_pack(caller, &outcome.pack)?;
        }
        if !outcome.shallow.is_empty() {
            let lines: Vec<String> =
                outcome.shallow.iter().map(|oid| oid.to_hex()).collect();
            fs::write(self.git_dir().join("shallow"), lines.join("\n") + "\n")
                .map_err(ctx(caller))?;
        }

        // Update tracking refs and FETCH_HEAD.
        let mut fetch_head = Vec::new();
        for (remote_ref, local_ref, oid) in mapped {
            let name = RefName::new(local_ref.clone()).map_err(ctx(caller))?;
            self.refs()
                .update(
                    &name,
                    oid,
                    Expect::Any,
                    &self.identity(),
                    &format!("fetch {remote_name}"),
                )
                .map_err(ctx(caller))?;
            summary.updated.push((local_ref, oid));

            let for_merge = remote_ref == "HEAD"
                || advert
                    .symrefs
                    .iter()
                    .any(|(from, to)| from == "HEAD" && *to == remote_ref);
            fetch_head.push((
                oid,
                for_merge,
                format!("branch '{remote_ref}' of {}", remote.url),
            ));
        }
        self.write_fetch_head(&fetch_head)?;

        info!(
            remote = remote_name,
            refs = summary.updated.len(),
            objects = summary.received_objects,
            "fetch complete"
        );
        Ok(summary)
    }

    /// Validate, index, and install a received pack all-or-nothing.
    fn ingest_pack(&self, caller: &'static str, pack: &[u8]) -> Result<usize, CommandError> {
        let indexed = index_pack(pack, |oid| self.odb().read(oid).ok()).map_err(ctx(caller))?;
        let count = indexed.entries.len();
        install_pack(
            &self.odb().objects_dir().join("pack"),
            pack,
            &indexed,
        )
        .map_err(ctx(caller))?;
        self.odb().refresh().map_err(ctx(caller))?;
        debug!(objects = count, "pack installed");
        Ok(count)
    }

    /// Push a local ref to the remote, updating the matching tracking
    /// ref on success.
    pub fn push(
        &self,
        transport: &mut dyn SmartTransport,
        remote_name: &str,
        src_ref: &str,
        dst_ref: &str,
        force: bool,
    ) -> Result<proto_push::PushReport, CommandError> {
        let caller = "push";
        let remote = self.remote(remote_name)?;
        let advert =
            proto_fetch::discover(transport, Service::ReceivePack, ProtocolVersion::V1)
                .map_err(ctx(caller))?;

        let new_oid = if src_ref.is_empty() {
            Oid::NULL // deletion push
        } else {
            self.resolve_ref(src_ref)?
        };
        let old_oid = advert.resolve(dst_ref).unwrap_or(Oid::NULL);

        if !force && !new_oid.is_null() && !old_oid.is_null() {
            // Reject non-fast-forward locally when we can tell.
            if self.odb().has(&old_oid)
                && !gitport_merge::is_descendant(self.odb(), &old_oid, &new_oid)
                    .map_err(ctx(caller))?
            {
                return Err(CommandError::new(
                    caller,
                    gitport_protocol::ProtocolError::PushRejected {
                        refname: dst_ref.to_string(),
                        reason: "non-fast-forward".to_string(),
                    },
                ));
            }
        }

        // Pack: everything reachable from the new tip that the remote
        // does not already have.
        let pack = if new_oid.is_null() {
            Vec::new()
        } else {
            let known: Vec<Oid> = advert
                .refs
                .iter()
                .map(|(oid, _)| *oid)
                .filter(|oid| self.odb().has(oid))
                .collect();
            self.build_pack(caller, &new_oid, &known)?
        };

        let report = proto_push::push(
            transport,
            &advert,
            &[proto_push::PushCommand {
                refname: dst_ref.to_string(),
                old_oid,
                new_oid,
            }],
            &pack,
        )
        .map_err(ctx(caller))?;

        let report = report.into_result().map_err(ctx(caller))?;

        // Mirror the accepted update into refs/remotes/.
        if let Some(local) = remote
            .fetch
            .iter()
            .find_map(|spec: &Refspec| spec.map(dst_ref))
        {
            let name = RefName::new(local).map_err(ctx(caller))?;
            if new_oid.is_null() {
                let _ = self.refs().delete(&name, Expect::Any);
            } else {
                self.refs()
                    .update(
                        &name,
                        new_oid,
                        Expect::Any,
                        &self.identity(),
                        "update by push",
                    )
                    .map_err(ctx(caller))?;
            }
        }

        Ok(report)
    }

    /// Collect the objects for a push pack: the closure of commits
    /// reachable from `tip` but not from any `known` remote tip.
    fn build_pack(
        &self,
        caller: &'static str,
        tip: &Oid,
        known: &[Oid],
    ) -> Result<Vec<u8>, CommandError> {
        // Everything reachable from the remote's tips stays out.
        let mut excluded: HashSet<Oid> = HashSet::new();
        for start in known {
            self.collect_closure(caller, start, &mut excluded)?;
        }

        let mut include: HashSet<Oid> = HashSet::new();
        let mut commits = vec![*tip];
        let mut seen_commits: HashSet<Oid> = HashSet::from([*tip]);
        while let Some(oid) = commits.pop() {
            if excluded.contains(&oid) {
                continue;
            }
            include.insert(oid);
            let commit = self.read_commit_object(&oid).map_err(ctx(caller))?;
            self.collect_tree(caller, &commit.tree, &excluded, &mut include)?;
            for parent in commit.parents {
                if seen_commits.insert(parent) {
                    commits.push(parent);
                }
            }
        }

        let mut writer = PackWriter::new();
        for oid in include {
            let (kind, data) = self.odb().read(&oid).map_err(ctx(caller))?;
            writer.push(kind, data);
        }
        let finished = writer.finish().map_err(ctx(caller))?;
        Ok(finished.bytes)
    }

    /// All objects reachable from a commit, into `set`.
    fn collect_closure(
        &self,
        caller: &'static str,
        start: &Oid,
        set: &mut HashSet<Oid>,
    ) -> Result<(), CommandError> {
        let mut commits = vec![*start];
        while let Some(oid) = commits.pop() {
            if !set.insert(oid) {
                continue;
            }
            let commit = self.read_commit_object(&oid).map_err(ctx(caller))?;
            self.collect_tree(caller, &commit.tree, &HashSet::new(), set)?;
            commits.extend(commit.parents);
        }
        Ok(())
    }

    fn collect_tree(
        &self,
        caller: &'static str,
        tree: &Oid,
        excluded: &HashSet<Oid>,
        include: &mut HashSet<Oid>,
    ) -> Result<(), CommandError> {
        if excluded.contains(tree) || !include.insert(*tree) {
            return Ok(());
        }
        let tree = match self.odb().read_object(tree).map_err(ctx(caller))? {
            Object::Tree(t) => t,
            _ => return Ok(()),
        };
        for entry in tree.entries() {
            if entry.mode.is_tree() {
                self.collect_tree(caller, &entry.oid, excluded, include)?;
            } else if entry.mode != gitport_object::FileMode::Gitlink
                && !excluded.contains(&entry.oid)
            {
                include.insert(entry.oid);
            }
        }
        Ok(())
    }

    /// Fetch then merge the remote's merge candidate (FETCH_HEAD).
    pub fn pull(
        &self,
        transport: &mut dyn SmartTransport,
        remote_name: &str,
        options: &FetchOptions,
    ) -> Result<super::merge::MergeOutcome, CommandError> {
        let caller = "pull";
        self.fetch(transport, remote_name, options)?;
        let candidate = self.fetch_head()?.ok_or_else(|| {
            CommandError::new(caller, ErrorKind::NotFound("FETCH_HEAD".into()))
        })?;
        self.merge(&candidate.to_hex(), Default::default())
    }
}

/// Clone: init a repository at `dir`, wire up the remote, fetch
/// everything, and check out the remote's default branch.
pub fn clone(
    transport: &mut dyn SmartTransport,
    url: &str,
    dir: &Path,
    options: &FetchOptions,
) -> Result<Repository, CommandError> {
    let caller = "clone";
    let mut repo = Repository::init(dir, &InitOptions::default())?;
    repo.set_remote("origin", url)?;
    // Re-open to pick up the freshly written remote config.
    let repo = Repository::open(dir)?;

    repo.fetch(transport, "origin", options)?;

    // The remote's HEAD decides the initial branch.
    let advert = repo.remote_info(transport, options.protocol_version)?;
    let default_branch = advert
        .symrefs
        .iter()
        .find(|(from, _)| from == "HEAD")
        .map(|(_, to)| to.trim_start_matches("refs/heads/").to_string())
        .unwrap_or_else(|| "main".to_string());

    let tracking = format!("refs/remotes/origin/{default_branch}");
    if let Ok(oid) = repo.resolve_ref(&tracking) {
        let branch = RefName::new(format!("refs/heads/{default_branch}"))
            .map_err(ctx(caller))?;
        repo.refs()
            .update(
                &branch,
                oid,
                Expect::Any,
                &repo.identity(),
                &format!("clone: from {url}"),
            )
            .map_err(ctx(caller))?;
        repo.set_head(&default_branch)?;
        repo.checkout_tree(&oid, CheckoutOptions { force: true })?;
    }

    Ok(repo)
}
