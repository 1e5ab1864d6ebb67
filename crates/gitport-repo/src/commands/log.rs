//! Commit history walks.

use std::collections::{BinaryHeap, HashSet};

use gitport_hash::Oid;
use gitport_object::Commit;

use crate::error::{ctx, CommandError};
use crate::Repository;

/// One history entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub oid: Oid,
    pub commit: Commit,
}

/// Heap key: newest committer time first; ties resolve to the commit
/// discovered earlier (keeping children ahead of same-second parents).
struct Queued {
    seconds: i64,
    seq: u64,
    oid: Oid,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.seconds == other.seconds && self.seq == other.seq
    }
}
impl Eq for Queued {}
impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl Repository {
    /// Walk history from `start` (HEAD by default), newest first by
    /// committer date, up to `max` entries.
    pub fn log(
        &self,
        start: Option<&str>,
        max: Option<usize>,
    ) -> Result<Vec<LogEntry>, CommandError> {
        let caller = "log";
        let tip = self.resolve_ref(start.unwrap_or("HEAD"))?;
        let limit = max.unwrap_or(usize::MAX);

        let mut entries = Vec::new();
        let mut seen: HashSet<Oid> = HashSet::from([tip]);
        let mut queue: BinaryHeap<Queued> = BinaryHeap::new();
        let mut seq = 0u64;

        let first = self.read_commit_object(&tip).map_err(ctx(caller))?;
        queue.push(Queued {
            seconds: first.committer.when.seconds,
            seq,
            oid: tip,
        });

        while let Some(Queued { oid, .. }) = queue.pop() {
            if entries.len() >= limit {
                break;
            }
            let commit = self.read_commit_object(&oid).map_err(ctx(caller))?;
            for parent in &commit.parents {
                if seen.insert(*parent) {
                    seq += 1;
                    let parent_commit = self.read_commit_object(parent).map_err(ctx(caller))?;
                    queue.push(Queued {
                        seconds: parent_commit.committer.when.seconds,
                        seq,
                        oid: *parent,
                    });
                }
            }
            entries.push(LogEntry { oid, commit });
        }

        Ok(entries)
    }
}
