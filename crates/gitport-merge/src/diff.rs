//! Line-level Myers diff.
//!
//! Implements the O(ND) algorithm from "An O(ND) Difference Algorithm
//! and Its Variations" (Myers, 1986), with common prefix/suffix
//! trimming. The edit script is what the three-way merge consumes.

/// An edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    /// Line present in both sequences.
    Equal,
    /// Line present only in the new sequence.
    Insert,
    /// Line present only in the old sequence.
    Delete,
}

/// One step of the edit script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    pub op: EditOp,
    /// Index into the old sequence (meaningful for Equal and Delete;
    /// for Insert it is the old position the insert occurs before).
    pub old_index: usize,
    /// Index into the new sequence (meaningful for Equal and Insert).
    pub new_index: usize,
}

/// Split bytes into lines, keeping terminators so merges reproduce the
/// input byte-exactly.
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' {
            lines.push(&data[start..=i]);
            start = i + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

/// Diff two line sequences into an edit script.
pub fn diff(old: &[&[u8]], new: &[&[u8]]) -> Vec<Edit> {
    // Trim the common prefix and suffix before running Myers.
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let mut edits = Vec::with_capacity(old.len().max(new.len()));
    for i in 0..prefix {
        edits.push(Edit {
            op: EditOp::Equal,
            old_index: i,
            new_index: i,
        });
    }

    let inner = myers(&old[prefix..old.len() - suffix], &new[prefix..new.len() - suffix]);
    edits.extend(inner.into_iter().map(|e| Edit {
        op: e.op,
        old_index: e.old_index + prefix,
        new_index: e.new_index + prefix,
    }));

    for i in 0..suffix {
        edits.push(Edit {
            op: EditOp::Equal,
            old_index: old.len() - suffix + i,
            new_index: new.len() - suffix + i,
        });
    }

    edits
}

/// Core Myers over pre-trimmed sequences, recovering the path from the
/// per-round V arrays.
fn myers(old: &[&[u8]], new: &[&[u8]]) -> Vec<Edit> {
    let n = old.len() as isize;
    let m = new.len() as isize;
    let max = n + m;

    if max == 0 {
        return Vec::new();
    }
    if n == 0 {
        return (0..m as usize)
            .map(|j| Edit {
                op: EditOp::Insert,
                old_index: 0,
                new_index: j,
            })
            .collect();
    }
    if m == 0 {
        return (0..n as usize)
            .map(|i| Edit {
                op: EditOp::Delete,
                old_index: i,
                new_index: 0,
            })
            .collect();
    }

    let offset = max;
    let mut v = vec![0isize; (2 * max + 1) as usize];
    let mut trace: Vec<Vec<isize>> = Vec::new();

    'search: for d in 0..=max {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let idx = (k + offset) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && old[x as usize] == new[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    // Backtrack from (n, m) through the recorded rounds.
    let mut edits = Vec::new();
    let mut x = n;
    let mut y = m;
    for d in (0..trace.len() as isize).rev() {
        let v = &trace[d as usize];
        let k = x - y;
        let idx = (k + offset) as usize;

        let prev_k = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[(prev_k + offset) as usize];
        let prev_y = prev_x - prev_k;

        // Diagonal (equal) steps inside this round.
        while x > prev_x && y > prev_y {
            edits.push(Edit {
                op: EditOp::Equal,
                old_index: (x - 1) as usize,
                new_index: (y - 1) as usize,
            });
            x -= 1;
            y -= 1;
        }

        // The single non-diagonal step that started the round.
        if d > 0 {
            if x == prev_x {
                edits.push(Edit {
                    op: EditOp::Insert,
                    old_index: x as usize,
                    new_index: (y - 1) as usize,
                });
            } else {
                edits.push(Edit {
                    op: EditOp::Delete,
                    old_index: (x - 1) as usize,
                    new_index: y as usize,
                });
            }
        }

        x = prev_x;
        y = prev_y;
    }

    edits.reverse();
    edits
}
