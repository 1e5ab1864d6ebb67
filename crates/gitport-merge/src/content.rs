//! Three-way text merge (diff3).
//!
//! Diffs base→ours and base→theirs, interleaves non-overlapping
//! changes, and emits conflict markers where the change regions
//! overlap.

use crate::diff::{diff, split_lines, Edit, EditOp};
use crate::{ConflictStyle, MergeLabels};

/// Result of a content merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFileResult {
    pub clean_merge: bool,
    pub merged_text: Vec<u8>,
}

/// A maximal run of changes relative to the base.
#[derive(Debug, Clone, Copy)]
struct ChangeRegion {
    base_start: usize,
    base_end: usize,
    new_start: usize,
    new_end: usize,
}

/// Merge `ours` and `theirs` against their common `base`.
pub fn merge_file(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    style: ConflictStyle,
    labels: &MergeLabels<'_>,
) -> MergeFileResult {
    // The trivial resolutions need no diffing.
    if ours == theirs {
        return clean(ours);
    }
    if base == ours {
        return clean(theirs);
    }
    if base == theirs {
        return clean(ours);
    }

    let base_lines = split_lines(base);
    let ours_lines = split_lines(ours);
    let theirs_lines = split_lines(theirs);

    let ours_regions = change_regions(&diff(&base_lines, &ours_lines));
    let theirs_regions = change_regions(&diff(&base_lines, &theirs_lines));

    let mut out = Vec::with_capacity(base.len().max(ours.len()).max(theirs.len()));
    let mut clean_merge = true;
    let mut base_pos = 0usize;
    let mut i = 0usize;
    let mut j = 0usize;

    loop {
        let next_ours = ours_regions.get(i);
        let next_theirs = theirs_regions.get(j);

        let (region, from_ours) = match (next_ours, next_theirs) {
            (None, None) => break,
            (Some(o), None) => (*o, true),
            (None, Some(t)) => (*t, false),
            (Some(o), Some(t)) => {
                if regions_touch(o, t) {
                    // Overlapping (or touching) changes: a conflict
                    // window covering every region it transitively touches.
                    let (lo, hi, i_end, j_end) =
                        conflict_window(&ours_regions, &theirs_regions, i, j);

                    emit_base(&mut out, &base_lines, base_pos, lo);
                    let ours_side =
                        project(&ours_regions[i..i_end], &base_lines, &ours_lines, lo, hi);
                    let theirs_side =
                        project(&theirs_regions[j..j_end], &base_lines, &theirs_lines, lo, hi);

                    if flatten(&ours_side) == flatten(&theirs_side) {
                        // Both sides made the same change.
                        for line in ours_side {
                            out.extend_from_slice(line);
                        }
                    } else {
                        clean_merge = false;
                        emit_conflict(
                            &mut out,
                            &ours_side,
                            &base_lines[lo..hi],
                            &theirs_side,
                            style,
                            labels,
                        );
                    }

                    base_pos = hi;
                    i = i_end;
                    j = j_end;
                    continue;
                }
                // Disjoint: apply whichever comes first in the base.
                if o.base_start <= t.base_start {
                    (*o, true)
                } else {
                    (*t, false)
                }
            }
        };

        emit_base(&mut out, &base_lines, base_pos, region.base_start);
        let side_lines = if from_ours { &ours_lines } else { &theirs_lines };
        for line in &side_lines[region.new_start..region.new_end] {
            out.extend_from_slice(line);
        }
        base_pos = region.base_end;
        if from_ours {
            i += 1;
        } else {
            j += 1;
        }
    }

    emit_base(&mut out, &base_lines, base_pos, base_lines.len());

    MergeFileResult {
        clean_merge,
        merged_text: out,
    }
}

fn clean(text: &[u8]) -> MergeFileResult {
    MergeFileResult {
        clean_merge: true,
        merged_text: text.to_vec(),
    }
}

/// Collapse an edit script into maximal changed regions.
fn change_regions(edits: &[Edit]) -> Vec<ChangeRegion> {
    let mut regions: Vec<ChangeRegion> = Vec::new();
    let mut current: Option<ChangeRegion> = None;

    for e in edits {
        match e.op {
            EditOp::Equal => {
                if let Some(r) = current.take() {
                    regions.push(r);
                }
            }
            EditOp::Delete => {
                let r = current.get_or_insert(ChangeRegion {
                    base_start: e.old_index,
                    base_end: e.old_index,
                    new_start: e.new_index,
                    new_end: e.new_index,
                });
                r.base_end = e.old_index + 1;
            }
            EditOp::Insert => {
                let r = current.get_or_insert(ChangeRegion {
                    base_start: e.old_index,
                    base_end: e.old_index,
                    new_start: e.new_index,
                    new_end: e.new_index,
                });
                r.new_end = e.new_index + 1;
            }
        }
    }
    if let Some(r) = current {
        regions.push(r);
    }
    regions
}

/// Touching counts as overlap: adjacent edits on the two sides cannot
/// be ordered reliably, so they conflict.
fn regions_touch(a: &ChangeRegion, b: &ChangeRegion) -> bool {
    a.base_start <= b.base_end && b.base_start <= a.base_end
}

/// Extend the conflict window until no region on either side touches
/// it. Returns `(lo, hi, next_i, next_j)`.
fn conflict_window(
    ours: &[ChangeRegion],
    theirs: &[ChangeRegion],
    mut i: usize,
    mut j: usize,
) -> (usize, usize, usize, usize) {
    let mut lo = ours[i].base_start.min(theirs[j].base_start);
    let mut hi = ours[i].base_end.max(theirs[j].base_end);
    i += 1;
    j += 1;

    loop {
        let mut grew = false;
        while let Some(r) = ours.get(i) {
            if r.base_start <= hi {
                lo = lo.min(r.base_start);
                hi = hi.max(r.base_end);
                i += 1;
                grew = true;
            } else {
                break;
            }
        }
        while let Some(r) = theirs.get(j) {
            if r.base_start <= hi {
                lo = lo.min(r.base_start);
                hi = hi.max(r.base_end);
                j += 1;
                grew = true;
            } else {
                break;
            }
        }
        if !grew {
            return (lo, hi, i, j);
        }
    }
}

/// One side's content for the base window `[lo, hi)`: region
/// replacements where regions sit, base lines elsewhere.
fn project<'a>(
    regions: &[ChangeRegion],
    base_lines: &[&'a [u8]],
    side_lines: &[&'a [u8]],
    lo: usize,
    hi: usize,
) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    let mut pos = lo;
    for r in regions {
        for line in &base_lines[pos..r.base_start] {
            out.push(*line);
        }
        for line in &side_lines[r.new_start..r.new_end] {
            out.push(*line);
        }
        pos = r.base_end;
    }
    for line in &base_lines[pos..hi] {
        out.push(*line);
    }
    out
}

fn flatten(lines: &[&[u8]]) -> Vec<u8> {
    lines.concat()
}

fn emit_base(out: &mut Vec<u8>, base_lines: &[&[u8]], from: usize, to: usize) {
    for line in &base_lines[from..to] {
        out.extend_from_slice(line);
    }
}

fn emit_conflict(
    out: &mut Vec<u8>,
    ours: &[&[u8]],
    base: &[&[u8]],
    theirs: &[&[u8]],
    style: ConflictStyle,
    labels: &MergeLabels<'_>,
) {
    push_marker(out, b'<', labels.ours);
    push_lines(out, ours);
    if style == ConflictStyle::Diff3 {
        push_marker(out, b'|', labels.base);
        push_lines(out, base);
    }
    ensure_newline(out);
    out.extend_from_slice(b"=======\n");
    push_lines(out, theirs);
    push_marker(out, b'>', labels.theirs);
}

fn push_marker(out: &mut Vec<u8>, ch: u8, label: &str) {
    ensure_newline(out);
    out.extend_from_slice(&[ch; 7]);
    if !label.is_empty() {
        out.push(b' ');
        out.extend_from_slice(label.as_bytes());
    }
    out.push(b'\n');
}

fn push_lines(out: &mut Vec<u8>, lines: &[&[u8]]) {
    for line in lines {
        out.extend_from_slice(line);
    }
}

fn ensure_newline(out: &mut Vec<u8>) {
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
}
