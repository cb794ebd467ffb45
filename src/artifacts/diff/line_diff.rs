//! Myers shortest-edit diff and the three-way text merge built on it.
//!
//! The edit script carries indices into the two inputs rather than cloned
//! values, so hunk extraction and line counting work without copying lines
//! around. Hunks are half-open replacements of a base range; two sides merge
//! cleanly when no pair of their hunks overlaps (identical hunks from both
//! sides count as agreement and are applied once).

use derive_new::new;

/// One step of an edit script. Indices point into the diffed slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    Equal { old: usize, new: usize },
    Delete { old: usize },
    Insert { new: usize },
}

/// Myers O((N+M)D) shortest-edit diff between two slices.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct MyersDiff<'d, T> {
    a: &'d [T],
    b: &'d [T],
}

impl<'d, T: Eq> MyersDiff<'d, T> {
    fn compute_shortest_edit(&self) -> Vec<Vec<isize>> {
        let (n, m) = (self.a.len() as isize, self.b.len() as isize);
        let offset = (n + m) as usize;

        let mut v = vec![0; 2 * offset + 1];
        let mut trace = Vec::new();

        for d in 0..=(n + m) {
            trace.push(v.clone());

            for k in (-d..=d).step_by(2) {
                let idx = (offset as isize + k) as usize;

                let mut x = if k == -d {
                    // only reachable from k+1, an insertion
                    v[idx + 1]
                } else if k == d {
                    // only reachable from k-1, a deletion
                    v[idx - 1] + 1
                } else {
                    let x_del = v[idx - 1] + 1;
                    let x_ins = v[idx + 1];
                    if x_del > x_ins { x_del } else { x_ins }
                };

                let mut y = x - k;
                while x < n && y < m && self.a[x as usize] == self.b[y as usize] {
                    // snake
                    x += 1;
                    y += 1;
                }

                v[idx] = x;

                if x >= n && y >= m {
                    return trace;
                }
            }
        }

        trace
    }

    fn backtrack(&self) -> Vec<(isize, isize, isize, isize)> {
        let (mut x, mut y) = (self.a.len() as isize, self.b.len() as isize);
        let offset = (x + y) as usize;
        let mut edit_path = Vec::new();

        let trace = self.compute_shortest_edit();

        for (d, v) in trace.iter().enumerate().rev() {
            let k = x - y;

            let prev_k = if k == -(d as isize) {
                k + 1
            } else if k == (d as isize) {
                k - 1
            } else {
                let k_del = k - 1;
                let k_ins = k + 1;
                if v[(offset as isize + k_del) as usize] + 1 > v[(offset as isize + k_ins) as usize]
                {
                    k_del
                } else {
                    k_ins
                }
            };

            let prev_x = v[(offset as isize + prev_k) as usize];
            let prev_y = prev_x - prev_k;

            while x > prev_x && y > prev_y {
                edit_path.push((x - 1, y - 1, x, y));
                x -= 1;
                y -= 1;
            }

            if d > 0 {
                edit_path.push((prev_x, prev_y, x, y));
            }

            (x, y) = (prev_x, prev_y);
        }

        edit_path
    }

    /// The edit script transforming `a` into `b`, in input order.
    pub fn diff(&self) -> Vec<Edit> {
        if self.a.is_empty() && self.b.is_empty() {
            return Vec::new();
        }

        let mut diff = Vec::new();

        for (prev_x, prev_y, x, y) in self.backtrack() {
            if x == prev_x {
                // only y advanced
                if prev_y < self.b.len() as isize {
                    diff.push(Edit::Insert {
                        new: prev_y as usize,
                    });
                }
            } else if y == prev_y {
                // only x advanced
                if prev_x < self.a.len() as isize {
                    diff.push(Edit::Delete {
                        old: prev_x as usize,
                    });
                }
            } else {
                // diagonal move
                if prev_x < self.a.len() as isize {
                    diff.push(Edit::Equal {
                        old: prev_x as usize,
                        new: prev_y as usize,
                    });
                }
            }
        }

        diff.reverse();
        diff
    }
}

/// Added/removed line counts between two texts.
pub fn diff_counts(a: &[String], b: &[String]) -> (usize, usize) {
    let mut added = 0;
    let mut removed = 0;
    for edit in MyersDiff::new(a, b).diff() {
        match edit {
            Edit::Insert { .. } => added += 1,
            Edit::Delete { .. } => removed += 1,
            Edit::Equal { .. } => {}
        }
    }
    (added, removed)
}

/// Fraction of lines the two texts share, in `[0, 1]`.
pub fn similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let common = MyersDiff::new(a, b)
        .diff()
        .iter()
        .filter(|edit| matches!(edit, Edit::Equal { .. }))
        .count();
    (2.0 * common as f64) / (a.len() + b.len()) as f64
}

/// A contiguous replacement: base lines `[base_start, base_end)` become
/// `lines`. Pure insertions have an empty range, pure deletions empty lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub base_start: usize,
    pub base_end: usize,
    pub lines: Vec<String>,
}

/// The hunks turning `base` into `side`.
pub fn hunks(base: &[String], side: &[String]) -> Vec<Hunk> {
    let edits = MyersDiff::new(base, side).diff();
    let mut hunks = Vec::new();
    let mut open: Option<Hunk> = None;
    let mut cursor = 0usize;

    for edit in edits {
        match edit {
            Edit::Equal { old, .. } => {
                if let Some(hunk) = open.take() {
                    hunks.push(hunk);
                }
                cursor = old + 1;
            }
            Edit::Delete { old } => {
                let hunk = open.get_or_insert_with(|| Hunk {
                    base_start: old,
                    base_end: old,
                    lines: Vec::new(),
                });
                hunk.base_end = old + 1;
                cursor = old + 1;
            }
            Edit::Insert { new } => {
                let hunk = open.get_or_insert_with(|| Hunk {
                    base_start: cursor,
                    base_end: cursor,
                    lines: Vec::new(),
                });
                hunk.lines.push(side[new].clone());
            }
        }
    }
    if let Some(hunk) = open {
        hunks.push(hunk);
    }

    hunks
}

/// Two hunks collide when their base ranges intersect, or when both anchor at
/// the same position (competing insertions).
fn overlaps(a: &Hunk, b: &Hunk) -> bool {
    (a.base_start < b.base_end && b.base_start < a.base_end) || a.base_start == b.base_start
}

/// Result of [`merge_three_way`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeWayOutcome {
    /// Merged text when the merge was clean.
    pub content: Option<String>,
    pub clean: bool,
}

/// Hunk-level three-way text merge.
///
/// Changes from both sides are taken when they touch disjoint base ranges.
/// Any overlapping pair of differing hunks makes the whole file a conflict;
/// nothing is merged speculatively inside a collision.
pub fn merge_three_way(base: &str, ours: &str, theirs: &str) -> ThreeWayOutcome {
    let base_lines = split_lines(base);
    let our_hunks = hunks(&base_lines, &split_lines(ours));
    let their_hunks = hunks(&base_lines, &split_lines(theirs));

    for ours in &our_hunks {
        for theirs in &their_hunks {
            if overlaps(ours, theirs) && ours != theirs {
                return ThreeWayOutcome {
                    content: None,
                    clean: false,
                };
            }
        }
    }

    // Both sides making the identical change counts once.
    let mut merged: Vec<&Hunk> = Vec::new();
    for hunk in our_hunks.iter().chain(their_hunks.iter()) {
        if !merged.contains(&hunk) {
            merged.push(hunk);
        }
    }
    merged.sort_by_key(|hunk| (hunk.base_start, hunk.base_end));

    let mut out: Vec<String> = Vec::new();
    let mut cursor = 0;
    for hunk in merged {
        out.extend(base_lines[cursor..hunk.base_start].iter().cloned());
        out.extend(hunk.lines.iter().cloned());
        cursor = hunk.base_end;
    }
    out.extend(base_lines[cursor..].iter().cloned());

    ThreeWayOutcome {
        content: Some(out.concat()),
        clean: true,
    }
}

// Lines keep their terminators, so reassembly is byte-exact: a trailing
// newline survives the merge and a missing one on the last line is a real
// difference, not an artifact of the split.
fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    #[fixture]
    fn file_inputs() -> (Vec<String>, Vec<String>) {
        (
            vec!["line1", "line2", "line3", "line4"]
                .into_iter()
                .map(String::from)
                .collect(),
            vec!["line2", "line3_modified", "line4", "line5"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }

    #[rstest]
    fn edit_script_carries_indices(file_inputs: (Vec<String>, Vec<String>)) {
        let (a, b) = file_inputs;
        let result = MyersDiff::new(&a, &b).diff();
        let expected = vec![
            Edit::Delete { old: 0 },
            Edit::Equal { old: 1, new: 0 },
            Edit::Delete { old: 2 },
            Edit::Insert { new: 1 },
            Edit::Equal { old: 3, new: 2 },
            Edit::Insert { new: 3 },
        ];

        assert_eq!(result, expected);
    }

    #[rstest]
    fn empty_inputs_yield_no_edits() {
        let a: Vec<String> = vec![];
        let b: Vec<String> = vec![];
        assert_eq!(MyersDiff::new(&a, &b).diff(), vec![]);
    }

    #[rstest]
    fn counts_track_insertions_and_deletions(file_inputs: (Vec<String>, Vec<String>)) {
        let (a, b) = file_inputs;
        assert_eq!(diff_counts(&a, &b), (2, 2));
        assert_eq!(diff_counts(&a, &a), (0, 0));
    }

    #[rstest]
    fn hunks_coalesce_adjacent_edits(file_inputs: (Vec<String>, Vec<String>)) {
        let (a, b) = file_inputs;
        let hunks = hunks(&a, &b);

        assert_eq!(
            hunks,
            vec![
                Hunk {
                    base_start: 0,
                    base_end: 1,
                    lines: vec![],
                },
                Hunk {
                    base_start: 2,
                    base_end: 3,
                    lines: vec!["line3_modified".into()],
                },
                Hunk {
                    base_start: 4,
                    base_end: 4,
                    lines: vec!["line5".into()],
                },
            ]
        );
    }

    #[rstest]
    fn disjoint_edits_merge_cleanly() {
        let base = "fn a\nfn b\nfn c";
        let ours = "fn a changed\nfn b\nfn c";
        let theirs = "fn a\nfn b\nfn c changed";

        let outcome = merge_three_way(base, ours, theirs);
        assert!(outcome.clean);
        assert_eq!(
            outcome.content.as_deref(),
            Some("fn a changed\nfn b\nfn c changed")
        );
    }

    #[rstest]
    fn merged_content_keeps_the_trailing_newline() {
        let base = "alpha\nbeta\ngamma\n";
        let ours = "alpha changed\nbeta\ngamma\n";
        let theirs = "alpha\nbeta\ngamma changed\n";

        let outcome = merge_three_way(base, ours, theirs);
        assert!(outcome.clean);
        assert_eq!(
            outcome.content.as_deref(),
            Some("alpha changed\nbeta\ngamma changed\n")
        );
    }

    #[rstest]
    fn a_one_sided_change_reproduces_that_side_exactly() {
        let with_newline = "R1,2\nR2,1\n";
        let outcome = merge_three_way("R1,2\n", with_newline, "R1,2\n");
        assert!(outcome.clean);
        assert_eq!(outcome.content.as_deref(), Some(with_newline));
    }

    #[rstest]
    fn overlapping_edits_conflict() {
        let base = "width = 10";
        let ours = "width = 12";
        let theirs = "width = 14";

        let outcome = merge_three_way(base, ours, theirs);
        assert!(!outcome.clean);
        assert_eq!(outcome.content, None);
    }

    #[rstest]
    fn identical_changes_from_both_sides_apply_once() {
        let base = "qty = 1\nnote";
        let same = "qty = 2\nnote";

        let outcome = merge_three_way(base, same, same);
        assert!(outcome.clean);
        assert_eq!(outcome.content.as_deref(), Some("qty = 2\nnote"));
    }

    #[rstest]
    fn one_sided_change_passes_through() {
        let base = "a\nb";
        let ours = "a\nb";
        let theirs = "a\nb\nc";

        let outcome = merge_three_way(base, ours, theirs);
        assert!(outcome.clean);
        assert_eq!(outcome.content.as_deref(), Some("a\nb\nc"));
    }

    #[rstest]
    fn competing_insertions_at_the_same_spot_conflict() {
        let base = "a\nz";
        let ours = "a\nours\nz";
        let theirs = "a\ntheirs\nz";

        let outcome = merge_three_way(base, ours, theirs);
        assert!(!outcome.clean);
    }

    #[rstest]
    fn similarity_is_symmetric_in_the_extremes() {
        let same: Vec<String> = vec!["a".into(), "b".into()];
        assert_eq!(similarity(&same, &same), 1.0);

        let other: Vec<String> = vec!["x".into(), "y".into()];
        assert_eq!(similarity(&same, &other), 0.0);
    }
}
