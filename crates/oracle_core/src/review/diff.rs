//! Line diff between a request's current text and the reviewer's draft.

use std::ops::Range;

use similar::{DiffOp, DiffTag, TextDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineChange {
    Equal,
    Removed,
    Added,
    Modified,
}

/// One row of the side-by-side view. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRow {
    pub change: LineChange,
    pub left: Option<(usize, String)>,
    pub right: Option<(usize, String)>,
}

#[derive(Debug, Clone)]
pub struct DiffView {
    old: String,
    new: String,
    old_lines: Vec<String>,
    new_lines: Vec<String>,
    ops: Vec<DiffOp>,
}

impl DiffView {
    pub fn new(old: &str, new: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);
        let ops = diff.ops().to_vec();
        Self {
            old: old.to_string(),
            new: new.to_string(),
            old_lines: split_lines(diff.old_slices()),
            new_lines: split_lines(diff.new_slices()),
            ops,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.ops.iter().any(|op| op.tag() != DiffTag::Equal)
    }

    /// `(added, removed)` line counts.
    pub fn stats(&self) -> (usize, usize) {
        self.ops.iter().fold((0, 0), |(added, removed), op| {
            let (tag, old, new) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => (added, removed),
                DiffTag::Delete => (added, removed + old.len()),
                DiffTag::Insert => (added + new.len(), removed),
                DiffTag::Replace => (added + new.len(), removed + old.len()),
            }
        })
    }

    pub fn split_rows(&self) -> Vec<SplitRow> {
        let mut rows = Vec::new();
        for op in &self.ops {
            let (tag, old, new) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => {
                    for (o, n) in old.zip(new) {
                        rows.push(SplitRow {
                            change: LineChange::Equal,
                            left: self.old_line(o),
                            right: self.new_line(n),
                        });
                    }
                }
                DiffTag::Delete => rows.extend(old.map(|o| SplitRow {
                    change: LineChange::Removed,
                    left: self.old_line(o),
                    right: None,
                })),
                DiffTag::Insert => rows.extend(new.map(|n| SplitRow {
                    change: LineChange::Added,
                    left: None,
                    right: self.new_line(n),
                })),
                DiffTag::Replace => rows.extend(self.paired(old, new)),
            }
        }
        rows
    }

    /// Changed rows plus up to `context` unchanged rows around each of them.
    pub fn changed_rows(&self, context: usize) -> Vec<SplitRow> {
        let rows = self.split_rows();
        let changed: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.change != LineChange::Equal)
            .map(|(index, _)| index)
            .collect();
        rows.into_iter()
            .enumerate()
            .filter(|(index, _)| {
                changed
                    .iter()
                    .any(|c| index.abs_diff(*c) <= context)
            })
            .map(|(_, row)| row)
            .collect()
    }

    pub fn unified(&self, context: usize) -> String {
        let diff = TextDiff::from_lines(&self.old, &self.new);
        let mut unified = diff.unified_diff();
        unified.context_radius(context).header("current", "proposed");
        unified.to_string()
    }

    fn paired(&self, old: Range<usize>, new: Range<usize>) -> Vec<SplitRow> {
        let len = old.len().max(new.len());
        (0..len)
            .map(|offset| {
                let left = (offset < old.len())
                    .then(|| self.old_line(old.start + offset))
                    .flatten();
                let right = (offset < new.len())
                    .then(|| self.new_line(new.start + offset))
                    .flatten();
                let change = match (&left, &right) {
                    (Some(_), Some(_)) => LineChange::Modified,
                    (Some(_), None) => LineChange::Removed,
                    _ => LineChange::Added,
                };
                SplitRow {
                    change,
                    left,
                    right,
                }
            })
            .collect()
    }

    fn old_line(&self, index: usize) -> Option<(usize, String)> {
        self.old_lines.get(index).map(|line| (index + 1, line.clone()))
    }

    fn new_line(&self, index: usize) -> Option<(usize, String)> {
        self.new_lines.get(index).map(|line| (index + 1, line.clone()))
    }
}

fn split_lines(slices: &[&str]) -> Vec<String> {
    slices
        .iter()
        .map(|line| line.trim_end_matches(['\r', '\n']).to_string())
        .collect()
}
