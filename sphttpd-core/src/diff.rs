//! Edit scripts between two track sequences.
//!
//! `diff` aligns the current playlist against the desired one on track
//! identity (longest common subsequence) and emits Retain / Delete / Insert
//! edits. Retain and Delete spans partition the source index range exactly;
//! Insert positions are expressed in the same source index space, meaning
//! "before the source element at this index".

use std::fmt;

use crate::track::Track;

/// Above this many DP cells the changed middle section is replaced wholesale
/// instead of aligned. The result is still a correct script, just not minimal.
const MAX_ALIGNMENT_CELLS: usize = 4_000_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Edit {
    /// Keep `source[start..start + len]`.
    Retain { start: usize, len: usize },
    /// Drop `source[start..start + len]`.
    Delete { start: usize, len: usize },
    /// Insert `tracks` before source index `at`.
    Insert { at: usize, tracks: Vec<Track> },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EditScript {
    source_len: usize,
    edits: Vec<Edit>,
}

impl EditScript {
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn source_len(&self) -> usize {
        self.source_len
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// True when the script leaves the source untouched.
    pub fn is_identity(&self) -> bool {
        self.edits
            .iter()
            .all(|edit| matches!(edit, Edit::Retain { .. }))
    }

    /// Number of tracks removed and inserted by the script.
    pub fn change_counts(&self) -> (usize, usize) {
        self.edits
            .iter()
            .fold((0, 0), |(removed, inserted), edit| match edit {
                Edit::Retain { .. } => (removed, inserted),
                Edit::Delete { len, .. } => (removed + len, inserted),
                Edit::Insert { tracks, .. } => (removed, inserted + tracks.len()),
            })
    }

    /// Run the script against a local copy of its source sequence.
    pub fn apply_to(&self, source: &[Track]) -> Vec<Track> {
        let mut out = Vec::with_capacity(source.len());
        for edit in &self.edits {
            match edit {
                Edit::Retain { start, len } => out.extend_from_slice(&source[*start..start + len]),
                Edit::Delete { .. } => {}
                Edit::Insert { tracks, .. } => out.extend_from_slice(tracks),
            }
        }
        out
    }

    fn retain(&mut self, index: usize) {
        if let Some(Edit::Retain { start, len }) = self.edits.last_mut() {
            if *start + *len == index {
                *len += 1;
                return;
            }
        }
        self.edits.push(Edit::Retain {
            start: index,
            len: 1,
        });
    }
}

impl fmt::Display for EditScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for edit in &self.edits {
            match edit {
                Edit::Retain { start, len } => writeln!(f, "  {start}+{len}")?,
                Edit::Delete { start, len } => writeln!(f, "- {start}+{len}")?,
                Edit::Insert { at, tracks } => {
                    for track in tracks {
                        writeln!(f, "+ {at} {track}")?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Compute the edit script turning `current` into `desired`.
///
/// Deterministic: ties in the alignment always prefer dropping from
/// `current` first, so identical inputs give identical scripts.
pub fn diff(current: &[Track], desired: &[Track]) -> EditScript {
    let mut script = EditScript {
        source_len: current.len(),
        edits: Vec::new(),
    };

    if current.is_empty() && desired.is_empty() {
        return script;
    }
    if desired.is_empty() {
        script.edits.push(Edit::Delete {
            start: 0,
            len: current.len(),
        });
        return script;
    }
    if current.is_empty() {
        script.edits.push(Edit::Insert {
            at: 0,
            tracks: desired.to_vec(),
        });
        return script;
    }

    let (keep_current, keep_desired) = alignment_flags(current, desired);

    let (m, n) = (current.len(), desired.len());
    let (mut i, mut j) = (0, 0);
    while i < m || j < n {
        if i < m && j < n && keep_current[i] && keep_desired[j] {
            script.retain(i);
            i += 1;
            j += 1;
            continue;
        }

        let delete_start = i;
        while i < m && !keep_current[i] {
            i += 1;
        }
        let insert_start = j;
        while j < n && !keep_desired[j] {
            j += 1;
        }

        if i > delete_start {
            script.edits.push(Edit::Delete {
                start: delete_start,
                len: i - delete_start,
            });
        }
        if j > insert_start {
            script.edits.push(Edit::Insert {
                at: i,
                tracks: desired[insert_start..j].to_vec(),
            });
        }
    }

    script
}

/// Mark which elements of each side belong to the common subsequence.
fn alignment_flags(current: &[Track], desired: &[Track]) -> (Vec<bool>, Vec<bool>) {
    let (m, n) = (current.len(), desired.len());
    let mut keep_current = vec![false; m];
    let mut keep_desired = vec![false; n];

    let prefix = current
        .iter()
        .zip(desired)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = current[prefix..]
        .iter()
        .rev()
        .zip(desired[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    keep_current[..prefix].fill(true);
    keep_desired[..prefix].fill(true);
    keep_current[m - suffix..].fill(true);
    keep_desired[n - suffix..].fill(true);

    let middle_current = &current[prefix..m - suffix];
    let middle_desired = &desired[prefix..n - suffix];
    if middle_current.is_empty() || middle_desired.is_empty() {
        return (keep_current, keep_desired);
    }
    if (middle_current.len() + 1).saturating_mul(middle_desired.len() + 1) > MAX_ALIGNMENT_CELLS {
        return (keep_current, keep_desired);
    }

    let (mc, md) = lcs_flags(middle_current, middle_desired);
    keep_current[prefix..m - suffix].copy_from_slice(&mc);
    keep_desired[prefix..n - suffix].copy_from_slice(&md);
    (keep_current, keep_desired)
}

fn lcs_flags(current: &[Track], desired: &[Track]) -> (Vec<bool>, Vec<bool>) {
    let m = current.len();
    let n = desired.len();
    let width = n + 1;
    let mut dp = vec![0u32; (m + 1) * width];

    for i in 0..m {
        for j in 0..n {
            dp[(i + 1) * width + j + 1] = if current[i] == desired[j] {
                dp[i * width + j] + 1
            } else {
                dp[(i + 1) * width + j].max(dp[i * width + j + 1])
            };
        }
    }

    let mut keep_current = vec![false; m];
    let mut keep_desired = vec![false; n];
    let (mut i, mut j) = (m, n);

    while i > 0 && j > 0 {
        if current[i - 1] == desired[j - 1] {
            keep_current[i - 1] = true;
            keep_desired[j - 1] = true;
            i -= 1;
            j -= 1;
        } else if dp[(i - 1) * width + j] >= dp[i * width + j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }

    (keep_current, keep_desired)
}
