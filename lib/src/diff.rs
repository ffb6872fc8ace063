// Copyright 2024 The Grit Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Content-comparison readers: binary detection, byte-run diff for
//! equal-sized payloads, and a Myers shortest-edit-script diff over lines.
//!
//! These are raw readers; rendering (unified hunks, context windows) is the
//! display layer's concern.

use std::ops::Range;

/// How many leading bytes the binary probe inspects.
const BINARY_PROBE_LEN: usize = 8000;

/// Whether content is treated as text or opaque bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Binary,
}

impl ContentKind {
    /// A NUL byte in the leading probe window marks content as binary, the
    /// same heuristic Git uses.
    pub fn classify(data: &[u8]) -> Self {
        let probe = &data[..data.len().min(BINARY_PROBE_LEN)];
        if probe.contains(&0) {
            Self::Binary
        } else {
            Self::Text
        }
    }
}

/// Byte ranges where two equal-length payloads disagree, as maximal runs.
/// Returns `None` when the lengths differ (the caller wants a length-aware
/// message for that case, not a byte list).
pub fn same_size_changed_ranges(left: &[u8], right: &[u8]) -> Option<Vec<Range<usize>>> {
    if left.len() != right.len() {
        return None;
    }
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut run_start = None;
    for (i, (a, b)) in std::iter::zip(left, right).enumerate() {
        if a != b {
            run_start.get_or_insert(i);
        } else if let Some(start) = run_start.take() {
            ranges.push(start..i);
        }
    }
    if let Some(start) = run_start {
        ranges.push(start..left.len());
    }
    Some(ranges)
}

/// One line of a shortest edit script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineOp<'a> {
    Keep(&'a str),
    Delete(&'a str),
    Insert(&'a str),
}

/// Line-based Myers diff: the shortest edit script turning `left` into
/// `right`. Lines keep their terminators, so a missing final newline
/// surfaces as a changed last line.
pub fn diff_lines<'a>(left: &'a str, right: &'a str) -> Vec<LineOp<'a>> {
    let a: Vec<&str> = left.split_inclusive('\n').collect();
    let b: Vec<&str> = right.split_inclusive('\n').collect();
    myers(&a, &b)
}

/// Myers O((N+M)D) greedy shortest-edit-script search with full trace
/// backtracking.
fn myers<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<LineOp<'a>> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = n + m;
    if max == 0 {
        return vec![];
    }
    let offset = max;
    let width = (2 * max + 1) as usize;
    // v[k + offset] is the furthest x reached on diagonal k.
    let mut v = vec![0isize; width];
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
            while x < n && y < m && a[x as usize] == b[y as usize] {
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

    // Walk the trace backwards from (n, m) to (0, 0), emitting ops in
    // reverse.
    let mut ops = Vec::new();
    let mut x = n;
    let mut y = m;
    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let k = x - y;
        let idx = (k + offset) as usize;
        let prev_k = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[(prev_k + offset) as usize];
        let prev_y = prev_x - prev_k;
        while x > prev_x && y > prev_y {
            ops.push(LineOp::Keep(a[(x - 1) as usize]));
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                ops.push(LineOp::Insert(b[(y - 1) as usize]));
            } else {
                ops.push(LineOp::Delete(a[(x - 1) as usize]));
            }
        }
        x = prev_x;
        y = prev_y;
    }
    ops.reverse();
    ops
}
