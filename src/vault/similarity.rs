//! Ratcliff/Obershelp similarity over raw payload characters.
//!
//! The score is `2 * M / (len(a) + len(b))` where `M` is the total size of the
//! matching blocks found by recursively taking the longest common substring
//! and recursing on both sides of it. Payloads are opaque character sequences:
//! no tokenizing, no junk heuristics. Two empty payloads score `1.0`.

use std::collections::HashMap;

/// A payload prepared once for repeated comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    chars: Vec<char>,
}

impl Sequence {
    pub fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

pub fn similarity(a: &str, b: &str) -> f64 {
    ratio(&Sequence::new(a), &Sequence::new(b))
}

/// Cheap bound: no alignment can score above `2 * min / (la + lb)`.
pub fn upper_bound(a: &Sequence, b: &Sequence) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let total = a.len() + b.len();
    2.0 * a.len().min(b.len()) as f64 / total as f64
}

pub fn ratio(a: &Sequence, b: &Sequence) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    // Tie-breaking inside the block search depends on argument order; a fixed
    // order keeps the score symmetric.
    let (left, right) = if a.chars <= b.chars { (a, b) } else { (b, a) };
    let matched = matching_chars(&left.chars, &right.chars);
    2.0 * matched as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, ch) in b.iter().enumerate() {
        b2j.entry(*ch).or_default().push(j);
    }

    let mut total = 0usize;
    let mut queue = vec![(0usize, a.len(), 0usize, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        total += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    total
}

/// Longest block `a[i..i+k] == b[j..j+k]` inside the window; earliest `i`, then
/// earliest `j`, wins ties.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0usize);
    let mut run_at: HashMap<usize, usize> = HashMap::new();

    for (i, ch) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next_run: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(ch) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| run_at.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next_run.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        run_at = next_run;
    }

    (best_i, best_j, best_k)
}
