//! Coalescing of overlapping trapezoids

use std::collections::BTreeMap;

use super::Trapezoid;

/// Diagonal bands overlap or are adjacent, and offset ranges overlap.
fn touches(a: &Trapezoid, b: &Trapezoid) -> bool {
    a.diag_lo <= b.diag_hi + 1
        && b.diag_lo <= a.diag_hi + 1
        && a.q_lo < b.q_hi
        && b.q_lo < a.q_hi
}

fn absorb(into: &mut Trapezoid, other: &Trapezoid) {
    into.diag_lo = into.diag_lo.min(other.diag_lo);
    into.diag_hi = into.diag_hi.max(other.diag_hi);
    into.q_lo = into.q_lo.min(other.q_lo);
    into.q_hi = into.q_hi.max(other.q_hi);
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// One sweep in offset order, joining every touching pair.
fn merge_pass(mut traps: Vec<Trapezoid>) -> Vec<Trapezoid> {
    traps.sort_unstable_by_key(|t| (t.q_lo, t.diag_lo));
    let mut parent: Vec<usize> = (0..traps.len()).collect();
    let mut active: Vec<usize> = Vec::new();

    for i in 0..traps.len() {
        let current = traps[i];
        active.retain(|&j| traps[j].q_hi > current.q_lo);
        for &j in &active {
            if touches(&traps[j], &current) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a] = b;
                }
            }
        }
        active.push(i);
    }

    let mut merged: BTreeMap<usize, Trapezoid> = BTreeMap::new();
    for (i, trap) in traps.iter().enumerate() {
        let root = find(&mut parent, i);
        merged
            .entry(root)
            .and_modify(|m| absorb(m, trap))
            .or_insert(*trap);
    }
    merged.into_values().collect()
}

/// Merge trapezoids until no two touch. Output is ordered by band then offset.
pub fn merge_trapezoids(mut traps: Vec<Trapezoid>) -> Vec<Trapezoid> {
    loop {
        let before = traps.len();
        traps = merge_pass(traps);
        if traps.len() == before {
            break;
        }
    }
    traps.sort_unstable_by_key(|t| (t.diag_lo, t.q_lo, t.diag_hi, t.q_hi));
    traps
}
