//! Outlier trimming and k-way merging of sorted latency streams.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Drops the first and last `fraction` percent of a sorted sample stream.
///
/// Trimming is applied to each client's stream independently, *before* any
/// merge, so that every client's ramp-up and ramp-down samples are removed
/// rather than a global slice of the merged distribution.
pub fn trim_sorted(samples: &[u64], fraction: f64) -> &[u64] {
    let drop = (samples.len() as f64 * fraction / 100.0) as usize;
    if samples.len() < 2 * drop {
        return &[];
    }
    &samples[drop..samples.len() - drop]
}

/// Merges `k` pre-sorted streams into one sorted sequence in O(N log k).
///
/// Driven by a min-heap over the heads of the streams, which avoids
/// re-sorting hundreds of thousands of samples from scratch for every trial
/// folder in a batch.
pub fn merge_sorted(streams: &[&[u64]]) -> Vec<u64> {
    let total = streams.iter().map(|s| s.len()).sum();
    let mut merged = Vec::with_capacity(total);

    let mut heap = BinaryHeap::with_capacity(streams.len());
    for (stream, samples) in streams.iter().enumerate() {
        if let Some(&head) = samples.first() {
            heap.push(Reverse((head, stream, 0usize)));
        }
    }

    while let Some(Reverse((value, stream, pos))) = heap.pop() {
        merged.push(value);
        if let Some(&next) = streams[stream].get(pos + 1) {
            heap.push(Reverse((next, stream, pos + 1)));
        }
    }

    merged
}
