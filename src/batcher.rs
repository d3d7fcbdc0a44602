//! Time-bucketed batching of routed samples.
//!
//! The ingestion endpoint accepts one payload per (identity, epoch-second),
//! so a destination's samples are sorted by timestamp and split into runs of
//! coincident epoch-seconds, each run becoming one delivery unit.

use crate::common::RoutedSample;

/// Partitions `samples` into same-epoch-second groups, ascending in time.
///
/// The sort is stable, so samples sharing a timestamp keep their arrival
/// order.  An empty input produces no groups.
pub(crate) fn batch(mut samples: Vec<RoutedSample>) -> Vec<Vec<RoutedSample>> {
    if samples.is_empty() {
        return Vec::new();
    }

    samples.sort_by_key(|sample| sample.epoch_millis);

    let mut groups = Vec::new();
    let mut current: Vec<RoutedSample> = Vec::new();
    let mut bucket = samples[0].epoch_seconds();

    for sample in samples {
        if sample.epoch_seconds() != bucket {
            bucket = sample.epoch_seconds();
            groups.push(std::mem::take(&mut current));
        }
        current.push(sample);
    }
    groups.push(current);

    groups
}
