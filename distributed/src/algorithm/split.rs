use std::ops::Range;

/// Splits `total` items among `parts` and returns the range of part `index`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1, the first `total % parts` parts get the larger size.
/// - An `index` out of `0..parts` gets an empty range at the end.
pub fn partition_range(total: usize, index: usize, parts: usize) -> Range<usize> {
    if index >= parts {
        return total..total;
    }

    let base = total / parts;
    let rem = total % parts;

    let start = index * base + index.min(rem);
    let extra = if index < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// The contiguous slice of `files` a worker trains on.
///
/// # Arguments
/// * `files` - Every file of the job, in a fixed order shared by all workers.
/// * `index` - The index of the worker.
/// * `workers` - The amount of workers in the job.
pub fn split_files<T: Clone>(files: &[T], index: usize, workers: usize) -> Vec<T> {
    files[partition_range(files.len(), index, workers)].to_vec()
}
