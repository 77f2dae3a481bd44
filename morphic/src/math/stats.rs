//! Robust statistics used by the flow confidence model.

/// Median of `data`, reordering it in place (quickselect).
///
/// Returns 0 for an empty slice.
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }

    let len = data.len();
    let mid = len / 2;

    if len & 1 == 1 {
        let (_, median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
        *median
    } else {
        let (left_part, right_median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
        let right = *right_median;
        let left = left_part.iter().copied().fold(f32::MIN, f32::max);
        (left + right) * 0.5
    }
}

/// Median and MAD (median absolute deviation) of `values`.
pub fn median_and_mad_f32(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut scratch = values.to_vec();
    let median = median_f32_mut(&mut scratch);
    scratch.clear();
    scratch.extend(values.iter().map(|&v| (v - median).abs()));
    let mad = median_f32_mut(&mut scratch);
    (median, mad)
}
