//! Thin reducers over a [`CqtResult`]: per-bin statistics across time, and
//! per-time-slice statistics across bins at a chosen resolution. Both are
//! exact with respect to the `CqtResult` they were built from — no
//! smoothing or interpolation beyond what `note_value_mean` already does.

use crate::cqt::CqtResult;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BinStat {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub variance: f64,
}

/// Per-(octave, bin) mean/min/max/variance of magnitude across all time
/// columns of that bin.
#[derive(Clone, Debug, Default)]
pub struct PerBinStatistics {
    /// `stats[o][b]`
    pub stats: Vec<Vec<BinStat>>,
}

impl PerBinStatistics {
    #[must_use]
    pub fn compute(result: &CqtResult) -> Self {
        let stats = result
            .octaves
            .iter()
            .map(|mat| {
                (0..mat.nrows())
                    .map(|b| {
                        let values: Vec<f64> =
                            (0..mat.ncols()).map(|c| mat[[b, c]].norm()).collect();
                        bin_stat(&values)
                    })
                    .collect()
            })
            .collect();
        Self { stats }
    }
}

fn bin_stat(values: &[f64]) -> BinStat {
    if values.is_empty() {
        return BinStat::default();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    BinStat {
        mean,
        min,
        max,
        variance,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SliceStat {
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub variance: f64,
}

/// Per-time-slice sum/mean/min/max/variance across all bins of all octaves,
/// sampled at `slice_seconds` resolution over `[0, duration)`.
#[derive(Clone, Debug, Default)]
pub struct PerTimeSliceStatistics {
    pub slices: Vec<SliceStat>,
    pub slice_seconds: f64,
}

impl PerTimeSliceStatistics {
    #[must_use]
    pub fn compute(result: &CqtResult, slice_seconds: f64) -> Self {
        if slice_seconds <= 0.0 || result.original_duration <= 0.0 {
            return Self {
                slices: Vec::new(),
                slice_seconds,
            };
        }
        let slice_count = (result.original_duration / slice_seconds).ceil() as usize;
        let slices = (0..slice_count)
            .map(|i| {
                let t = i as f64 * slice_seconds;
                let mut values = Vec::new();
                for o in 0..result.octave_count {
                    for b in 0..result.bins_per_octave {
                        values.push(result.note_value_mean(t, o, b, slice_seconds));
                    }
                }
                slice_stat(&values)
            })
            .collect();
        Self {
            slices,
            slice_seconds,
        }
    }
}

fn slice_stat(values: &[f64]) -> SliceStat {
    if values.is_empty() {
        return SliceStat::default();
    }
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    let mean = sum / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    SliceStat {
        sum,
        mean,
        min,
        max,
        variance,
    }
}
