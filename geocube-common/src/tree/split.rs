//! Candidate split-dimension heuristics, selected from a leaf's
//! buffered points plus its bounding box.

/// Result of choosing where to split a leaf.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplitChoice {
    pub dim_index: usize,
    pub split_val: f64,
}

/// Median of a column of values. Mutates `values` (partial sort via
/// nth_element-style selection), same trade-off the quickselect in the
/// source makes: O(n) average, no extra allocation beyond the input.
fn median(values: &mut [f64]) -> f64 {
    let mid = values.len() / 2;
    values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap());
    values[mid]
}

/// Discrete Shannon entropy of a column, bucketed into `bins` equal-width
/// cells across `[min, max]`. Degenerate ranges (min >= max) have zero
/// entropy by convention.
fn entropy(values: &[f64], min: f64, max: f64, bins: u32) -> f64 {
    if max <= min || bins == 0 || values.is_empty() {
        return 0.0;
    }
    let bins = bins as usize;
    let width = (max - min) / bins as f64;
    let mut counts = vec![0u32; bins];
    for &v in values {
        let b = (((v - min) / width) as usize).min(bins - 1);
        counts[b] += 1;
    }
    let n = values.len() as f64;
    counts
        .into_iter()
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// Per-dim columns extracted from a leaf's buffered points, along with
/// the leaf's current bounding box and grid resolution. Heuristics only
/// need this slice of state, not the full node/tree.
pub struct SplitInput<'a> {
    pub columns: &'a [Vec<f64>],
    pub mins: &'a [f64],
    pub maxs: &'a [f64],
    pub d_caps: &'a [u32],
}

/// Heuristic 1: pick the dim whose median is farthest (relative to box
/// width) from the box center.
pub fn median_deviation(input: &SplitInput) -> SplitChoice {
    let mut best_dim = 0;
    let mut best_metric = f64::NEG_INFINITY;
    let mut best_val = input.mins[0];
    for (i, col) in input.columns.iter().enumerate() {
        let mut col = col.clone();
        let med = median(&mut col);
        let width = input.maxs[i] - input.mins[i];
        let center = (input.maxs[i] + input.mins[i]) / 2.0;
        let metric = (med - center).abs() / width;
        if metric > best_metric {
            best_metric = metric;
            best_dim = i;
            best_val = med;
        }
    }
    SplitChoice {
        dim_index: best_dim,
        split_val: best_val,
    }
}

/// Heuristic 2: pick the dim with highest discrete entropy; split at its
/// median.
pub fn entropy_argmax(input: &SplitInput) -> SplitChoice {
    let mut best_dim = 0;
    let mut best_entropy = f64::NEG_INFINITY;
    for (i, col) in input.columns.iter().enumerate() {
        let e = entropy(col, input.mins[i], input.maxs[i], input.d_caps[i]);
        if e > best_entropy {
            best_entropy = e;
            best_dim = i;
        }
    }
    let mut col = input.columns[best_dim].clone();
    let split_val = median(&mut col);
    SplitChoice {
        dim_index: best_dim,
        split_val,
    }
}

/// Default heuristic: start from the lowest-entropy dim (sharp medians
/// cut cleanly there), but fall back to the highest-entropy dim when
/// that split would be too lopsided to be worth it.
pub fn hybrid(input: &SplitInput) -> SplitChoice {
    const BALANCE_THRESHOLD: f64 = 0.2;

    let mut min_entropy_dim = 0;
    let mut min_entropy = f64::INFINITY;
    for (i, col) in input.columns.iter().enumerate() {
        let e = entropy(col, input.mins[i], input.maxs[i], input.d_caps[i]);
        if e < min_entropy {
            min_entropy = e;
            min_entropy_dim = i;
        }
    }

    let mut col = input.columns[min_entropy_dim].clone();
    let split_val = median(&mut col);
    let left = input.columns[min_entropy_dim]
        .iter()
        .filter(|&&v| v < split_val)
        .count();
    let right = input.columns[min_entropy_dim].len() - left;
    let balance = (left * right) as f64 / (input.columns[min_entropy_dim].len().pow(2)) as f64;

    if balance > BALANCE_THRESHOLD {
        SplitChoice {
            dim_index: min_entropy_dim,
            split_val,
        }
    } else {
        entropy_argmax(input)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SplitHeuristic {
    MedianDeviation,
    EntropyArgmax,
    Hybrid,
}

impl Default for SplitHeuristic {
    fn default() -> Self {
        SplitHeuristic::Hybrid
    }
}

impl SplitHeuristic {
    pub fn choose(&self, input: &SplitInput) -> SplitChoice {
        match self {
            SplitHeuristic::MedianDeviation => median_deviation(input),
            SplitHeuristic::EntropyArgmax => entropy_argmax(input),
            SplitHeuristic::Hybrid => hybrid(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_slice() {
        let mut v = vec![3.0, 1.0, 2.0];
        assert_eq!(median(&mut v), 2.0);
    }

    #[test]
    fn entropy_is_zero_for_constant_column() {
        let v = vec![1.0, 1.0, 1.0, 1.0];
        assert_eq!(entropy(&v, 0.0, 2.0, 4), 0.0);
    }

    #[test]
    fn entropy_is_higher_for_spread_out_data() {
        let uniform = vec![0.1, 1.1, 2.1, 3.1];
        let clustered = vec![0.1, 0.2, 0.3, 0.4];
        let e_uniform = entropy(&uniform, 0.0, 4.0, 4);
        let e_clustered = entropy(&clustered, 0.0, 4.0, 4);
        assert!(e_uniform > e_clustered);
    }

    #[test]
    fn median_deviation_picks_most_skewed_dim() {
        let columns = vec![vec![5.0, 5.1, 4.9, 5.0], vec![0.0, 0.1, 0.0, 9.9]];
        let mins = vec![0.0, 0.0];
        let maxs = vec![10.0, 10.0];
        let d_caps = vec![4, 4];
        let input = SplitInput {
            columns: &columns,
            mins: &mins,
            maxs: &maxs,
            d_caps: &d_caps,
        };
        let choice = median_deviation(&input);
        assert_eq!(choice.dim_index, 1);
    }

    #[test]
    fn hybrid_falls_back_when_low_entropy_split_is_lopsided() {
        // dim 0: all but one point clustered near the min -> low entropy,
        // median split would leave almost everything on one side.
        let columns = vec![
            vec![0.1, 0.1, 0.1, 9.9],
            vec![0.0, 2.5, 5.0, 7.5],
        ];
        let mins = vec![0.0, 0.0];
        let maxs = vec![10.0, 10.0];
        let d_caps = vec![4, 4];
        let input = SplitInput {
            columns: &columns,
            mins: &mins,
            maxs: &maxs,
            d_caps: &d_caps,
        };
        let choice = hybrid(&input);
        // whichever dim wins, the split must actually divide the data
        let col = &columns[choice.dim_index];
        let left = col.iter().filter(|&&v| v < choice.split_val).count();
        assert!(left > 0 && left < col.len());
    }
}
