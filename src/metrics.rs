// src/metrics.rs
//
// Small, dependency-free metric primitives over numeric sequences.
// - OnlineStats: Welford running mean/variance + min/max.
// - rmse / correlation / mean / variance / window_variance.
// - Structural indicators: dominance_share, internal_vs_external_cohesion,
//   effective_information.
//
// Every function is total: degenerate inputs (empty, constant, mismatched
// lengths) return 0.0 rather than NaN.

use crate::types::GridHistory;

#[derive(Debug, Clone, Copy)]
pub struct OnlineStats {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for OnlineStats {
    fn default() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl OnlineStats {
    pub fn from_slice(xs: &[f64]) -> Self {
        let mut s = Self::default();
        for &x in xs {
            s.add(x);
        }
        s
    }

    /// Adds a sample if finite. Non-finite samples are ignored.
    pub fn add(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }

        self.n += 1;
        self.min = self.min.min(x);
        self.max = self.max.max(x);

        // Welford online variance.
        let delta = x - self.mean;
        self.mean += delta / (self.n as f64);
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.mean
        }
    }

    pub fn min(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Population variance (divide by n).
    pub fn variance_population(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.m2 / (self.n as f64)
        }
    }

    pub fn stddev_population(&self) -> f64 {
        self.variance_population().sqrt()
    }
}

pub fn mean(xs: &[f64]) -> f64 {
    OnlineStats::from_slice(xs).mean()
}

/// Population variance.
pub fn variance(xs: &[f64]) -> f64 {
    OnlineStats::from_slice(xs).variance_population()
}

/// Root-mean-square error over the common prefix of `a` and `b`.
pub fn rmse(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let sse: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (sse / n as f64).sqrt()
}

/// Pearson correlation over the common prefix; 0.0 when either side is
/// constant.
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let ma = mean(a);
    let mb = mean(b);

    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - ma;
        let dy = y - mb;
        cov += dx * dy;
        va += dx * dx;
        vb += dy * dy;
    }

    let denom = (va * vb).sqrt();
    if denom < 1e-12 || !denom.is_finite() {
        0.0
    } else {
        cov / denom
    }
}

/// Mean of the population variances of consecutive, non-overlapping windows.
///
/// A trailing partial window is dropped. Series shorter than one window
/// fall back to their own variance.
pub fn window_variance(xs: &[f64], window: usize) -> f64 {
    if window == 0 || xs.len() < window {
        return variance(xs);
    }
    let vars: Vec<f64> = xs.chunks_exact(window).map(variance).collect();
    mean(&vars)
}

/// Share of the total absolute activity held by the single largest cell of
/// the final grid frame. Uniform grids sit near `1 / cells`.
pub fn dominance_share(grid: &GridHistory) -> f64 {
    let frame = grid.last_frame();
    let total: f64 = frame.iter().map(|x| x.abs()).sum();
    if total < 1e-12 || !total.is_finite() {
        return 0.0;
    }
    let largest = frame.iter().map(|x| x.abs()).fold(0.0_f64, f64::max);
    largest / total
}

/// Returns `(internal, external)` cohesion.
///
/// - internal: mean |corr| between each cell's time series and its right and
///   down neighbours.
/// - external: mean |corr| between each cell's time series and the forcing.
pub fn internal_vs_external_cohesion(grid: &GridHistory, forcing: &[f64]) -> (f64, f64) {
    let n = grid.size;
    if n == 0 || grid.frames.is_empty() {
        return (0.0, 0.0);
    }

    let series: Vec<Vec<f64>> = (0..grid.num_cells()).map(|i| grid.cell_series(i)).collect();

    let mut internal = OnlineStats::default();
    let mut external = OnlineStats::default();
    for row in 0..n {
        for col in 0..n {
            let i = row * n + col;
            if col + 1 < n {
                internal.add(correlation(&series[i], &series[i + 1]).abs());
            }
            if row + 1 < n {
                internal.add(correlation(&series[i], &series[i + n]).abs());
            }
            external.add(correlation(&series[i], forcing).abs());
        }
    }

    (internal.mean(), external.mean())
}

/// Mutual information (bits) between `x` and `y` after equal-width binning.
pub fn effective_information(x: &[f64], y: &[f64], bins: usize) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 || bins == 0 {
        return 0.0;
    }

    let bx = discretize(&x[..n], bins);
    let by = discretize(&y[..n], bins);

    let mut joint = vec![0usize; bins * bins];
    let mut px = vec![0usize; bins];
    let mut py = vec![0usize; bins];
    for (&i, &j) in bx.iter().zip(&by) {
        joint[i * bins + j] += 1;
        px[i] += 1;
        py[j] += 1;
    }

    let total = n as f64;
    let mut mi = 0.0;
    for i in 0..bins {
        for j in 0..bins {
            let c = joint[i * bins + j];
            if c == 0 {
                continue;
            }
            let pxy = c as f64 / total;
            let pi = px[i] as f64 / total;
            let pj = py[j] as f64 / total;
            mi += pxy * (pxy / (pi * pj)).log2();
        }
    }

    mi.max(0.0)
}

fn discretize(xs: &[f64], bins: usize) -> Vec<usize> {
    let stats = OnlineStats::from_slice(xs);
    let (lo, hi) = (stats.min(), stats.max());
    let width = hi - lo;
    xs.iter()
        .map(|&x| {
            if width <= 0.0 || !x.is_finite() {
                0
            } else {
                (((x - lo) / width * bins as f64) as usize).min(bins - 1)
            }
        })
        .collect()
}
