//! Simultaneous confidence intervals for multinomial proportions.
//!
//! - `goodman`: chi-squared approximation (Goodman, 1965); reliable when every cell count is
//!   at least five.
//! - `sison-glaz`: Poisson truncation with an Edgeworth correction (Sison & Glaz, 1995); less
//!   conservative, intended for seven or more categories.
//! - `binomial`: independent per-cell Wilson score intervals (no simultaneous coverage).

use serde::{Deserialize, Serialize};
use statrs::distribution::{
    ChiSquared, ContinuousCDF, Discrete, DiscreteCDF, Normal, Poisson,
};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfidenceIntervalError {
    #[error("Unknown confidence interval method '{0}'; expected goodman, sison-glaz or binomial.")]
    UnknownMethod(String),
    #[error("Significance level alpha must lie in (0, 1], found {0}.")]
    InvalidAlpha(f64),
    #[error("Cell counts must be finite and non-negative, found {0}.")]
    InvalidCount(f64),
    #[error("Distribution setup failed: {0}")]
    Distribution(String),
    #[error("No c solves nu(c) <= 1 - alpha < nu(c + 1) for a row of {total} observations.")]
    SisonGlazNoSolution { total: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceMethod {
    #[default]
    Goodman,
    SisonGlaz,
    Binomial,
}

impl FromStr for ConfidenceMethod {
    type Err = ConfidenceIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "goodman" => Ok(ConfidenceMethod::Goodman),
            "sison-glaz" => Ok(ConfidenceMethod::SisonGlaz),
            "binomial" => Ok(ConfidenceMethod::Binomial),
            other => Err(ConfidenceIntervalError::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for ConfidenceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfidenceMethod::Goodman => "goodman",
            ConfidenceMethod::SisonGlaz => "sison-glaz",
            ConfidenceMethod::Binomial => "binomial",
        })
    }
}

/// Interval method and significance level. Construct through [`ConfidenceIntervalConfig::new`]
/// or check deserialized values with [`ConfidenceIntervalConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceIntervalConfig {
    #[serde(default)]
    pub method: ConfidenceMethod,
    pub alpha: f64,
}

impl Default for ConfidenceIntervalConfig {
    fn default() -> Self {
        Self {
            method: ConfidenceMethod::Goodman,
            alpha: 0.05,
        }
    }
}

impl ConfidenceIntervalConfig {
    pub fn new(method: ConfidenceMethod, alpha: f64) -> Result<Self, ConfidenceIntervalError> {
        let config = Self { method, alpha };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfidenceIntervalError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfidenceIntervalError::InvalidAlpha(self.alpha));
        }
        Ok(())
    }
}

/// Lower and upper bounds for each cell of one multinomial row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowIntervals {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl RowIntervals {
    /// `(0, 1)` for every cell.
    pub fn uninformative(cells: usize) -> Self {
        Self {
            lower: vec![0.0; cells],
            upper: vec![1.0; cells],
        }
    }
}

fn distribution_error(err: impl fmt::Display) -> ConfidenceIntervalError {
    ConfidenceIntervalError::Distribution(err.to_string())
}

/// Intervals for one row of counts. A row without observations gets `(0, 1)` everywhere.
pub fn multinomial_intervals(
    counts: &[f64],
    config: &ConfidenceIntervalConfig,
) -> Result<RowIntervals, ConfidenceIntervalError> {
    config.validate()?;
    if let Some(&bad) = counts.iter().find(|c| !c.is_finite() || **c < 0.0) {
        return Err(ConfidenceIntervalError::InvalidCount(bad));
    }
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return Ok(RowIntervals::uninformative(counts.len()));
    }
    match config.method {
        ConfidenceMethod::Goodman => goodman(counts, total, config.alpha),
        ConfidenceMethod::SisonGlaz => sison_glaz(counts, total, config.alpha),
        ConfidenceMethod::Binomial => wilson(counts, total, config.alpha),
    }
}

fn goodman(counts: &[f64], n: f64, alpha: f64) -> Result<RowIntervals, ConfidenceIntervalError> {
    let k = counts.len() as f64;
    let chi2 = ChiSquared::new(1.0)
        .map_err(distribution_error)?
        .inverse_cdf(1.0 - alpha / k);
    let mut lower = Vec::with_capacity(counts.len());
    let mut upper = Vec::with_capacity(counts.len());
    for &count in counts {
        let p = count / n;
        let delta = chi2 * chi2 + 4.0 * n * p * chi2 * (1.0 - p);
        let root = delta.max(0.0).sqrt();
        let denominator = 2.0 * (chi2 + n);
        lower.push((2.0 * n * p + chi2 - root) / denominator);
        upper.push((2.0 * n * p + chi2 + root) / denominator);
    }
    Ok(RowIntervals { lower, upper })
}

fn wilson(counts: &[f64], n: f64, alpha: f64) -> Result<RowIntervals, ConfidenceIntervalError> {
    let z = Normal::new(0.0, 1.0)
        .map_err(distribution_error)?
        .inverse_cdf(1.0 - alpha / 2.0);
    let z2 = z * z;
    let mut lower = Vec::with_capacity(counts.len());
    let mut upper = Vec::with_capacity(counts.len());
    for &count in counts {
        let p = count / n;
        let scale = 1.0 + z2 / n;
        let center = (p + z2 / (2.0 * n)) / scale;
        let half = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / scale;
        lower.push((center - half).max(0.0));
        upper.push((center + half).min(1.0));
    }
    Ok(RowIntervals { lower, upper })
}

/// Poisson variable with parameter equal to an observed cell count. A zero count is a point
/// mass at zero.
struct PoissonCell {
    distribution: Option<Poisson>,
}

impl PoissonCell {
    fn new(lambda: f64) -> Result<Self, ConfidenceIntervalError> {
        let distribution = if lambda > 0.0 {
            Some(Poisson::new(lambda).map_err(distribution_error)?)
        } else {
            None
        };
        Ok(Self { distribution })
    }

    fn cdf(&self, k: f64) -> f64 {
        if k < 0.0 {
            return 0.0;
        }
        match &self.distribution {
            Some(poisson) => poisson.cdf(k.floor() as u64),
            None => 1.0,
        }
    }

    /// `P(b <= Z <= a)`.
    fn interval(&self, b: f64, a: f64) -> f64 {
        self.cdf(a) - self.cdf(b - 1.0)
    }

    /// `r`-th factorial moment of the variable truncated to `[b, a]`.
    fn truncated_factorial_moment(&self, lambda: f64, b: f64, a: f64, r: i32) -> f64 {
        let rf = r as f64;
        let tail = self.interval(a - rf + 1.0, a) - self.interval(b - rf, b - 1.0);
        lambda.powi(r) * (1.0 - tail / self.interval(b, a))
    }
}

struct SisonGlaz<'a> {
    counts: &'a [f64],
    cells: Vec<PoissonCell>,
    n: f64,
    ln_pmf_n: f64,
}

impl<'a> SisonGlaz<'a> {
    fn new(counts: &'a [f64], n: f64) -> Result<Self, ConfidenceIntervalError> {
        let cells = counts
            .iter()
            .map(|&c| PoissonCell::new(c))
            .collect::<Result<Vec<_>, _>>()?;
        let ln_pmf_n = Poisson::new(n)
            .map_err(distribution_error)?
            .ln_pmf(n.round() as u64);
        Ok(Self {
            counts,
            cells,
            n,
            ln_pmf_n,
        })
    }

    fn edgeworth(&self, intervals: &[(f64, f64)]) -> f64 {
        let (mut sum_mu, mut sum_mu2, mut sum_mu3, mut sum_mu4, mut sum_mu2_sq) =
            (0.0, 0.0, 0.0, 0.0, 0.0);
        for ((cell, &lambda), &(b, a)) in self.cells.iter().zip(self.counts).zip(intervals) {
            let mu = cell.truncated_factorial_moment(lambda, b, a, 1);
            let mu_r2 = cell.truncated_factorial_moment(lambda, b, a, 2);
            let mu_r3 = cell.truncated_factorial_moment(lambda, b, a, 3);
            let mu_r4 = cell.truncated_factorial_moment(lambda, b, a, 4);
            let mu2 = mu_r2 + mu - mu * mu;
            let mu3 = mu_r3 + mu_r2 * (3.0 - 3.0 * mu) + mu - 3.0 * mu * mu + 2.0 * mu.powi(3);
            let mu4 = mu_r4
                + mu_r3 * (6.0 - 4.0 * mu)
                + mu_r2 * (7.0 - 12.0 * mu + 6.0 * mu * mu)
                + mu
                - 4.0 * mu * mu
                + 6.0 * mu.powi(3)
                - 3.0 * mu.powi(4);
            sum_mu += mu;
            sum_mu2 += mu2;
            sum_mu3 += mu3;
            sum_mu4 += mu4;
            sum_mu2_sq += mu2 * mu2;
        }
        let g1 = sum_mu3 / sum_mu2.powf(1.5);
        let g2 = (sum_mu4 - 3.0 * sum_mu2_sq) / (sum_mu2 * sum_mu2);
        let x = (self.n - sum_mu) / sum_mu2.sqrt();
        let phi = (-x * x / 2.0).exp() / (2.0 * std::f64::consts::PI).sqrt();
        let h3 = x.powi(3) - 3.0 * x;
        let h4 = x.powi(4) - 6.0 * x * x + 3.0;
        let h6 = x.powi(6) - 15.0 * x.powi(4) + 45.0 * x * x - 15.0;
        let f = phi * (1.0 + g1 * h3 / 6.0 + g2 * h4 / 24.0 + g1 * g1 * h6 / 72.0);
        f / sum_mu2.sqrt()
    }

    /// Approximate coverage of the box `[count - c, count + c]`.
    fn nu(&self, c: f64) -> f64 {
        let intervals: Vec<(f64, f64)> = self
            .counts
            .iter()
            .map(|&count| ((count - c).max(0.0), (count + c).min(self.n)))
            .collect();
        let ln_box: f64 = self
            .cells
            .iter()
            .zip(&intervals)
            .map(|(cell, &(b, a))| cell.interval(b, a).ln())
            .sum();
        (ln_box + self.edgeworth(&intervals).ln() - self.ln_pmf_n).exp()
    }
}

fn sison_glaz(counts: &[f64], n: f64, alpha: f64) -> Result<RowIntervals, ConfidenceIntervalError> {
    let solver = SisonGlaz::new(counts, n)?;
    let target = 1.0 - alpha;
    let mut c = 1.0;
    let mut nu_c = solver.nu(c);
    let mut nu_next = solver.nu(c + 1.0);
    while !(nu_c <= target && target < nu_next) {
        if c > n {
            return Err(ConfidenceIntervalError::SisonGlazNoSolution { total: n });
        }
        c += 1.0;
        nu_c = nu_next;
        nu_next = solver.nu(c + 1.0);
    }
    let gamma = (target - nu_c) / (nu_next - nu_c);
    log::debug!("Sison-Glaz solved with c = {c}, gamma = {gamma:.4}");
    let lower = counts.iter().map(|&x| (x / n - c / n).max(0.0)).collect();
    let upper = counts
        .iter()
        .map(|&x| (x / n + (c + 2.0 * gamma) / n).min(1.0))
        .collect();
    Ok(RowIntervals { lower, upper })
}
