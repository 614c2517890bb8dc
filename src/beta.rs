//! Beta-Binomial Monte Carlo estimate of "treatment beats control".
//!
//! Each arm's conversion rate gets a Beta posterior under a uniform `Beta(1, 1)` prior:
//! `Beta(conversions + 1, total - conversions + 1)`. We draw paired samples from the two
//! posteriors and report the fraction of draws in which the treatment sample is larger.
//!
//! Notes:
//! - The default sampler is a normal approximation (Box–Muller), clamped to `[0, 1]`. It is
//!   adequate once the posterior is roughly unimodal and away from the edges; the clamp absorbs
//!   tail mass that would otherwise fall outside the unit interval.
//! - [`SamplingMethod::Exact`] draws from `rand_distr::Beta` instead.
//! - With `seed: Some(_)` every call is reproducible; with `None` each call draws fresh OS
//!   entropy.

use rand::distr::Open01;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

/// Number of paired posterior draws per comparison.
pub const DEFAULT_SAMPLES: usize = 10_000;

/// How a single Beta draw is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Normal approximation via Box–Muller, clamped to `[0, 1]`.
    #[default]
    NormalApprox,
    /// Exact draw from `rand_distr::Beta`.
    Exact,
}

/// Configuration for [`Estimator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Paired draws per comparison (must be > 0; `0` is treated as `1`).
    pub samples: usize,
    /// Fixed seed for reproducible estimates.
    pub seed: Option<u64>,
    pub method: SamplingMethod,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES,
            seed: None,
            method: SamplingMethod::NormalApprox,
        }
    }
}

/// Conversions out of a total for one variant.
///
/// Signed so that corrupt upstream counts can be represented and clamped rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversionCounts {
    pub conversions: i64,
    pub total: i64,
}

impl ConversionCounts {
    pub fn new(conversions: i64, total: i64) -> Self {
        Self { conversions, total }
    }

    /// Clamp into a valid binomial observation: `total >= 0`, `0 <= conversions <= total`.
    #[must_use]
    pub fn clamped(self) -> Self {
        let total = self.total.max(0);
        Self {
            conversions: self.conversions.clamp(0, total),
            total,
        }
    }

    /// Posterior `(alpha, beta)` under a `Beta(1, 1)` prior.
    #[must_use]
    pub fn posterior(self) -> (f64, f64) {
        let c = self.clamped();
        (
            c.conversions as f64 + 1.0,
            (c.total - c.conversions) as f64 + 1.0,
        )
    }
}

/// Approximate draw from `Beta(alpha, beta)` using a normal with matching mean and variance.
///
/// Always returns a value in `[0, 1]`. Non-finite intermediate results collapse to the
/// clamped mean; invalid parameters yield `0.5`.
pub fn sample_beta<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    if !(alpha.is_finite() && beta.is_finite()) || alpha <= 0.0 || beta <= 0.0 {
        return 0.5;
    }
    let sum = alpha + beta;
    let mean = alpha / sum;
    let variance = (alpha * beta) / (sum * sum * (sum + 1.0));

    let u1: f64 = Open01.sample(rng);
    let u2: f64 = Open01.sample(rng);
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

    let x = mean + variance.sqrt() * z;
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        mean.clamp(0.0, 1.0)
    }
}

/// Exact draw from `Beta(alpha, beta)`, falling back to [`sample_beta`] on invalid parameters.
pub fn sample_beta_exact<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    match Beta::new(alpha, beta) {
        Ok(dist) => {
            let x: f64 = dist.sample(rng);
            if x.is_finite() {
                x.clamp(0.0, 1.0)
            } else {
                sample_beta(rng, alpha, beta)
            }
        }
        Err(_) => sample_beta(rng, alpha, beta),
    }
}

/// Monte Carlo estimator of `P(treatment rate > control rate)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Estimator {
    cfg: EstimatorConfig,
}

impl Estimator {
    pub fn new(cfg: EstimatorConfig) -> Self {
        Self { cfg }
    }

    /// Estimator with a fixed seed and otherwise default settings.
    pub fn with_seed(seed: u64) -> Self {
        Self::new(EstimatorConfig {
            seed: Some(seed),
            ..EstimatorConfig::default()
        })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.cfg
    }

    /// Probability that `treatment` converts better than `control`, in `[0, 1]`.
    pub fn probability(&self, control: ConversionCounts, treatment: ConversionCounts) -> f64 {
        self.probability_with_stream(control, treatment, 0)
    }

    /// Per-index probabilities against index 0 (control).
    ///
    /// Index 0 is always `None`; every other index is compared only against control.
    pub fn multi_variant(&self, variants: &[ConversionCounts]) -> Vec<Option<f64>> {
        let Some((&control, rest)) = variants.split_first() else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(variants.len());
        out.push(None);
        for (i, &v) in rest.iter().enumerate() {
            out.push(Some(self.probability_with_stream(control, v, i as u64 + 1)));
        }
        out
    }

    fn probability_with_stream(
        &self,
        control: ConversionCounts,
        treatment: ConversionCounts,
        stream: u64,
    ) -> f64 {
        let (ca, cb) = control.posterior();
        let (ta, tb) = treatment.posterior();
        let n = self.cfg.samples.max(1);
        let mut rng = self.rng(stream);

        let mut wins: usize = 0;
        for _ in 0..n {
            let (a, b) = match self.cfg.method {
                SamplingMethod::NormalApprox => {
                    (sample_beta(&mut rng, ca, cb), sample_beta(&mut rng, ta, tb))
                }
                SamplingMethod::Exact => (
                    sample_beta_exact(&mut rng, ca, cb),
                    sample_beta_exact(&mut rng, ta, tb),
                ),
            };
            if b > a {
                wins += 1;
            }
        }
        (wins as f64 / n as f64).clamp(0.0, 1.0)
    }

    fn rng(&self, stream: u64) -> StdRng {
        match self.cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            None => StdRng::from_os_rng(),
        }
    }
}

/// `P(treatment beats control)` with default settings (10,000 draws, unseeded).
///
/// Inputs are clamped: negative totals become `0`, conversions are clamped into `[0, total]`.
pub fn bayesian_probability(
    control_conversions: i64,
    control_total: i64,
    treatment_conversions: i64,
    treatment_total: i64,
) -> f64 {
    Estimator::default().probability(
        ConversionCounts::new(control_conversions, control_total),
        ConversionCounts::new(treatment_conversions, treatment_total),
    )
}

/// Probabilities of each variant beating index 0, with default settings.
///
/// `[]` maps to `[]`; a control-only input maps to `[None]`.
pub fn multi_variant_probabilities(variants: &[ConversionCounts]) -> Vec<Option<f64>> {
    Estimator::default().multi_variant(variants)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_beta_stays_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        for &(a, b) in &[(1.0, 1.0), (1.0, 1000.0), (1000.0, 1.0), (0.5, 0.5), (3.0, 7.0)] {
            for _ in 0..2_000 {
                let x = sample_beta(&mut rng, a, b);
                assert!((0.0..=1.0).contains(&x), "x={x} for ({a}, {b})");
            }
        }
    }

    #[test]
    fn sample_beta_invalid_params_are_neutral() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_beta(&mut rng, 0.0, 1.0), 0.5);
        assert_eq!(sample_beta(&mut rng, f64::NAN, 1.0), 0.5);
        assert_eq!(sample_beta(&mut rng, 1.0, f64::INFINITY), 0.5);
    }

    #[test]
    fn sample_beta_mean_is_close() {
        let mut rng = StdRng::seed_from_u64(99);
        let n = 20_000;
        let mean: f64 = (0..n).map(|_| sample_beta(&mut rng, 30.0, 70.0)).sum::<f64>() / n as f64;
        assert!((mean - 0.3).abs() < 0.01, "mean={mean}");
    }

    #[test]
    fn exact_sampler_agrees_on_clear_winner() {
        let est = Estimator::new(EstimatorConfig {
            samples: 4_000,
            seed: Some(3),
            method: SamplingMethod::Exact,
        });
        let p = est.probability(ConversionCounts::new(10, 1000), ConversionCounts::new(900, 1000));
        assert!(p > 0.99, "p={p}");
    }

    #[test]
    fn clear_winner_and_clear_loser() {
        let est = Estimator::with_seed(42);
        let win = est.probability(ConversionCounts::new(10, 1000), ConversionCounts::new(900, 1000));
        assert!(win > 0.95, "win={win}");
        let lose = est.probability(ConversionCounts::new(900, 1000), ConversionCounts::new(10, 1000));
        assert!(lose < 0.05, "lose={lose}");
    }

    #[test]
    fn equal_arms_are_near_even() {
        let p = bayesian_probability(500, 1000, 500, 1000);
        assert!((0.3..=0.7).contains(&p), "p={p}");
        let z = bayesian_probability(0, 0, 0, 0);
        assert!((0.3..=0.7).contains(&z), "z={z}");
    }

    #[test]
    fn invalid_counts_are_clamped() {
        assert_eq!(
            ConversionCounts::new(15, 10).clamped(),
            ConversionCounts::new(10, 10)
        );
        assert_eq!(
            ConversionCounts::new(-3, -10).clamped(),
            ConversionCounts::new(0, 0)
        );
        let p = bayesian_probability(-5, -5, 2_000, 100);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn seeded_estimates_are_reproducible() {
        let est = Estimator::with_seed(11);
        let c = ConversionCounts::new(40, 400);
        let t = ConversionCounts::new(48, 400);
        assert_eq!(est.probability(c, t), est.probability(c, t));
    }

    #[test]
    fn multi_variant_shapes() {
        assert!(multi_variant_probabilities(&[]).is_empty());
        assert_eq!(
            multi_variant_probabilities(&[ConversionCounts::new(10, 100)]),
            vec![None]
        );
        let est = Estimator::with_seed(5);
        let out = est.multi_variant(&[
            ConversionCounts::new(10, 1000),
            ConversionCounts::new(900, 1000),
            ConversionCounts::new(0, 1000),
        ]);
        assert_eq!(out.len(), 3);
        assert!(out[0].is_none());
        assert!(out[1].unwrap() > 0.99);
        assert!(out[2].unwrap() < 0.01);
    }
}
