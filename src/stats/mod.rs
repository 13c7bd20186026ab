pub mod dist;

use std::fmt;

use thiserror::Error;

use crate::rate::{Group, SeriesPoint};
use dist::{normal_cdf, normal_quantile, student_t_two_sided};

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("insufficient data for AUC: {0}")]
    InsufficientAuc(String),
    #[error("group '{0}' has no animals to compare")]
    EmptyGroup(String),
    #[error("group '{0}' not present in AUC table")]
    UnknownGroup(String),
    #[error("paired comparison needs equal group sizes, got {0} vs {1}")]
    PairedLengthMismatch(usize, usize),
}

// ── AUC ───────────────────────────────────────────────────────────────

/// Area under one animal's rate-vs-time curve by trapezoidal integration.
///
/// Points are ordered by time internally, so the result does not depend on
/// insertion order. Fewer than two points is an error — a missing AUC must
/// never masquerade as zero activity.
pub fn trapezoid_auc(points: &[SeriesPoint]) -> Result<f64, StatsError> {
    if points.len() < 2 {
        return Err(StatsError::InsufficientAuc(format!(
            "{} time point(s), need at least 2",
            points.len()
        )));
    }
    let mut sorted: Vec<&SeriesPoint> = points.iter().collect();
    sorted.sort_by(|a, b| a.time_min.partial_cmp(&b.time_min).unwrap());

    let mut area = 0.0;
    for pair in sorted.windows(2) {
        area += (pair[1].time_min - pair[0].time_min) * (pair[1].rate + pair[0].rate) / 2.0;
    }
    Ok(area)
}

/// Per-animal AUC, labeled with group and animal for export and comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct AucRecord {
    pub group: String,
    pub animal: String,
    pub auc: f64,
}

/// Compute the AUC table for all groups, sorted by (group, animal).
/// An animal with too few time points fails the whole table with its name in
/// the error, so the operator knows exactly what to fix.
pub fn auc_table(groups: &[Group]) -> Result<Vec<AucRecord>, StatsError> {
    let mut records = Vec::new();
    for group in groups {
        for series in &group.series {
            let auc = trapezoid_auc(&series.points).map_err(|e| match e {
                StatsError::InsufficientAuc(detail) => StatsError::InsufficientAuc(format!(
                    "{} in group '{}': {detail}",
                    series.animal, group.name
                )),
                other => other,
            })?;
            records.push(AucRecord {
                group: group.name.clone(),
                animal: series.animal.to_string(),
                auc,
            });
        }
    }
    records.sort_by(|a, b| (&a.group, &a.animal).cmp(&(&b.group, &b.animal)));
    Ok(records)
}

// ── Normality ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Normality {
    pub w: f64,
    pub p: f64,
}

/// Shapiro–Wilk normality test (Royston's AS R94 approximation, 3 ≤ n ≤ 5000).
///
/// A constant sample has no defined W; it is reported as decisively
/// non-normal (p = 0) rather than raising, which routes the comparison to a
/// rank test that handles ties.
pub fn shapiro_wilk(sample: &[f64]) -> Result<Normality, StatsError> {
    let n = sample.len();
    if n < 3 {
        return Err(StatsError::InsufficientAuc(format!(
            "normality test needs at least 3 values, got {n}"
        )));
    }

    let mut x = sample.to_vec();
    x.sort_by(|a, b| a.partial_cmp(b).unwrap());

    if x[n - 1] - x[0] < 1e-12 {
        return Ok(Normality { w: f64::NAN, p: 0.0 });
    }

    let nf = n as f64;

    // Expected normal order statistics (Blom scores) and their normalization
    let m: Vec<f64> = (1..=n)
        .map(|i| normal_quantile((i as f64 - 0.375) / (nf + 0.25)))
        .collect();
    let ssq_m: f64 = m.iter().map(|v| v * v).sum();
    let c_n = m[n - 1] / ssq_m.sqrt();

    // Royston's polynomial corrections to the extreme weights
    let u = 1.0 / nf.sqrt();
    let a_n = c_n + 0.221_157 * u - 0.147_981 * u.powi(2) - 2.071_190 * u.powi(3)
        + 4.434_685 * u.powi(4)
        - 2.706_056 * u.powi(5);

    let mut a = vec![0.0_f64; n];
    if n > 5 {
        let c_n1 = m[n - 2] / ssq_m.sqrt();
        let a_n1 = c_n1 + 0.042_981 * u - 0.293_762 * u.powi(2) - 1.752_461 * u.powi(3)
            + 5.682_633 * u.powi(4)
            - 3.582_633 * u.powi(5);
        let phi = (ssq_m - 2.0 * m[n - 1].powi(2) - 2.0 * m[n - 2].powi(2))
            / (1.0 - 2.0 * a_n.powi(2) - 2.0 * a_n1.powi(2));
        a[n - 1] = a_n;
        a[0] = -a_n;
        a[n - 2] = a_n1;
        a[1] = -a_n1;
        for i in 2..n - 2 {
            a[i] = m[i] / phi.sqrt();
        }
    } else {
        let phi = (ssq_m - 2.0 * m[n - 1].powi(2)) / (1.0 - 2.0 * a_n.powi(2));
        a[n - 1] = a_n;
        a[0] = -a_n;
        for i in 1..n - 1 {
            a[i] = m[i] / phi.sqrt();
        }
    }

    let mean = x.iter().sum::<f64>() / nf;
    let num: f64 = a.iter().zip(&x).map(|(ai, xi)| ai * xi).sum();
    let den: f64 = x.iter().map(|xi| (xi - mean).powi(2)).sum();
    let w = (num * num / den).clamp(0.0, 1.0 - 1e-12);

    let p = if n == 3 {
        // Exact for n = 3
        let p = 6.0 / std::f64::consts::PI * ((w.sqrt()).asin() - (0.75_f64).sqrt().asin());
        p.clamp(0.0, 1.0)
    } else if n <= 11 {
        let g = -2.273 + 0.459 * nf;
        let mu = 0.544 - 0.399_78 * nf + 0.025_054 * nf.powi(2) - 0.000_671_4 * nf.powi(3);
        let sigma =
            (1.3822 - 0.778_57 * nf + 0.062_767 * nf.powi(2) - 0.002_032_2 * nf.powi(3)).exp();
        let z = (-((g - (1.0 - w).ln()).ln()) - mu) / sigma;
        1.0 - normal_cdf(z)
    } else {
        let ln_n = nf.ln();
        let mu = -1.5861 - 0.310_82 * ln_n - 0.083_751 * ln_n.powi(2) + 0.003_891_5 * ln_n.powi(3);
        let sigma = (-0.4803 - 0.082_676 * ln_n + 0.003_030_2 * ln_n.powi(2)).exp();
        let z = ((1.0 - w).ln() - mu) / sigma;
        1.0 - normal_cdf(z)
    };

    Ok(Normality { w, p })
}

// ── Rank helpers ──────────────────────────────────────────────────────

/// Average ranks (1-based) with tie handling, plus the tie correction term
/// sum(t³ - t) over tie groups.
fn rank_with_ties(values: &[f64]) -> (Vec<f64>, f64) {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| values[i].partial_cmp(&values[j]).unwrap());

    let mut ranks = vec![0.0; n];
    let mut tie_term = 0.0;

    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let count = (j - i + 1) as f64;
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        tie_term += count.powi(3) - count;
        i = j + 1;
    }

    (ranks, tie_term)
}

// ── Two-group tests ───────────────────────────────────────────────────
// All two-sided. Degenerate inputs (zero variance, all ties, all-zero paired
// differences) resolve to p = 1.0 when the groups are indistinguishable and
// p = 0.0 when the locations differ with no spread; no input raises.

/// Independent two-sample Student's t-test (pooled variance).
pub fn t_test_ind(a: &[f64], b: &[f64]) -> Result<f64, StatsError> {
    let (na, nb) = (a.len() as f64, b.len() as f64);
    if a.len() < 2 || b.len() < 2 {
        return Err(StatsError::InsufficientAuc(format!(
            "t-test needs at least 2 values per group, got {} and {}",
            a.len(),
            b.len()
        )));
    }
    let ma = a.iter().sum::<f64>() / na;
    let mb = b.iter().sum::<f64>() / nb;
    let ssa: f64 = a.iter().map(|v| (v - ma).powi(2)).sum();
    let ssb: f64 = b.iter().map(|v| (v - mb).powi(2)).sum();
    let df = na + nb - 2.0;
    let pooled = (ssa + ssb) / df;
    let se = (pooled * (1.0 / na + 1.0 / nb)).sqrt();

    if se == 0.0 {
        return Ok(if (ma - mb).abs() < 1e-300 { 1.0 } else { 0.0 });
    }
    Ok(student_t_two_sided((ma - mb) / se, df))
}

/// Paired Student's t-test on the per-pair differences.
pub fn t_test_rel(a: &[f64], b: &[f64]) -> Result<f64, StatsError> {
    if a.len() != b.len() {
        return Err(StatsError::PairedLengthMismatch(a.len(), b.len()));
    }
    if a.len() < 2 {
        return Err(StatsError::InsufficientAuc(format!(
            "paired t-test needs at least 2 pairs, got {}",
            a.len()
        )));
    }
    let n = a.len() as f64;
    let d: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    let md = d.iter().sum::<f64>() / n;
    let sd = (d.iter().map(|v| (v - md).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    let se = sd / n.sqrt();

    if se == 0.0 {
        return Ok(if md.abs() < 1e-300 { 1.0 } else { 0.0 });
    }
    Ok(student_t_two_sided(md / se, n - 1.0))
}

/// Mann–Whitney U test, normal approximation with tie and continuity
/// corrections.
pub fn mann_whitney(a: &[f64], b: &[f64]) -> f64 {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let pooled: Vec<f64> = a.iter().chain(b).copied().collect();
    let (ranks, tie_term) = rank_with_ties(&pooled);

    let r1: f64 = ranks[..a.len()].iter().sum();
    let u1 = n1 * n2 + n1 * (n1 + 1.0) / 2.0 - r1;

    let n = n1 + n2;
    let mu = n1 * n2 / 2.0;
    let var = n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
    if var <= 0.0 {
        // Every observation tied: the groups are indistinguishable
        return 1.0;
    }

    let z = ((u1 - mu).abs() - 0.5).max(0.0) / var.sqrt();
    (2.0 * (1.0 - normal_cdf(z))).clamp(0.0, 1.0)
}

/// Wilcoxon signed-rank test, normal approximation, zero differences dropped.
pub fn wilcoxon(a: &[f64], b: &[f64]) -> Result<f64, StatsError> {
    if a.len() != b.len() {
        return Err(StatsError::PairedLengthMismatch(a.len(), b.len()));
    }
    let d: Vec<f64> = a
        .iter()
        .zip(b)
        .map(|(x, y)| x - y)
        .filter(|v| *v != 0.0)
        .collect();
    if d.is_empty() {
        // All pairs identical
        return Ok(1.0);
    }

    let abs_d: Vec<f64> = d.iter().map(|v| v.abs()).collect();
    let (ranks, tie_term) = rank_with_ties(&abs_d);

    let w_plus: f64 = d
        .iter()
        .zip(&ranks)
        .filter(|(v, _)| **v > 0.0)
        .map(|(_, r)| r)
        .sum();

    let n = d.len() as f64;
    let mu = n * (n + 1.0) / 4.0;
    let var = n * (n + 1.0) * (2.0 * n + 1.0) / 24.0 - tie_term / 48.0;
    if var <= 0.0 {
        return Ok(1.0);
    }

    let z = (w_plus - mu).abs() / var.sqrt();
    Ok((2.0 * (1.0 - normal_cdf(z))).clamp(0.0, 1.0))
}

// ── Group comparison ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKind {
    TTest,
    PairedTTest,
    MannWhitney,
    Wilcoxon,
}

impl TestKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::TTest => "t-test",
            Self::PairedTTest => "paired t-test",
            Self::MannWhitney => "Mann-Whitney",
            Self::Wilcoxon => "Wilcoxon",
        }
    }
}

/// Outcome of one two-group comparison.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub group_a: String,
    pub group_b: String,
    pub test: TestKind,
    pub p_value: f64,
    pub alpha: f64,
    pub significant: bool,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.significant {
            "significantly different"
        } else {
            "NOT significantly different"
        };
        write!(
            f,
            "{} vs {} is {}. ({}: p-value = {:.4})",
            self.group_a,
            self.group_b,
            verdict,
            self.test.label(),
            self.p_value
        )
    }
}

/// Compare two groups' AUC distributions.
///
/// Both groups normal by Shapiro–Wilk (p > 0.05) → parametric test;
/// otherwise rank-based. `independent` picks unpaired vs paired variants.
pub fn compare(
    group_a: &str,
    a: &[f64],
    group_b: &str,
    b: &[f64],
    independent: bool,
    alpha: f64,
) -> Result<Comparison, StatsError> {
    if a.is_empty() {
        return Err(StatsError::EmptyGroup(group_a.to_string()));
    }
    if b.is_empty() {
        return Err(StatsError::EmptyGroup(group_b.to_string()));
    }

    // Too-small groups can't be normality-tested; fall back to rank tests
    let parametric = match (shapiro_wilk(a), shapiro_wilk(b)) {
        (Ok(na), Ok(nb)) => {
            log::debug!(
                "Normality: {} W={:.3} p={:.3}, {} W={:.3} p={:.3}",
                group_a,
                na.w,
                na.p,
                group_b,
                nb.w,
                nb.p
            );
            na.p > 0.05 && nb.p > 0.05
        }
        _ => false,
    };

    let (test, p_value) = match (parametric, independent) {
        (true, true) => (TestKind::TTest, t_test_ind(a, b)?),
        (false, true) => (TestKind::MannWhitney, mann_whitney(a, b)),
        (true, false) => (TestKind::PairedTTest, t_test_rel(a, b)?),
        (false, false) => (TestKind::Wilcoxon, wilcoxon(a, b)?),
    };

    Ok(Comparison {
        group_a: group_a.to_string(),
        group_b: group_b.to_string(),
        test,
        p_value,
        alpha,
        significant: p_value < alpha,
    })
}

/// Compare two groups out of an AUC table by name.
pub fn compare_records(
    records: &[AucRecord],
    group_a: &str,
    group_b: &str,
    independent: bool,
    alpha: f64,
) -> Result<Comparison, StatsError> {
    let pick = |name: &str| -> Result<Vec<f64>, StatsError> {
        let values: Vec<f64> = records
            .iter()
            .filter(|r| r.group == name)
            .map(|r| r.auc)
            .collect();
        if values.is_empty() {
            return Err(StatsError::UnknownGroup(name.to_string()));
        }
        Ok(values)
    };

    let a = pick(group_a)?;
    let b = pick(group_b)?;
    compare(group_a, &a, group_b, &b, independent, alpha)
}
