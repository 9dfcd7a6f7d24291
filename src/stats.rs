//! Statistical functions for small-sample experiment comparison.
//!
//! Wilson score intervals are preferred over Wald (normal approximation)
//! because they don't collapse at 0% or 100% and keep their coverage at
//! small n. McNemar's exact test compares two conditions paired on the
//! same (task, rep); Fisher's exact test handles the unpaired case. All
//! functions are pure: counts in, structured results out.

use serde::Serialize;

/// Rational approximation of the inverse normal CDF
/// (Abramowitz & Stegun formula 26.2.23, ~4.5e-4 absolute error).
///
/// Panics are avoided by clamping at the call site; `p` must be in (0, 1).
fn inverse_normal_cdf(p: f64) -> f64 {
    debug_assert!(p > 0.0 && p < 1.0);

    // Central region coefficients.
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239e0,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    // Tail region coefficients.
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838e0,
        -2.549732539343734e0,
        4.374664141464968e0,
        2.938163982698783e0,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996e0,
        3.754408661907416e0,
    ];

    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 1.0 - P_LOW;

    let tail = |q: f64| -> f64 {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        tail(q)
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        ((((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q)
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -tail(q)
    }
}

/// Wilson score confidence interval for a binomial proportion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WilsonInterval {
    pub lower: f64,
    pub upper: f64,
    pub center: f64,
}

/// Wilson score interval for `successes` out of `n` trials.
///
/// Returns the degenerate `(0, 1)` interval when `n == 0`.
pub fn wilson_interval(successes: u64, n: u64, confidence: f64) -> WilsonInterval {
    if n == 0 {
        return WilsonInterval {
            lower: 0.0,
            upper: 1.0,
            center: 0.0,
        };
    }

    let z = inverse_normal_cdf(1.0 - (1.0 - confidence) / 2.0);
    let z2 = z * z;
    let n_f = n as f64;
    let p_hat = successes as f64 / n_f;

    let denominator = 1.0 + z2 / n_f;
    let center = (p_hat + z2 / (2.0 * n_f)) / denominator;
    let spread =
        (z * (p_hat * (1.0 - p_hat) / n_f + z2 / (4.0 * n_f * n_f)).sqrt()) / denominator;

    WilsonInterval {
        lower: round4((center - spread).max(0.0)),
        upper: round4((center + spread).min(1.0)),
        center: round4(center),
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Returns `true` when two confidence intervals share any range.
/// Non-overlapping CIs suggest a meaningful difference, but the exact
/// tests below are the authoritative comparison.
pub fn ci_overlap(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// Result of McNemar's exact test on paired binary outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct McNemarResult {
    pub p_value: f64,
    /// Discordant pairs where condition A succeeded and B failed.
    pub a_wins: u64,
    /// Discordant pairs where condition B succeeded and A failed.
    pub b_wins: u64,
    pub n_discordant: u64,
}

/// McNemar's exact test: two-sided exact binomial on the discordant pairs.
///
/// Concordant pairs carry no information about the difference between
/// conditions and do not enter the statistic. With zero discordant pairs
/// the test is undefined and p = 1.0 by convention.
pub fn mcnemar_test(a_wins: u64, b_wins: u64) -> McNemarResult {
    let n = a_wins + b_wins;
    let p_value = if n == 0 {
        1.0
    } else {
        let k = a_wins.min(b_wins);
        // Two-sided exact binomial with p = 0.5: double the one-sided tail.
        let tail: f64 = (0..=k).map(|i| binomial_pmf_half(n, i)).sum();
        (2.0 * tail).min(1.0)
    };

    McNemarResult {
        p_value,
        a_wins,
        b_wins,
        n_discordant: n,
    }
}

/// Binomial pmf at p = 0.5: C(n, k) * 0.5^n, computed in log space to
/// stay finite for large n.
fn binomial_pmf_half(n: u64, k: u64) -> f64 {
    (ln_choose(n, k) - (n as f64) * std::f64::consts::LN_2).exp()
}

/// Result of Fisher's exact test on a 2x2 contingency table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FisherResult {
    pub p_value: f64,
}

/// Fisher's exact test (two-sided) on the table
///
/// ```text
///            success  failure
/// cond A        a        b
/// cond B        c        d
/// ```
///
/// Two-sided p-value: the sum over all tables with the same margins whose
/// hypergeometric probability does not exceed the observed table's.
pub fn fisher_exact(a: u64, b: u64, c: u64, d: u64) -> FisherResult {
    let row1 = a + b;
    let row2 = c + d;
    let col1 = a + c;
    let n = row1 + row2;

    if n == 0 || row1 == 0 || row2 == 0 || col1 == 0 || col1 == n {
        // A degenerate margin admits only one table; no evidence either way.
        return FisherResult { p_value: 1.0 };
    }

    let ln_denom = ln_choose(n, col1);
    let table_ln_p = |x: u64| -> f64 {
        // P(X = x) for x successes in condition A under fixed margins.
        ln_choose(row1, x) + ln_choose(row2, col1 - x) - ln_denom
    };

    let x_min = col1.saturating_sub(row2);
    let x_max = col1.min(row1);

    let observed = table_ln_p(a).exp();
    // Tolerance for float comparison across equally-probable tables.
    let cutoff = observed * (1.0 + 1e-7);

    let mut p = 0.0;
    for x in x_min..=x_max {
        let prob = table_ln_p(x).exp();
        if prob <= cutoff {
            p += prob;
        }
    }

    FisherResult {
        p_value: p.min(1.0),
    }
}

/// ln C(n, k) via a sum of logs; n stays small (dozens of items per run).
fn ln_choose(n: u64, k: u64) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    let k = k.min(n - k);
    let mut acc = 0.0;
    for i in 0..k {
        acc += ((n - i) as f64).ln() - ((i + 1) as f64).ln();
    }
    acc
}
