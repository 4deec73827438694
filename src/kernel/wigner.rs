//! Rank-2 Wigner rotation matrices.

use rustfft::num_complex::Complex64;

/// Reduced Wigner element `d^2_{mp,m}(beta)`.
pub(crate) fn d2(mp: i32, m: i32, beta: f64) -> f64 {
    if mp >= m.abs() {
        d2_upper(mp, m, beta)
    } else if m >= mp.abs() {
        parity(m - mp) * d2_upper(m, mp, beta)
    } else if -mp >= m.abs() {
        parity(m - mp) * d2_upper(-mp, -m, beta)
    } else {
        d2_upper(-m, -mp, beta)
    }
}

fn parity(k: i32) -> f64 {
    if k.rem_euclid(2) == 0 {
        1.0
    } else {
        -1.0
    }
}

/// Elements with `mp >= |m|`.
fn d2_upper(mp: i32, m: i32, beta: f64) -> f64 {
    let (s, c) = beta.sin_cos();
    match (mp, m) {
        (2, 2) => (1.0 + c) * (1.0 + c) / 4.0,
        (2, 1) => -(1.0 + c) * s / 2.0,
        (2, 0) => (3.0f64 / 8.0).sqrt() * s * s,
        (2, -1) => -(1.0 - c) * s / 2.0,
        (2, -2) => (1.0 - c) * (1.0 - c) / 4.0,
        (1, 1) => (1.0 + c) * (2.0 * c - 1.0) / 2.0,
        (1, 0) => -(1.5f64).sqrt() * s * c,
        (1, -1) => (1.0 - c) * (2.0 * c + 1.0) / 2.0,
        (0, 0) => (3.0 * c * c - 1.0) / 2.0,
        _ => 0.0,
    }
}

/// Full Wigner element `D^2_{mp,m}(alpha, beta, 0)`.
pub(crate) fn big_d2(mp: i32, m: i32, alpha: f64, beta: f64) -> Complex64 {
    Complex64::from_polar(d2(mp, m, beta), -(mp as f64) * alpha)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_at_zero_angle() {
        for mp in -2..=2 {
            for m in -2..=2 {
                let expected = if mp == m { 1.0 } else { 0.0 };
                assert!((d2(mp, m, 0.0) - expected).abs() < 1e-12, "d2({mp},{m})");
            }
        }
    }

    #[test]
    fn rows_are_orthonormal() {
        let beta = 0.731;
        for a in -2..=2 {
            for b in -2..=2 {
                let dot: f64 = (-2..=2).map(|m| d2(a, m, beta) * d2(b, m, beta)).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-12, "rows {a},{b}: {dot}");
            }
        }
    }

    #[test]
    fn magic_angle_zeroes_secular_term() {
        assert!(d2(0, 0, super::super::MAGIC_ANGLE).abs() < 1e-12);
    }
}
