//! Logit link helpers.
//!
//! Both linear predictors of the occupancy model use the logit link:
//!
//! - `inv_logit(x) = 1 / (1 + exp(-x))`
//! - `logit(p) = ln(p / (1 - p))`
//!
//! Numerical notes:
//! - `inv_logit` is evaluated through `exp(-|x|)` so it never overflows.
//! - `log_inv_logit` / `log1m_inv_logit` avoid `ln(0)` for large `|x|`, which
//!   matters for the likelihood when a model pushes ψ or p towards 0 or 1.

/// Inverse logit (logistic) transform.
pub fn inv_logit(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Logit transform. Returns `±inf` at the boundaries.
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// `ln(1 + exp(x))` without overflow.
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// `ln(inv_logit(x))`.
pub fn log_inv_logit(x: f64) -> f64 {
    -softplus(-x)
}

/// `ln(1 - inv_logit(x))`.
pub fn log1m_inv_logit(x: f64) -> f64 {
    -softplus(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn logit_round_trip() {
        // Precision near p = 1 degrades like exp(|x|) because 1 - p cancels.
        for &x in &[-20.0, -7.5, -1.0, -1e-6, 0.0, 0.3, 2.0, 12.0, 20.0] {
            let back = logit(inv_logit(x));
            let tol = 1e-12 * (1.0 + x.abs().exp());
            assert!((back - x).abs() <= tol, "x={x} back={back}");
        }
    }

    #[test]
    fn inv_logit_is_stable_at_extremes() {
        assert_eq!(inv_logit(0.0), 0.5);
        assert!(inv_logit(800.0) <= 1.0);
        assert!(inv_logit(-800.0) >= 0.0);
        assert!(log_inv_logit(-800.0).is_finite());
        assert!(log1m_inv_logit(800.0).is_finite());
    }

    #[test]
    fn log_forms_match_direct_evaluation() {
        for &x in &[-3.0, -0.5, 0.0, 1.5, 4.0] {
            let p = inv_logit(x);
            assert!((log_inv_logit(x) - p.ln()).abs() < 1e-12);
            assert!((log1m_inv_logit(x) - (1.0 - p).ln()).abs() < 1e-12);
        }
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_finite_logits(x in -30.0f64..30.0) {
            let back = logit(inv_logit(x));
            let tol = 1e-12 * (1.0 + x.abs().exp());
            prop_assert!((back - x).abs() <= tol, "x={} back={}", x, back);
        }

        #[test]
        fn inv_logit_stays_in_unit_interval(x in proptest::num::f64::NORMAL) {
            let p = inv_logit(x);
            prop_assert!((0.0..=1.0).contains(&p));
        }
    }
}
