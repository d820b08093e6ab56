//! Descriptive statistics over plain slices

use crate::{MathError, Result};

/// Arithmetic mean of the finite values in `values`
pub fn mean(values: &[f64]) -> Result<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return Err(MathError::InsufficientData(
            "Mean needs at least one finite value".to_string(),
        ));
    }
    Ok(finite.iter().sum::<f64>() / finite.len() as f64)
}

/// Quantile `q` of the finite values, interpolating linearly between the
/// two closest ranks.
///
/// Position is `q * (n - 1)` over the sorted values, so `q = 0.5` of an
/// even-length slice is the midpoint of the two central values.
pub fn quantile(values: &[f64], q: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&q) {
        return Err(MathError::InvalidInput(format!(
            "Quantile must be within [0, 1], got {}",
            q
        )));
    }

    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Err(MathError::InsufficientData(
            "Quantile needs at least one finite value".to_string(),
        ));
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// First and third quartiles
pub fn quartiles(values: &[f64]) -> Result<(f64, f64)> {
    Ok((quantile(values, 0.25)?, quantile(values, 0.75)?))
}

/// Mean absolute percentage error, in percent, over pairs whose actual
/// value is non-zero
pub fn mape(actual: &[f64], fitted: &[f64]) -> Result<f64> {
    if actual.len() != fitted.len() {
        return Err(MathError::InvalidInput(format!(
            "Actual length ({}) doesn't match fitted length ({})",
            actual.len(),
            fitted.len()
        )));
    }

    let errors: Vec<f64> = actual
        .iter()
        .zip(fitted.iter())
        .filter(|(a, f)| a.is_finite() && f.is_finite() && **a != 0.0)
        .map(|(a, f)| ((a - f) / a).abs())
        .collect();

    if errors.is_empty() {
        return Err(MathError::InsufficientData(
            "No non-zero actual values to compare".to_string(),
        ));
    }
    Ok(errors.iter().sum::<f64>() / errors.len() as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile(&values, 0.5).unwrap(), 2.5);
        assert_relative_eq!(quantile(&values, 0.25).unwrap(), 1.75);
        assert_relative_eq!(quantile(&values, 0.75).unwrap(), 3.25);
        assert_relative_eq!(quantile(&values, 1.0).unwrap(), 4.0);
    }

    #[test]
    fn test_quantile_ignores_nan_and_order() {
        let values = [4.0, f64::NAN, 1.0, 3.0, 2.0];
        assert_relative_eq!(quantile(&values, 0.0).unwrap(), 1.0);
        assert_relative_eq!(quantile(&values, 0.5).unwrap(), 2.5);
    }

    #[test]
    fn test_quantile_rejects_bad_input() {
        assert!(quantile(&[], 0.5).is_err());
        assert!(quantile(&[f64::NAN], 0.5).is_err());
        assert!(quantile(&[1.0], 1.5).is_err());
    }

    #[test]
    fn test_mape_skips_zero_actuals() {
        let actual = [100.0, 0.0, 200.0];
        let fitted = [110.0, 5.0, 180.0];
        assert_relative_eq!(mape(&actual, &fitted).unwrap(), 10.0);
    }

    #[test]
    fn test_mape_needs_matching_lengths() {
        assert!(mape(&[1.0], &[1.0, 2.0]).is_err());
        assert!(mape(&[0.0], &[1.0]).is_err());
    }

    #[test]
    fn test_mean_skips_non_finite() {
        assert_relative_eq!(mean(&[1.0, f64::NAN, 3.0]).unwrap(), 2.0);
        assert!(mean(&[f64::INFINITY]).is_err());
    }
}
