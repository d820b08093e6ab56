//! Least-squares regressions used by the fallback forecasting tiers
//!
//! Contains:
//! - `LinearTrend`: ordinary least squares line over (x, y) pairs
//! - `LeastSquares`: multivariate linear regression on standardised features
//! - `PolynomialRegression`: `LeastSquares` over a polynomial feature expansion

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};

/// Relative ridge term added to the normal equations. Keeps collinear or
/// underdetermined designs solvable with a near minimum-norm solution.
const RIDGE: f64 = 1e-6;

/// Ordinary least squares line `y = slope * x + intercept`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTrend {
    slope: f64,
    intercept: f64,
}

impl LinearTrend {
    /// Fit a line over `values`, using each value's position as x.
    ///
    /// Non-finite values are treated as missing and skipped.
    pub fn fit(values: &[f64]) -> Result<Self> {
        let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        Self::fit_points(&xs, values)
    }

    /// Fit a line over explicit (x, y) pairs, skipping pairs with a non-finite member
    pub fn fit_points(xs: &[f64], ys: &[f64]) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(MathError::InvalidInput(format!(
                "x length ({}) doesn't match y length ({})",
                xs.len(),
                ys.len()
            )));
        }

        let points: Vec<(f64, f64)> = xs
            .iter()
            .zip(ys.iter())
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(&x, &y)| (x, y))
            .collect();

        if points.len() < 2 {
            return Err(MathError::InsufficientData(
                "Not enough valid points for a trend line. Need at least 2.".to_string(),
            ));
        }

        let n = points.len() as f64;
        let x_mean = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let y_mean = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (x, y) in &points {
            numerator += (x - x_mean) * (y - y_mean);
            denominator += (x - x_mean) * (x - x_mean);
        }

        if denominator.abs() < 1e-10 {
            return Err(MathError::CalculationError(
                "Cannot calculate slope: x values are too similar".to_string(),
            ));
        }

        let slope = numerator / denominator;
        Ok(Self {
            slope,
            intercept: y_mean - slope * x_mean,
        })
    }

    /// Value of the line at `x`
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

/// Multivariate linear regression with an unpenalised intercept.
///
/// Features are standardised column-wise before solving, so raw inputs of
/// very different magnitude (a time index next to a calendar year) can be
/// mixed freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeastSquares {
    means: Vec<f64>,
    scales: Vec<f64>,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LeastSquares {
    /// Fit the regression of `targets` on the feature `rows`
    pub fn fit(rows: &[Vec<f64>], targets: &[f64]) -> Result<Self> {
        if rows.is_empty() {
            return Err(MathError::InsufficientData(
                "Cannot fit a regression without observations".to_string(),
            ));
        }
        if rows.len() != targets.len() {
            return Err(MathError::InvalidInput(format!(
                "Feature rows ({}) don't match targets ({})",
                rows.len(),
                targets.len()
            )));
        }

        let width = rows[0].len();
        if width == 0 || rows.iter().any(|r| r.len() != width) {
            return Err(MathError::InvalidInput(
                "Feature rows must share the same non-zero width".to_string(),
            ));
        }
        if rows.iter().flatten().chain(targets.iter()).any(|v| !v.is_finite()) {
            return Err(MathError::InvalidInput(
                "Features and targets must be finite".to_string(),
            ));
        }

        let n = rows.len() as f64;
        let mut means = vec![0.0; width];
        let mut scales = vec![1.0; width];
        for j in 0..width {
            let mean = rows.iter().map(|r| r[j]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n;
            means[j] = mean;
            if var.sqrt() > 1e-12 {
                scales[j] = var.sqrt();
            }
        }

        let standardised: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| {
                r.iter()
                    .enumerate()
                    .map(|(j, x)| (x - means[j]) / scales[j])
                    .collect()
            })
            .collect();

        let y_mean = targets.iter().sum::<f64>() / n;

        let mut gram = vec![vec![0.0; width]; width];
        let mut rhs = vec![0.0; width];
        for (z, y) in standardised.iter().zip(targets.iter()) {
            for j in 0..width {
                rhs[j] += z[j] * (y - y_mean);
                for k in 0..width {
                    gram[j][k] += z[j] * z[k];
                }
            }
        }
        for (j, row) in gram.iter_mut().enumerate() {
            row[j] += RIDGE * n;
        }

        let coefficients = solve(gram, rhs)?;

        Ok(Self {
            means,
            scales,
            coefficients,
            intercept: y_mean,
        })
    }

    /// Predict the target for one feature row
    pub fn predict(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.coefficients.len() {
            return Err(MathError::InvalidInput(format!(
                "Expected {} features, got {}",
                self.coefficients.len(),
                row.len()
            )));
        }

        Ok(self.intercept
            + row
                .iter()
                .enumerate()
                .map(|(j, x)| self.coefficients[j] * (x - self.means[j]) / self.scales[j])
                .sum::<f64>())
    }

    /// Number of features the model expects
    pub fn width(&self) -> usize {
        self.coefficients.len()
    }
}

/// Least-squares regression over a polynomial expansion of the inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialRegression {
    degree: usize,
    centers: Vec<f64>,
    model: LeastSquares,
}

impl PolynomialRegression {
    /// Fit a polynomial regression of the given degree
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], degree: usize) -> Result<Self> {
        if degree == 0 {
            return Err(MathError::InvalidInput(
                "Polynomial degree must be at least 1".to_string(),
            ));
        }
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        if width == 0 {
            return Err(MathError::InsufficientData(
                "Cannot fit a regression without observations".to_string(),
            ));
        }

        let n = rows.len() as f64;
        let centers: Vec<f64> = (0..width)
            .map(|j| rows.iter().map(|r| r.get(j).copied().unwrap_or(0.0)).sum::<f64>() / n)
            .collect();

        let expanded: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| polynomial_features(&center(r, &centers), degree))
            .collect();

        Ok(Self {
            degree,
            model: LeastSquares::fit(&expanded, targets)?,
            centers,
        })
    }

    /// Predict the target for one raw feature row
    pub fn predict(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.centers.len() {
            return Err(MathError::InvalidInput(format!(
                "Expected {} features, got {}",
                self.centers.len(),
                row.len()
            )));
        }
        self.model
            .predict(&polynomial_features(&center(row, &self.centers), self.degree))
    }

    pub fn degree(&self) -> usize {
        self.degree
    }
}

/// Expand a feature row into all monomials of degree 1 through `degree`.
///
/// Terms are ordered by degree, then lexicographically by feature index:
/// `[a, b]` at degree 2 yields `[a, b, a*a, a*b, b*b]`. No bias column.
pub fn polynomial_features(row: &[f64], degree: usize) -> Vec<f64> {
    let mut features = Vec::new();
    let mut terms: Vec<(usize, f64)> = row.iter().copied().enumerate().collect();

    for d in 1..=degree {
        if d > 1 {
            terms = terms
                .iter()
                .flat_map(|&(last, product)| {
                    (last..row.len()).map(move |j| (j, product * row[j]))
                })
                .collect();
        }
        features.extend(terms.iter().map(|&(_, product)| product));
    }

    features
}

fn center(row: &[f64], centers: &[f64]) -> Vec<f64> {
    row.iter().zip(centers.iter()).map(|(x, c)| x - c).collect()
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);

        if a[pivot][col].abs() < 1e-12 {
            return Err(MathError::CalculationError(
                "Normal equations are singular".to_string(),
            ));
        }

        a.swap(col, pivot);
        b.swap(col, pivot);

        let pivot_row = a[col].clone();
        let pivot_rhs = b[col];
        for row in col + 1..n {
            let factor = a[row][col] / pivot_row[col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * pivot_row[k];
            }
            b[row] -= factor * pivot_rhs;
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }

    Ok(x)
}
