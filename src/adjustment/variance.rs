//! Variance component of unit weight.

use std::fmt::{self, Display, Formatter};

use crate::linalg::SQRT_EPS;

/// A-priori and a-posteriori variance of unit weight with the global model test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarianceComponent {
    /// A-priori variance of unit weight σ0²
    pub variance0: f64,
    /// Weighted sum of squared misclosure residuals Ω = Σ veᵀWve
    pub omega: f64,
    /// Degrees of freedom r = equations − unknowns + restrictions
    pub redundancy: f64,
    pub apply_aposteriori: bool,
    /// Result of the global test σ̂²/σ0² > q
    pub significant: bool,
    /// Quantile the global test was decided with
    pub quantile: f64,
}

impl Default for VarianceComponent {
    fn default() -> Self {
        Self {
            variance0: 1.0,
            omega: 0.0,
            redundancy: 0.0,
            apply_aposteriori: true,
            significant: false,
            quantile: 1.0,
        }
    }
}

impl VarianceComponent {
    pub fn new(variance0: f64, redundancy: f64, apply_aposteriori: bool) -> Self {
        Self {
            variance0: variance0.max(SQRT_EPS),
            redundancy,
            apply_aposteriori,
            ..Self::default()
        }
    }

    /// A-posteriori variance `Ω/r`, or σ0² without redundancy.
    pub fn variance(&self) -> f64 {
        if self.redundancy > 0.0 && self.omega > 0.0 {
            self.omega / self.redundancy
        } else {
            self.variance0
        }
    }

    /// Variance scaling the cofactor matrices.
    pub fn variance_of_unit_weight(&self) -> f64 {
        if self.apply_aposteriori {
            self.variance()
        } else {
            self.variance0
        }
    }

    /// Test statistic `σ̂²/σ0²` of the global test.
    pub fn ratio(&self) -> f64 {
        self.variance() / self.variance0
    }

    /// Decide the global test; quantiles below `1 + √eps` are raised to it.
    pub fn evaluate_global_test(&mut self, quantile: f64) {
        self.quantile = quantile.max(1.0 + SQRT_EPS);
        self.significant = self.ratio() > self.quantile;
    }
}

impl Display for VarianceComponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Variance Component:")?;
        writeln!(f, "  Redundancy:      {:.4}", self.redundancy)?;
        writeln!(f, "  Omega:           {:.6e}", self.omega)?;
        writeln!(f, "  A-priori σ0²:    {:.6e}", self.variance0)?;
        writeln!(f, "  A-posteriori σ²: {:.6e}", self.variance())?;
        write!(
            f,
            "  Global test:     {:.4} {} {:.4}{}",
            self.ratio(),
            if self.significant { ">" } else { "≤" },
            self.quantile,
            if self.significant { " (significant)" } else { "" }
        )
    }
}
