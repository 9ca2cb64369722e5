use crate::core::{ParameterId, ParameterStore, Point};
use crate::restriction::{
    Restriction, RestrictionError, RestrictionResult, RestrictionType, accumulate,
    check_known, check_regressand,
};

/// `(s₁·a₁b₁ + s₂·a₂b₂ + … + sₙ·aₙbₙ)^k = c` with signs `sᵢ = ±1`.
///
/// Passing the same list as `a` and `b` yields a squared norm, e.g. `nx² + ny² = 1` for a
/// unit normal vector.
#[derive(Debug, Clone)]
pub struct ProductSumRestriction {
    regressors_a: Vec<ParameterId>,
    regressors_b: Vec<ParameterId>,
    signs: Vec<f64>,
    exponent: f64,
    regressand: ParameterId,
}

impl ProductSumRestriction {
    /// Plain sum of products (`k = 1`, all signs positive).
    pub fn new(
        store: &ParameterStore,
        regressors_a: Vec<ParameterId>,
        regressors_b: Vec<ParameterId>,
        regressand: ParameterId,
    ) -> RestrictionResult<Self> {
        Self::with_exponent(store, regressors_a, regressors_b, 1.0, true, regressand)
    }

    /// `sum_arithmetic = false` subtracts every term after the first.
    pub fn with_exponent(
        store: &ParameterStore,
        regressors_a: Vec<ParameterId>,
        regressors_b: Vec<ParameterId>,
        exponent: f64,
        sum_arithmetic: bool,
        regressand: ParameterId,
    ) -> RestrictionResult<Self> {
        let sign = if sum_arithmetic { 1.0 } else { -1.0 };
        let signs = (0..regressors_a.len())
            .map(|i| if i == 0 { 1.0 } else { sign })
            .collect();
        Self::with_signs(store, regressors_a, regressors_b, signs, exponent, regressand)
    }

    pub fn with_signs(
        store: &ParameterStore,
        regressors_a: Vec<ParameterId>,
        regressors_b: Vec<ParameterId>,
        signs: Vec<f64>,
        exponent: f64,
        regressand: ParameterId,
    ) -> RestrictionResult<Self> {
        if regressors_a.len() != regressors_b.len() || regressors_a.len() != signs.len() {
            return Err(RestrictionError::InvalidArgument(format!(
                "product sum restriction: unequal number of factors ({} a, {} b, {} signs)",
                regressors_a.len(),
                regressors_b.len(),
                signs.len()
            ))
            .log());
        }
        if regressors_a.is_empty() {
            return Err(RestrictionError::InvalidArgument(
                "product sum restriction requires at least one product".to_string(),
            )
            .log());
        }
        if !exponent.is_finite() {
            return Err(RestrictionError::InvalidArgument(format!(
                "product sum restriction: exponent must be finite, got {exponent}"
            ))
            .log());
        }
        check_known(store, &regressors_a)?;
        check_known(store, &regressors_b)?;
        check_known(store, &[regressand])?;
        check_regressand(regressand, &regressors_a, RestrictionType::ProductSum)?;
        check_regressand(regressand, &regressors_b, RestrictionType::ProductSum)?;

        Ok(Self {
            regressors_a,
            regressors_b,
            signs: signs.into_iter().map(|s| if s < 0.0 { -1.0 } else { 1.0 }).collect(),
            exponent,
            regressand,
        })
    }

    pub fn exponent(&self) -> f64 {
        self.exponent
    }

    fn inner(&self, store: &ParameterStore) -> f64 {
        self.regressors_a
            .iter()
            .zip(&self.regressors_b)
            .zip(&self.signs)
            .map(|((a, b), s)| s * store.value(*a) * store.value(*b))
            .sum()
    }
}

impl Restriction for ProductSumRestriction {
    fn restriction_type(&self) -> RestrictionType {
        RestrictionType::ProductSum
    }

    fn regressand(&self) -> Option<ParameterId> {
        Some(self.regressand)
    }

    fn misclosure(&self, store: &ParameterStore, _center: &Point) -> f64 {
        self.inner(store).powf(self.exponent) - store.value(self.regressand)
    }

    fn partial_derivatives(
        &self,
        store: &ParameterStore,
        _center: &Point,
    ) -> Vec<(ParameterId, f64)> {
        let outer = if self.exponent != 1.0 {
            let derivative = self.exponent * self.inner(store).powf(self.exponent - 1.0);
            if derivative.is_finite() { derivative } else { 0.0 }
        } else {
            1.0
        };

        let inner = self
            .regressors_a
            .iter()
            .zip(&self.regressors_b)
            .zip(&self.signs)
            .flat_map(|((a, b), s)| {
                [
                    (*a, outer * s * store.value(*b)),
                    (*b, outer * s * store.value(*a)),
                ]
            });
        accumulate(inner.chain(std::iter::once((self.regressand, -1.0))))
    }

    fn references(&self, id: ParameterId) -> bool {
        self.regressand == id || self.regressors_a.contains(&id) || self.regressors_b.contains(&id)
    }

    fn box_clone(&self) -> Box<dyn Restriction> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParameterType, ProcessingType, UnknownParameter};
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_unit_vector_restriction() -> TestResult {
        let mut store = ParameterStore::new();
        let nx = store.add(UnknownParameter::new(ParameterType::VectorX, 0.6));
        let ny = store.add(UnknownParameter::new(ParameterType::VectorY, 0.8));
        let one = store.add(
            UnknownParameter::new(ParameterType::VectorLength, 1.0)
                .with_processing_type(ProcessingType::Fixed),
        );
        let restriction = ProductSumRestriction::new(&store, vec![nx, ny], vec![nx, ny], one)?;
        let center = Point::new_2d(0.0, 0.0);

        assert_abs_diff_eq!(restriction.misclosure(&store, &center), 0.0, epsilon = 1e-15);
        let partials = restriction.partial_derivatives(&store, &center);
        assert_eq!(partials.len(), 3);
        assert_abs_diff_eq!(partials[0].1, 1.2, epsilon = 1e-15);
        assert_abs_diff_eq!(partials[1].1, 1.6, epsilon = 1e-15);
        assert_eq!(partials[2], (one, -1.0));
        Ok(())
    }

    #[test]
    fn test_exponent_applies_chain_rule_to_regressors_only() -> TestResult {
        let mut store = ParameterStore::new();
        let ex = store.add(UnknownParameter::new(ParameterType::EccentricityX, 3.0));
        let ey = store.add(UnknownParameter::new(ParameterType::EccentricityY, 4.0));
        let e = store.add(UnknownParameter::new(ParameterType::Eccentricity, 4.0));
        let restriction =
            ProductSumRestriction::with_exponent(&store, vec![ex, ey], vec![ex, ey], 0.5, true, e)?;
        let center = Point::new_2d(0.0, 0.0);

        assert_abs_diff_eq!(restriction.misclosure(&store, &center), 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(restriction.evaluate(&store, &center), 5.0, epsilon = 1e-15);
        let partials = restriction.partial_derivatives(&store, &center);
        // d sqrt(ex² + ey²) / d ex = ex / 5
        assert_abs_diff_eq!(partials[0].1, 0.6, epsilon = 1e-15);
        assert_abs_diff_eq!(partials[1].1, 0.8, epsilon = 1e-15);
        assert_eq!(partials[2], (e, -1.0));
        Ok(())
    }

    #[test]
    fn test_difference_of_products() -> TestResult {
        let mut store = ParameterStore::new();
        let a = store.add(UnknownParameter::new(ParameterType::MajorAxisCoefficient, 5.0));
        let e = store.add(UnknownParameter::new(ParameterType::Eccentricity, 3.0));
        let b = store.add(UnknownParameter::new(ParameterType::MinorAxisCoefficient, 0.0));
        let restriction =
            ProductSumRestriction::with_exponent(&store, vec![a, e], vec![a, e], 0.5, false, b)?;
        assert_abs_diff_eq!(
            restriction.evaluate(&store, &Point::new_2d(0.0, 0.0)),
            4.0,
            epsilon = 1e-15
        );
        Ok(())
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let mut store = ParameterStore::new();
        let a = store.add(UnknownParameter::new(ParameterType::VectorX, 1.0));
        let b = store.add(UnknownParameter::new(ParameterType::VectorY, 1.0));
        let c = store.add(UnknownParameter::new(ParameterType::Length, 1.0));
        assert!(ProductSumRestriction::new(&store, vec![a, b], vec![a], c).is_err());
        assert!(ProductSumRestriction::new(&store, vec![a, c], vec![a, b], c).is_err());
    }
}
