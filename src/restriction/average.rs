use crate::core::{ParameterId, ParameterStore, Point};
use crate::restriction::{
    Restriction, RestrictionError, RestrictionResult, RestrictionType, accumulate,
    check_known, check_regressand,
};

/// `(a₁ + a₂ + … + aₙ) / n = c`
#[derive(Debug, Clone)]
pub struct AverageRestriction {
    regressors: Vec<ParameterId>,
    regressand: ParameterId,
}

impl AverageRestriction {
    pub fn new(
        store: &ParameterStore,
        regressors: Vec<ParameterId>,
        regressand: ParameterId,
    ) -> RestrictionResult<Self> {
        if regressors.is_empty() {
            return Err(RestrictionError::InvalidArgument(
                "average restriction requires at least one regressor".to_string(),
            )
            .log());
        }
        check_known(store, &regressors)?;
        check_known(store, &[regressand])?;
        check_regressand(regressand, &regressors, RestrictionType::Average)?;
        Ok(Self {
            regressors,
            regressand,
        })
    }

    pub fn regressors(&self) -> &[ParameterId] {
        &self.regressors
    }
}

impl Restriction for AverageRestriction {
    fn restriction_type(&self) -> RestrictionType {
        RestrictionType::Average
    }

    fn regressand(&self) -> Option<ParameterId> {
        Some(self.regressand)
    }

    fn misclosure(&self, store: &ParameterStore, _center: &Point) -> f64 {
        let sum: f64 = self.regressors.iter().map(|id| store.value(*id)).sum();
        sum / self.regressors.len() as f64 - store.value(self.regressand)
    }

    fn partial_derivatives(
        &self,
        _store: &ParameterStore,
        _center: &Point,
    ) -> Vec<(ParameterId, f64)> {
        let weight = 1.0 / self.regressors.len() as f64;
        accumulate(
            self.regressors
                .iter()
                .map(|id| (*id, weight))
                .chain(std::iter::once((self.regressand, -1.0))),
        )
    }

    fn references(&self, id: ParameterId) -> bool {
        self.regressand == id || self.regressors.contains(&id)
    }

    fn box_clone(&self) -> Box<dyn Restriction> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParameterType, UnknownParameter};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_mean_of_focal_points() -> TestResult {
        let mut store = ParameterStore::new();
        let x1 = store.add(UnknownParameter::new(ParameterType::PrimaryFocalCoordinateX, 1.0));
        let x2 = store.add(UnknownParameter::new(ParameterType::SecondaryFocalCoordinateX, 5.0));
        let x0 = store.add(UnknownParameter::new(ParameterType::OriginCoordinateX, 2.5));
        let restriction = AverageRestriction::new(&store, vec![x1, x2], x0)?;
        let center = Point::new_2d(0.0, 0.0);

        assert_eq!(restriction.misclosure(&store, &center), 0.5);
        assert_eq!(restriction.evaluate(&store, &center), 3.0);
        assert_eq!(
            restriction.partial_derivatives(&store, &center),
            vec![(x1, 0.5), (x2, 0.5), (x0, -1.0)]
        );
        assert!(restriction.references(x0));
        Ok(())
    }

    #[test]
    fn test_regressand_among_regressors_rejected() {
        let mut store = ParameterStore::new();
        let a = store.add(UnknownParameter::new(ParameterType::Length, 1.0));
        let b = store.add(UnknownParameter::new(ParameterType::Length, 1.0));
        assert!(AverageRestriction::new(&store, vec![a, b], a).is_err());
        assert!(AverageRestriction::new(&store, vec![], a).is_err());
    }
}
