use crate::core::{ParameterId, ParameterStore, Point};
use crate::restriction::{
    Restriction, RestrictionError, RestrictionResult, RestrictionType, accumulate,
    check_known, check_regressand,
};

/// `acos(a·b / (|a|·|b|)) = c` for two vectors of equal length.
#[derive(Debug, Clone)]
pub struct VectorAngleRestriction {
    regressors_a: Vec<ParameterId>,
    regressors_b: Vec<ParameterId>,
    regressand: ParameterId,
}

struct Dots {
    ab: f64,
    aa: f64,
    bb: f64,
}

impl VectorAngleRestriction {
    pub fn new(
        store: &ParameterStore,
        regressors_a: Vec<ParameterId>,
        regressors_b: Vec<ParameterId>,
        regressand: ParameterId,
    ) -> RestrictionResult<Self> {
        if regressors_a.len() != regressors_b.len() || regressors_a.is_empty() {
            return Err(RestrictionError::InvalidArgument(format!(
                "vector angle restriction: vectors must be non-empty and of equal length ({} != {})",
                regressors_a.len(),
                regressors_b.len()
            ))
            .log());
        }
        check_known(store, &regressors_a)?;
        check_known(store, &regressors_b)?;
        check_known(store, &[regressand])?;
        check_regressand(regressand, &regressors_a, RestrictionType::VectorAngle)?;
        check_regressand(regressand, &regressors_b, RestrictionType::VectorAngle)?;
        Ok(Self {
            regressors_a,
            regressors_b,
            regressand,
        })
    }

    fn dots(&self, store: &ParameterStore) -> Dots {
        let mut dots = Dots {
            ab: 0.0,
            aa: 0.0,
            bb: 0.0,
        };
        for (a, b) in self.regressors_a.iter().zip(&self.regressors_b) {
            let (a, b) = (store.value(*a), store.value(*b));
            dots.ab += a * b;
            dots.aa += a * a;
            dots.bb += b * b;
        }
        dots
    }
}

impl Restriction for VectorAngleRestriction {
    fn restriction_type(&self) -> RestrictionType {
        RestrictionType::VectorAngle
    }

    fn regressand(&self) -> Option<ParameterId> {
        Some(self.regressand)
    }

    fn misclosure(&self, store: &ParameterStore, _center: &Point) -> f64 {
        let dots = self.dots(store);
        let cosine = (dots.ab / dots.aa.sqrt() / dots.bb.sqrt()).clamp(-1.0, 1.0);
        cosine.acos() - store.value(self.regressand)
    }

    fn partial_derivatives(
        &self,
        store: &ParameterStore,
        _center: &Point,
    ) -> Vec<(ParameterId, f64)> {
        let Dots { ab, aa, bb } = self.dots(store);
        let norm = aa.sqrt() * bb.sqrt();
        let sine = (1.0 - ab * ab / aa / bb).max(0.0).sqrt();

        let partials = self
            .regressors_a
            .iter()
            .zip(&self.regressors_b)
            .flat_map(|(ida, idb)| {
                let (a, b) = (store.value(*ida), store.value(*idb));
                [
                    (*ida, -(b / norm - a * ab / aa.powf(1.5) / bb.sqrt()) / sine),
                    (*idb, -(a / norm - b * ab / aa.sqrt() / bb.powf(1.5)) / sine),
                ]
            });
        accumulate(partials.chain(std::iter::once((self.regressand, -1.0))))
    }

    fn references(&self, id: ParameterId) -> bool {
        self.regressand == id || self.regressors_a.contains(&id) || self.regressors_b.contains(&id)
    }

    fn box_clone(&self) -> Box<dyn Restriction> {
        Box::new(self.clone())
    }
}
