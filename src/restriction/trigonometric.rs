use std::f64::consts::FRAC_PI_2;
use std::fmt::{self, Display, Formatter};

use crate::core::{ParameterId, ParameterStore, Point};
use crate::restriction::{
    Restriction, RestrictionResult, RestrictionType, accumulate, check_known, check_regressand,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TrigonometricFunctionType {
    Sine,
    Cosine,
    #[default]
    Tangent,
    Cotangent,
}

impl Display for TrigonometricFunctionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrigonometricFunctionType::Sine => write!(f, "sin"),
            TrigonometricFunctionType::Cosine => write!(f, "cos"),
            TrigonometricFunctionType::Tangent => write!(f, "tan"),
            TrigonometricFunctionType::Cotangent => write!(f, "cot"),
        }
    }
}

/// `trig(a) = c`, or `trig⁻¹(a) = c` when inverted.
#[derive(Debug, Clone)]
pub struct TrigonometricRestriction {
    function: TrigonometricFunctionType,
    invert: bool,
    regressor: ParameterId,
    regressand: ParameterId,
}

impl TrigonometricRestriction {
    pub fn new(
        store: &ParameterStore,
        function: TrigonometricFunctionType,
        invert: bool,
        regressor: ParameterId,
        regressand: ParameterId,
    ) -> RestrictionResult<Self> {
        check_known(store, &[regressor, regressand])?;
        check_regressand(regressand, &[regressor], RestrictionType::TrigonometricFunction)?;
        Ok(Self {
            function,
            invert,
            regressor,
            regressand,
        })
    }

    pub fn function(&self) -> TrigonometricFunctionType {
        self.function
    }

    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    fn value(&self, a: f64) -> f64 {
        match (self.function, self.invert) {
            (TrigonometricFunctionType::Sine, false) => a.sin(),
            (TrigonometricFunctionType::Sine, true) => a.asin(),
            (TrigonometricFunctionType::Cosine, false) => a.cos(),
            (TrigonometricFunctionType::Cosine, true) => a.acos(),
            (TrigonometricFunctionType::Tangent, false) => a.tan(),
            (TrigonometricFunctionType::Tangent, true) => a.atan(),
            (TrigonometricFunctionType::Cotangent, false) => 1.0 / a.tan(),
            (TrigonometricFunctionType::Cotangent, true) => FRAC_PI_2 - a.atan(),
        }
    }

    fn derivative(&self, a: f64) -> f64 {
        match (self.function, self.invert) {
            (TrigonometricFunctionType::Sine, false) => a.cos(),
            (TrigonometricFunctionType::Sine, true) => 1.0 / (1.0 - a * a).sqrt(),
            (TrigonometricFunctionType::Cosine, false) => -a.sin(),
            (TrigonometricFunctionType::Cosine, true) => -1.0 / (1.0 - a * a).sqrt(),
            (TrigonometricFunctionType::Tangent, false) => 1.0 / (a.cos() * a.cos()),
            (TrigonometricFunctionType::Tangent, true) => 1.0 / (1.0 + a * a),
            (TrigonometricFunctionType::Cotangent, false) => -1.0 / (a.sin() * a.sin()),
            (TrigonometricFunctionType::Cotangent, true) => -1.0 / (1.0 + a * a),
        }
    }
}

impl Restriction for TrigonometricRestriction {
    fn restriction_type(&self) -> RestrictionType {
        RestrictionType::TrigonometricFunction
    }

    fn regressand(&self) -> Option<ParameterId> {
        Some(self.regressand)
    }

    fn misclosure(&self, store: &ParameterStore, _center: &Point) -> f64 {
        self.value(store.value(self.regressor)) - store.value(self.regressand)
    }

    fn partial_derivatives(
        &self,
        store: &ParameterStore,
        _center: &Point,
    ) -> Vec<(ParameterId, f64)> {
        accumulate([
            (self.regressor, self.derivative(store.value(self.regressor))),
            (self.regressand, -1.0),
        ])
    }

    fn references(&self, id: ParameterId) -> bool {
        self.regressor == id || self.regressand == id
    }

    fn box_clone(&self) -> Box<dyn Restriction> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParameterType, UnknownParameter};
    use approx::assert_abs_diff_eq;

    const ALL: [TrigonometricFunctionType; 4] = [
        TrigonometricFunctionType::Sine,
        TrigonometricFunctionType::Cosine,
        TrigonometricFunctionType::Tangent,
        TrigonometricFunctionType::Cotangent,
    ];

    #[test]
    fn test_derivatives_match_finite_differences() -> Result<(), Box<dyn std::error::Error>> {
        let center = Point::new_2d(0.0, 0.0);
        for function in ALL {
            for invert in [false, true] {
                let mut store = ParameterStore::new();
                let a = store.add(UnknownParameter::new(ParameterType::Angle, 0.4));
                let c = store.add(UnknownParameter::new(ParameterType::Constant, 0.0));
                let restriction = TrigonometricRestriction::new(&store, function, invert, a, c)?;

                let h = 1e-6;
                let f0 = restriction.misclosure(&store, &center);
                store.set_value(a, 0.4 + h);
                let f1 = restriction.misclosure(&store, &center);
                store.set_value(a, 0.4);

                let analytic = restriction.partial_derivatives(&store, &center)[0].1;
                assert_abs_diff_eq!(analytic, (f1 - f0) / h, epsilon = 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn test_cotangent_values() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = ParameterStore::new();
        let a = store.add(UnknownParameter::new(ParameterType::Angle, 0.25 * std::f64::consts::PI));
        let c = store.add(UnknownParameter::new(ParameterType::Constant, 0.0));
        let center = Point::new_2d(0.0, 0.0);

        let cot = TrigonometricRestriction::new(&store, TrigonometricFunctionType::Cotangent, false, a, c)?;
        assert_abs_diff_eq!(cot.evaluate(&store, &center), 1.0, epsilon = 1e-12);

        store.set_value(a, 1.0);
        let acot = TrigonometricRestriction::new(&store, TrigonometricFunctionType::Cotangent, true, a, c)?;
        assert_abs_diff_eq!(acot.evaluate(&store, &center), 0.25 * std::f64::consts::PI, epsilon = 1e-12);
        Ok(())
    }
}
