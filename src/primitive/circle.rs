use crate::core::{ParameterId, ParameterStore, ParameterType, UnknownParameter};
use crate::primitive::{
    GeometricPrimitive, PointJacobian, PrimitiveType, TranslatedParameter,
    add_parameter, shift_origin,
};
use crate::restriction::Restriction;

/// Circle `(x − x0)² + (y − y0)² = r²`.
#[derive(Debug, Clone)]
pub struct Circle {
    signature: Vec<(ParameterType, ParameterId)>,
    x0: ParameterId,
    y0: ParameterId,
    r: ParameterId,
}

impl Circle {
    pub fn new(store: &mut ParameterStore) -> Self {
        let mut signature = Vec::with_capacity(3);
        let x0 = add_parameter(store, &mut signature, UnknownParameter::new(ParameterType::OriginCoordinateX, 0.0));
        let y0 = add_parameter(store, &mut signature, UnknownParameter::new(ParameterType::OriginCoordinateY, 0.0));
        let r = add_parameter(store, &mut signature, UnknownParameter::new(ParameterType::Radius, 1.0));
        Self { signature, x0, y0, r }
    }

    pub fn x0(&self) -> ParameterId {
        self.x0
    }

    pub fn y0(&self) -> ParameterId {
        self.y0
    }

    pub fn radius(&self) -> ParameterId {
        self.r
    }
}

impl GeometricPrimitive for Circle {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Circle
    }

    fn parameters(&self) -> &[(ParameterType, ParameterId)] {
        &self.signature
    }

    fn restrictions(&self) -> Vec<Box<dyn Restriction>> {
        Vec::new()
    }

    fn misclosure(&self, store: &ParameterStore, point: &[f64]) -> f64 {
        let dx = point[0] - store.value(self.x0);
        let dy = point[1] - store.value(self.y0);
        let r = store.value(self.r);
        dx * dx + dy * dy - r * r
    }

    fn jacobian(&self, store: &ParameterStore, point: &[f64]) -> PointJacobian {
        let dx = point[0] - store.value(self.x0);
        let dy = point[1] - store.value(self.y0);
        PointJacobian {
            parameters: vec![
                (self.x0, -2.0 * dx),
                (self.y0, -2.0 * dy),
                (self.r, -2.0 * store.value(self.r)),
            ],
            coordinates: vec![2.0 * dx, 2.0 * dy],
        }
    }

    fn translation(&self, store: &ParameterStore, delta: &[f64]) -> Vec<TranslatedParameter> {
        vec![
            shift_origin(store, self.x0, delta[0]),
            shift_origin(store, self.y0, delta[1]),
        ]
    }

    fn box_clone(&self) -> Box<dyn GeometricPrimitive> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::test_support::*;
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn circle(store: &mut ParameterStore) -> Circle {
        let circle = Circle::new(store);
        store.set_value(circle.x0(), 2.0);
        store.set_value(circle.y0(), 3.0);
        store.set_value(circle.radius(), 1.5);
        circle
    }

    #[test]
    fn test_misclosure() {
        let mut store = ParameterStore::new();
        let circle = circle(&mut store);
        assert_abs_diff_eq!(circle.misclosure(&store, &[3.5, 3.0]), 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(circle.misclosure(&store, &[2.0, 3.0]), -2.25, epsilon = 1e-15);
    }

    #[test]
    fn test_jacobian() {
        let mut store = ParameterStore::new();
        let circle = circle(&mut store);
        assert_jacobian(&circle, &mut store, &[0.4, 4.1]);
    }

    #[test]
    fn test_center_of_mass_round_trip() -> TestResult {
        let mut store = ParameterStore::new();
        let circle = circle(&mut store);
        assert_translation_invariant(&circle, &mut store, &[3.5, 3.0], &[-7.0, 1.0])?;
        assert_round_trip(&circle, &mut store, &[100.0, 250.0])
    }

    #[test]
    fn test_translate_rejects_wrong_dimension() {
        let mut store = ParameterStore::new();
        let circle = circle(&mut store);
        assert!(circle.translate(&mut store, &[1.0, 2.0, 3.0], None).is_err());
    }
}
