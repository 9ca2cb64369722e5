use crate::core::{ParameterId, ParameterStore, ParameterType, UnknownParameter};
use crate::primitive::{
    GeometricPrimitive, PointJacobian, PrimitiveType, TranslatedParameter,
    add_parameter, shift_origin,
};
use crate::restriction::Restriction;

/// Sphere `|p − p0|² = r²`.
#[derive(Debug, Clone)]
pub struct Sphere {
    signature: Vec<(ParameterType, ParameterId)>,
    origin: [ParameterId; 3],
    r: ParameterId,
}

impl Sphere {
    pub fn new(store: &mut ParameterStore) -> Self {
        let mut signature = Vec::with_capacity(4);
        let origin = [
            ParameterType::OriginCoordinateX,
            ParameterType::OriginCoordinateY,
            ParameterType::OriginCoordinateZ,
        ]
        .map(|t| add_parameter(store, &mut signature, UnknownParameter::new(t, 0.0)));
        let r = add_parameter(store, &mut signature, UnknownParameter::new(ParameterType::Radius, 1.0));
        Self { signature, origin, r }
    }

    pub fn origin(&self) -> [ParameterId; 3] {
        self.origin
    }

    pub fn radius(&self) -> ParameterId {
        self.r
    }

    fn offsets(&self, store: &ParameterStore, point: &[f64]) -> [f64; 3] {
        [0, 1, 2].map(|k| point[k] - store.value(self.origin[k]))
    }
}

impl GeometricPrimitive for Sphere {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Sphere
    }

    fn parameters(&self) -> &[(ParameterType, ParameterId)] {
        &self.signature
    }

    fn restrictions(&self) -> Vec<Box<dyn Restriction>> {
        Vec::new()
    }

    fn misclosure(&self, store: &ParameterStore, point: &[f64]) -> f64 {
        let r = store.value(self.r);
        self.offsets(store, point).iter().map(|d| d * d).sum::<f64>() - r * r
    }

    fn jacobian(&self, store: &ParameterStore, point: &[f64]) -> PointJacobian {
        let offsets = self.offsets(store, point);
        let mut parameters: Vec<(ParameterId, f64)> = self
            .origin
            .iter()
            .zip(offsets)
            .map(|(id, d)| (*id, -2.0 * d))
            .collect();
        parameters.push((self.r, -2.0 * store.value(self.r)));
        PointJacobian {
            parameters,
            coordinates: offsets.iter().map(|d| 2.0 * d).collect(),
        }
    }

    fn translation(&self, store: &ParameterStore, delta: &[f64]) -> Vec<TranslatedParameter> {
        self.origin
            .iter()
            .zip(delta)
            .map(|(id, d)| shift_origin(store, *id, *d))
            .collect()
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

    fn sphere(store: &mut ParameterStore) -> Sphere {
        let sphere = Sphere::new(store);
        for (id, value) in sphere.origin().iter().zip([1.0, -2.0, 3.0]) {
            store.set_value(*id, value);
        }
        store.set_value(sphere.radius(), 2.0);
        sphere
    }

    #[test]
    fn test_misclosure() {
        let mut store = ParameterStore::new();
        let sphere = sphere(&mut store);
        assert_abs_diff_eq!(sphere.misclosure(&store, &[1.0, -2.0, 5.0]), 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(sphere.misclosure(&store, &[1.0, -2.0, 3.0]), -4.0, epsilon = 1e-15);
    }

    #[test]
    fn test_jacobian_and_round_trip() -> TestResult {
        let mut store = ParameterStore::new();
        let sphere = sphere(&mut store);
        assert_jacobian(&sphere, &mut store, &[0.2, 0.5, 1.9]);
        assert_translation_invariant(&sphere, &mut store, &[0.2, 0.5, 1.9], &[4.0, -1.0, 2.0])?;
        assert_round_trip(&sphere, &mut store, &[50.0, -20.0, 7.5])
    }
}
