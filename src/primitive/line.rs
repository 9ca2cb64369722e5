use crate::core::{ParameterId, ParameterStore, ParameterType, ProcessingType, UnknownParameter};
use crate::primitive::{
    GeometricPrimitive, PointJacobian, PrimitiveResult, PrimitiveType, TranslatedParameter,
    add_parameter, shifted,
};
use crate::restriction::{ProductSumRestriction, Restriction};

/// 2-D line in Hesse normal form `nx·x + ny·y = d` with `nx² + ny² = 1`.
#[derive(Debug, Clone)]
pub struct Line {
    signature: Vec<(ParameterType, ParameterId)>,
    nx: ParameterId,
    ny: ParameterId,
    d: ParameterId,
    vector_length: ParameterId,
    unit_normal: ProductSumRestriction,
}

impl Line {
    pub fn new(store: &mut ParameterStore) -> PrimitiveResult<Self> {
        let mut signature = Vec::with_capacity(4);
        let nx = add_parameter(store, &mut signature, UnknownParameter::new(ParameterType::VectorX, 0.0));
        let ny = add_parameter(store, &mut signature, UnknownParameter::new(ParameterType::VectorY, 1.0));
        let d = add_parameter(store, &mut signature, UnknownParameter::new(ParameterType::Length, 0.0));
        let vector_length = add_parameter(
            store,
            &mut signature,
            UnknownParameter::new(ParameterType::VectorLength, 1.0)
                .with_processing_type(ProcessingType::Fixed)
                .with_visible(false),
        );
        let unit_normal =
            ProductSumRestriction::new(store, vec![nx, ny], vec![nx, ny], vector_length)?;
        Ok(Self {
            signature,
            nx,
            ny,
            d,
            vector_length,
            unit_normal,
        })
    }

    pub fn normal_x(&self) -> ParameterId {
        self.nx
    }

    pub fn normal_y(&self) -> ParameterId {
        self.ny
    }

    pub fn distance(&self) -> ParameterId {
        self.d
    }

    pub fn vector_length(&self) -> ParameterId {
        self.vector_length
    }
}

impl GeometricPrimitive for Line {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Line
    }

    fn parameters(&self) -> &[(ParameterType, ParameterId)] {
        &self.signature
    }

    fn restrictions(&self) -> Vec<Box<dyn Restriction>> {
        vec![Box::new(self.unit_normal.clone())]
    }

    fn misclosure(&self, store: &ParameterStore, point: &[f64]) -> f64 {
        store.value(self.nx) * point[0] + store.value(self.ny) * point[1] - store.value(self.d)
    }

    fn jacobian(&self, store: &ParameterStore, point: &[f64]) -> PointJacobian {
        PointJacobian {
            parameters: vec![(self.nx, point[0]), (self.ny, point[1]), (self.d, -1.0)],
            coordinates: vec![store.value(self.nx), store.value(self.ny)],
        }
    }

    fn translation(&self, store: &ParameterStore, delta: &[f64]) -> Vec<TranslatedParameter> {
        vec![shifted(store, self.d, &[(self.nx, delta[0]), (self.ny, delta[1])])]
    }

    fn box_clone(&self) -> Box<dyn GeometricPrimitive> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Point;
    use crate::primitive::test_support::*;
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn line(store: &mut ParameterStore) -> PrimitiveResult<Line> {
        let line = Line::new(store)?;
        store.set_value(line.normal_x(), 0.6);
        store.set_value(line.normal_y(), 0.8);
        store.set_value(line.distance(), 2.0);
        Ok(line)
    }

    #[test]
    fn test_misclosure_is_signed_distance() -> TestResult {
        let mut store = ParameterStore::new();
        let line = line(&mut store)?;
        assert_abs_diff_eq!(line.misclosure(&store, &[0.0, 0.0]), -2.0, epsilon = 1e-15);
        assert_abs_diff_eq!(line.misclosure(&store, &[1.2, 1.6]), 0.0, epsilon = 1e-15);
        let unit = &line.restrictions()[0];
        assert_abs_diff_eq!(unit.misclosure(&store, &Point::new_2d(0.0, 0.0)), 0.0, epsilon = 1e-15);
        Ok(())
    }

    #[test]
    fn test_jacobian() -> TestResult {
        let mut store = ParameterStore::new();
        let line = line(&mut store)?;
        assert_jacobian(&line, &mut store, &[0.3, -1.7]);
        Ok(())
    }

    #[test]
    fn test_center_of_mass_round_trip() -> TestResult {
        let mut store = ParameterStore::new();
        let line = line(&mut store)?;
        assert_translation_invariant(&line, &mut store, &[1.0, 2.0], &[3.0, -4.0])?;
        assert_round_trip(&line, &mut store, &[10.0, -20.0])
    }
}
