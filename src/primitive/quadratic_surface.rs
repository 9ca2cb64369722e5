use crate::core::{ParameterId, ParameterStore, ParameterType, ProcessingType, UnknownParameter};
use crate::primitive::{
    GeometricPrimitive, PointJacobian, PrimitiveResult, PrimitiveType, SQRT2, TranslatedParameter,
    add_parameter, shifted,
};
use crate::restriction::{ProductSumRestriction, Restriction};

/// General quadric
/// `A·x² + B·y² + C·z² + √2·(D·xy + E·xz + F·yz) + G·x + H·y + I·z + J = 0`.
///
/// With `M = [[A, D/√2, E/√2], [D/√2, B, F/√2], [E/√2, F/√2, C]]` and `g = (G, H, I)` this
/// is `pᵀMp + g·p + J`; the restriction `A² + … + F² = 1` fixes `‖M‖_F = 1`.
#[derive(Debug, Clone)]
pub struct QuadraticSurface {
    signature: Vec<(ParameterType, ParameterId)>,
    quadratic: [ParameterId; 6],
    linear: [ParameterId; 3],
    constant: ParameterId,
    normalization: ProductSumRestriction,
}

impl QuadraticSurface {
    pub fn new(store: &mut ParameterStore) -> PrimitiveResult<Self> {
        let mut signature = Vec::with_capacity(11);
        let diagonal = 1.0 / 3.0_f64.sqrt();
        let quadratic = [
            (ParameterType::PolynomialCoefficientA, diagonal),
            (ParameterType::PolynomialCoefficientB, diagonal),
            (ParameterType::PolynomialCoefficientC, diagonal),
            (ParameterType::PolynomialCoefficientD, 0.0),
            (ParameterType::PolynomialCoefficientE, 0.0),
            (ParameterType::PolynomialCoefficientF, 0.0),
        ]
        .map(|(t, v)| add_parameter(store, &mut signature, UnknownParameter::new(t, v)));
        let linear = [
            ParameterType::PolynomialCoefficientG,
            ParameterType::PolynomialCoefficientH,
            ParameterType::PolynomialCoefficientI,
        ]
        .map(|t| add_parameter(store, &mut signature, UnknownParameter::new(t, 0.0)));
        let constant = add_parameter(
            store,
            &mut signature,
            UnknownParameter::new(ParameterType::Length, -diagonal),
        );
        let one = add_parameter(
            store,
            &mut signature,
            UnknownParameter::new(ParameterType::VectorLength, 1.0)
                .with_processing_type(ProcessingType::Fixed)
                .with_visible(false),
        );
        let normalization =
            ProductSumRestriction::new(store, quadratic.to_vec(), quadratic.to_vec(), one)?;
        Ok(Self {
            signature,
            quadratic,
            linear,
            constant,
            normalization,
        })
    }

    /// Ids of `A…F`.
    pub fn quadratic_coefficients(&self) -> [ParameterId; 6] {
        self.quadratic
    }

    /// Ids of `G, H, I`.
    pub fn linear_coefficients(&self) -> [ParameterId; 3] {
        self.linear
    }

    pub fn constant(&self) -> ParameterId {
        self.constant
    }
}

impl GeometricPrimitive for QuadraticSurface {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::QuadraticSurface
    }

    fn parameters(&self) -> &[(ParameterType, ParameterId)] {
        &self.signature
    }

    fn restrictions(&self) -> Vec<Box<dyn Restriction>> {
        vec![Box::new(self.normalization.clone())]
    }

    fn misclosure(&self, store: &ParameterStore, point: &[f64]) -> f64 {
        let [a, b, c, d, e, f] = self.quadratic.map(|id| store.value(id));
        let [g, h, i] = self.linear.map(|id| store.value(id));
        let (x, y, z) = (point[0], point[1], point[2]);
        a * x * x
            + b * y * y
            + c * z * z
            + SQRT2 * (d * x * y + e * x * z + f * y * z)
            + g * x
            + h * y
            + i * z
            + store.value(self.constant)
    }

    fn jacobian(&self, store: &ParameterStore, point: &[f64]) -> PointJacobian {
        let [a, b, c, d, e, f] = self.quadratic.map(|id| store.value(id));
        let [g, h, i] = self.linear.map(|id| store.value(id));
        let (x, y, z) = (point[0], point[1], point[2]);
        let monomials = [
            x * x,
            y * y,
            z * z,
            SQRT2 * x * y,
            SQRT2 * x * z,
            SQRT2 * y * z,
        ];
        let mut parameters: Vec<(ParameterId, f64)> =
            self.quadratic.iter().copied().zip(monomials).collect();
        parameters.extend(self.linear.iter().copied().zip([x, y, z]));
        parameters.push((self.constant, 1.0));
        PointJacobian {
            parameters,
            coordinates: vec![
                2.0 * a * x + SQRT2 * (d * y + e * z) + g,
                2.0 * b * y + SQRT2 * (d * x + f * z) + h,
                2.0 * c * z + SQRT2 * (e * x + f * y) + i,
            ],
        }
    }

    fn translation(&self, store: &ParameterStore, delta: &[f64]) -> Vec<TranslatedParameter> {
        let [a, b, c, d, e, f] = self.quadratic;
        let [g, h, i] = self.linear;
        let (dx, dy, dz) = (delta[0], delta[1], delta[2]);
        vec![
            // g' = g − 2·M·δ
            shifted(store, g, &[(a, -2.0 * dx), (d, -SQRT2 * dy), (e, -SQRT2 * dz)]),
            shifted(store, h, &[(d, -SQRT2 * dx), (b, -2.0 * dy), (f, -SQRT2 * dz)]),
            shifted(store, i, &[(e, -SQRT2 * dx), (f, -SQRT2 * dy), (c, -2.0 * dz)]),
            // J' = J + δᵀ·M·δ − g·δ
            shifted(
                store,
                self.constant,
                &[
                    (a, dx * dx),
                    (b, dy * dy),
                    (c, dz * dz),
                    (d, SQRT2 * dx * dy),
                    (e, SQRT2 * dx * dz),
                    (f, SQRT2 * dy * dz),
                    (g, -dx),
                    (h, -dy),
                    (i, -dz),
                ],
            ),
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

    fn quadric(store: &mut ParameterStore) -> PrimitiveResult<QuadraticSurface> {
        let surface = QuadraticSurface::new(store)?;
        let values = [1.0, 2.0, 0.5, 0.3, -0.2, 0.1, 0.4, -0.6, 0.9, -2.0];
        let ids = surface
            .quadratic_coefficients()
            .into_iter()
            .chain(surface.linear_coefficients())
            .chain([surface.constant()]);
        for (id, value) in ids.zip(values) {
            store.set_value(id, value);
        }
        Ok(surface)
    }

    #[test]
    fn test_default_is_unit_sphere() -> TestResult {
        let mut store = ParameterStore::new();
        let surface = QuadraticSurface::new(&mut store)?;
        assert_abs_diff_eq!(surface.misclosure(&store, &[0.0, 0.0, 1.0]), 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(
            surface.misclosure(&store, &[0.6, 0.8, 0.0]),
            0.0,
            epsilon = 1e-15
        );
        Ok(())
    }

    #[test]
    fn test_jacobian() -> TestResult {
        let mut store = ParameterStore::new();
        let surface = quadric(&mut store)?;
        assert_jacobian(&surface, &mut store, &[0.3, -1.1, 0.8]);
        Ok(())
    }

    #[test]
    fn test_center_of_mass_round_trip() -> TestResult {
        let mut store = ParameterStore::new();
        let surface = quadric(&mut store)?;
        assert_translation_invariant(&surface, &mut store, &[0.3, -1.1, 0.8], &[1.5, 2.0, -1.0])?;
        assert_round_trip(&surface, &mut store, &[2.0, -1.0, 3.0])
    }
}
