use crate::core::{ParameterId, ParameterStore, ParameterType, ProcessingType, UnknownParameter};
use crate::primitive::{
    GeometricPrimitive, PointJacobian, PrimitiveResult, PrimitiveType, SQRT2, TranslatedParameter,
    add_parameter, shifted,
};
use crate::restriction::{ProductSumRestriction, Restriction};

/// General conic `A·x² + B·y² + √2·C·x·y + D·x + E·y + F = 0`.
///
/// The quadratic coefficients are normalized by the restriction `A² + B² + C² = 1`; the
/// `√2` scaling makes this the Frobenius norm of the symmetric coefficient matrix.
#[derive(Debug, Clone)]
pub struct QuadraticCurve {
    signature: Vec<(ParameterType, ParameterId)>,
    a: ParameterId,
    b: ParameterId,
    c: ParameterId,
    d: ParameterId,
    e: ParameterId,
    f: ParameterId,
    normalization: ProductSumRestriction,
}

impl QuadraticCurve {
    pub fn new(store: &mut ParameterStore) -> PrimitiveResult<Self> {
        let mut signature = Vec::with_capacity(7);
        let mut add = |t: ParameterType, value: f64| {
            add_parameter(store, &mut signature, UnknownParameter::new(t, value))
        };
        let a = add(ParameterType::PolynomialCoefficientA, 1.0 / SQRT2);
        let b = add(ParameterType::PolynomialCoefficientB, 1.0 / SQRT2);
        let c = add(ParameterType::PolynomialCoefficientC, 0.0);
        let d = add(ParameterType::PolynomialCoefficientD, 0.0);
        let e = add(ParameterType::PolynomialCoefficientE, 0.0);
        let f = add(ParameterType::Length, -1.0 / SQRT2);
        let one = add_parameter(
            store,
            &mut signature,
            UnknownParameter::new(ParameterType::VectorLength, 1.0)
                .with_processing_type(ProcessingType::Fixed)
                .with_visible(false),
        );
        let quadratic = vec![a, b, c];
        let normalization = ProductSumRestriction::new(store, quadratic.clone(), quadratic, one)?;
        Ok(Self {
            signature,
            a,
            b,
            c,
            d,
            e,
            f,
            normalization,
        })
    }

    /// Ids of `A, B, C, D, E, F` in that order.
    pub fn coefficients(&self) -> [ParameterId; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

impl GeometricPrimitive for QuadraticCurve {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::QuadraticCurve
    }

    fn parameters(&self) -> &[(ParameterType, ParameterId)] {
        &self.signature
    }

    fn restrictions(&self) -> Vec<Box<dyn Restriction>> {
        vec![Box::new(self.normalization.clone())]
    }

    fn misclosure(&self, store: &ParameterStore, point: &[f64]) -> f64 {
        let [a, b, c, d, e, f] = self.coefficients().map(|id| store.value(id));
        let (x, y) = (point[0], point[1]);
        a * x * x + b * y * y + SQRT2 * c * x * y + d * x + e * y + f
    }

    fn jacobian(&self, store: &ParameterStore, point: &[f64]) -> PointJacobian {
        let [a, b, c, d, e, _] = self.coefficients().map(|id| store.value(id));
        let (x, y) = (point[0], point[1]);
        PointJacobian {
            parameters: vec![
                (self.a, x * x),
                (self.b, y * y),
                (self.c, SQRT2 * x * y),
                (self.d, x),
                (self.e, y),
                (self.f, 1.0),
            ],
            coordinates: vec![
                2.0 * a * x + SQRT2 * c * y + d,
                2.0 * b * y + SQRT2 * c * x + e,
            ],
        }
    }

    fn translation(&self, store: &ParameterStore, delta: &[f64]) -> Vec<TranslatedParameter> {
        let (dx, dy) = (delta[0], delta[1]);
        vec![
            shifted(store, self.d, &[(self.a, -2.0 * dx), (self.c, -SQRT2 * dy)]),
            shifted(store, self.e, &[(self.c, -SQRT2 * dx), (self.b, -2.0 * dy)]),
            shifted(
                store,
                self.f,
                &[
                    (self.a, dx * dx),
                    (self.b, dy * dy),
                    (self.c, SQRT2 * dx * dy),
                    (self.d, -dx),
                    (self.e, -dy),
                ],
            ),
        ]
    }

    fn box_clone(&self) -> Box<dyn GeometricPrimitive> {
        Box::new(self.clone())
    }
}
