use crate::core::{ParameterId, ParameterStore, ParameterType, ProcessingType, UnknownParameter};
use crate::primitive::{
    GeometricPrimitive, PointJacobian, PrimitiveResult, PrimitiveType, TranslatedParameter,
    add_parameter, shifted,
};
use crate::restriction::{ProductSumRestriction, Restriction};

/// Plane in Hesse normal form `n·p = d` with `|n| = 1`.
#[derive(Debug, Clone)]
pub struct Plane {
    signature: Vec<(ParameterType, ParameterId)>,
    normal: [ParameterId; 3],
    d: ParameterId,
    unit_normal: ProductSumRestriction,
}

impl Plane {
    pub fn new(store: &mut ParameterStore) -> PrimitiveResult<Self> {
        let mut signature = Vec::with_capacity(5);
        let normal = [
            (ParameterType::VectorX, 0.0),
            (ParameterType::VectorY, 0.0),
            (ParameterType::VectorZ, 1.0),
        ]
        .map(|(t, v)| add_parameter(store, &mut signature, UnknownParameter::new(t, v)));
        let d = add_parameter(store, &mut signature, UnknownParameter::new(ParameterType::Length, 0.0));
        let vector_length = add_parameter(
            store,
            &mut signature,
            UnknownParameter::new(ParameterType::VectorLength, 1.0)
                .with_processing_type(ProcessingType::Fixed)
                .with_visible(false),
        );
        let unit_normal =
            ProductSumRestriction::new(store, normal.to_vec(), normal.to_vec(), vector_length)?;
        Ok(Self {
            signature,
            normal,
            d,
            unit_normal,
        })
    }

    pub fn normal(&self) -> [ParameterId; 3] {
        self.normal
    }

    pub fn distance(&self) -> ParameterId {
        self.d
    }
}

impl GeometricPrimitive for Plane {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Plane
    }

    fn parameters(&self) -> &[(ParameterType, ParameterId)] {
        &self.signature
    }

    fn restrictions(&self) -> Vec<Box<dyn Restriction>> {
        vec![Box::new(self.unit_normal.clone())]
    }

    fn misclosure(&self, store: &ParameterStore, point: &[f64]) -> f64 {
        self.normal
            .iter()
            .zip(point)
            .map(|(id, p)| store.value(*id) * p)
            .sum::<f64>()
            - store.value(self.d)
    }

    fn jacobian(&self, store: &ParameterStore, point: &[f64]) -> PointJacobian {
        let mut parameters: Vec<(ParameterId, f64)> =
            self.normal.iter().zip(point).map(|(id, p)| (*id, *p)).collect();
        parameters.push((self.d, -1.0));
        PointJacobian {
            parameters,
            coordinates: self.normal.iter().map(|id| store.value(*id)).collect(),
        }
    }

    fn translation(&self, store: &ParameterStore, delta: &[f64]) -> Vec<TranslatedParameter> {
        let terms: Vec<(ParameterId, f64)> =
            self.normal.iter().zip(delta).map(|(id, d)| (*id, *d)).collect();
        vec![shifted(store, self.d, &terms)]
    }

    fn box_clone(&self) -> Box<dyn GeometricPrimitive> {
        Box::new(self.clone())
    }
}
