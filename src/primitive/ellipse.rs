use crate::core::{ParameterId, ParameterStore, ParameterType, UnknownParameter};
use crate::primitive::{
    GeometricPrimitive, PointJacobian, PrimitiveType, TranslatedParameter,
    add_parameter, shift_origin,
};
use crate::restriction::Restriction;

/// Ellipse in two-focus form `|p − F1| + |p − F2| = 2a`.
#[derive(Debug, Clone)]
pub struct Ellipse {
    signature: Vec<(ParameterType, ParameterId)>,
    x1: ParameterId,
    y1: ParameterId,
    x2: ParameterId,
    y2: ParameterId,
    a: ParameterId,
}

impl Ellipse {
    pub fn new(store: &mut ParameterStore) -> Self {
        let mut signature = Vec::with_capacity(5);
        let mut add = |t: ParameterType, value: f64| {
            add_parameter(store, &mut signature, UnknownParameter::new(t, value))
        };
        let x1 = add(ParameterType::PrimaryFocalCoordinateX, -1.0);
        let y1 = add(ParameterType::PrimaryFocalCoordinateY, 0.0);
        let x2 = add(ParameterType::SecondaryFocalCoordinateX, 1.0);
        let y2 = add(ParameterType::SecondaryFocalCoordinateY, 0.0);
        let a = add(ParameterType::MajorAxisCoefficient, 2.0);
        Self {
            signature,
            x1,
            y1,
            x2,
            y2,
            a,
        }
    }

    /// `(x, y)` ids of the first focal point.
    pub fn primary_focus(&self) -> (ParameterId, ParameterId) {
        (self.x1, self.y1)
    }

    pub fn secondary_focus(&self) -> (ParameterId, ParameterId) {
        (self.x2, self.y2)
    }

    pub fn major_axis(&self) -> ParameterId {
        self.a
    }

    /// Vectors `F − p` and their lengths for both foci.
    fn focal_rays(&self, store: &ParameterStore, point: &[f64]) -> [(f64, f64, f64); 2] {
        [(self.x1, self.y1), (self.x2, self.y2)].map(|(x, y)| {
            let dx = store.value(x) - point[0];
            let dy = store.value(y) - point[1];
            (dx, dy, dx.hypot(dy))
        })
    }
}

impl GeometricPrimitive for Ellipse {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Ellipse
    }

    fn parameters(&self) -> &[(ParameterType, ParameterId)] {
        &self.signature
    }

    fn restrictions(&self) -> Vec<Box<dyn Restriction>> {
        Vec::new()
    }

    fn misclosure(&self, store: &ParameterStore, point: &[f64]) -> f64 {
        let [(_, _, s1), (_, _, s2)] = self.focal_rays(store, point);
        s1 + s2 - 2.0 * store.value(self.a)
    }

    fn jacobian(&self, store: &ParameterStore, point: &[f64]) -> PointJacobian {
        let [(dx1, dy1, s1), (dx2, dy2, s2)] = self.focal_rays(store, point);
        // a point on a focus has no direction to it
        let (s1, s2) = (s1.max(f64::EPSILON), s2.max(f64::EPSILON));
        PointJacobian {
            parameters: vec![
                (self.x1, dx1 / s1),
                (self.y1, dy1 / s1),
                (self.x2, dx2 / s2),
                (self.y2, dy2 / s2),
                (self.a, -2.0),
            ],
            coordinates: vec![-dx1 / s1 - dx2 / s2, -dy1 / s1 - dy2 / s2],
        }
    }

    fn translation(&self, store: &ParameterStore, delta: &[f64]) -> Vec<TranslatedParameter> {
        vec![
            shift_origin(store, self.x1, delta[0]),
            shift_origin(store, self.y1, delta[1]),
            shift_origin(store, self.x2, delta[0]),
            shift_origin(store, self.y2, delta[1]),
        ]
    }

    fn box_clone(&self) -> Box<dyn GeometricPrimitive> {
        Box::new(self.clone())
    }
}
