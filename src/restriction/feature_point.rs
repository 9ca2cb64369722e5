use crate::core::{ParameterId, ParameterStore, Point};
use crate::primitive::GeometricPrimitive;
use crate::restriction::{Restriction, RestrictionType};

/// Forces a primitive through a given point.
///
/// The point observation equation of the primitive is used as a hard constraint, e.g. to
/// make a fitted line pass exactly through a control point.
#[derive(Debug)]
pub struct FeaturePointRestriction {
    primitive: Box<dyn GeometricPrimitive>,
    point: Point,
}

impl Clone for FeaturePointRestriction {
    fn clone(&self) -> Self {
        Self {
            primitive: self.primitive.box_clone(),
            point: self.point,
        }
    }
}

impl FeaturePointRestriction {
    pub fn new(primitive: &dyn GeometricPrimitive, point: Point) -> Self {
        Self {
            primitive: primitive.box_clone(),
            point,
        }
    }

    pub fn point(&self) -> &Point {
        &self.point
    }
}

impl Restriction for FeaturePointRestriction {
    fn restriction_type(&self) -> RestrictionType {
        RestrictionType::FeaturePoint
    }

    fn regressand(&self) -> Option<ParameterId> {
        None
    }

    fn misclosure(&self, store: &ParameterStore, center: &Point) -> f64 {
        let reduced = self.point.offset_from(center);
        self.primitive.misclosure(store, reduced.as_slice())
    }

    fn partial_derivatives(
        &self,
        store: &ParameterStore,
        center: &Point,
    ) -> Vec<(ParameterId, f64)> {
        let reduced = self.point.offset_from(center);
        self.primitive.jacobian(store, reduced.as_slice()).parameters
    }

    fn references(&self, id: ParameterId) -> bool {
        self.primitive.parameter_ids().contains(&id)
    }

    fn box_clone(&self) -> Box<dyn Restriction> {
        Box::new(self.clone())
    }

    fn tracks_center_of_mass(&self) -> bool {
        true
    }
}
