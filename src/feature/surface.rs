//! Builders for surfaces in space.

use crate::core::ParameterStore;
use crate::feature::{Feature, FeatureResult};
use crate::primitive::{Plane, PrimitiveType, QuadraticSurface, Sphere};

impl Feature {
    pub fn plane() -> FeatureResult<Self> {
        let mut store = ParameterStore::new();
        let plane = Plane::new(&mut store)?;
        let mut feature = Feature::with_store(PrimitiveType::Plane, store);
        feature.push_primitive(Box::new(plane));
        Ok(feature)
    }

    pub fn sphere() -> FeatureResult<Self> {
        let mut store = ParameterStore::new();
        let sphere = Sphere::new(&mut store);
        let mut feature = Feature::with_store(PrimitiveType::Sphere, store);
        feature.push_primitive(Box::new(sphere));
        Ok(feature)
    }

    pub fn quadratic_surface() -> FeatureResult<Self> {
        let mut store = ParameterStore::new();
        let surface = QuadraticSurface::new(&mut store)?;
        let mut feature = Feature::with_store(PrimitiveType::QuadraticSurface, store);
        feature.push_primitive(Box::new(surface));
        Ok(feature)
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{FeaturePoint, ParameterType, Point};
    use crate::feature::Feature;
    use crate::linalg::NalgebraBackend;
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_surface_builders() -> TestResult {
        assert_eq!(Feature::plane()?.dimension(), 3);
        assert_eq!(Feature::plane()?.restrictions().len(), 1);
        assert!(Feature::sphere()?.restrictions().is_empty());
        assert_eq!(Feature::quadratic_surface()?.geometries_per_point(), 1);
        Ok(())
    }

    #[test]
    fn test_plane_initial_guess_in_original_frame() -> TestResult {
        let mut feature = Feature::plane()?;
        feature.add_points([
            FeaturePoint::new("1", Point::new_3d(0.0, 0.0, 5.0)),
            FeaturePoint::new("2", Point::new_3d(4.0, 0.0, 5.0)),
            FeaturePoint::new("3", Point::new_3d(0.0, 4.0, 5.0)),
            FeaturePoint::new("4", Point::new_3d(4.0, 4.0, 5.0)),
        ])?;
        feature.derive_initial_guess(&NalgebraBackend::new())?;
        assert_abs_diff_eq!(feature.value(ParameterType::VectorZ).ok_or("nz")?, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(feature.value(ParameterType::Length).ok_or("d")?, 5.0, epsilon = 1e-12);
        Ok(())
    }
}
