//! Builders for curves in the plane.

use crate::core::{ParameterStore, ParameterType};
use crate::feature::{Feature, FeatureResult};
use crate::primitive::{Circle, Ellipse, Line, PrimitiveType, QuadraticCurve};
use crate::restriction::{AverageRestriction, ProductSumRestriction};

impl Feature {
    /// Line `nx·x + ny·y = d`.
    ///
    /// Post-processed: the foot point of the origin `(nx·d, ny·d)` and the direction
    /// vector `(ny, −nx)`.
    pub fn line() -> FeatureResult<Self> {
        let mut store = ParameterStore::new();
        let line = Line::new(&mut store)?;
        let (nx, ny, d, one) = (
            line.normal_x(),
            line.normal_y(),
            line.distance(),
            line.vector_length(),
        );
        let mut feature = Feature::with_store(PrimitiveType::Line, store);
        feature.push_primitive(Box::new(line));

        let minus_one = feature.add_constant(-1.0);
        let x0 = feature.add_derived_parameter(ParameterType::OriginCoordinateX, "x0");
        let y0 = feature.add_derived_parameter(ParameterType::OriginCoordinateY, "y0");
        let ux = feature.add_derived_parameter(ParameterType::VectorX, "ux");
        let uy = feature.add_derived_parameter(ParameterType::VectorY, "uy");

        let store = feature.store();
        let calculations = [
            ProductSumRestriction::new(store, vec![nx], vec![d], x0)?,
            ProductSumRestriction::new(store, vec![ny], vec![d], y0)?,
            ProductSumRestriction::new(store, vec![ny], vec![one], ux)?,
            ProductSumRestriction::new(store, vec![nx], vec![minus_one], uy)?,
        ];
        for calculation in calculations {
            feature.add_post_processing(Box::new(calculation))?;
        }
        feature.evaluate_post_processing();
        Ok(feature)
    }

    pub fn circle() -> FeatureResult<Self> {
        let mut store = ParameterStore::new();
        let circle = Circle::new(&mut store);
        let mut feature = Feature::with_store(PrimitiveType::Circle, store);
        feature.push_primitive(Box::new(circle));
        Ok(feature)
    }

    /// Ellipse through two foci and the major semi-axis.
    ///
    /// Post-processed: the center as mean of the foci, the eccentricity vector `F1 − center`,
    /// the linear eccentricity `e` and the minor semi-axis `b = √(a² − e²)`.
    pub fn ellipse() -> FeatureResult<Self> {
        let mut store = ParameterStore::new();
        let ellipse = Ellipse::new(&mut store);
        let (x1, y1) = ellipse.primary_focus();
        let (x2, y2) = ellipse.secondary_focus();
        let a = ellipse.major_axis();
        let mut feature = Feature::with_store(PrimitiveType::Ellipse, store);
        feature.push_primitive(Box::new(ellipse));

        let one = feature.add_constant(1.0);
        let x0 = feature.add_derived_parameter(ParameterType::OriginCoordinateX, "x0");
        let y0 = feature.add_derived_parameter(ParameterType::OriginCoordinateY, "y0");
        let ex = feature.add_derived_parameter(ParameterType::EccentricityX, "ex");
        let ey = feature.add_derived_parameter(ParameterType::EccentricityY, "ey");
        let e = feature.add_derived_parameter(ParameterType::Eccentricity, "e");
        let b = feature.add_derived_parameter(ParameterType::MinorAxisCoefficient, "b");

        let store = feature.store();
        let difference = vec![1.0, -1.0];
        let center_x = AverageRestriction::new(store, vec![x1, x2], x0)?;
        let center_y = AverageRestriction::new(store, vec![y1, y2], y0)?;
        let eccentricity_x = ProductSumRestriction::with_signs(
            store,
            vec![x1, x0],
            vec![one, one],
            difference.clone(),
            1.0,
            ex,
        )?;
        let eccentricity_y = ProductSumRestriction::with_signs(
            store,
            vec![y1, y0],
            vec![one, one],
            difference.clone(),
            1.0,
            ey,
        )?;
        let eccentricity =
            ProductSumRestriction::with_exponent(store, vec![ex, ey], vec![ex, ey], 0.5, true, e)?;
        let minor_axis =
            ProductSumRestriction::with_signs(store, vec![a, e], vec![a, e], difference, 0.5, b)?;

        feature.add_post_processing(Box::new(center_x))?;
        feature.add_post_processing(Box::new(center_y))?;
        feature.add_post_processing(Box::new(eccentricity_x))?;
        feature.add_post_processing(Box::new(eccentricity_y))?;
        feature.add_post_processing(Box::new(eccentricity))?;
        feature.add_post_processing(Box::new(minor_axis))?;
        feature.evaluate_post_processing();
        Ok(feature)
    }

    pub fn quadratic_curve() -> FeatureResult<Self> {
        let mut store = ParameterStore::new();
        let curve = QuadraticCurve::new(&mut store)?;
        let mut feature = Feature::with_store(PrimitiveType::QuadraticCurve, store);
        feature.push_primitive(Box::new(curve));
        Ok(feature)
    }
}
