//! Unknown parameters and their arena.
//!
//! Every geometric quantity a feature carries (origin coordinates, radius, normal vector,
//! polynomial coefficients, derived quantities such as the minor axis of an ellipse) is an
//! [`UnknownParameter`] owned by exactly one [`ParameterStore`]. Primitives and restrictions
//! refer to parameters by [`ParameterId`] and never own them.
//!
//! # Processing types
//!
//! - [`ProcessingType::Adjustment`]: estimated; receives a column in the normal equations
//! - [`ProcessingType::Fixed`]: held at its current value
//! - [`ProcessingType::PostProcessing`]: computed from estimated parameters after the adjustment
//!
//! # Example
//!
//! ```
//! use geofit::core::parameter::{ParameterStore, ParameterType, ProcessingType, UnknownParameter};
//!
//! let mut store = ParameterStore::new();
//! let radius = store.add(UnknownParameter::new(ParameterType::Radius, 1.0));
//! let fixed = store.add(
//!     UnknownParameter::new(ParameterType::VectorLength, 1.0)
//!         .with_processing_type(ProcessingType::Fixed),
//! );
//!
//! assert_eq!(store.assign_columns(), 1);
//! assert_eq!(store.column(radius), Some(0));
//! assert_eq!(store.column(fixed), None);
//! ```

use std::fmt::{self, Display, Formatter};

/// Semantic tag of an unknown parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    OriginCoordinateX,
    OriginCoordinateY,
    OriginCoordinateZ,
    PrimaryFocalCoordinateX,
    PrimaryFocalCoordinateY,
    PrimaryFocalCoordinateZ,
    SecondaryFocalCoordinateX,
    SecondaryFocalCoordinateY,
    SecondaryFocalCoordinateZ,
    Radius,
    VectorX,
    VectorY,
    VectorZ,
    VectorLength,
    Length,
    MajorAxisCoefficient,
    MinorAxisCoefficient,
    EccentricityX,
    EccentricityY,
    Eccentricity,
    PolynomialCoefficientA,
    PolynomialCoefficientB,
    PolynomialCoefficientC,
    PolynomialCoefficientD,
    PolynomialCoefficientE,
    PolynomialCoefficientF,
    PolynomialCoefficientG,
    PolynomialCoefficientH,
    PolynomialCoefficientI,
    Angle,
    Constant,
}

impl Display for ParameterType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterType::OriginCoordinateX => "x0",
            ParameterType::OriginCoordinateY => "y0",
            ParameterType::OriginCoordinateZ => "z0",
            ParameterType::PrimaryFocalCoordinateX => "x1",
            ParameterType::PrimaryFocalCoordinateY => "y1",
            ParameterType::PrimaryFocalCoordinateZ => "z1",
            ParameterType::SecondaryFocalCoordinateX => "x2",
            ParameterType::SecondaryFocalCoordinateY => "y2",
            ParameterType::SecondaryFocalCoordinateZ => "z2",
            ParameterType::Radius => "r",
            ParameterType::VectorX => "nx",
            ParameterType::VectorY => "ny",
            ParameterType::VectorZ => "nz",
            ParameterType::VectorLength => "|n|",
            ParameterType::Length => "d",
            ParameterType::MajorAxisCoefficient => "a",
            ParameterType::MinorAxisCoefficient => "b",
            ParameterType::EccentricityX => "ex",
            ParameterType::EccentricityY => "ey",
            ParameterType::Eccentricity => "e",
            ParameterType::PolynomialCoefficientA => "A",
            ParameterType::PolynomialCoefficientB => "B",
            ParameterType::PolynomialCoefficientC => "C",
            ParameterType::PolynomialCoefficientD => "D",
            ParameterType::PolynomialCoefficientE => "E",
            ParameterType::PolynomialCoefficientF => "F",
            ParameterType::PolynomialCoefficientG => "G",
            ParameterType::PolynomialCoefficientH => "H",
            ParameterType::PolynomialCoefficientI => "I",
            ParameterType::Angle => "angle",
            ParameterType::Constant => "const",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingType {
    #[default]
    Adjustment,
    Fixed,
    PostProcessing,
}

/// A single scalar unknown.
#[derive(Debug, Clone)]
pub struct UnknownParameter {
    pub parameter_type: ParameterType,
    pub name: String,
    /// Current estimate
    pub value: f64,
    /// Initial value the iteration restarts from
    pub value0: f64,
    /// Column in the normal equations, `None` if not estimated
    pub column: Option<usize>,
    pub processing_type: ProcessingType,
    pub visible: bool,
    pub indispensable: bool,
    pub uncertainty: f64,
}

impl UnknownParameter {
    pub fn new(parameter_type: ParameterType, value: f64) -> Self {
        Self {
            parameter_type,
            name: parameter_type.to_string(),
            value,
            value0: value,
            column: None,
            processing_type: ProcessingType::Adjustment,
            visible: true,
            indispensable: true,
            uncertainty: 0.0,
        }
    }

    pub fn with_processing_type(mut self, processing_type: ProcessingType) -> Self {
        self.processing_type = processing_type;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_indispensable(mut self, indispensable: bool) -> Self {
        self.indispensable = indispensable;
        self
    }
}

impl Display for UnknownParameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} {:>18.10} ± {:.3e} ({:?})",
            self.name, self.value, self.uncertainty, self.processing_type
        )
    }
}

/// Handle of a parameter inside its [`ParameterStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterId(usize);

impl ParameterId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Ordered arena of unknown parameters.
///
/// The order is the insertion order unless replaced by [`ParameterStore::set_order`]; it
/// decides the column numbering and the reporting order.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    parameters: Vec<UnknownParameter>,
    order: Vec<ParameterId>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, parameter: UnknownParameter) -> ParameterId {
        let id = ParameterId(self.parameters.len());
        self.parameters.push(parameter);
        self.order.push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn contains(&self, id: ParameterId) -> bool {
        id.0 < self.parameters.len()
    }

    pub fn get(&self, id: ParameterId) -> &UnknownParameter {
        &self.parameters[id.0]
    }

    pub fn get_mut(&mut self, id: ParameterId) -> &mut UnknownParameter {
        &mut self.parameters[id.0]
    }

    pub fn value(&self, id: ParameterId) -> f64 {
        self.parameters[id.0].value
    }

    pub fn set_value(&mut self, id: ParameterId, value: f64) {
        self.parameters[id.0].value = value;
    }

    pub fn column(&self, id: ParameterId) -> Option<usize> {
        self.parameters[id.0].column
    }

    /// First parameter of the given type, in store order.
    pub fn find(&self, parameter_type: ParameterType) -> Option<ParameterId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.parameters[id.0].parameter_type == parameter_type)
    }

    /// Parameters in store order.
    pub fn iter(&self) -> impl Iterator<Item = (ParameterId, &UnknownParameter)> {
        self.order.iter().map(|id| (*id, &self.parameters[id.0]))
    }

    pub fn ids(&self) -> Vec<ParameterId> {
        self.order.clone()
    }

    /// Replace the ordering; ids missing from `order` keep their relative order at the end.
    pub fn set_order(&mut self, order: &[ParameterId]) {
        let mut new_order: Vec<ParameterId> = order
            .iter()
            .copied()
            .filter(|id| self.contains(*id))
            .collect();
        new_order.dedup();
        for id in &self.order {
            if !new_order.contains(id) {
                new_order.push(*id);
            }
        }
        self.order = new_order;
    }

    /// Number the estimated parameters `0..nou` in store order and clear all other columns.
    ///
    /// Returns the number of unknowns.
    pub fn assign_columns(&mut self) -> usize {
        let mut column = 0;
        for id in &self.order {
            let parameter = &mut self.parameters[id.0];
            if parameter.processing_type == ProcessingType::Adjustment {
                parameter.column = Some(column);
                column += 1;
            } else {
                parameter.column = None;
            }
        }
        column
    }

    /// Warm start: `value ← value0` for every parameter.
    pub fn apply_initial_guess(&mut self) {
        for parameter in &mut self.parameters {
            parameter.value = parameter.value0;
        }
    }

    /// Number of parameters that currently hold a column.
    pub fn number_of_columns(&self) -> usize {
        self.parameters.iter().filter(|p| p.column.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_columns_skips_fixed_and_post_processed() {
        let mut store = ParameterStore::new();
        let a = store.add(UnknownParameter::new(ParameterType::VectorX, 0.0));
        let fixed = store.add(
            UnknownParameter::new(ParameterType::VectorLength, 1.0)
                .with_processing_type(ProcessingType::Fixed),
        );
        let b = store.add(UnknownParameter::new(ParameterType::VectorY, 1.0));
        let post = store.add(
            UnknownParameter::new(ParameterType::OriginCoordinateX, 0.0)
                .with_processing_type(ProcessingType::PostProcessing),
        );

        assert_eq!(store.assign_columns(), 2);
        assert_eq!(store.column(a), Some(0));
        assert_eq!(store.column(b), Some(1));
        assert_eq!(store.column(fixed), None);
        assert_eq!(store.column(post), None);
    }

    #[test]
    fn test_set_order_changes_numbering() {
        let mut store = ParameterStore::new();
        let a = store.add(UnknownParameter::new(ParameterType::VectorX, 0.0));
        let b = store.add(UnknownParameter::new(ParameterType::VectorY, 0.0));
        let c = store.add(UnknownParameter::new(ParameterType::Length, 0.0));

        store.set_order(&[c, a]);
        assert_eq!(store.ids(), vec![c, a, b]);
        store.assign_columns();
        assert_eq!(store.column(c), Some(0));
        assert_eq!(store.column(b), Some(2));
    }

    #[test]
    fn test_apply_initial_guess() {
        let mut store = ParameterStore::new();
        let r = store.add(UnknownParameter::new(ParameterType::Radius, 2.0));
        store.set_value(r, 5.0);
        assert_eq!(store.value(r), 5.0);
        store.apply_initial_guess();
        assert_eq!(store.value(r), 2.0);
        assert_eq!(store.find(ParameterType::Radius), Some(r));
        assert_eq!(store.find(ParameterType::Angle), None);
    }
}
