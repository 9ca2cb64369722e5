//! Iteration control and stochastic model of the feature adjustment.
//!
//! [`FeatureAdjustment::estimate`] runs the Gauss-Helmert iteration on a [`Feature`]:
//!
//! 1. reset the points, reduce the primitives to the center of mass and apply the initial guess
//! 2. iterate linearize → assemble → solve → update until the update and all restriction
//!    misclosures fall below `√eps` (optionally damped, optionally reweighted for L1)
//! 3. run one more pass that inverts the normal equations and derives the stochastic model:
//!    cofactor matrix, variance component, redundancy numbers and outlier tests
//!
//! With [`EstimationType::SphericalSimplexUnscentedTransformation`] these steps run once per
//! sigma point of the observations and the results are combined afterwards.
//!
//! Numerical outcomes (singular systems, non-convergence, cancellation) end in an
//! [`EstimationStateType`]; `Err` is reserved for malformed input.

use nalgebra::{DMatrix, DVector};
use std::fmt::{self, Display, Formatter};
use tracing::{debug, info, warn};
use web_time::{Duration, Instant};

use crate::adjustment::normal_equation::{self, NormalEquationSystem, PointEquations};
use crate::adjustment::unscented::SphericalSimplex;
use crate::adjustment::{
    AdjustmentConfig, AdjustmentError, AdjustmentResult, CancellationToken, EstimationStateType,
    EstimationType, VarianceComponent,
};
use crate::core::{FeaturePoint, Point, ProcessingType};
use crate::feature::Feature;
use crate::linalg::{LinearAlgebra, SQRT_EPS, create_backend};
use crate::observers::{AdjustmentEvent, AdjustmentObserver, AdjustmentObserverVec};
use crate::restriction::Restriction;
use crate::statistic::{TestStatisticParameters, create_test_statistic};

/// Largest change of a robust weight that still counts as stable.
const ROBUST_WEIGHT_TOLERANCE: f64 = 1e-6;

/// Per-iteration statistics for detailed logging.
#[derive(Debug, Clone)]
pub struct IterationStats {
    /// Iteration step, starting at 1
    pub iteration: usize,
    /// Weighted sum of squared misclosure residuals after the step
    pub omega: f64,
    /// Largest absolute parameter update
    pub max_abs_dx: f64,
    /// Largest absolute restriction misclosure before the step
    pub max_abs_restriction: f64,
    /// Levenberg-Marquardt damping the step was computed with
    pub damping: f64,
    /// Time taken for this iteration in milliseconds
    pub iter_time_ms: f64,
    /// Total elapsed time since the estimation started in milliseconds
    pub total_time_ms: f64,
    /// Whether the step was accepted (false for rejected damped steps)
    pub accepted: bool,
}

impl IterationStats {
    /// Print table header
    pub fn print_header() {
        debug!(
            "{:>5}  {:>13}  {:>11}  {:>11}  {:>10}  {:>11}  {:>13}  {:>6}",
            "iter", "omega", "max|dx|", "max|r|", "damping", "iter_time", "total_time", "status"
        );
    }

    /// Print single iteration line
    pub fn print_line(&self) {
        debug!(
            "{:>5}  {:>13.6e}  {:>11.2e}  {:>11.2e}  {:>10.2e}  {:>9.2}ms  {:>11.2}ms  {:>6}",
            self.iteration,
            self.omega,
            self.max_abs_dx,
            self.max_abs_restriction,
            self.damping,
            self.iter_time_ms,
            self.total_time_ms,
            if self.accepted { "✓" } else { "✗" }
        );
    }
}

/// Result overview of one [`FeatureAdjustment::estimate`] call.
#[derive(Debug, Clone)]
pub struct AdjustmentSummary {
    pub state: EstimationStateType,
    pub estimation_type: EstimationType,
    pub iterations: usize,
    pub maximum_iterations: usize,
    pub number_of_points: usize,
    pub number_of_unknowns: usize,
    pub number_of_restrictions: usize,
    pub variance_component: VarianceComponent,
    /// Points flagged by the outlier test
    pub significant_points: usize,
    pub final_max_abs_dx: f64,
    pub total_time: Duration,
    pub average_time_per_iteration: Duration,
    pub iteration_history: Vec<IterationStats>,
}

impl Display for AdjustmentSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Feature Adjustment Result")?;
        if self.state.is_success() {
            writeln!(f, "CONVERGED ({})", self.state)?;
        } else {
            writeln!(f, "FAILED ({})", self.state)?;
        }
        writeln!(f)?;
        writeln!(f, "Model:")?;
        writeln!(f, "  Estimation:    {}", self.estimation_type)?;
        writeln!(f, "  Points:        {}", self.number_of_points)?;
        writeln!(f, "  Unknowns:      {}", self.number_of_unknowns)?;
        writeln!(f, "  Restrictions:  {}", self.number_of_restrictions)?;
        writeln!(f)?;
        writeln!(f, "Iterations:")?;
        writeln!(
            f,
            "  Total:         {} of {}",
            self.iterations, self.maximum_iterations
        )?;
        writeln!(f, "  Final max|dx|: {:.2e}", self.final_max_abs_dx)?;
        writeln!(f)?;
        writeln!(f, "{}", self.variance_component)?;
        writeln!(f, "  Outliers:        {}", self.significant_points)?;
        writeln!(f)?;
        writeln!(f, "Performance:")?;
        writeln!(
            f,
            "  Total time:             {:.2}ms",
            self.total_time.as_secs_f64() * 1000.0
        )?;
        writeln!(
            f,
            "  Average per iteration:  {:.2}ms",
            self.average_time_per_iteration.as_secs_f64() * 1000.0
        )?;
        Ok(())
    }
}

/// Stochastic quantities of one point derived in the final pass.
struct PointStochastics {
    redundancy: DVector<f64>,
    cofactors: DVector<f64>,
    gross_errors: DVector<f64>,
    minimal_detectable_bias: DVector<f64>,
    numerator: f64,
}

/// Residual update of one point.
struct PointUpdate {
    residuals: DVector<f64>,
    omega: f64,
    stochastics: Option<PointStochastics>,
}

/// Fixed quantities of one estimation run.
struct Layout {
    center: Point,
    enabled: Vec<usize>,
    restrictions: Vec<Box<dyn Restriction>>,
    number_of_unknowns: usize,
    geometries_per_point: usize,
    variance0: f64,
}

/// Gauss-Helmert estimator for a single [`Feature`].
///
/// # Example
///
/// ```
/// use geofit::adjustment::{AdjustmentConfig, FeatureAdjustment};
/// use geofit::core::{FeaturePoint, ParameterType, Point};
/// use geofit::feature::Feature;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut circle = Feature::circle()?;
/// for (i, (x, y)) in [(3.0, 0.0), (0.0, 3.0), (-3.0, 0.0), (0.0, -3.0), (2.1, 2.1)]
///     .iter()
///     .enumerate()
/// {
///     circle.add_point(FeaturePoint::new(format!("P{i}"), Point::new_2d(*x, *y)))?;
/// }
///
/// let mut adjustment = FeatureAdjustment::new(AdjustmentConfig::new());
/// let state = adjustment.estimate(&mut circle)?;
/// assert!(state.is_success());
/// assert!((circle.value(ParameterType::Radius).unwrap_or(0.0) - 3.0).abs() < 0.05);
/// # Ok(())
/// # }
/// ```
pub struct FeatureAdjustment {
    config: AdjustmentConfig,
    backend: Box<dyn LinearAlgebra>,
    observers: AdjustmentObserverVec,
    cancellation: CancellationToken,
    state: EstimationStateType,
    iterations: usize,
    max_abs_dx: f64,
    max_abs_restriction: f64,
    number_of_points: usize,
    number_of_unknowns: usize,
    number_of_restrictions: usize,
    variance_component: VarianceComponent,
    cofactor_matrix: Option<DMatrix<f64>>,
    test_statistic: Option<TestStatisticParameters>,
    robust_weights: Vec<f64>,
    point_omegas: Vec<f64>,
    significant_points: usize,
    iteration_history: Vec<IterationStats>,
    total_time: Duration,
    /// Primitives are currently expressed relative to the center of mass
    frame_reduced: bool,
}

impl fmt::Debug for FeatureAdjustment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureAdjustment")
            .field("config", &self.config)
            .field("observers", &self.observers)
            .field("state", &self.state)
            .field("iterations", &self.iterations)
            .field("variance_component", &self.variance_component)
            .finish()
    }
}

impl Default for FeatureAdjustment {
    fn default() -> Self {
        Self::new(AdjustmentConfig::default())
    }
}

impl FeatureAdjustment {
    pub fn new(config: AdjustmentConfig) -> Self {
        let backend = create_backend(config.linear_algebra_type);
        Self {
            config,
            backend,
            observers: AdjustmentObserverVec::new(),
            cancellation: CancellationToken::new(),
            state: EstimationStateType::NotInitialised,
            iterations: 0,
            max_abs_dx: 0.0,
            max_abs_restriction: 0.0,
            number_of_points: 0,
            number_of_unknowns: 0,
            number_of_restrictions: 0,
            variance_component: VarianceComponent::default(),
            cofactor_matrix: None,
            test_statistic: None,
            robust_weights: Vec::new(),
            point_omegas: Vec::new(),
            significant_points: 0,
            iteration_history: Vec::new(),
            total_time: Duration::ZERO,
            frame_reduced: false,
        }
    }

    /// Share a cancellation flag with the caller. The flag is not reset by `estimate`.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Replace the linear algebra backend selected by the configuration.
    pub fn with_backend(mut self, backend: Box<dyn LinearAlgebra>) -> Self {
        self.backend = backend;
        self
    }

    pub fn add_observer(&mut self, observer: impl AdjustmentObserver + 'static) {
        self.observers.add(observer);
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &AdjustmentConfig {
        &self.config
    }

    pub fn state(&self) -> EstimationStateType {
        self.state
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn variance_component(&self) -> &VarianceComponent {
        &self.variance_component
    }

    /// Cofactor matrix `Qxx` of the estimated and post-processed parameters, ordered by
    /// their column.
    pub fn cofactor_matrix(&self) -> Option<&DMatrix<f64>> {
        self.cofactor_matrix.as_ref()
    }

    /// Covariance matrix `σ²·Qxx`, scaled with the variance of unit weight in use.
    pub fn covariance(&self) -> Option<DMatrix<f64>> {
        let variance = self.variance_component.variance_of_unit_weight();
        self.cofactor_matrix.as_ref().map(|q| q * variance)
    }

    /// Correlation matrix of the parameters; entries of (nearly) constant parameters are 0.
    pub fn correlation(&self) -> Option<DMatrix<f64>> {
        let q = self.cofactor_matrix.as_ref()?;
        let n = q.nrows();
        let mut correlation = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                let (qii, qjj) = (q[(i, i)], q[(j, j)]);
                if qii < SQRT_EPS || qjj < SQRT_EPS {
                    continue;
                }
                correlation[(i, j)] = q[(i, j)] / (qii * qjj).sqrt();
            }
        }
        Some(correlation)
    }

    /// Test-statistic registry of the last estimation.
    pub fn test_statistic_parameters(&self) -> Option<&TestStatisticParameters> {
        self.test_statistic.as_ref()
    }

    /// Final robust weights of the enabled points (all 1 for L2 estimation).
    pub fn robust_weights(&self) -> &[f64] {
        &self.robust_weights
    }

    pub fn iteration_history(&self) -> &[IterationStats] {
        &self.iteration_history
    }

    pub fn summary(&self) -> AdjustmentSummary {
        let iterations = self.iterations.max(1) as u32;
        AdjustmentSummary {
            state: self.state,
            estimation_type: self.config.estimation_type,
            iterations: self.iterations,
            maximum_iterations: self.config.maximum_iterations,
            number_of_points: self.number_of_points,
            number_of_unknowns: self.number_of_unknowns,
            number_of_restrictions: self.number_of_restrictions,
            variance_component: self.variance_component,
            significant_points: self.significant_points,
            final_max_abs_dx: self.max_abs_dx,
            total_time: self.total_time,
            average_time_per_iteration: self.total_time / iterations,
            iteration_history: self.iteration_history.clone(),
        }
    }

    fn reset(&mut self) {
        self.state = EstimationStateType::NotInitialised;
        self.iterations = 0;
        self.max_abs_dx = 0.0;
        self.max_abs_restriction = 0.0;
        self.variance_component = VarianceComponent::default();
        self.cofactor_matrix = None;
        self.test_statistic = None;
        self.robust_weights.clear();
        self.point_omegas.clear();
        self.significant_points = 0;
        self.iteration_history.clear();
        self.total_time = Duration::ZERO;
        self.frame_reduced = false;
    }

    fn set_state(&mut self, state: EstimationStateType) {
        self.state = state;
        if self.observers.is_empty() {
            return;
        }
        self.observers.notify(&AdjustmentEvent {
            state,
            iteration: self.iterations,
            maximum_iterations: self.config.maximum_iterations,
            max_abs_dx: self.max_abs_dx,
            max_abs_restriction: self.max_abs_restriction,
        });
    }

    /// Estimate all parameters of `feature` from its enabled points.
    ///
    /// On return the parameter values (and, after a successful run, their uncertainties
    /// and the stochastic results of the points) are updated in place and expressed in the
    /// original coordinate frame.
    ///
    /// # Errors
    /// `EmptyFeature` without enabled points, or an error from the initial guess or the
    /// test-statistic setup. Numerical failures are reported through the returned state.
    pub fn estimate(&mut self, feature: &mut Feature) -> AdjustmentResult<EstimationStateType> {
        let start_time = Instant::now();
        self.reset();
        self.set_state(EstimationStateType::Busy);
        if tracing::enabled!(tracing::Level::DEBUG) {
            self.config.print_configuration();
        }

        let state = match self.config.estimation_type {
            EstimationType::SphericalSimplexUnscentedTransformation => {
                self.estimate_unscented(feature, start_time)?
            }
            EstimationType::L2Norm | EstimationType::L1Norm => self.adjust(feature, start_time)?,
        };

        self.total_time = start_time.elapsed();
        self.set_state(state);
        if state.is_success() {
            info!(
                "Adjustment of {} points finished after {} iterations: {}",
                self.number_of_points, self.iterations, state
            );
        } else {
            warn!(
                "Adjustment of {} points stopped after {} iterations: {}",
                self.number_of_points, self.iterations, state
            );
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!("{}", self.summary());
        }
        Ok(state)
    }

    /// One complete Gauss-Helmert adjustment of the current observations.
    fn adjust(
        &mut self,
        feature: &mut Feature,
        start_time: Instant,
    ) -> AdjustmentResult<EstimationStateType> {
        let layout = self.prepare(feature)?;
        let state = self.iterate(feature, &layout, start_time);
        // leave the feature in its original frame whatever happened
        self.restore_frame(feature, &layout);
        state
    }

    /// Adjust every sigma point of the observations and combine the solutions.
    ///
    /// Sigma point `k` moves each enabled point by `L·σₖ`, where `D = L·Lᵀ` is its a-priori
    /// dispersion. The parameters become the weighted mean of the solutions, the cofactor
    /// matrix their weighted scatter divided by `σ0²`, and the residuals the weighted mean
    /// residuals. The last sigma point is the unperturbed observation; redundancy numbers
    /// and point tests are those of its adjustment. `iterations()` counts over all sigma points.
    fn estimate_unscented(
        &mut self,
        feature: &mut Feature,
        start_time: Instant,
    ) -> AdjustmentResult<EstimationStateType> {
        let transformation = self.config.unscented_transformation;
        transformation.validate()?;

        let enabled: Vec<usize> = feature
            .points()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_enabled())
            .map(|(i, _)| i)
            .collect();
        let observed: Vec<Point> = enabled
            .iter()
            .map(|&i| *feature.points()[i].position())
            .collect();
        let factors = enabled
            .iter()
            .map(|&i| {
                feature.points()[i]
                    .dispersion()
                    .clone()
                    .cholesky()
                    .map(|c| c.l())
            })
            .collect::<Option<Vec<DMatrix<f64>>>>();
        let Some(factors) = factors else {
            warn!("A-priori dispersion of a point is not positive definite");
            return Ok(EstimationStateType::SingularMatrix);
        };

        let simplex = SphericalSimplex::new(&transformation, enabled.len() * feature.dimension());
        let outcome =
            self.adjust_sigma_points(feature, &enabled, &observed, &factors, &simplex, start_time);
        for (&i, position) in enabled.iter().zip(&observed) {
            feature.points_mut()[i].set_position(*position);
        }
        let (state, samples, residuals) = outcome?;
        if !state.is_success() {
            return Ok(state);
        }

        let mean = simplex.mean(&samples);
        let covariance = simplex.covariance(&samples, &mean);
        let store = feature.store_mut();
        for id in store.ids() {
            if let Some(column) = store.column(id).filter(|c| *c < mean.len()) {
                store.set_value(id, mean[column]);
            }
        }
        for (&i, residuals) in enabled.iter().zip(residuals) {
            feature.points_mut()[i].set_residuals(residuals);
        }
        let qxx = covariance / self.variance_component.variance0;
        self.update_uncertainties(feature, &qxx);
        self.cofactor_matrix = Some(qxx);
        Ok(state)
    }

    /// Parameter vector (in column order) and mean residuals of every adjusted sigma point.
    #[allow(clippy::type_complexity)]
    fn adjust_sigma_points(
        &mut self,
        feature: &mut Feature,
        enabled: &[usize],
        observed: &[Point],
        factors: &[DMatrix<f64>],
        simplex: &SphericalSimplex,
        start_time: Instant,
    ) -> AdjustmentResult<(EstimationStateType, Vec<DVector<f64>>, Vec<DVector<f64>>)> {
        let dimension = feature.dimension();
        let mut samples = Vec::with_capacity(simplex.number_of_sigma_points());
        let mut residuals = vec![DVector::zeros(dimension); enabled.len()];

        for step in 0..simplex.number_of_sigma_points() {
            if self.cancellation.is_cancelled() {
                return Ok((EstimationStateType::Interrupt, samples, residuals));
            }
            self.set_state(EstimationStateType::UnscentedTransformationStep);
            debug!(
                "Sigma point {} of {}",
                step + 1,
                simplex.number_of_sigma_points()
            );

            let sigma = simplex.sigma_point(step);
            for (k, &i) in enabled.iter().enumerate() {
                let offset = &factors[k] * sigma.rows(k * dimension, dimension);
                let coordinates: Vec<f64> = observed[k]
                    .as_slice()
                    .iter()
                    .zip(offset.iter())
                    .map(|(c, d)| c + d)
                    .collect();
                feature.points_mut()[i].set_position(Point::from_slice(&coordinates)?);
            }

            let state = self.adjust(feature, start_time)?;
            if !state.is_success() {
                return Ok((state, samples, residuals));
            }

            let columns = self.cofactor_matrix.as_ref().map_or(0, |q| q.nrows());
            let mut sample = DVector::zeros(columns);
            for (_, parameter) in feature.store().iter() {
                if let Some(column) = parameter.column.filter(|c| *c < columns) {
                    sample[column] = parameter.value;
                }
            }
            samples.push(sample);

            let weight = simplex.mean_weight(step);
            for (mean, &i) in residuals.iter_mut().zip(enabled) {
                *mean += feature.points()[i].residuals() * weight;
            }
        }
        Ok((EstimationStateType::ErrorFreeEstimation, samples, residuals))
    }

    /// Reset points, derive center of mass and initial guess, reduce the primitives.
    fn prepare(&mut self, feature: &mut Feature) -> AdjustmentResult<Layout> {
        for point in feature.points_mut() {
            point.reset();
        }
        let enabled: Vec<usize> = feature
            .points()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_enabled())
            .map(|(i, _)| i)
            .collect();
        if enabled.is_empty() {
            return Err(AdjustmentError::EmptyFeature(format!(
                "{} feature with {} points",
                feature.feature_type(),
                feature.points().len()
            ))
            .log());
        }

        if feature.is_estimate_center_of_mass() {
            feature.update_center_of_mass()?;
        }
        if feature.is_estimate_initial_guess() {
            feature.derive_initial_guess(self.backend.as_ref())?;
        }
        feature.store_mut().apply_initial_guess();
        feature.evaluate_post_processing();

        let center = if feature.has_frame_dependent_restriction() {
            debug!("Restrictions on frame dependent parameters, center of mass reduction disabled");
            feature.origin()
        } else {
            feature.center_of_mass().clone()
        };

        let number_of_unknowns = feature.store_mut().assign_columns();
        let restrictions = feature.restrictions();
        let geometries_per_point = feature.geometries_per_point();

        let dispersion_diagonal: Vec<f64> = enabled
            .iter()
            .flat_map(|&i| {
                let d = feature.points()[i].dispersion();
                (0..d.nrows()).map(move |k| d[(k, k)]).collect::<Vec<_>>()
            })
            .collect();
        let variance0 = if dispersion_diagonal.is_empty() {
            1.0
        } else {
            dispersion_diagonal.iter().sum::<f64>() / dispersion_diagonal.len() as f64
        };

        let number_of_equations = enabled.len() * geometries_per_point;
        let redundancy =
            number_of_equations as f64 - number_of_unknowns as f64 + restrictions.len() as f64;
        self.variance_component =
            VarianceComponent::new(variance0, redundancy, self.config.apply_aposteriori_variance);
        self.test_statistic = Some(create_test_statistic(
            &self.config.test_statistic,
            enabled.len(),
            redundancy.max(0.0) as usize,
            geometries_per_point,
        )?);
        self.robust_weights = vec![1.0; enabled.len()];
        self.point_omegas = vec![0.0; enabled.len()];
        self.number_of_points = enabled.len();
        self.number_of_unknowns = number_of_unknowns;
        self.number_of_restrictions = restrictions.len();

        debug!(
            "{} feature: {} points, {} unknowns, {} restrictions, redundancy {}, σ0² = {:.6e}",
            feature.feature_type(),
            enabled.len(),
            number_of_unknowns,
            restrictions.len(),
            redundancy,
            self.variance_component.variance0
        );

        feature.translate_primitives(center.negated().as_slice(), None)?;
        self.frame_reduced = true;

        Ok(Layout {
            center,
            enabled,
            restrictions,
            number_of_unknowns,
            geometries_per_point,
            variance0: self.variance_component.variance0,
        })
    }

    /// Translate the primitives back if the final pass did not already do so.
    fn restore_frame(&mut self, feature: &mut Feature, layout: &Layout) {
        if !self.frame_reduced {
            return;
        }
        self.frame_reduced = false;
        if let Err(e) = feature.translate_primitives(layout.center.as_slice(), None) {
            warn!("Cannot restore the original frame of the feature: {}", e);
        }
    }

    fn iterate(
        &mut self,
        feature: &mut Feature,
        layout: &Layout,
        start_time: Instant,
    ) -> AdjustmentResult<EstimationStateType> {
        let maximum_iterations = self.config.maximum_iterations;
        let mut runs = maximum_iterations as isize - 1;
        let mut lambda = self.config.damping;
        let mut is_estimated = false;
        let mut estimate_complete_model = false;
        let mut first = true;
        let mut last_valid_max_abs_dx = 0.0;

        let direct = maximum_iterations == 0;
        if direct {
            is_estimated = true;
            first = false;
            lambda = 0.0;
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            IterationStats::print_header();
        }

        let state = loop {
            let iteration_start = Instant::now();
            self.iterations += 1;
            self.max_abs_dx = 0.0;
            self.max_abs_restriction = 0.0;

            if self.cancellation.is_cancelled() {
                break EstimationStateType::Interrupt;
            }
            self.set_state(EstimationStateType::Iterate);

            if !first {
                estimate_complete_model = is_estimated;
            }

            let cofactor_scales: Vec<f64> = self
                .robust_weights
                .iter()
                .map(|w| 1.0 / (layout.variance0 * w))
                .collect();
            let points: Vec<&FeaturePoint> =
                layout.enabled.iter().map(|&i| &feature.points()[i]).collect();
            let equations = match normal_equation::linearize_points(
                feature.primitives(),
                feature.store(),
                &points,
                &layout.center,
                layout.number_of_unknowns,
                &cofactor_scales,
                self.backend.as_ref(),
                &self.cancellation,
            ) {
                Ok(Some(equations)) => equations,
                Ok(None) => break EstimationStateType::Interrupt,
                Err(AdjustmentError::LinAlg(e)) => {
                    debug!("Linearization failed: {}", e);
                    break EstimationStateType::SingularMatrix;
                }
                Err(e) => return Err(e),
            };

            let mut system = match NormalEquationSystem::try_new(
                layout.number_of_unknowns,
                layout.restrictions.len(),
            ) {
                Ok(system) => system,
                Err(e) => {
                    warn!("Cannot allocate the normal equations: {}", e);
                    break EstimationStateType::OutOfMemory;
                }
            };
            for point_equations in &equations {
                system.add_point(point_equations);
            }
            system.add_restrictions(&layout.restrictions, feature.store(), &layout.center);
            self.max_abs_restriction = system.max_abs_restriction();
            system.apply_damping(lambda);
            if self.config.preconditioning {
                system.precondition();
            }

            if estimate_complete_model {
                self.set_state(EstimationStateType::InvertNormalEquationMatrix);
            }
            if let Err(e) = system.solve(self.backend.as_ref(), estimate_complete_model) {
                debug!("Solving the normal equations failed: {}", e);
                break EstimationStateType::SingularMatrix;
            }
            let mut dx = system.parameter_update();
            let qxx = estimate_complete_model.then(|| system.parameter_cofactors());

            if estimate_complete_model {
                self.set_state(EstimationStateType::EstimateStochasticParameters);
            }
            let damping = lambda;
            let accepted = match self.update_model(
                feature,
                layout,
                &equations,
                &mut dx,
                qxx,
                &mut lambda,
                &mut last_valid_max_abs_dx,
            ) {
                Ok(accepted) => accepted,
                Err(AdjustmentError::LinAlg(e)) => {
                    debug!("Stochastic model failed: {}", e);
                    break EstimationStateType::SingularMatrix;
                }
                Err(e) => return Err(e),
            };

            let stats = IterationStats {
                iteration: self.iterations,
                omega: self.variance_component.omega,
                max_abs_dx: self.max_abs_dx,
                max_abs_restriction: self.max_abs_restriction,
                damping,
                iter_time_ms: iteration_start.elapsed().as_secs_f64() * 1000.0,
                total_time_ms: start_time.elapsed().as_secs_f64() * 1000.0,
                accepted,
            };
            if tracing::enabled!(tracing::Level::DEBUG) {
                stats.print_line();
            }
            self.iteration_history.push(stats);

            if !self.max_abs_dx.is_finite() {
                break EstimationStateType::NoConvergence;
            }
            if direct {
                break EstimationStateType::ErrorFreeEstimation;
            }

            let mut failure = None;
            let converged = !first
                && self.max_abs_dx <= SQRT_EPS
                && self.max_abs_restriction <= SQRT_EPS
                && runs > 0
                && lambda == 0.0
                && (self.config.estimation_type != EstimationType::L1Norm
                    || estimate_complete_model
                    || self.update_robust_weights(layout));
            if converged {
                is_estimated = true;
                self.set_state(EstimationStateType::Convergence);
            } else {
                let exhausted = runs <= 1;
                runs -= 1;
                if exhausted {
                    if estimate_complete_model {
                        failure = Some(match self.config.estimation_type {
                            EstimationType::L1Norm => EstimationStateType::RobustEstimationFailed,
                            EstimationType::L2Norm
                            | EstimationType::SphericalSimplexUnscentedTransformation => {
                                EstimationStateType::NoConvergence
                            }
                        });
                    } else {
                        is_estimated = true;
                    }
                } else {
                    self.set_state(EstimationStateType::Convergence);
                }
            }

            if let Some(failure) = failure {
                break failure;
            }
            if estimate_complete_model {
                break EstimationStateType::ErrorFreeEstimation;
            }

            first = false;
            if is_estimated
                || lambda <= SQRT_EPS
                || (runs as f64) < 0.1 * maximum_iterations as f64 + 1.0
            {
                lambda = 0.0;
            }
        };

        Ok(state)
    }

    /// Apply the step `dx`; returns `false` when a damped step was rejected.
    ///
    /// With `qxx` present this is the final pass: the frame is restored and the stochastic
    /// model is derived.
    #[allow(clippy::too_many_arguments)]
    fn update_model(
        &mut self,
        feature: &mut Feature,
        layout: &Layout,
        equations: &[PointEquations],
        dx: &mut DVector<f64>,
        qxx: Option<DMatrix<f64>>,
        lambda: &mut f64,
        last_valid_max_abs_dx: &mut f64,
    ) -> AdjustmentResult<bool> {
        if *lambda > 0.0 {
            let alpha = (0.25 * lambda.powf(-0.05)).min(0.75);
            *dx *= alpha;

            let previous = if self.variance_component.omega > 0.0 {
                self.variance_component.omega
            } else {
                f64::MAX
            };
            let current: f64 = equations.iter().map(|e| e.omega(dx)).sum();
            self.variance_component.omega = current;

            if current <= previous {
                *lambda *= 0.2;
            } else {
                *lambda *= 5.0;
                let limit = 1.0 / SQRT_EPS;
                if *lambda > limit {
                    *lambda = limit;
                    self.variance_component.omega = 0.0;
                }
                self.max_abs_dx = *last_valid_max_abs_dx;
                return Ok(false);
            }
        }

        let updates = self.update_residuals(layout, equations, dx, qxx.as_ref())?;
        let mut omega = 0.0;
        for (k, update) in updates.into_iter().enumerate() {
            omega += update.omega;
            self.point_omegas[k] = update.omega;
            let point = &mut feature.points_mut()[layout.enabled[k]];
            point.set_residuals(update.residuals);
            if let Some(stochastics) = update.stochastics {
                point.set_redundancy(stochastics.redundancy);
                point.set_cofactors(stochastics.cofactors);
                point.set_gross_errors(stochastics.gross_errors);
                point.set_minimal_detectable_bias(stochastics.minimal_detectable_bias);
                point
                    .test_statistic_mut()
                    .set_numerator(stochastics.numerator, layout.geometries_per_point);
            }
        }
        self.variance_component.omega = omega;

        let store = feature.store_mut();
        let mut max_abs_dx = 0.0_f64;
        let ids = store.ids();
        for id in ids {
            if let Some(column) = store.column(id) {
                let value = store.value(id) + dx[column];
                store.set_value(id, value);
                max_abs_dx = max_abs_dx.max(dx[column].abs());
            }
        }
        self.max_abs_dx = max_abs_dx;
        *last_valid_max_abs_dx = max_abs_dx;

        if let Some(mut qxx) = qxx {
            feature.translate_primitives(layout.center.as_slice(), Some(&mut qxx))?;
            self.frame_reduced = false;
            self.post_processing(feature, &mut qxx);
            self.evaluate_variance_component()?;
            self.update_uncertainties(feature, &qxx);
            self.evaluate_point_tests(feature, layout)?;
            self.cofactor_matrix = Some(qxx);
        }
        Ok(true)
    }

    /// New residuals `v = −Qll·Jvᵀ·W·ve` and `veᵀ·W·ve` per point.
    fn update_residuals(
        &self,
        layout: &Layout,
        equations: &[PointEquations],
        dx: &DVector<f64>,
        qxx: Option<&DMatrix<f64>>,
    ) -> AdjustmentResult<Vec<PointUpdate>> {
        let noncentrality = match (&self.test_statistic, qxx) {
            (Some(registry), Some(_)) => {
                registry
                    .parameter_set(layout.geometries_per_point as f64, f64::INFINITY)?
                    .noncentrality_parameter
            }
            _ => 0.0,
        };

        equations
            .iter()
            .map(|e| -> AdjustmentResult<PointUpdate> {
                let ve = e.misclosure_residuals(dx);
                let wve = &e.weight * &ve;
                let omega = ve.dot(&wve);
                let residuals = -(&e.qll * (e.jv.transpose() * &wve));
                let stochastics = match qxx {
                    Some(qxx) => Some(self.point_stochastics(
                        e,
                        &residuals,
                        qxx,
                        layout,
                        noncentrality,
                    )?),
                    None => None,
                };
                Ok(PointUpdate {
                    residuals,
                    omega,
                    stochastics,
                })
            })
            .collect()
    }

    /// Redundancy numbers, cofactors, gross errors and the test numerator of one point.
    fn point_stochastics(
        &self,
        e: &PointEquations,
        residuals: &DVector<f64>,
        qxx: &DMatrix<f64>,
        layout: &Layout,
        noncentrality: f64,
    ) -> AdjustmentResult<PointStochastics> {
        let dim = e.jv.ncols();
        let wjx = &e.weight * &e.jx;
        let qkk = &e.weight - &wjx * qxx * wjx.transpose();
        let jv_qll = &e.jv * &e.qll;
        let qvv = jv_qll.transpose() * qkk * &jv_qll;

        let mut p = e.qll.clone();
        self.backend.invert_symmetric(&mut p)?;
        let r = &p * &qvv;

        let redundancy = DVector::from_iterator(dim, (0..dim).map(|i| r[(i, i)].max(0.0)));
        let cofactors = DVector::from_iterator(dim, (0..dim).map(|i| e.qll[(i, i)] - qvv[(i, i)]));
        let minimal_detectable_bias = DVector::from_iterator(
            dim,
            (0..dim).map(|i| {
                if redundancy[i] > SQRT_EPS {
                    (e.qll[(i, i)] * layout.variance0 * noncentrality / redundancy[i])
                        .abs()
                        .sqrt()
                } else {
                    f64::INFINITY
                }
            }),
        );

        let total_redundancy: f64 = redundancy.iter().sum();
        let (gross_errors, numerator) = if total_redundancy > SQRT_EPS {
            let pv = &p * residuals;
            let pqvvp = &p * &qvv * &p;
            let inverse = self
                .backend
                .pseudo_inverse_with_rank(&pqvvp, layout.geometries_per_point as isize)?;
            let nabla = -(inverse * &pv);
            let numerator = -pv.dot(&nabla);
            (nabla, numerator)
        } else {
            (DVector::zeros(dim), 0.0)
        };

        Ok(PointStochastics {
            redundancy,
            cofactors,
            gross_errors,
            minimal_detectable_bias,
            numerator,
        })
    }

    /// Append one covariance column per post-processing calculation.
    fn post_processing(&self, feature: &mut Feature, qxx: &mut DMatrix<f64>) {
        let origin = feature.origin();
        let calculations = feature.post_processing().to_vec();
        for calculation in calculations {
            let Some(regressand) = calculation.regressand() else {
                continue;
            };
            let n = qxx.nrows();
            let mut jacobian = DMatrix::<f64>::zeros(n + 1, n);
            for i in 0..n {
                jacobian[(i, i)] = 1.0;
            }
            let store = feature.store();
            for (id, derivative) in calculation.partial_derivatives(store, &origin) {
                if id == regressand {
                    continue;
                }
                if let Some(column) = store.column(id) {
                    jacobian[(n, column)] += derivative;
                }
            }
            *qxx = &jacobian * &*qxx * jacobian.transpose();

            let value = calculation.evaluate(store, &origin);
            let store = feature.store_mut();
            store.set_value(regressand, value);
            store.get_mut(regressand).column = Some(n);
        }
    }

    fn evaluate_variance_component(&mut self) -> AdjustmentResult<()> {
        let redundancy = self.variance_component.redundancy;
        if redundancy <= 0.0 {
            return Ok(());
        }
        if let Some(registry) = &self.test_statistic {
            let quantile = registry
                .global_parameter_set(redundancy, f64::INFINITY)?
                .quantile;
            self.variance_component.evaluate_global_test(quantile);
        }
        Ok(())
    }

    fn update_uncertainties(&self, feature: &mut Feature, qxx: &DMatrix<f64>) {
        let variance = self.variance_component.variance_of_unit_weight();
        let store = feature.store_mut();
        for id in store.ids() {
            let parameter = store.get_mut(id);
            parameter.uncertainty = match parameter.column {
                Some(column) if column < qxx.nrows() => {
                    (variance * qxx[(column, column)]).abs().sqrt()
                }
                _ => 0.0,
            };
            if parameter.processing_type == ProcessingType::Fixed {
                parameter.uncertainty = 0.0;
            }
        }
    }

    fn evaluate_point_tests(&mut self, feature: &mut Feature, layout: &Layout) -> AdjustmentResult<()> {
        let Some(registry) = &self.test_statistic else {
            return Ok(());
        };
        let nog = layout.geometries_per_point as f64;
        let redundancy = self.variance_component.redundancy;
        let quantile_apriori = registry.parameter_set(nog, f64::INFINITY)?.quantile;
        let remaining = redundancy - nog;
        let quantile_aposteriori = registry
            .parameter_set(nog, if remaining > 0.0 { remaining } else { f64::INFINITY })?
            .quantile;

        let component = self.variance_component;
        let mut significant = 0;
        for &i in &layout.enabled {
            let statistic = feature.points_mut()[i].test_statistic_mut();
            statistic.evaluate(
                component.variance0,
                component.omega,
                component.redundancy,
                component.apply_aposteriori,
                quantile_apriori,
                quantile_aposteriori,
            );
            if statistic.is_significant() {
                significant += 1;
            }
        }
        self.significant_points = significant;
        Ok(())
    }

    /// Recompute the robust weights from the last residuals; `true` once they are stable.
    fn update_robust_weights(&mut self, layout: &Layout) -> bool {
        let limit = self.config.robust_estimation_limit;
        let nog = layout.geometries_per_point as f64;
        let mut max_change = 0.0_f64;
        for (weight, omega) in self.robust_weights.iter_mut().zip(&self.point_omegas) {
            let normalized = (omega / (*weight * layout.variance0 * nog)).abs().sqrt();
            let updated = if normalized > limit {
                (limit / normalized).max(SQRT_EPS)
            } else {
                1.0
            };
            max_change = max_change.max((updated - *weight).abs());
            *weight = updated;
        }
        debug!("Robust reweighting, max weight change {:.3e}", max_change);
        max_change <= ROBUST_WEIGHT_TOLERANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjustment::UnscentedTransformation;
    use crate::core::ParameterType;
    use crate::linalg::LinearAlgebraType;
    use approx::assert_abs_diff_eq;
    use std::sync::{Arc, Mutex};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn circle_points(cx: f64, cy: f64, r: f64, n: usize) -> Vec<FeaturePoint> {
        (0..n)
            .map(|i| {
                let t = i as f64 * 2.0 * std::f64::consts::PI / n as f64;
                // small deterministic perturbation keeps the redundancy meaningful
                let e = 0.01 * if i % 2 == 0 { 1.0 } else { -1.0 };
                FeaturePoint::new(
                    format!("P{i}"),
                    Point::new_2d(cx + (r + e) * t.cos(), cy + (r + e) * t.sin()),
                )
            })
            .collect()
    }

    #[test]
    fn test_circle_adjustment() -> TestResult {
        let mut feature = Feature::circle()?;
        feature.add_points(circle_points(10.0, -2.0, 3.0, 12))?;

        let mut adjustment = FeatureAdjustment::new(AdjustmentConfig::new());
        let state = adjustment.estimate(&mut feature)?;
        assert_eq!(state, EstimationStateType::ErrorFreeEstimation);

        let x0 = feature.value(ParameterType::OriginCoordinateX).unwrap_or(f64::NAN);
        let y0 = feature.value(ParameterType::OriginCoordinateY).unwrap_or(f64::NAN);
        let r = feature.value(ParameterType::Radius).unwrap_or(f64::NAN);
        assert_abs_diff_eq!(x0, 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y0, -2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(r, 3.0, epsilon = 1e-6);

        let q = adjustment.cofactor_matrix().ok_or("no cofactor matrix")?;
        assert_eq!(q.shape(), (3, 3));
        assert_abs_diff_eq!(adjustment.variance_component().redundancy, 9.0);
        assert!(adjustment.variance_component().omega > 0.0);
        for point in feature.points() {
            assert!(point.total_redundancy() > 0.0);
            assert!(point.total_redundancy() < 1.0);
        }
        let total: f64 = feature.points().iter().map(|p| p.total_redundancy()).sum();
        assert_abs_diff_eq!(total, 9.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_restricted_center_holds_in_original_frame() -> TestResult {
        let mut feature = Feature::circle()?;
        feature.add_points(circle_points(100.0, 200.0, 5.0, 12))?;
        let x0 = feature.parameter(ParameterType::OriginCoordinateX).ok_or("x0")?;
        let abscissa = feature.store_mut().add(
            crate::core::UnknownParameter::new(ParameterType::Constant, 100.3)
                .with_processing_type(ProcessingType::Fixed),
        );
        let restriction =
            crate::restriction::AverageRestriction::new(feature.store(), vec![x0], abscissa)?;
        feature.add_restriction(Box::new(restriction))?;

        let mut adjustment = FeatureAdjustment::new(AdjustmentConfig::new());
        let state = adjustment.estimate(&mut feature)?;
        assert_eq!(state, EstimationStateType::ErrorFreeEstimation);
        assert_abs_diff_eq!(feature.store().value(x0), 100.3, epsilon = 1e-8);
        assert_abs_diff_eq!(
            feature.value(ParameterType::OriginCoordinateY).unwrap_or(f64::NAN),
            200.0,
            epsilon = 1e-3
        );
        assert_abs_diff_eq!(feature.store().get(x0).uncertainty, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(adjustment.variance_component().redundancy, 10.0);
        // the center of mass itself is still derived from the points
        assert_abs_diff_eq!(feature.center_of_mass().x(), 100.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_unscented_transformation_matches_linearized_covariance() -> TestResult {
        let mut linearized = Feature::circle()?;
        for point in circle_points(10.0, -2.0, 3.0, 12) {
            linearized.add_point(point.with_uncertainties(&[0.002, 0.001])?)?;
        }
        let mut unscented = linearized.clone();

        let mut l2 = FeatureAdjustment::new(AdjustmentConfig::new());
        assert_eq!(l2.estimate(&mut linearized)?, EstimationStateType::ErrorFreeEstimation);

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        let mut sut = FeatureAdjustment::new(
            AdjustmentConfig::new()
                .with_estimation_type(EstimationType::SphericalSimplexUnscentedTransformation),
        );
        sut.add_observer(move |event: &AdjustmentEvent| {
            if let Ok(mut guard) = sink.lock() {
                guard.push(event.state);
            }
        });
        assert_eq!(sut.estimate(&mut unscented)?, EstimationStateType::ErrorFreeEstimation);
        let states = states.lock().map_err(|e| e.to_string())?;
        let steps = states
            .iter()
            .filter(|s| **s == EstimationStateType::UnscentedTransformationStep)
            .count();
        // 12 points with two coordinates each
        assert_eq!(steps, 26);

        let q_l2 = l2.cofactor_matrix().ok_or("no L2 cofactor matrix")?;
        let q_sut = sut.cofactor_matrix().ok_or("no unscented cofactor matrix")?;
        assert_eq!(q_sut.shape(), q_l2.shape());
        for i in 0..q_l2.nrows() {
            assert_abs_diff_eq!(q_sut[(i, i)] / q_l2[(i, i)], 1.0, epsilon = 1e-2);
        }
        for parameter_type in [
            ParameterType::OriginCoordinateX,
            ParameterType::OriginCoordinateY,
            ParameterType::Radius,
        ] {
            assert_abs_diff_eq!(
                unscented.value(parameter_type).unwrap_or(f64::NAN),
                linearized.value(parameter_type).unwrap_or(f64::NAN),
                epsilon = 1e-6
            );
        }
        assert_abs_diff_eq!(sut.variance_component().redundancy, 9.0);
        for (a, b) in unscented.points().iter().zip(linearized.points()) {
            // observations are back where they were
            assert_eq!(a.position(), b.position());
            assert_abs_diff_eq!((a.residuals() - b.residuals()).amax(), 0.0, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_unscented_transformation_rejects_invalid_scaling() -> TestResult {
        let mut feature = Feature::circle()?;
        feature.add_points(circle_points(0.0, 0.0, 2.0, 6))?;
        let mut adjustment = FeatureAdjustment::new(
            AdjustmentConfig::new()
                .with_estimation_type(EstimationType::SphericalSimplexUnscentedTransformation)
                .with_unscented_transformation(UnscentedTransformation::new(0.0, 2.0, 0.0)),
        );
        assert!(matches!(
            adjustment.estimate(&mut feature),
            Err(AdjustmentError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_backends_agree() -> TestResult {
        let mut values = Vec::new();
        for backend in [LinearAlgebraType::Faer, LinearAlgebraType::Nalgebra] {
            let mut feature = Feature::circle()?;
            feature.add_points(circle_points(1.0, 2.0, 5.0, 8))?;
            let mut adjustment =
                FeatureAdjustment::new(AdjustmentConfig::new().with_linear_algebra_type(backend));
            assert!(adjustment.estimate(&mut feature)?.is_success());
            values.push(feature.value(ParameterType::Radius).unwrap_or(f64::NAN));
        }
        assert_abs_diff_eq!(values[0], values[1], epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_damped_adjustment_converges_to_same_solution() -> TestResult {
        let mut plain = Feature::circle()?;
        plain.add_points(circle_points(0.0, 0.0, 2.0, 10))?;
        let mut damped = plain.clone();

        FeatureAdjustment::new(AdjustmentConfig::new()).estimate(&mut plain)?;
        let state = FeatureAdjustment::new(AdjustmentConfig::new().with_damping(1e-3))
            .estimate(&mut damped)?;
        assert!(state.is_success());
        assert_abs_diff_eq!(
            plain.value(ParameterType::Radius).unwrap_or(f64::NAN),
            damped.value(ParameterType::Radius).unwrap_or(f64::NAN),
            epsilon = 1e-7
        );
        Ok(())
    }

    #[test]
    fn test_single_pass_without_iterations() -> TestResult {
        let mut feature = Feature::circle()?;
        feature.add_points(circle_points(0.0, 0.0, 2.0, 6))?;
        let mut adjustment =
            FeatureAdjustment::new(AdjustmentConfig::new().with_maximum_iterations(0));
        let state = adjustment.estimate(&mut feature)?;
        assert_eq!(state, EstimationStateType::ErrorFreeEstimation);
        assert_eq!(adjustment.iterations(), 1);
        assert!(adjustment.cofactor_matrix().is_some());
        Ok(())
    }

    #[test]
    fn test_empty_feature_is_an_error() -> TestResult {
        let mut feature = Feature::circle()?;
        let mut adjustment = FeatureAdjustment::default();
        assert!(matches!(
            adjustment.estimate(&mut feature),
            Err(AdjustmentError::EmptyFeature(_))
        ));
        Ok(())
    }

    #[test]
    fn test_cancelled_adjustment_is_interrupted() -> TestResult {
        let mut feature = Feature::circle()?;
        feature.add_points(circle_points(0.0, 0.0, 2.0, 6))?;
        let token = CancellationToken::new();
        token.cancel();
        let mut adjustment = FeatureAdjustment::default().with_cancellation_token(token);
        assert_eq!(adjustment.estimate(&mut feature)?, EstimationStateType::Interrupt);
        Ok(())
    }

    #[test]
    fn test_observer_sees_state_sequence() -> TestResult {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        let mut adjustment = FeatureAdjustment::default();
        adjustment.add_observer(move |event: &AdjustmentEvent| {
            if let Ok(mut guard) = sink.lock() {
                guard.push(event.state);
            }
        });

        let mut feature = Feature::circle()?;
        feature.add_points(circle_points(0.0, 0.0, 2.0, 6))?;
        adjustment.estimate(&mut feature)?;

        let states = states.lock().map_err(|e| e.to_string())?;
        assert_eq!(states.first(), Some(&EstimationStateType::Busy));
        assert!(states.contains(&EstimationStateType::Iterate));
        assert!(states.contains(&EstimationStateType::InvertNormalEquationMatrix));
        assert_eq!(states.last(), Some(&EstimationStateType::ErrorFreeEstimation));
        Ok(())
    }

    #[test]
    fn test_correlation_has_unit_diagonal() -> TestResult {
        let mut feature = Feature::circle()?;
        feature.add_points(circle_points(0.0, 0.0, 2.0, 9))?;
        let mut adjustment = FeatureAdjustment::default();
        adjustment.estimate(&mut feature)?;
        let correlation = adjustment.correlation().ok_or("no correlation")?;
        for i in 0..correlation.nrows() {
            assert_abs_diff_eq!(correlation[(i, i)], 1.0, epsilon = 1e-12);
        }
        let summary = adjustment.summary().to_string();
        assert!(summary.contains("ERROR_FREE_ESTIMATION"));
        Ok(())
    }
}
