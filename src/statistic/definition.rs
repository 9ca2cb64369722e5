use std::sync::Arc;

use crate::statistic::{
    BaardaMethodTestStatistic, SidakTestStatistic, StatisticResult, TestStatistic,
    TestStatisticParameters, TestStatisticType, UnadjustedTestStatistic,
};

/// User-facing choice of the test strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestStatisticDefinition {
    pub statistic_type: TestStatisticType,
    /// Probability value α in percent
    pub probability_value: f64,
    /// Power of test β in percent
    pub power_of_test: f64,
    /// Interpret α as a family-wise error rate
    pub familywise_error_rate: bool,
}

impl Default for TestStatisticDefinition {
    fn default() -> Self {
        Self {
            statistic_type: TestStatisticType::BaardaMethod,
            probability_value: 0.1,
            power_of_test: 80.0,
            familywise_error_rate: false,
        }
    }
}

impl TestStatisticDefinition {
    /// Probabilities outside (0, 100) fall back to the defaults.
    pub fn new(
        statistic_type: TestStatisticType,
        probability_value: f64,
        power_of_test: f64,
        familywise_error_rate: bool,
    ) -> Self {
        let default = Self::default();
        let in_range = |p: f64| p > 0.0 && p < 100.0;
        Self {
            statistic_type,
            probability_value: if in_range(probability_value) {
                probability_value
            } else {
                default.probability_value
            },
            power_of_test: if in_range(power_of_test) {
                power_of_test
            } else {
                default.power_of_test
            },
            familywise_error_rate,
        }
    }
}

/// Build the registry used by one adjustment.
///
/// `number_of_points` and `redundancy` size the Šidák correction (one hypothesis per point
/// plus the global test when `redundancy > 0`); Baarda's reference dof is the redundancy for
/// family-wise testing and `max_equations_per_point` otherwise.
pub fn create_test_statistic(
    definition: &TestStatisticDefinition,
    number_of_points: usize,
    redundancy: usize,
    max_equations_per_point: usize,
) -> StatisticResult<TestStatisticParameters> {
    let alpha = definition.probability_value;
    let beta = definition.power_of_test;

    let test_statistic: Arc<dyn TestStatistic> = match definition.statistic_type {
        TestStatisticType::Sidak => {
            let hypotheses = number_of_points + usize::from(redundancy > 0);
            Arc::new(SidakTestStatistic::new(
                hypotheses,
                alpha,
                beta,
                definition.familywise_error_rate,
            )?)
        }
        TestStatisticType::BaardaMethod => {
            let reference = if definition.familywise_error_rate {
                redundancy
            } else {
                max_equations_per_point
            };
            Arc::new(BaardaMethodTestStatistic::new(reference as f64, alpha, beta)?)
        }
        TestStatisticType::None => Arc::new(UnadjustedTestStatistic::try_new(alpha, beta)?),
    };
    Ok(TestStatisticParameters::new(test_statistic))
}
