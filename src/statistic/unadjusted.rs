use crate::statistic::{
    StatisticResult, TestStatistic, TestStatisticParameterSet, TestStatisticType, distribution,
    validate_probability,
};

/// No multiple-test adjustment: each test uses α and β directly.
#[derive(Debug, Clone)]
pub struct UnadjustedTestStatistic {
    alpha: f64,
    beta: f64,
}

impl Default for UnadjustedTestStatistic {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            beta: 80.0,
        }
    }
}

impl UnadjustedTestStatistic {
    /// Out-of-range probabilities fall back to the defaults (0.1 %, 80 %).
    pub fn new(alpha: f64, beta: f64) -> Self {
        let default = Self::default();
        let in_range = |p: f64| p > 0.0 && p < 100.0;
        Self {
            alpha: if in_range(alpha) { alpha } else { default.alpha },
            beta: if in_range(beta) { beta } else { default.beta },
        }
    }

    pub fn try_new(alpha: f64, beta: f64) -> StatisticResult<Self> {
        Ok(Self {
            alpha: validate_probability(alpha, "probability value α")?,
            beta: validate_probability(beta, "power of test β")?,
        })
    }
}

impl TestStatistic for UnadjustedTestStatistic {
    fn statistic_type(&self) -> TestStatisticType {
        TestStatisticType::None
    }

    fn probability_value(&self) -> f64 {
        self.alpha
    }

    fn power_of_test(&self) -> f64 {
        self.beta
    }

    fn adjust(&self, sets: &mut [TestStatisticParameterSet]) {
        for set in sets.iter_mut() {
            let n2 = set.numerator_dof();
            let m2 = set.denominator_dof();
            set.probability_value = self.alpha;
            set.power_of_test = self.beta;

            if m2.is_infinite() {
                let quantile = distribution::quantile(n2, self.alpha);
                set.noncentrality_parameter =
                    distribution::noncentrality_parameter(n2, self.alpha, self.beta);
                set.log_probability_value = distribution::log_probability_value(quantile, n2);
                set.quantile = quantile;
            } else {
                let quantile = distribution::quantile_f(n2, m2, self.alpha);
                set.noncentrality_parameter =
                    distribution::noncentrality_parameter_f(n2, m2, self.alpha, self.beta);
                set.log_probability_value =
                    distribution::log_probability_value_f(quantile, n2, m2);
                set.quantile = quantile;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_quantiles_follow_configured_alpha() {
        let statistic = UnadjustedTestStatistic::new(5.0, 80.0);
        let set = statistic.adjust_single(TestStatisticParameterSet::new(1.0, f64::INFINITY));
        assert_abs_diff_eq!(set.quantile, 3.841458820694124, epsilon = 1e-6);
        assert_abs_diff_eq!(set.log_probability_value, 0.05_f64.ln(), epsilon = 1e-6);
        assert_eq!(set.probability_value, 5.0);
    }

    #[test]
    fn test_out_of_range_falls_back_to_defaults() {
        let statistic = UnadjustedTestStatistic::new(-1.0, 120.0);
        assert_eq!(statistic.probability_value(), 0.1);
        assert_eq!(statistic.power_of_test(), 80.0);
        assert!(UnadjustedTestStatistic::try_new(-1.0, 80.0).is_err());
    }
}
