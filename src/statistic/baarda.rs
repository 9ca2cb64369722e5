use crate::statistic::{
    StatisticResult, TestStatistic, TestStatisticParameterSet, TestStatisticType,
    clamp_probability, distribution, validate_probability,
};

/// Baarda's B-method: every test shares the noncentrality parameter of a reference test.
///
/// The reference test (n1, m1) uses α as configured; for any other dof pair the quantile is
/// chosen so that the test reaches the power β against the shared noncentrality parameter,
/// and the implied α is reported.
#[derive(Debug, Clone)]
pub struct BaardaMethodTestStatistic {
    n1: f64,
    m1: f64,
    alpha: f64,
    beta: f64,
    noncentrality_parameter: f64,
}

impl Default for BaardaMethodTestStatistic {
    fn default() -> Self {
        let (alpha, beta) = (0.1, 80.0);
        Self {
            n1: 1.0,
            m1: f64::INFINITY,
            alpha,
            beta,
            noncentrality_parameter: distribution::noncentrality_parameter(1.0, alpha, beta),
        }
    }
}

impl BaardaMethodTestStatistic {
    /// Reference test with `n1` numerator dof and infinite denominator dof.
    pub fn new(n1: f64, alpha: f64, beta: f64) -> StatisticResult<Self> {
        Self::with_denominator(n1, f64::INFINITY, alpha, beta)
    }

    pub fn with_denominator(n1: f64, m1: f64, alpha: f64, beta: f64) -> StatisticResult<Self> {
        let alpha = validate_probability(alpha, "probability value α")?;
        let beta = validate_probability(beta, "power of test β")?;
        let noncentrality_parameter = if m1.is_infinite() {
            distribution::noncentrality_parameter(n1, alpha, beta)
        } else {
            distribution::noncentrality_parameter_f(n1, m1, alpha, beta)
        };
        Ok(Self {
            n1,
            m1,
            alpha,
            beta,
            noncentrality_parameter,
        })
    }

    pub fn noncentrality_parameter(&self) -> f64 {
        self.noncentrality_parameter
    }

    pub fn reference_dof(&self) -> (f64, f64) {
        (self.n1, self.m1)
    }
}

impl TestStatistic for BaardaMethodTestStatistic {
    fn statistic_type(&self) -> TestStatisticType {
        TestStatisticType::BaardaMethod
    }

    fn probability_value(&self) -> f64 {
        self.alpha
    }

    fn power_of_test(&self) -> f64 {
        self.beta
    }

    fn adjust(&self, sets: &mut [TestStatisticParameterSet]) {
        let ncp = self.noncentrality_parameter;
        for set in sets.iter_mut() {
            let n2 = set.numerator_dof();
            let m2 = set.denominator_dof();
            set.noncentrality_parameter = ncp;
            set.power_of_test = self.beta;

            let (quantile, log_p, alpha) = if m2.is_infinite() {
                let reference = self.n1 == n2 && self.m1.is_infinite();
                let quantile = if reference {
                    distribution::quantile(n2, self.alpha)
                } else {
                    distribution::quantile_via_ncp(n2, ncp, self.beta)
                };
                let alpha = if reference {
                    self.alpha
                } else {
                    distribution::probability_value(quantile, n2)
                };
                (
                    quantile,
                    distribution::log_probability_value(quantile, n2),
                    alpha,
                )
            } else {
                let reference = self.n1 == n2 && self.m1 == m2;
                let quantile = if reference {
                    distribution::quantile_f(n2, m2, self.alpha)
                } else {
                    distribution::quantile_via_ncp_f(n2, m2, ncp, self.beta)
                };
                let alpha = if reference {
                    self.alpha
                } else {
                    distribution::probability_value_f(quantile, n2, m2)
                };
                (
                    quantile,
                    distribution::log_probability_value_f(quantile, n2, m2),
                    alpha,
                )
            };

            set.quantile = quantile;
            set.log_probability_value = log_p;
            set.probability_value = clamp_probability(alpha);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_reference_test_keeps_alpha() -> TestResult {
        let baarda = BaardaMethodTestStatistic::new(1.0, 0.1, 80.0)?;
        let set = baarda.adjust_single(TestStatisticParameterSet::new(1.0, f64::INFINITY));
        assert_eq!(set.probability_value, 0.1);
        assert_eq!(set.power_of_test, 80.0);
        assert_abs_diff_eq!(set.quantile, distribution::quantile(1.0, 0.1), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_other_dof_shares_noncentrality() -> TestResult {
        let baarda = BaardaMethodTestStatistic::new(1.0, 0.1, 80.0)?;
        let set = baarda.adjust_single(TestStatisticParameterSet::new(3.0, f64::INFINITY));
        let ncp = baarda.noncentrality_parameter();
        assert_eq!(set.noncentrality_parameter, ncp);
        // quantile chosen such that the power against ncp is β
        assert_abs_diff_eq!(
            distribution::power_of_test(set.quantile, 3.0, ncp),
            80.0,
            epsilon = 1e-6
        );
        // more dof at equal power allow a larger α
        assert!(set.probability_value > 0.1);
        assert!(set.probability_value < 100.0);
        Ok(())
    }

    #[test]
    fn test_noncentrality_matches_closed_form() -> TestResult {
        let baarda = BaardaMethodTestStatistic::new(1.0, 0.1, 80.0)?;
        assert_abs_diff_eq!(
            baarda.noncentrality_parameter(),
            distribution::noncentrality_parameter(1.0, 0.1, 80.0),
            epsilon = 1e-6
        );
        Ok(())
    }

    #[test]
    fn test_invalid_probabilities_rejected() {
        assert!(BaardaMethodTestStatistic::new(1.0, 0.0, 80.0).is_err());
        assert!(BaardaMethodTestStatistic::new(1.0, 0.1, 100.0).is_err());
    }
}
