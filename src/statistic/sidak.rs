use crate::statistic::{
    StatisticResult, TestStatistic, TestStatisticParameterSet, TestStatisticType, distribution,
    validate_probability,
};

/// Šidák correction over `k` independent hypotheses.
///
/// `α_local = (1 − (1 − α_global)^(1/k))` and `α_global = 1 − (1 − α_local)^k` (in percent).
/// Global tests and tests with at least `k` numerator dof use α_global, all others α_local.
#[derive(Debug, Clone)]
pub struct SidakTestStatistic {
    number_of_hypotheses: usize,
    alpha_global: f64,
    alpha_local: f64,
    beta: f64,
    noncentrality_parameter: f64,
}

impl SidakTestStatistic {
    /// `alpha_is_global` selects whether `alpha` is the family-wise or the per-test level.
    pub fn new(
        number_of_hypotheses: usize,
        alpha: f64,
        beta: f64,
        alpha_is_global: bool,
    ) -> StatisticResult<Self> {
        let alpha = validate_probability(alpha, "probability value α")?;
        let beta = validate_probability(beta, "power of test β")?;
        let k = number_of_hypotheses as f64;
        let complement = 1.0 - 0.01 * alpha;

        let (alpha_global, alpha_local, noncentrality_parameter) = match number_of_hypotheses {
            0 => (
                alpha,
                alpha,
                distribution::noncentrality_parameter(1.0, alpha, beta),
            ),
            _ if alpha_is_global => (
                alpha,
                (1.0 - complement.powf(1.0 / k)) * 100.0,
                distribution::noncentrality_parameter(k, alpha, beta),
            ),
            _ => (
                (1.0 - complement.powf(k)) * 100.0,
                alpha,
                distribution::noncentrality_parameter(1.0, alpha, beta),
            ),
        };

        Ok(Self {
            number_of_hypotheses,
            alpha_global,
            alpha_local,
            beta,
            noncentrality_parameter,
        })
    }

    pub fn alpha_global(&self) -> f64 {
        self.alpha_global
    }

    pub fn alpha_local(&self) -> f64 {
        self.alpha_local
    }

    pub fn number_of_hypotheses(&self) -> usize {
        self.number_of_hypotheses
    }
}

impl TestStatistic for SidakTestStatistic {
    fn statistic_type(&self) -> TestStatisticType {
        TestStatisticType::Sidak
    }

    fn probability_value(&self) -> f64 {
        self.alpha_local
    }

    fn power_of_test(&self) -> f64 {
        self.beta
    }

    fn adjust(&self, sets: &mut [TestStatisticParameterSet]) {
        let ncp = self.noncentrality_parameter;
        for set in sets.iter_mut() {
            let n2 = set.numerator_dof();
            let m2 = set.denominator_dof();
            let alpha = if set.is_global() || n2 >= self.number_of_hypotheses as f64 {
                self.alpha_global
            } else {
                self.alpha_local
            };
            set.noncentrality_parameter = ncp;
            set.probability_value = alpha;

            if m2.is_infinite() {
                let quantile = distribution::quantile(n2, alpha);
                set.power_of_test = distribution::power_of_test(quantile, n2, ncp);
                set.log_probability_value = distribution::log_probability_value(quantile, n2);
                set.quantile = quantile;
            } else {
                let quantile = distribution::quantile_f(n2, m2, alpha);
                set.power_of_test = distribution::power_of_test_f(quantile, n2, m2, ncp);
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

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_local_to_global_correction() -> TestResult {
        let sidak = SidakTestStatistic::new(10, 0.1, 80.0, false)?;
        assert_eq!(sidak.alpha_local(), 0.1);
        assert_abs_diff_eq!(
            sidak.alpha_global(),
            (1.0 - 0.999_f64.powi(10)) * 100.0,
            epsilon = 1e-12
        );
        Ok(())
    }

    #[test]
    fn test_global_to_local_round_trip() -> TestResult {
        let global = SidakTestStatistic::new(25, 5.0, 80.0, true)?;
        let local = SidakTestStatistic::new(25, global.alpha_local(), 80.0, false)?;
        assert_abs_diff_eq!(local.alpha_global(), 5.0, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_global_sets_use_global_alpha() -> TestResult {
        let sidak = SidakTestStatistic::new(10, 0.1, 80.0, false)?;
        let mut sets = [
            TestStatisticParameterSet::new(1.0, f64::INFINITY),
            TestStatisticParameterSet::with_global(4.0, f64::INFINITY, true),
            TestStatisticParameterSet::new(2.0, 30.0),
        ];
        sidak.adjust(&mut sets);
        assert_eq!(sets[0].probability_value, sidak.alpha_local());
        assert_eq!(sets[1].probability_value, sidak.alpha_global());
        assert_abs_diff_eq!(
            sets[2].quantile,
            distribution::quantile_f(2.0, 30.0, sidak.alpha_local()),
            epsilon = 1e-12
        );
        assert!(sets.iter().all(|s| s.power_of_test > 0.0 && s.power_of_test <= 100.0));
        Ok(())
    }
}
