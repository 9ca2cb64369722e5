//! Cached test decisions per degrees-of-freedom pair.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, RwLock};

use crate::statistic::{StatisticError, StatisticResult, TestStatistic};

/// Quantile and companion values of one F(f1, f2) test.
///
/// `f2 = ∞` denotes the chi-square form. Probabilities are in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestStatisticParameterSet {
    numerator_dof: f64,
    denominator_dof: f64,
    global: bool,
    pub quantile: f64,
    pub noncentrality_parameter: f64,
    pub probability_value: f64,
    pub power_of_test: f64,
    pub log_probability_value: f64,
}

impl TestStatisticParameterSet {
    pub fn new(numerator_dof: f64, denominator_dof: f64) -> Self {
        Self::with_global(numerator_dof, denominator_dof, false)
    }

    /// Parameter set of a global (family-wise) test such as the variance-component test.
    pub fn with_global(numerator_dof: f64, denominator_dof: f64, global: bool) -> Self {
        Self {
            numerator_dof,
            denominator_dof,
            global,
            quantile: 0.0,
            noncentrality_parameter: 0.0,
            probability_value: 0.0,
            power_of_test: 0.0,
            log_probability_value: 0.0,
        }
    }

    pub fn numerator_dof(&self) -> f64 {
        self.numerator_dof
    }

    pub fn denominator_dof(&self) -> f64 {
        self.denominator_dof
    }

    pub fn is_global(&self) -> bool {
        self.global
    }
}

impl Display for TestStatisticParameterSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "d1 = {:>6}, d2 = {:>8}: q = {:.6}, λ = {:.4}, α = {:.4} %, β = {:.2} %, ln(p) = {:.4}{}",
            self.numerator_dof,
            self.denominator_dof,
            self.quantile,
            self.noncentrality_parameter,
            self.probability_value,
            self.power_of_test,
            self.log_probability_value,
            if self.global { " (global)" } else { "" }
        )
    }
}

type DofKey = (u64, u64);

fn key(f1: f64, f2: f64) -> DofKey {
    (f1.to_bits(), f2.to_bits())
}

/// Registry of [`TestStatisticParameterSet`]s bound to one strategy.
///
/// Sets are computed on first request and memoized under the exact bit pattern of the
/// dof pair. The registry is safe to share between concurrent adjustments.
#[derive(Debug, Clone)]
pub struct TestStatisticParameters {
    test_statistic: Arc<dyn TestStatistic>,
    sets: Arc<RwLock<HashMap<DofKey, TestStatisticParameterSet>>>,
}

impl TestStatisticParameters {
    pub fn new(test_statistic: Arc<dyn TestStatistic>) -> Self {
        Self {
            test_statistic,
            sets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn test_statistic(&self) -> &dyn TestStatistic {
        self.test_statistic.as_ref()
    }

    /// Parameter set of a local test with dof pair `(f1, f2)`.
    pub fn parameter_set(&self, f1: f64, f2: f64) -> StatisticResult<TestStatisticParameterSet> {
        self.lookup(f1, f2, false)
    }

    /// Parameter set of a global test with dof pair `(f1, f2)`.
    ///
    /// A pair already cached as a local test is returned unchanged.
    pub fn global_parameter_set(
        &self,
        f1: f64,
        f2: f64,
    ) -> StatisticResult<TestStatisticParameterSet> {
        self.lookup(f1, f2, true)
    }

    fn lookup(&self, f1: f64, f2: f64, global: bool) -> StatisticResult<TestStatisticParameterSet> {
        let key = key(f1, f2);
        {
            let sets = self.sets.read().map_err(|e| {
                StatisticError::LockPoisoned {
                    context: "TestStatisticParameters::lookup".to_string(),
                    reason: "read lock".to_string(),
                }
                .log_with_source(e.to_string())
            })?;
            if let Some(set) = sets.get(&key) {
                return Ok(*set);
            }
        }

        // computed outside the lock, racing threads produce identical sets
        let set = self
            .test_statistic
            .adjust_single(TestStatisticParameterSet::with_global(f1, f2, global));

        let mut sets = self.sets.write().map_err(|e| {
            StatisticError::LockPoisoned {
                context: "TestStatisticParameters::lookup".to_string(),
                reason: "write lock".to_string(),
            }
            .log_with_source(e.to_string())
        })?;
        Ok(*sets.entry(key).or_insert(set))
    }

    /// All cached sets ordered by numerator dof ascending, then denominator dof descending.
    pub fn parameter_sets(&self) -> StatisticResult<Vec<TestStatisticParameterSet>> {
        let sets = self.sets.read().map_err(|e| {
            StatisticError::LockPoisoned {
                context: "TestStatisticParameters::parameter_sets".to_string(),
                reason: "read lock".to_string(),
            }
            .log_with_source(e.to_string())
        })?;
        let mut sets: Vec<TestStatisticParameterSet> = sets.values().copied().collect();
        sets.sort_by(|a, b| {
            a.numerator_dof
                .total_cmp(&b.numerator_dof)
                .then(b.denominator_dof.total_cmp(&a.denominator_dof))
        });
        Ok(sets)
    }

    pub fn len(&self) -> usize {
        self.sets.read().map(|sets| sets.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistic::UnadjustedTestStatistic;
    use std::thread;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn registry() -> TestStatisticParameters {
        TestStatisticParameters::new(Arc::new(UnadjustedTestStatistic::new(0.1, 80.0)))
    }

    #[test]
    fn test_memoized_per_dof_pair() -> TestResult {
        let registry = registry();
        let first = registry.parameter_set(2.0, f64::INFINITY)?;
        let second = registry.parameter_set(2.0, f64::INFINITY)?;
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);

        registry.parameter_set(2.0, 10.0)?;
        assert_eq!(registry.len(), 2);
        Ok(())
    }

    #[test]
    fn test_parameter_sets_ordering() -> TestResult {
        let registry = registry();
        registry.parameter_set(3.0, 7.0)?;
        registry.parameter_set(1.0, 9.0)?;
        registry.parameter_set(1.0, f64::INFINITY)?;
        registry.global_parameter_set(12.0, f64::INFINITY)?;

        let dofs: Vec<(f64, f64)> = registry
            .parameter_sets()?
            .iter()
            .map(|s| (s.numerator_dof(), s.denominator_dof()))
            .collect();
        assert_eq!(
            dofs,
            vec![
                (1.0, f64::INFINITY),
                (1.0, 9.0),
                (3.0, 7.0),
                (12.0, f64::INFINITY)
            ]
        );
        assert!(registry.parameter_sets()?[3].is_global());
        Ok(())
    }

    #[test]
    fn test_concurrent_access() -> TestResult {
        let registry = registry();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || registry.parameter_set(1.0 + (i % 2) as f64, f64::INFINITY))
            })
            .collect();
        for handle in handles {
            let set = handle.join().map_err(|_| "thread panicked")??;
            assert!(set.quantile.is_finite());
        }
        assert_eq!(registry.len(), 2);
        Ok(())
    }
}
