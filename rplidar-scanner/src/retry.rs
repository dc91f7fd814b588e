//! Bounded retry shared by the sample source and the scan controller.

/// Counts consecutive failures against a fixed allowance.
///
/// `record_failure` returns `true` while the failure is still within budget.
/// Any success resets the count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    max_failures: u32,
    failures: u32,
}

impl RetryBudget {
    pub fn new(max_failures: u32) -> RetryBudget {
        RetryBudget {
            max_failures,
            failures: 0,
        }
    }

    pub fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        self.failures <= self.max_failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures > self.max_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhausts_after_max_failures() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.record_failure());
        assert!(budget.record_failure());
        assert!(!budget.is_exhausted());
        assert!(!budget.record_failure());
        assert!(budget.is_exhausted());
        assert_eq!(budget.failures(), 3);
    }

    #[test]
    fn test_success_resets_the_count() {
        let mut budget = RetryBudget::new(1);
        assert!(budget.record_failure());
        budget.record_success();
        assert_eq!(budget.failures(), 0);
        assert!(budget.record_failure());
    }

    #[test]
    fn test_zero_budget_fails_first_time() {
        let mut budget = RetryBudget::new(0);
        assert!(!budget.record_failure());
    }
}
