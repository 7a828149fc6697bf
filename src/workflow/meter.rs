use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::config::Limits;
use crate::schemas::TokenUsage;

use super::WorkflowError;

#[derive(Debug, Default, Clone)]
struct Tally {
    usage: TokenUsage,
    cost: f64,
}

/// Accumulates token and cost consumption across every LLM step of a run.
/// Emits one warning when the threshold is crossed and a hard
/// `BudgetExceeded` when a ceiling is passed.
#[derive(Debug)]
pub struct UsageMeter {
    max_tokens: Option<u64>,
    max_cost: Option<f64>,
    warn_threshold: f64,
    tally: Mutex<Tally>,
    warned: AtomicBool,
}

impl Default for UsageMeter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl UsageMeter {
    pub fn unlimited() -> Self {
        Self {
            max_tokens: None,
            max_cost: None,
            warn_threshold: 1.0,
            tally: Mutex::new(Tally::default()),
            warned: AtomicBool::new(false),
        }
    }

    pub fn new(max_tokens: Option<u64>, max_cost: Option<f64>, warn_threshold: f64) -> Self {
        Self {
            max_tokens,
            max_cost,
            warn_threshold,
            tally: Mutex::new(Tally::default()),
            warned: AtomicBool::new(false),
        }
    }

    pub fn from_limits(limits: &Limits) -> Self {
        Self::new(limits.max_tokens, limits.max_cost, limits.warn_threshold)
    }

    /// Adds one LLM result's consumption. The result that crosses a ceiling
    /// is still counted before the breach is reported.
    pub fn record(&self, usage: &TokenUsage, cost: f64) -> Result<(), WorkflowError> {
        let mut tally = self.tally.lock().expect("meter lock poisoned");
        tally.usage = tally.usage.add(usage);
        tally.cost += cost;

        let tokens = u64::from(tally.usage.total_tokens);
        let total_cost = tally.cost;
        drop(tally);

        if let Some(max) = self.max_tokens {
            if tokens > max {
                return Err(WorkflowError::BudgetExceeded(format!(
                    "{tokens} tokens consumed, limit is {max}"
                )));
            }
        }
        if let Some(max) = self.max_cost {
            if total_cost > max {
                return Err(WorkflowError::BudgetExceeded(format!(
                    "${total_cost:.4} consumed, limit is ${max:.4}"
                )));
            }
        }

        self.maybe_warn(tokens, total_cost);
        Ok(())
    }

    pub fn totals(&self) -> (TokenUsage, f64) {
        let tally = self.tally.lock().expect("meter lock poisoned");
        (tally.usage.clone(), tally.cost)
    }

    fn maybe_warn(&self, tokens: u64, cost: f64) {
        if self.warned.load(Ordering::Relaxed) {
            return;
        }

        let token_ratio = self
            .max_tokens
            .map(|max| tokens as f64 / max as f64)
            .unwrap_or(0.0);
        let cost_ratio = self.max_cost.map(|max| cost / max).unwrap_or(0.0);

        if token_ratio.max(cost_ratio) >= self.warn_threshold
            && !self.warned.swap(true, Ordering::Relaxed)
        {
            log::warn!(
                "budget warning: {:.0}% of token budget, {:.0}% of cost budget consumed",
                token_ratio * 100.0,
                cost_ratio * 100.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_errors() {
        let meter = UsageMeter::unlimited();
        for _ in 0..100 {
            meter.record(&TokenUsage::new(1000, 1000), 5.0).unwrap();
        }
    }

    #[test]
    fn test_cost_ceiling() {
        let meter = UsageMeter::new(None, Some(0.01), 0.8);
        let err = meter.record(&TokenUsage::new(10, 10), 0.02).unwrap_err();
        assert!(matches!(err, WorkflowError::BudgetExceeded(_)));

        // The breaching result is still counted.
        let (_, cost) = meter.totals();
        assert!((cost - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_token_ceiling() {
        let meter = UsageMeter::new(Some(100), None, 0.8);
        meter.record(&TokenUsage::new(40, 20), 0.0).unwrap();
        let err = meter.record(&TokenUsage::new(40, 20), 0.0).unwrap_err();
        assert!(matches!(err, WorkflowError::BudgetExceeded(_)));
    }

    #[test]
    fn test_totals_accumulate() {
        let meter = UsageMeter::unlimited();
        meter.record(&TokenUsage::new(10, 5), 0.001).unwrap();
        meter.record(&TokenUsage::new(20, 10), 0.002).unwrap();

        let (usage, cost) = meter.totals();
        assert_eq!(usage.total_tokens, 45);
        assert!((cost - 0.003).abs() < 1e-9);
    }
}
