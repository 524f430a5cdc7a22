//! Budget limits and evaluation.

use serde::{Deserialize, Serialize};

/// Caller-supplied ceilings. A zero count limit means "unlimited"; cost and
/// token limits apply only when both the limit and the usage are present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimits {
    pub max_wall_time_seconds: u64,
    pub max_retries: u64,
    pub max_step_count: u64,
    pub max_tool_calls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_estimated_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

/// Usage counters captured into every checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub wall_time_seconds: u64,
    pub retry_count: u64,
    pub step_count: u64,
    pub tool_call_count: u64,
}

/// Spend reported by the caller that the job state does not track.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Spend {
    pub estimated_cost: Option<f64>,
    pub tokens: Option<u64>,
}

/// Everything evaluated against [`BudgetLimits`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BudgetUsage {
    #[serde(flatten)]
    pub state: BudgetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

impl BudgetUsage {
    #[must_use]
    pub const fn new(state: BudgetState, spend: Spend) -> Self {
        Self {
            state,
            estimated_cost: spend.estimated_cost,
            tokens: spend.tokens,
        }
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BudgetVerdict {
    /// One entry per exceeded limit, e.g. `step_count>10`.
    pub violations: Vec<String>,
}

impl BudgetVerdict {
    #[must_use]
    pub fn exceeded(&self) -> bool {
        !self.violations.is_empty()
    }
}

const fn over(limit: u64, used: u64) -> bool {
    limit > 0 && used > limit
}

/// Compare `usage` against `limits`. Pure.
#[must_use]
pub fn evaluate(limits: &BudgetLimits, usage: &BudgetUsage) -> BudgetVerdict {
    let mut violations = Vec::new();
    let s = &usage.state;

    if over(limits.max_wall_time_seconds, s.wall_time_seconds) {
        violations.push(format!("wall_time_seconds>{}", limits.max_wall_time_seconds));
    }
    if over(limits.max_retries, s.retry_count) {
        violations.push(format!("retry_count>{}", limits.max_retries));
    }
    if over(limits.max_step_count, s.step_count) {
        violations.push(format!("step_count>{}", limits.max_step_count));
    }
    if over(limits.max_tool_calls, s.tool_call_count) {
        violations.push(format!("tool_call_count>{}", limits.max_tool_calls));
    }
    if let Some(limit) = limits
        .max_estimated_cost
        .filter(|limit| usage.estimated_cost.is_some_and(|used| used > *limit))
    {
        violations.push(format!("estimated_cost>{limit:.4}"));
    }
    if let Some(limit) = limits
        .max_tokens
        .filter(|limit| usage.tokens.is_some_and(|used| used > *limit))
    {
        violations.push(format!("tokens>{limit}"));
    }

    BudgetVerdict { violations }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(wall: u64, retries: u64, steps: u64, tools: u64) -> BudgetUsage {
        BudgetUsage {
            state: BudgetState {
                wall_time_seconds: wall,
                retry_count: retries,
                step_count: steps,
                tool_call_count: tools,
            },
            ..BudgetUsage::default()
        }
    }

    #[test]
    fn zero_limits_are_unlimited() {
        let verdict = evaluate(&BudgetLimits::default(), &usage(10_000, 50, 900, 900));
        assert!(!verdict.exceeded());
    }

    #[test]
    fn at_limit_is_within_budget() {
        let limits = BudgetLimits {
            max_step_count: 10,
            ..BudgetLimits::default()
        };
        assert!(!evaluate(&limits, &usage(0, 0, 10, 0)).exceeded());
        assert_eq!(
            evaluate(&limits, &usage(0, 0, 11, 0)).violations,
            vec!["step_count>10"]
        );
    }

    #[test]
    fn every_violation_is_listed_in_order() {
        let limits = BudgetLimits {
            max_wall_time_seconds: 60,
            max_retries: 1,
            max_step_count: 2,
            max_tool_calls: 3,
            max_estimated_cost: Some(1.5),
            max_tokens: Some(100),
        };
        let mut u = usage(61, 2, 3, 4);
        u.estimated_cost = Some(1.6);
        u.tokens = Some(101);
        assert_eq!(
            evaluate(&limits, &u).violations,
            vec![
                "wall_time_seconds>60",
                "retry_count>1",
                "step_count>2",
                "tool_call_count>3",
                "estimated_cost>1.5000",
                "tokens>100",
            ]
        );
    }

    #[test]
    fn cost_limit_needs_reported_cost() {
        let limits = BudgetLimits {
            max_estimated_cost: Some(0.1),
            max_tokens: Some(1),
            ..BudgetLimits::default()
        };
        assert!(!evaluate(&limits, &usage(0, 0, 0, 0)).exceeded());
    }
}
