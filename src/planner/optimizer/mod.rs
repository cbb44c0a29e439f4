//! Plan micro-optimizer
//!
//! Applies rewrite rules to a candidate plan. A rule may return several
//! variants of its input; each variant is fed to the following rules, and
//! every plan that comes out the end is scored by the search.

pub mod rules;

pub use rules::{MicroOptimization, PushdownLimits, RemoveTrivialProjection};

use tracing::debug;

use crate::planner::compiled::CompiledPlan;
use crate::planner::error::{PlannerError, PlannerResult};

/// Applies a sequence of micro-optimizations
pub struct MicroOptimizer {
    rules: Vec<Box<dyn MicroOptimization>>,
}

impl Default for MicroOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MicroOptimizer {
    /// Create an optimizer with the default rules
    pub fn new() -> Self {
        Self {
            rules: vec![Box::new(RemoveTrivialProjection), Box::new(PushdownLimits)],
        }
    }

    /// Create an optimizer with custom rules
    pub fn with_rules(rules: Vec<Box<dyn MicroOptimization>>) -> Self {
        Self { rules }
    }

    /// Run every rule over `plan`; never returns an empty list
    ///
    /// Variants keep the order rules produce them in, so the unmodified
    /// plan comes first whenever a rule keeps it.
    pub fn apply_all(&self, plan: CompiledPlan) -> PlannerResult<Vec<CompiledPlan>> {
        let mut current = vec![plan];
        for rule in &self.rules {
            let mut next = Vec::with_capacity(current.len());
            for candidate in &current {
                let variants = rule.apply(candidate)?;
                if variants.is_empty() {
                    return Err(PlannerError::InvariantViolation(format!(
                        "Micro-optimization {} returned no plans",
                        rule.name()
                    )));
                }
                next.extend(variants);
            }
            debug!(rule = rule.name(), variants = next.len(), "applied micro-optimization");
            current = next;
        }
        Ok(current)
    }

    /// Get the names of all rules
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::physical::{PlanNode, PlanNodeKind};

    struct Duplicate;

    impl MicroOptimization for Duplicate {
        fn name(&self) -> &'static str {
            "duplicate"
        }

        fn apply(&self, plan: &CompiledPlan) -> PlannerResult<Vec<CompiledPlan>> {
            Ok(vec![plan.clone(), plan.clone()])
        }
    }

    struct Nothing;

    impl MicroOptimization for Nothing {
        fn name(&self) -> &'static str {
            "nothing"
        }

        fn apply(&self, _plan: &CompiledPlan) -> PlannerResult<Vec<CompiledPlan>> {
            Ok(Vec::new())
        }
    }

    fn plan() -> CompiledPlan {
        CompiledPlan::new(PlanNode::new(PlanNodeKind::Distinct, Vec::new()))
    }

    #[test]
    fn test_variants_multiply() {
        let optimizer = MicroOptimizer::with_rules(vec![Box::new(Duplicate), Box::new(Duplicate)]);
        assert_eq!(optimizer.apply_all(plan()).unwrap().len(), 4);
    }

    #[test]
    fn test_no_rules_keeps_plan() {
        let optimizer = MicroOptimizer::with_rules(Vec::new());
        let out = optimizer.apply_all(plan()).unwrap();
        assert_eq!(out, vec![plan()]);
    }

    #[test]
    fn test_empty_rule_output_is_rejected() {
        let optimizer = MicroOptimizer::with_rules(vec![Box::new(Nothing)]);
        assert!(matches!(
            optimizer.apply_all(plan()),
            Err(PlannerError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_default_rule_names() {
        assert_eq!(
            MicroOptimizer::new().rule_names(),
            vec!["remove_trivial_projection", "pushdown_limits"]
        );
    }
}
