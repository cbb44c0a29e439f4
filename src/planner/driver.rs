//! Plan search driver
//!
//! `QueryPlanner::compile_plan` turns one SQL statement into the cheapest
//! plan the candidate generator can produce, under a caller-supplied cost
//! model. Each call is independent: the candidate counter, node-id counter
//! and search state all live on the call's stack, so one planner can serve
//! concurrent compiles.

use std::sync::Arc;

use tracing::{debug, debug_span, info, warn};

use crate::catalog::{Catalog, DatabaseEstimates};
use crate::config::{PlannerConfig, DEFAULT_MAX_TABLES_PER_JOIN};
use crate::planner::assembler::{CandidateGenerator, PartitioningForStatement, PlanAssembler};
use crate::planner::compiled::CompiledPlan;
use crate::planner::cost::CostModel;
use crate::planner::debug::{ArtifactKey, ArtifactKind, NoopDebugSink, PlanDebugSink};
use crate::planner::error::{PlannerError, PlannerResult};
use crate::planner::explain::ExplainOutput;
use crate::planner::fragmentizer::Fragmentizer;
use crate::planner::optimizer::MicroOptimizer;
use crate::planner::stats::{EstimateContext, PlanStatistics, ScalarValueHints};
use crate::sql::{ParsedSelect, ParsedStatement, SemanticParser, StatementParser};

/// One statement to compile
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub sql: String,
    /// Comma-separated table ranges, outermost first
    pub join_order: Option<String>,
    /// Procedure name, used to key debug artifacts
    pub procedure: String,
    /// Statement name, used to key debug artifacts
    pub statement: String,
    pub max_tables_per_join: usize,
    /// Hints indexed by parameter number
    pub param_hints: Vec<ScalarValueHints>,
}

impl PlanRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            join_order: None,
            procedure: "adhoc".to_string(),
            statement: "sql".to_string(),
            max_tables_per_join: DEFAULT_MAX_TABLES_PER_JOIN,
            param_hints: Vec::new(),
        }
    }

    #[must_use]
    pub fn join_order(mut self, join_order: impl Into<String>) -> Self {
        self.join_order = Some(join_order.into());
        self
    }

    #[must_use]
    pub fn names(mut self, procedure: impl Into<String>, statement: impl Into<String>) -> Self {
        self.procedure = procedure.into();
        self.statement = statement.into();
        self
    }

    #[must_use]
    pub fn max_tables_per_join(mut self, max: usize) -> Self {
        self.max_tables_per_join = max;
        self
    }

    #[must_use]
    pub fn param_hints(mut self, hints: Vec<ScalarValueHints>) -> Self {
        self.param_hints = hints;
        self
    }
}

/// Cost-based planner for one catalog
pub struct QueryPlanner<'a> {
    catalog: &'a Catalog,
    estimates: DatabaseEstimates,
    partitioning: PartitioningForStatement,
    parser: Box<dyn StatementParser + 'a>,
    optimizer: MicroOptimizer,
    debug_sink: Arc<dyn PlanDebugSink>,
    max_tables_per_join: usize,
}

/// Per-call search bookkeeping
struct SearchContext<'r> {
    request: &'r PlanRequest,
    estimate: EstimateContext<'r>,
    key: ArtifactKey,
    next_candidate: usize,
}

impl<'a> QueryPlanner<'a> {
    /// Planner with default estimates, inferred partitioning, the
    /// SQL-text parser, default rewrite rules and no debug output
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            estimates: DatabaseEstimates::new(),
            partitioning: PartitioningForStatement::inferred(),
            parser: Box::new(SemanticParser::new(catalog)),
            optimizer: MicroOptimizer::new(),
            debug_sink: Arc::new(NoopDebugSink),
            max_tables_per_join: DEFAULT_MAX_TABLES_PER_JOIN,
        }
    }

    /// Planner configured from `config`
    pub fn from_config(catalog: &'a Catalog, config: &PlannerConfig) -> Self {
        let mut planner = Self::new(catalog).with_debug_sink(config.debug_sink());
        planner.max_tables_per_join = config.max_tables_per_join;
        planner
    }

    #[must_use]
    pub fn with_estimates(mut self, estimates: DatabaseEstimates) -> Self {
        self.estimates = estimates;
        self
    }

    #[must_use]
    pub fn with_partitioning(mut self, partitioning: PartitioningForStatement) -> Self {
        self.partitioning = partitioning;
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Box<dyn StatementParser + 'a>) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_optimizer(mut self, optimizer: MicroOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    #[must_use]
    pub fn with_debug_sink(mut self, sink: Arc<dyn PlanDebugSink>) -> Self {
        self.debug_sink = sink;
        self
    }

    /// Request for `sql` carrying this planner's configured join limit
    pub fn request(&self, sql: impl Into<String>) -> PlanRequest {
        PlanRequest::new(sql).max_tables_per_join(self.max_tables_per_join)
    }

    /// Compile one statement with the default candidate generator
    pub fn compile_plan(
        &self,
        cost_model: &dyn CostModel,
        request: &PlanRequest,
    ) -> PlannerResult<CompiledPlan> {
        let mut assembler = PlanAssembler::new(self.catalog, self.partitioning);
        self.compile_plan_with(&mut assembler, cost_model, request)
    }

    /// Compile one statement with the given candidate generator
    pub fn compile_plan_with(
        &self,
        generator: &mut dyn CandidateGenerator,
        cost_model: &dyn CostModel,
        request: &PlanRequest,
    ) -> PlannerResult<CompiledPlan> {
        let span = debug_span!(
            "compile_plan",
            procedure = %request.procedure,
            statement = %request.statement,
            cost_model = cost_model.name()
        );
        let _enter = span.enter();

        let parsed = self
            .parser
            .parse(&request.sql, request.join_order.as_deref())?;
        for select in parsed.selects() {
            if select.join_order.is_none() && select.tables.len() > request.max_tables_per_join {
                return Err(PlannerError::Partitioning(format!(
                    "Failed to parse SQL statement: {} because a join of > {} tables was \
                     requested without specifying a join order",
                    request.sql, request.max_tables_per_join
                )));
            }
        }

        let mut search = SearchContext {
            request,
            estimate: EstimateContext {
                catalog: self.catalog,
                estimates: &self.estimates,
                param_hints: &request.param_hints,
            },
            key: ArtifactKey::statement(request.procedure.clone(), request.statement.clone()),
            next_candidate: 0,
        };
        self.emit(&search.key, ArtifactKind::ParsedStatement, || {
            Ok(parsed.describe())
        });

        let mut best = match &parsed {
            ParsedStatement::Select(select) => {
                self.best_cost_plan(generator, cost_model, &mut search, select, true)?
            }
            ParsedStatement::Union(union) => {
                generator.verify_table_partition(&parsed)?;

                let mut children = Vec::with_capacity(union.children.len());
                for child in &union.children {
                    children.push(self.best_cost_plan(
                        generator,
                        cost_model,
                        &mut search,
                        child,
                        false,
                    )?);
                }
                let cost: f64 = children.iter().map(|c| c.cost).sum();
                let content = children.iter().all(|c| c.content_deterministic);
                let order = children.iter().all(|c| c.order_deterministic);

                let mut plan = generator.combine_union_plans(union, union.op, children)?;
                plan.sql = request.sql.clone();
                plan.cost = cost;
                plan.content_deterministic = content;
                plan.order_deterministic = order;
                plan.root.resolve_column_indexes()?;

                let candidate = search.key.candidate(search.next_candidate);
                search.next_candidate += 1;
                self.emit_candidate(&candidate, &plan);
                self.emit_winner(&candidate, None);
                plan
            }
        };

        best.reset_plan_node_ids(1);
        Fragmentizer::fragmentize(&mut best)?;
        best.explained_plan = Some(ExplainOutput::format(&best.root));

        info!(
            cost = best.cost,
            fragments = best.fragments.len(),
            candidates = search.next_candidate,
            single_partition = best.single_partition,
            deterministic = best.statement_guarantees_determinism(),
            "selected plan"
        );
        Ok(best)
    }

    /// Streaming argmin over every variant of every raw candidate
    fn best_cost_plan(
        &self,
        generator: &mut dyn CandidateGenerator,
        cost_model: &dyn CostModel,
        search: &mut SearchContext<'_>,
        select: &ParsedSelect,
        is_final: bool,
    ) -> PlannerResult<CompiledPlan> {
        generator.setup_for_new_plans(select)?;

        let mut best: Option<(CompiledPlan, usize, PlanStatistics)> = None;
        while let Some(raw) = generator.next_plan(is_final)? {
            for mut plan in self.optimizer.apply_all(raw)? {
                plan.sql = search.request.sql.clone();
                plan.root.resolve_column_indexes()?;
                let stats = PlanStatistics::collect(&plan.root, &search.estimate)?;
                plan.cost = cost_model.plan_cost(&stats);

                let index = search.next_candidate;
                search.next_candidate += 1;
                debug!(
                    candidate = index,
                    cost = plan.cost,
                    nodes = plan.root.node_count(),
                    "scored candidate plan"
                );
                self.emit_candidate(&search.key.candidate(index), &plan);

                // NaN and infinite costs never compare below the bound
                let bound = best.as_ref().map_or(f64::MAX, |(current, _, _)| current.cost);
                let cheaper = plan.cost < bound;
                if !plan.cost.is_finite() {
                    warn!(candidate = index, cost = plan.cost, "ignoring non-finite plan cost");
                }
                if cheaper {
                    best = Some((plan, index, stats));
                }
            }
        }

        let Some((plan, index, stats)) = best else {
            return Err(PlannerError::unable_to_plan());
        };
        if is_final {
            self.emit_winner(&search.key.candidate(index), Some(&stats));
        }
        Ok(plan)
    }

    /// Hand one artifact to the sink; failures are logged and dropped
    fn emit(
        &self,
        key: &ArtifactKey,
        kind: ArtifactKind,
        render: impl FnOnce() -> PlannerResult<String>,
    ) {
        if !self.debug_sink.enabled() {
            return;
        }
        let result = render().and_then(|contents| self.debug_sink.write(key, kind, &contents));
        if let Err(e) = result {
            warn!(error = %e, ?kind, "failed to write debug artifact");
        }
    }

    fn emit_candidate(&self, key: &ArtifactKey, plan: &CompiledPlan) {
        if !self.debug_sink.enabled() {
            return;
        }
        self.emit(key, ArtifactKind::Explain, || {
            Ok(ExplainOutput::format(&plan.root))
        });
        self.emit(key, ArtifactKind::PlanJson, || {
            let json = serde_json::to_string_pretty(&plan.root)?;
            Ok(format!("SQL: {}\nCOST: {}\nPLAN:\n{}", plan.sql, plan.cost, json))
        });
        self.emit(key, ArtifactKind::PlanDot, || {
            Ok(ExplainOutput::to_dot(&plan.root))
        });
    }

    fn emit_winner(&self, key: &ArtifactKey, stats: Option<&PlanStatistics>) {
        if !self.debug_sink.enabled() {
            return;
        }
        if let Err(e) = self.debug_sink.mark_winner(key) {
            warn!(error = %e, "failed to mark winning plan");
        }
        let stats_key = ArtifactKey::statement(key.procedure.clone(), key.statement.clone());
        self.emit(&stats_key, ArtifactKind::Statistics, || {
            Ok(stats.map(|s| s.to_string()).unwrap_or_default())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::cost::{DefaultCostModel, TrivialCostModel};
    use crate::planner::debug::MemoryDebugSink;
    use crate::planner::physical::PlanNodeType;
    use crate::planner::test_utils::test_catalog;

    #[test]
    fn test_compile_simple_select() {
        let catalog = test_catalog();
        let planner = QueryPlanner::new(&catalog);
        let plan = planner
            .compile_plan(&DefaultCostModel, &PlanRequest::new("SELECT a FROM t"))
            .unwrap();

        assert_eq!(plan.sql, "SELECT a FROM t");
        assert_eq!(plan.root.id, Some(1));
        assert_eq!(plan.fragments.len(), 2);
        assert!(plan.explained_plan.is_some());
        assert!(plan.cost > 0.0);
    }

    #[test]
    fn test_parse_error_surfaces() {
        let catalog = test_catalog();
        let planner = QueryPlanner::new(&catalog);
        let err = planner
            .compile_plan(&DefaultCostModel, &PlanRequest::new("SELEC a FROM t"))
            .unwrap_err();
        assert!(matches!(err, PlannerError::Parse(_)));
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_join_limit_without_order() {
        let catalog = test_catalog();
        let planner = QueryPlanner::new(&catalog);
        let sql = "SELECT t.a FROM t, r WHERE t.a = r.id";

        let err = planner
            .compile_plan(&TrivialCostModel, &PlanRequest::new(sql).max_tables_per_join(1))
            .unwrap_err();
        assert!(matches!(err, PlannerError::Partitioning(_)));

        // An explicit join order lifts the limit
        let plan = planner
            .compile_plan(
                &TrivialCostModel,
                &PlanRequest::new(sql).max_tables_per_join(1).join_order("t,r"),
            )
            .unwrap();
        assert!(plan.root.contains(PlanNodeType::NestLoop));
    }

    #[test]
    fn test_debug_artifacts_for_enabled_sink() {
        let catalog = test_catalog();
        let sink = Arc::new(MemoryDebugSink::new());
        let planner = QueryPlanner::new(&catalog).with_debug_sink(sink.clone());
        planner
            .compile_plan(
                &DefaultCostModel,
                &PlanRequest::new("SELECT a FROM t WHERE t.k = 5").names("proc", "stmt"),
            )
            .unwrap();

        let artifacts = sink.artifacts();
        assert_eq!(artifacts[0].kind, ArtifactKind::ParsedStatement);
        assert!(artifacts.iter().any(|a| a.kind == ArtifactKind::PlanDot));
        assert!(artifacts.iter().any(|a| a.kind == ArtifactKind::Statistics));
        assert_eq!(sink.winners().len(), 1);
        assert_eq!(sink.winners()[0].procedure, "proc");
    }

    #[test]
    fn test_config_join_limit() {
        let catalog = test_catalog();
        let config = PlannerConfig {
            max_tables_per_join: 1,
            ..PlannerConfig::default()
        };
        let planner = QueryPlanner::from_config(&catalog, &config);
        let err = planner
            .compile_plan(&DefaultCostModel, &planner.request("SELECT t.a FROM t, r"))
            .unwrap_err();
        assert!(matches!(err, PlannerError::Partitioning(_)));
    }
}
