//! Cost models for plan search
//!
//! A cost model turns the statistics of one candidate into a single
//! number. Lower is better; the search only compares costs produced by
//! the same model.

use crate::planner::stats::{PlanStatistics, StatsField};

/// Scores plan statistics
pub trait CostModel: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Cost of a plan with the given statistics
    fn plan_cost(&self, stats: &PlanStatistics) -> f64;
}

/// Cost breakdown for a plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cost {
    /// Estimated number of rows produced
    pub rows: f64,
    /// CPU cost (arbitrary units)
    pub cpu: f64,
    /// I/O cost (arbitrary units)
    pub io: f64,
    /// Rows and bytes moved between partitions and the coordinator
    pub network: f64,
}

impl Cost {
    /// Calculate total cost (I/O and network weighted higher than CPU)
    pub fn total(&self) -> f64 {
        self.cpu + self.io * 10.0 + self.network * 10.0
    }

    /// Create a zero cost
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Cost model used unless the caller picks another
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCostModel;

impl DefaultCostModel {
    /// Rows per I/O
    const ROWS_PER_IO: f64 = 100.0;

    /// Bytes counted as one network row
    const BYTES_PER_NETWORK_ROW: f64 = 1024.0;

    /// Break the statistics down into cost components
    pub fn breakdown(&self, stats: &PlanStatistics) -> Cost {
        let read = stats.get(StatsField::TuplesRead);
        Cost {
            rows: stats.result_rows,
            cpu: read
                + stats.get(StatsField::TuplesProcessed)
                + stats.get(StatsField::SortWork)
                + stats.get(StatsField::IndexLookups),
            io: read / Self::ROWS_PER_IO,
            network: stats.get(StatsField::TuplesSent)
                + stats.get(StatsField::BytesSent) / Self::BYTES_PER_NETWORK_ROW,
        }
    }
}

impl CostModel for DefaultCostModel {
    fn name(&self) -> &'static str {
        "default"
    }

    fn plan_cost(&self, stats: &PlanStatistics) -> f64 {
        self.breakdown(stats).total()
    }
}

/// Scores every plan zero, so the first candidate always wins
#[derive(Debug, Clone, Copy, Default)]
pub struct TrivialCostModel;

impl CostModel for TrivialCostModel {
    fn name(&self) -> &'static str {
        "trivial"
    }

    fn plan_cost(&self, _stats: &PlanStatistics) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(read: f64, sent: f64) -> PlanStatistics {
        let mut stats = PlanStatistics::new();
        stats.add(StatsField::TuplesRead, read);
        stats.add(StatsField::TuplesSent, sent);
        stats
    }

    #[test]
    fn test_network_dominates_cpu() {
        let model = DefaultCostModel;
        let local = model.plan_cost(&stats(1000.0, 0.0));
        let remote = model.plan_cost(&stats(100.0, 100.0));
        assert!(remote > local);
    }

    #[test]
    fn test_fewer_reads_cost_less() {
        let model = DefaultCostModel;
        assert!(model.plan_cost(&stats(10.0, 0.0)) < model.plan_cost(&stats(250.0, 0.0)));
    }

    #[test]
    fn test_breakdown_total() {
        let cost = DefaultCostModel.breakdown(&stats(200.0, 5.0));
        assert_eq!(cost.cpu, 200.0);
        assert_eq!(cost.io, 2.0);
        assert_eq!(cost.network, 5.0);
        assert_eq!(cost.total(), 200.0 + 20.0 + 50.0);
    }

    #[test]
    fn test_trivial_model_is_zero() {
        assert_eq!(TrivialCostModel.plan_cost(&stats(1e6, 1e6)), 0.0);
        assert_eq!(Cost::zero().total(), 0.0);
    }
}
