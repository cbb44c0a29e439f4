//! Plan fragmentation
//!
//! Cuts the winning plan at every `Receive → Send` boundary. The sub-tree
//! under each `Send` becomes a producer fragment that runs on the
//! partitions; what is left above becomes the coordinator's fragment. A
//! plan with k boundaries yields k + 1 fragments.
//!
//! Fragments are owned copies. The compiled plan keeps its full tree, with
//! each `Receive` annotated with the fragment that feeds it.

use serde::Serialize;
use tracing::debug;

use crate::planner::compiled::CompiledPlan;
use crate::planner::error::{PlannerError, PlannerResult};
use crate::planner::physical::{FragmentId, PlanNode, PlanNodeKind};

/// An independently executable piece of a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub root: PlanNode,
    /// Fragments whose output this fragment receives
    pub depends_on: Vec<FragmentId>,
    /// Whether the fragment runs once per partition
    pub runs_on_all_partitions: bool,
}

/// Splits compiled plans into fragments
pub struct Fragmentizer;

impl Fragmentizer {
    /// Replace `plan.fragments` with the fragments of `plan.root`
    ///
    /// Producer fragments come first, each before anything that depends
    /// on it; the coordinator fragment is last.
    pub fn fragmentize(plan: &mut CompiledPlan) -> PlannerResult<()> {
        if plan.root.has_unresolved_references() {
            return Err(PlannerError::InvariantViolation(
                "Cannot fragment a plan with unresolved column references".to_string(),
            ));
        }

        let mut next = 0;
        annotate_receives(&mut plan.root, &mut next)?;

        let mut fragments = Vec::with_capacity(next as usize + 1);
        let mut coordinator = plan.root.clone();
        let depends_on = cut(&mut coordinator, &mut fragments)?;
        fragments.push(Fragment {
            id: next,
            root: coordinator,
            depends_on,
            runs_on_all_partitions: false,
        });
        fragments.sort_by_key(|f| f.id);

        debug!(fragments = fragments.len(), "fragmented plan");
        plan.fragments = fragments;
        Ok(())
    }
}

/// Give every receive the id of the fragment under it, producers first
fn annotate_receives(node: &mut PlanNode, next: &mut FragmentId) -> PlannerResult<()> {
    for child in &mut node.children {
        annotate_receives(child, next)?;
    }
    if let PlanNodeKind::Receive { source_fragment } = &mut node.kind {
        match node.children.as_slice() {
            [send] if matches!(send.kind, PlanNodeKind::Send) => {}
            _ => {
                return Err(PlannerError::InvariantViolation(
                    "Receive node is not fed by exactly one Send node".to_string(),
                ))
            }
        }
        *source_fragment = Some(*next);
        *next += 1;
    }
    Ok(())
}

/// Detach producer sub-trees below `node`; returns the fragments the
/// remaining tree receives from
fn cut(node: &mut PlanNode, fragments: &mut Vec<Fragment>) -> PlannerResult<Vec<FragmentId>> {
    if let PlanNodeKind::Receive { source_fragment } = node.kind {
        let id = source_fragment.ok_or_else(|| {
            PlannerError::InvariantViolation("Receive node has no source fragment".to_string())
        })?;
        let mut send = node.children.pop().ok_or_else(|| {
            PlannerError::InvariantViolation("Receive node has no producer".to_string())
        })?;
        let depends_on = cut(&mut send, fragments)?;
        fragments.push(Fragment {
            id,
            root: send,
            depends_on,
            runs_on_all_partitions: true,
        });
        return Ok(vec![id]);
    }

    let mut depends_on = Vec::new();
    for child in &mut node.children {
        depends_on.extend(cut(child, fragments)?);
    }
    Ok(depends_on)
}
