//! Dependency scheduler: builds a DAG over stages and computes execution
//! geometry from it.
//!
//! Grounded on the teacher's `dag/builder.rs` (graph construction, Kahn's
//! algorithm cycle detection) and `dag/scheduler.rs` (wave/ready-set
//! computation), generalized from `Phase` to the spec's `Stage` and
//! extended with `CriticalPath`/`AnalyzeBranches`/`Visualize`, which the
//! teacher's scheduler does not itself provide.

use std::collections::{HashMap, HashSet};

use crate::errors::FactoryError;
use crate::model::Stage;

pub type StageIndex = usize;

/// Pure graph over a factory's stages: forward edges, reverse edges, and an
/// id<->index mapping. `loop_to` edges are intentionally excluded (spec §9:
/// loops are a runtime rewinding mechanism, not a DAG back-edge).
#[derive(Debug, Clone)]
pub struct Graph {
    ids: Vec<String>,
    index_of: HashMap<String, StageIndex>,
    forward: Vec<Vec<StageIndex>>,
    reverse: Vec<Vec<StageIndex>>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn stage_id(&self, index: StageIndex) -> &str {
        &self.ids[index]
    }

    pub fn index_of(&self, id: &str) -> Option<StageIndex> {
        self.index_of.get(id).copied()
    }

    pub fn dependencies(&self, index: StageIndex) -> &[StageIndex] {
        &self.reverse[index]
    }

    pub fn dependents(&self, index: StageIndex) -> &[StageIndex] {
        &self.forward[index]
    }

    pub fn roots(&self) -> Vec<StageIndex> {
        (0..self.len()).filter(|&i| self.reverse[i].is_empty()).collect()
    }

    pub fn leaves(&self) -> Vec<StageIndex> {
        (0..self.len()).filter(|&i| self.forward[i].is_empty()).collect()
    }

    fn dependencies_satisfied(&self, index: StageIndex, completed: &HashSet<StageIndex>) -> bool {
        self.reverse[index].iter().all(|d| completed.contains(d))
    }
}

/// **BuildGraph(stages) → Graph.**
pub fn build_graph(stages: &[Stage]) -> Result<Graph, FactoryError> {
    let mut index_of = HashMap::new();
    let ids: Vec<String> = stages.iter().map(|s| s.id.clone()).collect();
    for (i, stage) in stages.iter().enumerate() {
        if index_of.insert(stage.id.clone(), i).is_some() {
            return Err(FactoryError::DuplicateStage(stage.id.clone()));
        }
    }

    let n = stages.len();
    let mut forward = vec![Vec::new(); n];
    let mut reverse = vec![Vec::new(); n];

    for (i, stage) in stages.iter().enumerate() {
        for dep in &stage.depends_on {
            let &dep_idx = index_of.get(dep).ok_or_else(|| FactoryError::UnknownDependency {
                stage: stage.id.clone(),
                dependency: dep.clone(),
            })?;
            forward[dep_idx].push(i);
            reverse[i].push(dep_idx);
        }
    }

    let graph = Graph {
        ids,
        index_of,
        forward,
        reverse,
    };
    validate_no_cycles(&graph)?;
    Ok(graph)
}

fn validate_no_cycles(graph: &Graph) -> Result<(), FactoryError> {
    let n = graph.len();
    let mut in_degree = vec![0usize; n];
    for deps in &graph.forward {
        for &to in deps {
            in_degree[to] += 1;
        }
    }

    let mut queue: Vec<StageIndex> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    queue.sort_by_key(|&i| graph.stage_id(i).to_string());
    let mut processed = 0usize;
    let mut idx = 0;
    while idx < queue.len() {
        let current = queue[idx];
        idx += 1;
        processed += 1;
        let mut newly_ready = Vec::new();
        for &next in graph.dependents(current) {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                newly_ready.push(next);
            }
        }
        newly_ready.sort_by_key(|&i| graph.stage_id(i).to_string());
        queue.extend(newly_ready);
    }

    if processed != n {
        let involved: Vec<String> = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| graph.stage_id(i).to_string())
            .collect();
        return Err(FactoryError::Cycle(involved));
    }
    Ok(())
}

/// **TopologicalOrder(graph) → \[stageId\].** Kahn-style; ties broken by
/// lexicographic stage-ID order for determinism (spec §4.2, §5).
pub fn topological_order(graph: &Graph) -> Result<Vec<String>, FactoryError> {
    let n = graph.len();
    let mut in_degree = vec![0usize; n];
    for deps in &graph.forward {
        for &to in deps {
            in_degree[to] += 1;
        }
    }

    let mut ready: Vec<StageIndex> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    ready.sort_by_key(|&i| graph.stage_id(i).to_string());

    let mut order = Vec::with_capacity(n);
    let mut frontier = ready;
    while !frontier.is_empty() {
        frontier.sort_by_key(|&i| graph.stage_id(i).to_string());
        let current = frontier.remove(0);
        order.push(graph.stage_id(current).to_string());
        for &next in graph.dependents(current) {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                frontier.push(next);
            }
        }
    }

    if order.len() != n {
        let involved: Vec<String> = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| graph.stage_id(i).to_string())
            .collect();
        return Err(FactoryError::Cycle(involved));
    }
    Ok(order)
}

/// **ParallelGroups(graph) → \[\[stageId\]\].** Successive zero-in-degree
/// levels.
pub fn parallel_groups(graph: &Graph) -> Vec<Vec<String>> {
    let n = graph.len();
    let mut completed: HashSet<StageIndex> = HashSet::new();
    let mut groups = Vec::new();

    while completed.len() < n {
        let mut level: Vec<StageIndex> = (0..n)
            .filter(|&i| !completed.contains(&i) && graph.dependencies_satisfied(i, &completed))
            .collect();
        if level.is_empty() {
            break;
        }
        level.sort_by_key(|&i| graph.stage_id(i).to_string());
        groups.push(level.iter().map(|&i| graph.stage_id(i).to_string()).collect());
        completed.extend(level);
    }
    groups
}

/// **ReadyStages(graph, completed) → \[stageId\].**
pub fn ready_stages(graph: &Graph, completed: &HashSet<String>) -> Vec<String> {
    let completed_idx: HashSet<StageIndex> = completed
        .iter()
        .filter_map(|id| graph.index_of(id))
        .collect();
    let mut ready: Vec<String> = (0..graph.len())
        .filter(|&i| !completed_idx.contains(&i) && graph.dependencies_satisfied(i, &completed_idx))
        .map(|i| graph.stage_id(i).to_string())
        .collect();
    ready.sort();
    ready
}

/// **CriticalPath(graph) → \[stageId\].** Longest dependency chain via
/// topological longest-path relaxation.
pub fn critical_path(graph: &Graph) -> Vec<String> {
    let order = match topological_order(graph) {
        Ok(o) => o,
        Err(_) => return Vec::new(),
    };
    let n = graph.len();
    let mut best_len = vec![1usize; n];
    let mut predecessor: Vec<Option<StageIndex>> = vec![None; n];

    for id in &order {
        let i = graph.index_of(id).unwrap();
        for &next in graph.dependents(i) {
            if best_len[i] + 1 > best_len[next] {
                best_len[next] = best_len[i] + 1;
                predecessor[next] = Some(i);
            }
        }
    }

    let Some((mut end, _)) = best_len.iter().enumerate().max_by_key(|&(_, &len)| len) else {
        return Vec::new();
    };
    let mut path = vec![end];
    while let Some(p) = predecessor[end] {
        path.push(p);
        end = p;
    }
    path.reverse();
    path.into_iter().map(|i| graph.stage_id(i).to_string()).collect()
}

pub fn descendants_of(graph: &Graph, stage_id: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let Some(start) = graph.index_of(stage_id) else {
        return out;
    };
    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        for &next in graph.dependents(current) {
            if out.insert(graph.stage_id(next).to_string()) {
                stack.push(next);
            }
        }
    }
    out
}

pub fn ancestors_of(graph: &Graph, stage_id: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let Some(start) = graph.index_of(stage_id) else {
        return out;
    };
    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        for &prev in graph.dependencies(current) {
            if out.insert(graph.stage_id(prev).to_string()) {
                stack.push(prev);
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchAnalysis {
    pub is_parallel: bool,
    pub merge_point: Option<String>,
}

/// **AnalyzeBranches(graph, ids) → {isParallel, mergePoint?}.** Finds the
/// earliest common descendant of a set of parallel branches.
pub fn analyze_branches(graph: &Graph, ids: &[String]) -> BranchAnalysis {
    if ids.len() < 2 {
        return BranchAnalysis {
            is_parallel: false,
            merge_point: None,
        };
    }

    let order = topological_order(graph).unwrap_or_default();
    let rank: HashMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

    let mut common: Option<HashSet<String>> = None;
    for id in ids {
        let mut descendants = descendants_of(graph, id);
        descendants.insert(id.clone());
        common = Some(match common {
            None => descendants,
            Some(acc) => acc.intersection(&descendants).cloned().collect(),
        });
    }
    let common = common.unwrap_or_default();
    let merge_point = common
        .into_iter()
        .filter(|id| !ids.contains(id))
        .min_by_key(|id| rank.get(id.as_str()).copied().unwrap_or(usize::MAX));

    BranchAnalysis {
        is_parallel: true,
        merge_point,
    }
}

/// **Visualize(graph) → string.** ASCII rendering of the levelized plan.
pub fn visualize(graph: &Graph) -> String {
    let groups = parallel_groups(graph);
    let mut out = String::new();
    for (i, group) in groups.iter().enumerate() {
        out.push_str(&format!("level {i}: {}\n", group.join(", ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Stage, StageType};

    fn stage(id: &str, deps: &[&str]) -> Stage {
        Stage::new(id, StageType::Custom)
            .with_command("true")
            .with_depends_on(deps.iter().map(|s| s.to_string()).collect())
    }

    fn diamond() -> Vec<Stage> {
        vec![
            stage("root", &[]),
            stage("a", &["root"]),
            stage("b", &["root"]),
            stage("join", &["a", "b"]),
        ]
    }

    #[test]
    fn topological_order_respects_edges() {
        let graph = build_graph(&diamond()).unwrap();
        let order = topological_order(&graph).unwrap();
        let pos = |id: &str| order.iter().position(|s| s == id).unwrap();
        assert!(pos("root") < pos("a"));
        assert!(pos("root") < pos("b"));
        assert!(pos("a") < pos("join"));
        assert!(pos("b") < pos("join"));
    }

    #[test]
    fn parallel_groups_match_spec_scenario_3() {
        let graph = build_graph(&diamond()).unwrap();
        let groups = parallel_groups(&graph);
        assert_eq!(
            groups,
            vec![
                vec!["root".to_string()],
                vec!["a".to_string(), "b".to_string()],
                vec!["join".to_string()],
            ]
        );
    }

    #[test]
    fn critical_path_length_three_for_diamond() {
        let graph = build_graph(&diamond()).unwrap();
        let path = critical_path(&graph);
        assert_eq!(path.len(), 3);
        assert_eq!(path.first().unwrap(), "root");
        assert_eq!(path.last().unwrap(), "join");
    }

    #[test]
    fn cycle_detection_reports_involved_stages() {
        let mut stages = vec![stage("a", &["b"]), stage("b", &["a"])];
        stages[0].depends_on = vec!["b".into()];
        stages[1].depends_on = vec!["a".into()];
        let err = build_graph(&stages).unwrap_err();
        match err {
            FactoryError::Cycle(involved) => {
                assert_eq!(involved.len(), 2);
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let stages = vec![stage("a", &["ghost"])];
        assert!(matches!(
            build_graph(&stages),
            Err(FactoryError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn ready_stages_respects_completed_set() {
        let graph = build_graph(&diamond()).unwrap();
        let completed: HashSet<String> = ["root".to_string()].into_iter().collect();
        let ready = ready_stages(&graph, &completed);
        assert_eq!(ready, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn analyze_branches_finds_join_as_merge_point() {
        let graph = build_graph(&diamond()).unwrap();
        let analysis = analyze_branches(&graph, &["a".to_string(), "b".to_string()]);
        assert!(analysis.is_parallel);
        assert_eq!(analysis.merge_point, Some("join".to_string()));
    }

    #[test]
    fn descendants_and_ancestors_are_transitive() {
        let graph = build_graph(&diamond()).unwrap();
        let descendants = descendants_of(&graph, "root");
        assert!(descendants.contains("a"));
        assert!(descendants.contains("b"));
        assert!(descendants.contains("join"));

        let ancestors = ancestors_of(&graph, "join");
        assert!(ancestors.contains("a"));
        assert!(ancestors.contains("b"));
        assert!(ancestors.contains("root"));
    }

    #[test]
    fn visualize_lists_levels() {
        let graph = build_graph(&diamond()).unwrap();
        let rendering = visualize(&graph);
        assert!(rendering.contains("level 0: root"));
        assert!(rendering.contains("level 2: join"));
    }
}
