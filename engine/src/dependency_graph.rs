//! FILENAME: engine/src/dependency_graph.rs
//! PURPOSE: The directed dependency graph over (sheet, cell) pairs.
//! CONTEXT: This module is the heart of the workbook's recalculation engine.
//! Nodes are (lowercase sheet name, uppercase location) keys; an edge from A
//! to B means "A depends on B". Only formula cells appear as edge sources,
//! but destinations may name cells (or whole sheets) that do not currently
//! exist, which is how dangling references are modeled.
//!
//! The one algorithm that matters here is an iterative (explicit call-stack)
//! Tarjan SCC pass. It yields a post-order topological listing used by the
//! update driver, the set of nodes closing a cycle, and the members of every
//! non-trivial strongly connected component.
//!
//! USAGE:
//! 1. When a formula cell's content is set, call `set_cell()` and then
//!    `add_dependency()` for each static reference in the text.
//! 2. After any mutation, the driver calls `tarjan()` and walks the order.
//! 3. Edges discovered by lazy functions during evaluation are added with
//!    `add_dependency()` and retracted with `remove_dependency()` once the
//!    update loop reaches its fixed point.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Stable node identity: (lowercase sheet name, uppercase location).
pub type CellId = (String, String);

/// The result of one Tarjan pass over the graph.
#[derive(Debug)]
pub struct TarjanResult {
    /// Post-order topological listing: every node is listed after all of
    /// its dependencies.
    pub order: Vec<CellId>,
    /// Nodes holding a back edge into the active DFS stack, the cells that
    /// close a cycle.
    pub cycle_heads: HashSet<CellId>,
    /// Members of strongly connected components of size > 1, plus nodes
    /// with a self-loop.
    pub scc_members: HashSet<CellId>,
}

/// The dependency graph. A BTreeMap keyed by CellId keeps iteration (and so
/// the Tarjan traversal and everything derived from it) deterministic for a
/// given graph state.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: BTreeMap<CellId, Vec<CellId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            graph: BTreeMap::new(),
        }
    }

    /// Registers a formula cell as a source node with no edges yet,
    /// clearing any previous edge list.
    pub fn set_cell(&mut self, cell: CellId) {
        self.graph.insert(cell, Vec::new());
    }

    /// Appends a dependency edge. The edge list is ordered and may hold
    /// duplicates; `remove_dependency` removes one occurrence.
    pub fn add_dependency(&mut self, cell: &CellId, dependency: CellId) {
        if let Some(edges) = self.graph.get_mut(cell) {
            edges.push(dependency);
        }
    }

    /// Removes one occurrence of the given dependency edge.
    pub fn remove_dependency(&mut self, cell: &CellId, dependency: &CellId) {
        if let Some(edges) = self.graph.get_mut(cell) {
            if let Some(pos) = edges.iter().position(|d| d == dependency) {
                edges.remove(pos);
            }
        }
    }

    /// Removes a source node entirely. Edges *to* the removed cell from
    /// other formulas stay: they become dangling references.
    pub fn remove_cell(&mut self, cell: &CellId) {
        self.graph.remove(cell);
    }

    /// The out-edges of a cell, empty for non-source nodes.
    pub fn dependencies(&self, cell: &CellId) -> &[CellId] {
        self.graph.get(cell).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, cell: &CellId) -> bool {
        self.graph.contains_key(cell)
    }

    /// All source (formula) cells.
    pub fn cells(&self) -> impl Iterator<Item = &CellId> {
        self.graph.keys()
    }

    pub fn formula_cell_count(&self) -> usize {
        self.graph.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.values().map(Vec::len).sum()
    }

    /// Rewrites every node key and edge target on `old_name` to `new_name`
    /// (both lowercase). Returns the source cells that held at least one
    /// edge to the renamed sheet: the cells whose formula text the caller
    /// must rewrite.
    pub fn rename_sheet(&mut self, old_name: &str, new_name: &str) -> Vec<CellId> {
        let old = old_name.to_lowercase();
        let new = new_name.to_lowercase();

        let mut referencing = Vec::new();
        let mut renamed = BTreeMap::new();
        for (key, edges) in &self.graph {
            let new_key = if key.0 == old {
                (new.clone(), key.1.clone())
            } else {
                key.clone()
            };

            let mut touched = false;
            let new_edges: Vec<CellId> = edges
                .iter()
                .map(|dep| {
                    if dep.0 == old {
                        touched = true;
                        (new.clone(), dep.1.clone())
                    } else {
                        dep.clone()
                    }
                })
                .collect();

            if touched {
                referencing.push(new_key.clone());
            }
            renamed.insert(new_key, new_edges);
        }
        self.graph = renamed;
        referencing
    }

    /// Iterative Tarjan SCC pass.
    ///
    /// The recursion is flattened onto an explicit call stack of
    /// (node, next-child-index) frames. A frame with child index 0 is being
    /// entered for the first time; a frame with a larger index is being
    /// returned to after one of its children finished, at which point the
    /// child's lowlink folds into the parent's.
    pub fn tarjan(&self) -> TarjanResult {
        let mut ids: HashMap<&CellId, usize> = HashMap::new();
        let mut lowlinks: HashMap<&CellId, usize> = HashMap::new();
        let mut on_stack: HashSet<&CellId> = HashSet::new();
        let mut stack: Vec<&CellId> = Vec::new();
        let mut call_stack: Vec<(&CellId, usize)> = Vec::new();
        let mut next_id = 0usize;

        let mut order: Vec<CellId> = Vec::new();
        let mut cycle_heads: HashSet<CellId> = HashSet::new();
        let mut scc_members: HashSet<CellId> = HashSet::new();

        for root in self.graph.keys() {
            if ids.contains_key(root) {
                continue;
            }
            call_stack.push((root, 0));

            while let Some((node, mut child_idx)) = call_stack.pop() {
                let neighbors = self.dependencies(node);

                if child_idx == 0 {
                    // First visit: number the node and put it on the stack
                    stack.push(node);
                    on_stack.insert(node);
                    ids.insert(node, next_id);
                    lowlinks.insert(node, next_id);
                    next_id += 1;
                } else {
                    // Backtracking from the child at child_idx - 1
                    let child_low = lowlinks[&neighbors[child_idx - 1]];
                    let low = lowlinks.get_mut(node).unwrap();
                    *low = (*low).min(child_low);
                }

                // Skip over already-numbered children, folding in lowlinks
                // for those still on the stack (back edges -> cycles).
                while child_idx < neighbors.len() && ids.contains_key(&neighbors[child_idx]) {
                    let seen = &neighbors[child_idx];
                    if on_stack.contains(seen) {
                        cycle_heads.insert(node.clone());
                        let seen_low = lowlinks[seen];
                        let low = lowlinks.get_mut(node).unwrap();
                        *low = (*low).min(seen_low);
                    }
                    child_idx += 1;
                }

                // Recurse into the next unvisited child, if any.
                if child_idx < neighbors.len() {
                    let child = &neighbors[child_idx];
                    call_stack.push((node, child_idx + 1));
                    call_stack.push((child, 0));
                    continue;
                }

                // All children done: if this node roots an SCC, pop it off.
                if lowlinks[node] == ids[node] {
                    let mut scc: Vec<&CellId> = Vec::new();
                    while let Some(popped) = stack.pop() {
                        on_stack.remove(popped);
                        let finished = popped == node;
                        scc.push(popped);
                        if finished {
                            break;
                        }
                    }
                    let self_loop = self.dependencies(node).contains(node);
                    if scc.len() > 1 || self_loop {
                        for member in scc {
                            scc_members.insert(member.clone());
                        }
                    }
                }

                // Post-order: the node is listed after all of its children.
                order.push(node.clone());
            }
        }

        TarjanResult {
            order,
            cycle_heads,
            scc_members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(sheet: &str, loc: &str) -> CellId {
        (sheet.to_string(), loc.to_string())
    }

    fn graph_of(edges: &[(&str, &str)]) -> DependencyGraph {
        // Edges as ("A1", "B1") pairs on a single sheet
        let mut graph = DependencyGraph::new();
        for (from, to) in edges {
            let from = id("sheet1", from);
            if !graph.contains(&from) {
                graph.set_cell(from.clone());
            }
            graph.add_dependency(&from, id("sheet1", to));
        }
        graph
    }

    fn position(order: &[CellId], loc: &str) -> usize {
        order
            .iter()
            .position(|c| c.1 == loc)
            .unwrap_or_else(|| panic!("{} not in order", loc))
    }

    #[test]
    fn set_add_and_remove_dependencies() {
        let mut graph = DependencyGraph::new();
        let a3 = id("sheet1", "A3");
        graph.set_cell(a3.clone());
        graph.add_dependency(&a3, id("sheet1", "A1"));
        graph.add_dependency(&a3, id("sheet1", "A2"));

        assert_eq!(graph.dependencies(&a3).len(), 2);
        assert_eq!(graph.formula_cell_count(), 1);
        assert_eq!(graph.dependency_count(), 2);

        graph.remove_dependency(&a3, &id("sheet1", "A1"));
        assert_eq!(graph.dependencies(&a3), &[id("sheet1", "A2")]);

        graph.remove_cell(&a3);
        assert!(!graph.contains(&a3));
        assert!(graph.dependencies(&a3).is_empty());
    }

    #[test]
    fn remove_dependency_removes_one_occurrence() {
        let mut graph = DependencyGraph::new();
        let a1 = id("sheet1", "A1");
        graph.set_cell(a1.clone());
        graph.add_dependency(&a1, id("sheet1", "B1"));
        graph.add_dependency(&a1, id("sheet1", "B1"));
        graph.remove_dependency(&a1, &id("sheet1", "B1"));
        assert_eq!(graph.dependencies(&a1).len(), 1);
    }

    #[test]
    fn topological_order_lists_dependencies_first() {
        // A3 -> A2 -> A1
        let graph = graph_of(&[("A3", "A2"), ("A2", "A1")]);
        let result = graph.tarjan();

        assert!(position(&result.order, "A1") < position(&result.order, "A2"));
        assert!(position(&result.order, "A2") < position(&result.order, "A3"));
        assert!(result.cycle_heads.is_empty());
        assert!(result.scc_members.is_empty());
    }

    #[test]
    fn diamond_orders_join_last() {
        // A4 depends on A2 and A3, both depend on A1
        let graph = graph_of(&[("A4", "A2"), ("A4", "A3"), ("A2", "A1"), ("A3", "A1")]);
        let result = graph.tarjan();

        let a4 = position(&result.order, "A4");
        assert!(position(&result.order, "A1") < position(&result.order, "A2"));
        assert!(position(&result.order, "A2") < a4);
        assert!(position(&result.order, "A3") < a4);
    }

    #[test]
    fn detects_two_cycle() {
        let graph = graph_of(&[("A1", "A2"), ("A2", "A1")]);
        let result = graph.tarjan();

        assert!(result.scc_members.contains(&id("sheet1", "A1")));
        assert!(result.scc_members.contains(&id("sheet1", "A2")));
        assert!(!result.cycle_heads.is_empty());
    }

    #[test]
    fn detects_self_loop() {
        let graph = graph_of(&[("A1", "A1")]);
        let result = graph.tarjan();
        assert!(result.scc_members.contains(&id("sheet1", "A1")));
    }

    #[test]
    fn nodes_outside_the_cycle_stay_clean() {
        // A3 -> A1 <-> A2, and A4 -> A3; only A1/A2 are members
        let graph = graph_of(&[("A1", "A2"), ("A2", "A1"), ("A3", "A1"), ("A4", "A3")]);
        let result = graph.tarjan();

        assert!(result.scc_members.contains(&id("sheet1", "A1")));
        assert!(result.scc_members.contains(&id("sheet1", "A2")));
        assert!(!result.scc_members.contains(&id("sheet1", "A3")));
        assert!(!result.scc_members.contains(&id("sheet1", "A4")));
        // The cycle members come before the cells that point at them
        assert!(position(&result.order, "A1") < position(&result.order, "A3"));
        assert!(position(&result.order, "A3") < position(&result.order, "A4"));
    }

    #[test]
    fn order_includes_non_source_destinations() {
        // B1 is not a formula cell, but appears in the order as a leaf
        let graph = graph_of(&[("A1", "B1")]);
        let result = graph.tarjan();
        assert!(position(&result.order, "B1") < position(&result.order, "A1"));
    }

    #[test]
    fn order_is_deterministic() {
        let build = || {
            graph_of(&[
                ("C1", "B1"),
                ("B1", "A1"),
                ("D1", "A1"),
                ("E1", "C1"),
                ("E1", "D1"),
            ])
        };
        let first = build().tarjan().order;
        for _ in 0..5 {
            assert_eq!(build().tarjan().order, first);
        }
    }

    #[test]
    fn rename_rewrites_keys_edges_and_reports_referencers() {
        let mut graph = DependencyGraph::new();
        let local = id("other", "A1");
        graph.set_cell(local.clone());
        graph.add_dependency(&local, id("old", "B1"));

        let on_old = id("old", "C1");
        graph.set_cell(on_old.clone());
        graph.add_dependency(&on_old, id("old", "B1"));

        let unrelated = id("other", "D1");
        graph.set_cell(unrelated.clone());
        graph.add_dependency(&unrelated, id("other", "E1"));

        let referencing = graph.rename_sheet("old", "new");

        assert!(graph.contains(&id("new", "C1")));
        assert!(!graph.contains(&on_old));
        assert_eq!(graph.dependencies(&local), &[id("new", "B1")]);
        assert_eq!(graph.dependencies(&id("new", "C1")), &[id("new", "B1")]);
        assert_eq!(graph.dependencies(&unrelated), &[id("other", "E1")]);

        assert!(referencing.contains(&local));
        assert!(referencing.contains(&id("new", "C1")));
        assert!(!referencing.contains(&unrelated));
    }
}
