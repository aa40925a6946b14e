//! Exact pickup sequencing.
//!
//! Artificial nodes cost nothing, so the cheapest route is the cheapest
//! Hamiltonian path over the pickups from the start to the end depot, with
//! each delivery slotted in after its last pickup. Small batches are solved
//! by Held-Karp dynamic programming, larger ones by depth-first branch and
//! bound under the time limit.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{RouteOutcome, RoutingGraph, warn_on_budget};
use crate::traits::{RouteSolver, SolveStatus};

const DEADLINE_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone)]
pub struct ExactTsp {
    node_limit: usize,
}

impl ExactTsp {
    pub fn new(node_limit: usize) -> Self {
        // dp tables grow as 2^n; 20 pickups is already 20M cells
        Self {
            node_limit: node_limit.min(20),
        }
    }

    fn held_karp(&self, graph: &RoutingGraph, pickups: &[usize]) -> (Vec<usize>, f64) {
        let k = pickups.len();
        if k == 0 {
            return (Vec::new(), graph.cost(graph.start(), graph.end()));
        }

        let full = (1usize << k) - 1;
        let mut dp = vec![f64::INFINITY; (full + 1) * k];
        let mut parent = vec![usize::MAX; (full + 1) * k];
        for (j, &node) in pickups.iter().enumerate() {
            dp[(1 << j) * k + j] = graph.cost(graph.start(), node);
        }

        for mask in 1..=full {
            for last in 0..k {
                let here = dp[mask * k + last];
                if mask & (1 << last) == 0 || !here.is_finite() {
                    continue;
                }
                for next in (0..k).filter(|&next| mask & (1 << next) == 0) {
                    let to = (mask | (1 << next)) * k + next;
                    let cost = here + graph.cost(pickups[last], pickups[next]);
                    if cost < dp[to] {
                        dp[to] = cost;
                        parent[to] = last;
                    }
                }
            }
        }

        let (mut last, mut best) = (0, f64::INFINITY);
        for j in 0..k {
            let cost = dp[full * k + j] + graph.cost(pickups[j], graph.end());
            if cost < best {
                best = cost;
                last = j;
            }
        }

        let mut order = Vec::with_capacity(k);
        let mut mask = full;
        while last != usize::MAX {
            order.push(pickups[last]);
            let prev = parent[mask * k + last];
            mask &= !(1 << last);
            last = prev;
        }
        order.reverse();

        (order, best)
    }
}

impl RouteSolver for ExactTsp {
    fn solve(
        &self,
        graph: &RoutingGraph,
        seed: Option<&[usize]>,
        time_limit: Duration,
    ) -> RouteOutcome {
        let pickups = graph.pickups();

        let (order, status) = if pickups.len() <= self.node_limit {
            let (order, _) = self.held_karp(graph, &pickups);
            (order, SolveStatus::Optimal)
        } else {
            let mut search = BranchAndBound::new(graph, &pickups, Instant::now() + time_limit);
            if let Some(seed) = seed.filter(|seed| graph.is_pickup_permutation(seed)) {
                search.offer(seed.to_vec());
            }
            let started = Instant::now();
            let complete = search.run();
            warn_on_budget(started.elapsed(), time_limit, "exact routing");
            let status = if complete {
                SolveStatus::Optimal
            } else {
                SolveStatus::Feasible
            };
            (search.best, status)
        };

        let sequence = graph.complete(&order);
        let cost = graph.sequence_cost(&sequence);
        debug!(pickups = pickups.len(), cost, ?status, "exact route");

        RouteOutcome {
            status,
            sequence,
            cost,
        }
    }
}

struct BranchAndBound<'g> {
    graph: &'g RoutingGraph,
    pickups: &'g [usize],
    deadline: Instant,
    nodes: u64,
    timed_out: bool,
    best: Vec<usize>,
    best_cost: f64,
}

impl<'g> BranchAndBound<'g> {
    fn new(graph: &'g RoutingGraph, pickups: &'g [usize], deadline: Instant) -> Self {
        let mut search = Self {
            graph,
            pickups,
            deadline,
            nodes: 0,
            timed_out: false,
            best: Vec::new(),
            best_cost: f64::INFINITY,
        };
        search.offer(search.nearest_neighbour());
        search
    }

    fn offer(&mut self, order: Vec<usize>) {
        let cost = self.graph.path_cost(&order);
        if cost < self.best_cost {
            trace!(cost, "new incumbent");
            self.best_cost = cost;
            self.best = order;
        }
    }

    fn nearest_neighbour(&self) -> Vec<usize> {
        let mut left = self.pickups.to_vec();
        let mut order = Vec::with_capacity(left.len());
        let mut at = self.graph.start();
        while !left.is_empty() {
            let (idx, _) = left
                .iter()
                .enumerate()
                .map(|(idx, &node)| (idx, self.graph.cost(at, node)))
                .fold((0, f64::INFINITY), |acc, cur| if cur.1 < acc.1 { cur } else { acc });
            at = left.swap_remove(idx);
            order.push(at);
        }
        order
    }

    /// Every unvisited node and the end depot must still be entered once.
    fn bound(&self, last: usize, left: &[usize]) -> f64 {
        let g = self.graph;
        let entry = |target: usize| {
            std::iter::once(last)
                .chain(left.iter().copied())
                .filter(|&from| from != target)
                .map(|from| g.cost(from, target))
                .fold(f64::INFINITY, f64::min)
        };
        left.iter().map(|&node| entry(node)).sum::<f64>() + entry(g.end())
    }

    /// Returns whether the search space was exhausted.
    fn run(&mut self) -> bool {
        let mut path = Vec::with_capacity(self.pickups.len());
        let left = self.pickups.to_vec();
        self.descend(&mut path, left, 0.0);
        !self.timed_out
    }

    fn descend(&mut self, path: &mut Vec<usize>, left: Vec<usize>, cost: f64) {
        if self.timed_out {
            return;
        }
        self.nodes += 1;
        if self.nodes % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            self.timed_out = true;
            return;
        }

        let last = path.last().copied().unwrap_or(self.graph.start());
        if left.is_empty() {
            let total = cost + self.graph.cost(last, self.graph.end());
            if total < self.best_cost {
                self.best_cost = total;
                self.best = path.clone();
            }
            return;
        }
        if cost + self.bound(last, &left) >= self.best_cost {
            return;
        }

        let mut children: Vec<(usize, f64)> = left
            .iter()
            .map(|&node| (node, self.graph.cost(last, node)))
            .collect();
        children.sort_by(|a, b| a.1.total_cmp(&b.1));

        for (node, step) in children {
            let rest: Vec<usize> = left.iter().copied().filter(|&n| n != node).collect();
            path.push(node);
            self.descend(path, rest, cost + step);
            path.pop();
        }
    }
}

/// Arc-flow view of a route: one commodity per non-start node, each sent
/// from the start along the chosen arcs. A route certifies when every
/// commodity reaches its node, which rules out subtours.
#[derive(Debug)]
pub struct MultiCommodityFlow<'g> {
    graph: &'g RoutingGraph,
}

impl<'g> MultiCommodityFlow<'g> {
    pub fn new(graph: &'g RoutingGraph) -> Self {
        Self { graph }
    }

    /// Chosen arcs `(from, to)` of a closed sequence.
    pub fn arcs(&self, sequence: &[usize]) -> Vec<(usize, usize)> {
        sequence.windows(2).map(|pair| (pair[0], pair[1])).collect()
    }

    /// Whether each node has one outgoing and one incoming arc, except the
    /// depots, and every commodity can be routed from the start.
    pub fn certify(&self, sequence: &[usize]) -> bool {
        let n = self.graph.len();
        let (start, end) = (self.graph.start(), self.graph.end());
        let mut successor = vec![None; n];
        let mut indegree = vec![0usize; n];

        for (from, to) in self.arcs(sequence) {
            if from >= n || to >= n || successor[from].is_some() {
                return false;
            }
            successor[from] = Some(to);
            indegree[to] += 1;
        }

        let balanced = (0..n).all(|node| {
            let out = usize::from(successor[node].is_some());
            match node {
                _ if node == start => out == 1 && indegree[node] == 0,
                _ if node == end => out == 0 && indegree[node] == 1,
                _ => out == 1 && indegree[node] == 1,
            }
        });
        if !balanced {
            return false;
        }

        // hop count from the start to each node along the arcs
        let mut depth = vec![None; n];
        let mut at = start;
        let mut hops = 0;
        depth[at] = Some(hops);
        while let Some(next) = successor[at] {
            if depth[next].is_some() {
                return false;
            }
            hops += 1;
            depth[next] = Some(hops);
            at = next;
        }

        depth.iter().all(Option::is_some)
    }
}
