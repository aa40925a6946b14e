//! Order-to-batch assignment model and its exact solver.
//!
//! Two objectives share one search:
//!
//! * [`AssignmentObjective::Representative`]: location-allocation. Each
//!   group opens one of its orders as representative and scores the
//!   closeness of every member to it. A group may hold at most `n - p + 1`
//!   orders, which is the linking constraint of the p-median formulation.
//! * [`AssignmentObjective::Pairwise`]: graph partitioning. A group scores
//!   the closeness of every ordered pair of its members.
//!
//! Both maximize the total score under volume and count capacity with at
//! most `max_groups` groups.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::model::Capacity;
use crate::proximity::ClosenessMatrix;
use crate::traits::{AssignmentSolver, SolveStatus};

/// How often the deadline is checked, in search nodes.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentObjective {
    Representative,
    Pairwise,
}

#[derive(Debug, Clone)]
pub struct AssignmentProblem {
    pub closeness: ClosenessMatrix,
    pub volumes: Vec<u32>,
    pub capacity: Capacity,
    pub max_groups: usize,
    pub objective: AssignmentObjective,
}

impl AssignmentProblem {
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Largest group the model admits.
    pub fn max_group_size(&self) -> usize {
        let by_model = match self.objective {
            AssignmentObjective::Representative => {
                (self.len() + 1).saturating_sub(self.max_groups).max(1)
            }
            AssignmentObjective::Pairwise => self.len(),
        };
        by_model.min(self.capacity.nb_orders)
    }

    /// Score of a single group of order indices.
    pub fn group_value(&self, members: &[usize]) -> f64 {
        match self.objective {
            AssignmentObjective::Representative => members
                .iter()
                .map(|&r| members.iter().map(|&j| self.closeness.get(r, j)).sum::<f64>())
                .fold(0.0, f64::max),
            AssignmentObjective::Pairwise => members
                .iter()
                .flat_map(|&i| members.iter().map(move |&j| (i, j)))
                .filter(|(i, j)| i != j)
                .map(|(i, j)| self.closeness.get(i, j))
                .sum(),
        }
    }

    pub fn value(&self, groups: &[Vec<usize>]) -> f64 {
        groups.iter().map(|group| self.group_value(group)).sum()
    }

    /// Whether `groups` is a capacity-respecting partition of all orders.
    pub fn is_feasible(&self, groups: &[Vec<usize>]) -> bool {
        if groups.len() > self.max_groups {
            return false;
        }

        let mut seen = vec![false; self.len()];
        for group in groups {
            let volume: u64 = group.iter().map(|&j| self.volumes[j] as u64).sum();
            if group.len() > self.max_group_size() || volume > self.capacity.volume as u64 {
                return false;
            }
            for &j in group {
                if j >= seen.len() || seen[j] {
                    return false;
                }
                seen[j] = true;
            }
        }

        seen.into_iter().all(|assigned| assigned)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentOutcome {
    pub status: SolveStatus,
    /// Non-empty groups of order indices.
    pub groups: Vec<Vec<usize>>,
    pub value: f64,
}

impl AssignmentOutcome {
    fn without_solution(status: SolveStatus) -> Self {
        Self {
            status,
            groups: Vec::new(),
            value: 0.0,
        }
    }
}

/// Depth-first branch-and-bound over canonical set partitions.
///
/// Orders are placed one at a time, largest volume first, into an open
/// group or a new one. Partial solutions are pruned on capacity and on an
/// optimistic bound of the score the unplaced orders can still add. When
/// the time limit expires the best incumbent is returned as `Feasible`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchAndBound;

impl AssignmentSolver for BranchAndBound {
    fn solve(&self, problem: &AssignmentProblem, time_limit: Duration) -> AssignmentOutcome {
        if problem.is_empty() {
            return AssignmentOutcome {
                status: SolveStatus::Optimal,
                groups: Vec::new(),
                value: 0.0,
            };
        }
        if problem.max_groups == 0 {
            return AssignmentOutcome::without_solution(SolveStatus::Infeasible);
        }

        let mut search = Search::new(problem, Instant::now() + time_limit);
        search.explore(0);

        debug!(
            nodes = search.nodes,
            timed_out = search.timed_out,
            found = search.best.is_some(),
            "assignment search finished"
        );

        match (search.best, search.timed_out) {
            (Some((value, groups)), timed_out) => AssignmentOutcome {
                status: if timed_out {
                    SolveStatus::Feasible
                } else {
                    SolveStatus::Optimal
                },
                groups,
                value,
            },
            (None, true) => AssignmentOutcome::without_solution(SolveStatus::Timeout),
            (None, false) => AssignmentOutcome::without_solution(SolveStatus::Infeasible),
        }
    }
}

struct Group {
    members: Vec<usize>,
    volume: u64,
    value: f64,
}

struct Search<'a> {
    problem: &'a AssignmentProblem,
    deadline: Instant,
    /// Placement order of the orders.
    sequence: Vec<usize>,
    /// Optimistic score still available from `sequence[k..]`.
    bound_suffix: Vec<f64>,
    volume_suffix: Vec<u64>,
    group_size: usize,
    groups: Vec<Group>,
    value: f64,
    best: Option<(f64, Vec<Vec<usize>>)>,
    nodes: u64,
    timed_out: bool,
}

impl<'a> Search<'a> {
    fn new(problem: &'a AssignmentProblem, deadline: Instant) -> Self {
        let n = problem.len();
        let mut sequence: Vec<usize> = (0..n).collect();
        sequence.sort_by(|a, b| problem.volumes[*b].cmp(&problem.volumes[*a]).then(a.cmp(b)));

        let closeness = &problem.closeness;
        let group_size = problem.max_group_size();
        let gains: Vec<f64> = sequence
            .iter()
            .enumerate()
            .map(|(k, &j)| match problem.objective {
                AssignmentObjective::Representative => representative_gain(closeness, j, group_size),
                AssignmentObjective::Pairwise => sequence[..k]
                    .iter()
                    .map(|&m| closeness.get(m, j) + closeness.get(j, m))
                    .sum(),
            })
            .collect();

        let mut bound_suffix = vec![0.0; n + 1];
        let mut volume_suffix = vec![0; n + 1];
        for k in (0..n).rev() {
            bound_suffix[k] = bound_suffix[k + 1] + gains[k];
            volume_suffix[k] = volume_suffix[k + 1] + problem.volumes[sequence[k]] as u64;
        }

        Self {
            problem,
            deadline,
            sequence,
            bound_suffix,
            volume_suffix,
            group_size,
            groups: Vec::new(),
            value: 0.0,
            best: None,
            nodes: 0,
            timed_out: false,
        }
    }

    fn explore(&mut self, k: usize) {
        if self.timed_out {
            return;
        }

        self.nodes += 1;
        if self.nodes % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            self.timed_out = true;
            return;
        }

        if k == self.sequence.len() {
            let improves = self.best.as_ref().is_none_or(|(best, _)| self.value > *best);
            if improves {
                let groups = self.groups.iter().map(|g| g.members.clone()).collect();
                self.best = Some((self.value, groups));
            }
            return;
        }

        if let Some((best, _)) = &self.best {
            if self.value + self.bound_suffix[k] <= *best {
                return;
            }
        }
        if !self.remaining_fits(k) {
            return;
        }

        let order = self.sequence[k];
        let volume = self.problem.volumes[order] as u64;
        let capacity = self.problem.capacity.volume as u64;

        let mut candidates: Vec<(usize, f64)> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.members.len() < self.group_size && g.volume + volume <= capacity)
            .map(|(idx, g)| (idx, self.gain(g, order)))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (idx, _) in candidates {
            let previous = self.groups[idx].value;
            self.groups[idx].members.push(order);
            self.groups[idx].volume += volume;
            let updated = self.problem.group_value(&self.groups[idx].members);
            self.groups[idx].value = updated;
            self.value += updated - previous;

            self.explore(k + 1);

            self.value -= updated - previous;
            self.groups[idx].value = previous;
            self.groups[idx].volume -= volume;
            self.groups[idx].members.pop();

            if self.timed_out {
                return;
            }
        }

        if self.groups.len() < self.problem.max_groups && volume <= capacity {
            self.groups.push(Group {
                members: vec![order],
                volume,
                value: 0.0,
            });
            self.explore(k + 1);
            self.groups.pop();
        }
    }

    /// Score change from adding `order` to `group`.
    fn gain(&self, group: &Group, order: usize) -> f64 {
        let mut members = group.members.clone();
        members.push(order);
        self.problem.group_value(&members) - group.value
    }

    /// Whether the unplaced orders can still fit into open and unopened groups.
    fn remaining_fits(&self, k: usize) -> bool {
        let capacity = self.problem.capacity.volume as u64;
        let unopened = (self.problem.max_groups - self.groups.len()) as u64;

        let free_volume: u64 = self
            .groups
            .iter()
            .map(|g| capacity.saturating_sub(g.volume))
            .sum::<u64>()
            + unopened * capacity;
        let free_slots: u64 = self
            .groups
            .iter()
            .map(|g| self.group_size.saturating_sub(g.members.len()) as u64)
            .sum::<u64>()
            + unopened * self.group_size as u64;

        self.volume_suffix[k] <= free_volume && (self.sequence.len() - k) as u64 <= free_slots
    }
}

/// Upper bound on the score added by placing `j` into any group.
///
/// Either the representative stays and gains `c(r, j)`, or `j` takes over
/// and scores at most its own entry plus its `group_size - 1` closest rows.
fn representative_gain(closeness: &ClosenessMatrix, j: usize, group_size: usize) -> f64 {
    let n = closeness.len();
    let joins = (0..n).filter(|&i| i != j).map(|i| closeness.get(i, j)).fold(0.0, f64::max);

    let mut row: Vec<f64> = (0..n).filter(|&m| m != j).map(|m| closeness.get(j, m)).collect();
    row.sort_by(|a, b| b.total_cmp(a));
    let takes_over = closeness.get(j, j)
        + row.iter().take(group_size.saturating_sub(1)).map(|c| c.max(0.0)).sum::<f64>();

    joins.max(takes_over)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem(rows: Vec<Vec<f64>>, volumes: Vec<u32>, capacity: Capacity, p: usize) -> AssignmentProblem {
        AssignmentProblem {
            closeness: ClosenessMatrix::from_rows(rows),
            volumes,
            capacity,
            max_groups: p,
            objective: AssignmentObjective::Representative,
        }
    }

    fn sorted(mut groups: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        for group in &mut groups {
            group.sort();
        }
        groups.sort();
        groups
    }

    #[test]
    fn test_representative_pairs_highest_scores() {
        // 0-1 and 2-3 score 5; cross pairs score 1
        let rows = vec![
            vec![0.0, 5.0, 1.0, 1.0],
            vec![5.0, 0.0, 1.0, 1.0],
            vec![1.0, 1.0, 0.0, 5.0],
            vec![1.0, 1.0, 5.0, 0.0],
        ];
        let p = problem(rows, vec![1; 4], Capacity::new(2, 2), 2);
        let outcome = BranchAndBound.solve(&p, Duration::from_secs(5));

        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(sorted(outcome.groups.clone()), vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(outcome.value, 10.0);
        assert!(p.is_feasible(&outcome.groups));
    }

    #[test]
    fn test_as_many_groups_as_orders_gives_singletons() {
        let rows = vec![vec![0.0, 9.0, 9.0], vec![9.0, 0.0, 9.0], vec![9.0, 9.0, 0.0]];
        let p = problem(rows, vec![1; 3], Capacity::new(10, 3), 3);
        let outcome = BranchAndBound.solve(&p, Duration::from_secs(5));

        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(sorted(outcome.groups), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_volume_capacity_is_respected() {
        let rows = vec![vec![0.0, 5.0, 5.0], vec![5.0, 0.0, 5.0], vec![5.0, 5.0, 0.0]];
        let mut p = problem(rows, vec![6, 5, 5], Capacity::new(10, 3), 2);
        p.objective = AssignmentObjective::Pairwise;
        let outcome = BranchAndBound.solve(&p, Duration::from_secs(5));

        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(sorted(outcome.groups), vec![vec![0], vec![1, 2]]);
        assert_eq!(outcome.value, 10.0);
    }

    #[test]
    fn test_reports_infeasible() {
        let rows = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let p = problem(rows, vec![6, 6], Capacity::new(10, 2), 1);
        let outcome = BranchAndBound.solve(&p, Duration::from_secs(5));

        assert_eq!(outcome.status, SolveStatus::Infeasible);
        assert!(outcome.groups.is_empty());
    }

    /// Best feasible value over every set partition, by exhaustive enumeration.
    fn best_partition(p: &AssignmentProblem) -> Option<f64> {
        fn enumerate(
            p: &AssignmentProblem,
            next: usize,
            groups: &mut Vec<Vec<usize>>,
            best: &mut Option<f64>,
        ) {
            if next == p.len() {
                if p.is_feasible(groups) {
                    let value = p.value(groups);
                    if best.is_none_or(|b| value > b) {
                        *best = Some(value);
                    }
                }
                return;
            }
            for idx in 0..groups.len() {
                groups[idx].push(next);
                enumerate(p, next + 1, groups, best);
                groups[idx].pop();
            }
            groups.push(vec![next]);
            enumerate(p, next + 1, groups, best);
            groups.pop();
        }

        let mut best = None;
        enumerate(p, 0, &mut Vec::new(), &mut best);
        best
    }

    #[test]
    fn test_matches_exhaustive_enumeration_on_small_instances() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        for trial in 0..300 {
            let n = rng.gen_range(3..=6);
            let mut rows = vec![vec![0.0; n]; n];
            for i in 0..n {
                for j in (i + 1)..n {
                    let c = rng.gen_range(0..10) as f64;
                    rows[i][j] = c;
                    rows[j][i] = c;
                }
            }
            let volumes: Vec<u32> = (0..n).map(|_| rng.gen_range(1..=5)).collect();
            let capacity = Capacity::new(rng.gen_range(5..=15), rng.gen_range(1..=n));
            let mut p = problem(rows, volumes, capacity, rng.gen_range(1..=n));

            for objective in [AssignmentObjective::Representative, AssignmentObjective::Pairwise] {
                p.objective = objective;
                let outcome = BranchAndBound.solve(&p, Duration::from_secs(5));

                match best_partition(&p) {
                    Some(best) => {
                        assert_eq!(outcome.status, SolveStatus::Optimal, "trial {trial}");
                        assert!(p.is_feasible(&outcome.groups), "trial {trial}");
                        assert_eq!(outcome.value, best, "trial {trial} {objective:?}");
                    }
                    None => assert_eq!(outcome.status, SolveStatus::Infeasible, "trial {trial}"),
                }
            }
        }
    }

    #[test]
    fn test_representative_bound_covers_a_new_representative() {
        // Order 3 joins {0, 1, 2} and becomes the representative
        let rows = vec![
            vec![0.0, 1.0, 1.0, 1.0],
            vec![1.0, 0.0, 0.0, 9.0],
            vec![1.0, 0.0, 0.0, 9.0],
            vec![1.0, 9.0, 9.0, 0.0],
        ];
        let p = problem(rows, vec![1; 4], Capacity::new(10, 4), 1);
        let outcome = BranchAndBound.solve(&p, Duration::from_secs(5));

        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(outcome.value, 19.0);
        assert!(representative_gain(&p.closeness, 3, 4) >= 19.0);
    }

    #[test]
    fn test_pairwise_value_counts_both_directions() {
        let rows = vec![vec![0.0, 2.0], vec![2.0, 0.0]];
        let mut p = problem(rows, vec![1, 1], Capacity::new(10, 2), 1);
        p.objective = AssignmentObjective::Pairwise;

        assert_eq!(p.group_value(&[0, 1]), 4.0);
    }
}
