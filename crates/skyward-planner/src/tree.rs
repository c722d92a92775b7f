//! Look-ahead tree search.
//!
//! Grows a best-first tree of candidate positions from the vehicle toward
//! the goal. Each expanded node sees the fused cloud from its own position,
//! builds a coarse cost matrix and spawns children along its cheapest
//! directions. The path from the best node back to the root is retained
//! between cycles so that the vehicle keeps flying the same way while the
//! path stays valid, see [`get_direction_from_tree`].
//!
//! Nodes live in an arena (`Vec<TreeNode>`); a node's `origin` is the arena
//! index of its parent and the root is its own origin.

use crate::cost::{CostParameters, get_best_candidates_from_cost_matrix, get_cost_matrix};
use serde::{Deserialize, Serialize};
use skyward_perception::fusion::{AgedPoint, voxel_downsample};
use skyward_perception::histogram::{Histogram, generate_new_histogram};
use skyward_perception::polar::{ALPHA_RES, cartesian_to_polar, polar_to_cartesian};
use skyward_types::{PlannerError, PolarPoint, Vec3};
use std::time::{Duration, Instant};
use tracing::debug;

/// Tuning of the tree search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParameters {
    /// Distance between a node and each of its children (m).
    pub node_distance: f32,
    /// Maximum number of node expansions per cycle.
    pub max_expanded_nodes: usize,
    /// Children spawned per expansion.
    pub children_per_node: usize,
    /// A node this close to the goal ends the search (m).
    pub goal_tolerance: f32,
    /// Weight of the straight-line goal distance in the node priority.
    pub tree_heuristic_weight: f32,
    /// Smoothing radius of the per-node coarse cost matrix (bins).
    pub smoothing_radius: usize,
    /// A retained path is abandoned once the vehicle is farther than this
    /// from the path segment it is following (m).
    pub max_path_deviation: f32,
    /// Voxel edge used to thin the cloud the per-node histograms are built
    /// from (m). `0` uses every point.
    pub voxel_size: f32,
    /// Wall-clock budget for one build (ms). No further node is expanded once
    /// it is spent. `0` disables the budget.
    pub max_build_ms: u64,
}

impl Default for TreeParameters {
    fn default() -> Self {
        Self {
            node_distance: 1.0,
            max_expanded_nodes: 40,
            children_per_node: 4,
            goal_tolerance: 0.5,
            tree_heuristic_weight: 35.0,
            smoothing_radius: 2,
            max_path_deviation: 3.0,
            voxel_size: 0.1,
            max_build_ms: 40,
        }
    }
}

/// One node of the look-ahead tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeNode {
    pub position: Vec3,
    /// Arena index of the parent; the root points at itself.
    pub origin: usize,
    /// Accumulated candidate cost from the root.
    pub total_cost: f32,
    /// Straight-line distance to the goal.
    pub heuristic: f32,
    pub depth: usize,
}

impl TreeNode {
    fn priority(&self, weight: f32) -> f32 {
        self.total_cost + weight * self.heuristic
    }
}

/// Best-first look-ahead planner. Holds the tree of the last build and the
/// path extracted from it.
#[derive(Debug, Clone)]
pub struct TreeSearchPlanner {
    params: TreeParameters,
    cost_params: CostParameters,
    tree: Vec<TreeNode>,
    closed_set: Vec<usize>,
    path_node_positions: Vec<Vec3>,
}

impl TreeSearchPlanner {
    pub fn new(params: TreeParameters, cost_params: CostParameters) -> Self {
        Self {
            params,
            cost_params,
            tree: Vec::new(),
            closed_set: Vec::new(),
            path_node_positions: Vec::new(),
        }
    }

    pub fn params(&self) -> &TreeParameters {
        &self.params
    }

    /// Grow a new tree from `position` toward `goal` through `cloud`.
    ///
    /// The search stops at the first expanded node within `goal_tolerance`
    /// of the goal, or when `max_expanded_nodes` or `max_build_ms` is used
    /// up, in which case the open node with the best priority is taken. The
    /// result is available from [`Self::path_node_positions`].
    pub fn build_look_ahead_tree(
        &mut self,
        cloud: &[AgedPoint],
        position: Vec3,
        goal: Vec3,
        heading: f32,
        last_waypoint: Vec3,
    ) -> Result<(), PlannerError> {
        self.tree.clear();
        self.closed_set.clear();
        self.path_node_positions.clear();

        self.tree.push(TreeNode {
            position,
            origin: 0,
            total_cost: 0.0,
            heuristic: position.distance(goal),
            depth: 0,
        });
        let mut closed = vec![false];
        let mut reached = None;
        let weight = self.params.tree_heuristic_weight;
        let step = self.params.node_distance;
        let started = Instant::now();
        let budget = Duration::from_millis(self.params.max_build_ms);
        let points = voxel_downsample(cloud.iter().map(|p| p.position), self.params.voxel_size);

        while self.closed_set.len() < self.params.max_expanded_nodes {
            if self.params.max_build_ms > 0
                && !self.closed_set.is_empty()
                && started.elapsed() >= budget
            {
                debug!(expanded = self.closed_set.len(), "tree build budget spent");
                break;
            }
            let Some(idx) = best_open_node(&self.tree, &closed, weight) else {
                break;
            };
            closed[idx] = true;
            self.closed_set.push(idx);

            let node = self.tree[idx];
            if node.heuristic < self.params.goal_tolerance {
                reached = Some(idx);
                break;
            }

            let (node_heading, node_last_waypoint) = if idx == 0 {
                (heading, last_waypoint)
            } else {
                let parent = self.tree[node.origin].position;
                let travel = node.position - parent;
                (cartesian_to_polar(node.position, parent).z, node.position + travel)
            };

            let mut histogram = Histogram::new(ALPHA_RES);
            generate_new_histogram(&mut histogram, points.iter().copied(), node.position);
            histogram.downsample()?;

            let (matrix, _) = get_cost_matrix(
                &histogram,
                goal,
                node.position,
                node_heading,
                node_last_waypoint,
                &self.cost_params,
                self.params.smoothing_radius,
            );

            for candidate in get_best_candidates_from_cost_matrix(&matrix, self.params.children_per_node) {
                let obstacle = histogram.get_dist(candidate.e_idx, candidate.z_idx);
                if obstacle > 0.0 && obstacle < step {
                    continue;
                }
                let direction = candidate.to_polar(histogram.resolution(), step);
                let child = polar_to_cartesian(direction, node.position);
                self.tree.push(TreeNode {
                    position: child,
                    origin: idx,
                    total_cost: node.total_cost + candidate.cost,
                    heuristic: child.distance(goal),
                    depth: node.depth + 1,
                });
                closed.push(false);
            }
        }

        let best = reached
            .or_else(|| best_open_node(&self.tree, &closed, weight))
            .unwrap_or(0);
        if best != 0 {
            let mut idx = best;
            while idx != 0 {
                self.path_node_positions.push(self.tree[idx].position);
                idx = self.tree[idx].origin;
            }
            self.path_node_positions.push(self.tree[0].position);
        }

        debug!(
            points = points.len(),
            elapsed_ms = started.elapsed().as_secs_f32() * 1000.0,
            nodes = self.tree.len(),
            expanded = self.closed_set.len(),
            reached_goal = reached.is_some(),
            path_len = self.path_node_positions.len(),
            "look-ahead tree built"
        );
        Ok(())
    }

    /// Node positions from the best node back to the root (goal end first).
    /// Empty when no path was found.
    pub fn path_node_positions(&self) -> &[Vec3] {
        &self.path_node_positions
    }

    /// Every node of the last build.
    pub fn tree(&self) -> &[TreeNode] {
        &self.tree
    }

    /// Arena indices of expanded nodes, in expansion order.
    pub fn closed_set(&self) -> &[usize] {
        &self.closed_set
    }
}

fn best_open_node(tree: &[TreeNode], closed: &[bool], weight: f32) -> Option<usize> {
    tree.iter()
        .enumerate()
        .filter(|(i, n)| !closed[*i] && n.position.is_finite())
        .min_by(|(_, a), (_, b)| a.priority(weight).total_cmp(&b.priority(weight)))
        .map(|(i, _)| i)
}

/// Direction to keep following a retained tree `path` (goal end first).
///
/// Projects `position` onto the path segment next to its nearest node and
/// returns the direction toward the point the same fraction of a segment
/// further toward the goal. The returned range is the distance to `goal`.
///
/// Returns `None` when the path has fewer than two nodes, when the vehicle
/// is already nearest the goal end, or when it has drifted farther than
/// `max_path_deviation` from the segment between its two nearest nodes.
pub fn get_direction_from_tree(
    path: &[Vec3],
    position: Vec3,
    goal: Vec3,
    max_path_deviation: f32,
) -> Option<PolarPoint> {
    let size = path.len();
    if size < 2 {
        return None;
    }

    let dist: Vec<f32> = path.iter().map(|n| n.distance(position)).collect();
    let (min_idx, _) = dist
        .iter()
        .copied()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))?;

    if min_idx == 0 {
        return None;
    }
    let second = if min_idx == size - 1 {
        size - 2
    } else if dist[min_idx - 1] < dist[min_idx + 1] {
        min_idx - 1
    } else {
        min_idx + 1
    };

    let wp = min_idx.min(second);
    if distance_to_segment(position, path[wp], path[wp + 1]) > max_path_deviation {
        return None;
    }
    let target = if wp == 0 {
        path[0]
    } else {
        let seg = path[wp].distance(path[wp + 1]);
        let l_frac = if seg > f32::EPSILON && dist[wp] > f32::EPSILON {
            let cos_alpha = (seg * seg + dist[wp] * dist[wp] - dist[wp + 1] * dist[wp + 1])
                / (2.0 * seg * dist[wp]);
            (dist[wp] * cos_alpha / seg).clamp(0.0, 1.0)
        } else {
            0.0
        };
        path[wp - 1].lerp(path[wp], l_frac)
    };

    let direction = cartesian_to_polar(target, position);
    Some(PolarPoint::new(direction.e, direction.z, position.distance(goal)))
}

/// Distance from `p` to the segment `a`–`b`.
fn distance_to_segment(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.dot(ab);
    if len_sq <= f32::EPSILON {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
