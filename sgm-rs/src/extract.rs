//! Minutiae extraction: runs the binarized ridge map through thinning and
//! tracing, cleans the skeleton graph with a fixed sequence of pruning
//! passes, and resolves the surviving nodes into a template.

use std::collections::{HashSet, VecDeque};

use libm::roundf;
use log::debug;
use template_manager::fingerprint_base as fpb;
use template_manager::fingerprint_base::Point;
use template_manager::template::{Minutia, MinutiaKind, Template};

use crate::binary::BinaryMap;
use crate::constants::*;
use crate::skeleton::{self, NodeId, RidgeView, Skeleton};

/// Extracts a minutiae template from a binarized ridge map. The whole
/// pipeline is deterministic: the same map always yields the same template.
pub fn extract(map: &BinaryMap) -> Template {
    let thinned = skeleton::thin(map);
    let mut graph = skeleton::trace(&thinned);

    remove_dots(&mut graph);
    remove_islands(&mut graph);
    close_gaps(&mut graph);
    remove_spurs(&mut graph);
    remove_bridges(&mut graph);

    let minutiae = resolve(&graph);
    debug!(
        "extracted {} minutiae from {}x{} map",
        minutiae.len(),
        map.width(),
        map.height()
    );
    Template {
        size: graph.size,
        minutiae,
    }
}

//
// --- Pruning ------------------------------------------------------------------------------------
//

/// Drops tiny standalone fragments: a single ridge whose both endpoints are
/// endings and whose point count is below the dot threshold, plus any node
/// left without ridges by earlier stages.
fn remove_dots(graph: &mut Skeleton) {
    let mut removed = 0;
    let ridges: Vec<_> = graph.ridge_ids().collect();
    for ridge in ridges {
        let (a, b) = match (graph.start(ridge), graph.end(ridge)) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        if graph.degree(a) == 1
            && graph.degree(b) == 1
            && graph.points_len(ridge) < DOT_MAX_POINTS
        {
            graph.remove_ridge(ridge);
            graph.remove_node(a);
            graph.remove_node(b);
            removed += 1;
        }
    }
    let stray: Vec<NodeId> = graph.node_ids().filter(|&id| graph.degree(id) == 0).collect();
    for id in &stray {
        graph.remove_node(*id);
    }
    debug!("pruned {} dots, {} stray nodes", removed, stray.len());
}

/// Drops connected components whose total ridge length is below the island
/// threshold. Such fragments are scanner noise, not ridge structure.
fn remove_islands(graph: &mut Skeleton) {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut removed = 0;
    let roots: Vec<NodeId> = graph.node_ids().collect();
    for root in roots {
        if visited.contains(&root) {
            continue;
        }
        let mut component = Vec::new();
        let mut component_ridges: HashSet<usize> = HashSet::new();
        let mut queue = VecDeque::from([root]);
        visited.insert(root);
        while let Some(id) = queue.pop_front() {
            component.push(id);
            for &ridge in graph.node(id).ridges() {
                component_ridges.insert(ridge.index);
                if let Some(other) = graph.end(ridge) {
                    if visited.insert(other) {
                        queue.push_back(other);
                    }
                }
            }
        }
        let forward = |index: usize| RidgeView {
            index,
            reversed: false,
        };
        let total: usize = component_ridges
            .iter()
            .map(|&index| graph.points_len(forward(index)))
            .sum();
        if total < ISLAND_MIN_POINTS {
            for &index in &component_ridges {
                graph.remove_ridge(forward(index));
            }
            for id in component {
                graph.remove_node(id);
            }
            removed += 1;
        }
    }
    debug!("pruned {} islands", removed);
}

/// Reconnects ridge breaks: pairs of endings that are close, whose ridges
/// run along roughly opposite orientations, and whose gap continues both
/// ridges, get joined by a straight interpolated ridge.
fn close_gaps(graph: &mut Skeleton) {
    let endings: Vec<NodeId> = graph.node_ids().filter(|&id| graph.degree(id) == 1).collect();
    let mut closed = 0;
    for i in 0..endings.len() {
        for j in i + 1..endings.len() {
            let (a, b) = (endings[i], endings[j]);
            // an earlier closure in this pass may have consumed either end
            if graph.degree(a) != 1 || graph.degree(b) != 1 {
                continue;
            }
            let pa = graph.node(a).position;
            let pb = graph.node(b).position;
            let gap = pa.distance_to(&pb);
            if gap <= 0.0 || gap > GAP_MAX_DISTANCE {
                continue;
            }
            // direction from the ending into its ridge
            let dir_a = graph.direction(graph.node(a).ridges()[0]);
            let dir_b = graph.direction(graph.node(b).ridges()[0]);
            if fpb::orientation_distance(dir_a, dir_b) > GAP_MAX_ORIENTATION_SKEW {
                continue;
            }
            // the gap must continue ridge a and flow into ridge b
            let gap_direction = pa.angle_to(&pb);
            if fpb::distance(gap_direction, fpb::opposite(dir_a)) > GAP_MAX_OFFSET_ANGLE
                || fpb::distance(gap_direction, dir_b) > GAP_MAX_OFFSET_ANGLE
            {
                continue;
            }
            let ridge = graph.create_ridge(interpolate(pa, pb));
            graph.connect(ridge, a, b);
            closed += 1;
        }
    }
    debug!("closed {} gaps", closed);
}

/// Straight point sequence from `a` to `b` inclusive, one step per pixel
/// along the longer axis.
fn interpolate(a: Point, b: Point) -> Vec<Point> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let steps = dx.abs().max(dy.abs());
    (0..=steps)
        .map(|k| {
            let t = k as f32 / steps as f32;
            Point::new(
                a.x + roundf(dx as f32 * t) as i32,
                a.y + roundf(dy as f32 * t) as i32,
            )
        })
        .collect()
}

/// Drops short offshoots hanging off junctions. Removing one spur can
/// expose another, so this runs to fixpoint.
fn remove_spurs(graph: &mut Skeleton) {
    let mut removed = 0;
    loop {
        let mut changed = false;
        let ridges: Vec<_> = graph.ridge_ids().collect();
        for ridge in ridges {
            let (a, b) = match (graph.start(ridge), graph.end(ridge)) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            if graph.points_len(ridge) >= SPUR_MAX_POINTS {
                continue;
            }
            let tip = if graph.degree(a) == 1 && graph.degree(b) >= 3 {
                a
            } else if graph.degree(b) == 1 && graph.degree(a) >= 3 {
                b
            } else {
                continue;
            };
            graph.remove_ridge(ridge);
            graph.remove_node(tip);
            removed += 1;
            changed = true;
        }
        if !changed {
            break;
        }
    }
    debug!("pruned {} spurs", removed);
}

/// Drops short ridges connecting two junctions. Degrees are read live, so a
/// junction downgraded by an earlier removal in this pass is no longer
/// eligible.
fn remove_bridges(graph: &mut Skeleton) {
    let mut removed = 0;
    let ridges: Vec<_> = graph.ridge_ids().collect();
    for ridge in ridges {
        let (a, b) = match (graph.start(ridge), graph.end(ridge)) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        if graph.degree(a) >= 3 && graph.degree(b) >= 3 && graph.points_len(ridge) < BRIDGE_MAX_POINTS
        {
            graph.remove_ridge(ridge);
            removed += 1;
        }
    }
    debug!("pruned {} bridges", removed);
}

//
// --- Resolution ---------------------------------------------------------------------------------
//

/// Turns surviving skeleton nodes into minutiae. Degree-1 nodes become
/// endings directed along their ridge; degree-3-plus nodes become
/// bifurcations directed along the stem, the incident ridge angularly
/// farthest from all the others. Degree-2 knots are pass-through remnants
/// of pruning and yield nothing.
fn resolve(graph: &Skeleton) -> Vec<Minutia> {
    let mut minutiae = Vec::new();
    for id in graph.node_ids() {
        let node = graph.node(id);
        match node.degree() {
            1 => minutiae.push(Minutia {
                position: node.position,
                direction: graph.direction(node.ridges()[0]),
                kind: MinutiaKind::Ending,
            }),
            d if d >= 3 => {
                let directions: Vec<f32> =
                    node.ridges().iter().map(|&r| graph.direction(r)).collect();
                let mut stem = 0;
                let mut stem_spread = -1.0f32;
                for (i, &di) in directions.iter().enumerate() {
                    let spread: f32 = directions
                        .iter()
                        .enumerate()
                        .filter(|&(j, _)| j != i)
                        .map(|(_, &dj)| fpb::distance(di, dj))
                        .sum();
                    // strict comparison keeps the first ridge on ties
                    if spread > stem_spread {
                        stem_spread = spread;
                        stem = i;
                    }
                }
                minutiae.push(Minutia {
                    position: node.position,
                    direction: directions[stem],
                    kind: MinutiaKind::Bifurcation,
                });
            }
            _ => {}
        }
    }

    minutiae.sort_by_key(|m| {
        (
            m.position.y,
            m.position.x,
            m.direction.to_bits(),
            m.kind as u8,
        )
    });
    // drop near-duplicates, keeping the first in sort order
    let mut distinct: Vec<Minutia> = Vec::new();
    for m in minutiae {
        if distinct
            .iter()
            .all(|kept| kept.position.distance_to(&m.position) >= MIN_DISTINCT_DISTANCE)
        {
            distinct.push(m);
        }
    }
    distinct
}

//
// --- Tests --------------------------------------------------------------------------------------
//
