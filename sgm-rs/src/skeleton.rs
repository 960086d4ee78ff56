//! Ridge-skeleton model: thinning of the binarized ridge map, the mutable
//! skeleton graph, and tracing of skeleton pixels into that graph.

use std::collections::VecDeque;

use log::debug;
use template_manager::fingerprint_base::Point;

use crate::binary::BinaryMap;
use crate::constants::*;

/// 8-neighborhood in fixed clockwise order starting north. Tracing and
/// thinning both depend on this order being stable.
const NEIGHBORS: [(isize, isize); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

pub type NodeId = usize;

/// Directed view of a ridge in the arena. The reversed view is derived: it
/// shares the ridge's point storage and swaps which endpoint is the start,
/// so the two directions can never fall out of sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RidgeView {
    pub index: usize,
    pub reversed: bool,
}

impl RidgeView {
    #[inline]
    pub fn flipped(self) -> RidgeView {
        RidgeView {
            index: self.index,
            reversed: !self.reversed,
        }
    }
}

#[derive(Debug)]
struct RidgeSlot {
    /// Points in forward orientation; reversed views index from the back.
    points: Vec<Point>,
    start: Option<NodeId>,
    end: Option<NodeId>,
}

/// Skeleton graph node: a position plus the directed ridges leaving it.
#[derive(Debug)]
pub struct SkeletonMinutia {
    pub position: Point,
    ridges: Vec<RidgeView>,
}

impl SkeletonMinutia {
    pub fn degree(&self) -> usize {
        self.ridges.len()
    }

    pub fn ridges(&self) -> &[RidgeView] {
        &self.ridges
    }
}

/// Arena-indexed skeleton graph. Nodes and ridges live in flat vectors with
/// stable ids; removal leaves a tombstone so ids never shift.
pub struct Skeleton {
    pub size: Point,
    nodes: Vec<Option<SkeletonMinutia>>,
    ridges: Vec<Option<RidgeSlot>>,
}

impl Skeleton {
    pub fn new(size: Point) -> Skeleton {
        Skeleton {
            size,
            nodes: Vec::new(),
            ridges: Vec::new(),
        }
    }

    //
    // --- Nodes ----------------------------------------------------------------------------------
    //

    pub fn add_node(&mut self, position: Point) -> NodeId {
        self.nodes.push(Some(SkeletonMinutia {
            position,
            ridges: Vec::new(),
        }));
        self.nodes.len() - 1
    }

    /// Removes a detached node. Removing a node that still has incident
    /// ridges is a programming error.
    pub fn remove_node(&mut self, id: NodeId) {
        let node = self.nodes[id].take().expect("node already removed");
        assert!(node.ridges.is_empty(), "removing node with incident ridges");
    }

    pub fn node(&self, id: NodeId) -> &SkeletonMinutia {
        self.nodes[id].as_ref().expect("node was removed")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut SkeletonMinutia {
        self.nodes[id].as_mut().expect("node was removed")
    }

    pub fn degree(&self, id: NodeId) -> usize {
        self.node(id).degree()
    }

    /// Alive node ids in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(id, _)| id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    //
    // --- Ridges ---------------------------------------------------------------------------------
    //

    /// Creates a detached ridge. A ridge must carry at least one point; an
    /// empty point sequence is a precondition violation.
    pub fn create_ridge(&mut self, points: Vec<Point>) -> RidgeView {
        assert!(!points.is_empty(), "ridge must have at least one point");
        self.ridges.push(Some(RidgeSlot {
            points,
            start: None,
            end: None,
        }));
        RidgeView {
            index: self.ridges.len() - 1,
            reversed: false,
        }
    }

    fn slot(&self, index: usize) -> &RidgeSlot {
        self.ridges[index].as_ref().expect("ridge was removed")
    }

    fn slot_mut(&mut self, index: usize) -> &mut RidgeSlot {
        self.ridges[index].as_mut().expect("ridge was removed")
    }

    /// Alive ridge ids (forward views) in ascending order.
    pub fn ridge_ids(&self) -> impl Iterator<Item = RidgeView> + '_ {
        self.ridges
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_some())
            .map(|(index, _)| RidgeView {
                index,
                reversed: false,
            })
    }

    pub fn ridge_count(&self) -> usize {
        self.ridges.iter().filter(|r| r.is_some()).count()
    }

    /// Attaches a detached ridge between two nodes, updating both endpoint
    /// references and both adjacency lists in one operation. There is no way
    /// to attach only one side.
    pub fn connect(&mut self, ridge: RidgeView, start: NodeId, end: NodeId) {
        {
            let slot = self.slot_mut(ridge.index);
            assert!(
                slot.start.is_none() && slot.end.is_none(),
                "ridge is already attached"
            );
            if ridge.reversed {
                slot.start = Some(end);
                slot.end = Some(start);
            } else {
                slot.start = Some(start);
                slot.end = Some(end);
            }
        }
        self.node_mut(start).ridges.push(ridge);
        self.node_mut(end).ridges.push(ridge.flipped());
    }

    /// Detaches a ridge: clears both endpoint references and drops the
    /// incidence from both former endpoint nodes. No dangling incidence can
    /// survive this. Detaching a detached ridge is a no-op.
    pub fn disconnect(&mut self, ridge: RidgeView) {
        let (start, end) = {
            let slot = self.slot_mut(ridge.index);
            (slot.start.take(), slot.end.take())
        };
        for endpoint in [start, end].into_iter().flatten() {
            // retains drops both orientations of the ridge, which also
            // covers self-loops in one pass
            self.node_mut(endpoint)
                .ridges
                .retain(|r| r.index != ridge.index);
        }
    }

    /// Detaches and removes a ridge.
    pub fn remove_ridge(&mut self, ridge: RidgeView) {
        self.disconnect(ridge);
        self.ridges[ridge.index] = None;
    }

    pub fn start(&self, ridge: RidgeView) -> Option<NodeId> {
        let slot = self.slot(ridge.index);
        if ridge.reversed {
            slot.end
        } else {
            slot.start
        }
    }

    pub fn end(&self, ridge: RidgeView) -> Option<NodeId> {
        self.start(ridge.flipped())
    }

    pub fn points_len(&self, ridge: RidgeView) -> usize {
        self.slot(ridge.index).points.len()
    }

    /// Point `i` of the ridge as seen from this view; reversed views read
    /// the shared sequence back-to-front.
    pub fn point(&self, ridge: RidgeView, i: usize) -> Point {
        let points = &self.slot(ridge.index).points;
        if ridge.reversed {
            points[points.len() - 1 - i]
        } else {
            points[i]
        }
    }

    /// Appends a point at the logical end of this view of the ridge.
    pub fn append_point(&mut self, ridge: RidgeView, point: Point) {
        let points = &mut self.slot_mut(ridge.index).points;
        if ridge.reversed {
            points.insert(0, point);
        } else {
            points.push(point);
        }
    }

    /// Ridge direction at its start, averaged over a fixed sample window:
    /// skip a few noisy points, then take the angle to a point a sample
    /// length away. Short ridges shift the window back to end at the last
    /// point and clamp it at the first, so callers never special-case them.
    pub fn direction(&self, ridge: RidgeView) -> f32 {
        let len = self.points_len(ridge);
        let mut first = RIDGE_DIRECTION_SKIP;
        let mut last = RIDGE_DIRECTION_SKIP + RIDGE_DIRECTION_SAMPLE - 1;
        if last >= len {
            let shift = last + 1 - len;
            last -= shift;
            first = first.saturating_sub(shift);
        }
        self.point(ridge, first).angle_to(&self.point(ridge, last))
    }
}

//
// --- Thinning -----------------------------------------------------------------------------------
//

/// Thins a binarized ridge map to a unit-width skeleton (Zhang-Suen, two
/// subpasses per iteration, run to fixpoint). Deterministic for a given map.
pub fn thin(map: &BinaryMap) -> BinaryMap {
    let mut current = map.clone();
    let width = map.width();
    let height = map.height();

    loop {
        let mut changed = false;
        for phase in 0..2 {
            let mut removals = Vec::new();
            for y in 0..height {
                for x in 0..width {
                    if !current.get(x, y) {
                        continue;
                    }
                    let mut p = [false; 8];
                    for (i, (dx, dy)) in NEIGHBORS.iter().enumerate() {
                        p[i] = current.at(x as isize + dx, y as isize + dy);
                    }
                    let b = p.iter().filter(|&&v| v).count();
                    if !(2..=6).contains(&b) {
                        continue;
                    }
                    let a = (0..8).filter(|&i| !p[i] && p[(i + 1) % 8]).count();
                    if a != 1 {
                        continue;
                    }
                    // p = [N, NE, E, SE, S, SW, W, NW]
                    let keep = if phase == 0 {
                        (p[0] && p[2] && p[4]) || (p[2] && p[4] && p[6])
                    } else {
                        (p[0] && p[2] && p[6]) || (p[0] && p[4] && p[6])
                    };
                    if keep {
                        continue;
                    }
                    removals.push((x, y));
                }
            }
            for &(x, y) in &removals {
                current.set(x, y, false);
            }
            changed |= !removals.is_empty();
        }
        if !changed {
            break;
        }
    }

    debug!(
        "thinned ridge map {}x{}: {} -> {} pixels",
        width,
        height,
        map.count_ones(),
        current.count_ones()
    );
    current
}

//
// --- Tracing ------------------------------------------------------------------------------------
//

/// Traces a thinned map into a skeleton graph. Pixels whose 8-neighbor count
/// differs from 2 are feature pixels; adjacent feature pixels merge into one
/// node at their centroid, and the degree-2 chains between them become
/// ridges. Closed loops without any feature pixel trace to nothing.
pub fn trace(map: &BinaryMap) -> Skeleton {
    let width = map.width();
    let height = map.height();
    let index = |x: usize, y: usize| y * width + x;

    let mut counts = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            if !map.get(x, y) {
                continue;
            }
            let mut n = 0u8;
            for (dx, dy) in NEIGHBORS {
                if map.at(x as isize + dx, y as isize + dy) {
                    n += 1;
                }
            }
            counts[index(x, y)] = n;
        }
    }
    let is_feature = |x: usize, y: usize| map.get(x, y) && counts[index(x, y)] != 2;

    // cluster adjacent feature pixels into nodes
    let mut cluster_of = vec![usize::MAX; width * height];
    let mut clusters: Vec<Vec<(usize, usize)>> = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if !is_feature(x, y) || cluster_of[index(x, y)] != usize::MAX {
                continue;
            }
            let id = clusters.len();
            let mut members = Vec::new();
            let mut queue = VecDeque::from([(x, y)]);
            cluster_of[index(x, y)] = id;
            while let Some((cx, cy)) = queue.pop_front() {
                members.push((cx, cy));
                for (dx, dy) in NEIGHBORS {
                    let (nx, ny) = (cx as isize + dx, cy as isize + dy);
                    if nx < 0 || ny < 0 {
                        continue;
                    }
                    let (nx, ny) = (nx as usize, ny as usize);
                    if nx < width
                        && ny < height
                        && is_feature(nx, ny)
                        && cluster_of[index(nx, ny)] == usize::MAX
                    {
                        cluster_of[index(nx, ny)] = id;
                        queue.push_back((nx, ny));
                    }
                }
            }
            clusters.push(members);
        }
    }

    let mut skeleton = Skeleton::new(Point::new(width as i32, height as i32));
    let node_ids: Vec<NodeId> = clusters
        .iter()
        .map(|members| {
            let sx: i64 = members.iter().map(|&(x, _)| x as i64).sum();
            let sy: i64 = members.iter().map(|&(_, y)| y as i64).sum();
            let n = members.len() as f32;
            skeleton.add_node(Point::new(
                (sx as f32 / n + 0.5) as i32,
                (sy as f32 / n + 0.5) as i32,
            ))
        })
        .collect();

    // walk degree-2 chains between clusters
    let mut visited = vec![false; width * height];
    for (ci, members) in clusters.iter().enumerate() {
        for &(mx, my) in members {
            for (dx, dy) in NEIGHBORS {
                let (sx, sy) = (mx as isize + dx, my as isize + dy);
                if !map.at(sx, sy) {
                    continue;
                }
                let (sx, sy) = (sx as usize, sy as usize);
                if is_feature(sx, sy) {
                    // direct adjacency between two clusters: a two-point stub
                    let cj = cluster_of[index(sx, sy)];
                    if cj == ci || (my, mx) >= (sy, sx) {
                        continue;
                    }
                    let a = node_ids[ci];
                    let b = node_ids[cj];
                    let points = vec![skeleton.node(a).position, skeleton.node(b).position];
                    let ridge = skeleton.create_ridge(points);
                    skeleton.connect(ridge, a, b);
                    continue;
                }
                if visited[index(sx, sy)] {
                    continue;
                }
                visited[index(sx, sy)] = true;
                let mut chain = vec![Point::new(sx as i32, sy as i32)];
                let mut prev = (mx, my);
                let mut cur = (sx, sy);
                let end_cluster = loop {
                    let mut next = None;
                    for (dx, dy) in NEIGHBORS {
                        let (nx, ny) = (cur.0 as isize + dx, cur.1 as isize + dy);
                        if !map.at(nx, ny) {
                            continue;
                        }
                        let candidate = (nx as usize, ny as usize);
                        if candidate != prev {
                            next = Some(candidate);
                            break;
                        }
                    }
                    let next = next.expect("degree-2 pixel lost its second neighbor");
                    if is_feature(next.0, next.1) {
                        break cluster_of[index(next.0, next.1)];
                    }
                    visited[index(next.0, next.1)] = true;
                    chain.push(Point::new(next.0 as i32, next.1 as i32));
                    prev = cur;
                    cur = next;
                };

                let a = node_ids[ci];
                let b = node_ids[end_cluster];
                let mut points = Vec::with_capacity(chain.len() + 2);
                points.push(skeleton.node(a).position);
                points.extend(chain);
                points.push(skeleton.node(b).position);
                let ridge = skeleton.create_ridge(points);
                skeleton.connect(ridge, a, b);
            }
        }
    }

    debug!(
        "traced skeleton: {} nodes, {} ridges",
        skeleton.node_count(),
        skeleton.ridge_count()
    );
    skeleton
}

//
// --- Tests --------------------------------------------------------------------------------------
//

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use template_manager::fingerprint_base::PI;

    use super::*;

    fn straight_ridge_points(n: i32) -> Vec<Point> {
        (0..n).map(|x| Point::new(x, 0)).collect()
    }

    #[test]
    fn detach_clears_both_sides() {
        let mut s = Skeleton::new(Point::new(50, 50));
        let a = s.add_node(Point::new(0, 0));
        let b = s.add_node(Point::new(9, 0));
        let r = s.create_ridge(straight_ridge_points(10));
        s.connect(r, a, b);

        assert_eq!(s.degree(a), 1);
        assert_eq!(s.degree(b), 1);
        assert_eq!(s.start(r), Some(a));
        assert_eq!(s.end(r), Some(b));
        // the reversed view swaps endpoints
        assert_eq!(s.start(r.flipped()), Some(b));
        assert_eq!(s.end(r.flipped()), Some(a));

        s.disconnect(r);
        assert_eq!(s.degree(a), 0);
        assert_eq!(s.degree(b), 0);
        assert_eq!(s.start(r), None);
        assert_eq!(s.end(r), None);
        assert_eq!(s.start(r.flipped()), None);

        // nodes can now be removed without tripping the incidence check
        s.remove_node(a);
        s.remove_node(b);
        assert_eq!(s.node_count(), 0);
    }

    #[test]
    fn reversed_view_shares_points() {
        let mut s = Skeleton::new(Point::new(50, 50));
        let r = s.create_ridge(vec![Point::new(0, 0), Point::new(1, 0), Point::new(2, 0)]);
        let rev = r.flipped();

        assert_eq!(s.points_len(rev), 3);
        assert_eq!(s.point(rev, 0), Point::new(2, 0));
        assert_eq!(s.point(rev, 2), Point::new(0, 0));

        // mutation through one view is immediately visible through the other
        s.append_point(rev, Point::new(-1, 0));
        assert_eq!(s.points_len(r), 4);
        assert_eq!(s.point(r, 0), Point::new(-1, 0));
        assert_eq!(s.point(rev, 3), Point::new(-1, 0));
    }

    #[test]
    #[should_panic(expected = "at least one point")]
    fn empty_ridge_is_a_precondition_violation() {
        let mut s = Skeleton::new(Point::new(10, 10));
        s.create_ridge(Vec::new());
    }

    #[test]
    fn direction_window_clamps_on_short_ridges() {
        let mut s = Skeleton::new(Point::new(100, 100));
        let long = s.create_ridge(straight_ridge_points(40));
        assert_abs_diff_eq!(s.direction(long), 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(s.direction(long.flipped()), PI, epsilon = 1e-5);

        // shorter than skip + sample: window shifts and clamps
        let short = s.create_ridge(straight_ridge_points(5));
        assert_abs_diff_eq!(s.direction(short), 0.0, epsilon = 1e-5);

        let single = s.create_ridge(vec![Point::new(3, 3)]);
        assert_abs_diff_eq!(s.direction(single), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn thin_keeps_unit_width_line_intact() {
        let map = BinaryMap::from_text(&[
            "..........",
            ".########.",
            "..........",
        ]);
        let thinned = thin(&map);
        assert_eq!(thinned, map);
    }

    #[test]
    fn thin_collapses_thick_bar() {
        let map = BinaryMap::from_text(&[
            "............",
            ".##########.",
            ".##########.",
            ".##########.",
            "............",
        ]);
        let thinned = thin(&map);
        assert!(thinned.count_ones() < map.count_ones());
        // every remaining pixel has at most two neighbors
        for y in 0..thinned.height() {
            for x in 0..thinned.width() {
                if !thinned.get(x, y) {
                    continue;
                }
                let n = NEIGHBORS
                    .iter()
                    .filter(|(dx, dy)| thinned.at(x as isize + dx, y as isize + dy))
                    .count();
                assert!(n <= 2, "pixel ({x},{y}) has {n} neighbors");
            }
        }
    }

    #[test]
    fn trace_line_yields_two_endings_and_one_ridge() {
        let map = BinaryMap::from_text(&[
            "..........",
            ".########.",
            "..........",
        ]);
        let s = trace(&map);
        assert_eq!(s.node_count(), 2);
        assert_eq!(s.ridge_count(), 1);
        for id in s.node_ids() {
            assert_eq!(s.degree(id), 1);
        }
        let ridge = s.ridge_ids().next().unwrap();
        assert_eq!(s.points_len(ridge), 8);
    }

    #[test]
    fn trace_junction_merges_feature_cluster() {
        // cross shape: one junction, four endings
        let map = BinaryMap::from_text(&[
            "....#....",
            "....#....",
            "....#....",
            "....#....",
            "#########",
            "....#....",
            "....#....",
            "....#....",
            "....#....",
        ]);
        let s = trace(&map);
        let endings = s.node_ids().filter(|&id| s.degree(id) == 1).count();
        let junctions = s.node_ids().filter(|&id| s.degree(id) >= 3).count();
        assert_eq!(endings, 4);
        assert_eq!(junctions, 1);
        assert_eq!(s.ridge_count(), 4);
    }
}
