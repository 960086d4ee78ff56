//! Edge geometry between minutia pairs and the derived search structures:
//! the per-minutia neighbor table and the edge hash used to seed matching.

use std::collections::HashMap;
use std::sync::OnceLock;

use log::debug;
use ordered_float::OrderedFloat;
use template_manager::fingerprint_base as fpb;
use template_manager::template::Template;

use crate::constants::*;

/// Translation- and rotation-invariant description of the directed edge
/// from a reference minutia to a neighbor minutia. Both angles are relative
/// to the minutia directions, so a rigid transform of the whole template
/// leaves the shape unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeShape {
    pub length: f32,
    pub reference_angle: f32,
    pub neighbor_angle: f32,
}

impl EdgeShape {
    pub fn between(template: &Template, reference: usize, neighbor: usize) -> EdgeShape {
        let r = &template.minutiae[reference];
        let n = &template.minutiae[neighbor];
        let edge_angle = r.position.angle_to(&n.position);
        EdgeShape {
            length: r.position.distance_to(&n.position),
            reference_angle: fpb::difference(edge_angle, r.direction),
            neighbor_angle: fpb::difference(fpb::opposite(edge_angle), n.direction),
        }
    }
}

/// Two edge shapes agree when length and both relative angles fall within
/// the fixed matching tolerances.
#[inline]
pub fn matching_shapes(a: &EdgeShape, b: &EdgeShape) -> bool {
    (a.length - b.length).abs() <= MAX_DISTANCE_ERROR
        && fpb::distance(a.reference_angle, b.reference_angle) <= MAX_ANGLE_ERROR
        && fpb::distance(a.neighbor_angle, b.neighbor_angle) <= MAX_ANGLE_ERROR
}

/// Combined mismatch of two shapes, each component normalized by its
/// tolerance. Zero for identical shapes; below 3.0 for any matching pair.
#[inline]
pub fn shape_error(a: &EdgeShape, b: &EdgeShape) -> f32 {
    (a.length - b.length).abs() / MAX_DISTANCE_ERROR
        + fpb::distance(a.reference_angle, b.reference_angle) / MAX_ANGLE_ERROR
        + fpb::distance(a.neighbor_angle, b.neighbor_angle) / MAX_ANGLE_ERROR
}

/// Edge shape plus the minutia indices it spans.
#[derive(Debug, Clone, Copy)]
pub struct IndexedEdge {
    pub shape: EdgeShape,
    pub reference: usize,
    pub neighbor: usize,
}

/// For each minutia, its nearest edges sorted by length, capped in count
/// and range. Built once per template and fully determined by it.
#[derive(Debug)]
pub struct NeighborTable {
    edges: Vec<Vec<IndexedEdge>>,
}

impl NeighborTable {
    pub fn build(template: &Template) -> NeighborTable {
        let count = template.minutiae.len();
        let mut edges = Vec::with_capacity(count);
        for reference in 0..count {
            let mut list: Vec<IndexedEdge> = (0..count)
                .filter(|&neighbor| neighbor != reference)
                .map(|neighbor| IndexedEdge {
                    shape: EdgeShape::between(template, reference, neighbor),
                    reference,
                    neighbor,
                })
                .filter(|edge| edge.shape.length <= EDGE_TABLE_RANGE)
                .collect();
            // ties on length break on neighbor index, keeping the order
            // reproducible across builds
            list.sort_by_key(|edge| (OrderedFloat(edge.shape.length), edge.neighbor));
            list.truncate(EDGE_TABLE_NEIGHBORS);
            edges.push(list);
        }
        NeighborTable { edges }
    }

    #[inline]
    pub fn neighbors(&self, minutia: usize) -> &[IndexedEdge] {
        &self.edges[minutia]
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

//
// --- Edge hash ----------------------------------------------------------------------------------
//

/// Hash of this template's neighbor-table edges keyed by quantized shape.
/// Each edge is inserted under its own bin and all adjacent bins, so a
/// lookup with any shape within tolerance probes a single exact key.
#[derive(Debug)]
pub struct EdgeHash {
    bins: HashMap<u64, Vec<IndexedEdge>>,
}

impl EdgeHash {
    pub fn build(table: &NeighborTable) -> EdgeHash {
        let mut bins: HashMap<u64, Vec<IndexedEdge>> = HashMap::new();
        let mut inserted = 0usize;
        for minutia in 0..table.len() {
            for &edge in table.neighbors(minutia) {
                let (l, r, n) = quantize(&edge.shape);
                for dl in -1..=1i64 {
                    let lb = l + dl;
                    if lb < 0 {
                        continue;
                    }
                    for dr in -1..=1i64 {
                        for dn in -1..=1i64 {
                            let key = pack(
                                lb,
                                (r + dr).rem_euclid(EDGE_HASH_ANGLE_BINS),
                                (n + dn).rem_euclid(EDGE_HASH_ANGLE_BINS),
                            );
                            bins.entry(key).or_default().push(edge);
                        }
                    }
                }
                inserted += 1;
            }
        }
        debug!("edge hash built: {} edges, {} bins", inserted, bins.len());
        EdgeHash { bins }
    }

    /// Edges whose bin neighborhood covers this shape. Candidates still
    /// need a `matching_shapes` check; binning only narrows the search.
    pub fn candidates(&self, shape: &EdgeShape) -> &[IndexedEdge] {
        let (l, r, n) = quantize(shape);
        self.bins.get(&pack(l, r, n)).map_or(&[], Vec::as_slice)
    }
}

#[inline]
fn quantize(shape: &EdgeShape) -> (i64, i64, i64) {
    (
        (shape.length / MAX_DISTANCE_ERROR) as i64,
        ((shape.reference_angle / MAX_ANGLE_ERROR) as i64).rem_euclid(EDGE_HASH_ANGLE_BINS),
        ((shape.neighbor_angle / MAX_ANGLE_ERROR) as i64).rem_euclid(EDGE_HASH_ANGLE_BINS),
    )
}

#[inline]
fn pack(length_bin: i64, reference_bin: i64, neighbor_bin: i64) -> u64 {
    ((length_bin as u64) << 16) | ((reference_bin as u64) << 8) | neighbor_bin as u64
}

//
// --- Search template ----------------------------------------------------------------------------
//

/// A template bundled with lazily built search structures. The structures
/// are derived purely from the immutable template, built at most once, and
/// shared by concurrent matches against this template.
pub struct SearchTemplate {
    template: Template,
    table: OnceLock<NeighborTable>,
    hash: OnceLock<EdgeHash>,
}

impl SearchTemplate {
    pub fn new(template: Template) -> SearchTemplate {
        SearchTemplate {
            template,
            table: OnceLock::new(),
            hash: OnceLock::new(),
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn table(&self) -> &NeighborTable {
        self.table.get_or_init(|| NeighborTable::build(&self.template))
    }

    pub fn hash(&self) -> &EdgeHash {
        self.hash.get_or_init(|| EdgeHash::build(self.table()))
    }
}

//
// --- Tests --------------------------------------------------------------------------------------
//

#[cfg(test)]
mod tests {
    use template_manager::fingerprint_base::{Point, TWO_PI};
    use template_manager::template::{Minutia, MinutiaKind};

    use super::*;

    fn grid_template() -> Template {
        let minutiae = (0..16)
            .map(|i| Minutia {
                position: Point::new(40 * (i % 4) + 20, 40 * (i / 4) + 20),
                kind: if i % 2 == 0 {
                    MinutiaKind::Ending
                } else {
                    MinutiaKind::Bifurcation
                },
                direction: fpb::normalize(i as f32 * 0.7 % TWO_PI),
            })
            .collect();
        Template {
            size: Point::new(200, 200),
            minutiae,
        }
    }

    #[test]
    fn shape_is_translation_invariant() {
        let template = grid_template();
        let mut shifted = template.clone();
        for m in &mut shifted.minutiae {
            m.position = m.position + Point::new(17, 9);
        }
        shifted.size = Point::new(300, 300);
        let a = EdgeShape::between(&template, 0, 5);
        let b = EdgeShape::between(&shifted, 0, 5);
        assert!(matching_shapes(&a, &b));
        assert!(shape_error(&a, &b) < 1e-4);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = EdgeShape {
            length: 50.0,
            reference_angle: 1.0,
            neighbor_angle: 2.0,
        };
        let long = EdgeShape {
            length: 50.0 + MAX_DISTANCE_ERROR + 1.0,
            ..a
        };
        let twisted = EdgeShape {
            reference_angle: 1.0 + MAX_ANGLE_ERROR * 2.0,
            ..a
        };
        assert!(matching_shapes(&a, &a));
        assert!(!matching_shapes(&a, &long));
        assert!(!matching_shapes(&a, &twisted));
        assert!(shape_error(&a, &a) < 1e-6);
        assert!(shape_error(&a, &long) > 1.0);
    }

    #[test]
    fn neighbor_table_is_sorted_and_capped() {
        let template = grid_template();
        let table = NeighborTable::build(&template);
        assert_eq!(table.len(), template.minutiae.len());
        for minutia in 0..table.len() {
            let edges = table.neighbors(minutia);
            assert!(edges.len() <= EDGE_TABLE_NEIGHBORS);
            assert!(!edges.is_empty());
            for pair in edges.windows(2) {
                assert!(pair[0].shape.length <= pair[1].shape.length);
            }
            for edge in edges {
                assert_eq!(edge.reference, minutia);
                assert_ne!(edge.neighbor, minutia);
                assert!(edge.shape.length <= EDGE_TABLE_RANGE);
            }
        }
    }

    #[test]
    fn neighbor_table_build_is_deterministic() {
        let template = grid_template();
        let a = NeighborTable::build(&template);
        let b = NeighborTable::build(&template);
        for minutia in 0..a.len() {
            let (ea, eb) = (a.neighbors(minutia), b.neighbors(minutia));
            assert_eq!(ea.len(), eb.len());
            for (x, y) in ea.iter().zip(eb) {
                assert_eq!((x.reference, x.neighbor), (y.reference, y.neighbor));
                assert_eq!(x.shape, y.shape);
            }
        }
    }

    #[test]
    fn hash_finds_edges_within_tolerance() {
        let template = grid_template();
        let table = NeighborTable::build(&template);
        let hash = EdgeHash::build(&table);
        for minutia in 0..table.len() {
            for edge in table.neighbors(minutia) {
                // perturb the shape by half of each tolerance
                let probe = EdgeShape {
                    length: edge.shape.length + MAX_DISTANCE_ERROR * 0.5,
                    reference_angle: fpb::normalize(
                        edge.shape.reference_angle - MAX_ANGLE_ERROR * 0.5,
                    ),
                    neighbor_angle: fpb::normalize(
                        edge.shape.neighbor_angle + MAX_ANGLE_ERROR * 0.5,
                    ),
                };
                let found = hash.candidates(&probe).iter().any(|c| {
                    c.reference == edge.reference
                        && c.neighbor == edge.neighbor
                        && matching_shapes(&c.shape, &probe)
                });
                assert!(found, "edge {}->{} not found", edge.reference, edge.neighbor);
            }
        }
    }

    #[test]
    fn search_structures_build_once_and_agree() {
        let search = SearchTemplate::new(grid_template());
        let first = search.table() as *const NeighborTable;
        let second = search.table() as *const NeighborTable;
        assert_eq!(first, second);
        assert_eq!(search.table().len(), search.template().minutiae.len());
        // the hash derives from the same table
        let edge = search.table().neighbors(0)[0];
        assert!(search
            .hash()
            .candidates(&edge.shape)
            .iter()
            .any(|c| c.reference == edge.reference && c.neighbor == edge.neighbor));
    }
}
