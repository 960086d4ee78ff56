//! Graph pairing matcher: seeds root minutia pairs from the edge hash,
//! greedily grows a pairing along the neighbor tables, and keeps the best
//! score over all tried roots.

use libm::atan2f;
use log::{debug, trace};
use ordered_float::OrderedFloat;
use template_manager::fingerprint_base as fpb;
use template_manager::template::Template;

use crate::constants::*;
use crate::edges::{matching_shapes, shape_error, IndexedEdge, SearchTemplate};
use crate::score::{score, MatchStats};

/// Matches two templates and returns their similarity score. Derived search
/// structures are built on the fly; when matching one probe against many
/// candidates, build a [`SearchTemplate`] once and call
/// [`match_to_template`] instead.
pub fn match_templates(probe: &Template, candidate: &Template) -> f32 {
    match_search_templates(
        &SearchTemplate::new(probe.clone()),
        &SearchTemplate::new(candidate.clone()),
    )
}

/// Matches a prepared probe against one candidate template.
pub fn match_to_template(probe: &SearchTemplate, candidate: &Template) -> f32 {
    match_search_templates(probe, &SearchTemplate::new(candidate.clone()))
}

pub fn match_search_templates(probe: &SearchTemplate, candidate: &SearchTemplate) -> f32 {
    if probe.template().minutiae.is_empty() || candidate.template().minutiae.is_empty() {
        return 0.0;
    }
    let roots = collect_roots(probe, candidate);
    let mut best = 0.0f32;
    for (tried, root) in roots.iter().enumerate() {
        let stats = try_root(probe, candidate, root);
        let value = score(&stats);
        trace!(
            "root {}: probe {} <-> candidate {}, {} pairs, score {:.4}",
            tried,
            root.probe.reference,
            root.candidate.reference,
            stats.paired,
            value
        );
        // strictly greater keeps the earliest root on ties
        if value > best {
            best = value;
        }
    }
    debug!(
        "matched {}x{} minutiae over {} roots: score {:.4}",
        probe.template().minutiae.len(),
        candidate.template().minutiae.len(),
        roots.len(),
        best
    );
    best
}

//
// --- Roots --------------------------------------------------------------------------------------
//

/// A root hypothesis: one probe edge aligned with one candidate edge. The
/// sequence number makes the ordering total when shape errors tie.
struct Root {
    probe: IndexedEdge,
    candidate: IndexedEdge,
    error: f32,
    seq: usize,
}

/// Pairs candidate table edges with shape-compatible probe edges from the
/// probe's edge hash. Edges below the minimum root length are skipped; the
/// scan stops after a fixed number of raw candidates, and only the lowest
/// shape errors survive as roots to try.
fn collect_roots(probe: &SearchTemplate, candidate: &SearchTemplate) -> Vec<Root> {
    let hash = probe.hash();
    let table = candidate.table();
    let mut roots = Vec::new();
    let mut scanned = 0usize;
    'scan: for minutia in 0..table.len() {
        for edge in table.neighbors(minutia) {
            if edge.shape.length < MIN_ROOT_EDGE_LENGTH {
                continue;
            }
            for probe_edge in hash.candidates(&edge.shape) {
                if scanned >= MAX_ROOT_CANDIDATES {
                    break 'scan;
                }
                scanned += 1;
                if !matching_shapes(&probe_edge.shape, &edge.shape) {
                    continue;
                }
                roots.push(Root {
                    probe: *probe_edge,
                    candidate: *edge,
                    error: shape_error(&probe_edge.shape, &edge.shape),
                    seq: roots.len(),
                });
            }
        }
    }
    roots.sort_by_key(|root| (OrderedFloat(root.error), root.seq));
    roots.truncate(MAX_TRIED_ROOTS);
    roots
}

//
// --- Pairing ------------------------------------------------------------------------------------
//

struct MinutiaPair {
    probe: usize,
    candidate: usize,
}

/// One-to-one pairing under construction. The running rotation estimate is
/// kept as a vector sum so the circular mean needs no rescaling.
struct Pairing {
    pairs: Vec<MinutiaPair>,
    by_probe: Vec<Option<usize>>,
    by_candidate: Vec<Option<usize>>,
    support: usize,
    rot_x: f32,
    rot_y: f32,
}

impl Pairing {
    fn new(probe: &Template, candidate: &Template) -> Pairing {
        Pairing {
            pairs: Vec::new(),
            by_probe: vec![None; probe.minutiae.len()],
            by_candidate: vec![None; candidate.minutiae.len()],
            support: 0,
            rot_x: 0.0,
            rot_y: 0.0,
        }
    }

    fn add(&mut self, probe: &Template, candidate: &Template, pair: MinutiaPair) {
        let offset = fpb::difference(
            candidate.minutiae[pair.candidate].direction,
            probe.minutiae[pair.probe].direction,
        );
        self.rot_x += libm::cosf(offset);
        self.rot_y += libm::sinf(offset);
        self.by_probe[pair.probe] = Some(pair.candidate);
        self.by_candidate[pair.candidate] = Some(pair.probe);
        self.pairs.push(pair);
    }

    fn rotation(&self) -> f32 {
        fpb::normalize(atan2f(self.rot_y, self.rot_x))
    }
}

/// Expands a root into a full pairing: breadth-first over already paired
/// minutiae, matching their table edges by shape. An edge landing on an
/// existing pair counts as support; an edge reaching two unpaired minutiae
/// adds a pair, once enough pairs exist to gate it against the running
/// rotation estimate.
fn try_root(probe: &SearchTemplate, candidate: &SearchTemplate, root: &Root) -> MatchStats {
    let pt = probe.template();
    let ct = candidate.template();
    let mut pairing = Pairing::new(pt, ct);
    pairing.add(
        pt,
        ct,
        MinutiaPair {
            probe: root.probe.reference,
            candidate: root.candidate.reference,
        },
    );
    pairing.add(
        pt,
        ct,
        MinutiaPair {
            probe: root.probe.neighbor,
            candidate: root.candidate.neighbor,
        },
    );

    let mut frontier = 0;
    while frontier < pairing.pairs.len() {
        let (probe_ref, candidate_ref) = {
            let pair = &pairing.pairs[frontier];
            (pair.probe, pair.candidate)
        };
        frontier += 1;
        for probe_edge in probe.table().neighbors(probe_ref) {
            for candidate_edge in candidate.table().neighbors(candidate_ref) {
                if !matching_shapes(&probe_edge.shape, &candidate_edge.shape) {
                    continue;
                }
                let (pn, cn) = (probe_edge.neighbor, candidate_edge.neighbor);
                if pairing.by_probe[pn] == Some(cn) {
                    pairing.support += 1;
                    continue;
                }
                if pairing.by_probe[pn].is_some() || pairing.by_candidate[cn].is_some() {
                    continue;
                }
                // rotation gate: once the estimate is stable, reject pairs
                // whose direction offset drifts away from it
                if pairing.pairs.len() >= ROTATION_MIN_PAIRS {
                    let offset =
                        fpb::difference(ct.minutiae[cn].direction, pt.minutiae[pn].direction);
                    if fpb::distance(offset, pairing.rotation()) > MAX_ROTATION_DRIFT {
                        continue;
                    }
                }
                pairing.add(
                    pt,
                    ct,
                    MinutiaPair {
                        probe: pn,
                        candidate: cn,
                    },
                );
            }
        }
    }

    MatchStats {
        paired: pairing.pairs.len(),
        support_edges: pairing.support,
        probe_minutiae: pt.minutiae.len(),
        candidate_minutiae: ct.minutiae.len(),
    }
}

//
// --- Tests --------------------------------------------------------------------------------------
//

#[cfg(test)]
mod tests {
    use template_manager::fingerprint_base::{normalize, Point, TWO_PI};
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
                direction: normalize(i as f32 * 0.7 % TWO_PI),
            })
            .collect();
        Template {
            size: Point::new(200, 200),
            minutiae,
        }
    }

    #[test]
    fn empty_templates_score_zero() {
        let grid = grid_template();
        assert_eq!(match_templates(&Template::EMPTY, &grid), 0.0);
        assert_eq!(match_templates(&grid, &Template::EMPTY), 0.0);
        assert_eq!(match_templates(&Template::EMPTY, &Template::EMPTY), 0.0);
    }

    #[test]
    fn single_minutia_cannot_match() {
        let lone = Template {
            size: Point::new(100, 100),
            minutiae: vec![Minutia {
                position: Point::new(50, 50),
                direction: 1.0,
                kind: MinutiaKind::Ending,
            }],
        };
        assert_eq!(match_templates(&lone, &lone), 0.0);
        assert_eq!(match_templates(&lone, &grid_template()), 0.0);
    }

    #[test]
    fn identical_templates_match_strongly() {
        let grid = grid_template();
        let similarity = match_templates(&grid, &grid);
        assert!(similarity >= 0.5, "self-match too weak: {similarity}");
        assert!(similarity < 1.0);
    }

    #[test]
    fn translation_does_not_change_the_score() {
        let grid = grid_template();
        let mut shifted = grid.clone();
        for m in &mut shifted.minutiae {
            m.position = m.position + Point::new(31, 12);
        }
        shifted.size = Point::new(300, 300);
        let same = match_templates(&grid, &grid);
        let moved = match_templates(&grid, &shifted);
        assert!((same - moved).abs() < 1e-6);
    }

    #[test]
    fn unrelated_templates_score_low() {
        let grid = grid_template();
        // scatter with incompatible geometry
        let scatter = Template {
            size: Point::new(200, 200),
            minutiae: (0..8)
                .map(|i| Minutia {
                    position: Point::new(13 * i + 7, 23 * i % 190),
                    direction: normalize(i as f32 * 2.3),
                    kind: MinutiaKind::Ending,
                })
                .collect(),
        };
        let similarity = match_templates(&grid, &scatter);
        assert!(similarity < match_templates(&grid, &grid));
    }

    #[test]
    fn prepared_probe_agrees_with_direct_match() {
        let grid = grid_template();
        let probe = SearchTemplate::new(grid.clone());
        let direct = match_templates(&grid, &grid);
        assert!((match_to_template(&probe, &grid) - direct).abs() < 1e-6);
    }
}
