//! Converts raw pairing statistics into a normalized similarity score.

use crate::constants::EDGE_SCORE_SATURATION;

/// Outcome of expanding one root: pairing size, supporting edge count, and
/// the sizes of both templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchStats {
    pub paired: usize,
    pub support_edges: usize,
    pub probe_minutiae: usize,
    pub candidate_minutiae: usize,
}

/// Similarity in [0, 1). The edge term saturates with the matched edge
/// count, and the minutia ratio scales it by how much of both templates
/// the pairing covers. Fewer than two pairs never constitutes a match.
pub fn score(stats: &MatchStats) -> f32 {
    if stats.paired < 2 {
        return 0.0;
    }
    let matched_edges = (stats.paired - 1 + stats.support_edges) as f32;
    let minutia_ratio =
        2.0 * stats.paired as f32 / (stats.probe_minutiae + stats.candidate_minutiae) as f32;
    minutia_ratio * matched_edges / (matched_edges + EDGE_SCORE_SATURATION)
}
