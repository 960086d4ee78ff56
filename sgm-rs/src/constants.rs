use template_manager::fingerprint_base::{PI, TWO_PI};

// All thresholds are fixed engineering constants sized for ~500 DPI input.
// They are tunable against a labeled dataset, not part of the match contract.

// ridge direction sampling window
pub(crate) const RIDGE_DIRECTION_SKIP: usize = 1;
pub(crate) const RIDGE_DIRECTION_SAMPLE: usize = 21;

// skeleton pruning
pub(crate) const DOT_MAX_POINTS: usize = 5; // isolated ridges shorter than this are dots
pub(crate) const ISLAND_MIN_POINTS: usize = 16; // minimum total point count of a kept component
pub(crate) const GAP_MAX_DISTANCE: f32 = 12.0; // endpoint distance closable as a ridge gap
pub(crate) const GAP_MAX_OFFSET_ANGLE: f32 = PI / 8.0; // gap direction vs ridge flow
pub(crate) const GAP_MAX_ORIENTATION_SKEW: f32 = PI / 6.0; // ridge orientations across a gap, mod PI
pub(crate) const SPUR_MAX_POINTS: usize = 9; // junction-to-ending stubs shorter than this
pub(crate) const BRIDGE_MAX_POINTS: usize = 13; // junction-to-junction links shorter than this
pub(crate) const MIN_DISTINCT_DISTANCE: f32 = 6.0; // minutiae closer than this deduplicate

// edge table
pub(crate) const EDGE_TABLE_NEIGHBORS: usize = 9;
pub(crate) const EDGE_TABLE_RANGE: f32 = 490.0;

// edge-shape tolerances
pub(crate) const MAX_DISTANCE_ERROR: f32 = 13.0;
pub(crate) const MAX_ANGLE_ERROR: f32 = PI / 18.0;
// exact 2*PI / MAX_ANGLE_ERROR; keeps hash neighbor bins wrap-safe
pub(crate) const EDGE_HASH_ANGLE_BINS: i64 = (TWO_PI / (PI / 18.0)) as i64;

// root search
pub(crate) const MIN_ROOT_EDGE_LENGTH: f32 = 22.0;
pub(crate) const MAX_ROOT_CANDIDATES: usize = 1633; // cap on candidate-side edge lookups
pub(crate) const MAX_TRIED_ROOTS: usize = 70;

// pairing expansion
pub(crate) const ROTATION_MIN_PAIRS: usize = 3; // pairs before the rotation gate engages
pub(crate) const MAX_ROTATION_DRIFT: f32 = PI / 9.0;

// scoring
pub(crate) const EDGE_SCORE_SATURATION: f32 = 12.0;
