//! Skeleton-graph minutiae extraction and matching.
//!
//! `extract` turns a binarized ridge map into a minutiae template, and
//! `match_templates` scores the similarity of two templates. Prepared
//! [`SearchTemplate`]s amortize the derived search structures across
//! repeated matches.

mod constants;

pub mod binary;
pub mod edges;
pub mod extract;
pub mod matching;
pub mod score;
pub mod skeleton;

pub use binary::BinaryMap;
pub use edges::SearchTemplate;
pub use extract::extract;
pub use matching::{match_search_templates, match_templates, match_to_template};
pub use template_manager::template::{Minutia, MinutiaKind, Template};

// --- Tests ------------------------------------------------------------------
