use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fingerprint_base as fpb;
use super::fingerprint_base::{Point, DEG_TO_RAD, TWO_PI};

// Native serialized template: magic, format version, postcard payload.
const TEMPLATE_MAGIC: [u8; 4] = *b"SGMT";
const TEMPLATE_VERSION: u8 = 1;
const TEMPLATE_HEADER_LEN: usize = TEMPLATE_MAGIC.len() + 1;

/// Failures surfaced by template construction and decoding.
///
/// `UnrecognizedFormat` is deliberately distinct from `Invalid`: callers may
/// react to it by retrying an external foreign-format importer, while `Invalid`
/// means the data claimed to be native and is corrupt. Nothing is ever
/// silently repaired.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// Structurally broken template data.
    #[error("invalid template structure: {0}")]
    Invalid(String),

    /// The bytes are not a native serialized template.
    #[error("not a recognized native template")]
    UnrecognizedFormat,

    /// A minutiae fixture file could not be read.
    #[error("template record error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinutiaKind {
    Ending,
    Bifurcation,
}

/// Immutable extracted feature: position, direction in `[0, 2*PI)`, type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Minutia {
    pub position: Point,
    pub direction: f32,
    pub kind: MinutiaKind,
}

/// Biometric feature template: image size plus the extracted minutiae.
///
/// Index positions are stable within one instance; the extractor emits
/// minutiae in a normalized sort order so repeated extractions of the same
/// skeleton are byte-identical. Treated as immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub size: Point,
    pub minutiae: Vec<Minutia>,
}

impl Template {
    /// Empty fallback template. Matches nothing, including itself.
    pub const EMPTY: Template = Template {
        size: Point::ZERO,
        minutiae: Vec::new(),
    };

    pub fn new(size: Point, minutiae: Vec<Minutia>) -> Result<Template, TemplateError> {
        let template = Template { size, minutiae };
        template.validate()?;
        Ok(template)
    }

    /// Structural checks on size metadata and minutia ranges.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.size.x < 0 || self.size.y < 0 {
            return Err(TemplateError::Invalid(format!(
                "negative image size {}x{}",
                self.size.x, self.size.y
            )));
        }
        for (index, minutia) in self.minutiae.iter().enumerate() {
            let p = minutia.position;
            if p.x < 0 || p.y < 0 || p.x >= self.size.x || p.y >= self.size.y {
                return Err(TemplateError::Invalid(format!(
                    "minutia {} at ({}, {}) outside {}x{} image",
                    index, p.x, p.y, self.size.x, self.size.y
                )));
            }
            if !minutia.direction.is_finite() || !(0.0..TWO_PI).contains(&minutia.direction) {
                return Err(TemplateError::Invalid(format!(
                    "minutia {} direction {} outside [0, 2*PI)",
                    index, minutia.direction
                )));
            }
        }
        Ok(())
    }

    /// Serializes the template into the native versioned byte format.
    ///
    /// Only features are persisted; search structures are derived data and
    /// are rebuilt after decoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TemplateError> {
        let payload =
            postcard::to_stdvec(self).map_err(|e| TemplateError::Invalid(e.to_string()))?;
        let mut bytes = Vec::with_capacity(TEMPLATE_HEADER_LEN + payload.len());
        bytes.extend_from_slice(&TEMPLATE_MAGIC);
        bytes.push(TEMPLATE_VERSION);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decodes a native serialized template produced by [`Template::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Template, TemplateError> {
        if bytes.len() < TEMPLATE_HEADER_LEN || bytes[..TEMPLATE_MAGIC.len()] != TEMPLATE_MAGIC {
            return Err(TemplateError::UnrecognizedFormat);
        }
        if bytes[TEMPLATE_MAGIC.len()] != TEMPLATE_VERSION {
            return Err(TemplateError::UnrecognizedFormat);
        }
        let template: Template = postcard::from_bytes(&bytes[TEMPLATE_HEADER_LEN..])
            .map_err(|e| TemplateError::Invalid(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    /// Loads a minutiae fixture from a headerless CSV file with records
    /// `x,y,direction_degrees,kind` where kind is `ending` or `bifurcation`.
    pub fn from_csv<P: AsRef<Path>>(path: P, size: Point) -> Result<Template, TemplateError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)?;

        let mut minutiae = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let field = |i: usize| {
                record
                    .get(i)
                    .map(str::trim)
                    .ok_or_else(|| TemplateError::Invalid(format!("record {line} too short")))
            };
            let x: i32 = field(0)?
                .parse()
                .map_err(|_| TemplateError::Invalid(format!("record {line}: bad x")))?;
            let y: i32 = field(1)?
                .parse()
                .map_err(|_| TemplateError::Invalid(format!("record {line}: bad y")))?;
            let degrees: f32 = field(2)?
                .parse()
                .map_err(|_| TemplateError::Invalid(format!("record {line}: bad direction")))?;
            let kind = match field(3)? {
                "ending" => MinutiaKind::Ending,
                "bifurcation" => MinutiaKind::Bifurcation,
                other => {
                    return Err(TemplateError::Invalid(format!(
                        "record {line}: unknown minutia kind {other:?}"
                    )))
                }
            };
            minutiae.push(Minutia {
                position: Point::new(x, y),
                direction: fpb::normalize(degrees * DEG_TO_RAD),
                kind,
            });
        }

        Template::new(size, minutiae)
    }
}

//
// --- Tests --------------------------------------------------------------------------------------
//
