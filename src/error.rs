#![deny(clippy::unwrap_used, clippy::expect_used)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A struct that represents an error with a context and possibly the propagated source error.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContextError {
    pub context: String,
    pub source_error: Option<String>,
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source_error {
            Some(source_error) => write!(
                formatter,
                "{}: {}",
                self.context,
                minimize_first_letter(source_error.to_string()),
            ),
            None => write!(formatter, "{}", self.context),
        }
    }
}

impl std::error::Error for ContextError {}

impl ContextError {
    /// Create a new `ContextError` with the given context.
    pub fn with_context<S: Into<String>>(context: S) -> ContextError {
        ContextError {
            context: context.into(),
            source_error: None,
        }
    }

    /// Create a new `ContextError` with the given context and source error.
    pub fn with_error<S: Into<String>>(context: S, error: &dyn std::error::Error) -> ContextError {
        ContextError {
            context: context.into(),
            source_error: Some(error.to_string()),
        }
    }
}

/// Minimizes the first letter of a string, it is used for standardizing the error message.
pub(crate) fn minimize_first_letter(string: String) -> String {
    let mut characters = string.chars();
    match characters.next() {
        None => String::new(),
        Some(character) => character.to_lowercase().chain(characters).collect(),
    }
}

/// Why a single image was left out of the rendered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// None of the dimension lookups succeeded.
    Dimensions,
    /// The rendered size fell below the minimum usefulness threshold.
    TooSmall,
    /// The label block of the segment left no vertical room on a fresh page.
    NoSpaceAfterLabels,
    /// The canvas rejected the image while embedding it.
    RenderError,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            SkipReason::Dimensions => "dimensions",
            SkipReason::TooSmall => "tooSmall",
            SkipReason::NoSpaceAfterLabels => "noSpaceAfterLabels",
            SkipReason::RenderError => "renderError",
        };
        write!(formatter, "{reason}")
    }
}

/// Per-image failures. These never abort a batch: they are caught at the innermost loop
/// and turned into skip or failure records.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The payload cannot be rasterized.
    #[error("Unable to decode the image: {detail}")]
    Decode { detail: String },

    /// Cache, canvas introspection and decode-and-measure all failed.
    #[error("Unable to resolve the image dimensions: {detail}")]
    Dimensions { detail: String },

    /// A valid image could not be placed because of the page geometry.
    #[error("Unable to place the image on the page ({reason})")]
    Layout { reason: SkipReason },

    /// The pixel buffer of an embedded image was not resolved in time.
    #[error("Timed out after {millis} ms while resolving the image on page {page}")]
    ExtractionTimeout { page: u32, millis: u64 },

    /// Re-encoding into the canonical format failed.
    #[error("Unable to encode the image: {detail}")]
    Encode { detail: String },

    /// The canvas rejected an otherwise valid image.
    #[error("Unable to render the image: {detail}")]
    Render { detail: String },
}

impl ImageError {
    /// The reason recorded when this error leaves an image out of the rendered document.
    pub fn skip_reason(&self) -> SkipReason {
        match self {
            ImageError::Dimensions { .. } => SkipReason::Dimensions,
            ImageError::Layout { reason } => *reason,
            ImageError::Decode { .. }
            | ImageError::ExtractionTimeout { .. }
            | ImageError::Encode { .. }
            | ImageError::Render { .. } => SkipReason::RenderError,
        }
    }
}

impl From<image::ImageError> for ImageError {
    fn from(error: image::ImageError) -> Self {
        ImageError::Decode {
            detail: minimize_first_letter(error.to_string()),
        }
    }
}

/// Failures of the metadata codec. `manifest::parse` turns all of them into "no usable manifest".
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The text is not in the printable transform alphabet, or its bytes are not UTF-8.
    #[error("The manifest text is not validly encoded: {detail}")]
    Encoding { detail: String },

    /// The decoded text is not JSON.
    #[error("The manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON is structurally impossible for a manifest.
    #[error("The manifest does not have a recognized structure")]
    Validation,
}

/// Errors that abort a whole load. Nothing is applied to the workspace when one is returned.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The bytes could not be parsed as a PDF document.
    #[error("The file is not a readable PDF document: {detail}")]
    NotAPdf { detail: String },

    /// The PDF carries no usable manifest.
    #[error("The file is not a recognized save file: {detail}")]
    NotASaveFile { detail: String },

    /// A JSON save is structurally invalid or carries undecodable images.
    #[error("The save file is invalid: {detail}")]
    InvalidSave { detail: String },
}
