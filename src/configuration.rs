use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::workspace::Segment;

/// Converts millimeters to points, which is the unit the PDF specification works in.
pub fn millimeters_to_points(millimeters: f32) -> f32 {
    millimeters * 2.834646
}

/// The settings of the save and load flows. It can be read from a JSON file, every missing
/// field falls back to its default value.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PortfolioConfiguration {
    /// Page width in millimeters.
    pub page_width: f32,
    /// Page height in millimeters.
    pub page_height: f32,
    /// Margin on every side of the page in millimeters.
    pub page_margin: f32,
    /// Font size of the labels in points.
    pub label_font_size: f32,
    /// Line height of the labels as a multiple of the font size.
    pub label_line_spacing: f32,
    /// Vertical gap in points left after every label block and every image.
    pub vertical_gap: f32,
    /// Fraction of the content area below which a rendered image is considered useless.
    pub minimum_image_fraction: f32,
    /// The label lines written before the images of each segment.
    pub segment_labels: Vec<SegmentLabel>,
    pub document_title: String,
    pub document_subject: String,
    pub compression: CompressionOptions,
    /// Upper bound for resolving the pixels of a single embedded image while loading.
    pub extraction_timeout_millis: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentLabel {
    pub segment: u8,
    pub lines: Vec<String>,
}

/// The limits of the canonical encoding images are normalized to before being embedded.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressionOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, from 1 to 100.
    pub jpeg_quality: u8,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        CompressionOptions {
            max_width: 1600,
            max_height: 1600,
            jpeg_quality: 85,
        }
    }
}

impl Default for PortfolioConfiguration {
    fn default() -> Self {
        PortfolioConfiguration {
            page_width: 210.0,
            page_height: 297.0,
            page_margin: 15.0,
            label_font_size: 14.0,
            label_line_spacing: 1.3,
            vertical_gap: 8.0,
            minimum_image_fraction: 0.05,
            segment_labels: Vec::new(),
            document_title: "Student Portfolio".into(),
            document_subject: "Segmented image portfolio".into(),
            compression: CompressionOptions::default(),
            extraction_timeout_millis: 1500,
        }
    }
}

/// The geometry the document writer works with, entirely expressed in points and measured
/// from the top-left corner of the page.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfiguration {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub label_font_size: f32,
    pub line_height: f32,
    pub vertical_gap: f32,
    pub minimum_image_fraction: f32,
    pub segment_labels: Vec<(Segment, Vec<String>)>,
}

impl LayoutConfiguration {
    pub fn content_width(&self) -> f32 {
        (self.page_width - 2.0 * self.margin).max(0.0)
    }

    pub fn content_height(&self) -> f32 {
        (self.page_height - 2.0 * self.margin).max(0.0)
    }

    /// The label lines of the segment, `Segment N` unless configured otherwise.
    pub fn label_lines(&self, segment: Segment) -> Vec<String> {
        self.segment_labels
            .iter()
            .find(|(labeled_segment, _)| *labeled_segment == segment)
            .map(|(_, lines)| lines.clone())
            .unwrap_or_else(|| vec![format!("Segment {segment}")])
    }
}

impl PortfolioConfiguration {
    pub fn from_path(configuration_file_path: &Path) -> Result<Self, ContextError> {
        let configuration_file_contents = std::fs::read_to_string(configuration_file_path)
            .map_err(|error| {
                ContextError::with_error(
                    format!(
                        "Failed to read the configuration file {:?}",
                        configuration_file_path
                    ),
                    &error,
                )
            })?;
        let configuration: PortfolioConfiguration =
            serde_json::from_str(&configuration_file_contents).map_err(|error| {
                ContextError::with_error(
                    format!(
                        "Failed to parse the configuration file {:?}",
                        configuration_file_path
                    ),
                    &error,
                )
            })?;

        Ok(configuration)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_millis)
    }

    pub fn layout_configuration(&self) -> LayoutConfiguration {
        let segment_labels = self
            .segment_labels
            .iter()
            .filter_map(|label| match Segment::new(label.segment) {
                Some(segment) => Some((segment, label.lines.clone())),
                None => {
                    log::warn!(
                        "Ignoring the labels configured for the unknown segment {}",
                        label.segment
                    );
                    None
                }
            })
            .collect();

        LayoutConfiguration {
            page_width: millimeters_to_points(self.page_width),
            page_height: millimeters_to_points(self.page_height),
            margin: millimeters_to_points(self.page_margin),
            label_font_size: self.label_font_size,
            line_height: self.label_font_size * self.label_line_spacing,
            vertical_gap: self.vertical_gap,
            minimum_image_fraction: self.minimum_image_fraction,
            segment_labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_configuration_files_fall_back_to_defaults() {
        let configuration: PortfolioConfiguration = serde_json::from_str(
            r#"{
                "pageMargin": 20.0,
                "segmentLabels": [{ "segment": 2, "lines": ["Unit 2", "Sketches"] }],
                "compression": { "maxWidth": 800 }
            }"#,
        )
        .unwrap();

        assert_eq!(configuration.page_margin, 20.0);
        assert_eq!(configuration.page_width, 210.0);
        assert_eq!(configuration.compression.max_width, 800);
        assert_eq!(configuration.compression.max_height, 1600);
        assert_eq!(configuration.extraction_timeout(), Duration::from_millis(1500));

        let layout = configuration.layout_configuration();
        assert_eq!(
            layout.label_lines(Segment::new(2).unwrap()),
            vec!["Unit 2".to_string(), "Sketches".to_string()]
        );
        assert_eq!(
            layout.label_lines(Segment::new(1).unwrap()),
            vec!["Segment 1".to_string()]
        );
    }

    #[test]
    fn layout_is_expressed_in_points() {
        let layout = PortfolioConfiguration::default().layout_configuration();
        assert!((layout.page_width - 595.27563).abs() < 0.01);
        assert!((layout.content_height() - (layout.page_height - 2.0 * layout.margin)).abs() < 1e-3);
        assert!((layout.line_height - 18.2).abs() < 1e-3);
    }
}
