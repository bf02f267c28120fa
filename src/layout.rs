//! The document writer: lays out the labels and the images of every segment across the pages,
//! keeping track of where each image ends up.

use crate::compression;
use crate::configuration::LayoutConfiguration;
use crate::error::{ContextError, ImageError, SkipReason};
use crate::manifest::{Alias, Placement};
use crate::workspace::{Dimensions, Segment, Workspace, WorkspaceImage};

/// The metadata written in the document information dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: String,
    pub subject: String,
    pub author: String,
    pub keywords: String,
}

/// The drawing capability the writer lays the document out on. Positions and sizes are in points,
/// measured from the top-left corner of the current page.
pub trait DocumentCanvas {
    /// Paints the encoded image in the given rectangle of the current page.
    fn add_image(
        &mut self,
        payload: &[u8],
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        alias: Option<&str>,
    ) -> Result<(), ContextError>;

    /// Writes a single line of text whose top is at the given position.
    fn add_text(&mut self, text: &str, x: f32, y: f32, font_size: f32) -> Result<(), ContextError>;

    /// Reads the intrinsic size of the encoded image without fully decoding it.
    fn intrinsic_size(&self, payload: &[u8]) -> Result<Dimensions, ContextError>;

    fn start_new_page(&mut self);

    /// The 1-based number of the page currently drawn on.
    fn current_page_number(&self) -> u32;

    fn page_size(&self) -> (f32, f32);

    fn set_document_metadata(&mut self, metadata: DocumentMetadata);
}

/// An image that was embedded in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedImage {
    pub segment: Segment,
    /// 0-based position of the image in its segment.
    pub index: usize,
    pub alias: String,
    pub placement: Placement,
}

/// An image that was left out of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedImage {
    pub segment: Segment,
    pub index: usize,
    pub alias: String,
    pub reason: SkipReason,
}

/// Everything the writer learned while laying out the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutcome {
    pub placements: Vec<PlacedImage>,
    pub skipped: Vec<SkippedImage>,
    /// Dimensions measured for images that had none cached, to be cached by the caller.
    pub measured: Vec<(Segment, usize, Dimensions)>,
    pub page_count: u32,
}

/// Lays out the workspace on the canvas, one segment after the other in ascending order.
///
/// Failures of single images are recorded in the outcome and never stop the layout.
pub fn render_workspace<C: DocumentCanvas>(
    canvas: &mut C,
    workspace: &Workspace,
    layout: &LayoutConfiguration,
) -> RenderOutcome {
    let mut writer = DocumentWriter::new(canvas, layout);
    writer.write_header(workspace.student_name());
    for (segment, images) in workspace.iter() {
        if images.is_empty() {
            continue;
        }
        writer.write_segment(segment, images);
    }

    writer.finish()
}

fn too_small() -> ImageError {
    ImageError::Layout {
        reason: SkipReason::TooSmall,
    }
}

/// The state of the layout: the vertical cursor on the current page and the images embedded on it.
struct DocumentWriter<'a, C: DocumentCanvas> {
    canvas: &'a mut C,
    layout: &'a LayoutConfiguration,
    /// Top of the next element, from the top of the page.
    y: f32,
    /// Number of images embedded on the current page so far.
    images_on_page: u32,
    /// Whether anything at all was drawn on the current page.
    content_on_page: bool,
    outcome: RenderOutcome,
}

impl<'a, C: DocumentCanvas> DocumentWriter<'a, C> {
    fn new(canvas: &'a mut C, layout: &'a LayoutConfiguration) -> Self {
        DocumentWriter {
            canvas,
            layout,
            y: layout.margin,
            images_on_page: 0,
            content_on_page: false,
            outcome: RenderOutcome::default(),
        }
    }

    fn finish(mut self) -> RenderOutcome {
        self.outcome.page_count = self.canvas.current_page_number();
        self.outcome
    }

    fn bottom(&self) -> f32 {
        self.layout.page_height - self.layout.margin
    }

    fn remaining_height(&self) -> f32 {
        self.bottom() - self.y
    }

    fn start_new_page(&mut self) {
        self.canvas.start_new_page();
        self.y = self.layout.margin;
        self.images_on_page = 0;
        self.content_on_page = false;
        log::debug!("Continuing on page {}", self.canvas.current_page_number());
    }

    fn write_header(&mut self, student_name: &str) {
        let student_name = student_name.trim();
        if student_name.is_empty() {
            return;
        }
        self.write_line(&format!("Student: {student_name}"));
        self.y += self.layout.vertical_gap;
    }

    fn write_line(&mut self, text: &str) {
        if let Err(error) =
            self.canvas
                .add_text(text, self.layout.margin, self.y, self.layout.label_font_size)
        {
            log::warn!("Unable to write the label {:?}: {}", text, error);
        }
        self.y += self.layout.line_height;
        self.content_on_page = true;
    }

    fn label_block_height(&self, lines: usize) -> f32 {
        if lines == 0 {
            0.0
        } else {
            lines as f32 * self.layout.line_height + self.layout.vertical_gap
        }
    }

    fn write_label_block(&mut self, lines: &[String]) {
        for line in lines {
            self.write_line(line);
        }
        if !lines.is_empty() {
            self.y += self.layout.vertical_gap;
        }
    }

    /// The rendered size of the image within the given bounds. Images are never upscaled.
    fn rendered_size(&self, dimensions: Dimensions, max_height: f32) -> (f32, f32) {
        let width = dimensions.width as f32;
        let height = dimensions.height as f32;
        let scale = (self.layout.content_width() / width)
            .min(max_height / height)
            .min(1.0);

        (width * scale, height * scale)
    }

    fn is_too_small(&self, (width, height): (f32, f32)) -> bool {
        width < self.layout.content_width() * self.layout.minimum_image_fraction
            || height < self.minimum_image_height()
    }

    fn minimum_image_height(&self) -> f32 {
        self.layout.content_height() * self.layout.minimum_image_fraction
    }

    /// Resolves the intrinsic dimensions: cached, then through the canvas, then by decoding.
    fn resolve_dimensions(
        &mut self,
        segment: Segment,
        index: usize,
        image: &WorkspaceImage,
    ) -> Result<Dimensions, ImageError> {
        if let Some(dimensions) = image.dimensions {
            return Ok(dimensions);
        }

        let measured_dimensions = match self.canvas.intrinsic_size(&image.data) {
            Ok(dimensions) => dimensions,
            Err(error) => {
                log::debug!("Falling back to decoding the image to measure it: {error}");
                let decoded_image =
                    compression::decode(&image.data).map_err(|error| ImageError::Dimensions {
                        detail: error.to_string(),
                    })?;
                Dimensions {
                    width: decoded_image.width(),
                    height: decoded_image.height(),
                }
            }
        };
        if measured_dimensions.width == 0 || measured_dimensions.height == 0 {
            return Err(ImageError::Dimensions {
                detail: "the image is empty".into(),
            });
        }

        self.outcome
            .measured
            .push((segment, index, measured_dimensions));
        Ok(measured_dimensions)
    }

    /// Decides where the first image of a segment goes, given the height of the label block that
    /// must precede it on the same page. Returns the rendered size and whether a new page is needed.
    fn plan_first_image(
        &self,
        dimensions: Dimensions,
        label_block_height: f32,
    ) -> Result<((f32, f32), bool), ImageError> {
        let full_size = self.rendered_size(dimensions, self.layout.content_height());
        if self.is_too_small(full_size) {
            return Err(too_small());
        }

        if self.content_on_page {
            let available_height = self.remaining_height() - label_block_height;
            if available_height >= self.minimum_image_height() {
                let size = self.rendered_size(dimensions, available_height);
                if !self.is_too_small(size) {
                    return Ok((size, false));
                }
            }
        }

        // The image goes on top of a fresh page, right after the labels
        let available_height = self.layout.content_height() - label_block_height;
        if available_height <= 0.0 {
            return Err(ImageError::Layout {
                reason: SkipReason::NoSpaceAfterLabels,
            });
        }
        let size = self.rendered_size(dimensions, available_height);
        if self.is_too_small(size) {
            return Err(too_small());
        }

        Ok((size, self.content_on_page))
    }

    fn write_segment(&mut self, segment: Segment, images: &[WorkspaceImage]) {
        let label_lines = self.layout.label_lines(segment);
        let label_block_height = self.label_block_height(label_lines.len());
        let continuation_label = label_lines
            .last()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(|line| format!("{line} (cont.)"));
        let mut labels_written = false;

        for (index, image) in images.iter().enumerate() {
            let alias = Alias {
                segment,
                position: index + 1,
            }
            .to_string();
            let skip = |writer: &mut Self, error: ImageError| {
                let reason = error.skip_reason();
                log::warn!("Skipping image {alias} of segment {segment}: {error}");
                writer.outcome.skipped.push(SkippedImage {
                    segment,
                    index,
                    alias: alias.clone(),
                    reason,
                });
            };

            let dimensions = match self.resolve_dimensions(segment, index, image) {
                Ok(dimensions) => dimensions,
                Err(error) => {
                    skip(self, error);
                    continue;
                }
            };

            let size = if !labels_written {
                let (size, needs_new_page) =
                    match self.plan_first_image(dimensions, label_block_height) {
                        Ok(plan) => plan,
                        Err(error) => {
                            skip(self, error);
                            continue;
                        }
                    };
                if needs_new_page {
                    self.start_new_page();
                }
                self.write_label_block(&label_lines);
                labels_written = true;
                size
            } else {
                let size = self.rendered_size(dimensions, self.layout.content_height());
                if self.is_too_small(size) {
                    skip(self, too_small());
                    continue;
                }
                if size.1 <= self.remaining_height() {
                    size
                } else {
                    let continuation_height = if continuation_label.is_some() {
                        self.label_block_height(1)
                    } else {
                        0.0
                    };
                    let available_height = self.layout.content_height() - continuation_height;
                    let size = self.rendered_size(dimensions, available_height);
                    if available_height <= 0.0 || self.is_too_small(size) {
                        skip(self, too_small());
                        continue;
                    }
                    self.start_new_page();
                    if let Some(continuation_label) = &continuation_label {
                        self.write_label_block(std::slice::from_ref(continuation_label));
                    }
                    size
                }
            };

            let (width, height) = size;
            let x = self.layout.margin + (self.layout.content_width() - width) / 2.0;
            if let Err(error) =
                self.canvas
                    .add_image(&image.data, x, self.y, width, height, Some(&alias))
            {
                skip(
                    self,
                    ImageError::Render {
                        detail: error.to_string(),
                    },
                );
                continue;
            }

            self.images_on_page += 1;
            self.content_on_page = true;
            self.y += height + self.layout.vertical_gap;
            let placement = Placement {
                page: self.canvas.current_page_number(),
                order: self.images_on_page,
            };
            log::debug!(
                "Placed image {alias} on page {} as image {}",
                placement.page,
                placement.order
            );
            self.outcome.placements.push(PlacedImage {
                segment,
                index,
                alias,
                placement,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::PortfolioConfiguration;

    /// What the recording canvas was asked to draw.
    #[derive(Debug, Clone, PartialEq)]
    enum Drawing {
        Text { page: u32, text: String, y: f32 },
        Image { page: u32, alias: String, width: f32, height: f32 },
    }

    /// A canvas reading the size of its "images" from payloads such as `b"400x300"`. Payloads
    /// starting with `broken` have a size but fail to render.
    #[derive(Debug, Default)]
    struct RecordingCanvas {
        page: u32,
        drawings: Vec<Drawing>,
        metadata: DocumentMetadata,
    }

    impl RecordingCanvas {
        fn new() -> Self {
            RecordingCanvas {
                page: 1,
                ..Default::default()
            }
        }

        fn texts(&self) -> Vec<(u32, String)> {
            self.drawings
                .iter()
                .filter_map(|drawing| match drawing {
                    Drawing::Text { page, text, .. } => Some((*page, text.clone())),
                    _ => None,
                })
                .collect()
        }
    }

    impl DocumentCanvas for RecordingCanvas {
        fn add_image(
            &mut self,
            payload: &[u8],
            _x: f32,
            _y: f32,
            width: f32,
            height: f32,
            alias: Option<&str>,
        ) -> Result<(), ContextError> {
            if payload.starts_with(b"broken") {
                return Err(ContextError::with_context("Broken payload"));
            }
            self.drawings.push(Drawing::Image {
                page: self.page,
                alias: alias.unwrap_or_default().to_string(),
                width,
                height,
            });
            Ok(())
        }

        fn add_text(&mut self, text: &str, _x: f32, y: f32, _font_size: f32) -> Result<(), ContextError> {
            self.drawings.push(Drawing::Text {
                page: self.page,
                text: text.to_string(),
                y,
            });
            Ok(())
        }

        fn intrinsic_size(&self, payload: &[u8]) -> Result<Dimensions, ContextError> {
            let payload = String::from_utf8_lossy(payload);
            let size = payload.trim_start_matches("broken");
            let (width, height) = size
                .split_once('x')
                .ok_or(ContextError::with_context("Unknown payload"))?;
            Ok(Dimensions {
                width: width
                    .parse()
                    .map_err(|error| ContextError::with_error("Bad width", &error))?,
                height: height
                    .parse()
                    .map_err(|error| ContextError::with_error("Bad height", &error))?,
            })
        }

        fn start_new_page(&mut self) {
            self.page += 1;
        }

        fn current_page_number(&self) -> u32 {
            self.page
        }

        fn page_size(&self) -> (f32, f32) {
            (595.0, 842.0)
        }

        fn set_document_metadata(&mut self, metadata: DocumentMetadata) {
            self.metadata = metadata;
        }
    }

    fn segment(number: u8) -> Segment {
        Segment::new(number).unwrap()
    }

    fn workspace(images: &[(u8, &str)]) -> Workspace {
        let mut workspace = Workspace::new();
        for (number, payload) in images {
            assert!(workspace.add_image(segment(*number), payload.as_bytes().to_vec()));
        }
        workspace
    }

    fn placements(outcome: &RenderOutcome) -> Vec<(String, u32, u32)> {
        outcome
            .placements
            .iter()
            .map(|placed| {
                (
                    placed.alias.clone(),
                    placed.placement.page,
                    placed.placement.order,
                )
            })
            .collect()
    }

    fn default_layout() -> LayoutConfiguration {
        PortfolioConfiguration::default().layout_configuration()
    }

    #[test]
    fn placements_count_images_per_page() {
        let workspace = workspace(&[
            (1, "1000x400"),
            (1, "1000x400"),
            (1, "1000x400"),
            (2, "1000x400"),
            (2, "1000x400"),
        ]);
        let mut canvas = RecordingCanvas::new();
        let outcome = render_workspace(&mut canvas, &workspace, &default_layout());

        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.page_count, 2);
        assert_eq!(
            placements(&outcome),
            vec![
                ("seg1-img1".to_string(), 1, 1),
                ("seg1-img2".to_string(), 1, 2),
                ("seg1-img3".to_string(), 1, 3),
                ("seg2-img1".to_string(), 1, 4),
                ("seg2-img2".to_string(), 2, 1),
            ]
        );
        assert_eq!(
            canvas.texts(),
            vec![
                (1, "Segment 1".to_string()),
                (1, "Segment 2".to_string()),
                (2, "Segment 2 (cont.)".to_string()),
            ]
        );
        assert_eq!(outcome.measured.len(), 5);
    }

    #[test]
    fn images_are_never_upscaled() {
        let workspace = workspace(&[(3, "200x100")]);
        let mut canvas = RecordingCanvas::new();
        render_workspace(&mut canvas, &workspace, &default_layout());
        assert!(canvas.drawings.contains(&Drawing::Image {
            page: 1,
            alias: "seg3-img1".into(),
            width: 200.0,
            height: 100.0
        }));
    }

    #[test]
    fn labels_move_to_the_next_page_with_their_first_image() {
        // Two tall images fill most of the first page
        let workspace = workspace(&[(1, "500x700"), (2, "1000x1000")]);
        let mut canvas = RecordingCanvas::new();
        let outcome = render_workspace(&mut canvas, &workspace, &default_layout());

        assert_eq!(
            placements(&outcome),
            vec![
                ("seg1-img1".to_string(), 1, 1),
                ("seg2-img1".to_string(), 2, 1),
            ]
        );
        assert_eq!(
            canvas.texts(),
            vec![(1, "Segment 1".to_string()), (2, "Segment 2".to_string())]
        );
    }

    #[test]
    fn failing_images_are_skipped_with_a_reason() {
        let workspace = workspace(&[
            (1, "not an image"),
            (1, "broken800x600"),
            (1, "800x600"),
            (2, "5000x10"),
        ]);
        let mut canvas = RecordingCanvas::new();
        let outcome = render_workspace(&mut canvas, &workspace, &default_layout());

        let reasons: Vec<_> = outcome
            .skipped
            .iter()
            .map(|skipped| (skipped.alias.as_str(), skipped.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("seg1-img1", SkipReason::Dimensions),
                ("seg1-img2", SkipReason::RenderError),
                ("seg2-img1", SkipReason::TooSmall),
            ]
        );
        assert_eq!(placements(&outcome), vec![("seg1-img3".to_string(), 1, 1)]);
        // The labels of a segment without any placed image are never written
        assert_eq!(canvas.texts(), vec![(1, "Segment 1".to_string())]);
    }

    #[test]
    fn oversized_label_blocks_leave_no_space() {
        let mut layout = default_layout();
        layout.segment_labels = vec![(segment(1), vec!["Line".to_string(); 60])];
        let workspace = workspace(&[(1, "800x600"), (2, "800x600")]);
        let mut canvas = RecordingCanvas::new();
        let outcome = render_workspace(&mut canvas, &workspace, &layout);

        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].reason, SkipReason::NoSpaceAfterLabels);
        assert_eq!(placements(&outcome), vec![("seg2-img1".to_string(), 1, 1)]);
    }

    #[test]
    fn blank_label_lines_get_no_continuation() {
        let mut layout = default_layout();
        layout.segment_labels = vec![(segment(1), vec!["Unit 1".to_string(), "  ".to_string()])];
        let workspace = workspace(&[(1, "1000x1000"), (1, "1000x1000")]);
        let mut canvas = RecordingCanvas::new();
        let outcome = render_workspace(&mut canvas, &workspace, &layout);

        assert_eq!(outcome.page_count, 2);
        assert_eq!(
            canvas.texts(),
            vec![(1, "Unit 1".to_string()), (1, "  ".to_string())]
        );
    }

    #[test]
    fn the_student_name_heads_the_first_page() {
        let mut workspace = workspace(&[(4, "800x600")]);
        workspace.set_student_name("Ada Lovelace");
        let mut canvas = RecordingCanvas::new();
        render_workspace(&mut canvas, &workspace, &default_layout());
        assert_eq!(
            canvas.texts(),
            vec![
                (1, "Student: Ada Lovelace".to_string()),
                (1, "Segment 4".to_string())
            ]
        );
    }

    #[test]
    fn cached_dimensions_are_trusted() {
        let mut workspace = workspace(&[(1, "unreadable")]);
        workspace.image_mut(segment(1), 0).unwrap().dimensions = Some(Dimensions {
            width: 300,
            height: 200,
        });
        let mut canvas = RecordingCanvas::new();
        let outcome = render_workspace(&mut canvas, &workspace, &default_layout());
        assert_eq!(outcome.placements.len(), 1);
        assert!(outcome.measured.is_empty());
    }

    #[test]
    fn images_the_canvas_cannot_measure_are_decoded() {
        let png = crate::compression::tests::png_image(300, 200);
        let mut canvas = RecordingCanvas::new();
        assert!(canvas.intrinsic_size(&png).is_err());

        let mut workspace = Workspace::new();
        workspace.add_image(segment(2), png);
        let outcome = render_workspace(&mut canvas, &workspace, &default_layout());

        assert!(outcome.skipped.is_empty());
        assert_eq!(
            outcome.measured,
            vec![(
                segment(2),
                0,
                Dimensions {
                    width: 300,
                    height: 200
                }
            )]
        );
        assert!(canvas.drawings.contains(&Drawing::Image {
            page: 1,
            alias: "seg2-img1".into(),
            width: 300.0,
            height: 200.0
        }));
    }
}
