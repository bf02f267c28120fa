//! The save and load flows, tying the workspace to the document writer and the document reader.

use crate::compression::{self, CompressionFailure};
use crate::configuration::PortfolioConfiguration;
use crate::error::{ContextError, LoadError};
use crate::layout::{self, DocumentCanvas, DocumentMetadata, SkippedImage};
use crate::manifest::{self, Manifest, PlacementEntry};
use crate::pdf::PdfDocument;
use crate::reader::{self, EmbeddedImageSource, LopdfImageSource};
use crate::reconstruct::{self, LoadSummary};
use crate::report::{self, ReconciliationReport};
use crate::workspace::{Segment, Workspace};

/// The result of a successful save.
#[derive(Debug)]
pub struct SaveOutcome {
    pub pdf_bytes: Vec<u8>,
    /// The manifest embedded in the document.
    pub manifest: Manifest,
    /// The images left out of the document.
    pub skipped: Vec<SkippedImage>,
    /// The images embedded in their original encoding because they could not be compressed.
    pub compression_failures: Vec<CompressionFailure>,
    pub page_count: u32,
}

/// The result of a load that found a valid manifest, whether or not every image was recovered.
#[derive(Debug)]
pub struct LoadOutcome {
    pub manifest: Manifest,
    pub summary: LoadSummary,
    pub report: ReconciliationReport,
}

/// Renders the workspace into a PDF save file.
///
/// Images are compressed first, and the ones that could not be rendered are flagged on the
/// workspace. The manifest is embedded last, once the placements of every image are known.
pub fn save_to_pdf(
    workspace: &mut Workspace,
    configuration: &PortfolioConfiguration,
) -> Result<SaveOutcome, ContextError> {
    let compression_failures =
        compression::compress_workspace(workspace, &configuration.compression);

    let layout_configuration = configuration.layout_configuration();
    let timestamp = manifest::current_timestamp();
    let mut document = PdfDocument::new(
        format!(
            "portfolio-{}",
            timestamp.as_deref().unwrap_or(env!("CARGO_PKG_VERSION"))
        ),
        layout_configuration.page_width,
        layout_configuration.page_height,
    );
    let render_outcome = layout::render_workspace(&mut document, workspace, &layout_configuration);

    for (segment, index, dimensions) in &render_outcome.measured {
        if let Some(image) = workspace.image_mut(*segment, *index) {
            image.dimensions = Some(*dimensions);
        }
    }
    for segment in Segment::all() {
        for index in 0..workspace.images(segment).len() {
            let render_error = render_outcome
                .skipped
                .iter()
                .any(|skipped| skipped.segment == segment && skipped.index == index);
            if let Some(image) = workspace.image_mut(segment, index) {
                image.render_error = render_error;
            }
        }
    }

    let mut manifest = Manifest::new(
        workspace.student_name().to_string(),
        workspace.segment_counts(),
    );
    manifest.image_placements = render_outcome
        .placements
        .iter()
        .map(|placed| PlacementEntry {
            alias: placed.alias.clone(),
            page: placed.placement.page,
            order: placed.placement.order,
        })
        .collect();
    manifest.timestamp = timestamp;

    let keywords = manifest::to_keywords(&manifest)
        .map_err(|error| ContextError::with_error("Unable to encode the manifest", &error))?;
    document.set_document_metadata(DocumentMetadata {
        title: configuration.document_title.clone(),
        subject: configuration.document_subject.clone(),
        author: workspace.student_name().to_string(),
        keywords,
    });
    let pdf_bytes = document.save_to_bytes()?;

    log::info!(
        "Saved {} of {} images on {} pages ({} skipped, {} not compressed)",
        render_outcome.placements.len(),
        workspace.total_images(),
        render_outcome.page_count,
        render_outcome.skipped.len(),
        compression_failures.len()
    );

    Ok(SaveOutcome {
        pdf_bytes,
        manifest,
        skipped: render_outcome.skipped,
        compression_failures,
        page_count: render_outcome.page_count,
    })
}

/// Restores the workspace from a PDF save file.
///
/// A document without a valid manifest leaves the workspace untouched. Otherwise every segment is
/// replaced by whatever could be recovered, even partially, and the report tells what is missing.
pub async fn load_from_pdf(
    pdf_bytes: &[u8],
    workspace: &mut Workspace,
    configuration: &PortfolioConfiguration,
) -> Result<LoadOutcome, LoadError> {
    let source = LopdfImageSource::from_bytes(pdf_bytes)?;
    load_from_source(&source, workspace, configuration).await
}

/// Restores the workspace from any source of embedded images.
pub async fn load_from_source<S: EmbeddedImageSource>(
    source: &S,
    workspace: &mut Workspace,
    configuration: &PortfolioConfiguration,
) -> Result<LoadOutcome, LoadError> {
    let manifest = reader::read_save_manifest(source)?;
    log::debug!(
        "Found a save of {:?} declaring {} images",
        manifest.student_name,
        manifest.declared_images()
    );

    let extraction = reader::extract_images(
        source,
        configuration.extraction_timeout(),
        configuration.compression.jpeg_quality,
    )
    .await;
    let reconstruction =
        reconstruct::reconstruct(&manifest, extraction.images, extraction.skipped.len());

    workspace.set_student_name(manifest.student_name.clone());
    for (segment, images) in reconstruction.segments {
        workspace.replace_all(segment, images, true);
    }

    let report = report::reconcile(&reconstruction.summary);
    for message in &report.messages {
        if report.success {
            log::info!("{message}");
        } else {
            log::warn!("{message}");
        }
    }

    Ok(LoadOutcome {
        manifest,
        summary: reconstruction.summary,
        report,
    })
}
