use std::io::Cursor;

use image::{DynamicImage, Rgb, RgbImage};
use portfolio_pdf::{
    compression,
    configuration::PortfolioConfiguration,
    portfolio,
    reader::{self, LopdfImageSource},
    workspace::{Segment, Workspace, MAX_IMAGES_PER_SEGMENT},
};
use rand::Rng;

fn random_image(rng: &mut impl Rng, width: u32, height: u32) -> Vec<u8> {
    let tint: [u8; 3] = rng.gen();
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            tint[0].wrapping_add((x * 255 / width) as u8),
            tint[1].wrapping_add((y * 255 / height) as u8),
            tint[2],
        ])
    });
    let mut data = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
        .unwrap();
    data
}

fn random_workspace(rng: &mut impl Rng) -> Workspace {
    let mut workspace = Workspace::new();
    workspace.set_student_name(format!("Student {}", rng.gen_range(1..1000)));
    for segment in Segment::all() {
        for _ in 0..rng.gen_range(1..=MAX_IMAGES_PER_SEGMENT) {
            let width = rng.gen_range(60..=480);
            let height = rng.gen_range(60..=480);
            assert!(workspace.add_image(segment, random_image(rng, width, height)));
        }
    }
    workspace
}

fn image_sizes(workspace: &Workspace) -> Vec<(Segment, Vec<(u32, u32)>)> {
    workspace
        .iter()
        .map(|(segment, images)| {
            let sizes = images
                .iter()
                .map(|image| {
                    let decoded = compression::decode(&image.data).unwrap();
                    (decoded.width(), decoded.height())
                })
                .collect();
            (segment, sizes)
        })
        .collect()
}

#[tokio::test]
async fn random_workspaces_survive_the_round_trip() {
    let mut rng = rand::thread_rng();
    let configuration = PortfolioConfiguration::default();

    for _ in 0..3 {
        let mut workspace = random_workspace(&mut rng);
        let save_outcome = portfolio::save_to_pdf(&mut workspace, &configuration).unwrap();
        assert!(save_outcome.skipped.is_empty());
        assert!(save_outcome.compression_failures.is_empty());

        let mut restored = Workspace::new();
        let load_outcome =
            portfolio::load_from_pdf(&save_outcome.pdf_bytes, &mut restored, &configuration)
                .await
                .unwrap();

        assert!(load_outcome.report.success, "{:?}", load_outcome.report);
        assert!(!load_outcome.summary.used_fallback);
        assert_eq!(restored.student_name(), workspace.student_name());
        assert_eq!(restored.segment_counts(), workspace.segment_counts());
        assert_eq!(image_sizes(&restored), image_sizes(&workspace));
    }
}

#[tokio::test]
async fn saving_a_loaded_workspace_again_is_stable() {
    let mut rng = rand::thread_rng();
    let configuration = PortfolioConfiguration::default();
    let mut workspace = random_workspace(&mut rng);
    let first_save = portfolio::save_to_pdf(&mut workspace, &configuration).unwrap();

    let mut restored = Workspace::new();
    portfolio::load_from_pdf(&first_save.pdf_bytes, &mut restored, &configuration)
        .await
        .unwrap();
    let loaded_images = restored.clone();
    let second_save = portfolio::save_to_pdf(&mut restored, &configuration).unwrap();

    assert_eq!(second_save.manifest.segments, first_save.manifest.segments);
    assert_eq!(
        second_save.manifest.image_manifest,
        first_save.manifest.image_manifest
    );
    assert_eq!(
        second_save.manifest.image_placements,
        first_save.manifest.image_placements
    );
    // Restored images are trusted and go through the second save untouched
    for (segment, images) in loaded_images.iter() {
        for (image, saved_image) in images.iter().zip(restored.images(segment)) {
            assert_eq!(image.data, saved_image.data);
        }
    }
}

#[tokio::test]
async fn writer_placements_match_reader_extractions() {
    let mut rng = rand::thread_rng();
    let mut workspace = Workspace::new();
    let first = Segment::new(1).unwrap();
    let second = Segment::new(2).unwrap();
    for segment in [first, first, first, second, second] {
        workspace.add_image(segment, random_image(&mut rng, 1000, 400));
    }

    let configuration = PortfolioConfiguration::default();
    let save_outcome = portfolio::save_to_pdf(&mut workspace, &configuration).unwrap();
    assert_eq!(save_outcome.page_count, 2);

    let source = LopdfImageSource::from_bytes(&save_outcome.pdf_bytes).unwrap();
    let extraction = reader::extract_images(
        &source,
        configuration.extraction_timeout(),
        configuration.compression.jpeg_quality,
    )
    .await;
    assert!(extraction.skipped.is_empty());

    let written: Vec<_> = save_outcome
        .manifest
        .image_placements
        .iter()
        .map(|entry| (entry.page, entry.order))
        .collect();
    let extracted: Vec<_> = extraction
        .images
        .iter()
        .map(|image| (image.page, image.order))
        .collect();
    assert_eq!(written, vec![(1, 1), (1, 2), (1, 3), (1, 4), (2, 1)]);
    assert_eq!(written, extracted);
}
