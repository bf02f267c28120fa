//! The document reader: recovers the manifest and the embedded images of a save file, in the
//! order the document writer painted them.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{content::Content, Dictionary, Document, Object, ObjectId, Stream};

use crate::compression;
use crate::error::{ImageError, LoadError};
use crate::manifest::{self, Manifest, Placement};
use crate::pdf::decode_text_string;

/// Nesting limit of the Form XObjects walked while looking for image paints.
const MAXIMUM_FORM_DEPTH: usize = 16;

/// A document whose painted images can be enumerated and resolved into pixels.
///
/// Resolving pixels may be slow or never finish, callers bound every wait. A source that lazily
/// materializes its objects gets the chance to do so through `force_render`.
#[allow(async_fn_in_trait)]
pub trait EmbeddedImageSource {
    /// An opaque handle on one image paint operation.
    type Paint: Clone + std::fmt::Debug;

    fn page_count(&self) -> u32;

    /// Every image paint of the 1-based page, in content order.
    fn image_paints(&self, page: u32) -> Vec<Self::Paint>;

    /// Resolves the pixels of the paint. `Ok(None)` means they are not available yet.
    async fn resolve_pixels(&self, paint: &Self::Paint) -> Result<Option<DynamicImage>, ImageError>;

    /// Fully renders the page, so that all of its objects become available.
    async fn force_render(&self, page: u32);

    /// The raw keywords of the document information dictionary.
    fn document_keywords(&self) -> Option<String>;
}

/// An image recovered from the document, re-encoded in the canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    /// 0-based position among the successful extractions.
    pub index: usize,
    pub page: u32,
    /// 1-based position among the successful extractions of the page.
    pub order: u32,
    pub data: Vec<u8>,
}

impl ExtractedImage {
    pub fn placement(&self) -> Placement {
        Placement {
            page: self.page,
            order: self.order,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// The pixels were still unavailable after the retry.
    Timeout,
    /// The pixels could not be decoded or re-encoded.
    Undecodable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedExtraction {
    pub page: u32,
    pub reason: ExtractionFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub images: Vec<ExtractedImage>,
    pub skipped: Vec<SkippedExtraction>,
}

/// Reads and validates the manifest embedded in the document keywords.
pub fn read_save_manifest<S: EmbeddedImageSource>(source: &S) -> Result<Manifest, LoadError> {
    let keywords = source.document_keywords().ok_or(LoadError::NotASaveFile {
        detail: "the document has no keywords".into(),
    })?;

    manifest::from_keywords(&keywords).ok_or_else(|| {
        log::warn!("The document keywords carry no valid manifest");
        LoadError::NotASaveFile {
            detail: "the keywords carry no valid manifest".into(),
        }
    })
}

enum Resolution {
    Pixels(DynamicImage),
    Pending,
    Undecodable(ImageError),
}

async fn resolve_within<S: EmbeddedImageSource>(
    source: &S,
    paint: &S::Paint,
    timeout: Duration,
) -> Resolution {
    match tokio::time::timeout(timeout, source.resolve_pixels(paint)).await {
        Ok(Ok(Some(pixels))) => Resolution::Pixels(pixels),
        Ok(Ok(None)) | Err(_) => Resolution::Pending,
        Ok(Err(error)) => Resolution::Undecodable(error),
    }
}

/// Extracts every painted image, page after page, in content order.
///
/// Each resolution is bounded by the timeout. An unavailable image triggers a forced render of its
/// page and a single retry. Failures are recorded and never interrupt the extraction, the
/// placements of the successful images follow the numbering of the document writer. Resolved
/// pixels are re-encoded as JPEG at the given quality.
pub async fn extract_images<S: EmbeddedImageSource>(
    source: &S,
    timeout: Duration,
    jpeg_quality: u8,
) -> Extraction {
    let mut extraction = Extraction::default();

    for page in 1..=source.page_count() {
        let mut order = 0;
        for paint in source.image_paints(page) {
            let resolution = match resolve_within(source, &paint, timeout).await {
                Resolution::Pending => {
                    log::debug!("Forcing the render of page {page} to resolve {paint:?}");
                    source.force_render(page).await;
                    resolve_within(source, &paint, timeout).await
                }
                resolution => resolution,
            };

            let encoded_image = match resolution {
                Resolution::Pixels(pixels) => compression::encode_canonical(&pixels, jpeg_quality),
                Resolution::Pending => Err(ImageError::ExtractionTimeout {
                    page,
                    millis: timeout.as_millis() as u64,
                }),
                Resolution::Undecodable(error) => Err(error),
            };

            match encoded_image {
                Ok(data) => {
                    order += 1;
                    extraction.images.push(ExtractedImage {
                        index: extraction.images.len(),
                        page,
                        order,
                        data,
                    });
                }
                Err(error) => {
                    log::warn!("Skipping an image of page {page}: {error}");
                    let reason = match error {
                        ImageError::ExtractionTimeout { .. } => ExtractionFailure::Timeout,
                        _ => ExtractionFailure::Undecodable,
                    };
                    extraction.skipped.push(SkippedExtraction { page, reason });
                }
            }
        }
    }

    log::info!(
        "Extracted {} images, {} skipped",
        extraction.images.len(),
        extraction.skipped.len()
    );
    extraction
}

/// The images of a parsed PDF document. Every object is available as soon as the document is
/// parsed, pixels are decoded on demand.
pub struct LopdfImageSource {
    document: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl LopdfImageSource {
    pub fn from_bytes(pdf_bytes: &[u8]) -> Result<Self, LoadError> {
        let document = Document::load_mem(pdf_bytes).map_err(|error| LoadError::NotAPdf {
            detail: error.to_string(),
        })?;
        let pages = document.get_pages();

        Ok(LopdfImageSource { document, pages })
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> Option<&'a Object> {
        match object {
            Object::Reference(object_id) => self.document.get_object(*object_id).ok(),
            _ => Some(object),
        }
    }

    fn resolve_dictionary<'a>(&'a self, object: &'a Object) -> Option<&'a Dictionary> {
        match self.resolve(object)? {
            Object::Dictionary(dictionary) => Some(dictionary),
            _ => None,
        }
    }

    /// The resources of the page, possibly inherited from an ancestor of the page tree.
    fn page_resources(&self, page_id: ObjectId) -> Option<&Dictionary> {
        let mut node = self.document.get_dictionary(page_id).ok()?;
        for _ in 0..MAXIMUM_FORM_DEPTH {
            if let Some(resources) = node
                .get(b"Resources")
                .ok()
                .and_then(|resources| self.resolve_dictionary(resources))
            {
                return Some(resources);
            }
            node = node
                .get(b"Parent")
                .ok()
                .and_then(|parent| self.resolve_dictionary(parent))?;
        }

        None
    }

    fn xobjects(&self, resources: Option<&Dictionary>) -> BTreeMap<Vec<u8>, ObjectId> {
        resources
            .and_then(|resources| resources.get(b"XObject").ok())
            .and_then(|xobjects| self.resolve_dictionary(xobjects))
            .map(|xobjects| {
                xobjects
                    .iter()
                    .filter_map(|(name, value)| match value {
                        Object::Reference(object_id) => Some((name.clone(), *object_id)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Walks the content stream and records every image paint, descending into Form XObjects.
    fn collect_paints(
        &self,
        content: &[u8],
        resources: Option<&Dictionary>,
        forms_in_progress: &mut HashSet<ObjectId>,
        paints: &mut Vec<ObjectId>,
    ) {
        let content = match Content::decode(content) {
            Ok(content) => content,
            Err(error) => {
                log::warn!("Unable to parse a content stream: {error}");
                return;
            }
        };
        let xobjects = self.xobjects(resources);

        for operation in content.operations {
            if operation.operator != "Do" {
                continue;
            }
            let Some(Object::Name(name)) = operation.operands.first() else {
                continue;
            };
            let Some(&object_id) = xobjects.get(name) else {
                log::debug!("Unknown XObject {:?}", String::from_utf8_lossy(name));
                continue;
            };
            let Ok(Object::Stream(stream)) = self.document.get_object(object_id) else {
                continue;
            };

            match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                Ok(b"Image") => paints.push(object_id),
                Ok(b"Form") => {
                    if forms_in_progress.len() >= MAXIMUM_FORM_DEPTH
                        || !forms_in_progress.insert(object_id)
                    {
                        log::warn!("Not descending into the form {object_id:?} again");
                        continue;
                    }
                    let form_resources = stream
                        .dict
                        .get(b"Resources")
                        .ok()
                        .and_then(|form_resources| self.resolve_dictionary(form_resources))
                        .or(resources);
                    let form_content = stream_samples(stream);
                    self.collect_paints(&form_content, form_resources, forms_in_progress, paints);
                    forms_in_progress.remove(&object_id);
                }
                _ => {}
            }
        }
    }

    fn color_space(&self, stream: &Stream) -> String {
        let Some(color_space) = stream
            .dict
            .get(b"ColorSpace")
            .ok()
            .and_then(|color_space| self.resolve(color_space))
        else {
            return String::new();
        };

        let name = match color_space {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(array) => array.first().and_then(|first| first.as_name().ok()),
            _ => None,
        };
        name.map(|name| String::from_utf8_lossy(name).into_owned())
            .unwrap_or_default()
    }

    fn decode_image(&self, stream: &Stream) -> Result<DynamicImage, ImageError> {
        let filters = stream_filters(stream);
        if filters.iter().any(|filter| filter == "DCTDecode") {
            return Ok(image::load_from_memory_with_format(
                &stream.content,
                ImageFormat::Jpeg,
            )?);
        }

        let dimension = |key: &[u8]| {
            stream
                .dict
                .get(key)
                .and_then(Object::as_i64)
                .ok()
                .and_then(|value| u32::try_from(value).ok())
                .filter(|value| *value > 0)
                .ok_or_else(|| ImageError::Decode {
                    detail: format!("missing {}", String::from_utf8_lossy(key)),
                })
        };
        let width = dimension(b"Width")?;
        let height = dimension(b"Height")?;
        let bits_per_component = stream
            .dict
            .get(b"BitsPerComponent")
            .and_then(Object::as_i64)
            .unwrap_or(8);
        if bits_per_component != 8 {
            return Err(ImageError::Decode {
                detail: format!("{bits_per_component} bits per component are not supported"),
            });
        }
        if let Some(filter) = filters.iter().find(|filter| *filter != "FlateDecode") {
            return Err(ImageError::Decode {
                detail: format!("the {filter} filter is not supported"),
            });
        }

        samples_to_image(&stream_samples(stream), width, height, &self.color_space(stream))
    }
}

/// The names of the filters applied to the stream, in decoding order.
fn stream_filters(stream: &Stream) -> Vec<String> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![String::from_utf8_lossy(name).into_owned()],
        Ok(Object::Array(filters)) => filters
            .iter()
            .filter_map(|filter| filter.as_name().ok())
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect(),
        _ => Vec::new(),
    }
}

/// The decoded bytes of the stream, or its raw content if it is not encoded.
fn stream_samples(stream: &Stream) -> Vec<u8> {
    if stream_filters(stream).is_empty() {
        return stream.content.clone();
    }
    stream.decompressed_content().unwrap_or_else(|error| {
        log::debug!("Using the raw stream content, decompression failed: {error}");
        stream.content.clone()
    })
}

fn samples_to_image(
    samples: &[u8],
    width: u32,
    height: u32,
    color_space: &str,
) -> Result<DynamicImage, ImageError> {
    let sample_count = |components: usize| {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixel_count| pixel_count.checked_mul(components))
            .ok_or_else(|| ImageError::Decode {
                detail: format!("the image size {width}x{height} is out of range"),
            })
    };
    let components = match color_space {
        "DeviceGray" | "CalGray" => 1,
        "DeviceCMYK" => 4,
        "DeviceRGB" | "CalRGB" => 3,
        // ICC profiles are guessed from the amount of samples
        "ICCBased" if samples.len() >= sample_count(3)? => 3,
        "ICCBased" => 1,
        other => {
            return Err(ImageError::Decode {
                detail: format!("the {other:?} color space is not supported"),
            })
        }
    };
    let expected_length = sample_count(components)?;
    if samples.len() < expected_length {
        return Err(ImageError::Decode {
            detail: format!(
                "expected {expected_length} samples, found {}",
                samples.len()
            ),
        });
    }
    let samples = &samples[..expected_length];
    let too_large = || ImageError::Decode {
        detail: "inconsistent image size".into(),
    };

    match components {
        1 => GrayImage::from_raw(width, height, samples.to_vec())
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(too_large),
        3 => RgbImage::from_raw(width, height, samples.to_vec())
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(too_large),
        _ => {
            let rgb_samples = samples
                .chunks_exact(4)
                .flat_map(|cmyk| {
                    let key = 255 - cmyk[3] as u32;
                    [0, 1, 2].map(|channel| ((255 - cmyk[channel] as u32) * key / 255) as u8)
                })
                .collect();
            RgbImage::from_raw(width, height, rgb_samples)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(too_large)
        }
    }
}

impl EmbeddedImageSource for LopdfImageSource {
    type Paint = ObjectId;

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn image_paints(&self, page: u32) -> Vec<ObjectId> {
        let Some(&page_id) = self.pages.get(&page) else {
            return Vec::new();
        };
        let content = match self.document.get_page_content(page_id) {
            Ok(content) => content,
            Err(error) => {
                log::warn!("Unable to read the content of page {page}: {error}");
                return Vec::new();
            }
        };

        let mut paints = Vec::new();
        self.collect_paints(
            &content,
            self.page_resources(page_id),
            &mut HashSet::new(),
            &mut paints,
        );
        paints
    }

    async fn resolve_pixels(&self, paint: &ObjectId) -> Result<Option<DynamicImage>, ImageError> {
        match self.document.get_object(*paint) {
            Ok(Object::Stream(stream)) => self.decode_image(stream).map(Some),
            Ok(_) => Err(ImageError::Decode {
                detail: format!("the object {paint:?} is not an image"),
            }),
            Err(error) => Err(ImageError::Decode {
                detail: error.to_string(),
            }),
        }
    }

    async fn force_render(&self, _page: u32) {}

    fn document_keywords(&self) -> Option<String> {
        let information = self
            .document
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|information| self.resolve_dictionary(information))?;
        let keywords = information.get(b"Keywords").ok()?;

        match self.resolve(keywords)? {
            Object::String(bytes, _) => Some(decode_text_string(bytes)),
            _ => None,
        }
    }
}
