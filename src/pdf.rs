use std::{collections::BTreeMap, io::BufWriter, io::Cursor, mem};

use image::{
    codecs::{jpeg::JpegDecoder, png::PngDecoder},
    ColorType, ImageDecoder as _, ImageFormat,
};
use lopdf::{content::Operation, Object, ObjectId, StringFormat};
use time::OffsetDateTime;
use unicode_normalization::UnicodeNormalization as _;

use crate::error::ContextError;
use crate::layout::{DocumentCanvas, DocumentMetadata};
use crate::workspace::Dimensions;

/// The resource name of the only font used in the documents, which is the standard Helvetica.
const LABEL_FONT_NAME: &str = "F1";

/// The low-level image representation for a PDF document.
#[derive(Debug, Clone)]
pub struct ImageXObject {
    /// Width of the image in pixels (not the rendered width).
    pub width: u32,
    /// Height of the image in pixels (not the rendered height).
    pub height: u32,
    /// The PDF color space of the samples, either `DeviceRGB` or `DeviceGray`.
    pub color_space: &'static str,
    /// Whether `image_data` is a JPEG stream to be decoded with the `DCTDecode` filter,
    /// otherwise it holds the raw 8-bit samples.
    pub is_jpeg: bool,
    /// The actual data from the image.
    pub image_data: Vec<u8>,
    /// The alias of the image in the save, kept as the `Name` of the `XObject`.
    pub alias: Option<String>,
}

impl ImageXObject {
    /// Prepares an encoded payload for embedding. JPEG payloads are embedded as they are, any other
    /// format is decoded into RGB samples.
    pub fn from_payload(payload: &[u8], alias: Option<&str>) -> Result<Self, ContextError> {
        let format = image::guess_format(payload)
            .map_err(|error| ContextError::with_error("Unable to recognize the image format", &error))?;

        if format == ImageFormat::Jpeg {
            let decoder = JpegDecoder::new(Cursor::new(payload))
                .map_err(|error| ContextError::with_error("Unable to read the JPEG header", &error))?;
            let (width, height) = decoder.dimensions();
            let color_space = match decoder.color_type() {
                ColorType::L8 => Some("DeviceGray"),
                ColorType::Rgb8 => Some("DeviceRGB"),
                _ => None,
            };
            if let Some(color_space) = color_space {
                return Ok(ImageXObject {
                    width,
                    height,
                    color_space,
                    is_jpeg: true,
                    image_data: payload.to_vec(),
                    alias: alias.map(str::to_string),
                });
            }
        }

        // Any other layout of samples is normalized to plain 8-bit RGB
        let decoded_image = image::load_from_memory(payload)
            .map_err(|error| ContextError::with_error("Unable to decode the image", &error))?
            .to_rgb8();
        Ok(ImageXObject {
            width: decoded_image.width(),
            height: decoded_image.height(),
            color_space: "DeviceRGB",
            is_jpeg: false,
            image_data: decoded_image.into_raw(),
            alias: alias.map(str::to_string),
        })
    }
}

impl From<ImageXObject> for lopdf::Stream {
    fn from(value: ImageXObject) -> Self {
        use lopdf::Object::*;

        let mut dictionary = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("XObject".into())),
            ("Subtype", Name("Image".into())),
            ("Width", Integer(value.width as i64)),
            ("Height", Integer(value.height as i64)),
            ("ColorSpace", Name(value.color_space.into())),
            ("BitsPerComponent", Integer(8)),
        ]);
        if let Some(alias) = value.alias {
            dictionary.set("Name", Name(alias.into_bytes()));
        }

        if value.is_jpeg {
            dictionary.set("Filter", Name("DCTDecode".into()));
            // The JPEG data is already compressed, it must not be deflated on top
            lopdf::Stream::new(dictionary, value.image_data).with_compression(false)
        } else {
            lopdf::Stream::new(dictionary, value.image_data)
        }
    }
}

/// Named reference to an `XObject`.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct XObjectReference(String);

impl XObjectReference {
    /// Creates a new reference for an `XObject` from a number.
    pub fn new(index: usize) -> Self {
        Self(format!("Im{index}"))
    }
}

/// Struct for storing the PDF Resources, to be used on a PDF page.
#[derive(Default, Debug, Clone)]
pub(crate) struct PdfResources {
    /// The image `XObject`s painted on the page, by resource name.
    pub xobjects: BTreeMap<String, ObjectId>,
}

impl PdfResources {
    /// Constructs the resource dictionary of a page, which references the shared font dictionary.
    fn to_dictionary(&self, font_id: ObjectId) -> lopdf::Dictionary {
        let mut dictionary = lopdf::Dictionary::new();
        dictionary.set(
            "Font",
            lopdf::Dictionary::from_iter(vec![(LABEL_FONT_NAME, Object::Reference(font_id))]),
        );

        if !self.xobjects.is_empty() {
            let xobjects: lopdf::Dictionary = self
                .xobjects
                .iter()
                .map(|(name, object_id)| (name.clone(), Object::Reference(*object_id)))
                .collect();
            dictionary.set("XObject", xobjects);
        }

        dictionary
    }
}

/// The representation of a PDF page, whose operations are collected while laying out the document.
#[derive(Debug, Clone)]
pub struct PdfPage {
    /// The number of the page in the document, starting from 1.
    pub(crate) number: u32,
    /// Page width in points.
    pub width: f32,
    /// Page height in points.
    pub height: f32,
    /// The content stream operations of the page.
    pub(crate) operations: Vec<Operation>,
    /// Resources used in this page.
    pub(crate) resources: PdfResources,
}

impl PdfPage {
    fn new(number: u32, width: f32, height: f32) -> Self {
        PdfPage {
            number,
            width,
            height,
            operations: Vec::new(),
            resources: PdfResources::default(),
        }
    }

    /// Encodes the operations into the content stream of the page.
    fn content_stream(&self) -> Result<lopdf::Stream, ContextError> {
        let stream_content = lopdf::content::Content {
            operations: self.operations.clone(),
        };
        let encoded_content = stream_content.encode().map_err(|error| {
            ContextError::with_error(
                format!("Failed to encode the content of page {}", self.number),
                &error,
            )
        })?;

        Ok(lopdf::Stream::new(lopdf::Dictionary::new(), encoded_content))
    }
}

/// This struct represents the PDF document on a high-level. It is an interface to the underlying
/// `lopdf::Document` which collects the pages while they are laid out, and implements the
/// `DocumentCanvas` the document writer draws on.
///
/// All positions given to the canvas are measured in points from the top-left corner of the page,
/// the conversion to the bottom-left origin of the PDF specification happens here.
pub struct PdfDocument {
    /// The underlying PDF document: this is a low-level interface and shouldn't be directly interacted with
    /// unless strictly necessary.
    pub inner_document: lopdf::Document,
    /// The identifier of the document, it is used to in order to set the PDF `ID` tag.
    pub identifier: String,
    /// The pages of the PDF document.
    pub(crate) pages: Vec<PdfPage>,
    /// The metadata to be written in the document information dictionary.
    metadata: DocumentMetadata,
    /// The object of the standard font used for the labels.
    font_id: ObjectId,
    page_width: f32,
    page_height: f32,
}

impl PdfDocument {
    /// Create a new `PdfDocument` with a first empty page, defaulting the underlying PDF document
    /// to version 1.5 of the PDF specification.
    ///
    /// # Arguments
    ///
    /// * `identifier` - The identifier to be given to the PDF document.
    /// * `page_width` - The width of every page in points.
    /// * `page_height` - The height of every page in points.
    pub fn new(identifier: String, page_width: f32, page_height: f32) -> Self {
        use lopdf::Object::*;

        let mut inner_document = lopdf::Document::with_version("1.5");
        // Standard fonts need no embedded font program, any PDF reader provides them
        let font_id = inner_document.add_object(lopdf::Dictionary::from_iter(vec![
            ("Type", Name("Font".into())),
            ("Subtype", Name("Type1".into())),
            ("BaseFont", Name("Helvetica".into())),
            ("Encoding", Name("WinAnsiEncoding".into())),
        ]));

        PdfDocument {
            inner_document,
            identifier,
            pages: vec![PdfPage::new(1, page_width, page_height)],
            metadata: DocumentMetadata::default(),
            font_id,
            page_width,
            page_height,
        }
    }

    /// Write the collected pages and the metadata to the underlying document and finalize it.
    fn write_all(&mut self) -> Result<(), ContextError> {
        use lopdf::Object::*;
        use lopdf::StringFormat::*;

        let creation_date = to_pdf_timestamp_format(&OffsetDateTime::now_utc());
        let document_info = lopdf::Dictionary::from_iter(vec![
            ("Title", text_string(&self.metadata.title)),
            ("Subject", text_string(&self.metadata.subject)),
            ("Author", text_string(&self.metadata.author)),
            ("Keywords", text_string(&self.metadata.keywords)),
            ("Creator", text_string(env!("CARGO_PKG_NAME"))),
            (
                "Producer",
                text_string(&format!(
                    "{} {}",
                    env!("CARGO_PKG_NAME"),
                    env!("CARGO_PKG_VERSION")
                )),
            ),
            (
                "CreationDate",
                String(creation_date.clone().into_bytes(), Literal),
            ),
            ("ModDate", String(creation_date.into_bytes(), Literal)),
            ("Trapped", "False".into()),
        ]);
        let document_info_id = self.inner_document.add_object(Dictionary(document_info));

        // Construct the catalog, required by the PDF specification
        let pages_id = self.inner_document.new_object_id();
        let catalog = lopdf::Dictionary::from_iter(vec![
            ("Type", "Catalog".into()),
            ("PageLayout", "OneColumn".into()),
            ("PageMode", "UseNone".into()),
            ("Pages", Reference(pages_id)),
        ]);
        let catalog_id = self.inner_document.add_object(catalog);

        self.inner_document
            .trailer
            .set("Root", Reference(catalog_id));
        self.inner_document
            .trailer
            .set("Info", Reference(document_info_id));
        self.inner_document.trailer.set(
            "ID",
            Array(vec![
                String(self.identifier.clone().into_bytes(), Literal),
                String(self.identifier.clone().into_bytes(), Literal),
            ]),
        );

        let mut page_ids = Vec::<Object>::new();
        for page in self.pages.iter() {
            let media_box: Object =
                vec![0.into(), 0.into(), page.width.into(), page.height.into()].into();
            let mut page_dictionary = lopdf::Dictionary::from_iter(vec![
                ("Type", "Page".into()),
                ("Rotate", Integer(0)),
                ("MediaBox", media_box.clone()),
                ("CropBox", media_box),
                ("Parent", Reference(pages_id)),
            ]);

            let resources_id = self
                .inner_document
                .add_object(Dictionary(page.resources.to_dictionary(self.font_id)));
            page_dictionary.set("Resources", Reference(resources_id));

            let content_id = self.inner_document.add_object(page.content_stream()?);
            page_dictionary.set("Contents", Reference(content_id));

            let page_id = self.inner_document.add_object(page_dictionary);
            page_ids.push(Reference(page_id));
        }

        let pages = lopdf::Dictionary::from_iter(vec![
            ("Type", "Pages".into()),
            ("Count", Integer(self.pages.len() as i64)),
            ("Kids", Array(page_ids)),
        ]);
        self.inner_document
            .objects
            .insert(pages_id, Dictionary(pages));

        Ok(())
    }

    /// Finalize the document and save it to bytes in order for it to be written to a file or further processed.
    pub fn save_to_bytes(mut self) -> Result<Vec<u8>, ContextError> {
        self.write_all()?;
        // Deflates the content streams and the raw image samples, JPEG streams opted out of it
        self.inner_document.compress();

        let mut pdf_document_bytes = Vec::new();
        let mut writer = BufWriter::new(&mut pdf_document_bytes);
        self.inner_document.save_to(&mut writer).map_err(|error| {
            ContextError::with_error("Error while saving the PDF document to bytes", &error)
        })?;
        mem::drop(writer);

        Ok(pdf_document_bytes)
    }

    fn current_page_mut(&mut self) -> Result<&mut PdfPage, ContextError> {
        self.pages
            .last_mut()
            .ok_or(ContextError::with_context("The document has no pages"))
    }
}

impl DocumentCanvas for PdfDocument {
    fn add_image(
        &mut self,
        payload: &[u8],
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        alias: Option<&str>,
    ) -> Result<(), ContextError> {
        let image_xobject = ImageXObject::from_payload(payload, alias)?;
        let image_stream: lopdf::Stream = image_xobject.into();
        let image_id = self.inner_document.add_object(image_stream);

        let page = self.current_page_mut()?;
        let XObjectReference(image_name) =
            XObjectReference::new(page.resources.xobjects.len() + 1);
        page.resources.xobjects.insert(image_name.clone(), image_id);

        // The image space is the unit square, which is scaled and moved into place
        let bottom = page.height - y - height;
        page.operations.extend(vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    x.into(),
                    bottom.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(image_name.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);

        Ok(())
    }

    fn add_text(&mut self, text: &str, x: f32, y: f32, font_size: f32) -> Result<(), ContextError> {
        let page = self.current_page_mut()?;
        // `y` is the top of the line, while PDF text is positioned on its baseline
        let baseline = page.height - y - font_size;
        page.operations.extend(vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(LABEL_FONT_NAME.into()), font_size.into()],
            ),
            Operation::new("Td", vec![x.into(), baseline.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(
                    to_win_ansi_bytes(text),
                    StringFormat::Literal,
                )],
            ),
            Operation::new("ET", vec![]),
        ]);

        Ok(())
    }

    fn intrinsic_size(&self, payload: &[u8]) -> Result<Dimensions, ContextError> {
        let format = image::guess_format(payload)
            .map_err(|error| ContextError::with_error("Unable to recognize the image format", &error))?;
        let (width, height) = match format {
            ImageFormat::Jpeg => JpegDecoder::new(Cursor::new(payload))
                .map_err(|error| ContextError::with_error("Unable to read the JPEG header", &error))?
                .dimensions(),
            ImageFormat::Png => PngDecoder::new(Cursor::new(payload))
                .map_err(|error| ContextError::with_error("Unable to read the PNG header", &error))?
                .dimensions(),
            other => {
                return Err(ContextError::with_context(format!(
                    "Unable to introspect images in the {:?} format",
                    other
                )))
            }
        };

        Ok(Dimensions { width, height })
    }

    fn start_new_page(&mut self) {
        let number = self.pages.len() as u32 + 1;
        self.pages
            .push(PdfPage::new(number, self.page_width, self.page_height));
    }

    fn current_page_number(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_size(&self) -> (f32, f32) {
        (self.page_width, self.page_height)
    }

    fn set_document_metadata(&mut self, metadata: DocumentMetadata) {
        self.metadata = metadata;
    }
}

/// Encodes a PDF text string: plain ASCII is kept as it is, anything else is written in UTF-16BE
/// with a byte order mark as the PDF specification requires.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut encoded_text = vec![0xFE, 0xFF];
    for code_unit in text.encode_utf16() {
        encoded_text.extend_from_slice(&code_unit.to_be_bytes());
    }

    Object::String(encoded_text, StringFormat::Hexadecimal)
}

/// Decodes a PDF text string written either in UTF-16BE with a byte order mark or in a single
/// byte encoding.
pub fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let code_units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&code_units)
        }
        _ => bytes.iter().map(|byte| *byte as char).collect(),
    }
}

/// Converts the label text to the single byte encoding of the standard font. The text is normalized
/// in the NFC form first, so that accented letters map onto a single byte when possible.
fn to_win_ansi_bytes(text: &str) -> Vec<u8> {
    text.nfc()
        .map(|character| match u8::try_from(character as u32) {
            Ok(byte) if byte >= 0x20 && !(0x7F..0xA0).contains(&byte) => byte,
            _ => {
                log::warn!("Unable to write the character {:?} with the label font", character);
                b'?'
            }
        })
        .collect()
}

/// Formats the given time so that it matches what the PDF specification expects.
/// An example of it is the following: D:20170505150224+02'00'.
fn to_pdf_timestamp_format(date: &OffsetDateTime) -> String {
    let offset = date.offset();
    let offset_sign = if offset.is_negative() { '-' } else { '+' };
    format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}{offset_sign}{:02}'{:02}'",
        date.year(),
        u8::from(date.month()),
        date.day(),
        date.hour(),
        date.minute(),
        date.second(),
        offset.whole_hours().abs(),
        offset.minutes_past_hour().abs(),
    )
}
