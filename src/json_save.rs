//! The JSON save format, an alternative to the PDF save which keeps every image as a data URL.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::Value;

use crate::error::{LoadError, ManifestError};
use crate::manifest::{self, validate_segment_images};
use crate::workspace::{Segment, Workspace};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonSave<'a> {
    student_name: &'a str,
    images: BTreeMap<Segment, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

fn mime_type(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::Png) => "image/png",
        _ => "application/octet-stream",
    }
}

fn to_data_url(data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type(data), STANDARD.encode(data))
}

fn from_data_url(data_url: &str) -> Option<Vec<u8>> {
    let (header, payload) = data_url.strip_prefix("data:")?.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    STANDARD.decode(payload.trim()).ok()
}

/// Serializes the whole workspace to the JSON save format.
pub fn to_json(workspace: &Workspace) -> Result<String, ManifestError> {
    let json_save = JsonSave {
        student_name: workspace.student_name(),
        images: workspace
            .iter()
            .map(|(segment, images)| {
                let data_urls = images.iter().map(|image| to_data_url(&image.data)).collect();
                (segment, data_urls)
            })
            .collect(),
        timestamp: manifest::current_timestamp(),
    };

    Ok(serde_json::to_string_pretty(&json_save)?)
}

/// Restores a workspace from the JSON save format.
///
/// Nothing is committed unless every image decodes. Segments are not limited in size, every
/// restored image is trusted to be in the canonical encoding already.
pub fn from_json(json_save: &str, workspace: &mut Workspace) -> Result<(), LoadError> {
    let invalid_save = |detail: &str| LoadError::InvalidSave {
        detail: detail.to_string(),
    };

    let value: Value = serde_json::from_str(json_save).map_err(|error| LoadError::InvalidSave {
        detail: error.to_string(),
    })?;
    let object = value
        .as_object()
        .ok_or_else(|| invalid_save("the save is not an object"))?;
    let student_name = match object.get("studentName") {
        Some(Value::String(student_name)) => student_name.clone(),
        _ => String::new(),
    };
    let segment_images = object
        .get("images")
        .and_then(validate_segment_images)
        .ok_or_else(|| invalid_save("the images are not lists of data URLs"))?;

    let mut decoded_segments = BTreeMap::new();
    for (segment, data_urls) in segment_images {
        let images = data_urls
            .iter()
            .enumerate()
            .map(|(index, data_url)| {
                from_data_url(data_url).ok_or_else(|| LoadError::InvalidSave {
                    detail: format!("image {} of segment {segment} is not a data URL", index + 1),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        decoded_segments.insert(segment, images);
    }

    workspace.set_student_name(student_name);
    for (segment, images) in decoded_segments {
        workspace.replace_all(segment, images, true);
    }
    log::info!(
        "Restored {} images from the JSON save",
        workspace.total_images()
    );

    Ok(())
}
