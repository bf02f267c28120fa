use std::collections::BTreeMap;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::ManifestError;
use crate::workspace::Segment;

/// The prefix of the document keywords that carries the encoded manifest.
pub const KEYWORDS_PREFIX: &str = "PPRDATA:";

/// Declared segment counts above this value cannot come from a real save.
pub const MAX_DECLARED_COUNT: u64 = u16::MAX as u64;

/// The per-save identity `seg{N}-img{K}` of the K-th image (1-based) of segment N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Alias {
    pub segment: Segment,
    pub position: usize,
}

impl std::fmt::Display for Alias {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "seg{}-img{}", self.segment, self.position)
    }
}

impl FromStr for Alias {
    type Err = ManifestError;

    fn from_str(alias: &str) -> Result<Self, Self::Err> {
        let parse = || {
            let (segment, position) = alias.strip_prefix("seg")?.split_once("-img")?;
            let segment = Segment::new(segment.parse().ok()?)?;
            let position = position.parse().ok().filter(|position| *position >= 1)?;
            Some(Alias { segment, position })
        };

        parse().ok_or(ManifestError::Validation)
    }
}

/// An entry of the alias manifest, which declares the segment each alias belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub alias: String,
    pub segment: u8,
}

/// Where an image ended up in the rendered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Placement {
    /// 1-based page number.
    pub page: u32,
    /// 1-based position of the image among the images embedded on that page.
    pub order: u32,
}

/// The placement recorded for an alias while rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementEntry {
    pub alias: String,
    pub page: u32,
    pub order: u32,
}

impl PlacementEntry {
    pub fn placement(&self) -> Placement {
        Placement {
            page: self.page,
            order: self.order,
        }
    }
}

/// The record embedded in the document, describing how to reconstruct the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub student_name: String,
    pub segments: BTreeMap<Segment, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_manifest: Option<Vec<ManifestEntry>>,
    pub image_placements: Vec<PlacementEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Builds the alias manifest for the given per-segment counts, in ascending segment order and
/// then in insertion order within each segment.
pub fn alias_manifest(segment_counts: &BTreeMap<Segment, usize>) -> Vec<ManifestEntry> {
    segment_counts
        .iter()
        .flat_map(|(segment, count)| {
            (1..=*count).map(move |position| ManifestEntry {
                alias: Alias {
                    segment: *segment,
                    position,
                }
                .to_string(),
                segment: segment.number(),
            })
        })
        .collect()
}

impl Manifest {
    /// Creates a manifest for the given counts, with the alias manifest filled in and no placements.
    pub fn new(student_name: String, segment_counts: BTreeMap<Segment, usize>) -> Self {
        let image_manifest = alias_manifest(&segment_counts);
        Manifest {
            student_name,
            segments: segment_counts,
            image_manifest: Some(image_manifest),
            image_placements: Vec::new(),
            timestamp: None,
        }
    }

    /// The total number of images declared by the per-segment counts.
    pub fn declared_images(&self) -> usize {
        self.segments
            .values()
            .try_fold(0usize, |total, count| total.checked_add(*count))
            .unwrap_or(usize::MAX)
    }

    pub fn declared_count(&self, segment: Segment) -> usize {
        self.segments.get(&segment).copied().unwrap_or(0)
    }

    /// The aliases expected in the document, in the order they are claimed while reconstructing.
    ///
    /// The explicit alias manifest is used when it agrees with the declared counts, otherwise it
    /// is distrusted and the aliases are synthesized from the counts.
    pub fn expected_aliases(&self) -> Vec<(String, Segment)> {
        if let Some(image_manifest) = &self.image_manifest {
            let entries: Option<Vec<(String, Segment)>> = image_manifest
                .iter()
                .map(|entry| Some((entry.alias.clone(), Segment::new(entry.segment)?)))
                .collect();
            match entries {
                Some(entries) if entries.len() == self.declared_images() => return entries,
                _ => log::warn!(
                    "The alias manifest does not match the declared segment counts, synthesizing the aliases"
                ),
            }
        }

        alias_manifest(&self.segments)
            .into_iter()
            .filter_map(|entry| Some((entry.alias, Segment::new(entry.segment)?)))
            .collect()
    }

    /// The placement recorded for the alias, if any.
    pub fn placement_of(&self, alias: &str) -> Option<Placement> {
        self.image_placements
            .iter()
            .find(|entry| entry.alias == alias)
            .map(PlacementEntry::placement)
    }

    /// Checks a parsed JSON object and turns it into a manifest.
    ///
    /// The check is permissive: older saves lacking the alias manifest or the placements still
    /// validate, and segments that are not mentioned count as empty. Only structurally impossible
    /// data is rejected.
    pub fn validate(value: &Value) -> Option<Manifest> {
        let object = value.as_object()?;

        let student_name = match object.get("studentName") {
            Some(Value::String(student_name)) => student_name.clone(),
            _ => String::new(),
        };

        let declared_counts = match object.get("segments") {
            Some(segments) => Some(validate_segment_counts(segments)?),
            None => None,
        };
        let listed_images = match object.get("images") {
            Some(images) => Some(validate_segment_images(images)?),
            None => None,
        };
        let segments = match (declared_counts, listed_images) {
            (Some(declared_counts), _) => declared_counts,
            (None, Some(listed_images)) => listed_images
                .into_iter()
                .map(|(segment, images)| (segment, images.len()))
                .collect(),
            (None, None) => Segment::all().map(|segment| (segment, 0)).collect(),
        };

        let image_manifest = object.get("imageManifest").and_then(|image_manifest| {
            let entries = serde_json::from_value::<Vec<ManifestEntry>>(image_manifest.clone());
            if entries.is_err() {
                log::warn!("Ignoring a malformed alias manifest");
            }
            entries.ok()
        });

        let image_placements = match object.get("imagePlacements") {
            Some(Value::Array(placements)) => placements
                .iter()
                .filter_map(|placement| {
                    serde_json::from_value::<PlacementEntry>(placement.clone())
                        .ok()
                        .filter(|placement| placement.page >= 1 && placement.order >= 1)
                })
                .collect(),
            _ => Vec::new(),
        };

        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Manifest {
            student_name,
            segments,
            image_manifest,
            image_placements,
            timestamp,
        })
    }
}

/// Validates a `{segment: count}` mapping, coercing missing segments to zero.
fn validate_segment_counts(segments: &Value) -> Option<BTreeMap<Segment, usize>> {
    let segments = segments.as_object()?;
    let mut segment_counts: BTreeMap<Segment, usize> =
        Segment::all().map(|segment| (segment, 0)).collect();

    for (key, count) in segments {
        let count = count.as_u64().filter(|count| *count <= MAX_DECLARED_COUNT)?;
        let count = usize::try_from(count).ok()?;
        match Segment::from_key(key) {
            Some(segment) => {
                segment_counts.insert(segment, count);
            }
            None => log::warn!("Ignoring the count of the unknown segment {key:?}"),
        }
    }

    Some(segment_counts)
}

/// Validates a `{segment: [string, ...]}` mapping, coercing missing segments to empty lists.
pub(crate) fn validate_segment_images(images: &Value) -> Option<BTreeMap<Segment, Vec<String>>> {
    let images = images.as_object()?;
    let mut segment_images: BTreeMap<Segment, Vec<String>> =
        Segment::all().map(|segment| (segment, Vec::new())).collect();

    for (key, list) in images {
        let list = list
            .as_array()?
            .iter()
            .map(|entry| entry.as_str().map(str::to_string))
            .collect::<Option<Vec<String>>>()?;
        match Segment::from_key(key) {
            Some(segment) => {
                segment_images.insert(segment, list);
            }
            None => log::warn!("Ignoring the images of the unknown segment {key:?}"),
        }
    }

    Some(segment_images)
}

/// Serializes the manifest to JSON and then to a printable text that survives a text metadata field.
pub fn encode(manifest: &Manifest) -> Result<String, ManifestError> {
    let manifest_json = serde_json::to_string(manifest)?;
    Ok(STANDARD.encode(manifest_json.as_bytes()))
}

/// The exact inverse of the printable transform: recovers the JSON text.
pub fn decode(encoded_manifest: &str) -> Result<String, ManifestError> {
    let manifest_bytes =
        STANDARD
            .decode(encoded_manifest.trim())
            .map_err(|error| ManifestError::Encoding {
                detail: error.to_string(),
            })?;

    String::from_utf8(manifest_bytes).map_err(|error| ManifestError::Encoding {
        detail: error.to_string(),
    })
}

/// Decodes, parses and validates an encoded manifest. Any failure means that there is no usable
/// manifest, which is logged and reported as `None`.
pub fn parse(encoded_manifest: &str) -> Option<Manifest> {
    let parsed = decode(encoded_manifest).and_then(|manifest_json| {
        let value: Value = serde_json::from_str(&manifest_json)?;
        Manifest::validate(&value).ok_or(ManifestError::Validation)
    });

    match parsed {
        Ok(manifest) => Some(manifest),
        Err(error) => {
            log::warn!("Unable to use the embedded manifest: {error}");
            None
        }
    }
}

/// The current time in the RFC 3339 format used by the save timestamps.
pub fn current_timestamp() -> Option<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|error| log::warn!("Unable to format the save timestamp: {error}"))
        .ok()
}

/// Formats the keywords field of the document carrying the manifest.
pub fn to_keywords(manifest: &Manifest) -> Result<String, ManifestError> {
    Ok(format!("{KEYWORDS_PREFIX}{}", encode(manifest)?))
}

/// Locates the manifest payload in a keywords field and parses it.
pub fn from_keywords(keywords: &str) -> Option<Manifest> {
    let (_, payload) = keywords.split_once(KEYWORDS_PREFIX)?;
    // Other keywords may follow the payload, which never contains whitespace
    let payload = payload.split_whitespace().next().unwrap_or_default();
    parse(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segment(number: u8) -> Segment {
        Segment::new(number).unwrap()
    }

    fn counts(counts: [usize; 4]) -> BTreeMap<Segment, usize> {
        Segment::all().zip(counts).collect()
    }

    #[test]
    fn aliases_follow_segment_then_insertion_order() {
        let image_manifest = alias_manifest(&counts([2, 0, 1, 3]));
        let aliases: Vec<_> = image_manifest
            .iter()
            .map(|entry| entry.alias.as_str())
            .collect();
        assert_eq!(
            aliases,
            vec!["seg1-img1", "seg1-img2", "seg3-img1", "seg4-img1", "seg4-img2", "seg4-img3"]
        );
        assert_eq!(image_manifest[2].segment, 3);
        // Recomputing without mutation gives the very same manifest
        assert_eq!(image_manifest, alias_manifest(&counts([2, 0, 1, 3])));
    }

    #[test]
    fn aliases_parse_back() {
        let alias: Alias = "seg4-img3".parse().unwrap();
        assert_eq!(alias.segment, segment(4));
        assert_eq!(alias.position, 3);
        assert_eq!(alias.to_string(), "seg4-img3");
        assert!("seg9-img1".parse::<Alias>().is_err());
        assert!("seg1-img0".parse::<Alias>().is_err());
        assert!("img1".parse::<Alias>().is_err());
    }

    #[test]
    fn encoding_round_trips_unicode() {
        let mut manifest = Manifest::new("Zoë Ñúñez 学生".into(), counts([1, 2, 0, 0]));
        manifest.image_placements.push(PlacementEntry {
            alias: "seg1-img1".into(),
            page: 1,
            order: 1,
        });
        manifest.timestamp = Some("2026-10-16T10:00:00Z".into());

        let encoded_manifest = encode(&manifest).unwrap();
        assert!(encoded_manifest
            .bytes()
            .all(|byte| byte.is_ascii_graphic()));
        similar_asserts::assert_eq!(parse(&encoded_manifest).unwrap(), manifest);
    }

    #[test]
    fn manifest_json_uses_the_save_file_field_names() {
        let manifest = Manifest::new("Ada".into(), counts([1, 0, 0, 0]));
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["studentName"], json!("Ada"));
        assert_eq!(value["segments"]["1"], json!(1));
        assert_eq!(value["segments"]["4"], json!(0));
        assert_eq!(
            value["imageManifest"],
            json!([{ "alias": "seg1-img1", "segment": 1 }])
        );
        assert_eq!(value["imagePlacements"], json!([]));
    }

    #[test]
    fn malformed_text_yields_no_manifest() {
        assert!(matches!(
            decode("this is *not* base64!"),
            Err(ManifestError::Encoding { .. })
        ));
        assert!(parse("this is *not* base64!").is_none());

        let not_json = STANDARD.encode("{ studentName: oops");
        assert!(decode(&not_json).is_ok());
        assert!(parse(&not_json).is_none());

        let not_utf8 = STANDARD.encode([0xff, 0xfe, 0xfd]);
        assert!(parse(&not_utf8).is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn validation_coerces_missing_segments() {
        let manifest = Manifest::validate(&json!({
            "studentName": "Old Save",
            "segments": { "2": 3, "9": 4 }
        }))
        .unwrap();
        assert_eq!(manifest.segments, counts([0, 3, 0, 0]));
        assert_eq!(manifest.image_manifest, None);
        assert!(manifest.image_placements.is_empty());
        assert_eq!(manifest.expected_aliases().len(), 3);
    }

    #[test]
    fn validation_rejects_impossible_structures() {
        assert!(Manifest::validate(&json!([1, 2, 3])).is_none());
        assert!(Manifest::validate(&json!({ "segments": [1, 2] })).is_none());
        assert!(Manifest::validate(&json!({ "segments": { "1": "two" } })).is_none());
        assert!(Manifest::validate(&json!({ "images": { "1": "a" } })).is_none());
        assert!(Manifest::validate(&json!({ "images": { "1": ["a", 3] } })).is_none());
    }

    #[test]
    fn absurd_segment_counts_are_rejected() {
        let absurd_manifest = json!({
            "segments": { "1": u64::MAX, "2": 1 },
            "imageManifest": []
        });
        assert!(Manifest::validate(&absurd_manifest).is_none());
        assert!(parse(&STANDARD.encode(absurd_manifest.to_string())).is_none());
        assert!(Manifest::validate(&json!({ "segments": { "3": 1_000_000_000_000u64 } })).is_none());

        let largest = Manifest::validate(&json!({
            "segments": { "1": MAX_DECLARED_COUNT, "2": 1 }
        }))
        .unwrap();
        assert_eq!(largest.declared_images(), MAX_DECLARED_COUNT as usize + 1);
        assert_eq!(largest.declared_count(segment(2)), 1);

        let mut overflowing = Manifest::new(String::new(), counts([0, 0, 0, 0]));
        overflowing.segments.insert(segment(1), usize::MAX);
        overflowing.segments.insert(segment(2), 1);
        assert_eq!(overflowing.declared_images(), usize::MAX);
    }

    #[test]
    fn validation_derives_counts_from_listed_images() {
        let manifest = Manifest::validate(&json!({
            "images": { "1": ["a", "b"], "3": [] }
        }))
        .unwrap();
        assert_eq!(manifest.segments, counts([2, 0, 0, 0]));
        assert_eq!(manifest.student_name, "");
    }

    #[test]
    fn malformed_optional_fields_are_dropped() {
        let manifest = Manifest::validate(&json!({
            "segments": { "1": 1 },
            "imageManifest": "garbage",
            "imagePlacements": [
                { "alias": "seg1-img1", "page": 1, "order": 1 },
                { "alias": "seg1-img2", "page": "one" },
                { "alias": "seg1-img3", "page": 0, "order": 1 }
            ]
        }))
        .unwrap();
        assert_eq!(manifest.image_manifest, None);
        assert_eq!(manifest.image_placements.len(), 1);
        assert_eq!(
            manifest.placement_of("seg1-img1"),
            Some(Placement { page: 1, order: 1 })
        );
    }

    #[test]
    fn stale_alias_manifests_are_distrusted() {
        let mut manifest = Manifest::new(String::new(), counts([1, 1, 0, 0]));
        manifest.image_manifest = Some(vec![ManifestEntry {
            alias: "seg2-img1".into(),
            segment: 2,
        }]);
        let expected_aliases: Vec<_> = manifest
            .expected_aliases()
            .into_iter()
            .map(|(alias, _)| alias)
            .collect();
        assert_eq!(expected_aliases, vec!["seg1-img1", "seg2-img1"]);
    }

    #[test]
    fn keywords_carry_the_prefixed_payload() {
        let manifest = Manifest::new("Ada".into(), counts([0, 0, 1, 0]));
        let keywords = to_keywords(&manifest).unwrap();
        assert!(keywords.starts_with(KEYWORDS_PREFIX));
        assert_eq!(from_keywords(&keywords), Some(manifest.clone()));
        assert_eq!(from_keywords(&format!("portfolio {keywords} art")), Some(manifest));
        assert_eq!(from_keywords("portfolio art"), None);
        assert_eq!(from_keywords("PPRDATA:%%%"), None);
    }
}
