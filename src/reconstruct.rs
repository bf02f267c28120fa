use std::collections::{BTreeMap, HashMap};

use crate::manifest::{Manifest, Placement};
use crate::reader::ExtractedImage;
use crate::workspace::Segment;

/// How many images a segment declared and how many were recovered for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentTally {
    pub expected: usize,
    pub received: usize,
}

/// The structured outcome of a load, the input of the reconciliation report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub segments: BTreeMap<Segment, SegmentTally>,
    /// Whether at least one image was assigned by extraction order instead of by placement.
    pub used_fallback: bool,
    /// Number of images the reader could not extract.
    pub skipped: usize,
    /// Number of extracted images that no alias claimed.
    pub leftover: usize,
}

impl LoadSummary {
    pub fn expected_total(&self) -> usize {
        self.segments.values().map(|tally| tally.expected).sum()
    }

    pub fn received_total(&self) -> usize {
        self.segments.values().map(|tally| tally.received).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconstruction {
    /// The recovered images of every segment, in alias order.
    pub segments: BTreeMap<Segment, Vec<Vec<u8>>>,
    pub summary: LoadSummary,
}

/// Maps the extracted images back to the aliases declared by the manifest.
///
/// Every alias first claims the image found at its recorded placement. Aliases without a usable
/// placement claim the next unclaimed image in extraction order. This fallback is best effort: when
/// several segments miss images it may hand an image to the wrong segment.
pub fn reconstruct(
    manifest: &Manifest,
    extracted_images: Vec<ExtractedImage>,
    skipped: usize,
) -> Reconstruction {
    let by_placement: HashMap<Placement, usize> = extracted_images
        .iter()
        .enumerate()
        .map(|(position, image)| (image.placement(), position))
        .collect();
    let mut claimed = vec![false; extracted_images.len()];
    let mut assignments: Vec<(Segment, usize)> = Vec::new();
    let mut used_fallback = false;

    for (alias, segment) in manifest.expected_aliases() {
        let placed_image = manifest
            .placement_of(&alias)
            .and_then(|placement| by_placement.get(&placement).copied())
            .filter(|position| !claimed[*position]);

        let position = match placed_image {
            Some(position) => Some(position),
            None => {
                let next_unclaimed = claimed.iter().position(|claimed| !claimed);
                if let Some(position) = next_unclaimed {
                    log::warn!(
                        "Assigning the extracted image {} to {alias} by document order",
                        extracted_images[position].index
                    );
                    used_fallback = true;
                }
                next_unclaimed
            }
        };

        match position {
            Some(position) => {
                claimed[position] = true;
                assignments.push((segment, position));
            }
            None => log::warn!("No image left for {alias}"),
        }
    }

    let leftover = claimed.iter().filter(|claimed| !**claimed).count();
    if leftover > 0 {
        log::warn!("Dropping {leftover} extracted images that no alias claimed");
    }

    let mut images: Vec<Option<Vec<u8>>> = extracted_images
        .into_iter()
        .map(|image| Some(image.data))
        .collect();
    let mut segments: BTreeMap<Segment, Vec<Vec<u8>>> =
        Segment::all().map(|segment| (segment, Vec::new())).collect();
    for (segment, position) in assignments {
        if let Some(data) = images[position].take() {
            segments.entry(segment).or_default().push(data);
        }
    }

    let tallies = Segment::all()
        .map(|segment| {
            let tally = SegmentTally {
                expected: manifest.declared_count(segment),
                received: segments.get(&segment).map_or(0, Vec::len),
            };
            (segment, tally)
        })
        .collect();

    Reconstruction {
        segments,
        summary: LoadSummary {
            segments: tallies,
            used_fallback,
            skipped,
            leftover,
        },
    }
}
