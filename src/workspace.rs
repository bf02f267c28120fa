use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Number of segments every workspace is made of.
pub const SEGMENT_COUNT: u8 = 4;
/// Maximum number of images a user can interactively add to a single segment.
pub const MAX_IMAGES_PER_SEGMENT: usize = 3;

/// One of the fixed labeled sections of the document, numbered from 1 to `SEGMENT_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Segment(u8);

impl Segment {
    /// Returns the segment with the given number, if it is in range.
    pub fn new(number: u8) -> Option<Segment> {
        (1..=SEGMENT_COUNT)
            .contains(&number)
            .then_some(Segment(number))
    }

    /// Parses a segment from the decimal form used as a key in the saved JSON.
    pub fn from_key(key: &str) -> Option<Segment> {
        key.trim().parse::<u8>().ok().and_then(Segment::new)
    }

    /// All the segments in ascending order.
    pub fn all() -> impl Iterator<Item = Segment> {
        (1..=SEGMENT_COUNT).map(Segment)
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Intrinsic pixel size of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// An image held by the workspace, together with the metadata the save flow keeps about it.
///
/// The metadata travels with the payload, so removing or reordering images can never
/// misalign an image from its flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceImage {
    /// The encoded payload (JPEG, PNG...).
    pub data: Vec<u8>,
    /// Whether the payload is already in the canonical compressed encoding.
    pub compressed: bool,
    /// Whether the last render of this image failed.
    pub render_error: bool,
    /// Cached intrinsic dimensions, if they have been measured.
    pub dimensions: Option<Dimensions>,
}

impl WorkspaceImage {
    /// An image freshly added by the user.
    pub fn raw(data: Vec<u8>) -> Self {
        WorkspaceImage {
            data,
            compressed: false,
            render_error: false,
            dimensions: None,
        }
    }

    /// An image restored from a save file, whose encoding is trusted.
    pub fn trusted(data: Vec<u8>) -> Self {
        WorkspaceImage {
            compressed: true,
            ..WorkspaceImage::raw(data)
        }
    }
}

/// The in-memory state being edited: the student name and the images of every segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    student_name: String,
    segments: BTreeMap<Segment, Vec<WorkspaceImage>>,
}

impl Default for Workspace {
    fn default() -> Self {
        Workspace::new()
    }
}

impl Workspace {
    /// Creates an empty workspace where every segment is present and empty.
    pub fn new() -> Self {
        Workspace {
            student_name: String::new(),
            segments: Segment::all().map(|segment| (segment, Vec::new())).collect(),
        }
    }

    pub fn student_name(&self) -> &str {
        &self.student_name
    }

    pub fn set_student_name<S: Into<String>>(&mut self, student_name: S) {
        self.student_name = student_name.into();
    }

    /// Whether the segment already holds the maximum number of images.
    pub fn is_full(&self, segment: Segment) -> bool {
        self.images(segment).len() >= MAX_IMAGES_PER_SEGMENT
    }

    /// Appends a raw image to the segment. Does nothing and returns `false` if the segment is full,
    /// callers are expected to check `is_full` beforehand and warn the user.
    pub fn add_image(&mut self, segment: Segment, data: Vec<u8>) -> bool {
        let images = self.segments.entry(segment).or_default();
        if images.len() >= MAX_IMAGES_PER_SEGMENT {
            log::debug!("Segment {segment} is full, ignoring the added image");
            return false;
        }
        images.push(WorkspaceImage::raw(data));

        true
    }

    /// Removes the image at the given position, shifting the following ones down.
    pub fn remove_image(&mut self, segment: Segment, index: usize) -> Option<WorkspaceImage> {
        let images = self.segments.get_mut(&segment)?;
        (index < images.len()).then(|| images.remove(index))
    }

    /// Replaces every image of the segment. The metadata of the new images is reset to the
    /// defaults of their trust level. No count limit is enforced.
    pub fn replace_all(&mut self, segment: Segment, images: Vec<Vec<u8>>, trusted: bool) {
        let images = images
            .into_iter()
            .map(|data| {
                if trusted {
                    WorkspaceImage::trusted(data)
                } else {
                    WorkspaceImage::raw(data)
                }
            })
            .collect();
        self.segments.insert(segment, images);
    }

    pub fn images(&self, segment: Segment) -> &[WorkspaceImage] {
        self.segments
            .get(&segment)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn image_mut(&mut self, segment: Segment, index: usize) -> Option<&mut WorkspaceImage> {
        self.segments.get_mut(&segment)?.get_mut(index)
    }

    /// The number of images of every segment, in ascending segment order.
    pub fn segment_counts(&self) -> BTreeMap<Segment, usize> {
        Segment::all()
            .map(|segment| (segment, self.images(segment).len()))
            .collect()
    }

    pub fn total_images(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    /// Iterates over every segment together with its images, in ascending segment order.
    pub fn iter(&self) -> impl Iterator<Item = (Segment, &[WorkspaceImage])> {
        Segment::all().map(move |segment| (segment, self.images(segment)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(number: u8) -> Segment {
        Segment::new(number).unwrap()
    }

    #[test]
    fn segments_are_bounded() {
        assert!(Segment::new(0).is_none());
        assert!(Segment::new(SEGMENT_COUNT + 1).is_none());
        assert_eq!(Segment::from_key(" 3 "), Segment::new(3));
        assert_eq!(Segment::from_key("seven"), None);
        assert_eq!(Segment::all().count(), SEGMENT_COUNT as usize);
    }

    #[test]
    fn adding_to_a_full_segment_is_a_no_op() {
        let mut workspace = Workspace::new();
        for index in 0..MAX_IMAGES_PER_SEGMENT {
            assert!(workspace.add_image(segment(2), vec![index as u8]));
        }
        assert!(workspace.is_full(segment(2)));
        assert!(!workspace.add_image(segment(2), vec![42]));
        assert_eq!(workspace.images(segment(2)).len(), MAX_IMAGES_PER_SEGMENT);
        assert!(workspace.images(segment(2)).iter().all(|image| image.data != [42]));
    }

    #[test]
    fn removing_keeps_metadata_aligned() {
        let mut workspace = Workspace::new();
        workspace.add_image(segment(1), vec![1]);
        workspace.add_image(segment(1), vec![2]);
        workspace.add_image(segment(1), vec![3]);
        workspace.image_mut(segment(1), 2).unwrap().render_error = true;
        workspace.image_mut(segment(1), 1).unwrap().dimensions = Some(Dimensions {
            width: 20,
            height: 10,
        });

        let removed = workspace.remove_image(segment(1), 0).unwrap();
        assert_eq!(removed.data, vec![1]);

        let images = workspace.images(segment(1));
        assert_eq!(images[0].data, vec![2]);
        assert_eq!(images[0].dimensions.map(|dimensions| dimensions.width), Some(20));
        assert_eq!(images[1].data, vec![3]);
        assert!(images[1].render_error);
        assert!(workspace.remove_image(segment(1), 5).is_none());
    }

    #[test]
    fn replacing_resets_metadata_from_trust() {
        let mut workspace = Workspace::new();
        workspace.add_image(segment(4), vec![9]);
        workspace.image_mut(segment(4), 0).unwrap().render_error = true;

        workspace.replace_all(segment(4), vec![vec![1], vec![2], vec![3], vec![4]], true);
        let images = workspace.images(segment(4));
        assert_eq!(images.len(), 4);
        assert!(images
            .iter()
            .all(|image| image.compressed && !image.render_error && image.dimensions.is_none()));

        workspace.replace_all(segment(4), vec![vec![5]], false);
        assert!(!workspace.images(segment(4))[0].compressed);
    }

    #[test]
    fn counts_cover_every_segment() {
        let mut workspace = Workspace::new();
        workspace.add_image(segment(3), vec![0]);
        let counts = workspace.segment_counts();
        assert_eq!(counts.len(), SEGMENT_COUNT as usize);
        assert_eq!(counts[&segment(3)], 1);
        assert_eq!(counts[&segment(1)], 0);
        assert_eq!(workspace.total_images(), 1);
    }
}
