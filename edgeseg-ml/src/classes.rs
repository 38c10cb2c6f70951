//! Class lists of the supported datasets.
//!
//! The position of a name is the output channel the network produces for it.

pub const CITYSCAPES_CLASSES: &[&str] = &[
    "road",
    "sidewalk",
    "building",
    "wall",
    "fence",
    "pole",
    "traffic light",
    "traffic sign",
    "vegetation",
    "terrain",
    "sky",
    "person",
    "rider",
    "car",
    "truck",
    "bus",
    "train",
    "motorcycle",
    "bicycle",
    "background",
];

pub const VOC_CLASSES: &[&str] = &[
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "potted plant",
    "sheep",
    "sofa",
    "train",
    "tv/monitor",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_counts() {
        assert_eq!(CITYSCAPES_CLASSES.len(), 20);
        assert_eq!(VOC_CLASSES.len(), 21);
        assert_eq!(CITYSCAPES_CLASSES[19], "background");
        assert_eq!(VOC_CLASSES[0], "background");
    }
}
