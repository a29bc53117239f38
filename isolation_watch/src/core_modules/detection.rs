// THEORY:
// The `detection` module defines the data unit that crosses the boundary between
// the external object detector and the engine. The detector speaks in raw,
// multi-class boxes; the engine only ever sees people. `DetectionFrame::from_raw`
// is the single gate between the two worlds: it drops every non-person class,
// computes centroids, and discards people standing in the dead margin at the
// left/right edge of the frame, where a partially visible person would otherwise
// look artificially alone.
//
// Like `SmartBlob`, a `Detection` is a "dumb" snapshot. It is only valid for the
// lifetime of one frame and carries no identity of its own.

/// COCO class id the detector uses for "person".
pub const PERSON_CLASS_ID: u32 = 0;

/// One box as produced by the object detector, before any filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// An axis-aligned person box and its centroid, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub center_x: i32,
    pub center_y: i32,
}

impl Detection {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            center_x: (x1 + x2).div_euclid(2),
            center_y: (y1 + y2).div_euclid(2),
        }
    }

    pub fn center(&self) -> (i32, i32) {
        (self.center_x, self.center_y)
    }

    /// True when the centroid lies inside the dead band at the left or right edge.
    fn in_edge_margin(&self, frame_width: u32, margin: u32) -> bool {
        let width = i64::from(frame_width);
        let margin = i64::from(margin);
        let cx = i64::from(self.center_x);
        cx < margin || cx > width - margin
    }
}

/// Every person detected in a single frame, in detector order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionFrame {
    pub frame_width: u32,
    pub frame_height: u32,
    pub detections: Vec<Detection>,
}

impl DetectionFrame {
    /// Builds the engine's view of a frame from raw detector output.
    pub fn from_raw(raw: &[RawDetection], frame_width: u32, frame_height: u32, edge_margin: u32) -> Self {
        let detections = raw
            .iter()
            .filter(|d| d.class_id == PERSON_CLASS_ID)
            .map(|d| Detection::new(d.x1, d.y1, d.x2, d.y2))
            .filter(|d| !d.in_edge_margin(frame_width, edge_margin))
            .collect();

        Self { frame_width, frame_height, detections }
    }

    pub fn centers(&self) -> Vec<(i32, i32)> {
        self.detections.iter().map(Detection::center).collect()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(x1: i32, y1: i32, x2: i32, y2: i32) -> RawDetection {
        RawDetection { class_id: PERSON_CLASS_ID, x1, y1, x2, y2 }
    }

    #[test]
    fn centroid_uses_integer_midpoint() {
        let d = Detection::new(10, 20, 31, 41);
        assert_eq!(d.center(), (20, 30));
    }

    #[test]
    fn non_person_classes_are_ignored() {
        let raw = [
            person(100, 100, 200, 300),
            RawDetection { class_id: 2, x1: 300, y1: 100, x2: 400, y2: 200 },
        ];
        let frame = DetectionFrame::from_raw(&raw, 640, 480, 40);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.detections[0].center(), (150, 200));
    }

    #[test]
    fn edge_margin_drops_people_at_the_sides() {
        let raw = [
            person(0, 100, 70, 200),     // cx = 35, inside the left band
            person(0, 100, 80, 200),     // cx = 40, first kept column
            person(560, 100, 640, 200),  // cx = 600 = width - margin, kept
            person(562, 100, 640, 200),  // cx = 601, inside the right band
        ];
        let frame = DetectionFrame::from_raw(&raw, 640, 480, 40);
        let xs: Vec<i32> = frame.detections.iter().map(|d| d.center_x).collect();
        assert_eq!(xs, vec![40, 600]);
    }

    #[test]
    fn detector_order_is_preserved() {
        let raw = [person(300, 0, 320, 20), person(100, 0, 120, 20), person(200, 0, 220, 20)];
        let frame = DetectionFrame::from_raw(&raw, 640, 480, 40);
        assert_eq!(frame.centers(), vec![(310, 10), (110, 10), (210, 10)]);
    }
}
