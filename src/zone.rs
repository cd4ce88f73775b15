//! Class/confidence filtering of object detections, with optional zone
//! annotation.
//!
//! Only class and confidence decide whether a detection qualifies. The zone
//! flag is informational and is forwarded to the front end for drawing.

use anyhow::{anyhow, Result};

use crate::detect::Detection;
use crate::payload::BoxMessage;

/// Convex or concave polygon in normalized frame coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    vertices: Vec<[f32; 2]>,
}

impl Zone {
    pub fn new(vertices: Vec<[f32; 2]>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(anyhow!(
                "zone polygon needs at least 3 vertices, got {}",
                vertices.len()
            ));
        }
        if let Some(v) = vertices
            .iter()
            .find(|v| !v.iter().all(|c| c.is_finite() && (0.0..=1.0).contains(c)))
        {
            return Err(anyhow!(
                "zone vertex [{}, {}] is outside the normalized frame",
                v[0],
                v[1]
            ));
        }
        Ok(Self { vertices })
    }

    /// Left half of the frame.
    pub fn left_half() -> Self {
        Self {
            vertices: vec![[0.0, 0.0], [0.5, 0.0], [0.5, 1.0], [0.0, 1.0]],
        }
    }

    pub fn vertices(&self) -> &[[f32; 2]] {
        &self.vertices
    }

    /// Even-odd point-in-polygon test.
    pub fn contains(&self, p: [f32; 2]) -> bool {
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (self.vertices[i], self.vertices[j]);
            if (a[1] > p[1]) != (b[1] > p[1])
                && p[0] < (b[0] - a[0]) * (p[1] - a[1]) / (b[1] - a[1]) + a[0]
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// True when the box `[x0, y0, x1, y1]` overlaps the polygon at all.
    pub fn intersects_box(&self, bbox: [f32; 4]) -> bool {
        let [x0, y0, x1, y1] = bbox;
        let corners = [[x0, y0], [x1, y0], [x1, y1], [x0, y1]];
        if corners.iter().any(|c| self.contains(*c)) {
            return true;
        }
        if self
            .vertices
            .iter()
            .any(|v| v[0] >= x0 && v[0] <= x1 && v[1] >= y0 && v[1] <= y1)
        {
            return true;
        }
        let n = self.vertices.len();
        (0..n).any(|i| {
            let (p, q) = (self.vertices[i], self.vertices[(i + 1) % n]);
            (0..4).any(|k| segments_cross(p, q, corners[k], corners[(k + 1) % 4]))
        })
    }
}

fn orientation(a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn segments_cross(p1: [f32; 2], p2: [f32; 2], q1: [f32; 2], q2: [f32; 2]) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// A detection that passed the class and confidence gate.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneMatch {
    pub detection: Detection,
    /// `None` when no zone is configured.
    pub in_zone: Option<bool>,
}

impl ZoneMatch {
    pub fn to_box_message(&self) -> BoxMessage {
        BoxMessage {
            label: self.detection.label.clone(),
            confidence: self.detection.confidence,
            bbox: self.detection.bbox,
            in_zone: self.in_zone,
        }
    }
}

/// Keep detections of `class_label` with confidence `>= min_confidence`,
/// preserving input order.
pub fn filter(
    detections: &[Detection],
    class_label: &str,
    min_confidence: f32,
    zone: Option<&Zone>,
) -> Vec<ZoneMatch> {
    detections
        .iter()
        .filter(|d| d.label == class_label && d.confidence >= min_confidence)
        .map(|d| ZoneMatch {
            detection: d.clone(),
            in_zone: zone.map(|z| z.intersects_box(d.bbox)),
        })
        .collect()
}

/// `filter` with its parameters bound.
#[derive(Clone, Debug)]
pub struct ZoneFilter {
    pub class_label: String,
    pub min_confidence: f32,
    pub zone: Option<Zone>,
}

impl ZoneFilter {
    pub fn new(class_label: &str, min_confidence: f32) -> Self {
        Self {
            class_label: class_label.to_string(),
            min_confidence,
            zone: None,
        }
    }

    pub fn with_zone(mut self, zone: Option<Zone>) -> Self {
        self.zone = zone;
        self
    }

    pub fn apply(&self, detections: &[Detection]) -> Vec<ZoneMatch> {
        filter(
            detections,
            &self.class_label,
            self.min_confidence,
            self.zone.as_ref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Vec<Detection> {
        vec![
            Detection::new("person", 0.9, [0.1, 0.1, 0.3, 0.9]),
            Detection::new("person", 0.5, [0.6, 0.1, 0.8, 0.9]),
            Detection::new("dog", 0.95, [0.4, 0.5, 0.6, 0.9]),
        ]
    }

    #[test]
    fn filters_by_class_and_confidence() {
        let matches = filter(&batch(), "person", 0.8, None);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].detection.confidence, 0.9);
        assert_eq!(matches[0].in_zone, None);
    }

    #[test]
    fn threshold_is_inclusive_and_order_preserved() {
        let detections = vec![
            Detection::new("person", 0.8, [0.6, 0.0, 0.7, 0.5]),
            Detection::new("person", 0.95, [0.0, 0.0, 0.1, 0.5]),
        ];
        let matches = ZoneFilter::new("person", 0.8).apply(&detections);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].detection.confidence, 0.8);
        assert_eq!(matches[1].detection.confidence, 0.95);
    }

    #[test]
    fn zone_annotation_does_not_gate() {
        let detections = vec![
            Detection::new("person", 0.9, [0.1, 0.1, 0.3, 0.9]),
            Detection::new("person", 0.9, [0.6, 0.1, 0.8, 0.9]),
        ];
        let filter = ZoneFilter::new("person", 0.8).with_zone(Some(Zone::left_half()));
        let matches = filter.apply(&detections);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].in_zone, Some(true));
        assert_eq!(matches[1].in_zone, Some(false));
    }

    #[test]
    fn box_straddling_zone_edge_intersects() {
        let zone = Zone::left_half();
        assert!(zone.intersects_box([0.4, 0.2, 0.7, 0.4]));
        assert!(!zone.intersects_box([0.55, 0.2, 0.7, 0.4]));
    }

    #[test]
    fn box_containing_whole_zone_intersects() {
        let zone = Zone::new(vec![[0.4, 0.4], [0.5, 0.4], [0.45, 0.5]]).unwrap();
        assert!(zone.intersects_box([0.0, 0.0, 1.0, 1.0]));
    }

    #[test]
    fn edges_crossing_without_contained_points_intersect() {
        // Thin horizontal bar crossing a thin vertical bar.
        let zone = Zone::new(vec![[0.45, 0.0], [0.55, 0.0], [0.55, 1.0], [0.45, 1.0]]).unwrap();
        assert!(zone.intersects_box([0.0, 0.45, 1.0, 0.55]));
    }

    #[test]
    fn triangle_contains() {
        let zone = Zone::new(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]).unwrap();
        assert!(zone.contains([0.2, 0.2]));
        assert!(!zone.contains([0.8, 0.8]));
    }

    #[test]
    fn invalid_zones_are_rejected() {
        assert!(Zone::new(vec![[0.0, 0.0], [1.0, 1.0]]).is_err());
        assert!(Zone::new(vec![[0.0, 0.0], [1.5, 0.0], [0.0, 1.0]]).is_err());
    }

    #[test]
    fn box_message_carries_zone_flag() {
        let m = ZoneMatch {
            detection: Detection::new("person", 0.9, [0.1, 0.2, 0.3, 0.4]),
            in_zone: Some(true),
        };
        let msg = m.to_box_message();
        assert_eq!(msg.label, "person");
        assert_eq!(msg.bbox, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(msg.in_zone, Some(true));
    }
}
