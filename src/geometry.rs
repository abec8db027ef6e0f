//! Placement geometry.
//!
//! The UI describes a signature box as fractions of the page, anchored at the
//! top-left corner with y growing downwards. PDF user space has its origin at
//! the bottom-left with y growing upwards, and `cm` places an image by its
//! bottom-left corner. [`to_document_rect`] reconciles the two and
//! [`fit`] shrinks the image into the resulting box without distorting it.

use serde::{Deserialize, Serialize};

/// A box expressed as fractions of page width/height, origin top-left.
///
/// Components are expected in `[0, 1]` but nothing here enforces it: a field
/// dragged partially off the page maps to an off-page rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Size of the target page in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
}

/// The placement box in PDF user space, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentRect {
    pub x_pt: f64,
    pub y_pt: f64,
    pub width_pt: f64,
    pub height_pt: f64,
}

/// The rectangle the image is actually painted into. Always inside the
/// [`DocumentRect`] it was fitted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawnRect {
    pub x_pt: f64,
    pub y_pt: f64,
    pub width_pt: f64,
    pub height_pt: f64,
}

/// Pixel dimensions of the decoded signature image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageIntrinsics {
    pub width_px: u32,
    pub height_px: u32,
}

/// Convert a normalized rectangle into PDF points on a page of the given size.
pub fn to_document_rect(rect: NormalizedRect, page: PageGeometry) -> DocumentRect {
    let width_pt = rect.width * page.width_pt;
    let height_pt = rect.height * page.height_pt;
    let x_pt = rect.x * page.width_pt;
    let y_from_top_pt = rect.y * page.height_pt;
    // Flip the axis and move the anchor from the top edge to the bottom edge.
    let y_pt = page.height_pt - y_from_top_pt - height_pt;

    DocumentRect {
        x_pt,
        y_pt,
        width_pt,
        height_pt,
    }
}

/// Contain-fit `image` inside `bounds`: uniform scale by the tighter axis,
/// centered on the slack axis.
///
/// A zero width or height box collapses to a zero-area rectangle; that is a
/// valid, if invisible, placement.
pub fn fit(image: ImageIntrinsics, bounds: DocumentRect) -> DrawnRect {
    let image_w = f64::from(image.width_px);
    let image_h = f64::from(image.height_px);

    let scale = (bounds.width_pt / image_w).min(bounds.height_pt / image_h);
    let width_pt = image_w * scale;
    let height_pt = image_h * scale;

    DrawnRect {
        x_pt: bounds.x_pt + (bounds.width_pt - width_pt) / 2.0,
        y_pt: bounds.y_pt + (bounds.height_pt - height_pt) / 2.0,
        width_pt,
        height_pt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn letter() -> PageGeometry {
        PageGeometry {
            width_pt: 612.0,
            height_pt: 792.0,
        }
    }

    #[test]
    fn maps_letter_page_example() {
        let rect = NormalizedRect {
            x: 0.3,
            y: 0.3,
            width: 0.2,
            height: 0.1,
        };
        let mapped = to_document_rect(rect, letter());

        assert!((mapped.x_pt - 183.6).abs() < EPS);
        assert!((mapped.width_pt - 122.4).abs() < EPS);
        assert!((mapped.height_pt - 79.2).abs() < EPS);
        // 792 - 237.6 - 79.2
        assert!((mapped.y_pt - 475.2).abs() < EPS);
    }

    #[test]
    fn top_left_corner_maps_to_top_of_page() {
        let rect = NormalizedRect {
            x: 0.0,
            y: 0.0,
            width: 0.5,
            height: 0.25,
        };
        let mapped = to_document_rect(rect, letter());

        assert_eq!(mapped.x_pt, 0.0);
        assert!((mapped.y_pt + mapped.height_pt - 792.0).abs() < EPS);
    }

    #[test]
    fn bottom_edge_lands_on_zero() {
        let rect = NormalizedRect {
            x: 0.1,
            y: 0.9,
            width: 0.1,
            height: 0.1,
        };
        let mapped = to_document_rect(rect, letter());
        assert!(mapped.y_pt.abs() < EPS);
    }

    #[test]
    fn off_page_rect_maps_off_page() {
        let rect = NormalizedRect {
            x: 0.9,
            y: 0.95,
            width: 0.3,
            height: 0.2,
        };
        let mapped = to_document_rect(rect, letter());

        assert!(mapped.x_pt + mapped.width_pt > 612.0);
        assert!(mapped.y_pt < 0.0);
        assert!((mapped.width_pt - 183.6).abs() < EPS);
    }

    #[test]
    fn fits_wide_image_by_width() {
        let bounds = DocumentRect {
            x_pt: 183.6,
            y_pt: 475.2,
            width_pt: 122.4,
            height_pt: 79.2,
        };
        let image = ImageIntrinsics {
            width_px: 400,
            height_px: 100,
        };
        let drawn = fit(image, bounds);

        assert!((drawn.width_pt - 122.4).abs() < EPS);
        assert!((drawn.height_pt - 30.6).abs() < EPS);
        assert!((drawn.x_pt - 183.6).abs() < EPS);
        assert!((drawn.y_pt - (475.2 + (79.2 - 30.6) / 2.0)).abs() < EPS);
    }

    #[test]
    fn fits_tall_image_by_height() {
        let bounds = DocumentRect {
            x_pt: 0.0,
            y_pt: 0.0,
            width_pt: 200.0,
            height_pt: 50.0,
        };
        let image = ImageIntrinsics {
            width_px: 10,
            height_px: 20,
        };
        let drawn = fit(image, bounds);

        assert!((drawn.height_pt - 50.0).abs() < EPS);
        assert!((drawn.width_pt - 25.0).abs() < EPS);
        assert!((drawn.x_pt - 87.5).abs() < EPS);
        assert_eq!(drawn.y_pt, 0.0);
    }

    #[test]
    fn zero_sized_box_collapses() {
        let bounds = DocumentRect {
            x_pt: 10.0,
            y_pt: 20.0,
            width_pt: 0.0,
            height_pt: 40.0,
        };
        let image = ImageIntrinsics {
            width_px: 300,
            height_px: 100,
        };
        let drawn = fit(image, bounds);

        assert_eq!(drawn.width_pt, 0.0);
        assert_eq!(drawn.height_pt, 0.0);
        assert_eq!(drawn.x_pt, 10.0);
        assert_eq!(drawn.y_pt, 40.0);
    }
}
