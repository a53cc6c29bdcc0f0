//! Region cropping.
//!
//! Regions are cut from the masked image by template coordinates with a
//! fixed symmetric padding, clamped to the image bounds so a crop can never
//! index outside the source.

use image::RgbImage;

use crate::config::{CoordinateMap, RegionRect};
use crate::error::ExtractError;

/// Symmetric padding applied around every nominal region rectangle.
pub const REGION_PADDING: u32 = 20;

/// A cropped region with its effective (padded, clamped) rectangle.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedRegion {
    pub name: String,
    pub image: RgbImage,
    /// The rectangle actually cropped, in image coordinates.
    pub rect: RegionRect,
}

/// Crops named regions from an aligned, masked image.
pub struct RegionExtractor {
    map: CoordinateMap,
}

impl RegionExtractor {
    pub fn new(map: CoordinateMap) -> Self {
        Self { map }
    }

    /// Crop `name` out of `image`.
    ///
    /// Failures here are field-scoped: the orchestrator records a null
    /// outcome for the region and proceeds to the next one.
    pub fn extract(&self, image: &RgbImage, name: &str) -> Result<ExtractedRegion, ExtractError> {
        let spec = self
            .map
            .get(name)
            .ok_or_else(|| ExtractError::UnknownRegion(name.to_owned()))?;

        let pad = REGION_PADDING as i64;
        let r = spec.rect;

        let x0 = (r.x as i64 - pad).max(0);
        let y0 = (r.y as i64 - pad).max(0);
        let x1 = (r.x as i64 + r.width as i64 + pad).min(image.width() as i64);
        let y1 = (r.y as i64 + r.height as i64 + pad).min(image.height() as i64);

        if x1 <= x0 || y1 <= y0 {
            return Err(ExtractError::EmptyCrop {
                name: name.to_owned(),
            });
        }

        let rect = RegionRect {
            x: x0 as i32,
            y: y0 as i32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        };
        let cropped =
            image::imageops::crop_imm(image, rect.x as u32, rect.y as u32, rect.width, rect.height)
                .to_image();

        Ok(ExtractedRegion {
            name: name.to_owned(),
            image: cropped,
            rect,
        })
    }
}
