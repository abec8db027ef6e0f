//! Signature image classification.
//!
//! The mime type in the data-URL prefix is never trusted; the leading bytes
//! decide the format. Anything that is not recognised by its magic number is
//! handed to the PNG reader, which rejects it with [`Error::UnsupportedFormat`]
//! before the document is touched.

use std::io::Cursor;

use log::debug;

use crate::error::{Error, Result};
use crate::geometry::ImageIntrinsics;

/// Raster encodings that can be embedded into a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

struct FormatSignature {
    magic: &'static [u8],
    format: ImageFormat,
}

/// Magic numbers checked in order. Adding a format means adding a row here
/// and an arm to [`ImageFormat::read_intrinsics`].
const SIGNATURES: &[FormatSignature] = &[FormatSignature {
    magic: &[0xFF, 0xD8],
    format: ImageFormat::Jpeg,
}];

/// Format assumed when no signature matches.
const FALLBACK_FORMAT: ImageFormat = ImageFormat::Png;

/// A classified signature image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedImage {
    pub format: ImageFormat,
    pub intrinsics: ImageIntrinsics,
}

impl ImageFormat {
    /// Classify `bytes` by their leading magic number.
    pub fn sniff(bytes: &[u8]) -> Self {
        SIGNATURES
            .iter()
            .find(|signature| bytes.starts_with(signature.magic))
            .map(|signature| signature.format)
            .unwrap_or(FALLBACK_FORMAT)
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }

    fn read_intrinsics(self, bytes: &[u8]) -> Result<ImageIntrinsics> {
        let (width_px, height_px) = match self {
            ImageFormat::Jpeg => {
                let size = imagesize::blob_size(bytes).map_err(|e| Error::UnsupportedFormat {
                    reason: format!("unreadable JPEG header: {e}"),
                })?;
                let width = u32::try_from(size.width).map_err(|_| oversized(self))?;
                let height = u32::try_from(size.height).map_err(|_| oversized(self))?;
                (width, height)
            }
            ImageFormat::Png => {
                let reader = png::Decoder::new(Cursor::new(bytes))
                    .read_info()
                    .map_err(|e| Error::UnsupportedFormat {
                        reason: format!("not a decodable PNG: {e}"),
                    })?;
                let info = reader.info();
                (info.width, info.height)
            }
        };

        if width_px == 0 || height_px == 0 {
            return Err(Error::UnsupportedFormat {
                reason: format!("{} image has zero width or height", self.name()),
            });
        }

        Ok(ImageIntrinsics {
            width_px,
            height_px,
        })
    }
}

fn oversized(format: ImageFormat) -> Error {
    Error::UnsupportedFormat {
        reason: format!("{} dimensions out of range", format.name()),
    }
}

/// Classify `bytes` and read their pixel dimensions.
pub fn decode(bytes: &[u8]) -> Result<DecodedImage> {
    let format = ImageFormat::sniff(bytes);
    let intrinsics = format.read_intrinsics(bytes)?;
    debug!(
        "decoded {} signature {}x{}",
        format.name(),
        intrinsics.width_px,
        intrinsics.height_px
    );
    Ok(DecodedImage { format, intrinsics })
}
