use std::io::{Cursor, Write};

use flate2::{write::ZlibEncoder, Compression};
use lopdf::{dictionary, Object, ObjectId, Stream};

use crate::error::{Error, Result};

/// An image XObject ready to be added to the object list.
#[derive(Debug, Clone)]
pub struct ImageXObject {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub bits_per_component: u8,
    /// `None` means the samples are stored raw.
    pub filter: Option<&'static str>,
    pub decode: Option<Vec<f32>>,
    pub image_data: Vec<u8>,
    /// Soft mask (alpha channel), must be added to the document first.
    pub s_mask: Option<ObjectId>,
}

fn embed_error(reason: impl std::fmt::Display) -> Error {
    Error::ImageEmbed {
        reason: reason.to_string(),
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(embed_error)?;
    encoder.finish().map_err(embed_error)
}

impl ImageXObject {
    /// Decode a PNG into a colour XObject plus an optional alpha mask.
    ///
    /// Palette and sub-byte images are expanded and 16-bit samples stripped,
    /// so both objects always carry 8 bits per component.
    pub fn from_png(bytes: &[u8]) -> Result<(Self, Option<Self>)> {
        let mut decoder = png::Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info().map_err(embed_error)?;
        let mut buffer = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buffer).map_err(embed_error)?;
        let pixels = &buffer[..frame.buffer_size()];

        if frame.bit_depth != png::BitDepth::Eight {
            return Err(embed_error(format!(
                "unexpected PNG bit depth {:?} after expansion",
                frame.bit_depth
            )));
        }

        let (color_space, channels, has_alpha) = match frame.color_type {
            png::ColorType::Grayscale => ("DeviceGray", 1, false),
            png::ColorType::GrayscaleAlpha => ("DeviceGray", 2, true),
            png::ColorType::Rgb => ("DeviceRGB", 3, false),
            png::ColorType::Rgba => ("DeviceRGB", 4, true),
            png::ColorType::Indexed => {
                return Err(embed_error("indexed PNG was not expanded"));
            }
        };

        let (color, alpha) = if has_alpha {
            let color_channels = channels - 1;
            let pixel_count = pixels.len() / channels;
            let mut color = Vec::with_capacity(pixel_count * color_channels);
            let mut alpha = Vec::with_capacity(pixel_count);
            for pixel in pixels.chunks_exact(channels) {
                color.extend_from_slice(&pixel[..color_channels]);
                alpha.push(pixel[color_channels]);
            }
            (color, Some(alpha))
        } else {
            (pixels.to_vec(), None)
        };

        let image = ImageXObject {
            width: frame.width,
            height: frame.height,
            color_space,
            bits_per_component: 8,
            filter: Some("FlateDecode"),
            decode: None,
            image_data: deflate(&color)?,
            s_mask: None,
        };

        let mask = alpha
            .map(|alpha| -> Result<Self> {
                Ok(ImageXObject {
                    width: frame.width,
                    height: frame.height,
                    color_space: "DeviceGray",
                    bits_per_component: 8,
                    filter: Some("FlateDecode"),
                    decode: None,
                    image_data: deflate(&alpha)?,
                    s_mask: None,
                })
            })
            .transpose()?;

        Ok((image, mask))
    }

    /// Wrap a JPEG unchanged; PDF readers decode DCT data natively.
    pub fn from_jpeg(bytes: &[u8]) -> Result<Self> {
        let frame = JpegFrame::parse(bytes)?;
        let (color_space, decode) = match frame.components {
            1 => ("DeviceGray", None),
            3 => ("DeviceRGB", None),
            // Adobe writes CMYK JPEGs inverted.
            4 => (
                "DeviceCMYK",
                Some(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]),
            ),
            other => {
                return Err(embed_error(format!(
                    "unsupported JPEG component count {other}"
                )));
            }
        };

        Ok(ImageXObject {
            width: u32::from(frame.width),
            height: u32::from(frame.height),
            color_space,
            bits_per_component: frame.precision,
            filter: Some("DCTDecode"),
            decode,
            image_data: bytes.to_vec(),
            s_mask: None,
        })
    }
}

impl From<ImageXObject> for Stream {
    fn from(image: ImageXObject) -> Self {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(image.width),
            "Height" => i64::from(image.height),
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => i64::from(image.bits_per_component),
        };
        if let Some(filter) = image.filter {
            dict.set("Filter", filter);
        }
        if let Some(decode) = image.decode {
            dict.set(
                "Decode",
                decode.into_iter().map(Object::Real).collect::<Vec<_>>(),
            );
        }
        if let Some(s_mask) = image.s_mask {
            dict.set("SMask", Object::Reference(s_mask));
        }
        Stream::new(dict, image.image_data)
    }
}

impl From<ImageXObject> for Object {
    fn from(image: ImageXObject) -> Self {
        Object::Stream(image.into())
    }
}

/// The fields of a JPEG start-of-frame segment the XObject needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JpegFrame {
    precision: u8,
    height: u16,
    width: u16,
    components: u8,
}

impl JpegFrame {
    fn parse(data: &[u8]) -> Result<Self> {
        // Segments after SOI: 0xFF, marker, big-endian length (incl. itself).
        let mut i = 2;
        while i + 4 <= data.len() {
            if data[i] != 0xFF {
                return Err(embed_error("corrupt JPEG marker stream"));
            }
            let marker = data[i + 1];
            // Fill bytes
            if marker == 0xFF {
                i += 1;
                continue;
            }
            let length = usize::from(u16::from_be_bytes([data[i + 2], data[i + 3]]));
            let is_sof = (0xC0..=0xCF).contains(&marker)
                && marker != 0xC4
                && marker != 0xC8
                && marker != 0xCC;
            if is_sof {
                if length < 8 || i + 2 + length > data.len() {
                    break;
                }
                return Ok(JpegFrame {
                    precision: data[i + 4],
                    height: u16::from_be_bytes([data[i + 5], data[i + 6]]),
                    width: u16::from_be_bytes([data[i + 7], data[i + 8]]),
                    components: data[i + 9],
                });
            }
            if length < 2 {
                break;
            }
            i += 2 + length;
        }
        Err(embed_error("JPEG start-of-frame segment not found"))
    }
}
