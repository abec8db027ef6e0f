//! Request and response shapes of the signing endpoint.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::NormalizedRect;
use crate::hash::Digest;

/// JSON body of `POST /api/sign-pdf`, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequestBody {
    #[serde(alias = "pdfId")]
    pub document_id: Option<String>,
    pub signature_base64: Option<String>,
    pub coordinates: Option<Coordinates>,
}

/// Placement as sent by the UI: fractions of the page, origin top-left.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub page: Option<u32>,
    pub x_pct: f64,
    pub y_pct: f64,
    pub width_pct: f64,
    pub height_pct: f64,
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub url: String,
    pub original_hash: Digest,
    pub signed_hash: Digest,
}

/// Failure response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A validated signing request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRequest {
    pub document_id: String,
    /// Mime type the client declared in the data URL. Informational only.
    pub declared_mime: String,
    pub image_bytes: Vec<u8>,
    /// 1-based page number.
    pub page: u32,
    pub rect: NormalizedRect,
}

/// The pieces of a `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || Error::validation("Invalid signature image data URL");

        let mut parts = url.split(',');
        let (header, payload) = match (parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(payload), None) => (header, payload),
            _ => return Err(invalid()),
        };

        let mime = header
            .trim()
            .strip_prefix("data:")
            .and_then(|rest| rest.strip_suffix(";base64"))
            .ok_or_else(invalid)?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|_| Error::validation("Signature image is not valid base64"))?;
        if bytes.is_empty() {
            return Err(Error::validation("Signature image is empty"));
        }

        Ok(DataUrl {
            mime: mime.to_owned(),
            bytes,
        })
    }
}

impl TryFrom<SignRequestBody> for PlacementRequest {
    type Error = Error;

    fn try_from(body: SignRequestBody) -> Result<Self> {
        let (document_id, signature, coordinates) =
            match (body.document_id, body.signature_base64, body.coordinates) {
                (Some(document_id), Some(signature), Some(coordinates))
                    if !document_id.is_empty() && !signature.is_empty() =>
                {
                    (document_id, signature, coordinates)
                }
                _ => {
                    return Err(Error::validation(
                        "Missing documentId, signatureBase64 or coordinates",
                    ))
                }
            };

        let page = coordinates.page.unwrap_or(1);
        if page == 0 {
            return Err(Error::validation("coordinates.page must be at least 1"));
        }

        let rect = NormalizedRect {
            x: coordinates.x_pct,
            y: coordinates.y_pct,
            width: coordinates.width_pct,
            height: coordinates.height_pct,
        };
        if ![rect.x, rect.y, rect.width, rect.height]
            .iter()
            .all(|value| value.is_finite())
        {
            return Err(Error::validation("coordinates must be finite numbers"));
        }
        if rect.width < 0.0 || rect.height < 0.0 {
            return Err(Error::validation(
                "coordinates.widthPct and heightPct must not be negative",
            ));
        }

        let DataUrl { mime, bytes } = DataUrl::parse(&signature)?;

        Ok(PlacementRequest {
            document_id,
            declared_mime: mime,
            image_bytes: bytes,
            page,
            rect,
        })
    }
}
