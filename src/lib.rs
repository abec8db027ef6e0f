pub mod audit;
pub mod config;
mod error;
pub mod geometry;
pub mod hash;
pub mod image;
mod image_xobject;
mod pdf_object;
pub mod request;
pub mod server;
pub mod signer;

use geometry::{DrawnRect, PageGeometry};
use image::ImageFormat;
use image_xobject::ImageXObject;
use log::debug;
use lopdf::{
    content::{Content, Operation},
    Dictionary, Document, Object, ObjectId, Stream,
};
use pdf_object::{as_number, inherited_attribute, PdfObjectDeref};

pub use error::{Error, PersistenceError, Result};
pub use lopdf;

/// A loaded PDF that signature images can be stamped onto.
///
/// Existing content streams are never rewritten: drawing wraps them in a
/// save/restore pair and appends a new stream after them.
#[derive(Debug, Clone)]
pub struct PDFSigningDocument {
    raw_document: Document,
}

/// The page's `/MediaBox` lower-left corner and size.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MediaBox {
    origin_x: f64,
    origin_y: f64,
    geometry: PageGeometry,
}

impl PDFSigningDocument {
    pub fn new(raw_document: Document) -> Self {
        PDFSigningDocument { raw_document }
    }

    /// Parse a serialized PDF.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let raw_document = Document::load_mem(bytes).map_err(|e| Error::DocumentLoad {
            reason: e.to_string(),
        })?;
        Ok(Self::new(raw_document))
    }

    pub fn get_document_ref(&self) -> &Document {
        &self.raw_document
    }

    pub fn page_count(&self) -> usize {
        self.raw_document.get_pages().len()
    }

    /// Object id of the 1-based `page`.
    pub fn page_id(&self, page: u32) -> Result<ObjectId> {
        let pages = self.raw_document.get_pages();
        pages.get(&page).copied().ok_or(Error::PageNotFound {
            page,
            page_count: pages.len(),
        })
    }

    /// Width and height of the 1-based `page` in points.
    pub fn page_geometry(&self, page: u32) -> Result<PageGeometry> {
        let page_id = self.page_id(page)?;
        Ok(self.media_box(page_id)?.geometry)
    }

    fn media_box(&self, page_id: ObjectId) -> Result<MediaBox> {
        let malformed = |reason: &str| Error::DocumentLoad {
            reason: format!("page {page_id:?}: {reason}"),
        };

        let media_box = inherited_attribute(&self.raw_document, page_id, b"MediaBox")?
            .ok_or_else(|| malformed("no /MediaBox"))?
            .as_array()?;
        let corners = media_box
            .iter()
            .map(|value| value.deref(&self.raw_document).ok().and_then(as_number))
            .collect::<Option<Vec<f64>>>()
            .filter(|corners| corners.len() == 4)
            .ok_or_else(|| malformed("/MediaBox is not four numbers"))?;

        // Corners may be given in any order.
        let (x0, x1) = (corners[0].min(corners[2]), corners[0].max(corners[2]));
        let (y0, y1) = (corners[1].min(corners[3]), corners[1].max(corners[3]));
        Ok(MediaBox {
            origin_x: x0,
            origin_y: y0,
            geometry: PageGeometry {
                width_pt: x1 - x0,
                height_pt: y1 - y0,
            },
        })
    }

    /// Embed `image_bytes` and paint it into `rect` on the 1-based `page`.
    ///
    /// `rect` is relative to the page's visible box, its origin is shifted by
    /// the `/MediaBox` lower-left corner. Returns the image XObject id.
    pub fn add_signature_image(
        &mut self,
        page: u32,
        format: ImageFormat,
        image_bytes: &[u8],
        rect: DrawnRect,
    ) -> Result<ObjectId> {
        let page_id = self.page_id(page)?;
        let media_box = self.media_box(page_id)?;

        let image_xobject_id = match format {
            ImageFormat::Jpeg => {
                let image = ImageXObject::from_jpeg(image_bytes)?;
                self.raw_document.add_object(image)
            }
            ImageFormat::Png => {
                let (mut image, mask) = ImageXObject::from_png(image_bytes)?;
                if let Some(mask) = mask {
                    image.s_mask = Some(self.raw_document.add_object(mask));
                }
                self.raw_document.add_object(image)
            }
        };

        // Derived from the fresh object id, so it can't shadow an existing name.
        let image_name = format!("Sig{}_{}", image_xobject_id.0, image_xobject_id.1);
        self.register_xobject(page_id, &image_name, image_xobject_id)?;

        let placed = DrawnRect {
            x_pt: rect.x_pt + media_box.origin_x,
            y_pt: rect.y_pt + media_box.origin_y,
            ..rect
        };
        self.add_image_to_page_stream(&image_name, page_id, placed)?;

        debug!(
            "painted {} image {:?} on page {} at ({:.2}, {:.2}) {:.2}x{:.2}",
            format.name(),
            image_xobject_id,
            page,
            placed.x_pt,
            placed.y_pt,
            placed.width_pt,
            placed.height_pt
        );
        Ok(image_xobject_id)
    }

    /// Serialize the document.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.raw_document
            .save_to(&mut output)
            .map_err(|e| Error::DocumentWrite {
                reason: e.to_string(),
            })?;
        Ok(output)
    }

    /// Register `image_id` as `name` in the page's own `/Resources`.
    ///
    /// Inherited or shared resource dictionaries (and a shared `/XObject`
    /// subdictionary) are copied onto the page first. Other pages never see
    /// the new name, and the fonts the existing content uses stay visible.
    fn register_xobject(
        &mut self,
        page_id: ObjectId,
        name: &str,
        image_id: ObjectId,
    ) -> Result<()> {
        let doc = &self.raw_document;
        let not_a_dictionary = |key: &str| Error::DocumentLoad {
            reason: format!("page {page_id:?}: {key} is not a dictionary"),
        };

        let mut resources = match inherited_attribute(doc, page_id, b"Resources")? {
            Some(Object::Dictionary(resources)) => resources.clone(),
            Some(_) => return Err(not_a_dictionary("/Resources")),
            None => Dictionary::new(),
        };
        let mut xobjects = match resources.get(b"XObject") {
            Ok(xobjects) => match xobjects.deref(doc)? {
                Object::Dictionary(xobjects) => xobjects.clone(),
                _ => return Err(not_a_dictionary("/XObject")),
            },
            Err(_) => Dictionary::new(),
        };

        xobjects.set(name, Object::Reference(image_id));
        resources.set("XObject", xobjects);
        self.raw_document
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Resources", resources);
        Ok(())
    }

    /// Page content as a list of stream references, in paint order.
    fn content_streams(&mut self, page_id: ObjectId) -> Result<Vec<Object>> {
        let page = self.raw_document.get_object(page_id)?.as_dict()?;
        let items = match page.get(b"Contents") {
            Err(_) => Vec::new(),
            Ok(Object::Reference(id)) => match self.raw_document.get_object(*id)? {
                Object::Array(items) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            Ok(other) => vec![other.clone()],
        };

        // Content streams must be indirect; lift any direct ones out.
        Ok(items
            .into_iter()
            .map(|item| match item {
                Object::Stream(stream) => Object::Reference(self.raw_document.add_object(stream)),
                other => other,
            })
            .collect())
    }

    // The image must already be registered in the page's XObject resources.
    fn add_image_to_page_stream(
        &mut self,
        xobject_name: &str,
        page_id: ObjectId,
        rect: DrawnRect,
    ) -> Result<()> {
        let existing = self.content_streams(page_id)?;

        // Isolate whatever graphics state the existing content leaves behind.
        let save_id = self
            .raw_document
            .add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));

        let content = Content {
            operations: vec![
                Operation::new("Q", vec![]),
                // `q` = Save graphics state
                Operation::new("q", vec![]),
                // `cm` = scale the unit square to the rect and move it into place
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(rect.width_pt as f32),
                        0.into(),
                        0.into(),
                        Object::Real(rect.height_pt as f32),
                        Object::Real(rect.x_pt as f32),
                        Object::Real(rect.y_pt as f32),
                    ],
                ),
                // `Do` = Invoke named XObject
                Operation::new("Do", vec![Object::Name(xobject_name.as_bytes().to_vec())]),
                // `Q` = Restore graphics state
                Operation::new("Q", vec![]),
            ],
        };
        // Leading newline: some readers join content streams without a separator.
        let mut draw = b"\n".to_vec();
        draw.extend(content.encode()?);
        let draw_id = self
            .raw_document
            .add_object(Stream::new(Dictionary::new(), draw));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
        contents.push(Object::Reference(draw_id));

        self.raw_document
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Contents", contents);
        Ok(())
    }
}

/// Stamp `image_bytes` into `rect` on the 1-based `page` of `source` and
/// return the serialized result. `source` itself is left untouched.
pub fn compose(
    source: &[u8],
    page: u32,
    format: ImageFormat,
    image_bytes: &[u8],
    rect: DrawnRect,
) -> Result<Vec<u8>> {
    let mut document = PDFSigningDocument::load(source)?;
    document.add_signature_image(page, format, image_bytes, rect)?;
    document.finish()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::fixtures::{jpeg_header, rgba_png};
    use crate::test_pdf::letter_pdf;
    use lopdf::dictionary;

    fn drawn() -> DrawnRect {
        DrawnRect {
            x_pt: 183.6,
            y_pt: 499.5,
            width_pt: 122.4,
            height_pt: 30.6,
        }
    }

    fn page_operators(doc: &Document, page: u32) -> Vec<String> {
        let page_id = doc.get_pages()[&page];
        doc.get_and_decode_page_content(page_id)
            .unwrap()
            .operations
            .into_iter()
            .map(|op| op.operator)
            .collect()
    }

    #[test]
    fn reads_inherited_page_geometry() {
        let document = PDFSigningDocument::load(&letter_pdf(2)).unwrap();
        assert_eq!(document.page_count(), 2);
        assert_eq!(
            document.page_geometry(2).unwrap(),
            PageGeometry {
                width_pt: 612.0,
                height_pt: 792.0
            }
        );
    }

    #[test]
    fn missing_page_is_reported() {
        let document = PDFSigningDocument::load(&letter_pdf(1)).unwrap();
        let err = document.page_geometry(3).unwrap_err();
        assert!(matches!(
            err,
            Error::PageNotFound {
                page: 3,
                page_count: 1
            }
        ));
        assert!(matches!(
            document.page_id(0),
            Err(Error::PageNotFound { page: 0, .. })
        ));
    }

    #[test]
    fn garbage_is_a_load_error() {
        let err = PDFSigningDocument::load(b"definitely not a pdf").unwrap_err();
        assert!(matches!(err, Error::DocumentLoad { .. }));
    }

    #[test]
    fn png_is_drawn_after_existing_content() {
        let source = letter_pdf(2);
        let output = compose(&source, 1, ImageFormat::Png, &rgba_png(40, 10), drawn()).unwrap();
        let doc = Document::load_mem(&output).unwrap();

        let operators = page_operators(&doc, 1);
        assert_eq!(operators.first().map(String::as_str), Some("q"));
        assert!(operators.iter().any(|op| op == "Tj"));
        assert_eq!(
            &operators[operators.len() - 5..],
            &["Q", "q", "cm", "Do", "Q"]
        );

        // Other pages are untouched.
        assert_eq!(page_operators(&doc, 2), vec!["BT", "Tf", "Td", "Tj", "ET"]);
    }

    #[test]
    fn existing_font_resources_survive() {
        let output = compose(&letter_pdf(1), 1, ImageFormat::Png, &rgba_png(4, 4), drawn()).unwrap();
        let doc = Document::load_mem(&output).unwrap();
        let page_id = doc.get_pages()[&1];
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let resources = page.get(b"Resources").unwrap().as_dict().unwrap();

        assert!(resources.has(b"Font"));
        let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
        assert_eq!(xobjects.len(), 1);
    }

    /// Two pages pointing at one indirect `/Resources` whose `/XObject`
    /// subdictionary is indirect too.
    fn shared_resources_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let logo_id = doc.add_object(Stream::new(lopdf::dictionary! {}, b"0 0 m".to_vec()));
        let xobjects_id = doc.add_object(lopdf::dictionary! { "Logo" => logo_id });
        let resources_id = doc.add_object(lopdf::dictionary! {
            "Font" => lopdf::dictionary! { "F1" => font_id },
            "XObject" => xobjects_id,
        });
        let kids: Vec<Object> = (0..2)
            .map(|_| {
                let content_id = doc.add_object(Stream::new(
                    lopdf::dictionary! {},
                    b"BT /F1 12 Tf 72 72 Td (Sign) Tj ET".to_vec(),
                ));
                doc.add_object(lopdf::dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                    "Resources" => resources_id,
                    "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(lopdf::dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => 2,
            }),
        );
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn page_xobject_names(doc: &Document, page: u32) -> Vec<Vec<u8>> {
        let page = doc.get_object(doc.get_pages()[&page]).unwrap().as_dict().unwrap();
        let resources = page.get(b"Resources").unwrap();
        let resources = match resources {
            Object::Reference(id) => doc.get_object(*id).unwrap().as_dict().unwrap(),
            other => other.as_dict().unwrap(),
        };
        let xobjects = match resources.get(b"XObject").unwrap() {
            Object::Reference(id) => doc.get_object(*id).unwrap().as_dict().unwrap(),
            other => other.as_dict().unwrap(),
        };
        xobjects.iter().map(|(name, _)| name.clone()).collect()
    }

    #[test]
    fn shared_resources_are_not_touched_on_other_pages() {
        let output = compose(
            &shared_resources_pdf(),
            1,
            ImageFormat::Png,
            &rgba_png(4, 4),
            drawn(),
        )
        .unwrap();
        let doc = Document::load_mem(&output).unwrap();

        assert_eq!(page_xobject_names(&doc, 2), vec![b"Logo".to_vec()]);
        let signed = page_xobject_names(&doc, 1);
        assert_eq!(signed.len(), 2);
        assert!(signed.contains(&b"Logo".to_vec()));
        assert!(signed.iter().any(|name| name.starts_with(b"Sig")));
        assert_eq!(page_operators(&doc, 2), vec!["BT", "Tf", "Td", "Tj", "ET"]);
    }

    #[test]
    fn non_dictionary_resources_fail_instead_of_dropping_the_image() {
        let mut doc = Document::load_mem(&letter_pdf(1)).unwrap();
        let page_id = doc.get_pages()[&1];
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Resources", 7i64);
        let mut source = Vec::new();
        doc.save_to(&mut source).unwrap();

        let err = compose(&source, 1, ImageFormat::Png, &rgba_png(4, 4), drawn()).unwrap_err();
        assert!(matches!(err, Error::DocumentLoad { .. }));
    }

    #[test]
    fn png_alpha_becomes_soft_mask() {
        let mut document = PDFSigningDocument::load(&letter_pdf(1)).unwrap();
        let image_id = document
            .add_signature_image(1, ImageFormat::Png, &rgba_png(8, 2), drawn())
            .unwrap();
        let image = document
            .get_document_ref()
            .get_object(image_id)
            .unwrap()
            .as_stream()
            .unwrap();
        assert!(image.dict.get(b"SMask").is_ok());
        assert_eq!(image.dict.get(b"Width").unwrap().as_i64().unwrap(), 8);
    }

    #[test]
    fn jpeg_is_embedded_as_dct() {
        let mut document = PDFSigningDocument::load(&letter_pdf(1)).unwrap();
        let jpeg = jpeg_header(64, 16, 3);
        let image_id = document
            .add_signature_image(1, ImageFormat::Jpeg, &jpeg, drawn())
            .unwrap();
        let image = document
            .get_document_ref()
            .get_object(image_id)
            .unwrap()
            .as_stream()
            .unwrap();
        assert_eq!(
            image.dict.get(b"Filter").unwrap().as_name().unwrap(),
            b"DCTDecode"
        );
        assert_eq!(image.content, jpeg);
    }

    #[test]
    fn corrupt_png_fails_before_touching_page() {
        let mut png = rgba_png(16, 16);
        png.truncate(png.len() - 20);
        let err = compose(&letter_pdf(1), 1, ImageFormat::Png, &png, drawn()).unwrap_err();
        assert!(matches!(err, Error::ImageEmbed { .. }));
    }

    #[test]
    fn page_geometry_is_unchanged() {
        let output = compose(&letter_pdf(1), 1, ImageFormat::Png, &rgba_png(4, 4), drawn()).unwrap();
        let document = PDFSigningDocument::load(&output).unwrap();
        assert_eq!(
            document.page_geometry(1).unwrap(),
            PageGeometry {
                width_pt: 612.0,
                height_pt: 792.0
            }
        );
    }
}
