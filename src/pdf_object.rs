use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::{Error, Result};

/// Reference chains longer than this are treated as a broken document.
const MAX_DEREF_DEPTH: usize = 32;

pub(crate) trait PdfObjectDeref {
    /// Follow `Reference`s until a direct object is reached.
    fn deref<'a>(&'a self, doc: &'a Document) -> Result<&'a Object>;
}

impl PdfObjectDeref for Object {
    fn deref<'a>(&'a self, doc: &'a Document) -> Result<&'a Object> {
        let mut object = self;
        for _ in 0..MAX_DEREF_DEPTH {
            match object {
                Object::Reference(id) => object = doc.get_object(*id)?,
                direct => return Ok(direct),
            }
        }
        Err(Error::DocumentLoad {
            reason: "reference chain too deep".to_owned(),
        })
    }
}

/// Look up a page attribute, walking up the `/Parent` chain for the
/// inheritable ones (`/MediaBox`, `/Resources`, `/CropBox`, `/Rotate`).
pub(crate) fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>> {
    let mut node: &Dictionary = doc.get_object(page_id)?.as_dict()?;
    for _ in 0..MAX_DEREF_DEPTH {
        if let Ok(value) = node.get(key) {
            return Ok(Some(value.deref(doc)?));
        }
        match node.get(b"Parent") {
            Ok(parent) => node = parent.deref(doc)?.as_dict()?,
            Err(_) => return Ok(None),
        }
    }
    Err(Error::DocumentLoad {
        reason: "page tree too deep".to_owned(),
    })
}

/// Numeric value of an integer or real object.
pub(crate) fn as_number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}
