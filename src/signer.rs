//! The signing pipeline.
//!
//! `Validate → HashOriginal → DecodeImage → MapCoordinates → FitImage →
//! Composite → HashOutput → WriteOutput → PersistAudit`. Any failing stage
//! aborts the rest; nothing is retried.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, NewAuditRecord};
use crate::config::SignerConfig;
use crate::error::{Error, Result};
use crate::geometry::{fit, to_document_rect};
use crate::hash::{digest, Digest};
use crate::image;
use crate::request::{PlacementRequest, SignRequestBody};
use crate::PDFSigningDocument;

/// Outcome of a successful signing.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    /// Public URL of the signed PDF.
    pub url: String,
    /// Where the file was written on disk.
    pub file_path: PathBuf,
    pub original_hash: Digest,
    pub signed_hash: Digest,
    pub audit: AuditRecord,
}

/// Signs configured source documents and records every signing.
pub struct SigningService {
    documents: HashMap<String, PathBuf>,
    signed_dir: PathBuf,
    public_prefix: String,
    base_url: String,
    audit: Arc<dyn AuditSink>,
}

impl SigningService {
    pub fn new(config: &SignerConfig, audit: Arc<dyn AuditSink>) -> Self {
        SigningService {
            documents: config.documents.clone(),
            signed_dir: config.storage.signed_dir.clone(),
            public_prefix: config.storage.public_prefix.trim_end_matches('/').to_owned(),
            base_url: config.server.base_url.trim_end_matches('/').to_owned(),
            audit,
        }
    }

    /// URL path prefix signed files are served under, without a trailing `/`.
    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Contents of a previously signed file, looked up by bare file name.
    ///
    /// Names that could leave `signed_dir` and files that do not exist both
    /// come back as `None`.
    pub fn read_signed(&self, file_name: &str) -> Result<Option<Vec<u8>>> {
        if file_name.is_empty()
            || file_name.contains(['/', '\\'])
            || file_name.contains("..")
        {
            debug!("refusing signed file name {file_name:?}");
            return Ok(None);
        }

        let path = self.signed_dir.join(file_name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::SignedFileRead { path, source }),
        }
    }

    /// Validate a raw request body and sign it.
    pub fn sign_body(
        &self,
        body: SignRequestBody,
        requester_address: Option<String>,
    ) -> Result<SignedDocument> {
        let request = PlacementRequest::try_from(body).inspect_err(|err| {
            warn!("rejected signing request: {err}");
        })?;
        self.sign(request, requester_address)
    }

    /// Run the pipeline for one request.
    pub fn sign(
        &self,
        request: PlacementRequest,
        requester_address: Option<String>,
    ) -> Result<SignedDocument> {
        let document_id = request.document_id.clone();
        self.run(request, requester_address).inspect_err(|err| {
            if err.status_code() >= 500 {
                error!("signing document {document_id} failed: {}", err.detail());
            } else {
                warn!("signing document {document_id} rejected: {err}");
            }
        })
    }

    fn run(
        &self,
        request: PlacementRequest,
        requester_address: Option<String>,
    ) -> Result<SignedDocument> {
        let source_path =
            self.documents
                .get(&request.document_id)
                .ok_or_else(|| Error::DocumentNotFound {
                    document_id: request.document_id.clone(),
                })?;

        let source = fs::read(source_path).map_err(|source| Error::SourceUnavailable {
            path: source_path.clone(),
            source,
        })?;
        let original_hash = digest(&source);
        debug!(
            "loaded {} ({} bytes, sha256 {original_hash})",
            source_path.display(),
            source.len()
        );

        let decoded = image::decode(&request.image_bytes)?;
        if !request.declared_mime.contains(decoded.format.name()) {
            debug!(
                "declared mime {} but bytes are {}",
                request.declared_mime,
                decoded.format.name()
            );
        }

        let mut document = PDFSigningDocument::load(&source)?;
        let page = document.page_geometry(request.page)?;
        let bounds = to_document_rect(request.rect, page);
        let drawn = fit(decoded.intrinsics, bounds);
        debug!("placement box {bounds:?}, drawn {drawn:?}");

        document.add_signature_image(
            request.page,
            decoded.format,
            &request.image_bytes,
            drawn,
        )?;
        let output = document.finish()?;
        let signed_hash = digest(&output);

        let id = Uuid::new_v4();
        let file_name = format!("signed-{id}.pdf");
        let file_path = self.signed_dir.join(&file_name);
        write_new_file(&self.signed_dir, &file_path, &output)?;

        let relative_path = format!("{}/{file_name}", self.public_prefix);
        let record = NewAuditRecord {
            id,
            document_id: request.document_id,
            original_hash: original_hash.clone(),
            signed_hash: signed_hash.clone(),
            signed_file_path: relative_path.clone(),
            requester_address,
        };

        let audit = match self.audit.append(record) {
            Ok(audit) => audit,
            Err(err) => {
                // Unaudited output must not outlive the failed operation.
                remove_output(&file_path, "unaudited");
                return Err(err.into());
            }
        };

        info!(
            "signed document {} page {} -> {file_name} (original {original_hash}, signed {signed_hash})",
            audit.document_id, request.page
        );

        Ok(SignedDocument {
            url: format!("{}{relative_path}", self.base_url),
            file_path,
            original_hash,
            signed_hash,
            audit,
        })
    }
}

/// Write `contents` to a file that must not exist yet.
fn write_new_file(dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    let output_error = |source| Error::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(output_error)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(output_error)?;

    if let Err(err) = file.write_all(contents).and_then(|_| file.sync_all()) {
        drop(file);
        remove_output(path, "partially written");
        return Err(output_error(err));
    }
    Ok(())
}

/// Delete an output file that must not be kept. Returns whether it is gone;
/// a failure is logged with the path so operators can clean up by hand.
fn remove_output(path: &Path, kind: &str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!("removed {kind} output {}", path.display());
            true
        }
        Err(err) => {
            error!("could not remove {kind} output {}: {err}", path.display());
            false
        }
    }
}
