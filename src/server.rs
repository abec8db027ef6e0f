//! Minimal HTTP front end for the signing pipeline.
//!
//! A fixed pool of worker threads pulls requests off one shared listener;
//! each request is handled start to finish on a single thread.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use serde::Serialize;
use tiny_http::{Header, Method, Request, Response};

use crate::request::{ErrorResponse, SignRequestBody, SignResponse};
use crate::signer::SigningService;

pub const SIGN_PATH: &str = "/api/sign-pdf";

/// A response ready to be written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Reply {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => {
                error!("failed to serialize response: {err}");
                Reply {
                    status: 500,
                    content_type: "application/json",
                    body: br#"{"error":"Internal server error"}"#.to_vec(),
                }
            }
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Reply::json(
            status,
            &ErrorResponse {
                error: message.to_owned(),
            },
        )
    }

    fn pdf(body: Vec<u8>) -> Self {
        Reply {
            status: 200,
            content_type: "application/pdf",
            body,
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Reply {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    fn empty(status: u16) -> Self {
        Reply {
            status,
            content_type: "text/plain; charset=utf-8",
            body: Vec::new(),
        }
    }

    fn into_response(self) -> Response<Cursor<Vec<u8>>> {
        let mut response = Response::from_data(self.body).with_status_code(self.status);
        for (name, value) in [
            ("Content-Type", self.content_type),
            ("Access-Control-Allow-Origin", "*"),
            ("Access-Control-Allow-Headers", "Content-Type"),
            ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
        ] {
            if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                response.add_header(header);
            }
        }
        response
    }
}

/// Route one request. Transport concerns (reading the socket, headers) stay
/// in [`serve`] so this can be driven directly.
pub fn handle(
    service: &SigningService,
    method: &Method,
    url: &str,
    body: &[u8],
    requester_address: Option<String>,
) -> Reply {
    let path = url.split('?').next().unwrap_or_default();
    match (method, path) {
        (Method::Options, _) => Reply::empty(204),
        (Method::Get, "/") => Reply::text(200, "Backend is running"),
        (Method::Post, SIGN_PATH) => sign(service, body, requester_address),
        (_, "/") | (_, SIGN_PATH) => Reply::error(405, "Method not allowed"),
        _ => match signed_file_name(service.public_prefix(), path) {
            Some(name) if *method == Method::Get => signed_file(service, name),
            Some(_) => Reply::error(405, "Method not allowed"),
            None => Reply::error(404, "Not found"),
        },
    }
}

/// The file name part of `path` when it sits directly under `prefix`.
fn signed_file_name<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    path.strip_prefix(prefix)?.strip_prefix('/')
}

/// Read-only download of a signed PDF.
fn signed_file(service: &SigningService, name: &str) -> Reply {
    match service.read_signed(name) {
        Ok(Some(body)) => Reply::pdf(body),
        Ok(None) => Reply::error(404, "Not found"),
        Err(err) => {
            error!("serving {name} failed: {}", err.detail());
            Reply::error(err.status_code(), &err.public_message())
        }
    }
}

fn sign(service: &SigningService, body: &[u8], requester_address: Option<String>) -> Reply {
    let body: SignRequestBody = match serde_json::from_slice(body) {
        Ok(body) => body,
        Err(err) => {
            debug!("malformed JSON body: {err}");
            return Reply::error(400, &format!("Malformed JSON body: {err}"));
        }
    };

    match service.sign_body(body, requester_address) {
        Ok(signed) => Reply::json(
            200,
            &SignResponse {
                url: signed.url,
                original_hash: signed.original_hash,
                signed_hash: signed.signed_hash,
            },
        ),
        Err(err) => Reply::error(err.status_code(), &err.public_message()),
    }
}

/// Client address, preferring the first `X-Forwarded-For` hop.
fn requester_address(request: &Request) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|header| header.field.equiv("X-Forwarded-For"))
        .and_then(|header| header.value.as_str().split(',').next())
        .map(|hop| hop.trim().to_owned())
        .filter(|hop| !hop.is_empty())
        .or_else(|| request.remote_addr().map(|addr| addr.ip().to_string()))
}

fn respond(mut request: Request, service: &SigningService, max_body_bytes: usize) {
    let requester = requester_address(&request);
    let method = request.method().clone();
    let url = request.url().to_owned();

    let reply = if request.body_length().is_some_and(|len| len > max_body_bytes) {
        Reply::error(413, "Request body too large")
    } else {
        let mut body = Vec::new();
        let limit = u64::try_from(max_body_bytes).unwrap_or(u64::MAX).saturating_add(1);
        match request.as_reader().take(limit).read_to_end(&mut body) {
            Ok(_) if body.len() > max_body_bytes => Reply::error(413, "Request body too large"),
            Ok(_) => handle(service, &method, &url, &body, requester.clone()),
            Err(err) => {
                warn!("failed to read request body: {err}");
                Reply::error(400, "Unreadable request body")
            }
        }
    };

    debug!(
        "{method} {url} -> {} ({})",
        reply.status,
        requester.as_deref().unwrap_or("unknown")
    );
    if let Err(err) = request.respond(reply.into_response()) {
        warn!("failed to send response: {err}");
    }
}

/// Handle to a running server.
pub struct Server {
    http: Arc<tiny_http::Server>,
    workers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind `address` and start `workers` request threads.
    pub fn start(
        address: &str,
        workers: usize,
        max_body_bytes: usize,
        service: Arc<SigningService>,
    ) -> std::io::Result<Self> {
        let http = tiny_http::Server::http(address)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, err))?;
        let http = Arc::new(http);
        info!("listening on {address} with {workers} worker(s)");

        let workers = (0..workers.max(1))
            .map(|index| {
                let http = Arc::clone(&http);
                let service = Arc::clone(&service);
                thread::Builder::new()
                    .name(format!("signer-worker-{index}"))
                    .spawn(move || {
                        for request in http.incoming_requests() {
                            respond(request, &service, max_body_bytes);
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Server { http, workers })
    }

    /// Port actually bound, useful when started on port 0.
    pub fn port(&self) -> Option<u16> {
        self.http.server_addr().to_ip().map(|addr| addr.port())
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub fn shutdown(self) {
        // Each unblock releases exactly one waiting worker.
        for _ in &self.workers {
            self.http.unblock();
        }
        for worker in self.workers {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    /// Block until every worker exits.
    pub fn join(self) {
        for worker in self.workers {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}
