//! Conversion endpoint envelope
//!
//! Maps a transport request (method plus JSON body carrying a base64 CSV
//! payload) onto a [`Transcoder`] call and back onto a status code and JSON
//! body. Listening on a socket is left to the host; this module only decides
//! what to answer.

use std::str::FromStr;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::diagnostics::Warning;
use crate::table::SubstitutionTable;
use crate::transcoder::{TranscodeOptions, Transcoder};
use crate::{Error, Result};

/// Headers attached to every response
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

const DEFAULT_FILENAME: &str = "untitled.csv";

/// Request method as seen by the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST, the only method that converts
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// OPTIONS, answered without touching the transcoder
    Options,
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let method = match s.to_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            _ => return Err(Error::UpstreamInput(format!("unknown method {}", s))),
        };
        Ok(method)
    }
}

/// JSON body accepted on POST
#[derive(Debug, Clone, Deserialize)]
pub struct ConvertRequest {
    /// Opaque label echoed back to the caller
    #[serde(default = "default_filename")]
    pub filename: String,
    /// Base64-encoded CP932 CSV
    #[serde(default)]
    pub csv_data_base64: Option<String>,
}

fn default_filename() -> String {
    DEFAULT_FILENAME.to_string()
}

#[derive(Serialize)]
struct SuccessBody<'a> {
    success: bool,
    utf8_csv_data: &'a str,
    warnings: &'a [Warning],
    original_filename: &'a str,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: String,
    kind: &'static str,
    warnings: &'a [Warning],
}

/// Status, headers and body to send back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(&'static str, &'static str)>,
    /// JSON body, empty for pre-flight answers
    pub body: String,
}

impl Response {
    fn empty(status: u16) -> Self {
        Self {
            status,
            headers: CORS_HEADERS.to_vec(),
            body: String::new(),
        }
    }

    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        let mut headers = CORS_HEADERS.to_vec();
        headers.push(("Content-Type", "application/json; charset=utf-8"));
        let body = serde_json::to_string(body).unwrap_or_else(|e| {
            format!(
                "{{\"success\":false,\"error\":\"response serialization failed: {}\"}}",
                e
            )
        });
        Self {
            status,
            headers,
            body,
        }
    }

    fn error(status: u16, error: &Error, warnings: &[Warning]) -> Self {
        Self::json(
            status,
            &ErrorBody {
                success: false,
                error: error.to_string(),
                kind: error.kind(),
                warnings,
            },
        )
    }
}

/// The conversion endpoint
///
/// Holds the process-wide table; each call gets its own diagnostics.
#[derive(Debug, Clone)]
pub struct Service {
    table: Arc<SubstitutionTable>,
    options: TranscodeOptions,
}

impl Service {
    /// Serve conversions with `table` and the CSV dialect
    pub fn new(table: Arc<SubstitutionTable>) -> Self {
        Self {
            table,
            options: TranscodeOptions::default(),
        }
    }

    /// Use a different dialect
    pub fn with_options(mut self, options: TranscodeOptions) -> Self {
        self.options = options;
        self
    }

    /// The shared substitution table
    pub fn table(&self) -> &SubstitutionTable {
        &self.table
    }

    /// Answer one request
    pub fn handle(&self, method: Method, body: &[u8]) -> Response {
        match method {
            Method::Options => return Response::empty(204),
            Method::Post => {}
            other => {
                log::warn!("rejected {:?} request", other);
                return Response::error(
                    405,
                    &Error::UpstreamInput("only POST is supported".to_string()),
                    &[],
                );
            }
        }

        let (filename, bytes) = match parse_request(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("{}", e);
                return Response::error(400, &e, &[]);
            }
        };
        log::info!("converting {} ({} bytes)", filename, bytes.len());

        let transcoder = Transcoder::new(&self.table).with_options(self.options.clone());
        match transcoder.transcode(&bytes) {
            Ok(result) => Response::json(
                200,
                &SuccessBody {
                    success: true,
                    utf8_csv_data: &result.text,
                    warnings: &result.warnings,
                    original_filename: &filename,
                },
            ),
            Err(failure) => {
                log::error!("conversion of {} failed: {}", filename, failure);
                Response::error(500, &failure.error, &failure.warnings)
            }
        }
    }
}

/// Validate the envelope and decode the payload
fn parse_request(body: &[u8]) -> Result<(String, Vec<u8>)> {
    let request: ConvertRequest = serde_json::from_slice(body)
        .map_err(|e| Error::UpstreamInput(format!("request body must be a JSON object: {}", e)))?;

    let payload = request
        .csv_data_base64
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::UpstreamInput("missing required field csv_data_base64".to_string()))?;

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::UpstreamInput(format!("invalid base64 payload: {}", e)))?;

    Ok((request.filename, bytes))
}
