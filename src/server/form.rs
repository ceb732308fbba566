//! Request parameter bag: query string, urlencoded or multipart form body, uploaded files.

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart};
use axum::http::{header::CONTENT_TYPE, HeaderMap, Request, StatusCode};
use url::form_urlencoded;

use crate::error::{AppError, AppResult};

/// Explicit three-valued flag for optional boolean query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriState {
    #[default]
    Unset,
    True,
    False,
}

impl TriState {
    pub fn as_option(self) -> Option<bool> {
        match self {
            TriState::Unset => None,
            TriState::True => Some(true),
            TriState::False => Some(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct Params {
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    pub attachments: Vec<Attachment>,
}

impl Params {
    pub fn from_query(query: Option<&str>) -> Self {
        Self { query: parse_pairs(query.unwrap_or("").as_bytes()), ..Default::default() }
    }

    /// First query-string value, empty when absent.
    pub fn query_value(&self, name: &str) -> &str { first(&self.query, name).unwrap_or("") }

    pub fn has_query(&self, name: &str) -> bool { first(&self.query, name).is_some() }

    /// First value from the body, then the query string; empty when absent.
    pub fn form_value(&self, name: &str) -> &str {
        first(&self.form, name).or_else(|| first(&self.query, name)).unwrap_or("")
    }

    pub fn form_opt(&self, name: &str) -> Option<&str> {
        first(&self.form, name).or_else(|| first(&self.query, name))
    }

    /// Body-only lookup; secrets must never be accepted from the query string.
    pub fn body_value(&self, name: &str) -> Option<&str> { first(&self.form, name) }

    /// All body values for a repeated field.
    pub fn form_values(&self, name: &str) -> Vec<String> {
        self.form.iter().filter(|(k, _)| k == name).map(|(_, v)| v.clone()).collect()
    }

    pub fn form_bool(&self, name: &str) -> bool { self.form_value(name) == "true" }

    /// Integer field; unparsable or absent values read as zero.
    pub fn form_int(&self, name: &str) -> i64 { self.form_value(name).parse().unwrap_or(0) }

    pub fn query_int(&self, name: &str) -> i64 { self.query_value(name).parse().unwrap_or(0) }

    pub fn query_tristate(&self, name: &str) -> TriState {
        match first(&self.query, name) {
            None => TriState::Unset,
            Some("true") => TriState::True,
            Some(_) => TriState::False,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_form(mut self, pairs: &[(&str, &str)]) -> Self {
        self.form.extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    /// Read the body of a request whose query has already been parsed. Bodies are
    /// capped by the router's `DefaultBodyLimit`.
    pub async fn read_body(&mut self, req: Request<axum::body::Body>) -> AppResult<()> {
        let ct = content_type(req.headers()).to_ascii_lowercase();
        if ct.starts_with("multipart/form-data") {
            let mut mp = Multipart::from_request(req, &())
                .await
                .map_err(|e| body_error("bad_multipart", e.status(), e.body_text()))?;
            let field_error = |e: MultipartError| body_error("bad_multipart", e.status(), e.body_text());
            while let Some(field) = mp.next_field().await.map_err(field_error)? {
                let name = field.name().unwrap_or("").to_string();
                match field.file_name().map(str::to_string) {
                    Some(file_name) => {
                        let content_type = field.content_type().map(str::to_string);
                        let data = field.bytes().await.map_err(field_error)?;
                        // browsers send an empty part for an untouched file input
                        if !file_name.is_empty() || !data.is_empty() {
                            self.attachments.push(Attachment { file_name, content_type, data });
                        }
                    }
                    None => {
                        let value = field.text().await.map_err(field_error)?;
                        self.form.push((name, value));
                    }
                }
            }
        } else if ct.starts_with("application/x-www-form-urlencoded") {
            let body = Bytes::from_request(req, &())
                .await
                .map_err(|e| body_error("bad_body", e.status(), e.body_text()))?;
            self.form = parse_pairs(&body);
        }
        Ok(())
    }
}

fn body_error(code: &str, status: StatusCode, text: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::user("body_too_large", text)
    } else {
        AppError::user(code, text)
    }
}

fn content_type(headers: &HeaderMap) -> &str {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("")
}

fn parse_pairs(input: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(input).into_owned().collect()
}

fn first<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}
