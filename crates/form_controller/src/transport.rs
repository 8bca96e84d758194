//! Network seam and its reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Method, Response,
};
use serde_json::Value;
use shared::{
    domain::{FieldSet, FieldValue, FilePart},
    error::SubmissionError,
    protocol::SubmissionRequest,
};
use tracing::{debug, warn};
use url::Url;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Sends one request. Non-2xx statuses are not errors.
    async fn fetch(
        &self,
        request: SubmissionRequest,
    ) -> Result<Box<dyn FetchResponse>, SubmissionError>;
}

#[async_trait]
pub trait FetchResponse: Send {
    fn status(&self) -> u16;
    async fn json(self: Box<Self>) -> Result<Value, SubmissionError>;
}

pub struct HttpFetcher {
    http: Client,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            timeout: None,
        }
    }

    pub fn with_client(http: Client) -> Self {
        Self {
            http,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn file_part(file: &FilePart) -> Part {
    let part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
    match &file.content_type {
        Some(content_type) => match part.mime_str(content_type) {
            Ok(part) => part,
            Err(error) => {
                warn!(file_name = %file.file_name, %content_type, %error, "dropping unparsable content type");
                Part::bytes(file.bytes.clone()).file_name(file.file_name.clone())
            }
        },
        None => part,
    }
}

fn multipart_body(fields: &FieldSet) -> Form {
    fields
        .iter()
        .fold(Form::new(), |form, (name, value)| match value {
            FieldValue::Text(text) => form.text(name.to_string(), text.clone()),
            FieldValue::File(file) => form.part(name.to_string(), file_part(file)),
        })
}

/// Replaces the query of `url` with the encoded field set, as a GET form does.
fn url_with_query(url: &str, fields: &FieldSet) -> Result<Url, SubmissionError> {
    let mut url =
        Url::parse(url).map_err(|err| SubmissionError::InvalidTarget(format!("{url}: {err}")))?;
    url.set_query(None);
    let pairs = fields.to_query_pairs();
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(url)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: SubmissionRequest,
    ) -> Result<Box<dyn FetchResponse>, SubmissionError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| SubmissionError::InvalidMethod(request.method.clone()))?;

        let mut builder = if request.uses_query_string() {
            let url = url_with_query(&request.url, &request.body)?;
            self.http.request(method, url)
        } else {
            self.http
                .request(method, &request.url)
                .multipart(multipart_body(&request.body))
        };
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        debug!(url = %request.url, method = %request.method, fields = request.body.len(), "sending form request");
        let response = builder
            .send()
            .await
            .map_err(|err| SubmissionError::Network(err.to_string()))?;
        Ok(Box::new(HttpResponse { inner: response }))
    }
}

struct HttpResponse {
    inner: Response,
}

#[async_trait]
impl FetchResponse for HttpResponse {
    fn status(&self) -> u16 {
        self.inner.status().as_u16()
    }

    async fn json(self: Box<Self>) -> Result<Value, SubmissionError> {
        self.inner
            .json::<Value>()
            .await
            .map_err(|err| SubmissionError::Decode(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
