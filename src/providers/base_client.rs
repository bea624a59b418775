use crate::core::error::EspejoError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Thin reqwest wrapper shared by the Gemini client and the Supabase store.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    client: Client,
}

impl HttpClient {
    pub fn new(
        base_url: String,
        timeout: Option<Duration>,
        extra_headers: Option<HashMap<String, String>>,
    ) -> Result<Self, EspejoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        for (key, value) in extra_headers.unwrap_or_default() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| EspejoError::Config(format!("Invalid header {}: {}", key, e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| EspejoError::Config(format!("Invalid value for {}: {}", key, e)))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| EspejoError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn send<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
        payload: Option<&T>,
    ) -> Result<Response, EspejoError> {
        let mut request = self
            .client
            .request(method, self.url(path))
            .query(query);

        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        Ok(request.send().await?)
    }

    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        payload: &T,
    ) -> Result<Response, EspejoError> {
        self.send(Method::POST, path, query, &[], Some(payload)).await
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response, EspejoError> {
        self.send::<()>(Method::GET, path, query, &[], None).await
    }

    pub async fn delete(&self, path: &str, query: &[(&str, &str)]) -> Result<Response, EspejoError> {
        self.send::<()>(Method::DELETE, path, query, &[], None).await
    }
}
