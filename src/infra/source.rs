//! HTTP-backed image source.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};

use crate::application::source::{FetchError, ImageSource};

use super::error::InfraError;

/// Fetches the artifact with a plain GET against a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: Client,
    url: Url,
}

impl HttpImageSource {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| {
                InfraError::configuration(format!("failed to build http client: {err}"))
            })?;
        Ok(Self { client, url })
    }

    pub fn user_agent() -> &'static str {
        concat!("todo-frontend/", env!("CARGO_PKG_VERSION"))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    async fn fetch(&self) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(FetchError::transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(FetchError::transport)
    }
}
