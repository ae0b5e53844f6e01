//! Definition sources the refresher pulls flag definitions from.
use reqwest::{
    header::{ETAG, IF_NONE_MATCH},
    StatusCode, Url,
};

use crate::{definition::DefinitionSet, DefinitionFetchError, Error, Result};

const FLAGS_ENDPOINT: &str = "/api/v1/flags";

/// Result of a successful fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The source returned a new definition set.
    Updated {
        definitions: DefinitionSet,
        /// Version token to send with the next fetch. Falls back to the version in the payload.
        version: Option<String>,
    },
    /// Definitions have not changed since the version passed to [`DefinitionSource::fetch`].
    NotModified,
}

/// A remote (or local) provider of flag definitions.
///
/// Failure to fetch is reported as an error, distinct from [`FetchOutcome::NotModified`].
/// Implementations do not need to enforce a timeout; the refresher applies one.
#[allow(async_fn_in_trait)]
pub trait DefinitionSource: Send + 'static {
    /// Fetch the current definition set. `version` is the version of the currently published
    /// snapshot, if any, and may be used for a conditional request.
    async fn fetch(&mut self, version: Option<&str>) -> Result<FetchOutcome>;
}

/// Configuration for [`HttpDefinitionSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub base_url: String,
    /// Sent as the `apiKey` query parameter when set.
    pub api_key: Option<String>,
}

/// Fetches definitions with `GET {base_url}/api/v1/flags`, using `If-None-Match` for
/// conditional requests.
pub struct HttpDefinitionSource {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    url: Url,
}

impl HttpDefinitionSource {
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if `base_url` cannot be parsed.
    pub fn new(config: HttpSourceConfig) -> Result<HttpDefinitionSource> {
        let mut url = Url::parse(&format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            FLAGS_ENDPOINT
        ))
        .map_err(Error::InvalidBaseUrl)?;

        {
            let mut query = url.query_pairs_mut();
            if let Some(api_key) = &config.api_key {
                query.append_pair("apiKey", api_key);
            }
            query.append_pair("sdkName", env!("CARGO_PKG_NAME"));
            query.append_pair("sdkVersion", env!("CARGO_PKG_VERSION"));
        }

        Ok(HttpDefinitionSource {
            client: reqwest::Client::new(),
            url,
        })
    }
}

impl DefinitionSource for HttpDefinitionSource {
    async fn fetch(&mut self, version: Option<&str>) -> Result<FetchOutcome> {
        let mut request = self.client.get(self.url.clone());
        if let Some(version) = version {
            request = request.header(IF_NONE_MATCH, version);
        }

        log::debug!(target: "feature_flags", "fetching flag definitions");
        let response = request.send().await.map_err(DefinitionFetchError::from)?;

        match response.status() {
            StatusCode::NOT_MODIFIED => {
                log::debug!(target: "feature_flags", "flag definitions not modified");
                return Ok(FetchOutcome::NotModified);
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                log::warn!(target: "feature_flags", "client is not authorized. Check your API key");
                return Err(DefinitionFetchError::Unauthorized.into());
            }
            status if !status.is_success() => {
                log::warn!(target: "feature_flags",
                           status = status.as_u16();
                           "received non-200 response while fetching flag definitions");
                return Err(DefinitionFetchError::Status(status.as_u16()).into());
            }
            _ => {}
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let body = response.bytes().await.map_err(DefinitionFetchError::from)?;
        let definitions = DefinitionSet::from_json(&body)?;

        log::debug!(target: "feature_flags",
                    flags = definitions.flags.len();
                    "successfully fetched flag definitions");

        Ok(FetchOutcome::Updated {
            definitions,
            version: etag,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::{DefinitionSource, FetchOutcome, HttpDefinitionSource, HttpSourceConfig};
    use crate::{DefinitionFetchError, DefinitionValidationError, Error};

    fn source(server: &MockServer) -> HttpDefinitionSource {
        HttpDefinitionSource::new(HttpSourceConfig {
            base_url: server.uri(),
            api_key: Some("secret".to_owned()),
        })
        .unwrap()
    }

    fn fixture() -> String {
        std::fs::read_to_string("tests/data/definitions-v1.json").unwrap()
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = HttpDefinitionSource::new(HttpSourceConfig {
            base_url: "not a url".to_owned(),
            api_key: None,
        });
        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }

    #[tokio::test]
    async fn fetches_definitions_with_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/flags"))
            .and(query_param("apiKey", "secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v2\"")
                    .set_body_string(fixture()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = source(&server).fetch(None).await.unwrap();
        match outcome {
            FetchOutcome::Updated {
                definitions,
                version,
            } => {
                assert_eq!(version.as_deref(), Some("\"v2\""));
                assert!(definitions.flags.contains_key("new-ui"));
            }
            FetchOutcome::NotModified => panic!("expected updated definitions"),
        }
    }

    #[tokio::test]
    async fn sends_version_for_conditional_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/flags"))
            .and(header("If-None-Match", "\"v2\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = source(&server).fetch(Some("\"v2\"")).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::NotModified));
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(path("/api/v1/flags"))
            .and(query_param("apiKey", "secret"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = source(&server).fetch(None).await;
        assert!(matches!(
            result,
            Err(Error::Fetch(DefinitionFetchError::Unauthorized))
        ));

        server.reset().await;
        Mock::given(path("/api/v1/flags"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = source(&server).fetch(None).await;
        assert!(matches!(
            result,
            Err(Error::Fetch(DefinitionFetchError::Status(503)))
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_a_validation_error() {
        let server = MockServer::start().await;
        Mock::given(path("/api/v1/flags"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"flags\": 42}"))
            .mount(&server)
            .await;

        let result = source(&server).fetch(None).await;
        assert!(matches!(
            result,
            Err(Error::Validation(DefinitionValidationError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn unreachable_source_is_a_network_error() {
        let mut source = HttpDefinitionSource::new(HttpSourceConfig {
            base_url: "http://127.0.0.1:1".to_owned(),
            api_key: None,
        })
        .unwrap();

        let result = source.fetch(None).await;
        assert!(matches!(
            result,
            Err(Error::Fetch(DefinitionFetchError::Network(_)))
        ));
    }
}
