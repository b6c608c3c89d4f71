//! Endpoint configuration and the low-level Substreams gRPC client.

use std::fmt;

use tonic::codec::Streaming;
use tonic::metadata::{AsciiMetadataValue, KeyAndValueRef, MetadataMap};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::warn;

use crate::SinkError;
use crate::pb::substreams::rpc::v2::stream_client::StreamClient;
use crate::pb::substreams::rpc::v2::{Request, Response};

/// Connection settings for a Substreams endpoint.
#[derive(Clone)]
pub struct SubstreamsClientConfig {
    endpoint: String,
    jwt: Option<String>,
    insecure: bool,
    plaintext: bool,
}

impl fmt::Debug for SubstreamsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstreamsClientConfig")
            .field("endpoint", &self.endpoint)
            .field("jwt", &self.jwt.as_ref().map(|_| "<redacted>"))
            .field("insecure", &self.insecure)
            .field("plaintext", &self.plaintext)
            .finish()
    }
}

impl SubstreamsClientConfig {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        jwt: Option<String>,
        insecure: bool,
        plaintext: bool,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            jwt: jwt.filter(|token| !token.is_empty()),
            insecure,
            plaintext,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn insecure(&self) -> bool {
        self.insecure
    }

    #[must_use]
    pub fn plaintext(&self) -> bool {
        self.plaintext
    }

    #[must_use]
    pub fn jwt(&self) -> Option<&str> {
        self.jwt.as_deref()
    }

    /// The endpoint as a dialable URI, defaulting the scheme from the
    /// `plaintext` setting when the caller gave a bare `host:port`.
    fn uri(&self) -> String {
        if self.endpoint.contains("://") {
            return self.endpoint.clone();
        }

        if self.plaintext {
            format!("http://{}", self.endpoint)
        } else {
            format!("https://{}", self.endpoint)
        }
    }
}

impl fmt::Display for SubstreamsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (insecure: {}, plaintext: {}, JWT present: {})",
            self.endpoint,
            self.insecure,
            self.plaintext,
            self.jwt.is_some()
        )
    }
}

/// Streaming client bound to one endpoint, attaching authorization and user
/// supplied headers to every request.
pub(crate) struct SubstreamsClient {
    inner: StreamClient<Channel>,
    authorization: Option<AsciiMetadataValue>,
    extra_headers: MetadataMap,
}

impl SubstreamsClient {
    /// Builds the client without performing any I/O; the channel dials on
    /// first use and redials transparently across reconnect attempts.
    pub fn connect(
        config: &SubstreamsClientConfig,
        extra_headers: MetadataMap,
    ) -> Result<Self, SinkError> {
        let uri = config.uri();
        let plaintext = uri.starts_with("http://");

        let mut endpoint = Endpoint::from_shared(uri)?;
        if !plaintext {
            if config.insecure() {
                // The transport offers no skip-verify mode; certificates are
                // still validated against the system roots.
                warn!(
                    "insecure endpoint requested, server certificate validation cannot be disabled and stays active"
                );
            }
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }

        let authorization = config
            .jwt()
            .map(|token| {
                format!("Bearer {token}").parse::<AsciiMetadataValue>().map_err(|_| {
                    SinkError::Configuration("API token is not a valid header value".to_string())
                })
            })
            .transpose()?;

        Ok(Self {
            inner: StreamClient::new(endpoint.connect_lazy()),
            authorization,
            extra_headers,
        })
    }

    /// Opens the server-streaming `Blocks` call.
    pub async fn blocks(&mut self, request: Request) -> Result<Streaming<Response>, tonic::Status> {
        let mut request = tonic::Request::new(request);

        if let Some(authorization) = &self.authorization {
            request
                .metadata_mut()
                .insert("authorization", authorization.clone());
        }

        for entry in self.extra_headers.iter() {
            match entry {
                KeyAndValueRef::Ascii(key, value) => {
                    request.metadata_mut().append(key.clone(), value.clone());
                }
                KeyAndValueRef::Binary(key, value) => {
                    request.metadata_mut().append_bin(key.clone(), value.clone());
                }
            }
        }

        Ok(self.inner.blocks(request).await?.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_never_leaks_the_token() {
        let config = SubstreamsClientConfig::new(
            "mainnet.eth.streamingfast.io:443",
            Some("super-secret".to_string()),
            false,
            false,
        );

        let rendered = config.to_string();
        assert!(!rendered.contains("super-secret"));
        assert_eq!(
            rendered,
            "mainnet.eth.streamingfast.io:443 (insecure: false, plaintext: false, JWT present: true)"
        );
    }

    #[test]
    fn bare_endpoints_get_a_scheme_from_plaintext() {
        let tls = SubstreamsClientConfig::new("host:443", None, false, false);
        assert_eq!(tls.uri(), "https://host:443");

        let plaintext = SubstreamsClientConfig::new("host:9000", None, false, true);
        assert_eq!(plaintext.uri(), "http://host:9000");

        let explicit = SubstreamsClientConfig::new("http://host:9000", None, false, false);
        assert_eq!(explicit.uri(), "http://host:9000");
    }

    #[test]
    fn empty_token_counts_as_absent() {
        let config = SubstreamsClientConfig::new("host:443", Some(String::new()), false, false);
        assert!(config.jwt().is_none());
    }
}
