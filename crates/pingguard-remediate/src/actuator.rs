//! Remediation actuator — restarts the network device.
//!
//! [`RedfishActuator`] asks the device's management controller for a reset
//! through the Redfish `ComputerSystem.Reset` action, over plain HTTP or
//! HTTPS. Any 2xx response is success.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use pingguard_core::config::{ActuatorConfig, Credentials};
use pingguard_core::parse_duration;

/// Redfish action path for a system reset.
pub const RESET_PATH: &str = "/redfish/v1/Systems/Self/Actions/ComputerSystem.Reset";

/// Successful restart acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    #[error("controller rejected reset with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("reset request timed out after {0:?}")]
    Timeout(Duration),

    #[error("actuator misconfigured: {0}")]
    Config(String),
}

/// Restarts the monitored network device.
pub trait Actuator: Send + Sync {
    fn restart(&self) -> impl Future<Output = Result<Ack, ActuatorError>> + Send;
}

/// Redfish client for one management controller.
pub struct RedfishActuator {
    host: String,
    port: u16,
    reset_type: String,
    authorization: Option<String>,
    timeout: Duration,
    /// `Some` for https.
    tls: Option<TlsConnector>,
}

impl RedfishActuator {
    /// Build from config, reading `credentials_file` if one is set.
    pub fn from_config(config: &ActuatorConfig) -> Result<Self, ActuatorError> {
        let credentials = config
            .credentials_file
            .as_deref()
            .map(Credentials::from_file)
            .transpose()
            .map_err(|e| ActuatorError::Config(e.to_string()))?;
        Self::new(config, credentials.as_ref())
    }

    pub fn new(
        config: &ActuatorConfig,
        credentials: Option<&Credentials>,
    ) -> Result<Self, ActuatorError> {
        let timeout = parse_duration(&config.timeout).ok_or_else(|| {
            ActuatorError::Config(format!("invalid timeout {:?}", config.timeout))
        })?;
        let tls = match config.protocol.as_str() {
            "http" => None,
            "https" => Some(tls_connector(config.insecure_tls)?),
            other => {
                return Err(ActuatorError::Config(format!("unsupported protocol {other}")));
            }
        };
        let authorization = credentials.map(|c| {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", c.user, c.password));
            format!("Basic {token}")
        });

        Ok(Self {
            host: config.host.clone(),
            port: config.effective_port(),
            reset_type: config.reset_type.clone(),
            authorization,
            timeout,
            tls,
        })
    }

    /// Full reset URI, for logging.
    pub fn reset_uri(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://{}:{}{RESET_PATH}", self.host, self.port)
    }

    fn build_request(&self) -> Result<http::Request<Full<Bytes>>, ActuatorError> {
        let body = serde_json::to_vec(&serde_json::json!({ "ResetType": self.reset_type }))
            .map_err(|e| ActuatorError::Config(e.to_string()))?;

        let mut builder = http::Request::builder()
            .method("POST")
            .uri(RESET_PATH)
            .header("host", format!("{}:{}", self.host, self.port))
            .header("user-agent", "pingguard/0.1")
            .header("content-type", "application/json")
            .header("accept", "application/json");
        if let Some(auth) = &self.authorization {
            builder = builder.header("authorization", auth);
        }
        builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ActuatorError::Config(e.to_string()))
    }

    async fn exchange(&self) -> Result<(http::StatusCode, Bytes), ActuatorError> {
        let req = self.build_request()?;
        let stream = tokio::net::TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ActuatorError::Transport(format!("connect {}:{}: {e}", self.host, self.port)))?;

        match &self.tls {
            None => send(stream, req).await,
            Some(connector) => {
                let server_name = rustls::pki_types::ServerName::try_from(self.host.clone())
                    .map_err(|e| {
                        ActuatorError::Config(format!("invalid tls server name '{}': {e}", self.host))
                    })?;
                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ActuatorError::Transport(format!("tls handshake: {e}")))?;
                send(tls_stream, req).await
            }
        }
    }
}

impl Actuator for RedfishActuator {
    async fn restart(&self) -> Result<Ack, ActuatorError> {
        let uri = self.reset_uri();
        debug!(%uri, reset_type = %self.reset_type, "requesting reset");

        let (status, body) = tokio::time::timeout(self.timeout, self.exchange())
            .await
            .map_err(|_| ActuatorError::Timeout(self.timeout))??;

        let body = String::from_utf8_lossy(&body).into_owned();
        if status.is_success() {
            debug!(%uri, %status, response = %body, "reset accepted");
            Ok(Ack {
                status: status.as_u16(),
            })
        } else {
            Err(ActuatorError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Send one request over an established connection and collect the reply.
async fn send<S>(
    io: S,
    req: http::Request<Full<Bytes>>,
) -> Result<(http::StatusCode, Bytes), ActuatorError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = hyper_util::rt::TokioIo::new(io);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ActuatorError::Transport(format!("http handshake: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| ActuatorError::Transport(format!("request failed: {e}")))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ActuatorError::Transport(format!("reading response: {e}")))?
        .to_bytes();
    Ok((status, body))
}

fn tls_connector(insecure: bool) -> Result<TlsConnector, ActuatorError> {
    let builder = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| ActuatorError::Config(format!("tls protocol version error: {e}")))?;

    let config = if insecure {
        warn!("certificate verification disabled for the management controller");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
            .with_no_client_auth()
    } else {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

// ── Certificate verifier for self-signed controllers ─────────────────

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
