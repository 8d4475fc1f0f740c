//! rustls setup for the default transport.
//!
//! Native root certificates are read from the OS store once per process.

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::RequestError;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static NATIVE_LOADS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    NATIVE_LOADS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }
    tracing::debug!(count = loaded.certs.len(), "loaded native root certificates");
    loaded.certs
}

/// Native root certificates, loaded on first use (may be empty)
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots).as_slice()
}

/// Globally installed crypto provider, or aws-lc-rs without installing it
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Client configuration trusting the OS root store.
///
/// # Errors
///
/// Returns [`RequestError::Tls`] when the store is empty or none of its
/// certificates parse.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, RequestError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(RequestError::Tls(
            "no native root CA certificates found in OS certificate store".into(),
        ));
    }

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(RequestError::Tls(
            format!("none of the {} native root CA certificates parsed", certs.len()).into(),
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| RequestError::Tls(Box::new(e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

/// HTTPS connector for the transport; plain HTTP only when allowed.
///
/// # Errors
///
/// Returns [`RequestError::Tls`] if the roots cannot be loaded.
pub(crate) fn https_connector(
    tls_roots: TlsRootConfig,
    security: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, RequestError> {
    let allow_http = security == TransportSecurity::AllowInsecureHttp;
    let builder = match tls_roots {
        TlsRootConfig::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(native_roots_client_config()?)
        }
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| RequestError::Tls(Box::new(e)))?,
    };
    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
