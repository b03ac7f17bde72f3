use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Secret data key holding the server certificate.
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Hex SHA-256 of the DER bytes of a single PEM certificate.
///
/// Text before the `BEGIN` line is ignored, as written by `openssl x509 -text`.
/// Anything after the block is rejected, and the body must parse as X.509.
pub fn from_pem(text: &str) -> Result<String> {
    let blocks = ::pem::parse_many(text)
        .map_err(|e| Error::config(format!("failed to decode PEM: {e}")))?;
    let [block] = blocks.as_slice() else {
        if blocks.is_empty() {
            return Err(Error::config("failed to decode PEM: no certificate block found"));
        }
        return Err(Error::config(
            "failed to decode PEM: unexpected data after certificate block",
        ));
    };
    if has_trailing_data(text) {
        return Err(Error::config(
            "failed to decode PEM: unexpected data after certificate block",
        ));
    }
    if block.tag() != CERTIFICATE_TAG {
        return Err(Error::config(format!(
            "failed to decode PEM: expected a {CERTIFICATE_TAG} block, found {}",
            block.tag()
        )));
    }

    let der = block.contents();
    let (rest, _cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| Error::config(format!("failed to parse X509 certificate: {e}")))?;
    if !rest.is_empty() {
        return Err(Error::config(
            "failed to parse X509 certificate: trailing data after certificate",
        ));
    }
    Ok(hex::encode(Sha256::digest(der)))
}

/// Fingerprint from secret data rendered as JSON, e.g. `{"tls.crt": "<base64 PEM>"}`.
pub fn from_certificate_json(json: &str) -> Result<String> {
    let data: BTreeMap<String, String> = serde_json::from_str(json).map_err(|e| {
        Error::config(format!("failed to unmarshal certificate secret data: {e}"))
    })?;
    let encoded = data.get(TLS_CERT_KEY).ok_or_else(|| {
        Error::config(format!("certificate secret data has no '{TLS_CERT_KEY}' key"))
    })?;
    let pem = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::config(format!("failed to base64 decode certificate: {e}")))?;
    let pem = String::from_utf8(pem)
        .map_err(|e| Error::config(format!("certificate is not valid UTF-8: {e}")))?;
    from_pem(&pem).map_err(|e| e.context("failed to extract fingerprint from certificate secret"))
}

fn has_trailing_data(text: &str) -> bool {
    let Some((_, tail)) = text.rsplit_once("-----END ") else {
        return false;
    };
    let after_marker = tail.split_once('\n').map_or("", |(_, rest)| rest);
    !after_marker.trim().is_empty()
}
