//! Admission checks of the TLS security profile

use crate::crd::{TlsProfileType, TlsSecurityProfile};
use crate::tls_profile::TlsVersion;
use crate::Error;

/// Ciphers HTTP/2 requires when TLS 1.2 or older is allowed
const HTTP2_REQUIRED_CIPHERS: [&str; 2] = [
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
];

/// Reject custom profiles the operand TLS endpoints could not serve
pub fn validate_tls_profile(profile: Option<&TlsSecurityProfile>) -> Result<(), Error> {
    let Some(profile) = profile else {
        return Ok(());
    };
    let Some(custom) = &profile.custom else {
        if profile.type_ == Some(TlsProfileType::Custom) {
            return Err(Error::validation(
                "missing required field spec.tlsSecurityProfile.custom when type is Custom",
            ));
        }
        return Ok(());
    };

    let Some(min_version) = TlsVersion::parse(&custom.min_tls_version) else {
        return Err(Error::validation(
            "invalid value for spec.tlsSecurityProfile.custom.minTLSVersion",
        ));
    };

    if min_version < TlsVersion::Tls13 {
        let has_http2_cipher = custom
            .ciphers
            .iter()
            .any(|c| HTTP2_REQUIRED_CIPHERS.contains(&c.as_str()));
        if !has_http2_cipher {
            return Err(Error::validation(format!(
                "http2: TLSConfig.CipherSuites is missing an HTTP/2-required \
                 AES_128_GCM_SHA256 cipher (need at least one of {} or {})",
                HTTP2_REQUIRED_CIPHERS[0],
                HTTP2_REQUIRED_CIPHERS[1]
            )));
        }
    } else if !custom.ciphers.is_empty() {
        return Err(Error::validation(
            "custom ciphers cannot be selected when minTLSVersion is VersionTLS13",
        ));
    }
    Ok(())
}
