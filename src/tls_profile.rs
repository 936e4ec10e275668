//! TLS security profile cache
//!
//! The profile from the HyperConverged resource is cached by the validating
//! webhook on every accepted (non-dry-run) create or update and cleared on
//! delete. The reconciler reads it to configure the TLS endpoints of the
//! operands, and the webhook server follows it for its own listener; when
//! nothing is cached the Intermediate profile applies.

use std::fmt;
use std::sync::Arc;

use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};
use tokio::sync::watch;
use tracing::warn;

use crate::crd::{CustomTlsProfile, TlsProfileType, TlsSecurityProfile};
use crate::Error;

/// Minimal TLS protocol version of a profile
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse the `VersionTLS1x` spelling used in profiles
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "VersionTLS10" => Some(Self::Tls10),
            "VersionTLS11" => Some(Self::Tls11),
            "VersionTLS12" => Some(Self::Tls12),
            "VersionTLS13" => Some(Self::Tls13),
            _ => None,
        }
    }

    /// `VersionTLS1x` spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tls10 => "VersionTLS10",
            Self::Tls11 => "VersionTLS11",
            Self::Tls12 => "VersionTLS12",
            Self::Tls13 => "VersionTLS13",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const TLS13_CIPHERS: [&str; 3] = [
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
];

const INTERMEDIATE_CIPHERS: [&str; 8] = [
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "DHE-RSA-AES128-GCM-SHA256",
    "DHE-RSA-AES256-GCM-SHA384",
];

const OLD_EXTRA_CIPHERS: [&str; 17] = [
    "ECDHE-ECDSA-AES128-SHA256",
    "ECDHE-RSA-AES128-SHA256",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-ECDSA-AES256-SHA384",
    "ECDHE-RSA-AES256-SHA384",
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-RSA-AES256-SHA",
    "DHE-RSA-AES128-SHA256",
    "DHE-RSA-AES256-SHA256",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA256",
    "AES256-SHA256",
    "AES128-SHA",
    "AES256-SHA",
    "DES-CBC3-SHA",
];

/// Ciphers and minimal version of a predefined profile
///
/// `Custom` resolves to Intermediate; callers holding a custom block use
/// it directly.
pub fn predefined(profile: &TlsProfileType) -> (Vec<String>, TlsVersion) {
    let tls13 = TLS13_CIPHERS.iter();
    match profile {
        TlsProfileType::Modern => (tls13.map(|c| c.to_string()).collect(), TlsVersion::Tls13),
        TlsProfileType::Old => {
            let ciphers: Vec<String> = tls13
                .chain(INTERMEDIATE_CIPHERS.iter())
                .chain(OLD_EXTRA_CIPHERS.iter())
                .map(|c| c.to_string())
                .collect();
            (ciphers, TlsVersion::Tls10)
        }
        TlsProfileType::Intermediate | TlsProfileType::Custom => (
            tls13
                .chain(INTERMEDIATE_CIPHERS.iter())
                .map(|c| c.to_string())
                .collect(),
            TlsVersion::Tls12,
        ),
    }
}

/// Effective ciphers and minimal version of an optional profile
pub fn resolve(profile: Option<&TlsSecurityProfile>) -> (Vec<String>, TlsVersion) {
    let Some(profile) = profile else {
        return predefined(&TlsProfileType::Intermediate);
    };
    match (&profile.type_, &profile.custom) {
        (Some(TlsProfileType::Custom), Some(CustomTlsProfile { ciphers, min_tls_version })) => {
            match TlsVersion::parse(min_tls_version) {
                Some(version) => (ciphers.clone(), version),
                None => {
                    warn!(
                        min_tls_version = %min_tls_version,
                        "invalid minimal TLS version in custom profile, using Intermediate"
                    );
                    predefined(&TlsProfileType::Intermediate)
                }
            }
        }
        (Some(TlsProfileType::Custom), None) => {
            warn!("custom TLS profile without settings, using Intermediate");
            predefined(&TlsProfileType::Intermediate)
        }
        (Some(kind), _) => predefined(kind),
        (None, _) => predefined(&TlsProfileType::Intermediate),
    }
}

const IANA_NAMES: [(&str, &str); 30] = [
    ("TLS_AES_128_GCM_SHA256", "TLS_AES_128_GCM_SHA256"),
    ("TLS_AES_256_GCM_SHA384", "TLS_AES_256_GCM_SHA384"),
    ("TLS_CHACHA20_POLY1305_SHA256", "TLS_CHACHA20_POLY1305_SHA256"),
    ("ECDHE-ECDSA-AES128-GCM-SHA256", "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"),
    ("ECDHE-RSA-AES128-GCM-SHA256", "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"),
    ("ECDHE-ECDSA-AES256-GCM-SHA384", "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"),
    ("ECDHE-RSA-AES256-GCM-SHA384", "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"),
    ("ECDHE-ECDSA-CHACHA20-POLY1305", "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256"),
    ("ECDHE-RSA-CHACHA20-POLY1305", "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256"),
    ("DHE-RSA-AES128-GCM-SHA256", "TLS_DHE_RSA_WITH_AES_128_GCM_SHA256"),
    ("DHE-RSA-AES256-GCM-SHA384", "TLS_DHE_RSA_WITH_AES_256_GCM_SHA384"),
    ("ECDHE-ECDSA-AES128-SHA256", "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256"),
    ("ECDHE-RSA-AES128-SHA256", "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256"),
    ("ECDHE-ECDSA-AES128-SHA", "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA"),
    ("ECDHE-RSA-AES128-SHA", "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA"),
    ("ECDHE-ECDSA-AES256-SHA384", "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384"),
    ("ECDHE-RSA-AES256-SHA384", "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384"),
    ("ECDHE-ECDSA-AES256-SHA", "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA"),
    ("ECDHE-RSA-AES256-SHA", "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA"),
    ("DHE-RSA-AES128-SHA256", "TLS_DHE_RSA_WITH_AES_128_CBC_SHA256"),
    ("DHE-RSA-AES256-SHA256", "TLS_DHE_RSA_WITH_AES_256_CBC_SHA256"),
    ("AES128-GCM-SHA256", "TLS_RSA_WITH_AES_128_GCM_SHA256"),
    ("AES256-GCM-SHA384", "TLS_RSA_WITH_AES_256_GCM_SHA384"),
    ("AES128-SHA256", "TLS_RSA_WITH_AES_128_CBC_SHA256"),
    ("AES256-SHA256", "TLS_RSA_WITH_AES_256_CBC_SHA256"),
    ("AES128-SHA", "TLS_RSA_WITH_AES_128_CBC_SHA"),
    ("AES256-SHA", "TLS_RSA_WITH_AES_256_CBC_SHA"),
    ("DES-CBC3-SHA", "TLS_RSA_WITH_3DES_EDE_CBC_SHA"),
    ("ECDHE-ECDSA-DES-CBC3-SHA", "TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA"),
    ("ECDHE-RSA-DES-CBC3-SHA", "TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA"),
];

/// IANA names of OpenSSL-style cipher names; unknown names are dropped
pub fn to_iana(ciphers: &[String]) -> Vec<String> {
    ciphers
        .iter()
        .filter_map(|c| IANA_NAMES.iter().find(|(openssl, _)| openssl == c))
        .map(|(_, iana)| iana.to_string())
        .collect()
}

/// The profile itself, or an explicit Intermediate profile when unset
///
/// Operand CRs take the whole profile object rather than resolved ciphers.
pub fn effective_profile(profile: Option<&TlsSecurityProfile>) -> TlsSecurityProfile {
    profile.cloned().unwrap_or_else(|| TlsSecurityProfile {
        type_: Some(TlsProfileType::Intermediate),
        intermediate: Some(Default::default()),
        ..Default::default()
    })
}

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
static TLS12_AND_UP: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS12, &rustls::version::TLS13];

/// rustls server configuration honoring `profile`
///
/// rustls implements neither TLS 1.0 nor 1.1, so older minimums start at
/// TLS 1.2. TLS 1.3 suites are not configurable and are offered whenever
/// TLS 1.3 is; TLS 1.2 suites are limited to the profile's ciphers.
pub fn server_config(
    profile: Option<&TlsSecurityProfile>,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, Error> {
    let (ciphers, min_version) = resolve(profile);
    let allowed = to_iana(&ciphers);

    let mut provider = aws_lc_rs::default_provider();
    provider.cipher_suites.retain(|suite| match suite {
        SupportedCipherSuite::Tls13(_) => true,
        SupportedCipherSuite::Tls12(_) => suite
            .suite()
            .as_str()
            .is_some_and(|name| allowed.iter().any(|a| a == name)),
    });
    let versions = if min_version == TlsVersion::Tls13 {
        TLS13_ONLY
    } else {
        TLS12_AND_UP
    };

    let mut config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(versions)
        .map_err(|e| Error::validation(format!("unusable TLS profile: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::startup(format!("invalid serving certificate: {e}")))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Process-wide copy of the HyperConverged TLS profile
///
/// Writers only notify subscribers when the profile actually changes.
#[derive(Debug)]
pub struct TlsProfileCache {
    profile: watch::Sender<Option<TlsSecurityProfile>>,
}

impl Default for TlsProfileCache {
    fn default() -> Self {
        Self {
            profile: watch::Sender::new(None),
        }
    }
}

impl TlsProfileCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached profile
    pub fn set(&self, profile: Option<TlsSecurityProfile>) {
        self.profile.send_if_modified(|current| {
            if *current == profile {
                return false;
            }
            *current = profile;
            true
        });
    }

    /// Forget the cached profile
    pub fn clear(&self) {
        self.set(None);
    }

    /// Copy of the cached profile
    pub fn get(&self) -> Option<TlsSecurityProfile> {
        self.profile.borrow().clone()
    }

    /// Receiver woken on every change of the profile
    pub fn subscribe(&self) -> watch::Receiver<Option<TlsSecurityProfile>> {
        self.profile.subscribe()
    }

    /// Effective cipher names
    pub fn cipher_suites(&self) -> Vec<String> {
        resolve(self.profile.borrow().as_ref()).0
    }

    /// Effective minimal version
    pub fn min_version(&self) -> TlsVersion {
        resolve(self.profile.borrow().as_ref()).1
    }
}
