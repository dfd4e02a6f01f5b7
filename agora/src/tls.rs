//! Self-signed TLS material for the RPC layer.
//!
//! `cert.pem` and `key.pem` live under [`TlsConfig::dir`]. Certificates are
//! ECDSA P-256, valid for 365 days, with the configured hostname and
//! `localhost` as DNS names plus both loopback addresses.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use chrono::{Datelike, TimeDelta};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256, SanType,
};

use agora_core::{AgoraError, DateTime, TlsConfig, Utc};

/// Certificate file name.
pub const CERT_FILE: &str = "cert.pem";
/// Private key file name.
pub const KEY_FILE: &str = "key.pem";

const LIFETIME_DAYS: i64 = 365;

/// Why a new pair was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationReason {
    /// One of the files was absent.
    Missing,
    /// The certificate had expired.
    Expired,
    /// The certificate did not parse and regeneration was allowed.
    Unparseable,
}

/// Outcome of [`ensure_certificates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    /// The existing pair is usable.
    Existing {
        /// Expiry of the existing certificate.
        not_after: DateTime<Utc>,
    },
    /// A new pair was written.
    Generated {
        /// Why.
        reason: RegenerationReason,
        /// Expiry of the new certificate.
        not_after: DateTime<Utc>,
    },
}

fn tls_err(e: &rcgen::Error) -> AgoraError {
    AgoraError::Internal(format!("certificate generation: {e}"))
}

fn io(what: &str, path: &Path, e: &std::io::Error) -> AgoraError {
    AgoraError::Io(format!("{what} {}: {e}", path.display()))
}

/// Paths of the certificate and key under `dir`.
#[must_use]
pub fn paths(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(CERT_FILE), dir.join(KEY_FILE))
}

/// Make sure a usable pair exists, generating one when needed.
///
/// Missing or expired material is regenerated. An unparseable certificate is
/// rejected with `config-invalid` unless `regenerate_unparseable` is set.
pub fn ensure_certificates(config: &TlsConfig) -> Result<CertificateStatus, AgoraError> {
    let (cert_path, key_path) = paths(&config.dir);
    if !cert_path.exists() || !key_path.exists() {
        return regenerate(config, RegenerationReason::Missing);
    }
    let pem = std::fs::read(&cert_path).map_err(|e| io("read", &cert_path, &e))?;
    match not_after(&pem) {
        Ok(expiry) if expiry <= Utc::now() => {
            #[cfg(feature = "tracing")]
            tracing::warn!(%expiry, "tls certificate expired; regenerating");
            regenerate(config, RegenerationReason::Expired)
        }
        Ok(expiry) => Ok(CertificateStatus::Existing { not_after: expiry }),
        Err(_) if config.regenerate_unparseable => {
            regenerate(config, RegenerationReason::Unparseable)
        }
        Err(e) => Err(AgoraError::ConfigInvalid(format!(
            "{}: {e}",
            cert_path.display()
        ))),
    }
}

/// Expiry of the first certificate in `pem`.
pub fn not_after(pem: &[u8]) -> Result<DateTime<Utc>, String> {
    let (_, block) = x509_parser::pem::parse_x509_pem(pem).map_err(|e| e.to_string())?;
    let cert = block.parse_x509().map_err(|e| e.to_string())?;
    let ts = cert.validity().not_after.timestamp();
    DateTime::<Utc>::from_timestamp(ts, 0).ok_or_else(|| format!("expiry {ts} out of range"))
}

fn regenerate(
    config: &TlsConfig,
    reason: RegenerationReason,
) -> Result<CertificateStatus, AgoraError> {
    std::fs::create_dir_all(&config.dir).map_err(|e| io("create", &config.dir, &e))?;
    let (cert_pem, key_pem, expiry) = generate(&config.hostname)?;
    let (cert_path, key_path) = paths(&config.dir);
    std::fs::write(&cert_path, cert_pem).map_err(|e| io("write", &cert_path, &e))?;
    std::fs::write(&key_path, key_pem).map_err(|e| io("write", &key_path, &e))?;
    #[cfg(feature = "tracing")]
    tracing::info!(?reason, dir = %config.dir.display(), "tls certificate generated");
    Ok(CertificateStatus::Generated {
        reason,
        not_after: expiry,
    })
}

/// Self-signed certificate and key PEMs for `hostname`, plus the expiry.
pub fn generate(hostname: &str) -> Result<(String, String, DateTime<Utc>), AgoraError> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|e| tls_err(&e))?;

    let mut names = vec!["localhost".to_string()];
    if !hostname.is_empty() && hostname != "localhost" {
        names.insert(0, hostname.to_string());
    }
    let mut params = CertificateParams::new(names).map_err(|e| tls_err(&e))?;
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)));

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "agora");
    dn.push(DnType::CommonName, hostname);
    params.distinguished_name = dn;

    let now = Utc::now();
    let start = now - TimeDelta::days(1);
    let end = now + TimeDelta::days(LIFETIME_DAYS);
    params.not_before = rcgen::date_time_ymd(start.year(), month(start), day(start));
    params.not_after = rcgen::date_time_ymd(end.year(), month(end), day(end));

    let cert = params.self_signed(&key).map_err(|e| tls_err(&e))?;
    let expiry = end
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map_or(end, |d| d.and_utc());
    Ok((cert.pem(), key.serialize_pem(), expiry))
}

#[allow(clippy::cast_possible_truncation)]
fn month(t: DateTime<Utc>) -> u8 {
    t.month() as u8
}

#[allow(clippy::cast_possible_truncation)]
fn day(t: DateTime<Utc>) -> u8 {
    t.day() as u8
}
