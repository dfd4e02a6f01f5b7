use agora::tls::{CERT_FILE, KEY_FILE, not_after};
use agora::{CertificateStatus, Engine, RegenerationReason, Subsystem, ensure_certificates};
use agora_core::{AgoraError, EngineConfig, TlsConfig};
use rcgen::{CertificateParams, KeyPair};

fn tls_in(dir: &std::path::Path) -> TlsConfig {
    TlsConfig {
        dir: dir.join("tls"),
        hostname: "agora.test".into(),
        regenerate_unparseable: false,
    }
}

#[test]
fn missing_pair_is_generated_then_reused() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tls_in(tmp.path());

    let expiry = match ensure_certificates(&cfg).unwrap() {
        CertificateStatus::Generated {
            reason: RegenerationReason::Missing,
            not_after,
        } => not_after,
        other => panic!("expected a fresh pair, got {other:?}"),
    };
    assert!(cfg.dir.join(CERT_FILE).is_file());
    assert!(cfg.dir.join(KEY_FILE).is_file());

    let pem = std::fs::read(cfg.dir.join(CERT_FILE)).unwrap();
    assert_eq!(not_after(&pem).unwrap(), expiry);
    assert_eq!(
        ensure_certificates(&cfg).unwrap(),
        CertificateStatus::Existing { not_after: expiry }
    );
}

#[test]
fn expired_certificate_is_replaced() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tls_in(tmp.path());
    std::fs::create_dir_all(&cfg.dir).unwrap();

    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.not_before = rcgen::date_time_ymd(2019, 1, 1);
    params.not_after = rcgen::date_time_ymd(2020, 1, 1);
    let cert = params.self_signed(&key).unwrap();
    std::fs::write(cfg.dir.join(CERT_FILE), cert.pem()).unwrap();
    std::fs::write(cfg.dir.join(KEY_FILE), key.serialize_pem()).unwrap();

    let status = ensure_certificates(&cfg).unwrap();
    assert!(matches!(
        status,
        CertificateStatus::Generated {
            reason: RegenerationReason::Expired,
            ..
        }
    ));
}

#[test]
fn garbage_certificate_needs_explicit_consent() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tls_in(tmp.path());
    std::fs::create_dir_all(&cfg.dir).unwrap();
    std::fs::write(cfg.dir.join(CERT_FILE), "not a certificate").unwrap();
    std::fs::write(cfg.dir.join(KEY_FILE), "not a key").unwrap();

    let err = ensure_certificates(&cfg).unwrap_err();
    assert!(matches!(err, AgoraError::ConfigInvalid(_)));

    cfg.regenerate_unparseable = true;
    let status = ensure_certificates(&cfg).unwrap();
    assert!(matches!(
        status,
        CertificateStatus::Generated {
            reason: RegenerationReason::Unparseable,
            ..
        }
    ));
}

#[tokio::test]
async fn engine_checks_tls_before_booting() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.tls = Some(tls_in(tmp.path()));
    let engine = Engine::builder().config(config.clone()).build().unwrap();
    assert!(engine.tls_status().is_none());

    engine.start().await.unwrap();
    assert!(matches!(
        engine.tls_status(),
        Some(CertificateStatus::Generated { .. })
    ));
    engine.stop().await.unwrap();

    // an unusable pair stops the boot before any subsystem starts
    std::fs::write(tmp.path().join("tls").join(CERT_FILE), "garbage").unwrap();
    let engine = Engine::builder().config(config).build().unwrap();
    let err = engine.start().await.unwrap_err();
    assert_eq!(err.status_code(), "config-invalid");
    assert!(!engine.dispatch().is_running());
}
