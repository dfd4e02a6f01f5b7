use std::io::Write;
use std::time::Duration;

use agora::Subsystem;
use agora_core::AgoraError;
use zip::write::SimpleFileOptions;

use crate::pool_in;

fn bundle(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn offenders(err: AgoraError) -> Vec<String> {
    match err {
        AgoraError::ScriptValidation { mut offenders } => {
            offenders.sort();
            offenders
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn plain_upload_keeps_history_on_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = pool_in(dir.path(), 1, Duration::from_secs(5));

    let stored = pool.upload("tick.gct", b"print one", false, false).await.unwrap();
    assert_eq!(stored, dir.path().join("tick.gct"));
    assert_eq!(pool.read("tick.gct").await.unwrap(), b"print one");

    let err = pool.upload("tick.gct", b"print two", false, false).await.unwrap_err();
    assert!(matches!(err, AgoraError::InvalidArg(_)));
    assert_eq!(pool.read("tick.gct").await.unwrap(), b"print one");

    pool.upload("tick.gct", b"print two", false, true).await.unwrap();
    assert_eq!(pool.read("tick.gct").await.unwrap(), b"print two");
    let history: Vec<_> = std::fs::read_dir(dir.path().join("version_history"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(history.len(), 1);
    assert!(history[0].ends_with("-tick.gct"));
}

#[tokio::test]
async fn plain_upload_rejects_bad_names_and_sources() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = pool_in(dir.path(), 1, Duration::from_secs(5));

    let err = pool.upload("bad.gct", b"explode", false, false).await.unwrap_err();
    assert_eq!(offenders(err), vec!["bad.gct"]);
    assert!(!dir.path().join("bad.gct").exists());

    for name in ["../up.gct", "", "notes.txt"] {
        let err = pool.upload(name, b"print ok", false, false).await.unwrap_err();
        assert!(matches!(err, AgoraError::InvalidArg(_)), "{name}");
    }
    assert!(matches!(
        pool.read("missing.gct").await,
        Err(AgoraError::NotFound { .. })
    ));
}

#[tokio::test]
async fn bundle_extracts_into_its_own_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = pool_in(dir.path(), 1, Duration::from_secs(5));
    let zip = bundle(&[("main.gct", "print main"), ("lib/helper.gct", "print helper")]);

    let target = pool.upload("strategy.zip", &zip, true, false).await.unwrap();
    assert_eq!(target, dir.path().join("strategy"));
    assert!(target.join("lib/helper.gct").is_file());

    // an extracted script loads like any other
    pool.start().await.unwrap();
    let id = pool.load("strategy/main.gct").await.unwrap();
    pool.compile_and_run(id).await.unwrap();
    let log = std::fs::read_to_string(dir.path().join("output/main.log")).unwrap();
    assert_eq!(log, "main\n");

    let err = pool.upload("strategy.zip", &zip, true, false).await.unwrap_err();
    assert!(matches!(err, AgoraError::InvalidArg(_)));
    pool.upload("strategy.zip", &zip, true, true).await.unwrap();
    assert!(dir.path().join("strategy/main.gct").is_file());
}

#[tokio::test]
async fn bundle_with_offenders_is_removed_whole() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = pool_in(dir.path(), 1, Duration::from_secs(5));
    let zip = bundle(&[
        ("ok.gct", "print ok"),
        ("broken.gct", "explode"),
        ("docs/readme.txt", "hello"),
    ]);

    let err = pool.upload("mixed.zip", &zip, true, false).await.unwrap_err();
    assert_eq!(offenders(err), vec!["broken.gct", "docs/readme.txt"]);
    assert!(!dir.path().join("mixed").exists());
}

#[tokio::test]
async fn bundle_entries_cannot_escape_the_script_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = pool_in(dir.path(), 1, Duration::from_secs(5));
    let zip = bundle(&[("fine.gct", "print ok"), ("../escape.gct", "print gotcha")]);

    let err = pool.upload("sneaky.zip", &zip, true, false).await.unwrap_err();
    assert!(matches!(err, AgoraError::InvalidArg(_)));
    assert!(!dir.path().join("escape.gct").exists());
    assert!(!dir.path().join("sneaky").exists());

    let err = pool.upload("output.zip", &bundle(&[("a.gct", "print a")]), true, false).await;
    assert!(matches!(err, Err(AgoraError::InvalidArg(_))));
}
