//! Pointer registry bump: forced advance, guard contention, resolution.

use chrono::{TimeZone, Utc};
use pipz_governance::config::GovernanceConfig;
use pipz_governance::encoding::{self, FileEncoding};
use pipz_governance::guard::GuardTable;
use pipz_governance::pointer::{self, PointerOutcome};
use pipz_governance::{GovernanceEngine, SaveEvent};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const WATCHED: &str = "\
; ----------
; GEMINI MEM TAG - MY FULL PATH IS \"Pipz_Project_V3\\Core_Utils.txt\"
; ----------
";

fn candidates() -> Vec<String> {
    GovernanceConfig::default().pointer.candidates
}

#[tokio::test]
async fn same_second_forces_advance() {
    let tmp = TempDir::new().expect("temp dir");
    let registry = tmp.path().join("PIPZ_POINTER.txt");
    std::fs::write(&registry, "BUILD_ID: 00000042\r\nUPDATED_UTC: old\r\n").expect("write");

    let now = Utc.timestamp_opt(42, 0).single().expect("time");
    let guard = GuardTable::new("pointer");
    let outcome = pointer::bump_pointer(tmp.path(), &candidates(), &guard, now)
        .await
        .expect("bump");

    assert!(matches!(
        outcome,
        PointerOutcome::Bumped { ref build_id, .. } if build_id.as_deref() == Some("00000043")
    ));
    assert_eq!(
        std::fs::read_to_string(&registry).expect("read"),
        "BUILD_ID: 00000043\r\nUPDATED_UTC: 1970-01-01T00-00-42Z\r\n"
    );
}

#[tokio::test]
async fn differing_prior_takes_fresh_value() {
    let tmp = TempDir::new().expect("temp dir");
    let registry = tmp.path().join("PIPZ_POINTER.txt");
    std::fs::write(&registry, "BUILD_ID: 00000007\n").expect("write");

    let now = Utc.timestamp_opt(1_700_000_042, 0).single().expect("time");
    pointer::bump_pointer(tmp.path(), &candidates(), &GuardTable::new("pointer"), now)
        .await
        .expect("bump");
    assert_eq!(
        std::fs::read_to_string(&registry).expect("read"),
        "BUILD_ID: 00000042\n"
    );
}

#[tokio::test]
async fn contended_registry_mutates_once() {
    let tmp = TempDir::new().expect("temp dir");
    let registry = tmp.path().join("PIPZ_POINTER.txt");
    std::fs::write(&registry, "BUILD_ID: 00000001\n").expect("write");

    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let event = SaveEvent::new(tmp.path().join("Core_Utils.txt"), WATCHED);

    // First trigger is mid read-modify-write.
    let in_flight = engine
        .pointer_guard()
        .try_acquire(pointer::registry_guard_key(&registry))
        .expect("acquire");

    let second = engine.run_pointer(&event).await;
    assert_eq!(second, PointerOutcome::Busy { registry: registry.clone() });
    assert_eq!(
        std::fs::read_to_string(&registry).expect("read"),
        "BUILD_ID: 00000001\n"
    );

    drop(in_flight);
    let third = engine.run_pointer(&event).await;
    assert!(matches!(third, PointerOutcome::Bumped { .. }), "{third:?}");
    assert_ne!(
        std::fs::read_to_string(&registry).expect("read"),
        "BUILD_ID: 00000001\n"
    );
}

#[tokio::test]
async fn missing_registry_is_noop() {
    let tmp = TempDir::new().expect("temp dir");
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let event = SaveEvent::new(tmp.path().join("Core_Utils.txt"), WATCHED);
    assert_eq!(engine.run_pointer(&event).await, PointerOutcome::NoRegistry);
    assert!(!tmp.path().join(".ORCH_AUDITLOG").exists());
}

#[tokio::test]
async fn relative_path_used_without_tag() {
    let tmp = TempDir::new().expect("temp dir");
    std::fs::write(tmp.path().join("PIPZ_POINTER.txt"), "BUILD_ID: 00000001\n").expect("write");
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());

    let event = SaveEvent::new(tmp.path().join("Interop.txt"), "no tag here\n");
    assert!(matches!(
        engine.run_pointer(&event).await,
        PointerOutcome::Bumped { .. }
    ));

    let event = SaveEvent::new(tmp.path().join("lib/Interop.txt"), "no tag here\n");
    assert_eq!(engine.run_pointer(&event).await, PointerOutcome::NotWatched);
}

#[tokio::test]
async fn utf16_registry_round_trips() {
    let tmp = TempDir::new().expect("temp dir");
    let registry = tmp.path().join("PIPZ_POINTER.txt");
    std::fs::write(
        &registry,
        encoding::encode("BUILD_ID: 00000001\r\n", FileEncoding::Utf16Le),
    )
    .expect("write");

    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let outcome = engine.bump_now().await;
    assert!(
        matches!(outcome, PointerOutcome::Bumped { encoding: FileEncoding::Utf16Le, .. }),
        "{outcome:?}"
    );
    let decoded = encoding::decode(&std::fs::read(&registry).expect("read")).expect("decode");
    assert_eq!(decoded.encoding, FileEncoding::Utf16Le);
    assert!(decoded.text.starts_with("BUILD_ID: "));
    assert!(decoded.text.ends_with("\r\n"));
}

#[tokio::test]
async fn unreadable_registry_records_failure() {
    let tmp = TempDir::new().expect("temp dir");
    // Odd-length UTF-16 payload cannot be decoded.
    std::fs::write(tmp.path().join("PIPZ_POINTER.txt"), [0xFF, 0xFE, 0x41]).expect("write");
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());

    let outcome = engine.bump_now().await;
    assert!(matches!(outcome, PointerOutcome::Failed { .. }), "{outcome:?}");
    let records = std::fs::read_dir(tmp.path().join(".ORCH_AUDITLOG/mirror"))
        .expect("audit dir")
        .count();
    assert_eq!(records, 1);
}
