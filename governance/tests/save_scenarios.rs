//! Golden fixture tests for full save lifecycles on a temporary workspace.

use pipz_governance::audit::{AuditEvent, AuditResult, Stage};
use pipz_governance::classifier::SkipReason;
use pipz_governance::config::GovernanceConfig;
use pipz_governance::encoding::{self, FileEncoding};
use pipz_governance::{
    FingerprintOutcome, GovernanceEngine, MirrorOutcome, PointerOutcome, SaveEvent, SaveHooks,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;

const CONFIG_AHK: &str = "\
; ------------------------------------------------------------------
; GEMINI MEM TAG (DO NOT EVER REMOVE OR EDIT) - MY FULL PATH IS \"Pipz_Project_V3\\config.ahk\"
; Content-Fingerprint: 2024-01-01T00-00-00Z-AAAAAAAA
; ------------------------------------------------------------------

#Requires AutoHotkey v2.0
Global Delay := 50
";

const COMPENDIUM: &str = "\
# ------------------------------------------------------------------
# GEMINI MEM TAG (DO NOT EVER REMOVE OR EDIT) - MY FULL PATH IS \"Pipz_Project_V3\\Governance\\GOVERNANCE_COMPENDIUM.txt\"
# ------------------------------------------------------------------
Rule 1: every save is stamped.
";

const POINTER: &str = "PROJECT: Pipz\nBUILD_ID: 00000001\nUPDATED_UTC: 2024-01-01T00-00-00Z\n";

fn workspace() -> TempDir {
    let tmp = TempDir::new().expect("temp dir");
    std::fs::create_dir_all(tmp.path().join("Governance")).expect("governance dir");
    std::fs::write(tmp.path().join("Governance/PIPZ_POINTER.txt"), POINTER).expect("pointer");
    tmp
}

fn audit_events(root: &Path) -> Vec<AuditEvent> {
    let dir = root.join(".ORCH_AUDITLOG/mirror");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut names: Vec<_> = entries
        .map(|e| e.expect("dir entry").path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    names.sort();
    names
        .iter()
        .map(|p| serde_json::from_slice(&std::fs::read(p).expect("read audit")).expect("parse audit"))
        .collect()
}

#[tokio::test]
async fn saving_config_ahk_stamps_and_mirrors_without_bump() {
    let tmp = workspace();
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let source = tmp.path().join("config.ahk");
    std::fs::write(&source, CONFIG_AHK).expect("write source");

    let report = engine.save_file(&source).await.expect("save");

    // (a) fingerprint replaced in place
    let FingerprintOutcome::Stamped {
        fingerprint,
        inserted,
    } = &report.fingerprint
    else {
        panic!("expected stamp, got {:?}", report.fingerprint);
    };
    assert!(!inserted);
    let stamped = std::fs::read_to_string(&source).expect("read source");
    assert_eq!(
        stamped,
        CONFIG_AHK.replace("2024-01-01T00-00-00Z-AAAAAAAA", fingerprint)
    );

    // (b) mirror with generated header followed by the stamped source
    let mirror_path = tmp.path().join("config.ahk.txt");
    assert_eq!(
        report.mirror,
        MirrorOutcome::Written {
            destination: mirror_path.clone(),
            encoding: FileEncoding::Utf8,
        }
    );
    let mirror = std::fs::read_to_string(&mirror_path).expect("read mirror");
    let mut lines = mirror.lines();
    assert!(lines.next().is_some_and(|l| l.starts_with("; ----------")));
    assert_eq!(
        lines.next(),
        Some("; AI SOT TEXT FILE (GENERATED, DO NOT EDIT) - MY FULL PATH IS \"Pipz_Project_V3\\config.ahk.txt\"")
    );
    assert!(mirror.ends_with(&stamped));

    // (c) no pointer bump
    assert_eq!(report.pointer, PointerOutcome::NotWatched);
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("Governance/PIPZ_POINTER.txt")).expect("pointer"),
        POINTER
    );

    let events = audit_events(tmp.path());
    let stages: Vec<(Stage, AuditResult)> = events.iter().map(|e| (e.stage, e.result)).collect();
    assert_eq!(stages.len(), 2, "{stages:?}");
    assert!(stages.contains(&(Stage::Fingerprint, AuditResult::Pass)));
    assert!(stages.contains(&(Stage::Mirror, AuditResult::Pass)));
}

#[tokio::test]
async fn saving_compendium_bumps_pointer_without_mirror() {
    let tmp = workspace();
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let source = tmp.path().join("Governance/GOVERNANCE_COMPENDIUM.txt");
    std::fs::write(&source, COMPENDIUM).expect("write source");

    let report = engine.save_file(&source).await.expect("save");

    assert!(matches!(
        report.fingerprint,
        FingerprintOutcome::Stamped { inserted: true, .. }
    ));
    assert_eq!(
        report.mirror,
        MirrorOutcome::Skipped {
            reason: SkipReason::NotTargeted
        }
    );
    assert!(!tmp.path().join("Governance/GOVERNANCE_COMPENDIUM.txt.txt").exists());

    let PointerOutcome::Bumped { build_id, .. } = &report.pointer else {
        panic!("expected bump, got {:?}", report.pointer);
    };
    let build_id = build_id.as_deref().expect("build id");
    assert_eq!(build_id.len(), 8);
    assert!(build_id.bytes().all(|b| b.is_ascii_digit()));

    let registry =
        std::fs::read_to_string(tmp.path().join("Governance/PIPZ_POINTER.txt")).expect("pointer");
    let lines: Vec<&str> = registry.lines().collect();
    assert_eq!(lines[0], "PROJECT: Pipz");
    assert_eq!(lines[1], format!("BUILD_ID: {build_id}"));
    assert!(lines[2].starts_with("UPDATED_UTC: "));
    assert_ne!(lines[2], "UPDATED_UTC: 2024-01-01T00-00-00Z");

    let pointer_events: Vec<_> = audit_events(tmp.path())
        .into_iter()
        .filter(|e| e.stage == Stage::Pointer)
        .collect();
    assert_eq!(pointer_events.len(), 1);
    assert_eq!(pointer_events[0].build_id.as_deref(), Some(build_id));
}

#[tokio::test]
async fn untagged_file_is_left_alone() {
    let tmp = workspace();
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let source = tmp.path().join("settings.ini");
    let text = "; ----------\n; plain header\n; ----------\n[main]\n";
    std::fs::write(&source, text).expect("write source");

    let report = engine.save_file(&source).await.expect("save");
    assert_eq!(
        report.fingerprint,
        FingerprintOutcome::Skipped {
            reason: SkipReason::MissingContentTag
        }
    );
    assert_eq!(
        report.mirror,
        MirrorOutcome::Skipped {
            reason: SkipReason::MissingContentTag
        }
    );
    assert_eq!(std::fs::read_to_string(&source).expect("read"), text);
    assert!(audit_events(tmp.path()).is_empty());
}

#[tokio::test]
async fn tagged_file_without_header_is_fail_closed() {
    let tmp = workspace();
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let source = tmp.path().join("notes.md");
    let text = "# GEMINI MEM TAG - MY FULL PATH IS \"notes.md\"\nbody\n";
    std::fs::write(&source, text).expect("write source");

    let report = engine.save_file(&source).await.expect("save");
    assert_eq!(report.fingerprint, FingerprintOutcome::NoHeader);
    assert_eq!(std::fs::read_to_string(&source).expect("read"), text);
    assert!(audit_events(tmp.path()).is_empty());
}

#[tokio::test]
async fn mirror_is_never_restamped() {
    let tmp = workspace();
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let source = tmp.path().join("config.ahk");
    std::fs::write(&source, CONFIG_AHK).expect("write source");
    engine.save_file(&source).await.expect("save source");

    let mirror_path = tmp.path().join("config.ahk.txt");
    let before = std::fs::read(&mirror_path).expect("read mirror");
    let report = engine.save_file(&mirror_path).await.expect("save mirror");
    assert_eq!(
        report.fingerprint,
        FingerprintOutcome::Skipped {
            reason: SkipReason::GeneratedArtifact
        }
    );
    assert_eq!(std::fs::read(&mirror_path).expect("read mirror"), before);
}

#[tokio::test]
async fn crlf_source_gets_crlf_mirror() {
    let tmp = workspace();
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let source = tmp.path().join("config.ahk");
    let crlf = CONFIG_AHK.replace('\n', "\r\n");
    std::fs::write(&source, encoding::encode(&crlf, FileEncoding::Utf8Bom)).expect("write");

    let report = engine.save_file(&source).await.expect("save");
    assert_eq!(report.encoding, FileEncoding::Utf8Bom);

    let mirror = encoding::decode(&std::fs::read(tmp.path().join("config.ahk.txt")).expect("read"))
        .expect("decode");
    assert_eq!(mirror.encoding, FileEncoding::Utf8Bom);
    assert!(!mirror.text.replace("\r\n", "").contains('\n'));
}

#[tokio::test]
async fn hooks_follow_host_lifecycle() {
    let tmp = workspace();
    let engine = GovernanceEngine::new(tmp.path(), GovernanceConfig::default());
    let path = tmp.path().join("config.ahk");

    let event = SaveEvent::new(path.clone(), CONFIG_AHK);
    let replacement = engine.before_persist(&event).await.expect("replacement");

    // The host persists the replacement, then notifies.
    std::fs::write(&path, &replacement).expect("persist");
    engine.after_persist(&SaveEvent::new(path, replacement.clone())).await;

    let mirror = std::fs::read_to_string(tmp.path().join("config.ahk.txt")).expect("mirror");
    assert!(mirror.ends_with(&replacement));
}

#[tokio::test]
async fn disabled_audit_writes_no_records() {
    let tmp = workspace();
    let mut config = GovernanceConfig::default();
    config.audit.enabled = false;
    let engine = GovernanceEngine::new(tmp.path(), config);
    let source = tmp.path().join("config.ahk");
    std::fs::write(&source, CONFIG_AHK).expect("write source");

    engine.save_file(&source).await.expect("save");
    assert!(!tmp.path().join(".ORCH_AUDITLOG").exists());
}
