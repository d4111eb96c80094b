//! End-to-end scenario 4 (spec.md §8): doc-only changes stay on the
//! configured default preset; a code change escalates to `standard` with
//! an escalation reason naming the changed file.

use edison_core::core::assets;
use edison_core::validation_policy::resolve_policy;

fn cfg() -> edison_core::core::value::Value {
    assets::read_embedded_yaml("config/defaults.yaml").unwrap()
}

#[test]
fn doc_only_changes_resolve_to_quick_with_no_escalation() {
    let cfg = cfg();
    let policy = resolve_policy(&cfg, None, &["README.md".to_string()]).unwrap();
    assert_eq!(policy.preset.id, "quick");
    assert!(policy.escalated_from.is_none());
    assert!(policy.escalation_reason.is_none());
}

#[test]
fn a_single_code_change_escalates_to_standard_with_a_named_reason() {
    let cfg = cfg();
    let policy = resolve_policy(&cfg, None, &["src/module.rs".to_string()]).unwrap();
    assert_eq!(policy.preset.id, "standard");
    assert_eq!(policy.escalated_from.as_deref(), Some("quick"));
    let reason = policy.escalation_reason.expect("escalation must carry a reason");
    assert!(reason.starts_with("Escalated from quick to standard due to"));
    assert!(reason.contains("code changes: src/module.rs"));
}

#[test]
fn mixed_code_and_config_changes_list_up_to_three_examples_per_category() {
    let cfg = cfg();
    let files = vec![
        "src/a.rs".to_string(),
        "src/b.rs".to_string(),
        "src/c.rs".to_string(),
        "src/d.rs".to_string(),
        "Cargo.toml".to_string(),
    ];
    let policy = resolve_policy(&cfg, None, &files).unwrap();
    assert_eq!(policy.preset.id, "standard");
    let reason = policy.escalation_reason.unwrap();
    assert!(reason.contains("code changes: src/a.rs, src/b.rs, src/c.rs"));
    assert!(!reason.contains("src/d.rs"), "only the first three examples are listed");
    assert!(reason.contains("config changes: Cargo.toml"));
}

#[test]
fn explicit_preset_id_bypasses_inference_entirely() {
    let cfg = cfg();
    let policy = resolve_policy(&cfg, Some("thorough"), &["README.md".to_string()]).unwrap();
    assert_eq!(policy.preset.id, "thorough");
    assert!(policy.escalated_from.is_none());
}
