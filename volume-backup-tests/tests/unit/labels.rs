//! Label parsing and volume selection

use rstest::rstest;
use test_utils::{labelled_workload, with_label, workload, Mount, LABEL_PREFIX};
use volume_backup::labels::{is_backup_eligible, select_volumes, BackupLabels, LabelKeys};

fn keys() -> LabelKeys {
    LabelKeys::new(LABEL_PREFIX)
}

#[rstest]
#[case("true", true)]
#[case("false", false)]
#[case("TRUE", false)]
#[case("yes", false)]
#[case("", false)]
fn test_enabled_label_must_be_exactly_true(#[case] value: &str, #[case] eligible: bool) {
    let w = workload(
        "app",
        &[(format!("{}.enabled", LABEL_PREFIX), value.to_string())],
        vec![Mount::volume("data", "/data")],
    );
    assert_eq!(is_backup_eligible(&w, &keys()), eligible);
}

#[test]
fn test_unlabelled_workload_not_eligible() {
    let w = workload("app", &[], vec![Mount::volume("data", "/data")]);
    assert!(!is_backup_eligible(&w, &keys()));
}

#[test]
fn test_label_prefix_is_configurable() {
    let w = workload(
        "app",
        &[("acme.backup.enabled".to_string(), "true".to_string())],
        vec![],
    );
    assert!(is_backup_eligible(&w, &LabelKeys::new("acme.backup")));
    assert!(!is_backup_eligible(&w, &keys()));
}

#[test]
fn test_all_named_volumes_selected_by_default() {
    let mut w = labelled_workload("app", &["db", "cache"]);
    w.mounts.push(Mount::bind("/srv/config", "/config"));

    let names: Vec<String> = select_volumes(&w, &keys()).into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["db", "cache"]);
}

#[rstest]
#[case::single("db", vec!["db"])]
#[case::spaces(" db , cache ", vec!["db", "cache"])]
#[case::unknown_names_ignored("db,missing", vec!["db"])]
#[case::empty_means_all("", vec!["db", "cache", "logs"])]
#[case::separators_only(" , ,", vec!["db", "cache", "logs"])]
fn test_volume_list_label(#[case] list: &str, #[case] expected: Vec<&str>) {
    let w = with_label(labelled_workload("app", &["db", "cache", "logs"]), "volumes", list);

    let names: Vec<String> = select_volumes(&w, &keys()).into_iter().map(|m| m.name).collect();
    assert_eq!(names, expected);
}

#[test]
fn test_bind_mount_never_selected_even_if_listed() {
    let mut w = with_label(labelled_workload("app", &["db"]), "volumes", "db,/srv/config");
    w.mounts.push(Mount::bind("/srv/config", "/config"));

    let selected = select_volumes(&w, &keys());
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].name, "db");
}

#[test]
fn test_schedule_key_parsed() {
    let w = with_label(labelled_workload("app", &["db"]), "schedule", " weekly ");
    let labels = BackupLabels::from_labels(&w.labels, &keys());
    assert_eq!(labels.schedule_key.as_deref(), Some("weekly"));
}

#[test]
fn test_discovery_filters_include_schedule_key() {
    let filters = keys().discovery_filters(Some("weekly"));
    assert!(filters.contains(&(format!("{}.enabled", LABEL_PREFIX), "true".to_string())));
    assert!(filters.contains(&(format!("{}.schedule", LABEL_PREFIX), "weekly".to_string())));

    assert_eq!(keys().discovery_filters(None).len(), 1);
}
