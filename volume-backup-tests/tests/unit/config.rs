//! Configuration loading and validation

use rstest::rstest;
use test_utils::{
    minimal_config_toml, multi_schedule_config_toml, render_template, ConfigBuilder,
    DestinationConfig, ResultAssertions, RetentionPolicy, TestContext,
};
use volume_backup::config::{load_config, parse_config, resolve_destination, ConfigError};

fn render(ctx: &TestContext, template: &str) -> String {
    let logs = ctx.temp_dir().join("logs");
    let locks = ctx.temp_dir().join("locks");
    let backups = ctx.temp_dir().join("backups");
    render_template(
        template,
        &[
            ("log_dir", logs.as_path()),
            ("lock_dir", locks.as_path()),
            ("backup_path", backups.as_path()),
        ],
    )
}

#[test]
fn test_minimal_config_loads() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", &render(&ctx, minimal_config_toml()));

    let config = load_config(&path).assert_ok();
    let nightly = &config.schedules["nightly"];
    assert!(nightly.enabled);
    assert_eq!(nightly.schedule_key, None);
    assert_eq!(nightly.destinations.len(), 1);
    assert_eq!(nightly.destinations[0].retention(), RetentionPolicy::MaxAgeDays(14));
    assert_eq!(config.global.label_prefix, "volume-backup");
}

#[test]
fn test_multi_schedule_config() {
    let ctx = TestContext::new();
    let config = parse_config(&render(&ctx, multi_schedule_config_toml())).assert_ok();

    assert_eq!(config.global.label_prefix, "acme.backup");
    let offsite = &config.schedules["offsite"];
    assert_eq!(offsite.schedule_key.as_deref(), Some("weekly"));

    match &offsite.destinations[0] {
        DestinationConfig::S3(opts) => {
            assert_eq!(opts.bucket.as_deref(), Some("backups"));
            assert_eq!(opts.retention, RetentionPolicy::KeepNewestOnly);
        }
        other => panic!("Expected an S3 destination, got {:?}", other),
    }

    // filesystem destinations keep everything unless told otherwise
    assert_eq!(
        config.schedules["nightly"].destinations[0].retention(),
        RetentionPolicy::MaxAgeDays(0)
    );
}

#[test]
fn test_builder_config_round_trips_through_toml() {
    let builder = ConfigBuilder::minimal()
        .add_schedule("weekly", "0 4 * * 0")
        .with_schedule_key("weekly", "weekly")
        .add_s3_destination("weekly", "offsite", "archive-bucket");
    let ctx = TestContext::from_builder(builder);

    let path = ctx.write_config().assert_ok();
    let loaded = load_config(&path).assert_ok();

    assert_eq!(loaded.schedules.len(), 2);
    assert_eq!(loaded.schedules["weekly"].schedule_key.as_deref(), Some("weekly"));
    assert_eq!(loaded.schedules["weekly"].destinations[0].name(), "offsite");
}

#[rstest]
#[case::bad_cron("0 2 * *", "invalid cron schedule")]
#[case::too_many_fields("0 2 * * * *", "invalid cron schedule")]
fn test_invalid_schedule_rejected(#[case] cron: &str, #[case] expected: &str) {
    let toml = format!(
        r#"
[schedules.nightly]
schedule = "{}"

[[schedules.nightly.destinations]]
type = "filesystem"
name = "local"
host_path = "/srv/backups"
"#,
        cron
    );
    parse_config(&toml).assert_err_contains(expected);
}

#[test]
fn test_schedule_without_destinations_rejected() {
    let toml = r#"
[schedules.nightly]
schedule = "0 2 * * *"
destinations = []
"#;
    parse_config(toml).assert_err_contains("no destinations");
}

#[test]
fn test_duplicate_destination_names_rejected() {
    let toml = r#"
[schedules.a]
schedule = "0 2 * * *"

[[schedules.a.destinations]]
type = "filesystem"
name = "local"
host_path = "/srv/a"

[schedules.b]
schedule = "0 3 * * *"

[[schedules.b.destinations]]
type = "filesystem"
name = "local"
host_path = "/srv/b"
"#;
    parse_config(toml).assert_err_contains("used more than once");
}

#[rstest]
#[case::unknown_type("type = \"ftp\"\nname = \"x\"\nhost_path = \"/srv\"")]
#[case::missing_host_path("type = \"filesystem\"\nname = \"x\"")]
fn test_malformed_destination_is_parse_error(#[case] destination: &str) {
    let toml = format!(
        "[schedules.nightly]\nschedule = \"0 2 * * *\"\n\n[[schedules.nightly.destinations]]\n{}\n",
        destination
    );
    assert!(matches!(parse_config(&toml), Err(ConfigError::ParseError(_))));
}

#[test]
fn test_resolve_destination_requires_choice_when_ambiguous() {
    let ctx = TestContext::new();
    let config = parse_config(&render(&ctx, multi_schedule_config_toml())).assert_ok();

    resolve_destination(&config, None).assert_err_contains("Multiple destinations");
    assert_eq!(resolve_destination(&config, Some("bucket")).assert_ok().name(), "bucket");
    assert!(matches!(
        resolve_destination(&config, Some("nope")),
        Err(ConfigError::DestinationNotFound(_))
    ));
}

#[test]
fn test_resolve_destination_single() {
    let config = ConfigBuilder::minimal().build();
    assert_eq!(resolve_destination(&config, None).assert_ok().name(), "local");
}
