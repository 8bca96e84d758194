use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_use_loading_class_and_allow_reentry() {
    let settings = Settings::default();
    assert_eq!(settings.busy_class, "loading");
    assert_eq!(settings.reentry, ReentryPolicy::Allow);
    assert!(!settings.emit_error_event);
    assert_eq!(settings.timeout(), None);
}

#[test]
fn env_overrides_replace_file_values() {
    let mut settings = Settings {
        busy_class: "spinning".into(),
        ..Settings::default()
    };
    apply_overrides(
        &mut settings,
        lookup_from(&[
            ("FORM_SUBMIT__BASE_URL", "http://localhost:5173"),
            ("FORM_SUBMIT__BUSY_CLASS", "is-busy"),
            ("FORM_SUBMIT__REENTRY", "disable-submitter"),
            ("FORM_SUBMIT__EMIT_ERROR_EVENT", "true"),
            ("FORM_SUBMIT__TIMEOUT_MS", "2500"),
        ]),
    )
    .expect("overrides");

    assert_eq!(settings.base_url.as_deref(), Some("http://localhost:5173"));
    assert_eq!(settings.busy_class, "is-busy");
    assert_eq!(settings.reentry, ReentryPolicy::DisableSubmitter);
    assert!(settings.emit_error_event);
    assert_eq!(settings.timeout(), Some(Duration::from_millis(2500)));
}

#[test]
fn rejects_unknown_reentry_policy() {
    let mut settings = Settings::default();
    let err = apply_overrides(&mut settings, lookup_from(&[("FORM_SUBMIT__REENTRY", "queue")]))
        .expect_err("unknown policy");
    assert!(format!("{err:#}").contains("unknown reentry policy"));
}

#[test]
fn reads_toml_settings_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("form_submit_settings_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");
    let path = temp_root.join("form_submit.toml");
    fs::write(
        &path,
        "base_url = \"https://example.test/app/\"\nreentry = \"skip-while-in-flight\"\n",
    )
    .expect("write settings");

    let settings = read_settings_file(&path).expect("parse settings");
    assert_eq!(settings.base_url.as_deref(), Some("https://example.test/app/"));
    assert_eq!(settings.reentry, ReentryPolicy::SkipWhileInFlight);
    assert_eq!(settings.busy_class, "loading");

    let config = settings.controller_config().expect("controller config");
    assert_eq!(
        config.base_url.map(String::from).as_deref(),
        Some("https://example.test/app/")
    );

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn explicit_missing_settings_file_is_an_error() {
    let err = load_settings_from(Some(Path::new("/nonexistent/form_submit.toml")))
        .expect_err("missing file");
    assert!(format!("{err:#}").contains("failed to read settings file"));
}

#[test]
fn invalid_base_url_is_reported() {
    let settings = Settings {
        base_url: Some("not a url".into()),
        ..Settings::default()
    };
    assert!(settings.controller_config().is_err());
}
