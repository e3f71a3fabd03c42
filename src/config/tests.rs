use super::*;

#[test]
fn defaults_resolve_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.limits.max_body_bytes.get(), DEFAULT_MAX_BODY_BYTES);
    assert_eq!(settings.render.delimiter_start, "%%");
    assert_eq!(settings.render.delimiter_end, "%%");
    assert!(settings.render.paragraph_loop);
    assert!(settings.render.linebreaks);
    assert!(!settings.render.expressions);
    assert_eq!(settings.render.timeout, Duration::from_secs(30));
    assert!(settings.auth.api_key.is_none());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn legacy_env_fills_unset_keys() {
    let mut raw = RawSettings::default();
    raw.apply_legacy_env(Some("8080".to_string()), Some("s3cret".to_string()));

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.server.addr.port(), 8080);
    assert_eq!(settings.auth.api_key.as_deref(), Some("s3cret"));
}

#[test]
fn legacy_env_never_overrides_explicit_settings() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(9000);
    raw.auth.api_key = Some("configured".to_string());

    raw.apply_legacy_env(Some("8080".to_string()), Some("legacy".to_string()));

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.server.addr.port(), 9000);
    assert_eq!(settings.auth.api_key.as_deref(), Some("configured"));
}

#[test]
fn blank_api_key_disables_authentication() {
    let mut raw = RawSettings::default();
    raw.auth.api_key = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.auth.api_key.is_none());
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loudest".to_string());

    let error = Settings::from_raw(raw).expect_err("invalid level");
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

#[test]
fn empty_delimiter_is_rejected() {
    let mut raw = RawSettings::default();
    raw.render.delimiter_start = Some(String::new());

    let error = Settings::from_raw(raw).expect_err("empty delimiter");
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "render.delimiter_start",
            ..
        }
    ));
}

#[test]
fn zero_render_timeout_is_rejected() {
    let mut raw = RawSettings::default();
    raw.render.timeout_seconds = Some(0);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "stampo",
        "--server-host",
        "127.0.0.1",
        "--server-port",
        "4100",
        "--render-expressions",
        "true",
    ]);

    assert_eq!(args.overrides.server_host.as_deref(), Some("127.0.0.1"));
    assert_eq!(args.overrides.server_port, Some(4100));
    assert_eq!(args.overrides.render_expressions, Some(true));
}
