//! Unit tests for `AppError` display format and JSON-RPC code mapping.

use widget_relay::AppError;

#[test]
fn transport_error_display_starts_with_transport_prefix() {
    let err = AppError::Transport("session channel closed".into());
    assert_eq!(err.to_string(), "transport: session channel closed");
}

#[test]
fn upstream_error_is_distinct_from_io_error() {
    let upstream = AppError::Upstream("GET failed".into());
    let io = AppError::Io("GET failed".into());
    assert_ne!(upstream.to_string(), io.to_string());
    assert!(upstream.to_string().starts_with("upstream:"));
    assert!(io.to_string().starts_with("io:"));
}

#[test]
fn error_messages_have_no_trailing_period() {
    let errors = [
        AppError::Config("bad port".into()),
        AppError::Validation("name must not be empty".into()),
        AppError::NotFound("session".into()),
    ];
    for err in errors {
        let s = err.to_string();
        assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
    }
}

#[test]
fn rpc_codes_follow_error_kind() {
    assert_eq!(AppError::Transport(String::new()).rpc_code(), -32000);
    assert_eq!(AppError::Validation(String::new()).rpc_code(), -32600);
    assert_eq!(AppError::NotFound(String::new()).rpc_code(), -32001);
    assert_eq!(AppError::Upstream(String::new()).rpc_code(), -32603);
    assert_eq!(AppError::Config(String::new()).rpc_code(), -32603);
}

#[test]
fn toml_errors_convert_to_config_errors() {
    let err = toml::from_str::<toml::Value>("not = [valid").expect_err("invalid toml");
    let app: AppError = err.into();
    assert!(matches!(app, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn io_errors_convert_to_io_errors() {
    let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let app: AppError = err.into();
    assert_eq!(app.to_string(), "io: pipe closed");
}
