use std::time::Duration;
use std::{env, fs};

use waypoint_auth::policy::Requirement;
use waypoint_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("waypoint.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 4096

[logging]
level = "debug"

[auth]
issuer = "http://issuer.test:9000"

[auth.signing]
algorithm = "ES384"
rotation_interval = "1h"

[auth.tokens]
access_token_ttl = "2m"
reuse_refresh_tokens = false

[[auth.policy.rules]]
methods = ["GET"]
path = "/health/**"
require = "permit_all"

[[auth.policy.rules]]
path = "/customers/**"
require = { any_of = ["backend.read"] }

[auth.client.registrations.backend]
client_id = "test-client"
client_secret = "test-secret"
scopes = ["backend.read"]
base_url = "http://backend.test:8081"

[[bootstrap.users]]
username = "carol"
password = "secret"
authorities = ["ROLE_USER"]
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.server.body_limit_bytes, 4096);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.auth.issuer_url(), "http://issuer.test:9000");
    assert_eq!(cfg.auth.signing.algorithm, "ES384");
    assert_eq!(
        cfg.auth.signing.rotation_interval,
        Some(Duration::from_secs(3600))
    );
    assert_eq!(cfg.auth.tokens.access_token_ttl, Duration::from_secs(120));
    assert!(!cfg.auth.tokens.reuse_refresh_tokens);
    assert_eq!(cfg.auth.policy.rules.len(), 2);
    assert!(matches!(cfg.auth.policy.rules[0].require, Requirement::PermitAll));
    assert!(matches!(cfg.auth.policy.rules[1].require, Requirement::AnyOf(_)));
    let backend = &cfg.auth.client.registrations["backend"];
    assert_eq!(backend.base_url.as_deref(), Some("http://backend.test:8081"));
    // an explicit user list replaces the demo users
    assert_eq!(cfg.bootstrap.users.len(), 1);
    assert_eq!(cfg.bootstrap.users[0].username, "carol");
    assert!(!cfg.bootstrap.clients.is_empty());
    assert!(!cfg.auth.login.enabled);

    // 2) Env override should win over file
    unsafe {
        env::set_var("WAYPOINT__SERVER__PORT", "9191");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9191);
    unsafe {
        env::remove_var("WAYPOINT__SERVER__PORT");
    }

    // 3) Login without a usable state secret is rejected
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[auth.login]
enabled = true
client_secret = "web-secret"
state_signing_secret = "too-short"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("state_signing_secret"));

    // 4) A resource-only node needs a JWKS location
    let resource_path = dir.path().join("resource.toml");
    fs::write(&resource_path, "[auth]\nauthorization_server = false\n").expect("write toml");
    let err = load_config(resource_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("jwks_uri"));

    // 5) An explicit path that does not exist is an error
    let missing = dir.path().join("missing.toml");
    let err = load_config(missing.to_str()).expect_err("missing file");
    assert!(err.contains("not found"));
}

#[test]
fn defaults_without_a_file() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("waypoint.toml");
    fs::write(&path, "").expect("write toml");

    let cfg = load_config(path.to_str()).expect("empty file uses defaults");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert!(cfg.auth.authorization_server);
    assert_eq!(cfg.auth.token_endpoint(), "http://localhost:9000/oauth2/token");
    assert_eq!(cfg.bootstrap.clients.len(), 2);
    assert_eq!(cfg.bootstrap.users.len(), 3);
}
