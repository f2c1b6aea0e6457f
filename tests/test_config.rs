use wicket::config::Config;
use wicket::server::pool::PoolSettings;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.name, "localhost");
    assert!(cfg.server.software.starts_with("wicket/"));
    assert!(cfg.http.pipeline);
    assert!(cfg.http.pedantic);
    assert_eq!(cfg.http.max_buffer_size, 100 * 1024 * 1024);
    assert!(!cfg.pool.enabled);
    assert_eq!(cfg.level(), tracing::Level::INFO);
}

#[test]
fn test_config_listen_env_override() {
    // Env mutation stays in one test; tests in a file share the process.
    unsafe {
        std::env::remove_var("WICKET_CONFIG");
        std::env::remove_var("LISTEN");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");

    unsafe {
        std::env::set_var("LISTEN", "0.0.0.0:3000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:3000");

    unsafe {
        std::env::remove_var("LISTEN");
    }
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml_str(
        r#"
server:
  listen_addr: "0.0.0.0:9000"
  name: example.com
http:
  pedantic: false
  max_buffer_size: 4096
pool:
  enabled: true
  minimum: 1
  maximum: 8
log_level: debug
"#,
    )
    .unwrap();

    assert_eq!(cfg.server.listen_addr, "0.0.0.0:9000");
    assert_eq!(cfg.server.name, "example.com");
    assert!(cfg.http.pipeline);
    assert!(!cfg.http.pedantic);
    assert_eq!(cfg.http.max_buffer_size, 4096);
    assert!(cfg.pool.enabled);
    assert_eq!(cfg.pool.divisor, 10);
    assert_eq!(cfg.level(), tracing::Level::DEBUG);

    let settings = PoolSettings::from(&cfg.pool);
    assert_eq!(settings.minimum, 1);
    assert_eq!(settings.maximum, 8);
}

#[test]
fn test_config_empty_document_is_default() {
    let cfg = Config::from_yaml_str("").unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
}

#[test]
fn test_config_rejects_inverted_pool_bounds() {
    let result = Config::from_yaml_str("pool:\n  minimum: 10\n  maximum: 2\n");
    assert!(result.is_err());
}

#[test]
fn test_config_unknown_level_falls_back_to_info() {
    let cfg = Config::from_yaml_str("log_level: chatty\n").unwrap();
    assert_eq!(cfg.level(), tracing::Level::INFO);
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.server.listen_addr, cfg2.server.listen_addr);
}
