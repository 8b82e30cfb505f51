mod common;

use figment::Jail;
use hostloop::{Backend, ConfigError, LoopBuilder, LoopConfig, LoopError};

#[test]
fn test_defaults() {
    let config = LoopBuilder::new().config().unwrap();
    assert_eq!(config, LoopConfig::default());
}

#[test]
fn test_env_overrides_defaults() {
    Jail::expect_with(|jail| {
        jail.set_env("HOSTLOOP_MAX_WORKERS", "4");
        jail.set_env("HOSTLOOP_DEBUG", "true");
        jail.set_env("HOSTLOOP_THREAD_NAME_PREFIX", "app");

        let config = LoopBuilder::new().from_env().config().unwrap();
        assert_eq!(config.max_workers, 4);
        assert!(config.debug);
        assert_eq!(config.thread_name_prefix, "app");
        assert_eq!(config.proactor_poll_ms, 10);
        Ok(())
    });
}

#[test]
fn test_file_then_env_then_overrides() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "hostloop.toml",
            r#"
                max_workers = 2
                proactor_poll_ms = 25
                thread_name_prefix = "from-file"
            "#,
        )?;
        jail.set_env("HOSTLOOP_PROACTOR_POLL_MS", "50");

        let config = LoopBuilder::new()
            .file("hostloop.toml")
            .from_env()
            .max_workers(8)
            .config()
            .unwrap();

        assert_eq!(config.max_workers, 8);
        assert_eq!(config.proactor_poll_ms, 50);
        assert_eq!(config.thread_name_prefix, "from-file");
        Ok(())
    });
}

#[test]
fn test_json_file() {
    Jail::expect_with(|jail| {
        jail.create_file("hostloop.json", r#"{ "debug": true, "max_workers": 3 }"#)?;

        let config = LoopBuilder::new().file("hostloop.json").config().unwrap();
        assert!(config.debug);
        assert_eq!(config.max_workers, 3);
        Ok(())
    });
}

#[test]
fn test_custom_env_prefix() {
    Jail::expect_with(|jail| {
        jail.set_env("MYAPP_MAX_WORKERS", "6");

        let config = LoopBuilder::new().env_prefix("MYAPP_").config().unwrap();
        assert_eq!(config.max_workers, 6);
        Ok(())
    });
}

#[test]
fn test_unknown_backend_is_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file("hostloop.toml", r#"backend = "qt""#)?;

        let builder = LoopBuilder::new().file("hostloop.toml");
        assert!(matches!(builder.config(), Err(ConfigError::Figment(_))));
        assert!(matches!(builder.build(), Err(LoopError::Config(_))));
        Ok(())
    });
}

#[cfg(unix)]
#[test]
fn test_build_applies_config() {
    common::init_tracing();

    let event_loop = LoopBuilder::new()
        .backend(Backend::Poll)
        .debug(true)
        .max_workers(2)
        .build()
        .unwrap();

    assert!(event_loop.get_debug());
    assert_eq!(event_loop.config().max_workers, 2);
    assert_eq!(event_loop.config().backend, Backend::Poll);
    assert_eq!(event_loop.run_until_complete(async { 5 }).unwrap(), 5);
    event_loop.close().unwrap();
}

#[cfg(unix)]
#[test]
fn test_build_already_running_attaches() {
    common::init_tracing();

    let event_loop = LoopBuilder::new()
        .host(common::new_host())
        .already_running(true)
        .build()
        .unwrap();

    assert!(event_loop.is_running());
    event_loop.stop();
    assert!(!event_loop.is_running());
    event_loop.close().unwrap();
}
