//! 통합 테스트 -- 설정 → 규칙 파일 → 엔진 빌드 → 훅 동작

use std::io::Write;
use std::sync::Arc;

use portwatch_core::config::PortwatchConfig;
use portwatch_core::pipeline::Pipeline;
use portwatch_engine::portwatch_ebpf_common::Verdict;
use portwatch_engine::{
    EngineConfig, EngineMode, Frame, FrameEngine, FrameHook, NoopDiagnostics, PortRule,
};

fn tcp_frame(src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut frame = vec![0u8; 54];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    frame[14] = 0x45;
    frame[23] = 6;
    frame[34..36].copy_from_slice(&src_port.to_be_bytes());
    frame[36..38].copy_from_slice(&dst_port.to_be_bytes());
    frame
}

fn engine_config(toml: &str) -> EngineConfig {
    let config = PortwatchConfig::parse(toml).unwrap();
    EngineConfig::from_core(&config)
}

#[tokio::test]
async fn rules_file_extends_watched_ports() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[rules]]
id = "dns"
ports = [53]

[[rules]]
id = "http-alt"
ports = [8000, 8080]
description = "alt http"
"#
    )
    .unwrap();

    let mut config = engine_config("[filter]\nports = [443]\n");
    for rule in EngineConfig::load_rules(file.path()).await.unwrap() {
        config.add_rule(rule);
    }

    let (engine, _consumer) = FrameEngine::builder().config(config).build().unwrap();
    let ports: Vec<u16> = engine.filter_rule().ports().collect();
    assert_eq!(ports, vec![53, 443, 8000, 8080]);
}

#[tokio::test]
async fn missing_rules_file_yields_no_rules() {
    let dir = tempfile::tempdir().unwrap();
    let rules = EngineConfig::load_rules(dir.path().join("absent.toml"))
        .await
        .unwrap();
    assert!(rules.is_empty());
}

#[tokio::test]
async fn invalid_rules_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[[rules]]\nid = \"zero\"\nports = [0]\n").unwrap();
    assert!(EngineConfig::load_rules(file.path()).await.is_err());
}

#[test]
fn enforce_mode_hook_filters_traffic() {
    let mut config = engine_config("[engine]\nmode = \"enforce\"\n");
    config.add_rule(PortRule {
        id: "ssh".to_owned(),
        ports: vec![22],
        description: String::new(),
    });

    let (engine, _consumer) = FrameEngine::builder()
        .config(config)
        .diagnostics(Arc::new(NoopDiagnostics))
        .build()
        .unwrap();
    assert_eq!(engine.mode(), EngineMode::Enforce);

    let hook = engine.hook();
    assert_eq!(handle(&*hook, 50000, 22), Verdict::Accept);
    assert_eq!(handle(&*hook, 50000, 8000), Verdict::Accept);
    assert_eq!(handle(&*hook, 50000, 80), Verdict::Reject);

    let stats = engine.stats();
    assert_eq!(stats.matched, 2);
    assert_eq!(stats.no_match, 1);
}

#[tokio::test]
async fn capture_mode_hook_feeds_consumer() {
    let config = engine_config("[capture]\nring_buffer_size = 4096\nmax_capture = 20\n");
    let (engine, mut consumer) = FrameEngine::builder()
        .config(config)
        .diagnostics(Arc::new(NoopDiagnostics))
        .build()
        .unwrap();

    let hook = engine.hook();
    assert_eq!(handle(&*hook, 8000, 40000), Verdict::Accept);
    assert_eq!(handle(&*hook, 40000, 80), Verdict::Accept);

    let event = consumer.recv().await.unwrap();
    assert_eq!(event.length(), 54);
    assert_eq!(event.payload().len(), 20);
    assert!(consumer.try_recv().is_none());
    assert_eq!(engine.stats().captured, 1);
}

#[tokio::test]
async fn start_without_kernel_object_fails_and_stays_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.base.program_path = dir
        .path()
        .join("missing.o")
        .to_string_lossy()
        .into_owned();

    let (mut engine, _consumer) = FrameEngine::builder().config(config).build().unwrap();
    assert!(engine.start().await.is_err());
    assert!(!engine.is_running());
    assert!(engine.health_check().await.is_unhealthy());
}

fn handle(hook: &dyn FrameHook, src_port: u16, dst_port: u16) -> Verdict {
    let data = tcp_frame(src_port, dst_port);
    hook.handle(&Frame::new(&data))
}
