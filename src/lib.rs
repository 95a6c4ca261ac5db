pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod mcp;
pub mod perception;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::engine::AgentEngine;
use crate::agent_engine::history::default_history_dir;
use crate::agent_engine::state::LoopConfig;
use crate::config::{AppConfig, ServiceMode};
use crate::errors::{PilotError, PilotResult};
use crate::executor::service::ControlService;
use crate::llm::reasoning::ProviderBackend;
use crate::llm::registry::ProviderRegistry;
use crate::mcp::client::McpClient;
use crate::mcp::stdio_transport::StdioTransport;
use crate::perception::omniparser::OmniParserDetector;
use crate::perception::service::VisionService;
use crate::tools::gateway::{ProtocolGateway, ToolExecutor};
use crate::tools::registry::ToolRegistry;
use crate::tools::types::ServiceKind;

/// Install the global subscriber. `RUST_LOG` wins over `default_directive`.
/// Tool servers pass `to_stderr` because stdout carries protocol frames.
pub fn init_tracing(default_directive: &str, to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if to_stderr {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Load `.env` if present.
pub fn load_env() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), ".env loaded");
    }
}

/// Vision service backed by the real screen and the configured detectors.
pub fn vision_service(config: &AppConfig) -> PilotResult<VisionService> {
    let vision = &config.vision;
    let detect_timeout = Duration::from_secs(vision.detect_timeout_secs);
    let mut service = VisionService::new(screen_source()?)
        .with_timeouts(Duration::from_secs(vision.capture_timeout_secs), detect_timeout)
        .with_image_attachments(config.agent.attach_screenshots, vision.jpeg_quality);

    if let Some(url) = &vision.omniparser_url {
        let detector = OmniParserDetector::new(url, vision.jpeg_quality, detect_timeout)?
            .with_box_units(vision.omniparser_box_units);
        service = service.with_detector(Arc::new(detector));
    }
    if let Some(path) = &vision.yolo_model_path {
        service = with_yolo(service, config, path)?;
    }
    #[cfg(windows)]
    {
        service = service.with_ui_tree(Arc::new(perception::ui_automation::UiAutomationTree));
    }
    if service.models().is_empty() {
        tracing::warn!("no detector configured; detect_elements will report errors");
    }
    Ok(service)
}

#[cfg(feature = "desktop")]
fn screen_source() -> PilotResult<Arc<dyn perception::traits::ScreenSource>> {
    Ok(Arc::new(perception::screenshot::PrimaryMonitor))
}

#[cfg(not(feature = "desktop"))]
fn screen_source() -> PilotResult<Arc<dyn perception::traits::ScreenSource>> {
    Err(PilotError::Config(
        "screen capture needs a build with the `desktop` feature".into(),
    ))
}

#[cfg(feature = "onnx")]
fn with_yolo(service: VisionService, config: &AppConfig, path: &str) -> PilotResult<VisionService> {
    use crate::perception::yolo_detector::{default_ui_class_names, YoloDetector};
    let detector = YoloDetector::load(
        path,
        config.vision.yolo_conf_threshold,
        config.vision.yolo_iou_threshold,
        default_ui_class_names(),
    )?;
    Ok(service.with_detector(Arc::new(detector)))
}

#[cfg(not(feature = "onnx"))]
fn with_yolo(service: VisionService, _config: &AppConfig, path: &str) -> PilotResult<VisionService> {
    tracing::warn!(path = %path, "yolo_model_path ignored; built without the `onnx` feature");
    Ok(service)
}

/// Control service driving the real mouse, keyboard and windows.
pub fn control_service(config: &AppConfig) -> PilotResult<ControlService> {
    Ok(ControlService::new(input_backend()?)
        .with_pointer_settle(Duration::from_millis(config.control.pointer_settle_ms))
        .with_max_text_len(config.control.max_text_len))
}

#[cfg(feature = "desktop")]
fn input_backend() -> PilotResult<Arc<dyn executor::input::InputBackend>> {
    Ok(Arc::new(executor::input::EnigoDesktop))
}

#[cfg(not(feature = "desktop"))]
fn input_backend() -> PilotResult<Arc<dyn executor::input::InputBackend>> {
    Err(PilotError::Config(
        "input injection needs a build with the `desktop` feature".into(),
    ))
}

/// Connect to a tool service child process and check it hosts `expected`.
pub async fn connect_remote(expected: ServiceKind, argv: &[String]) -> PilotResult<McpClient> {
    let transport = StdioTransport::spawn(argv)?;
    let client = McpClient::new(transport.command.clone(), Box::new(transport));
    let info = client.initialize().await?;
    if info.service != expected {
        return Err(PilotError::Mcp(format!(
            "`{}` hosts the {:?} service, expected {expected:?}",
            info.server_name, info.service
        )));
    }
    let tools = client.list_tools().await?;
    tracing::info!(server = %info.server_name, tools = tools.len(), "remote tool service connected");
    Ok(client)
}

/// Gateway with vision and control routed in-process or to child processes,
/// depending on `[services].mode`.
pub async fn build_gateway(config: &AppConfig) -> PilotResult<ProtocolGateway> {
    let (vision, control): (Arc<dyn ToolExecutor>, Arc<dyn ToolExecutor>) = match config.services.mode {
        ServiceMode::InProcess => (
            Arc::new(vision_service(config)?),
            Arc::new(control_service(config)?),
        ),
        ServiceMode::Remote => (
            Arc::new(connect_remote(ServiceKind::Vision, &config.services.vision_command).await?),
            Arc::new(connect_remote(ServiceKind::Control, &config.services.control_command).await?),
        ),
    };
    Ok(ProtocolGateway::new(Arc::new(ToolRegistry::builtin()))
        .route(ServiceKind::Vision, vision)
        .route(ServiceKind::Control, control))
}

/// Engine reasoning through the configured `reasoning` role.
pub fn build_engine(config: &AppConfig, gateway: Arc<ProtocolGateway>) -> PilotResult<AgentEngine> {
    let registry = ProviderRegistry::from_config(config);
    tracing::debug!(providers = ?registry.list_names(), "LLM providers registered");
    let (provider, call) = registry.call_config_for_role("reasoning")?;
    tracing::info!(provider = %provider.name(), model = %call.model, "reasoning backend selected");
    let backend = Arc::new(ProviderBackend::new(provider, call));

    let mut engine = AgentEngine::new(backend, gateway, LoopConfig::from(&config.agent));
    if let Some(prompt) = &config.agent.system_prompt {
        engine = engine.with_system_prompt(prompt.clone());
    }
    if config.agent.persist_history {
        engine = engine.with_history_dir(default_history_dir());
    }
    Ok(engine)
}
