use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use stepwright::{Bundle, EngineConfig, StepEvent, StepRequest};
use tokio::sync::Mutex;

use crate::relay::Relay;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct LoadPageRequest {
    #[schemars(description = "Path to a page snapshot JSON file")]
    pub path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CaptureRequest {
    #[schemars(
        description = "XPath of the element, absolute within its document or shadow root"
    )]
    pub xpath: String,
    #[schemars(description = "Event to record: click, input or enter")]
    pub event: String,
    #[schemars(description = "Typed text for input steps")]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RunStepRequest {
    #[schemars(description = "Event to replay: click, input, enter or open")]
    pub event: String,
    #[schemars(description = "Bundle captured for the step (omit for open)")]
    pub bundle: Option<Value>,
    #[schemars(description = "Text for input steps, url for open steps")]
    pub value: Option<String>,
    #[schemars(description = "Step label, used in notices")]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FindElementRequest {
    #[schemars(description = "Bundle captured for the element")]
    pub bundle: Value,
    #[schemars(description = "How long to keep retrying, in milliseconds")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PollRequest {
    #[schemars(description = "Button texts to click (case-insensitive substring)")]
    pub search_terms: Option<Vec<String>>,
    #[schemars(description = "Stop after this many seconds without a click")]
    pub idle_timeout_seconds: Option<u64>,
    #[schemars(description = "Milliseconds between scans")]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StartRecordingRequest {
    #[schemars(description = "Name of the new recording")]
    pub name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExportRecordingRequest {
    #[schemars(description = "Also write the recording JSON to this path")]
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData::internal_error(e.to_string(), None::<Value>)
}

fn text_ok(s: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(s.into())]))
}

fn json_ok(value: &impl serde::Serialize) -> Result<CallToolResult, ErrorData> {
    text_ok(serde_json::to_string_pretty(value).map_err(err)?)
}

pub(crate) fn parse_event(event: &str) -> Result<StepEvent, ErrorData> {
    serde_json::from_value(Value::String(event.to_ascii_lowercase())).map_err(|_| {
        ErrorData::invalid_params(
            format!("unknown event '{}': expected click, input, enter or open", event),
            None::<Value>,
        )
    })
}

pub(crate) fn parse_bundle(bundle: Value) -> Result<Bundle, ErrorData> {
    serde_json::from_value(bundle)
        .map_err(|e| ErrorData::invalid_params(format!("bad bundle: {}", e), None::<Value>))
}

#[derive(Clone)]
pub struct RelayServer {
    relay: Arc<Mutex<Relay>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl RelayServer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            relay: Arc::new(Mutex::new(Relay::new(config))),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Load a page snapshot to record against and replay on. Records a navigation step.")]
    async fn load_page(&self, req: Parameters<LoadPageRequest>) -> Result<CallToolResult, ErrorData> {
        let mut relay = self.relay.lock().await;
        let url = relay.load_page(Path::new(&req.0.path)).map_err(err)?;
        text_ok(format!("Loaded: {}", url))
    }

    #[tool(
        description = "Record an interaction with the element an XPath selects. Returns the step, including its bundle."
    )]
    async fn capture(&self, req: Parameters<CaptureRequest>) -> Result<CallToolResult, ErrorData> {
        let event = parse_event(&req.0.event)?;
        let mut relay = self.relay.lock().await;
        let step = relay
            .capture(&req.0.xpath, event, req.0.value.as_deref())
            .map_err(err)?;
        json_ok(&step)
    }

    #[tool(
        description = "Replay one step: locate the bundle's element and perform the event. Returns true or false."
    )]
    async fn run_step(&self, req: Parameters<RunStepRequest>) -> Result<CallToolResult, ErrorData> {
        let req = req.0;
        let request = StepRequest {
            event: parse_event(&req.event)?,
            bundle: req.bundle.map(parse_bundle).transpose()?,
            value: req.value,
            label: req.label.unwrap_or_default(),
        };
        let replayer = self.relay.lock().await.replayer().map_err(err)?;
        replayer.stop_signal().reset();
        let ok = replayer.run_step(&request).await;
        text_ok(ok.to_string())
    }

    #[tool(description = "Locate a bundle's element without acting on it. Returns how it was found.")]
    async fn find_element(
        &self,
        req: Parameters<FindElementRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let bundle = parse_bundle(req.0.bundle)?;
        let replayer = self.relay.lock().await.replayer().map_err(err)?;
        let timeout = req
            .0
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| replayer.config().resolver.timeout());
        let resolution = replayer.find_element(&bundle, timeout).await.map_err(err)?;
        json_ok(&resolution)
    }

    #[tool(
        description = "Keep clicking buttons whose text matches a search term until none has appeared for the idle timeout. Returns {clicks, timedOut}."
    )]
    async fn poll_and_click(&self, req: Parameters<PollRequest>) -> Result<CallToolResult, ErrorData> {
        let (replayer, config) = {
            let relay = self.relay.lock().await;
            let replayer = relay.replayer().map_err(err)?;
            let config = relay.poll_config(
                req.0.search_terms,
                req.0.idle_timeout_seconds,
                req.0.poll_interval_ms,
            );
            (replayer, config)
        };
        replayer.stop_signal().reset();
        let outcome = replayer.poll_and_click(&config).await;
        json_ok(&outcome)
    }

    #[tool(description = "Stop a running poll or step.")]
    async fn stop(&self) -> Result<CallToolResult, ErrorData> {
        let replayer = self.relay.lock().await.replayer().map_err(err)?;
        replayer.stop_signal().stop();
        text_ok("Stopped.")
    }

    #[tool(description = "Start a new recording. Drops captured steps and restarts label numbering.")]
    async fn start_recording(
        &self,
        req: Parameters<StartRecordingRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        self.relay.lock().await.start_recording(&req.0.name);
        text_ok(format!("Recording '{}'.", req.0.name))
    }

    #[tool(description = "Return the recording so far as JSON, optionally writing it to a file.")]
    async fn export_recording(
        &self,
        req: Parameters<ExportRecordingRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let relay = self.relay.lock().await;
        let recording = relay
            .export_recording(req.0.path.as_deref().map(Path::new))
            .map_err(err)?;
        json_ok(&recording)
    }

    #[tool(description = "Step progress notices (loading, success, error) since the last call.")]
    async fn step_notices(&self) -> Result<CallToolResult, ErrorData> {
        let notices = self.relay.lock().await.drain_notices();
        json_ok(&notices)
    }
}

#[tool_handler]
impl ServerHandler for RelayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "stepwright-relay".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Record and replay page interactions. Use 'load_page' to open a snapshot, \
                 'capture' to record a step by XPath and 'export_recording' to get the steps. \
                 'run_step' replays a step from its bundle and returns true or false. \
                 'poll_and_click' clicks matching buttons until the page goes quiet; 'stop' ends it."
                    .into(),
            ),
        }
    }
}

pub async fn run_server(config: EngineConfig) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = RelayServer::new(config);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event() {
        assert_eq!(parse_event("click").unwrap(), StepEvent::Click);
        assert_eq!(parse_event("Input").unwrap(), StepEvent::Input);
        assert_eq!(parse_event("open").unwrap(), StepEvent::Open);
        assert!(parse_event("hover").is_err());
    }

    #[test]
    fn test_parse_bundle() {
        let bundle = parse_bundle(serde_json::json!({
            "tag": "input",
            "id": "email",
            "xpath": "/html/body/input"
        }))
        .unwrap();
        assert_eq!(bundle.id.as_deref(), Some("email"));
        assert!(parse_bundle(serde_json::json!("input")).is_err());
    }

    #[test]
    fn test_run_step_request_shape() {
        let req: RunStepRequest = serde_json::from_value(serde_json::json!({
            "event": "click",
            "bundle": {"tag": "button", "xpath": "/html/body/button"},
        }))
        .unwrap();
        assert_eq!(req.event, "click");
        assert!(req.bundle.is_some());
        assert!(req.label.is_none());
    }

    #[test]
    fn test_server_info_lists_tools() {
        let server = RelayServer::new(EngineConfig::default());
        let info = server.get_info();
        assert_eq!(info.server_info.name, "stepwright-relay");
        assert!(info.capabilities.tools.is_some());
    }
}
