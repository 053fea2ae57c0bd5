//! JSON-RPC front end: tool and resource dispatch over stdio or SSE.

pub mod params;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod sse;
pub mod stdio;
mod tools;

use crate::error::{Result, VagrantMcpError};
use crate::exec::Executor;
use crate::sync::SyncEngine;
use crate::vm::VmManager;
use params::Params;
use protocol::{
    Request, ResourceGetParams, Response, RpcError, ToolExecuteParams, INVALID_REQUEST,
    JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
};
use registry::ToolRegistry;
use resources::ResourceRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const SERVER_ID: &str = "vagrant-mcp";
pub const SERVER_NAME: &str = "Vagrant Development VM Server";

/// Core components shared by every handler.
pub struct Services {
    pub vms: Arc<VmManager>,
    pub sync: SyncEngine,
    pub executor: Arc<Executor>,
}

pub struct McpServer {
    services: Arc<Services>,
    tools: ToolRegistry,
    resources: ResourceRegistry,
    shutdown: CancellationToken,
}

impl McpServer {
    /// Build a server with the full tool and resource catalog.
    /// `shutdown` is the root token: each call runs under a child of it.
    pub fn new(services: Arc<Services>, shutdown: CancellationToken) -> Result<Self> {
        let mut tools = ToolRegistry::new();
        tools::register_all(&mut tools);
        let mut resources = ResourceRegistry::new();
        resources::register_all(&mut resources)?;
        Ok(Self {
            services,
            tools,
            resources,
            shutdown,
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn capabilities(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema(),
                })
            })
            .collect();
        let resources: Vec<Value> = self
            .resources
            .iter()
            .map(|r| {
                json!({
                    "uri": r.uri_template,
                    "name": r.name,
                    "description": r.description,
                })
            })
            .collect();
        json!({
            "id": SERVER_ID,
            "name": SERVER_NAME,
            "version": env!("VAGRANT_MCP_VERSION"),
            "tools": tools,
            "resources": resources,
        })
    }

    /// Handle one raw message. Returns the serialized reply, or `None`
    /// for blank lines and notifications.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return None;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Err(e) => Some(Response::failure(
                Value::Null,
                RpcError::new(PARSE_ERROR, format!("invalid JSON: {}", e)),
            )),
            Ok(value) => self.handle_value(value).await,
        }?;

        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "failed to serialize response");
                None
            }
        }
    }

    async fn handle_value(&self, value: Value) -> Option<Response> {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: Request = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(Response::failure(
                    id,
                    RpcError::new(INVALID_REQUEST, format!("invalid request: {}", e)),
                ))
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(Response::failure(
                id,
                RpcError::new(
                    INVALID_REQUEST,
                    format!("unsupported jsonrpc version: {}", request.jsonrpc),
                ),
            ));
        }

        let is_notification = request.id.is_none();
        let response = self.handle_request(request).await;
        (!is_notification).then_some(response)
    }

    pub async fn handle_request(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(Value::Null);
        debug!(method = %request.method, "request");

        let outcome = match request.method.as_str() {
            "tool:execute" => self.execute_tool(request.params).await,
            "resource:get" => self.get_resource(request.params).await,
            "shutdown" => {
                self.shutdown.cancel();
                Ok(json!(true))
            }
            other => {
                return Response::failure(
                    id,
                    RpcError::new(METHOD_NOT_FOUND, format!("unsupported method: {}", other)),
                )
            }
        };

        match outcome {
            Ok(result) => Response::success(id, result),
            Err(e) => {
                debug!(method = %request.method, error = %e, "request failed");
                Response::failure(id, RpcError::from(&e))
            }
        }
    }

    async fn execute_tool(&self, params: Value) -> Result<Value> {
        let call: ToolExecuteParams = serde_json::from_value(params)
            .map_err(|e| VagrantMcpError::InvalidInput(format!("invalid tool:execute params: {}", e)))?;
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| VagrantMcpError::NotFound(format!("tool '{}'", call.name)))?;

        let params = Params::new(call.params);
        tool.check_required(&params)?;
        (tool.handler)(
            Arc::clone(&self.services),
            params,
            self.shutdown.child_token(),
        )
        .await
    }

    async fn get_resource(&self, params: Value) -> Result<Value> {
        let request: ResourceGetParams = serde_json::from_value(params)
            .map_err(|e| VagrantMcpError::InvalidInput(format!("invalid resource:get params: {}", e)))?;
        let (resource, rest) = self.resources.resolve(&request.uri)?;
        (resource.getter)(
            Arc::clone(&self.services),
            rest,
            self.shutdown.child_token(),
        )
        .await
    }
}
