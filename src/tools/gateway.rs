use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::{PilotError, PilotResult};
use crate::llm::types::ToolDef;
use crate::tools::registry::ToolRegistry;
use crate::tools::types::{ServiceKind, ToolCallRequest, ToolInvocation, ToolResult};

/// Something that can carry out validated tool invocations: an in-process
/// service or a client for a remote one.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, invocation: ToolInvocation) -> ToolResult;

    /// Drop per-task state (e.g. the focused window) before a new task run.
    async fn reset_session(&self) -> PilotResult<()> {
        Ok(())
    }
}

/// Tools the gateway answers itself.
pub struct LocalTools;

#[async_trait]
impl ToolExecutor for LocalTools {
    async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        match invocation {
            ToolInvocation::Wait { milliseconds } => {
                tokio::time::sleep(Duration::from_millis(milliseconds)).await;
                ToolResult::success(format!("Waited {milliseconds} ms"))
            }
            other => other.misrouted("gateway"),
        }
    }
}

/// Exclusive use of a gateway's services, released on drop.
pub type SessionLease = OwnedMutexGuard<()>;

/// Validates tool calls against the registry and routes them to the owning
/// service. Every call yields exactly one [`ToolResult`]; failures are data.
///
/// The routed services act on one desktop, so task runs take a
/// [`SessionLease`] first; every engine sharing the gateway sees the same lease.
pub struct ProtocolGateway {
    registry: Arc<ToolRegistry>,
    routes: HashMap<ServiceKind, Arc<dyn ToolExecutor>>,
    lease: Arc<Mutex<()>>,
}

impl ProtocolGateway {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let mut routes: HashMap<ServiceKind, Arc<dyn ToolExecutor>> = HashMap::new();
        routes.insert(ServiceKind::Local, Arc::new(LocalTools));
        Self {
            registry,
            routes,
            lease: Arc::new(Mutex::new(())),
        }
    }

    pub fn route(mut self, service: ServiceKind, executor: Arc<dyn ToolExecutor>) -> Self {
        self.routes.insert(service, executor);
        self
    }

    /// `None` while another run holds the lease.
    pub fn try_lease(&self) -> Option<SessionLease> {
        self.lease.clone().try_lock_owned().ok()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Definitions of the tools that have a route.
    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.registry
            .names()
            .filter(|n| self.routes.contains_key(&n.service()))
            .filter_map(|n| self.registry.get(n.as_str()))
            .map(|s| s.to_tool_def())
            .collect()
    }

    /// Resolve a raw call into a typed invocation.
    pub fn validate(&self, call: &ToolCallRequest) -> PilotResult<ToolInvocation> {
        let spec = self
            .registry
            .get(&call.name)
            .filter(|s| self.routes.contains_key(&s.service()))
            .ok_or_else(|| PilotError::ToolDispatch(format!("unknown tool `{}`", call.name)))?;
        spec.parse(&call.arguments).map_err(PilotError::ToolDispatch)
    }

    pub async fn dispatch(&self, call: &ToolCallRequest) -> ToolResult {
        let invocation = match self.validate(call) {
            Ok(inv) => inv,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "rejected tool call");
                return e.into();
            }
        };
        self.execute(invocation).await
    }

    /// Bounded by `timeout`; an elapsed call becomes an ERROR result.
    pub async fn dispatch_with_timeout(&self, call: &ToolCallRequest, timeout: Duration) -> ToolResult {
        match tokio::time::timeout(timeout, self.dispatch(call)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tool = %call.name, secs = timeout.as_secs(), "tool call timed out");
                PilotError::timeout(format!("tool `{}`", call.name), timeout).into()
            }
        }
    }

    pub async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let name = invocation.name();
        let Some(executor) = self.routes.get(&name.service()) else {
            return ToolResult::error(format!("no service is available for tool `{name}`"));
        };
        tracing::debug!(tool = %name, "dispatching tool call");
        let result = executor.execute(invocation).await;
        tracing::info!(tool = %name, status = ?result.status, "tool call finished");
        result
    }

    /// Reset every routed service for a new task run.
    pub async fn begin_session(&self) -> PilotResult<()> {
        for (service, executor) in &self.routes {
            executor.reset_session().await.map_err(|e| {
                PilotError::ToolDispatch(format!("failed to reset {service:?} service: {e}"))
            })?;
        }
        Ok(())
    }
}
