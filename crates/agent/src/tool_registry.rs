//! Tool registry used by the runtime to list and execute tools.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use proto::{ToolContext, ToolDefinition, ToolError, ToolExecutionResult};
use serde::Serialize;
use tools::ToolProvider;
use tracing::{debug, info, warn};

struct ProviderEntry {
    provider: Arc<dyn ToolProvider>,
    enabled: bool,
}

/// Snapshot of one registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub tools: Vec<String>,
}

/// Registry of tool providers.
///
/// Providers are kept in registration order. When two enabled providers
/// expose a tool with the same name, the earlier one owns it. The registry
/// is shared behind an `Arc` and may be mutated while runs are in flight;
/// each run iteration sees a consistent snapshot.
pub struct ToolRegistry {
    providers: RwLock<Vec<ProviderEntry>>,
}

impl ToolRegistry {
    /// Creates an empty tool registry.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
        }
    }

    /// Register a provider, enabled. Provider names must be unique.
    pub fn register_provider(&self, provider: impl ToolProvider + 'static) -> Result<(), ToolError> {
        self.register_shared(Arc::new(provider))
    }

    /// Register an already shared provider.
    pub fn register_shared(&self, provider: Arc<dyn ToolProvider>) -> Result<(), ToolError> {
        let mut providers = self.providers.write();
        let name = provider.name().to_string();
        if providers.iter().any(|e| e.provider.name() == name) {
            return Err(ToolError::DuplicateProvider(name));
        }
        debug!(provider = %name, tools = provider.tools().len(), "Registering tool provider");
        providers.push(ProviderEntry {
            provider,
            enabled: true,
        });
        Ok(())
    }

    /// Makes a provider's tools visible and executable again.
    pub fn enable_provider(&self, name: &str) -> Result<(), ToolError> {
        self.set_enabled(name, true)
    }

    /// Hides a provider's tools from the model and refuses to execute them.
    pub fn disable_provider(&self, name: &str) -> Result<(), ToolError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ToolError> {
        let mut providers = self.providers.write();
        let entry = providers
            .iter_mut()
            .find(|e| e.provider.name() == name)
            .ok_or_else(|| ToolError::ProviderNotFound(name.to_string()))?;
        if entry.enabled != enabled {
            info!(provider = %name, enabled, "Tool provider toggled");
        }
        entry.enabled = enabled;
        Ok(())
    }

    /// Returns whether `name` is enabled, or `None` if it is not registered.
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.providers
            .read()
            .iter()
            .find(|e| e.provider.name() == name)
            .map(|e| e.enabled)
    }

    /// Get tool definitions for the LLM, one per tool name.
    pub fn enabled_tools(&self) -> Vec<ToolDefinition> {
        let providers = self.providers.read();
        let mut seen = HashSet::new();
        let mut definitions = Vec::new();
        for entry in providers.iter().filter(|e| e.enabled) {
            for tool in entry.provider.tools() {
                if seen.insert(tool.name.clone()) {
                    definitions.push(tool);
                } else {
                    warn!(
                        tool = %tool.name,
                        provider = %entry.provider.name(),
                        "Tool shadowed by an earlier provider"
                    );
                }
            }
        }
        definitions
    }

    /// Snapshot of every registered provider, in registration order.
    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.providers
            .read()
            .iter()
            .map(|e| ProviderInfo {
                name: e.provider.name().to_string(),
                description: e.provider.description().to_string(),
                enabled: e.enabled,
                tools: e.provider.tools().into_iter().map(|t| t.name).collect(),
            })
            .collect()
    }

    /// First enabled provider that exposes `tool_name`.
    fn resolve(&self, tool_name: &str) -> Option<Arc<dyn ToolProvider>> {
        self.providers
            .read()
            .iter()
            .find(|e| e.enabled && e.provider.has_tool(tool_name))
            .map(|e| Arc::clone(&e.provider))
    }

    /// Execute a tool call on its owning provider.
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> ToolExecutionResult {
        let Some(provider) = self.resolve(tool_name) else {
            debug!(tool = %tool_name, "No enabled provider for tool");
            return ToolExecutionResult::not_found(tool_name);
        };
        debug!(tool = %tool_name, provider = %provider.name(), "Executing tool");
        provider.execute_tool(tool_name, input, context).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
