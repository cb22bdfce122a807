//! Tool invocation: adapter contract, registry, and node-data marshalling
//!
//! A tool is an external capability identified by a string name. The engine
//! never implements tools; it marshals the node configuration into a
//! configuration map (a known, per-tool key set plus explicit overrides)
//! and calls the registered adapter with the node's input text.
//!
//! Unknown tool names yield the deterministic result
//! `[Tool 'NAME' not found]` rather than an error, so a mistyped tool name
//! degrades a single node instead of failing the run.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::BoxedError;
use crate::workflow::NodeData;

/// Key→value configuration handed to a tool adapter.
pub type ToolConfig = Map<String, Value>;

/// External tool capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Execute with the node's input text and marshalled configuration.
    /// Expected domain failures are returned as `[Tool ...]` strings;
    /// unexpected failures are raised and routed to the node's retry policy.
    async fn execute(&self, input: &str, config: &ToolConfig) -> Result<String, BoxedError>;
}

/// Registry of tool adapters keyed by name. Populated at startup.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under a name, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.insert(name.into(), tool);
    }

    /// Look up an adapter.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

/// Substitute `{input}` into a template read from node data, if present.
fn templated(data: &NodeData, key: &str, input: &str) -> Option<String> {
    data.str_of(key).map(|tpl| tpl.replace("{input}", input))
}

/// Copy keys from node data into the config under snake_case names, only
/// when present.
fn copy_present(config: &mut ToolConfig, data: &NodeData, keys: &[(&str, &str)]) {
    for (data_key, config_key) in keys {
        if let Some(value) = data.get(data_key) {
            config.insert((*config_key).to_string(), value.clone());
        }
    }
}

/// Copy a key with a default when absent.
fn copy_or(config: &mut ToolConfig, data: &NodeData, data_key: &str, config_key: &str, default: Value) {
    let value = data.get(data_key).cloned().unwrap_or(default);
    config.insert(config_key.to_string(), value);
}

/// Build the configuration map for one tool invocation from node data.
///
/// Each tool name carries a closed key set (unknown keys are ignored unless
/// merged through `config` / `customParams`); query-like templates receive
/// `{input}` substitution here so adapters see final strings.
pub fn build_tool_config(tool_name: &str, data: &NodeData, input: &str) -> ToolConfig {
    let mut config = ToolConfig::new();

    match tool_name {
        "web_search" => {
            let template = data.str_or("queryTemplate", "{input}");
            config.insert("query".to_string(), Value::String(template.replace("{input}", input)));
        }
        "code_executor" => {
            copy_or(&mut config, data, "language", "language", Value::String("python".to_string()));
            copy_or(&mut config, data, "timeout", "timeout", Value::from(30));
            if let Some(code) = templated(data, "codeTemplate", input) {
                config.insert("code".to_string(), Value::String(code));
            }
        }
        "database_tool" => {
            copy_present(&mut config, data, &[("dbType", "db_type"), ("connectionString", "connection_string")]);
            if let Some(query) = templated(data, "queryTemplate", input) {
                if !query.is_empty() {
                    config.insert("query".to_string(), Value::String(query));
                }
            }
        }
        "file_processor" => {
            copy_or(&mut config, data, "operation", "operation", Value::String("read".to_string()));
        }
        "image_tool" => {
            copy_or(&mut config, data, "operation", "operation", Value::String("analyze".to_string()));
        }
        "ml_pipeline" => {
            copy_or(&mut config, data, "operation", "operation", Value::String("train".to_string()));
            copy_present(
                &mut config,
                data,
                &[
                    ("modelType", "model_type"),
                    ("targetColumn", "target_column"),
                    ("modelName", "model_name"),
                ],
            );
        }
        "website_generator" => {
            // Consumes the input text directly; no configuration keys.
        }
        "gis_tool" => {
            copy_or(&mut config, data, "operation", "operation", Value::String("info".to_string()));
            copy_present(
                &mut config,
                data,
                &[
                    ("analysis_type", "analysis_type"),
                    ("distance", "distance"),
                    ("target_crs", "target_crs"),
                    ("title", "title"),
                    ("colormap", "colormap"),
                    ("column", "column"),
                    ("how", "how"),
                    ("band", "band"),
                    ("layer", "layer"),
                    ("zoom", "zoom"),
                    ("mapType", "map_type"),
                    ("addMarker", "add_marker"),
                    ("markerLabel", "marker_label"),
                    ("coordinates", "coordinates"),
                ],
            );
        }
        "file_search" => {
            copy_or(&mut config, data, "source", "source", Value::String("local".to_string()));
            copy_or(&mut config, data, "mode", "mode", Value::String("filename".to_string()));
            copy_or(&mut config, data, "max_results", "max_results", Value::from(20));
            copy_present(&mut config, data, &[("roots", "roots"), ("extensions", "extensions")]);
        }
        "email_search" => {
            copy_or(&mut config, data, "source", "source", Value::String("gmail".to_string()));
            copy_or(&mut config, data, "max_results", "max_results", Value::from(20));
            copy_present(
                &mut config,
                data,
                &[
                    ("imap_server", "imap_server"),
                    ("imap_port", "imap_port"),
                    ("imap_username", "imap_username"),
                    ("imap_password", "imap_password"),
                ],
            );
        }
        "project_analyzer" => {
            copy_or(&mut config, data, "max_depth", "max_depth", Value::from(4));
            copy_or(&mut config, data, "max_file_size", "max_file_size", Value::from(50_000));
            copy_or(&mut config, data, "max_files_read", "max_files_read", Value::from(20));
        }
        "email_sender" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("source", "source"),
                    ("to", "to"),
                    ("subject", "subject"),
                    ("smtp_server", "smtp_server"),
                    ("smtp_port", "smtp_port"),
                    ("smtp_username", "smtp_username"),
                    ("smtp_password", "smtp_password"),
                ],
            );
        }
        "web_scraper" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("operation", "operation"),
                    ("css_selector", "css_selector"),
                    ("timeout", "timeout"),
                    ("user_agent", "user_agent"),
                ],
            );
        }
        "file_manager" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("operation", "operation"),
                    ("base_dir", "base_dir"),
                    ("destination", "destination"),
                    ("confirm", "confirm"),
                    ("content_source", "content_source"),
                ],
            );
        }
        "http_request" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("method", "method"),
                    ("headers", "headers"),
                    ("body", "body"),
                    ("auth_type", "auth_type"),
                    ("auth_token", "auth_token"),
                    ("timeout", "timeout"),
                ],
            );
            if let Some(url) = templated(data, "urlTemplate", input) {
                config.insert("url".to_string(), Value::String(url));
            }
        }
        "text_transformer" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("operation", "operation"),
                    ("pattern", "pattern"),
                    ("replacement", "replacement"),
                    ("separator", "separator"),
                    ("template", "template"),
                    ("max_length", "max_length"),
                ],
            );
        }
        "notifier" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("channel", "channel"),
                    ("webhook_url", "webhook_url"),
                    ("bot_token", "bot_token"),
                    ("chat_id", "chat_id"),
                    ("method", "method"),
                    ("headers", "headers"),
                    ("timeout", "timeout"),
                ],
            );
        }
        "json_parser" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("operation", "operation"),
                    ("path", "path"),
                    ("filter_field", "filter_field"),
                    ("filter_value", "filter_value"),
                ],
            );
        }
        "telegram_bot" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("operation", "operation"),
                    ("bot_token", "bot_token"),
                    ("chat_id", "chat_id"),
                    ("parse_mode", "parse_mode"),
                ],
            );
        }
        "whatsapp" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("operation", "operation"),
                    ("token", "token"),
                    ("phone_number_id", "phone_number_id"),
                    ("recipient", "recipient"),
                    ("template_name", "template_name"),
                ],
            );
        }
        "pyarchinit_tool" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("operation", "operation"),
                    ("db_path", "db_path"),
                    ("db_type", "db_type"),
                    ("sito", "sito"),
                    ("area", "area"),
                    ("us", "us"),
                    ("custom_query", "custom_query"),
                ],
            );
        }
        "qgis_project" => {
            copy_present(
                &mut config,
                data,
                &[
                    ("operation", "operation"),
                    ("project_path", "project_path"),
                    ("layer_name", "layer_name"),
                ],
            );
        }
        _ => {}
    }

    // Explicit overrides: a literal `config` object, then JSON-encoded
    // `customParams`, both merged on top of the per-tool key set.
    if let Some(Value::Object(explicit)) = data.get("config") {
        for (k, v) in explicit {
            config.insert(k.clone(), v.clone());
        }
    }
    if let Some(raw) = data.str_of("customParams") {
        if let Ok(Value::Object(custom)) = serde_json::from_str::<Value>(&raw) {
            for (k, v) in custom {
                config.insert(k, v);
            }
        }
    }

    config
}
