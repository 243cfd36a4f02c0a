//! The LSP session: handshake, configuration pulls, document lifecycle and
//! shutdown.
//!
//! The handler consumes raw message envelopes from the JSON-RPC engine,
//! queues outbound messages and lets the server loop drain them after each
//! frame. Errors go straight out through the shared [`RpcWriter`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, error, warn};
use lsp_types::notification::{DidChangeConfiguration, Notification, PublishDiagnostics};
use lsp_types::request::{RegisterCapability, Request, WorkspaceConfiguration};
use lsp_types::{
    ClientCapabilities, ConfigurationItem, ConfigurationParams, Registration, RegistrationParams,
    ServerCapabilities, TextDocumentSyncCapability, TextDocumentSyncKind,
    TextDocumentSyncOptions, TextDocumentSyncSaveOptions,
};
use serde_json::{json, Value};

use crate::diagnostics::{Diagnostics, Source};
use crate::jsonrpc::{ErrorCode, RpcWriter};
use crate::server::from_json;
use crate::utils::{uri_to_path, ExitHandler, IdGenerator};

/// Configuration sections pulled from the client, in request order.
const CONFIGURATION_SECTIONS: [&str; 3] = [
    "OpenCL.server.buildOptions",
    "OpenCL.server.maxNumberOfProblems",
    "OpenCL.server.deviceID",
];

/// A server-initiated request awaiting the client's response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRequest {
    method: String,
    id: String,
}

#[derive(Debug, Default)]
struct SessionCapabilities {
    has_configuration: bool,
    supports_did_change_configuration: bool,
}

/// Translates LSP methods into diagnostics work and outbound messages.
pub struct LspEventsHandler {
    diagnostics: Rc<RefCell<dyn Diagnostics>>,
    writer: RpcWriter,
    generator: Rc<dyn IdGenerator>,
    exit_handler: Rc<dyn ExitHandler>,
    out_queue: VecDeque<Value>,
    requests: VecDeque<PendingRequest>,
    capabilities: SessionCapabilities,
    shutdown_requested: bool,
}

impl LspEventsHandler {
    pub fn new(
        diagnostics: Rc<RefCell<dyn Diagnostics>>,
        writer: RpcWriter,
        generator: Rc<dyn IdGenerator>,
        exit_handler: Rc<dyn ExitHandler>,
    ) -> LspEventsHandler {
        LspEventsHandler {
            diagnostics,
            writer,
            generator,
            exit_handler,
            out_queue: VecDeque::new(),
            requests: VecDeque::new(),
            capabilities: SessionCapabilities::default(),
            shutdown_requested: false,
        }
    }

    pub fn on_initialize(&mut self, data: &Value) {
        debug!("Received 'initialize' request");
        match from_json::<ClientCapabilities>("client capabilities", &data["params"]["capabilities"])
        {
            Ok(capabilities) => {
                let workspace = capabilities.workspace.unwrap_or_default();
                self.capabilities.has_configuration = workspace.configuration.unwrap_or(false);
                self.capabilities.supports_did_change_configuration = workspace
                    .did_change_configuration
                    .and_then(|c| c.dynamic_registration)
                    .unwrap_or(false);
            }
            Err(err) => error!("Failed to parse initialize parameters: {}", err),
        }

        if let Some(configuration) = data.pointer("/params/initializationOptions/configuration") {
            self.apply_configuration(configuration);
        }

        let capabilities = match serde_json::to_value(server_capabilities()) {
            Ok(capabilities) => capabilities,
            Err(err) => {
                error!("Failed to serialize server capabilities: {}", err);
                Value::Null
            }
        };
        self.out_queue.push_back(json!({
            "id": data["id"],
            "result": { "capabilities": capabilities },
        }));
    }

    pub fn on_initialized(&mut self, _data: &Value) {
        debug!("Received 'initialized' message");
        if !self.capabilities.supports_did_change_configuration {
            debug!("Does not support didChangeConfiguration registration");
            return;
        }

        let params = RegistrationParams {
            registrations: vec![Registration {
                id: self.generator.generate_id(),
                method: DidChangeConfiguration::METHOD.to_string(),
                register_options: None,
            }],
        };
        self.out_queue.push_back(json!({
            "id": self.generator.generate_id(),
            "method": RegisterCapability::METHOD,
            "params": params,
        }));
    }

    /// Asks the client for the server's configuration sections.
    pub fn get_configuration(&mut self) {
        if !self.capabilities.has_configuration {
            debug!("Does not have configuration capability");
            return;
        }

        debug!("Make configuration request");
        let items: Vec<ConfigurationItem> = CONFIGURATION_SECTIONS
            .iter()
            .map(|section| ConfigurationItem {
                scope_uri: None,
                section: Some(section.to_string()),
            })
            .collect();

        let request_id = self.generator.generate_id();
        self.requests.push_back(PendingRequest {
            method: WorkspaceConfiguration::METHOD.to_string(),
            id: request_id.clone(),
        });
        self.out_queue.push_back(json!({
            "id": request_id,
            "method": WorkspaceConfiguration::METHOD,
            "params": ConfigurationParams { items },
        }));
    }

    /// Routes a client response to the oldest pending request.
    pub fn on_respond(&mut self, data: &Value) {
        debug!("Received client respond");
        let request = match self.requests.pop_front() {
            Some(request) => request,
            None => {
                warn!("Received a respond with no request pending");
                return;
            }
        };

        let matches = data["id"].as_str() == Some(request.id.as_str());
        if !matches || request.method != WorkspaceConfiguration::METHOD {
            warn!(
                "Out-of-order respond (expected id '{}' for '{}'), skipping",
                request.id, request.method
            );
            return;
        }
        self.on_configuration(data);
    }

    pub fn on_text_open(&mut self, data: &Value) {
        debug!("Received 'textDocument/didOpen' message");
        let uri = data.pointer("/params/textDocument/uri").and_then(Value::as_str);
        let text = data.pointer("/params/textDocument/text").and_then(Value::as_str);
        match (uri, text) {
            (Some(uri), Some(text)) => self.build_diagnostics_respond(uri, text),
            _ => warn!("Malformed 'textDocument/didOpen' notification"),
        }
    }

    pub fn on_text_changed(&mut self, data: &Value) {
        debug!("Received 'textDocument/didChange' message");
        let uri = data.pointer("/params/textDocument/uri").and_then(Value::as_str);
        // Full sync is advertised, so only the last change carries the
        // document; entries without `text` are ignored.
        let text = data
            .pointer("/params/contentChanges")
            .and_then(Value::as_array)
            .and_then(|changes| changes.last())
            .and_then(|change| change.get("text"))
            .and_then(Value::as_str);
        match (uri, text) {
            (Some(uri), Some(text)) => self.build_diagnostics_respond(uri, text),
            _ => debug!("No full-text change to process"),
        }
    }

    pub fn on_shutdown(&mut self, data: &Value) {
        debug!("Received 'shutdown' request");
        self.out_queue.push_back(json!({ "id": data["id"], "result": null }));
        self.shutdown_requested = true;
    }

    pub fn on_exit(&mut self) {
        debug!("Received 'exit', after 'shutdown': {}", self.shutdown_requested);
        self.exit_handler.exit(self.shutdown_requested);
    }

    /// Pops the next queued outbound message.
    pub fn next_response(&mut self) -> Option<Value> {
        self.out_queue.pop_front()
    }

    fn on_configuration(&mut self, data: &Value) {
        debug!("Received 'configuration' respond");
        let result = match data.get("result").and_then(Value::as_array) {
            Some(result) => result,
            None => {
                warn!("Empty configuration result");
                return;
            }
        };
        if result.len() < 2 {
            warn!("Unexpected configuration result items count: {}", result.len());
            return;
        }

        let mut diagnostics = self.diagnostics.borrow_mut();
        if let Some(build_options) = result.first().filter(|value| value.is_array()) {
            diagnostics.set_build_options(build_options);
        }
        if let Some(max_problems) = result.get(1).and_then(Value::as_u64) {
            diagnostics.set_max_problems(max_problems);
        }
        if let Some(device_id) = result.get(2).and_then(Value::as_u64) {
            diagnostics.select_device(device_id as u32);
        }
    }

    /// Settings supplied inline through `initializationOptions.configuration`.
    fn apply_configuration(&mut self, configuration: &Value) {
        let mut diagnostics = self.diagnostics.borrow_mut();
        if let Some(build_options) = configuration.get("buildOptions") {
            diagnostics.set_build_options(build_options);
        }
        if let Some(max_problems) = configuration.get("maxNumberOfProblems").and_then(Value::as_u64)
        {
            diagnostics.set_max_problems(max_problems);
        }
        if let Some(device_id) = configuration.get("deviceID").and_then(Value::as_u64) {
            diagnostics.select_device(device_id as u32);
        }
    }

    fn build_diagnostics_respond(&mut self, uri: &str, text: &str) {
        let file_path = uri_to_path(uri);
        debug!("Converted uri '{}' to path '{}'", uri, file_path);

        let source = Source {
            file_path,
            text: text.to_string(),
        };
        match self.diagnostics.borrow().diagnostics(&source) {
            Ok(diagnostics) => {
                self.out_queue.push_back(json!({
                    "method": PublishDiagnostics::METHOD,
                    "params": {
                        "uri": uri,
                        "diagnostics": diagnostics,
                    },
                }));
            }
            Err(err) => {
                let message = format!("Failed to get diagnostics: {}", err);
                error!("{}", message);
                self.writer.write_error(ErrorCode::InternalError, &message);
            }
        }
    }
}

fn server_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::FULL),
                will_save: Some(false),
                will_save_wait_until: Some(false),
                save: Some(TextDocumentSyncSaveOptions::Supported(false)),
            },
        )),
        ..ServerCapabilities::default()
    }
}
