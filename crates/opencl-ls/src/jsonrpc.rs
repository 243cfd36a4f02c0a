//! JSON-RPC 2.0 framing and dispatch over a raw byte stream.
//!
//! The engine is fed one byte at a time. While no complete header block has
//! been seen it scans for `Key: value` lines; once the blank line arrives it
//! buffers exactly `Content-Length` bytes of body, parses them and dispatches:
//! bodies with a `method` go to the registered method callback, bodies without
//! one are responses to server-initiated requests and go to the input
//! callback. The caller polls [`JsonRpc::is_ready`] and calls
//! [`JsonRpc::reset`] between frames.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, error, trace, warn};
use regex::bytes::Regex;
use serde_json::{json, Value};

pub const CONTENT_TYPE: &str = "application/vscode-jsonrpc;charset=utf-8";

/// Wire-level error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    /// The first client message was not `initialize`.
    NotInitialized = -32002,
}

/// Callback invoked with a complete message envelope.
pub type MethodCallback = Box<dyn Fn(&Value)>;
/// Callback receiving fully framed outbound bytes.
pub type OutputCallback = Box<dyn FnMut(&str)>;

/// Cloneable handle over the output callback.
///
/// Owns the framing of outbound messages. The session handler keeps a clone
/// so it can emit errors without going back through the engine.
#[derive(Clone, Default)]
pub struct RpcWriter {
    output: Rc<RefCell<Option<OutputCallback>>>,
}

impl RpcWriter {
    pub fn set_output_callback(&self, callback: OutputCallback) {
        *self.output.borrow_mut() = Some(callback);
    }

    /// Frames `data` and hands it to the output callback.
    ///
    /// `jsonrpc: "2.0"` is injected when absent; `Content-Length` counts the
    /// serialized body bytes.
    pub fn write(&self, data: &Value) {
        let mut body = data.clone();
        if let Value::Object(object) = &mut body {
            object
                .entry("jsonrpc")
                .or_insert_with(|| Value::String("2.0".to_string()));
        }
        let content = body.to_string();
        let message = format!(
            "Content-Length: {}\r\nContent-Type: {}\r\n\r\n{}",
            content.len(),
            CONTENT_TYPE,
            content
        );
        debug!("<<<\n{}", message);
        match self.output.borrow_mut().as_mut() {
            Some(callback) => callback(&message),
            None => warn!("No output callback registered, the message is dropped"),
        }
    }

    pub fn write_error(&self, code: ErrorCode, message: &str) {
        trace!("Reporting error: '{}' ({})", message, code as i32);
        self.write(&json!({
            "error": {
                "code": code as i32,
                "message": message,
            }
        }));
    }
}

/// The framing and dispatch state machine.
pub struct JsonRpc {
    buffer: Vec<u8>,
    headers: HashMap<String, String>,
    content_length: usize,
    valid_header: bool,
    is_processing: bool,
    initialized: bool,
    tracing: bool,
    verbosity: bool,
    header_regex: Regex,
    callbacks: HashMap<String, MethodCallback>,
    respond_callback: Option<MethodCallback>,
    writer: RpcWriter,
}

impl JsonRpc {
    pub fn new() -> JsonRpc {
        JsonRpc {
            buffer: Vec::new(),
            headers: HashMap::new(),
            content_length: 0,
            valid_header: false,
            is_processing: true,
            initialized: false,
            tracing: false,
            verbosity: false,
            header_regex: Regex::new(r"([\w-]+): (.+)\r\n(?:([^:]+)\r\n)?").unwrap(),
            callbacks: HashMap::new(),
            respond_callback: None,
            writer: RpcWriter::default(),
        }
    }

    /// Handle for emitting messages outside the engine.
    pub fn writer(&self) -> RpcWriter {
        self.writer.clone()
    }

    /// Registers the callback invoked for `method`. Unregistered methods that
    /// require a response are answered with `MethodNotFound` automatically.
    pub fn register_method_callback(&mut self, method: &str, callback: MethodCallback) {
        trace!("Set callback for method: {}", method);
        self.callbacks.insert(method.to_string(), callback);
    }

    /// Registers the callback invoked when the client responds to one of the
    /// server's own requests.
    pub fn register_input_callback(&mut self, callback: MethodCallback) {
        trace!("Set callback for client responds");
        self.respond_callback = Some(callback);
    }

    /// Registers the sink for framed outbound bytes.
    pub fn register_output_callback(&mut self, callback: OutputCallback) {
        trace!("Set output callback");
        self.writer.set_output_callback(callback);
    }

    /// Feeds one byte from the transport.
    pub fn consume(&mut self, byte: u8) {
        self.buffer.push(byte);
        if self.valid_header {
            self.process_buffer_content();
        } else {
            self.process_buffer_header();
        }
    }

    /// True once a full frame has been dispatched; call [`reset`](Self::reset)
    /// before feeding the next byte.
    pub fn is_ready(&self) -> bool {
        !self.is_processing
    }

    pub fn write(&self, data: &Value) {
        self.writer.write(data);
    }

    pub fn write_error(&self, code: ErrorCode, message: &str) {
        self.writer.write_error(code, message);
    }

    /// Sends a `$/logTrace` notification when tracing is enabled.
    ///
    /// Disabled tracing is not an error; the message still goes to the
    /// internal log. The verbose text is only forwarded in verbose mode.
    pub fn write_trace(&self, message: &str, verbose: &str) {
        if !self.tracing {
            debug!("JRPC tracing is disabled");
            trace!("The message was: '{}', verbose: {}", message, verbose);
            return;
        }
        if !verbose.is_empty() && !self.verbosity {
            debug!("JRPC verbose tracing is disabled");
            trace!("The verbose message was: {}", verbose);
        }
        self.write(&json!({
            "method": "$/logTrace",
            "params": {
                "message": message,
                "verbose": if self.verbosity { verbose } else { "" },
            }
        }));
    }

    /// Clears all per-frame state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.headers.clear();
        self.valid_header = false;
        self.content_length = 0;
        self.is_processing = true;
    }

    fn process_buffer_header(&mut self) {
        if self.read_header() {
            self.buffer.clear();
        }

        if self.buffer.as_slice() == b"\r\n" {
            self.buffer.clear();
            self.valid_header = self.content_length > 0;
            if self.valid_header {
                self.buffer.reserve(self.content_length);
            } else {
                self.write_error(ErrorCode::InvalidRequest, "Invalid content length");
            }
        }
    }

    /// Scans the buffer for complete header lines, recording every header and
    /// picking `Content-Length` out of them.
    fn read_header(&mut self) -> bool {
        let mut parsed = Vec::new();
        for captures in self.header_regex.captures_iter(&self.buffer) {
            let key = String::from_utf8_lossy(&captures[1]).into_owned();
            let value = String::from_utf8_lossy(&captures[2]).into_owned();
            parsed.push((key, value));
        }

        let found = !parsed.is_empty();
        for (key, value) in parsed {
            if key == "Content-Length" {
                match value.parse() {
                    Ok(length) => self.content_length = length,
                    Err(err) => error!("Invalid Content-Length value '{}': {}", value, err),
                }
            }
            self.headers.insert(key, value);
        }
        found
    }

    fn process_buffer_content(&mut self) {
        if self.buffer.len() != self.content_length {
            return;
        }

        debug!(">>>\n{}", String::from_utf8_lossy(&self.buffer));
        let body: Value = match serde_json::from_slice(&self.buffer) {
            Ok(body) => body,
            Err(err) => {
                self.handle_parse_error(&err);
                return;
            }
        };

        match body.get("method").and_then(Value::as_str) {
            Some(method) => {
                let method = method.to_string();
                self.process_method(&method, &body);
            }
            None => self.fire_respond_callback(&body),
        }
        self.is_processing = false;
    }

    fn process_method(&mut self, method: &str, body: &Value) {
        if method == "initialize" {
            self.on_initialize(body);
        } else if !self.initialized {
            error!("Unexpected first message: '{}'", method);
            self.write_error(ErrorCode::NotInitialized, "Server was not initialized.");
            return;
        } else if method == "$/setTrace" {
            self.on_tracing_changed(body);
        }
        self.fire_method_callback(method, body);
    }

    fn on_initialize(&mut self, body: &Value) {
        self.initialized = true;
        match body.pointer("/params/trace").and_then(Value::as_str) {
            Some(trace_value) => {
                self.tracing = trace_value != "off";
                self.verbosity = trace_value == "verbose";
                trace!(
                    "Tracing options: is verbose: {}, is on: {}",
                    self.verbosity,
                    self.tracing
                );
            }
            None => error!("Failed to read tracing options"),
        }
    }

    fn on_tracing_changed(&mut self, body: &Value) {
        match body.pointer("/params/value").and_then(Value::as_str) {
            Some(trace_value) => {
                self.tracing = trace_value != "off";
                self.verbosity = trace_value == "verbose";
                trace!(
                    "Tracing options were changed, is verbose: {}, is on: {}",
                    self.verbosity,
                    self.tracing
                );
            }
            None => error!("Failed to read tracing options"),
        }
    }

    fn fire_method_callback(&self, method: &str, body: &Value) {
        match self.callbacks.get(method) {
            Some(callback) => {
                trace!("Calling handler for method: '{}'", method);
                callback(body);
            }
            None => {
                let is_request = body
                    .pointer("/params/id")
                    .map_or(false, |id| !id.is_null());
                let must_respond = is_request || !method.starts_with("$/");
                trace!(
                    "Got request: {}, respond is required: {}",
                    is_request,
                    must_respond
                );
                if must_respond {
                    self.write_error(
                        ErrorCode::MethodNotFound,
                        &format!("Method '{}' is not supported.", method),
                    );
                }
            }
        }
    }

    fn fire_respond_callback(&self, body: &Value) {
        match &self.respond_callback {
            Some(callback) => {
                trace!("Calling handler for a client respond");
                callback(body);
            }
            None => trace!("No handler registered for client responds"),
        }
    }

    /// A body that is not valid JSON poisons the whole frame: report it and
    /// drop back to header scanning so the next frame parses cleanly.
    fn handle_parse_error(&mut self, err: &serde_json::Error) {
        error!("Failed to parse request with reason: '{}'", err);
        self.reset();
        self.write_error(ErrorCode::ParseError, "Failed to parse request");
    }
}

impl Default for JsonRpc {
    fn default() -> JsonRpc {
        JsonRpc::new()
    }
}
