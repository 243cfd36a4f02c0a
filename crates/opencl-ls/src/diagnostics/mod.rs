//! Kernel diagnostics: device selection, compilation, build-log parsing.

use std::path::Path;
use std::rc::Rc;

use log::{debug, error, trace, warn};
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use opencl_info::{Compiler, Device, DeviceRegistry, Error};

pub mod parser;

pub use parser::LogParser;

/// Problems reported per build unless the client configures a different cap.
pub const DEFAULT_MAX_PROBLEMS: u64 = i8::MAX as u64;

/// One document snapshot submitted for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub file_path: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    /// Zero-width range, which is all a build log line can pin down.
    pub fn point(line: u32, character: u32) -> Range {
        let position = Position { line, character };
        Range {
            start: position.clone(),
            end: position,
        }
    }
}

/// One reported compiler message.
///
/// `severity` is the wire value: 2 for warnings, 1 for errors, and -1 for
/// tokens outside the protocol's range, which is why this is not the
/// `lsp_types` diagnostic struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub source: String,
    pub range: Range,
    pub severity: i32,
    pub message: String,
}

/// Capability set the session handler programs against.
#[automock]
pub trait Diagnostics {
    /// Accepts a string, or an array of strings joined with single spaces.
    fn set_build_options(&mut self, options: &Value);
    fn set_max_problems(&mut self, limit: u64);
    /// Selects a device; `0` or an unknown fingerprint means "best available".
    fn select_device(&mut self, identifier: u32);
    fn device(&self) -> Option<Device>;
    fn build_log(&self, source: &Source) -> Result<String, Error>;
    fn diagnostics(&self, source: &Source) -> Result<Vec<Diagnostic>, Error>;
}

/// Production engine: drives the compiler gateway and the log parser.
pub struct DiagnosticsEngine {
    compiler: Rc<dyn Compiler>,
    registry: DeviceRegistry,
    parser: LogParser,
    device: Option<Device>,
    build_options: String,
    max_problems: u64,
}

impl DiagnosticsEngine {
    pub fn new(compiler: Rc<dyn Compiler>) -> DiagnosticsEngine {
        let registry = DeviceRegistry::new(compiler.clone());
        let mut engine = DiagnosticsEngine {
            compiler,
            registry,
            parser: LogParser::new(),
            device: None,
            build_options: String::new(),
            max_problems: DEFAULT_MAX_PROBLEMS,
        };
        engine.select_device(0);
        engine
    }
}

impl Diagnostics for DiagnosticsEngine {
    fn set_build_options(&mut self, options: &Value) {
        match options {
            Value::String(options) => self.build_options = options.clone(),
            Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                if parts.len() != items.len() {
                    warn!("Ignoring build options with non-string entries: {}", options);
                    return;
                }
                self.build_options = parts.join(" ");
            }
            other => {
                warn!("Ignoring unsupported build options value: {}", other);
                return;
            }
        }
        debug!("Set build options: {}", self.build_options);
    }

    fn set_max_problems(&mut self, limit: u64) {
        debug!("Set max number of problems: {}", limit);
        self.max_problems = limit;
    }

    fn select_device(&mut self, identifier: u32) {
        trace!("Selecting OpenCL device (requested id: {})...", identifier);
        let devices = self.registry.devices();
        if devices.is_empty() {
            warn!("No OpenCL devices available, keeping the current selection");
            return;
        }

        if identifier > 0 {
            if let Some(device) = devices.iter().find(|device| device.id == identifier) {
                debug!("Selected OpenCL device by id: {}", device.description);
                self.device = Some(device.clone());
                return;
            }
            warn!("No device with id {}, falling back to the most powerful one", identifier);
        }

        let candidate = devices.into_iter().max_by_key(|device| device.power_index);
        if let Some(candidate) = candidate {
            let upgrade = self
                .device
                .as_ref()
                .map_or(true, |current| candidate.power_index > current.power_index);
            if upgrade {
                debug!("Selected OpenCL device: {}", candidate.description);
                self.device = Some(candidate);
            }
        }
    }

    fn device(&self) -> Option<Device> {
        self.device.clone()
    }

    fn build_log(&self, source: &Source) -> Result<String, Error> {
        let device = self.device.as_ref().ok_or(Error::DeviceMissing)?;
        debug!("Building program with options: {}", self.build_options);
        match self.compiler.compile(device, &source.text, &self.build_options) {
            Ok(build_log) => Ok(build_log),
            Err(err) => {
                error!("Failed to build program, error: {}", err);
                Ok(String::new())
            }
        }
    }

    fn diagnostics(&self, source: &Source) -> Result<Vec<Diagnostic>, Error> {
        debug!("Getting diagnostics...");
        let name = Path::new(&source.file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let build_log = self.build_log(source)?;
        trace!("BuildLog:\n{}", build_log);

        Ok(self.parser.parse(&build_log, &name, self.max_problems))
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_json_snapshot;
    use serde_json::json;

    use opencl_info::MockCompiler;

    use super::*;

    const DEVICE_ID_1: u32 = 3138399603;
    const DEVICE_ID_2: u32 = 2027288592;

    fn test_devices() -> Vec<Device> {
        vec![
            Device::new(DEVICE_ID_1, "Test Device 1".to_string(), 10),
            Device::new(DEVICE_ID_2, "Test Device 2".to_string(), 20),
        ]
    }

    fn engine_with_devices(devices: Vec<Device>) -> DiagnosticsEngine {
        let mut compiler = MockCompiler::new();
        compiler
            .expect_list_devices()
            .returning(move || Ok(devices.clone()));
        DiagnosticsEngine::new(Rc::new(compiler))
    }

    fn test_source() -> Source {
        Source {
            file_path: "/workspace/shaders/kernel.cl".to_string(),
            text: "__kernel void add() {}".to_string(),
        }
    }

    #[test]
    fn selects_most_powerful_device_during_construction() {
        let engine = engine_with_devices(test_devices());
        assert_eq!(engine.device().map(|device| device.id), Some(DEVICE_ID_2));
    }

    #[test]
    fn selects_device_by_power_on_auto_selection() {
        let mut engine = engine_with_devices(test_devices());
        engine.select_device(0);
        assert_eq!(engine.device().map(|device| device.id), Some(DEVICE_ID_2));
    }

    #[test]
    fn selects_device_by_existing_id() {
        let mut engine = engine_with_devices(test_devices());
        engine.select_device(DEVICE_ID_1);
        assert_eq!(engine.device().map(|device| device.id), Some(DEVICE_ID_1));
    }

    #[test]
    fn unknown_id_falls_back_to_power() {
        let mut engine = engine_with_devices(test_devices());
        engine.select_device(4527288514u64 as u32);
        assert_eq!(engine.device().map(|device| device.id), Some(DEVICE_ID_2));
    }

    #[test]
    fn auto_selection_never_downgrades_power() {
        let mut engine = engine_with_devices(test_devices());
        engine.select_device(DEVICE_ID_2);
        for _ in 0..3 {
            engine.select_device(0);
            assert_eq!(engine.device().map(|device| device.power_index), Some(20));
        }
    }

    #[test]
    fn explicit_id_may_downgrade_power() {
        let mut engine = engine_with_devices(test_devices());
        engine.select_device(DEVICE_ID_1);
        assert_eq!(engine.device().map(|device| device.power_index), Some(10));
    }

    #[test]
    fn no_devices_keeps_selection_empty() {
        let engine = engine_with_devices(Vec::new());
        assert_eq!(engine.device(), None);
    }

    #[test]
    fn build_log_without_device_reports_device_missing() {
        let engine = engine_with_devices(Vec::new());
        assert_eq!(engine.build_log(&test_source()), Err(Error::DeviceMissing));
        assert_eq!(engine.diagnostics(&test_source()), Err(Error::DeviceMissing));
    }

    #[test]
    fn compile_failure_degrades_to_empty_log() {
        let mut compiler = MockCompiler::new();
        compiler
            .expect_list_devices()
            .returning(|| Ok(test_devices()));
        compiler
            .expect_compile()
            .returning(|_, _, _| Err(Error::Compiler("CL_INVALID_CONTEXT".to_string())));

        let engine = DiagnosticsEngine::new(Rc::new(compiler));
        assert_eq!(engine.build_log(&test_source()), Ok(String::new()));
        assert_eq!(engine.diagnostics(&test_source()), Ok(Vec::new()));
    }

    #[test]
    fn diagnostics_compiles_once_and_parses_with_basename() {
        let mut compiler = MockCompiler::new();
        compiler
            .expect_list_devices()
            .returning(|| Ok(test_devices()));
        compiler.expect_compile().times(1).returning(|_, _, _| {
            Ok("<program source>:12:5: warning: no previous prototype for function 'getChannel'"
                .to_string())
        });

        let engine = DiagnosticsEngine::new(Rc::new(compiler));
        let diagnostics = engine.diagnostics(&test_source()).unwrap();

        assert_json_snapshot!(diagnostics, @r###"
        [
          {
            "source": "kernel.cl",
            "range": {
              "start": {
                "line": 11,
                "character": 5
              },
              "end": {
                "line": 11,
                "character": 5
              }
            },
            "severity": 2,
            "message": "no previous prototype for function 'getChannel'"
          }
        ]
        "###);
    }

    #[test]
    fn max_problems_is_plumbed_into_the_parser() {
        let mut compiler = MockCompiler::new();
        compiler
            .expect_list_devices()
            .returning(|| Ok(test_devices()));
        compiler.expect_compile().returning(|_, _, _| {
            Ok("\
<program source>:12:5: warning: no previous prototype for function 'getChannel'
<program source>:16:27: error: use of undeclared identifier 'r'
<program source>:25:7: warning: no previous prototype for function 'quadric'"
                .to_string())
        });

        let mut engine = DiagnosticsEngine::new(Rc::new(compiler));
        engine.set_max_problems(2);
        assert_eq!(engine.diagnostics(&test_source()).unwrap().len(), 2);
    }

    #[test]
    fn build_options_accept_string_and_array() {
        let mut engine = engine_with_devices(test_devices());

        engine.set_build_options(&json!("-cl-std=CL2.0"));
        assert_eq!(engine.build_options, "-cl-std=CL2.0");

        engine.set_build_options(&json!(["-I", "/usr/local/include"]));
        assert_eq!(engine.build_options, "-I /usr/local/include");

        engine.set_build_options(&json!(["-I", 42]));
        assert_eq!(engine.build_options, "-I /usr/local/include");

        engine.set_build_options(&json!({"options": "-w"}));
        assert_eq!(engine.build_options, "-I /usr/local/include");
    }

    #[test]
    fn build_options_are_passed_to_the_compiler() {
        let mut compiler = MockCompiler::new();
        compiler
            .expect_list_devices()
            .returning(|| Ok(test_devices()));
        compiler
            .expect_compile()
            .withf(|device, source, options| {
                device.id == DEVICE_ID_2
                    && source == "__kernel void add() {}"
                    && options == "-I /usr/local/include"
            })
            .times(1)
            .returning(|_, _, _| Ok(String::new()));

        let mut engine = DiagnosticsEngine::new(Rc::new(compiler));
        engine.set_build_options(&json!(["-I", "/usr/local/include"]));
        engine.build_log(&test_source()).unwrap();
    }
}
