//! The main loop: wires the protocol engine to the session handler and pumps
//! the transport one byte at a time.

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::info;
use lsp_types::notification::{
    DidChangeConfiguration, DidChangeTextDocument, DidOpenTextDocument, Exit, Initialized,
    Notification,
};
use lsp_types::request::{Initialize, Request, Shutdown};

use crate::diagnostics::Diagnostics;
use crate::jsonrpc::{JsonRpc, OutputCallback};
use crate::lsp::LspEventsHandler;
use crate::server::Result;
use crate::utils::{ExitHandler, IdGenerator};

/// Exit code when the read loop is stopped by an interrupt.
pub const EINTR: i32 = 4;

/// Interrupt flag of the currently running server.
///
/// The signal hook only ever touches this slot; the flag itself belongs to
/// the server and is polled between bytes.
static INTERRUPT_SLOT: Mutex<Option<Arc<AtomicBool>>> = Mutex::new(None);

pub fn install_interrupt_handle(flag: Arc<AtomicBool>) {
    *INTERRUPT_SLOT.lock().unwrap() = Some(flag);
}

pub fn clear_interrupt_handle() {
    *INTERRUPT_SLOT.lock().unwrap() = None;
}

/// Requests the running server to stop at the next byte boundary.
pub fn interrupt() {
    if let Some(flag) = INTERRUPT_SLOT.lock().unwrap().as_ref() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Owns the protocol engine and the session handler, and drives both from a
/// byte stream.
pub struct LspServer {
    jrpc: JsonRpc,
    handler: Rc<RefCell<LspEventsHandler>>,
    interrupted: Arc<AtomicBool>,
}

impl LspServer {
    pub fn new(
        diagnostics: Rc<RefCell<dyn Diagnostics>>,
        generator: Rc<dyn IdGenerator>,
        exit_handler: Rc<dyn ExitHandler>,
        output: OutputCallback,
    ) -> LspServer {
        info!("Setting up...");
        let mut jrpc = JsonRpc::new();
        jrpc.register_output_callback(output);
        let handler = Rc::new(RefCell::new(LspEventsHandler::new(
            diagnostics,
            jrpc.writer(),
            generator,
            exit_handler,
        )));

        {
            let handler = handler.clone();
            jrpc.register_method_callback(
                Initialize::METHOD,
                Box::new(move |data| handler.borrow_mut().on_initialize(data)),
            );
        }
        {
            let handler = handler.clone();
            jrpc.register_method_callback(
                Initialized::METHOD,
                Box::new(move |data| handler.borrow_mut().on_initialized(data)),
            );
        }
        {
            let handler = handler.clone();
            jrpc.register_method_callback(
                Shutdown::METHOD,
                Box::new(move |data| handler.borrow_mut().on_shutdown(data)),
            );
        }
        {
            let handler = handler.clone();
            jrpc.register_method_callback(
                Exit::METHOD,
                Box::new(move |_| handler.borrow_mut().on_exit()),
            );
        }
        {
            let handler = handler.clone();
            jrpc.register_method_callback(
                DidOpenTextDocument::METHOD,
                Box::new(move |data| handler.borrow_mut().on_text_open(data)),
            );
        }
        {
            let handler = handler.clone();
            jrpc.register_method_callback(
                DidChangeTextDocument::METHOD,
                Box::new(move |data| handler.borrow_mut().on_text_changed(data)),
            );
        }
        {
            let handler = handler.clone();
            jrpc.register_method_callback(
                DidChangeConfiguration::METHOD,
                Box::new(move |_| handler.borrow_mut().get_configuration()),
            );
        }
        {
            let handler = handler.clone();
            jrpc.register_input_callback(Box::new(move |data| {
                handler.borrow_mut().on_respond(data)
            }));
        }

        LspServer {
            jrpc,
            handler,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The flag [`interrupt`] flips once installed via
    /// [`install_interrupt_handle`].
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    /// Feeds the engine until end of input. Returns the process exit code:
    /// 0 at end of stream, [`EINTR`] when interrupted. `exit` terminates
    /// through the injected exit handler instead.
    pub fn run(&mut self, input: impl Read) -> Result<i32> {
        info!("Listening...");
        for byte in input.bytes() {
            if self.interrupted.load(Ordering::SeqCst) {
                return Ok(EINTR);
            }
            self.jrpc.consume(byte?);
            if self.jrpc.is_ready() {
                self.jrpc.reset();
                loop {
                    let response = self.handler.borrow_mut().next_response();
                    match response {
                        Some(response) => self.jrpc.write(&response),
                        None => break,
                    }
                }
            }
        }
        Ok(0)
    }
}
