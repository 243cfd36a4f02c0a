//! Implementation of the OpenCL language server.
//!
//! The server reads framed JSON-RPC from standard input, compiles document
//! buffers against the selected OpenCL device and publishes the compiler's
//! complaints back as diagnostics.

pub mod diagnostics;
pub mod jsonrpc;
pub mod lsp;
pub mod server;
pub mod utils;
