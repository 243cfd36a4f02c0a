//! Small injected collaborators shared across the server.

pub mod uri;

use mockall::automock;
use rand::RngCore;

pub use uri::uri_to_path;

/// Produces correlation ids for server-initiated requests.
#[automock]
pub trait IdGenerator {
    fn generate_id(&self) -> String;
}

/// 16 random bytes rendered as lowercase hex.
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate_id(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

/// Terminates the session once the client sends `exit`.
///
/// Injected so tests can observe the success flag instead of dying.
#[automock]
pub trait ExitHandler {
    fn exit(&self, success: bool);
}

/// Exits the process with the conventional code: 0 after a proper
/// `shutdown`/`exit` sequence, 1 otherwise.
pub struct ProcessExitHandler;

impl ExitHandler for ProcessExitHandler {
    fn exit(&self, success: bool) {
        std::process::exit(if success { 0 } else { 1 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_32_hex_chars() {
        let generator = RandomIdGenerator;
        let id = generator.generate_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_differ() {
        let generator = RandomIdGenerator;
        assert_ne!(generator.generate_id(), generator.generate_id());
    }
}
