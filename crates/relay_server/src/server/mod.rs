//! Server orchestration: listener setup, the accept loop and the per
//! connection upgrade path.

mod core;
pub mod handlers;

pub use self::core::RelayServer;
pub use handlers::{handle_connection, upgrade, ConnectionContext};
