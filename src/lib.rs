//! mux-chat: a single-process line chat server.
//!
//! Many clients share one thread. A mio poller watches the listener and
//! every connection; the first line a client sends becomes its name and
//! every later line is broadcast, timestamped, to all named clients
//! including the sender.
//!
//! ```text
//! client                         server
//!   |  <-- "Enter username: "      |
//!   |  --> "alice\n"               |
//!   |  <-- "Welcome alice!\n"      |
//!   |  --> "hi\n"                  |
//!   |  <-- "[12:00:01] alice: hi\n" (to every named client)
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod runtime;
pub mod session;

pub use config::{Config, ConfigError};
pub use error::{QueueFull, RegistryError, SendError, ServerError};
pub use runtime::{Server, Settings};
