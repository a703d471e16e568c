/**
 * TOML configuration that builds a provider container.
 */
pub mod config;
/**
 * Persistence over an HTTP server.
 */
pub mod server;
pub mod web_storage;
/**
 * Persistence over a websocket, where the server
 *  pushes values and echoes local changes back.
 */
pub mod websocket;

pub mod prelude {
    pub use crate::config::{ConfigError, ProvidersConfig};
    pub use crate::server::{ServerError, ServerPersistence};
    pub use crate::web_storage::{
        LocalStoragePersistence, SessionStoragePersistence, StorageError, WebStorage,
    };
    pub use crate::websocket::{WebSocketError, WebSocketPersistence};
}
