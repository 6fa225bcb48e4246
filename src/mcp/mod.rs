pub mod protocol;
pub mod server;
pub mod tools;

use std::path::PathBuf;

#[derive(Clone, Debug, Default)]
pub struct McpConfig {
    /// Serve over a unix socket at this path instead of stdio.
    pub socket: Option<PathBuf>,
}

impl McpConfig {
    pub fn use_stdio(&self) -> bool {
        self.socket.is_none()
    }
}

pub use server::{McpServer, McpServerHandle};
