use std::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};

/// Asks the OS for an ephemeral port and releases it immediately.
///
/// NOTE: Best-effort only. Another process may grab the port before Galaxy
/// binds it.
pub fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(Error::NoFreePort)?;
    let port = listener.local_addr().map_err(Error::NoFreePort)?.port();
    drop(listener);
    tracing::debug!(port, "allocated free port");
    Ok(port)
}

/// True when nothing accepts connections on `localhost:port`.
///
/// Any listener counts, so an unrelated process on the port is
/// indistinguishable from Galaxy being up.
pub fn is_available(port: u16) -> bool {
    // The stream (if any) is dropped on every path, closing the socket.
    TcpStream::connect(("localhost", port)).is_err()
}

pub async fn is_available_async(port: u16) -> bool {
    tokio::net::TcpStream::connect(("localhost", port))
        .await
        .is_err()
}
