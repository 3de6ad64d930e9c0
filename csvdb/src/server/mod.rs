use crate::error::{CsvDbError, Result};
use crate::protocol::{dispatch, Outcome, Request};
use crate::store::Store;
use serde_json::Value;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

pub const DEFAULT_ADDR: &str = "127.0.0.1:9001";

/// TCP server answering protocol requests, one thread per connection.
///
/// Requests are read as a stream of concatenated JSON objects; there is no
/// length prefix or delimiter.
pub struct SocketServer {
    listener: TcpListener,
    store: Arc<Store>,
}

impl SocketServer {
    pub fn bind(addr: impl ToSocketAddrs, store: Arc<Store>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(SocketServer { listener, store })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub fn serve(self) -> Result<()> {
        log::info!("Listening on {}", self.local_addr()?);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("Failed to accept connection: {e}");
                    continue;
                }
            };

            let store = Arc::clone(&self.store);
            thread::spawn(move || {
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown peer".into());
                log::info!("Accepted connection from {peer}");
                if let Err(e) = handle_connection(&store, stream) {
                    log::warn!("Connection {peer} ended with error: {e}");
                }
                log::debug!("Connection {peer} closed");
            });
        }
        Ok(())
    }
}

fn handle_connection(store: &Store, stream: TcpStream) -> Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    let requests = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();
    for next in requests {
        let outcome = match next {
            Ok(value) => match serde_json::from_value::<Request>(value) {
                Ok(request) => {
                    log::debug!("Request {}", request.action);
                    dispatch(store, &request)
                }
                Err(e) => Outcome::Failed(CsvDbError::Json(e)),
            },
            // the stream can't be resynchronized after a syntax error
            Err(e) if e.is_io() => return Err(e.into()),
            Err(e) => Outcome::Failed(CsvDbError::Json(e)),
        };

        if let Outcome::Failed(err) = &outcome {
            log::warn!("Request failed: {err}");
        }
        serde_json::to_writer(&mut writer, &outcome.to_json())?;
        writer.flush()?;

        if outcome.closes_connection() {
            break;
        }
    }
    Ok(())
}
