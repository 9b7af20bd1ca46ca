//! Loopback request server. Every connection carries one [Request] line and gets one [Response]
//! line back.

use std::time::Duration;

use tokio::{
    io::{self, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    protocol::{Request, Response},
    utils::duration::format_duration,
};

use super::keeper::{service::KeeperHandle, KeeperError};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REQUEST_SIZE: u64 = 64 * 1024;

pub async fn serve(listener: TcpListener, keeper: KeeperHandle, stop: CancellationToken) {
    match listener.local_addr() {
        Ok(addr) => info!("Listening on {addr}"),
        Err(e) => error!("Listening on an unknown address: {e}"),
    }

    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let keeper = keeper.clone();
                tokio::spawn(async move {
                    match timeout(CONNECTION_TIMEOUT, handle_connection(stream, keeper)).await {
                        Ok(Ok(())) => (),
                        Ok(Err(e)) => error!("Error handling connection from {peer}: {e}"),
                        Err(_) => error!("Connection from {peer} timed out"),
                    }
                });
            }
            Err(e) => error!("Failed to accept connection: {e}"),
        }
    }

    info!("Stopped accepting requests");
}

/// Reads the request line. Returns `None` when the client closed without sending anything.
async fn read_request(reader: impl AsyncRead + Unpin) -> io::Result<Option<String>> {
    let mut line = String::new();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_SIZE));
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && line.len() as u64 >= MAX_REQUEST_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Request exceeds {MAX_REQUEST_SIZE} bytes"),
        ));
    }
    Ok(Some(line))
}

async fn handle_connection(stream: TcpStream, keeper: KeeperHandle) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let response = match read_request(reader).await {
        Ok(None) => return Ok(()),
        Ok(Some(line)) => match serde_json::from_str::<Request>(line.trim()) {
            Ok(request) => {
                debug!("Received {request:?}");
                route(request, &keeper).await
            }
            Err(e) => Response::Failed {
                message: format!("Malformed request: {e}"),
            },
        },
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Response::Failed {
            message: e.to_string(),
        },
        Err(e) => return Err(e),
    };

    let mut out = serde_json::to_vec(&response)?;
    out.push(b'\n');
    writer.write_all(&out).await?;
    writer.flush().await?;
    writer.shutdown().await
}

pub async fn route(request: Request, keeper: &KeeperHandle) -> Response {
    let dir = request.dir().clone();
    let result = match request {
        Request::Start { dir } => keeper.start(dir).await.map(|_| Response::Ok),
        Request::Stop { dir } => keeper.remove(dir).await.map(|_| Response::Ok),
        Request::Pause { dir } => keeper.pause(dir).await.map(|_| Response::Ok),
        Request::Reset { dir } => keeper.reset(dir).await.map(|_| Response::Ok),
        Request::Lap { dir } => keeper.lap(dir).await.map(|lapped| Response::Time {
            time: lapped.time,
            paused: lapped.paused,
        }),
        Request::Status { dir } => keeper.status(dir).await.map(|status| Response::Time {
            time: status.time,
            paused: status.paused,
        }),
        Request::Distribution { dir } => keeper.distribution(dir).await.map(|lengths| {
            Response::Files {
                files: lengths
                    .into_iter()
                    .map(|(path, length)| (path, format_duration(length)))
                    .collect(),
            }
        }),
    };

    match result {
        Ok(response) => response,
        Err(KeeperError::NotFound(_)) => Response::NotFound { dir },
        Err(e) => {
            error!("Request for {dir:?} failed: {e}");
            Response::Failed {
                message: e.to_string(),
            }
        }
    }
}
