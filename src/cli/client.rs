use std::{
    collections::BTreeMap,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use crate::{
    protocol::{Request, Response},
    utils::duration::parse_duration,
};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(400);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon doesn't appear to be running ({0}). Start it with `glass init`")]
    DaemonUnreachable(String),
    #[error("No timer is registered for '{}'. Start one with `glass start`", .0.display())]
    NotFound(PathBuf),
    #[error("Daemon failed to handle the request: {0}")]
    Daemon(String),
}

/// Current time of a timer as reported by the daemon.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct TimerTime {
    pub time: Duration,
    pub paused: bool,
}

/// Talks to the daemon whose address is published in `addr_file`.
pub struct DaemonClient {
    addr_file: PathBuf,
}

impl DaemonClient {
    pub fn new(addr_file: PathBuf) -> Self {
        Self { addr_file }
    }

    async fn addr(&self) -> Result<SocketAddr, ClientError> {
        let contents = tokio::fs::read_to_string(&self.addr_file)
            .await
            .map_err(|e| {
                ClientError::DaemonUnreachable(format!("can't read {:?}: {e}", self.addr_file))
            })?;
        contents.trim().parse().map_err(|e| {
            ClientError::DaemonUnreachable(format!("bad address in {:?}: {e}", self.addr_file))
        })
    }

    pub async fn call(&self, request: &Request) -> Result<Response, ClientError> {
        let unreachable = |e: std::io::Error| ClientError::DaemonUnreachable(e.to_string());

        let addr = self.addr().await?;
        debug!("Sending {request:?} to {addr}");
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::DaemonUnreachable(format!("timeout connecting to {addr}")))?
            .map_err(unreachable)?;

        let mut line = serde_json::to_vec(request)
            .map_err(|e| ClientError::DaemonUnreachable(e.to_string()))?;
        line.push(b'\n');

        let mut response = String::new();
        timeout(RESPONSE_TIMEOUT, async {
            stream.write_all(&line).await?;
            stream.flush().await?;
            BufReader::new(&mut stream).read_line(&mut response).await
        })
        .await
        .map_err(|_| ClientError::DaemonUnreachable("timeout waiting for a response".into()))?
        .map_err(unreachable)?;

        let response = serde_json::from_str::<Response>(response.trim()).map_err(|e| {
            ClientError::DaemonUnreachable(format!("unexpected response from daemon: {e}"))
        })?;

        match response {
            Response::NotFound { dir } => Err(ClientError::NotFound(dir)),
            Response::Failed { message } => Err(ClientError::Daemon(message)),
            response => Ok(response),
        }
    }

    async fn expect_ok(&self, request: Request) -> Result<(), ClientError> {
        match self.call(&request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn expect_time(&self, request: Request) -> Result<TimerTime, ClientError> {
        match self.call(&request).await? {
            Response::Time { time, paused } => Ok(TimerTime { time, paused }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn start(&self, dir: &Path) -> Result<(), ClientError> {
        self.expect_ok(Request::Start {
            dir: dir.to_path_buf(),
        })
        .await
    }

    pub async fn stop(&self, dir: &Path) -> Result<(), ClientError> {
        self.expect_ok(Request::Stop {
            dir: dir.to_path_buf(),
        })
        .await
    }

    pub async fn pause(&self, dir: &Path) -> Result<(), ClientError> {
        self.expect_ok(Request::Pause {
            dir: dir.to_path_buf(),
        })
        .await
    }

    pub async fn reset(&self, dir: &Path) -> Result<(), ClientError> {
        self.expect_ok(Request::Reset {
            dir: dir.to_path_buf(),
        })
        .await
    }

    pub async fn lap(&self, dir: &Path) -> Result<TimerTime, ClientError> {
        self.expect_time(Request::Lap {
            dir: dir.to_path_buf(),
        })
        .await
    }

    pub async fn status(&self, dir: &Path) -> Result<TimerTime, ClientError> {
        self.expect_time(Request::Status {
            dir: dir.to_path_buf(),
        })
        .await
    }

    /// Time spent per file. Entries the daemon sends with an unreadable duration are skipped.
    pub async fn distribution(&self, dir: &Path) -> Result<BTreeMap<String, Duration>, ClientError> {
        match self
            .call(&Request::Distribution {
                dir: dir.to_path_buf(),
            })
            .await?
        {
            Response::Files { files } => Ok(files
                .into_iter()
                .filter_map(|(path, length)| {
                    parse_duration(&length).ok().map(|length| (path, length))
                })
                .collect()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> ClientError {
    ClientError::DaemonUnreachable(format!("unexpected response from daemon: {response:?}"))
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use anyhow::Result;
    use tempfile::{tempdir, TempDir};
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
        task::JoinHandle,
    };

    use crate::protocol::Request;

    use super::{ClientError, DaemonClient, TimerTime};

    /// Serves one connection with a canned response line and hands back the request it got.
    async fn canned_daemon(dir: &TempDir, response: &'static str) -> Result<JoinHandle<Request>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        tokio::fs::write(
            dir.path().join("daemon.addr"),
            listener.local_addr()?.to_string(),
        )
        .await?;

        Ok(tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).await.unwrap();
            writer.write_all(response.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
            serde_json::from_str(&line).unwrap()
        }))
    }

    fn client(dir: &TempDir) -> DaemonClient {
        DaemonClient::new(dir.path().join("daemon.addr"))
    }

    #[tokio::test]
    async fn missing_address_is_unreachable() -> Result<()> {
        let dir = tempdir()?;
        let result = client(&dir).status(Path::new("/repo")).await;
        assert!(matches!(result, Err(ClientError::DaemonUnreachable(_))));
        Ok(())
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() -> Result<()> {
        let dir = tempdir()?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);
        tokio::fs::write(dir.path().join("daemon.addr"), addr.to_string()).await?;

        let result = client(&dir).start(Path::new("/repo")).await;
        assert!(matches!(result, Err(ClientError::DaemonUnreachable(_))));
        Ok(())
    }

    #[tokio::test]
    async fn status_reads_time() -> Result<()> {
        let dir = tempdir()?;
        let daemon = canned_daemon(&dir, r#"{"status":"time","time":"2m0s","paused":true}"#).await?;

        let time = client(&dir).status(Path::new("/repo")).await?;
        assert_eq!(
            time,
            TimerTime {
                time: Duration::from_secs(120),
                paused: true
            }
        );
        assert_eq!(
            daemon.await?,
            Request::Status {
                dir: "/repo".into()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() -> Result<()> {
        let dir = tempdir()?;
        canned_daemon(&dir, r#"{"status":"not_found","dir":"/repo"}"#).await?;

        let result = client(&dir).lap(Path::new("/repo")).await;
        assert!(matches!(result, Err(ClientError::NotFound(p)) if p == Path::new("/repo")));
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_in_band() -> Result<()> {
        let dir = tempdir()?;
        canned_daemon(&dir, r#"{"status":"failed","message":"monitor refused"}"#).await?;

        let result = client(&dir).start(Path::new("/repo")).await;
        assert!(matches!(result, Err(ClientError::Daemon(m)) if m == "monitor refused"));
        Ok(())
    }

    #[tokio::test]
    async fn garbage_response_is_unreachable() -> Result<()> {
        let dir = tempdir()?;
        canned_daemon(&dir, "HTTP/1.1 200 OK").await?;

        let result = client(&dir).reset(Path::new("/repo")).await;
        assert!(matches!(result, Err(ClientError::DaemonUnreachable(_))));
        Ok(())
    }

    #[tokio::test]
    async fn distribution_parses_durations() -> Result<()> {
        let dir = tempdir()?;
        canned_daemon(
            &dir,
            r#"{"status":"files","files":{"src/main.rs":"1m30s","__overhead":"5s"}}"#,
        )
        .await?;

        let files = client(&dir).distribution(Path::new("/repo")).await?;
        assert_eq!(files["src/main.rs"], Duration::from_secs(90));
        assert_eq!(files["__overhead"], Duration::from_secs(5));
        Ok(())
    }
}
