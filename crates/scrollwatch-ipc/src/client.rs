//! IPC client implementation

use scrollwatch_api::{Command, Event, Request, Response, ResponseResult, SubscriberScope};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::{IpcError, IpcResult};

/// IPC Client for connecting to scrollwatchd
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to scrollwatchd
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    async fn write_request(&mut self, command: Command) -> IpcResult<u64> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        Ok(request_id)
    }

    /// Send a command that expects a response and wait for it.
    ///
    /// Event lines that arrive first are skipped.
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        if !command.expects_response() {
            return Err(IpcError::InvalidMessage(
                "command is fire-and-forget; use notify".into(),
            ));
        }

        let request_id = self.write_request(command).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(IpcError::ConnectionClosed);
            }

            match serde_json::from_str::<Response>(line.trim()) {
                Ok(response) if response.request_id == request_id => return Ok(response),
                Ok(response) => {
                    debug!(request_id = response.request_id, "Skipping stale response");
                }
                Err(_) if serde_json::from_str::<Event>(line.trim()).is_ok() => {
                    debug!("Skipping event while waiting for response");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a fire-and-forget command (tick, rule replacement)
    pub async fn notify(&mut self, command: Command) -> IpcResult<()> {
        if command.expects_response() {
            return Err(IpcError::InvalidMessage(
                "command expects a response; use send".into(),
            ));
        }

        self.write_request(command).await?;
        Ok(())
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self, scope: SubscriberScope) -> IpcResult<EventStream> {
        let response = self.send(Command::Subscribe { scope }).await?;

        match response.result {
            ResponseResult::Ok(_) => {}
            ResponseResult::Err(e) => {
                return Err(IpcError::ServerError(e.message));
            }
        }

        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
        })
    }
}

/// Stream of events from scrollwatchd
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    // Dropping the write half would shut the connection down
    _writer: OwnedWriteHalf,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(IpcError::ConnectionClosed);
            }

            match serde_json::from_str::<Event>(line.trim()) {
                Ok(event) => return Ok(event),
                Err(_) if serde_json::from_str::<Response>(line.trim()).is_ok() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
