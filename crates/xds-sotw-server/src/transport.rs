//! Framed TCP transport for discovery streams and fetches.
//!
//! The first frame a client sends selects the mode. `Stream` opens a
//! discovery stream that lives until either side hangs up; `Fetch` is
//! answered with exactly one frame and the connection is closed.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use xds_sotw_core::{DiscoveryServer, NodeHash};
use xds_sotw_proto::{
    client_frame, read_frame, write_frame, ClientFrame, DiscoveryRequest, FrameError,
    ServerFrame, Status,
};

/// Requests buffered between the socket reader and the session worker.
const REQUEST_BUFFER: usize = 16;

/// Responses buffered between the session worker and the socket writer.
const RESPONSE_BUFFER: usize = 16;

/// Serves discovery over framed TCP connections.
pub struct Transport {
    server: Arc<DiscoveryServer>,
    node_hash: Arc<dyn NodeHash>,
    max_frame_bytes: usize,
}

impl Transport {
    /// Create a transport in front of `server`.
    #[must_use]
    pub fn new(
        server: Arc<DiscoveryServer>,
        node_hash: Arc<dyn NodeHash>,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            server,
            node_hash,
            max_frame_bytes,
        }
    }

    /// Accept connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns error if accepting a connection fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            if let Err(err) = socket.set_nodelay(true) {
                tracing::debug!(%peer, error = %err, "Failed to disable Nagle");
            }

            let transport = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = transport.handle_connection(socket, peer).await {
                    tracing::warn!(%peer, error = %err, "Connection failed");
                }
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer: SocketAddr) -> Result<(), FrameError> {
        let (mut reader, mut writer) = socket.into_split();

        let Some(first) = read_frame::<_, ClientFrame>(&mut reader, self.max_frame_bytes).await?
        else {
            tracing::debug!(%peer, "Connection closed before first frame");
            return Ok(());
        };

        match first.kind {
            Some(client_frame::Kind::Fetch(request)) => self.fetch(request, &mut writer).await,
            Some(client_frame::Kind::Stream(request)) => {
                self.stream(request, peer, reader, writer).await
            }
            None => {
                let status = Status::new(Status::INVALID_ARGUMENT, "empty client frame");
                self.write(&mut writer, &ServerFrame::error(status)).await
            }
        }
    }

    async fn fetch<W>(&self, request: DiscoveryRequest, writer: &mut W) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = match self.node_hash.id(request.node.as_ref()) {
            Some(node_id) => match self.server.fetch(&node_id, &request) {
                Ok(response) => ServerFrame::response(response),
                Err(err) => {
                    tracing::debug!(node_id, error = %err, "Fetch not answered");
                    ServerFrame::error(err.to_status())
                }
            },
            None => ServerFrame::error(missing_node()),
        };

        self.write(writer, &frame).await
    }

    async fn stream<R, W>(
        &self,
        first: DiscoveryRequest,
        peer: SocketAddr,
        mut reader: R,
        mut writer: W,
    ) -> Result<(), FrameError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Some(node_id) = self.node_hash.id(first.node.as_ref()) else {
            return self.write(&mut writer, &ServerFrame::error(missing_node())).await;
        };

        let session = match self.server.open_stream(&node_id, "") {
            Ok(session) => session,
            Err(err) => {
                return self.write(&mut writer, &ServerFrame::error(err.to_status())).await;
            }
        };
        let stream_id = session.stream_id();
        tracing::debug!(%peer, %stream_id, node_id, "Serving stream");

        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER);
        let (response_tx, mut response_rx) = mpsc::channel(RESPONSE_BUFFER);

        // The receiver is alive until run_stream returns.
        let _ = request_tx.send(first).await;

        let max_frame_bytes = self.max_frame_bytes;
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame::<_, ClientFrame>(&mut reader, max_frame_bytes).await {
                    Ok(Some(ClientFrame {
                        kind: Some(client_frame::Kind::Stream(request)),
                    })) => {
                        if request_tx.send(request).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(_)) => {
                        tracing::warn!(%stream_id, "Unexpected frame on stream, closing");
                        break;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(%stream_id, error = %err, "Failed to read request");
                        break;
                    }
                }
            }
        });

        let writer_task = tokio::spawn(async move {
            while let Some(response) = response_rx.recv().await {
                let frame = ServerFrame::response(response);
                if let Err(err) = write_frame(&mut writer, &frame, max_frame_bytes).await {
                    tracing::debug!(%stream_id, error = %err, "Failed to write response");
                    break;
                }
            }
        });

        self.server.run_stream(session, request_rx, response_tx).await;

        // Unflushed responses die with the stream.
        reader_task.abort();
        writer_task.abort();
        tracing::debug!(%peer, %stream_id, "Connection finished");
        Ok(())
    }

    async fn write<W>(&self, writer: &mut W, frame: &ServerFrame) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        write_frame(writer, frame, self.max_frame_bytes).await
    }
}

fn missing_node() -> Status {
    Status::new(Status::INVALID_ARGUMENT, "request carries no node identity")
}
