//! Framed TCP discovery client.

use anyhow::{anyhow, bail, Context, Result};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use url::Url;
use xds_sotw_proto::{
    read_frame, server_frame, write_frame, ClientFrame, DiscoveryRequest, DiscoveryResponse,
    ServerFrame, DEFAULT_MAX_FRAME_BYTES,
};

/// Port used when an address names none.
pub const DEFAULT_PORT: u16 = 18000;

/// Parse `host[:port]` or `tcp://host[:port]`.
///
/// # Errors
///
/// Returns error if the address has no host, a bad port, or a scheme other
/// than `tcp`.
pub fn parse_addr(input: &str) -> Result<(String, u16)> {
    if input.contains("://") {
        let url = Url::parse(input).with_context(|| format!("Invalid address '{input}'"))?;
        if url.scheme() != "tcp" {
            bail!("{input}: unsupported scheme '{}'", url.scheme());
        }
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("{input}: missing host"))?;
        return Ok((host.to_string(), url.port().unwrap_or(DEFAULT_PORT)));
    }

    let (host, port) = match input.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| anyhow!("{input}: invalid port '{port}'"))?;
            (host, port)
        }
        None => (input, DEFAULT_PORT),
    };
    if host.is_empty() {
        bail!("{input}: missing host");
    }

    Ok((host.to_string(), port))
}

/// Connection settings for a management server.
#[derive(Debug, Clone)]
pub struct Client {
    host: String,
    port: u16,
    max_frame_bytes: usize,
}

impl Client {
    /// Client for the server at `addr`.
    ///
    /// # Errors
    ///
    /// Returns error if `addr` cannot be parsed.
    pub fn new(addr: &str) -> Result<Self> {
        let (host, port) = parse_addr(addr)?;
        Ok(Self {
            host,
            port,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    async fn connect(&self) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        let socket = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", self.host, self.port))?;
        Ok(socket.into_split())
    }

    /// Send one fetch and wait for the answer.
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails or the server answers with an
    /// error status.
    pub async fn fetch(&self, request: DiscoveryRequest) -> Result<DiscoveryResponse> {
        let (mut reader, mut writer) = self.connect().await?;
        write_frame(&mut writer, &ClientFrame::fetch(request), self.max_frame_bytes)
            .await
            .context("Failed to send fetch")?;

        let frame: Option<ServerFrame> = read_frame(&mut reader, self.max_frame_bytes)
            .await
            .context("Failed to read fetch answer")?;
        into_response(frame)
    }

    /// Open a stream with `request` as its first message.
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails.
    pub async fn watch(&self, request: DiscoveryRequest) -> Result<Watch> {
        let names = request.resource_names.clone();
        let (reader, mut writer) = self.connect().await?;
        write_frame(&mut writer, &ClientFrame::stream(request), self.max_frame_bytes)
            .await
            .context("Failed to open stream")?;

        Ok(Watch {
            reader,
            writer,
            names,
            max_frame_bytes: self.max_frame_bytes,
        })
    }
}

/// An open discovery stream that acknowledges every response it yields.
pub struct Watch {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    names: Vec<String>,
    max_frame_bytes: usize,
}

impl Watch {
    /// Wait for the next response and acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns error if the server closes the stream, sends an error status,
    /// or the connection fails.
    pub async fn next(&mut self) -> Result<DiscoveryResponse> {
        let frame: Option<ServerFrame> = read_frame(&mut self.reader, self.max_frame_bytes)
            .await
            .context("Failed to read response")?;
        let response = into_response(frame)?;

        let ack = DiscoveryRequest::ack(&response, &self.names);
        write_frame(&mut self.writer, &ClientFrame::stream(ack), self.max_frame_bytes)
            .await
            .context("Failed to acknowledge response")?;

        Ok(response)
    }
}

fn into_response(frame: Option<ServerFrame>) -> Result<DiscoveryResponse> {
    match frame.and_then(|frame| frame.kind) {
        Some(server_frame::Kind::Response(response)) => Ok(response),
        Some(server_frame::Kind::Error(status)) => {
            bail!("server error {}: {}", status.code, status.message)
        }
        None => bail!("server closed the connection"),
    }
}
