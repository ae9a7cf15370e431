use std::collections::VecDeque;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::engine::events::{ChatMessage, ClientFrame, ServerFrame};

use super::state::{ClientAction, ClientEvent, ClientState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("connection closed")]
    Closed,

    #[error("not allowed while {0:?}")]
    InvalidState(ClientState),
}

/// A chat client over a single WebSocket connection.
///
/// Frames that arrive while waiting for a join or switch acknowledgement are kept and
/// handed out by [`ChatClient::next_frame`] afterwards.
pub struct ChatClient {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    state: ClientState,
    channel_id: Option<String>,
    pending: VecDeque<ServerFrame>,
}

impl ChatClient {
    /// Open the transport. The client is ready to [`join`](Self::join) afterwards.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (state, _) = ClientState::Disconnected.on(ClientEvent::Connect);
        let (ws, _) = connect_async(url).await?;
        let (sink, stream) = ws.split();
        debug!(%url, "chat transport open");
        Ok(Self {
            sink,
            stream,
            state,
            channel_id: None,
            pending: VecDeque::new(),
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The channel this client believes it is on, when known.
    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    /// Authenticate and enter a channel. Returns the channel history. A rejected
    /// join closes the transport.
    pub async fn join(
        &mut self,
        token: &str,
        channel_id: Option<&str>,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let (state, action) = self.state.on(ClientEvent::TransportOpened);
        if action != Some(ClientAction::SendJoin) {
            return Err(ClientError::InvalidState(self.state));
        }
        self.state = state;

        self.send(&ClientFrame::Join {
            token: token.to_string(),
            channel_id: channel_id.map(str::to_string),
        })
        .await?;

        match self.await_ack().await {
            Ok((joined, history)) => {
                self.channel_id = Some(joined);
                Ok(history)
            }
            Err(e) => {
                if self.state == ClientState::Disconnected {
                    let _ = self.sink.close().await;
                }
                Err(e)
            }
        }
    }

    /// Move to another channel. Returns `None` without contacting the server when the
    /// client is already on that channel.
    pub async fn switch_channel(
        &mut self,
        channel_id: &str,
    ) -> Result<Option<Vec<ChatMessage>>, ClientError> {
        if self.channel_id.as_deref() == Some(channel_id) {
            return Ok(None);
        }
        let (state, _) = self.state.on(ClientEvent::SwitchRequested);
        if state != ClientState::Switching {
            return Err(ClientError::InvalidState(self.state));
        }
        self.state = state;

        self.send(&ClientFrame::SwitchChannel {
            channel_id: channel_id.to_string(),
        })
        .await?;

        let (joined, history) = self.await_ack().await?;
        self.channel_id = Some(joined);
        Ok(Some(history))
    }

    pub async fn send_message(
        &mut self,
        content: &str,
        reply_to_id: Option<&str>,
    ) -> Result<(), ClientError> {
        self.send(&ClientFrame::Message {
            content: content.to_string(),
            reply_to_id: reply_to_id.map(str::to_string),
        })
        .await
    }

    pub async fn typing(&mut self) -> Result<(), ClientError> {
        self.send(&ClientFrame::Typing).await
    }

    /// Next frame from the server, or `None` once the connection is closed.
    pub async fn next_frame(&mut self) -> Result<Option<ServerFrame>, ClientError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        self.read_frame().await
    }

    /// Send a raw text frame, bypassing the typed protocol.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), ClientError> {
        self.sink.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.sink.close().await?;
        Ok(())
    }

    async fn send(&mut self, frame: &ClientFrame) -> Result<(), ClientError> {
        if self.state == ClientState::Disconnected {
            return Err(ClientError::Closed);
        }
        let text = serde_json::to_string(frame)?;
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Wait for the `history` that acknowledges a join or switch, or the `error` that
    /// refuses it. Returns the channel the server placed this connection on.
    async fn await_ack(&mut self) -> Result<(String, Vec<ChatMessage>), ClientError> {
        loop {
            match self.read_frame().await? {
                Some(ServerFrame::History {
                    channel_id,
                    messages,
                }) => {
                    self.state = self.state.on(ClientEvent::HistoryReceived).0;
                    return Ok((channel_id, messages));
                }
                Some(ServerFrame::Error { message }) => {
                    self.state = self.state.on(ClientEvent::ErrorReceived).0;
                    return Err(ClientError::Rejected(message));
                }
                Some(other) => self.pending.push_back(other),
                None => return Err(ClientError::Closed),
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Option<ServerFrame>, ClientError> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
                Message::Close(_) => break,
                _ => {}
            }
        }
        self.state = self.state.on(ClientEvent::TransportClosed).0;
        Ok(None)
    }
}
