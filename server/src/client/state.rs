/// Where a client is in the connect / join / switch handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    AwaitingJoinAck,
    Joined,
    Switching,
}

/// Something that happened to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// The user asked to connect. Reconnection is always explicit.
    Connect,
    TransportOpened,
    HistoryReceived,
    ErrorReceived,
    SwitchRequested,
    TransportClosed,
}

/// Side effect the caller must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    SendJoin,
    CloseTransport,
}

impl ClientState {
    /// Apply an event. Events that do not apply in the current state leave it unchanged.
    pub fn on(self, event: ClientEvent) -> (ClientState, Option<ClientAction>) {
        use ClientEvent::*;
        use ClientState::*;

        match (self, event) {
            (_, TransportClosed) => (Disconnected, None),
            (Disconnected, Connect) => (Connecting, None),
            (Connecting, TransportOpened) => (AwaitingJoinAck, Some(ClientAction::SendJoin)),
            (AwaitingJoinAck, HistoryReceived) => (Joined, None),
            (AwaitingJoinAck, ErrorReceived) => (Disconnected, Some(ClientAction::CloseTransport)),
            (Joined, SwitchRequested) => (Switching, None),
            (Switching, HistoryReceived) => (Joined, None),
            // A failed switch leaves the connection on its previous channel.
            (Switching, ErrorReceived) => (Joined, None),
            (state, _) => (state, None),
        }
    }

    pub fn is_joined(self) -> bool {
        matches!(self, ClientState::Joined | ClientState::Switching)
    }
}
