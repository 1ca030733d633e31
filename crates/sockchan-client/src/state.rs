use std::fmt;

/// Connection state of a channel. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disposed,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Disconnected => "Disconnected",
            ChannelState::Connecting => "Connecting",
            ChannelState::Connected => "Connected",
            ChannelState::Reconnecting => "Reconnecting",
            ChannelState::Disposed => "Disposed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification broadcast to `Channel::subscribe` receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    StateChanged(ChannelState),
    /// A fault the channel recovered from (or is recovering from).
    Error(String),
}

/// State plus link generation; the generation increments on every
/// successfully installed socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub state: ChannelState,
    pub generation: u64,
}
