use std::fmt;

/// Client identifier supplied in the websocket path. Used for attribution only.
pub type ClientId = i64;

/// Text frames the server relays to chat members.
///
/// The rendered strings are the wire contract that browser and terminal
/// clients match on, so the `Display` output must stay byte-for-byte stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLine<'a> {
    Wrote { client_id: ClientId, text: &'a str },
    Left { client_id: ClientId },
}

impl fmt::Display for ChatLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatLine::Wrote { client_id, text } => write!(f, "Client #{client_id} wrote: {text}"),
            ChatLine::Left { client_id } => write!(f, "Client #{client_id} left the chat"),
        }
    }
}

pub fn wrote(client_id: ClientId, text: &str) -> String {
    ChatLine::Wrote { client_id, text }.to_string()
}

pub fn left(client_id: ClientId) -> String {
    ChatLine::Left { client_id }.to_string()
}
