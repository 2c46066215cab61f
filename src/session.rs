//! Seams to the messaging session that owns this component.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::service::DiscoInfo;

/// Reply to a request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IqReply {
    /// Payload element of a successful reply.
    Result(String),
    /// The `error` element of an error reply.
    Error(String),
}

/// Request/response primitive of the messaging session.
///
/// Implementations apply their own reply timeout and report it as an `Err`.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Address of the server the session is connected to.
    fn service_name(&self) -> String;

    /// Lists the items (child entities) of `address`.
    async fn discover_items(&self, address: &str) -> Result<Vec<String>>;

    /// Queries the features of `address`.
    async fn discover_info(&self, address: &str) -> Result<DiscoInfo>;

    /// Sends `payload` to `to` and waits for the correlated reply.
    async fn send_request(&self, to: &str, payload: String) -> Result<IqReply>;
}

/// Where a share URL gets published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Contact(String),
    Room(String),
}

impl Destination {
    pub fn address(&self) -> &str {
        match self {
            Destination::Contact(a) | Destination::Room(a) => a,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Contact(a) => write!(f, "contact {a}"),
            Destination::Room(a) => write!(f, "room {a}"),
        }
    }
}

/// Delivers plain text messages to contacts and rooms.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, to: &Destination, body: &str) -> Result<()>;
}
