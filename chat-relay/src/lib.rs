//! Line-based chat relay: one TCP server, many named terminal clients.
//!
//! The server keeps a registry of connected usernames, relays global
//! messages to everyone (sender included) and routes private messages to a
//! single user. Clients decode the server's lines into typed events and file
//! them into one conversation buffer per contact.
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`protocol`] defines the wire format: line framing, the server's
//!   sentinel-prefixed lines, client-side decoding and outbound composition.
//! - [`registry`] is the shared username → connection map, with isolated
//!   per-target delivery.
//! - [`router`] applies the global/private delivery rules to one line.
//! - [`server`] accepts connections and runs one session task per client.
//! - [`conversation`] holds the client's per-contact buffers and pushes view
//!   updates to the presentation.
//! - [`client`] owns a client connection: the reader task and user sends.
//! - [`terminal`] is a stdin/stdout front end over [`client`].

pub mod cli;
pub mod client;
pub mod conversation;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod terminal;
