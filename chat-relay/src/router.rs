//! Delivery rules for lines read from an active session.

use tracing::debug;

use crate::{
    protocol::{ClientLine, ServerLine},
    registry::{Outbound, Registry, log_failed_delivery},
};

/// What happened to a routed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Relayed to the global channel; `delivered` counts accepting targets.
    Broadcast { delivered: usize },
    /// Delivered to the target and echoed back to the sender.
    Private,
    /// The target is not registered; the sender was told so.
    TargetNotFound,
    /// The target is registered but its queue refused the line.
    Undeliverable,
}

/// Routes one line sent by `sender`. `reply` is the sender's own handle.
///
/// The sender learns about its global messages only through the broadcast,
/// and gets a private echo only when the target accepted the message.
pub async fn route(registry: &Registry, sender: &str, reply: &Outbound, line: &str) -> Routed {
    match ClientLine::parse(line) {
        ClientLine::Private { target, body } => {
            route_private(registry, sender, reply, target, body).await
        }
        ClientLine::Global { body } => {
            let relay = ServerLine::Relay {
                sender: sender.to_string(),
                body: body.to_string(),
            };
            let delivered = registry.broadcast(&relay.to_string()).await;
            Routed::Broadcast { delivered }
        }
    }
}

async fn route_private(
    registry: &Registry,
    sender: &str,
    reply: &Outbound,
    target: &str,
    body: &str,
) -> Routed {
    let Some(handle) = registry.lookup(target).await else {
        debug!(%sender, %target, "private message to unknown user");
        send_reply(reply, sender, &ServerLine::target_not_found(target));
        return Routed::TargetNotFound;
    };

    let incoming = ServerLine::PrivateFrom {
        sender: sender.to_string(),
        body: body.to_string(),
    };
    match handle.deliver(&incoming.to_string()) {
        Ok(()) => {
            let echo = ServerLine::PrivateTo {
                target: target.to_string(),
                body: body.to_string(),
            };
            send_reply(reply, sender, &echo);
            Routed::Private
        }
        Err(error) => {
            log_failed_delivery(target, error);
            send_reply(reply, sender, &ServerLine::undeliverable(target));
            Routed::Undeliverable
        }
    }
}

fn send_reply(reply: &Outbound, sender: &str, line: &ServerLine) {
    if let Err(error) = reply.deliver(&line.to_string()) {
        log_failed_delivery(sender, error);
    }
}
