//! Line protocol spoken between the relay server and its clients.
//!
//! Every message is a single UTF-8 text line. Clients send free text, with
//! one structured form (`/private <target> <body>`). The server answers with
//! a small set of sentinel-prefixed lines:
//!
//! | Line | Meaning |
//! |---|---|
//! | `UPDATEUSERS:<a>,<b>,` | roster snapshot |
//! | `[Private from <sender>]: <body>` | private message for the reader |
//! | `[Private to <target>]: <body>` | confirmation of a delivered private message |
//! | `Server: <text>` | system notice |
//! | `<sender>: <body>` | global chat relay |
//!
//! Classification is purely prefix based, so a username that itself contains
//! `]:`, `,` or one of the prefixes above cannot be told apart from a control
//! line. That limitation is part of the wire format and is not papered over
//! on either side.

use std::{fmt, io};

use serde::{Serialize, Serializer};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 12345;

pub const ROSTER_PREFIX: &str = "UPDATEUSERS:";
pub const NOTICE_PREFIX: &str = "Server:";
pub const PRIVATE_COMMAND: &str = "/private";

/// Reserved contact name for the channel every client shares.
pub const GLOBAL_CONTACT: &str = "Global";

/// Name a client registers with when the user leaves it blank.
pub const FALLBACK_USERNAME: &str = "Guest";

const PRIVATE_FROM_LEAD: &str = "[Private from ";
const PRIVATE_TO_LEAD: &str = "[Private to ";
const PRIVATE_DELIMITER: &str = "]:";
const ROSTER_SEPARATOR: char = ',';
const NAME_FILLER: char = '_';
const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Trims a requested username and replaces embedded whitespace with `_`.
///
/// The result is empty when the input held nothing but whitespace.
pub fn normalize_username(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_whitespace() { NAME_FILLER } else { c })
        .collect()
}

/// Reads one line, without its terminator. `None` means the stream ended.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let len = line.trim_end_matches(LINE_ENDINGS).len();
    line.truncate(len);
    Ok(Some(line))
}

/// Writes `line` followed by a newline and flushes so peers see it promptly.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// A line received by the server from an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLine<'a> {
    Private { target: &'a str, body: &'a str },
    Global { body: &'a str },
}

impl<'a> ClientLine<'a> {
    /// Splits `/private <target> <body>`; anything else is a global body.
    ///
    /// Only the first two space-separated fields are structural, so the body
    /// keeps any spaces it contains. A private command without a target and
    /// a body is relayed as ordinary text.
    pub fn parse(line: &'a str) -> Self {
        let private = line
            .strip_prefix(PRIVATE_COMMAND)
            .and_then(|rest| rest.strip_prefix(' '))
            .and_then(|rest| rest.split_once(' '))
            .filter(|(target, _)| !target.is_empty());

        match private {
            Some((target, body)) => ClientLine::Private { target, body },
            None => ClientLine::Global { body: line },
        }
    }
}

/// A line produced by the server. `Display` renders the wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    Roster { names: Vec<String> },
    Notice { text: String },
    PrivateFrom { sender: String, body: String },
    PrivateTo { target: String, body: String },
    Relay { sender: String, body: String },
}

impl ServerLine {
    pub fn joined(username: &str) -> Self {
        Self::notice(format!("{username} joined."))
    }

    pub fn left(username: &str) -> Self {
        Self::notice(format!("{username} left."))
    }

    pub fn target_not_found(target: &str) -> Self {
        Self::notice(format!("User {target} not found."))
    }

    pub fn undeliverable(target: &str) -> Self {
        Self::notice(format!("Could not deliver to {target}."))
    }

    pub fn shutting_down() -> Self {
        Self::notice("Server shutting down.".to_string())
    }

    fn notice(text: String) -> Self {
        ServerLine::Notice { text }
    }
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Roster { names } => {
                f.write_str(ROSTER_PREFIX)?;
                for name in names {
                    write!(f, "{name}{ROSTER_SEPARATOR}")?;
                }
                Ok(())
            }
            ServerLine::Notice { text } => write!(f, "{NOTICE_PREFIX} {text}"),
            ServerLine::PrivateFrom { sender, body } => {
                write!(f, "{PRIVATE_FROM_LEAD}{sender}{PRIVATE_DELIMITER} {body}")
            }
            ServerLine::PrivateTo { target, body } => {
                write!(f, "{PRIVATE_TO_LEAD}{target}{PRIVATE_DELIMITER} {body}")
            }
            ServerLine::Relay { sender, body } => write!(f, "{sender}: {body}"),
        }
    }
}

/// What a client makes of one line received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    RosterUpdate { names: Vec<String> },
    PrivateIncoming { sender: String, body: String },
    PrivateEcho { target: String, body: String },
    /// `text` is the whole line, sentinel included.
    SystemNotice { text: String },
    GlobalMessage { text: String },
}

impl ServerEvent {
    /// Classifies a line. Every line decodes to exactly one event; anything
    /// unrecognised is a global message passed through verbatim.
    pub fn decode(line: &str) -> Self {
        let line = line.trim_end_matches(LINE_ENDINGS);

        if let Some(rest) = line.strip_prefix(ROSTER_PREFIX) {
            let names = rest
                .split(ROSTER_SEPARATOR)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
            return ServerEvent::RosterUpdate { names };
        }

        if let Some((sender, body)) = split_private(line, PRIVATE_FROM_LEAD) {
            return ServerEvent::PrivateIncoming {
                sender: sender.to_string(),
                body: body.to_string(),
            };
        }

        if let Some((target, body)) = split_private(line, PRIVATE_TO_LEAD) {
            return ServerEvent::PrivateEcho {
                target: target.to_string(),
                body: body.to_string(),
            };
        }

        if line.starts_with(NOTICE_PREFIX) {
            return ServerEvent::SystemNotice {
                text: line.to_string(),
            };
        }

        ServerEvent::GlobalMessage {
            text: line.to_string(),
        }
    }
}

fn split_private<'a>(line: &'a str, lead: &str) -> Option<(&'a str, &'a str)> {
    let (name, body) = line.strip_prefix(lead)?.split_once(PRIVATE_DELIMITER)?;
    Some((name, body.strip_prefix(' ').unwrap_or(body)))
}

/// Addressee of a conversation: the shared channel or a single user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Contact {
    Global,
    User(String),
}

impl From<&str> for Contact {
    fn from(name: &str) -> Self {
        if name == GLOBAL_CONTACT {
            Contact::Global
        } else {
            Contact::User(name.to_string())
        }
    }
}

impl From<String> for Contact {
    fn from(name: String) -> Self {
        if name == GLOBAL_CONTACT {
            Contact::Global
        } else {
            Contact::User(name)
        }
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contact::Global => f.write_str(GLOBAL_CONTACT),
            Contact::User(name) => f.write_str(name),
        }
    }
}

impl Serialize for Contact {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Encodes user input addressed to `contact`.
///
/// Returns `None` for empty or whitespace-only input, which is never sent.
pub fn compose(contact: &Contact, text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }

    match contact {
        Contact::Global => Some(text.to_string()),
        Contact::User(name) => Some(format!("{PRIVATE_COMMAND} {name} {text}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_roster_and_skips_empty_tokens() {
        assert_eq!(
            ServerEvent::decode("UPDATEUSERS:Alice,Bob,"),
            ServerEvent::RosterUpdate {
                names: vec!["Alice".into(), "Bob".into()]
            }
        );
        assert_eq!(
            ServerEvent::decode("UPDATEUSERS:"),
            ServerEvent::RosterUpdate { names: vec![] }
        );
        assert_eq!(
            ServerEvent::decode("UPDATEUSERS:,Carol,,\r\n"),
            ServerEvent::RosterUpdate {
                names: vec!["Carol".into()]
            }
        );
    }

    #[test]
    fn decodes_private_lines() {
        assert_eq!(
            ServerEvent::decode("[Private from Bob]: hi"),
            ServerEvent::PrivateIncoming {
                sender: "Bob".into(),
                body: "hi".into()
            }
        );
        assert_eq!(
            ServerEvent::decode("[Private to Alice]: see you ]: later"),
            ServerEvent::PrivateEcho {
                target: "Alice".into(),
                body: "see you ]: later".into()
            }
        );
    }

    #[test]
    fn private_lead_without_delimiter_is_global_text() {
        assert_eq!(
            ServerEvent::decode("[Private from Bob hi"),
            ServerEvent::GlobalMessage {
                text: "[Private from Bob hi".into()
            }
        );
    }

    #[test]
    fn notices_and_chat_pass_through_verbatim() {
        assert_eq!(
            ServerEvent::decode("Server: Alice joined."),
            ServerEvent::SystemNotice {
                text: "Server: Alice joined.".into()
            }
        );
        assert_eq!(
            ServerEvent::decode("Alice: Server: is down?"),
            ServerEvent::GlobalMessage {
                text: "Alice: Server: is down?".into()
            }
        );
    }

    #[test]
    fn server_lines_render_wire_format() {
        let roster = ServerLine::Roster {
            names: vec!["Alice".into(), "Bob".into()],
        };
        assert_eq!(roster.to_string(), "UPDATEUSERS:Alice,Bob,");
        assert_eq!(ServerLine::joined("Alice").to_string(), "Server: Alice joined.");
        assert_eq!(ServerLine::left("Alice").to_string(), "Server: Alice left.");
        assert_eq!(
            ServerLine::target_not_found("Carol").to_string(),
            "Server: User Carol not found."
        );
        assert_eq!(
            ServerLine::PrivateFrom {
                sender: "Bob".into(),
                body: "yo".into()
            }
            .to_string(),
            "[Private from Bob]: yo"
        );
        assert_eq!(
            ServerLine::Relay {
                sender: "Alice".into(),
                body: "hi".into()
            }
            .to_string(),
            "Alice: hi"
        );
    }

    #[test]
    fn encoded_server_lines_decode_to_matching_events() {
        let line = ServerLine::PrivateTo {
            target: "Bob".into(),
            body: "a b  c".into(),
        };
        assert_eq!(
            ServerEvent::decode(&line.to_string()),
            ServerEvent::PrivateEcho {
                target: "Bob".into(),
                body: "a b  c".into()
            }
        );
        assert!(matches!(
            ServerEvent::decode(&ServerLine::shutting_down().to_string()),
            ServerEvent::SystemNotice { .. }
        ));
    }

    #[test]
    fn parses_private_command() {
        assert_eq!(
            ClientLine::parse("/private Bob hello there"),
            ClientLine::Private {
                target: "Bob",
                body: "hello there"
            }
        );
        assert_eq!(
            ClientLine::parse("/private Bob "),
            ClientLine::Private {
                target: "Bob",
                body: ""
            }
        );
    }

    #[test]
    fn incomplete_private_command_is_global() {
        for line in ["/private Bob", "/private", "/privateBob hi", "/private  Bob hi"] {
            assert_eq!(ClientLine::parse(line), ClientLine::Global { body: line });
        }
    }

    #[test]
    fn normalizes_usernames() {
        assert_eq!(normalize_username("  Mary Jane \n"), "Mary_Jane");
        assert_eq!(normalize_username("a\tb"), "a_b");
        assert_eq!(normalize_username("   "), "");
    }

    #[test]
    fn compose_addresses_contact() {
        assert_eq!(compose(&Contact::Global, "hi all"), Some("hi all".into()));
        assert_eq!(
            compose(&Contact::from("Bob"), "see you soon"),
            Some("/private Bob see you soon".into())
        );
        assert_eq!(compose(&Contact::from("Bob"), "   "), None);
        assert_eq!(compose(&Contact::Global, ""), None);
    }

    #[test]
    fn contact_parses_reserved_global_name() {
        assert_eq!(Contact::from("Global"), Contact::Global);
        assert_eq!(Contact::from("global"), Contact::User("global".into()));
        assert_eq!(Contact::from("Bob".to_string()).to_string(), "Bob");
        assert_eq!(
            serde_json::to_string(&Contact::Global).expect("serialize contact"),
            "\"Global\""
        );
    }

    #[tokio::test]
    async fn line_framing_strips_terminators() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        write_line(&mut writer, "Alice: hi").await.expect("write line");
        writer.write_all(b"dos line\r\n").await.expect("write raw");
        drop(writer);

        assert_eq!(
            read_line(&mut reader).await.expect("read"),
            Some("Alice: hi".to_string())
        );
        assert_eq!(
            read_line(&mut reader).await.expect("read"),
            Some("dos line".to_string())
        );
        assert_eq!(read_line(&mut reader).await.expect("read"), None);
    }
}
