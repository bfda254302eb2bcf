//! Line-oriented terminal front end for [`ClientSession`].
//!
//! Stdin commands: `/to <contact>` switches conversation, `/contacts` lists
//! who is online, `/quit` leaves. Everything else is sent to the selected
//! contact. View updates are printed on stdout as text or JSON lines.

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::tcp::OwnedWriteHalf,
    select,
    sync::mpsc,
};
use tracing::warn;

use crate::{
    cli::{ConnectArgs, OutputFormat},
    client::{self, ClientSession, ReaderTask},
    conversation::ViewUpdate,
    protocol::{Contact, FALLBACK_USERNAME, normalize_username},
};

/// A line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input<'a> {
    Select(Contact),
    ListContacts,
    Quit,
    Message(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("/quit") {
            return Input::Quit;
        }
        if trimmed.eq_ignore_ascii_case("/contacts") {
            return Input::ListContacts;
        }
        match trimmed.strip_prefix("/to ").map(str::trim) {
            Some(name) if !name.is_empty() => Input::Select(Contact::from(name)),
            _ => Input::Message(line),
        }
    }
}

pub async fn run(args: ConnectArgs) -> Result<()> {
    let username = match normalize_username(&args.username) {
        name if name.is_empty() => FALLBACK_USERNAME.to_string(),
        name => name,
    };

    let (updates, view) = mpsc::unbounded_channel();
    let (mut session, mut reader_task) =
        client::connect(&args.host, args.port, &username, updates).await?;
    if args.format == OutputFormat::Text {
        write_stdout(&format!("*** connected as {}", session.username())).await?;
    }
    let renderer = tokio::spawn(render_updates(view, args.format));

    let outcome = run_input_loop(&mut session, &mut reader_task).await;

    reader_task.abort();
    session.shutdown().await;
    if let Err(error) = renderer.await {
        warn!(?error, "renderer task failed");
    }

    if let Err(error) = &outcome {
        write_stderr(&format!("!!! connection lost: {error:#}")).await?;
    }
    outcome
}

async fn run_input_loop(
    session: &mut ClientSession<OwnedWriteHalf>,
    reader_task: &mut ReaderTask,
) -> Result<()> {
    let mut stdin = BufReader::new(io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            bytes_read = stdin.read_line(&mut input) => {
                if bytes_read.context("failed to read stdin")? == 0 {
                    return Ok(());
                }
                if !handle_input(session, input.trim_end_matches(['\n', '\r'])).await? {
                    return Ok(());
                }
            }
            finished = &mut *reader_task => {
                return Err(match finished {
                    Ok(Ok(())) => anyhow!("server closed the connection"),
                    Ok(Err(error)) => error,
                    Err(error) => anyhow!(error).context("reader task failed"),
                });
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                return Ok(());
            }
        }
    }
}

/// Returns `false` once the user asked to leave.
async fn handle_input(session: &mut ClientSession<OwnedWriteHalf>, line: &str) -> Result<bool> {
    match Input::parse(line) {
        Input::Quit => {
            write_stdout("*** leaving chat").await?;
            Ok(false)
        }
        Input::ListContacts => {
            let contacts = session.contacts().await;
            write_stdout(&format!("*** contacts: {}", join_contacts(&contacts))).await?;
            Ok(true)
        }
        Input::Select(contact) => {
            // The store pushes the selection and its buffer to the renderer.
            session.select(contact).await;
            Ok(true)
        }
        Input::Message(text) => {
            session.send(text).await?;
            Ok(true)
        }
    }
}

async fn render_updates(mut view: mpsc::UnboundedReceiver<ViewUpdate>, format: OutputFormat) {
    while let Some(update) = view.recv().await {
        if let Err(error) = render_update(&update, format).await {
            warn!(?error, "failed to render update");
            return;
        }
    }
}

async fn render_update(update: &ViewUpdate, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let encoded = serde_json::to_string(update).context("failed to encode update")?;
            write_stdout(&encoded).await?;
        }
        OutputFormat::Text => write_stdout(&render_text(update)).await?,
    }
    Ok(())
}

fn render_text(update: &ViewUpdate) -> String {
    match update {
        ViewUpdate::ContactsChanged { contacts } => {
            format!("*** contacts: {}", join_contacts(contacts))
        }
        ViewUpdate::SelectionChanged { contact, lines } => {
            let mut text = format!("*** chatting with {contact}");
            for line in lines {
                text.push('\n');
                text.push_str(line);
            }
            text
        }
        ViewUpdate::LineAppended { line, .. } => line.clone(),
    }
}

fn join_contacts(contacts: &[Contact]) -> String {
    contacts
        .iter()
        .map(Contact::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
