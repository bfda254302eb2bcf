use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedWriteHalf},
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    conversation::{ConversationBuffer, ConversationStore, ViewUpdate},
    protocol::{Contact, ServerEvent, compose, read_line, write_line},
};

/// One client connection: a reader task feeding the conversation store, and
/// a writer used for user sends.
pub struct ClientSession<W> {
    writer: W,
    username: String,
    store: Arc<Mutex<ConversationStore>>,
}

/// Resolves when the connection is lost. It never resolves successfully.
pub type ReaderTask = JoinHandle<Result<()>>;

/// Connects to `host:port` and registers as `username`.
pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    updates: mpsc::UnboundedSender<ViewUpdate>,
) -> Result<(ClientSession<OwnedWriteHalf>, ReaderTask)> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to {host}:{port}"))?;

    info!("connected to {host}:{port}");

    let (reader, writer) = stream.into_split();
    ClientSession::start(BufReader::new(reader), writer, username, updates).await
}

impl<W> ClientSession<W>
where
    W: AsyncWrite + Unpin,
{
    /// Sends the registration line and spawns the reader task.
    pub async fn start<R>(
        reader: R,
        mut writer: W,
        username: &str,
        updates: mpsc::UnboundedSender<ViewUpdate>,
    ) -> Result<(Self, ReaderTask)>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        write_line(&mut writer, username)
            .await
            .context("failed to send username")?;

        let store = Arc::new(Mutex::new(ConversationStore::new(username, updates)));
        let reader_task = tokio::spawn(read_events(reader, Arc::clone(&store)));

        let session = Self {
            writer,
            username: username.to_string(),
            store,
        };
        Ok((session, reader_task))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        Arc::clone(&self.store)
    }

    /// Sends `text` to the selected contact. Returns `false` when the input
    /// was blank and nothing was sent.
    ///
    /// Global messages are not echoed locally; they show up when the server
    /// relays them back.
    pub async fn send(&mut self, text: &str) -> Result<bool> {
        let contact = self.store.lock().await.selected().clone();
        self.send_to(&contact, text).await
    }

    pub async fn send_to(&mut self, contact: &Contact, text: &str) -> Result<bool> {
        let Some(line) = compose(contact, text) else {
            return Ok(false);
        };

        write_line(&mut self.writer, &line)
            .await
            .context("failed to send message")?;
        Ok(true)
    }

    /// Selects `contact` and returns a copy of its buffer.
    pub async fn select(&self, contact: Contact) -> ConversationBuffer {
        self.store.lock().await.select(contact).clone()
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.store.lock().await.contacts().to_vec()
    }

    pub async fn shutdown(mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shutdown client writer cleanly");
        }
    }
}

async fn read_events<R>(mut reader: R, store: Arc<Mutex<ConversationStore>>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(line) = read_line(&mut reader)
            .await
            .context("lost connection to server")?
        else {
            bail!("server closed the connection");
        };

        let event = ServerEvent::decode(&line);
        debug!(?event, "received");
        store.lock().await.dispatch(event);
    }
}
