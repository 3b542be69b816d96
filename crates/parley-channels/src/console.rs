use crate::channel::{
    Channel, InboundMessage, MediaPayload, MediaSource, OutboundMessage, TransportEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{ParleyError, ParleyResult};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

type Input = Box<dyn BufRead + Send>;

/// Local terminal channel for trying the relay without a chat account.
///
/// Every stdin line becomes a message from a single sender. A line of the
/// form `/image <path> [caption]` attaches a local file. Replies are printed
/// to stdout.
pub struct ConsoleChannel {
    sender_id: String,
    next_id: AtomicU64,
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: Option<mpsc::Receiver<TransportEvent>>,
    shutdown: watch::Sender<bool>,
    /// Defaults to stdin; taken by the first [`Channel::run`].
    input: Mutex<Option<Input>>,
}

/// A file on local disk, read when the relay asks for it.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    mime_type: String,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mime_type = mime_for_path(&path).to_string();
        Self { path, mime_type }
    }
}

#[async_trait]
impl MediaSource for LocalFile {
    async fn fetch(&self) -> ParleyResult<Option<MediaPayload>> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            ParleyError::Media(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        Ok(Some(MediaPayload::new(data, self.mime_type.clone())))
    }
}

/// Best-effort MIME type from a file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "ogg" | "oga" => "audio/ogg",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

impl ConsoleChannel {
    pub fn new(sender_id: impl Into<String>, event_buffer: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let (shutdown, _) = watch::channel(false);
        Self {
            sender_id: sender_id.into(),
            next_id: AtomicU64::new(1),
            event_tx,
            event_rx: Some(event_rx),
            shutdown,
            input: Mutex::new(None),
        }
    }

    /// Reads messages from `input` instead of stdin.
    pub fn with_input(self, input: impl BufRead + Send + 'static) -> Self {
        *self.input.lock() = Some(Box::new(input));
        self
    }

    /// Take the receiving half of the event channel.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.event_rx.take()
    }

    /// Turns one input line into an inbound message.
    pub fn parse_line(&self, line: &str) -> InboundMessage {
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(rest) = line.strip_prefix("/image ") {
            let mut split = rest.trim().splitn(2, ' ');
            let path = split.next().unwrap_or_default();
            let caption = split
                .next()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            return InboundMessage::text(message_id, &self.sender_id, "")
                .with_body(caption)
                .with_media(Arc::new(LocalFile::new(path)));
        }

        let body = (!line.is_empty()).then(|| line.to_string());
        InboundMessage::text(message_id, &self.sender_id, "").with_body(body)
    }

    async fn print(&self, text: &str) -> ParleyResult<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

/// Reads lines on a dedicated OS thread.
///
/// A read blocked on a terminal cannot be cancelled. Keeping it off the
/// runtime's blocking pool lets the runtime shut down while the thread is
/// still parked; the thread exits at the next line or EOF.
fn spawn_line_reader(input: Input) -> io::Result<mpsc::Receiver<io::Result<String>>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("parley-console-input".into())
        .spawn(move || {
            for line in input.lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
            debug!("Console reader thread finished");
        })?;
    Ok(rx)
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn run(&self) -> ParleyResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        if self.event_tx.send(TransportEvent::Ready).await.is_err() {
            return Ok(());
        }

        let input = self
            .input
            .lock()
            .take()
            .unwrap_or_else(|| Box::new(BufReader::new(io::stdin())));
        let mut lines = spawn_line_reader(input)?;

        while !*shutdown.borrow() {
            let line = tokio::select! {
                _ = shutdown.changed() => break,
                line = lines.recv() => line,
            };
            // EOF on stdin ends the session like a disconnect would.
            let Some(line) = line else { break };
            let line = line?;

            let message = self.parse_line(&line);
            if self
                .event_tx
                .send(TransportEvent::MessageReceived(message))
                .await
                .is_err()
            {
                break;
            }
        }

        info!("Console input closed");
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> ParleyResult<()> {
        self.print(&format!("< {}", message.text)).await
    }

    async fn start_typing(&self, _chat_id: &str) -> ParleyResult<()> {
        self.print("  (typing...)").await
    }

    async fn clear_typing(&self, _chat_id: &str) -> ParleyResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> ParleyResult<()> {
        self.shutdown.send_replace(true);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::Duration;

    /// Input whose reads block until the test drops the gate's sender.
    struct Gate(std::sync::mpsc::Receiver<()>);

    impl Read for Gate {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[tokio::test]
    async fn input_lines_become_messages_until_eof() {
        let mut channel = ConsoleChannel::new("console", 8)
            .with_input(io::Cursor::new("Hello\n/image ./cat.png a cat\n"));
        let mut events = channel.take_event_receiver().unwrap();

        channel.run().await.unwrap();

        assert!(matches!(events.recv().await, Some(TransportEvent::Ready)));
        let Some(TransportEvent::MessageReceived(first)) = events.recv().await else {
            panic!("expected first message");
        };
        assert_eq!(first.body.as_deref(), Some("Hello"));
        let Some(TransportEvent::MessageReceived(second)) = events.recv().await else {
            panic!("expected second message");
        };
        assert!(second.has_media);
    }

    #[test]
    fn runtime_shutdown_does_not_wait_for_blocked_input() {
        let (_gate_open, gate) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let mut channel =
                    ConsoleChannel::new("console", 4).with_input(BufReader::new(Gate(gate)));
                let mut events = channel.take_event_receiver().unwrap();
                let channel = Arc::new(channel);

                let task = tokio::spawn({
                    let channel = channel.clone();
                    async move { channel.run().await }
                });
                assert!(matches!(events.recv().await, Some(TransportEvent::Ready)));

                channel.shutdown().await.unwrap();
                task.await.unwrap().unwrap();
            });
            drop(runtime);
            done_tx.send(()).unwrap();
        });

        done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("runtime shutdown waited on a blocked console read");
    }

    #[test]
    fn plain_line_is_text_message() {
        let channel = ConsoleChannel::new("console", 4);
        let msg = channel.parse_line("Hello there");
        assert_eq!(msg.sender_id, "console");
        assert_eq!(msg.body.as_deref(), Some("Hello there"));
        assert!(!msg.has_media);
    }

    #[test]
    fn blank_line_has_no_body() {
        let channel = ConsoleChannel::new("console", 4);
        let msg = channel.parse_line("");
        assert!(msg.body.is_none());
        assert!(!msg.has_media);
    }

    #[test]
    fn image_command_attaches_file_and_caption() {
        let channel = ConsoleChannel::new("console", 4);
        let msg = channel.parse_line("/image ./cat.png what is this");
        assert!(msg.has_media);
        assert_eq!(msg.body.as_deref(), Some("what is this"));

        let bare = channel.parse_line("/image ./cat.png");
        assert!(bare.has_media);
        assert!(bare.body.is_none());
        assert_ne!(msg.message_id, bare.message_id);
    }

    #[test]
    fn mime_guessing() {
        assert_eq!(mime_for_path(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("b.png")), "image/png");
        assert_eq!(mime_for_path(Path::new("c.pdf")), "application/pdf");
        assert_eq!(mime_for_path(Path::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn local_file_reads_bytes() {
        let mut path = std::env::temp_dir();
        path.push(format!("parley-console-{}.png", std::process::id()));
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0x89, b'P', b'N', b'G'])
            .unwrap();

        let payload = LocalFile::new(&path).fetch().await.unwrap().unwrap();
        assert_eq!(payload.mime_type, "image/png");
        assert_eq!(payload.data, vec![0x89, b'P', b'N', b'G']);
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_media_error() {
        let err = LocalFile::new("/definitely/not/here.png").fetch().await;
        assert!(matches!(err, Err(ParleyError::Media(_))));
    }
}
