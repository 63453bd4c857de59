//! OS clipboard via arboard. Text only.
//!
//! On X11 and Wayland the clipboard content is served by the process that
//! set it, for as long as its `arboard::Clipboard` lives. One instance is
//! therefore owned by a dedicated thread for the provider's whole lifetime,
//! and reads and writes are sent to it over a channel.

use std::sync::mpsc;
use std::thread;

use async_trait::async_trait;
use farhand_types::{ClipboardContent, ClipboardFormat};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::ClipboardError;
use crate::ClipboardProvider;

type Reply<T> = oneshot::Sender<Result<T, ClipboardError>>;

enum Request {
    Read(Reply<Option<ClipboardContent>>),
    Write(String, Reply<()>),
}

/// Text access the clipboard thread needs from its backend.
trait TextStore {
    fn get_text(&mut self) -> Result<String, arboard::Error>;
    fn set_text(&mut self, text: String) -> Result<(), arboard::Error>;
}

impl TextStore for arboard::Clipboard {
    fn get_text(&mut self) -> Result<String, arboard::Error> {
        arboard::Clipboard::get_text(self)
    }

    fn set_text(&mut self, text: String) -> Result<(), arboard::Error> {
        arboard::Clipboard::set_text(self, text)
    }
}

/// The desktop clipboard.
///
/// The owning thread stops once the provider is dropped. If the OS clipboard
/// cannot be opened every request fails with [`ClipboardError::Unavailable`].
#[derive(Debug)]
pub struct SystemClipboard {
    requests: mpsc::Sender<Request>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::spawn(|| arboard::Clipboard::new().map_err(map_error))
    }

    fn spawn<S, F>(open: F) -> Self
    where
        S: TextStore,
        F: FnOnce() -> Result<S, ClipboardError> + Send + 'static,
    {
        let (requests, inbox) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("farhand-clipboard".into())
            .spawn(move || match open() {
                Ok(mut store) => serve(&mut store, inbox),
                Err(e) => {
                    warn!(error = %e, "system clipboard unavailable");
                    refuse(inbox);
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start clipboard thread");
        }
        Self { requests }
    }

    async fn ask<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T, ClipboardError> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(request(reply))
            .map_err(|_| ClipboardError::Unavailable)?;
        answer.await.map_err(|_| ClipboardError::Unavailable)?
    }
}

impl Default for SystemClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Read(_) => f.write_str("Read"),
            Request::Write(text, _) => write!(f, "Write({} bytes)", text.len()),
        }
    }
}

fn serve<S: TextStore>(store: &mut S, inbox: mpsc::Receiver<Request>) {
    for request in inbox {
        match request {
            Request::Read(reply) => {
                let result = match store.get_text() {
                    Ok(text) if text.is_empty() => Ok(None),
                    Ok(text) => Ok(Some(ClipboardContent::text(text))),
                    Err(arboard::Error::ContentNotAvailable) => Ok(None),
                    Err(e) => Err(map_error(e)),
                };
                let _ = reply.send(result);
            }
            Request::Write(text, reply) => {
                let _ = reply.send(store.set_text(text).map_err(map_error));
            }
        }
    }
    debug!("clipboard thread exiting");
}

fn refuse(inbox: mpsc::Receiver<Request>) {
    for request in inbox {
        match request {
            Request::Read(reply) => {
                let _ = reply.send(Err(ClipboardError::Unavailable));
            }
            Request::Write(_, reply) => {
                let _ = reply.send(Err(ClipboardError::Unavailable));
            }
        }
    }
}

fn map_error(e: arboard::Error) -> ClipboardError {
    match e {
        arboard::Error::ClipboardOccupied => ClipboardError::Busy,
        arboard::Error::ContentNotAvailable | arboard::Error::ConversionFailure => {
            ClipboardError::FormatUnavailable
        }
        arboard::Error::ClipboardNotSupported => ClipboardError::Unavailable,
        other => ClipboardError::Other(anyhow::anyhow!(other.to_string())),
    }
}

#[async_trait]
impl ClipboardProvider for SystemClipboard {
    async fn read(&mut self) -> Result<Option<ClipboardContent>, ClipboardError> {
        self.ask(Request::Read).await
    }

    async fn write(&mut self, content: ClipboardContent) -> Result<(), ClipboardError> {
        if content.format != ClipboardFormat::PlainText {
            return Err(ClipboardError::FormatUnavailable);
        }
        let text = content
            .as_text()
            .ok_or(ClipboardError::FormatUnavailable)?
            .to_string();
        debug!(size = text.len(), "writing system clipboard");
        self.ask(|reply| Request::Write(text, reply)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct FakeStore {
        text: Option<String>,
        occupied: bool,
    }

    impl TextStore for FakeStore {
        fn get_text(&mut self) -> Result<String, arboard::Error> {
            if self.occupied {
                return Err(arboard::Error::ClipboardOccupied);
            }
            self.text.clone().ok_or(arboard::Error::ContentNotAvailable)
        }

        fn set_text(&mut self, text: String) -> Result<(), arboard::Error> {
            self.text = Some(text);
            Ok(())
        }
    }

    fn fake(opened: Arc<AtomicUsize>, occupied: bool) -> SystemClipboard {
        SystemClipboard::spawn(move || {
            opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeStore { text: None, occupied })
        })
    }

    #[tokio::test]
    async fn one_backend_serves_every_request() {
        let opened = Arc::new(AtomicUsize::new(0));
        let mut clipboard = fake(opened.clone(), false);

        assert!(clipboard.read().await.unwrap().is_none());
        clipboard.write(ClipboardContent::text("kept")).await.unwrap();
        let read = clipboard.read().await.unwrap().unwrap();
        assert_eq!(read.as_text(), Some("kept"));
        clipboard.write(ClipboardContent::text("again")).await.unwrap();
        let read = clipboard.read().await.unwrap().unwrap();
        assert_eq!(read.as_text(), Some("again"));

        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn occupied_clipboard_reads_as_busy() {
        let mut clipboard = fake(Arc::new(AtomicUsize::new(0)), true);
        assert!(clipboard.read().await.unwrap_err().is_busy());
    }

    #[tokio::test]
    async fn unopenable_clipboard_is_unavailable() {
        let mut clipboard =
            SystemClipboard::spawn(|| Err::<FakeStore, _>(ClipboardError::Unavailable));
        assert!(matches!(
            clipboard.read().await,
            Err(ClipboardError::Unavailable)
        ));
        assert!(matches!(
            clipboard.write(ClipboardContent::text("x")).await,
            Err(ClipboardError::Unavailable)
        ));
    }

    #[test]
    fn arboard_errors_map_to_clipboard_errors() {
        assert!(map_error(arboard::Error::ClipboardOccupied).is_busy());
        assert!(matches!(
            map_error(arboard::Error::ConversionFailure),
            ClipboardError::FormatUnavailable
        ));
        assert!(matches!(
            map_error(arboard::Error::ClipboardNotSupported),
            ClipboardError::Unavailable
        ));
    }
}
