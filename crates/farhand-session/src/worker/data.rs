//! Data channel: fixed-size input records, client to server only.

use std::sync::{Arc, Mutex, PoisonError};

use farhand_input::InputSink;
use farhand_protocol::{
    decode_event, encode_event, ChannelKind, ProtocolError, SecureReader, SecureWriter, RECORD_LEN,
};
use farhand_types::InputEvent;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{report, ChannelOrigin, Failures, Ready};
use crate::error::SessionError;
use crate::queue::{InputEventQueue, QueueItem};
use crate::residual::ResidualStateTracker;
use crate::state::SessionState;

/// Client side: drain the queue onto the data channel.
pub(crate) async fn run_sender(
    origin: ChannelOrigin,
    queue: Arc<InputEventQueue>,
    ready: Ready,
    failures: Failures,
    cancel: CancellationToken,
) {
    let channel = match origin.open(ChannelKind::Data, &cancel).await {
        Ok(channel) => channel,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    debug!("data channel up");

    let (_reader, writer) = channel.into_split();
    if let Err(e) = send_events(writer, &queue, &cancel).await {
        report(&failures, e).await;
    }
}

async fn send_events<W>(
    mut writer: SecureWriter<W>,
    queue: &InputEventQueue,
    cancel: &CancellationToken,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match queue.get().await {
            QueueItem::Event(event) => {
                let record = encode_event(&event);
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    sent = writer.send(&record) => sent?,
                }
                trace!(?event, "sent input record");
            }
            QueueItem::Lifecycle(SessionState::Closed) => {
                let _ = writer.shutdown().await;
                debug!("data sender finished");
                return Ok(());
            }
            QueueItem::Lifecycle(state) => debug!(%state, "data sender paused"),
        }
    }
}

/// Move events from the local source into the queue.
///
/// Events refused by the queue (suspended or closed) are dropped.
pub(crate) async fn pump(mut events: mpsc::Receiver<InputEvent>, queue: Arc<InputEventQueue>) {
    while let Some(event) = events.recv().await {
        if !queue.put(event).await && queue.is_closed() {
            break;
        }
    }
    trace!("input pump finished");
}

/// Server side: read records into the queue and inject them.
pub(crate) async fn run_receiver(
    origin: ChannelOrigin,
    queue: Arc<InputEventQueue>,
    residual: Arc<Mutex<ResidualStateTracker>>,
    sink: Arc<dyn InputSink>,
    ready: Ready,
    failures: Failures,
    cancel: CancellationToken,
) {
    let channel = match origin.open(ChannelKind::Data, &cancel).await {
        Ok(channel) => channel,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    debug!("data channel up");

    let (reader, _writer) = channel.into_split();
    let inbound = async {
        if let Err(e) = receive_events(reader, &queue, &cancel).await {
            report(&failures, e).await;
        }
    };
    tokio::join!(inbound, inject_events(&queue, &residual, sink.as_ref()));
}

async fn receive_events<R>(
    mut reader: SecureReader<R>,
    queue: &InputEventQueue,
    cancel: &CancellationToken,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut record = [0u8; RECORD_LEN];
    loop {
        let more = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            more = read_record(&mut reader, &mut record) => more?,
        };
        if !more {
            debug!("data channel closed by peer");
            return Ok(());
        }
        match decode_event(&record) {
            Ok(event) => {
                if !queue.put(event).await {
                    trace!(?event, "dropped input record while paused");
                }
            }
            Err(e) => warn!(error = %e, "skipping undecodable input record"),
        }
    }
}

/// Read one record. `false` on a clean end of stream between records.
async fn read_record<R>(
    reader: &mut SecureReader<R>,
    record: &mut [u8; RECORD_LEN],
) -> Result<bool, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    if reader.receive(&mut record[..1]).await? == 0 {
        return Ok(false);
    }
    reader.receive_exact(&mut record[1..]).await?;
    Ok(true)
}

async fn inject_events(
    queue: &InputEventQueue,
    residual: &Mutex<ResidualStateTracker>,
    sink: &dyn InputSink,
) {
    loop {
        match queue.get().await {
            QueueItem::Event(event) => {
                lock(residual).observe(&event);
                if let Err(e) = sink.inject(event).await {
                    warn!(error = %e, ?event, "failed to inject event");
                }
            }
            QueueItem::Lifecycle(state) => {
                release_held(residual, sink).await;
                if state == SessionState::Closed {
                    debug!("injector finished");
                    return;
                }
            }
        }
    }
}

/// Inject a release for every key and button still held.
pub(crate) async fn release_held(residual: &Mutex<ResidualStateTracker>, sink: &dyn InputSink) {
    let releases = lock(residual).flush();
    if releases.is_empty() {
        return;
    }
    debug!(count = releases.len(), "releasing held input");
    for event in releases {
        if let Err(e) = sink.inject(event).await {
            warn!(error = %e, ?event, "failed to inject release");
        }
    }
}

fn lock(residual: &Mutex<ResidualStateTracker>) -> std::sync::MutexGuard<'_, ResidualStateTracker> {
    residual.lock().unwrap_or_else(PoisonError::into_inner)
}
