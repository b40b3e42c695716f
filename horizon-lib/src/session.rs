//! Transport session: link lifecycle, single-writer sends, notification
//! reassembly and request/response correlation.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──open──▶ Connecting ──MtuChanged + NotificationsEnabled──▶ Ready
//!                             │                                               │
//!                             └──────────────── Disconnected ─────────────────┴──▶ Closed
//! ```
//!
//! Each [`LinkEvent`] has one transition method on the shared state, driven
//! by a task that drains the transport's event channel. `Closed` is terminal.
//!
//! # Locking
//!
//! Responses carry no request identifier, so correlation is keyed only on the
//! expected command. At most one response may therefore be awaited at a time.
//! Issuing commands goes through a [`CommandGuard`], which holds the
//! command-level lock; a narrower write lock keeps a single write in flight.

use crate::command::Command;
use crate::constants::*;
use crate::error::LinkError;
use crate::frame::Frame;
use crate::reassembly::ReassemblyBuffer;
use crate::transport::{LinkEvent, Transport};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Closed,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transfer unit requested during the handshake.
    pub mtu: u16,
    /// Time allowed for the handshake to reach `Ready`.
    pub connect_timeout: Duration,
    /// Write acknowledgement timeout.
    pub write_timeout: Duration,
    /// Default time to wait for a correlated response.
    pub response_timeout: Duration,
    /// Bound of the notification reassembly buffer.
    pub reassembly_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            reassembly_capacity: DEFAULT_REASSEMBLY_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_reassembly_capacity(mut self, capacity: usize) -> Self {
        self.reassembly_capacity = capacity.max(MAX_FRAME_SIZE);
        self
    }
}

/// Counters from the reassembly path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStats {
    pub buffered: usize,
    pub dropped_bytes: usize,
    pub resyncs: usize,
}

struct PendingRequest {
    expected: Command,
    deadline: Instant,
    completion: oneshot::Sender<Result<Bytes, LinkError>>,
}

struct LinkState {
    buffer: ReassemblyBuffer,
    pending: Option<PendingRequest>,
    mtu: Option<u16>,
    notifications: bool,
}

/// State shared between the session handle and its event task.
struct Shared {
    state: watch::Sender<SessionState>,
    link: Mutex<LinkState>,
}

impl Shared {
    fn new(reassembly_capacity: usize) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            state,
            link: Mutex::new(LinkState {
                buffer: ReassemblyBuffer::new(reassembly_capacity),
                pending: None,
                mtu: None,
                notifications: false,
            }),
        }
    }

    fn link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => self.on_connected(),
            LinkEvent::MtuChanged(mtu) => self.on_mtu_changed(mtu),
            LinkEvent::NotificationsEnabled => self.on_notifications_enabled(),
            LinkEvent::Notification(data) => self.on_notification(&data),
            LinkEvent::Disconnected => self.on_disconnected(),
        }
    }

    fn on_connecting(&self) {
        let mut link = self.link();
        link.mtu = None;
        link.notifications = false;
        self.state.send_replace(SessionState::Connecting);
        info!("Connecting");
    }

    fn on_connected(&self) {
        debug!("Link layer connected, waiting for handshake");
    }

    fn on_mtu_changed(&self, mtu: u16) {
        if (mtu as usize) < MAX_FRAME_SIZE {
            warn!(mtu, "Negotiated transfer unit is below the maximum frame size");
        } else {
            debug!(mtu, "Transfer unit negotiated");
        }
        let mut link = self.link();
        link.mtu = Some(mtu);
        self.promote_if_ready(&link);
    }

    fn on_notifications_enabled(&self) {
        debug!("Notifications enabled");
        let mut link = self.link();
        link.notifications = true;
        self.promote_if_ready(&link);
    }

    fn promote_if_ready(&self, link: &LinkState) {
        if self.current() == SessionState::Connecting && link.mtu.is_some() && link.notifications {
            self.state.send_replace(SessionState::Ready);
            info!(mtu = link.mtu, "Session ready");
        }
    }

    fn on_notification(&self, data: &[u8]) {
        let mut link = self.link();
        link.buffer.push(data);
        while let Some(frame) = link.buffer.next_frame() {
            Self::dispatch(&mut link, frame);
        }
    }

    /// Resolve the pending request with `frame` if it is the awaited one.
    /// Anything else is discarded.
    fn dispatch(link: &mut LinkState, frame: Frame) {
        debug!(
            command = ?frame.command,
            len = frame.payload.len(),
            payload = hex::encode(&frame.payload),
            "Frame received"
        );
        match link.pending.take() {
            Some(pending) if pending.expected == frame.command => {
                let outcome = if Instant::now() > pending.deadline {
                    debug!(command = ?frame.command, "Response arrived after the deadline");
                    Err(LinkError::Timeout)
                } else {
                    Ok(frame.payload)
                };
                let _ = pending.completion.send(outcome);
            }
            Some(pending) => {
                debug!(
                    command = ?frame.command,
                    awaiting = ?pending.expected,
                    "Discarding frame that does not match the awaited response"
                );
                link.pending = Some(pending);
            }
            None => {
                debug!(command = ?frame.command, "Discarding unsolicited frame");
            }
        }
    }

    fn on_disconnected(&self) {
        let previous = self.state.send_replace(SessionState::Closed);
        let mut link = self.link();
        if let Some(pending) = link.pending.take() {
            warn!(awaiting = ?pending.expected, "Failing outstanding request, link lost");
            let _ = pending.completion.send(Err(LinkError::LinkLost));
        }
        link.buffer.clear();
        if previous != SessionState::Closed {
            info!(previous = %previous, "Session closed");
        }
    }

    fn ensure_ready(&self) -> Result<(), LinkError> {
        match self.current() {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(LinkError::LinkLost),
            SessionState::Disconnected | SessionState::Connecting => Err(LinkError::NotReady),
        }
    }

    /// Claim the single pending-request slot.
    fn register(
        &self,
        expected: Command,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<Result<Bytes, LinkError>>, LinkError> {
        self.ensure_ready()?;
        let mut link = self.link();
        if let Some(outstanding) = &link.pending {
            return Err(LinkError::ProtocolViolation {
                outstanding: outstanding.expected,
            });
        }
        let (completion, receiver) = oneshot::channel();
        link.pending = Some(PendingRequest {
            expected,
            deadline,
            completion,
        });
        Ok(receiver)
    }

    /// Move the deadline of the outstanding request, if any.
    fn extend_deadline(&self, deadline: Instant) {
        if let Some(pending) = self.link().pending.as_mut() {
            pending.deadline = deadline;
        }
    }

    fn release(&self) {
        self.link().pending = None;
    }

    fn stats(&self) -> LinkStats {
        let link = self.link();
        LinkStats {
            buffered: link.buffer.len(),
            dropped_bytes: link.buffer.dropped_bytes(),
            resyncs: link.buffer.resync_count(),
        }
    }
}

/// Releases the pending slot when a wait ends for any reason, including
/// the waiting future being dropped.
struct PendingSlot<'a> {
    shared: &'a Shared,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.shared.release();
    }
}

async fn run_event_loop(mut events: mpsc::UnboundedReceiver<LinkEvent>, shared: Arc<Shared>) {
    while let Some(event) = events.recv().await {
        let lost = event == LinkEvent::Disconnected;
        shared.handle_event(event);
        if lost {
            return;
        }
    }
    debug!("Transport event channel closed");
    shared.on_disconnected();
}

/// A connected session over a [`Transport`].
pub struct Session<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    shared: Arc<Shared>,
    command_lock: tokio::sync::Mutex<()>,
    write_lock: tokio::sync::Mutex<()>,
    events_task: JoinHandle<()>,
}

impl<T: Transport> Session<T> {
    /// Connect and run the handshake. Returns once the session is `Ready`.
    pub async fn open(transport: Arc<T>, config: SessionConfig) -> Result<Self, LinkError> {
        let shared = Arc::new(Shared::new(config.reassembly_capacity));
        shared.on_connecting();

        let events = match transport.connect().await {
            Ok(events) => events,
            Err(e) => {
                shared.on_disconnected();
                return Err(e);
            }
        };
        let events_task = tokio::spawn(run_event_loop(events, shared.clone()));

        let session = Self {
            transport,
            config,
            shared,
            command_lock: tokio::sync::Mutex::new(()),
            write_lock: tokio::sync::Mutex::new(()),
            events_task,
        };

        if let Err(e) = session.handshake().await {
            warn!(error = %e, "Handshake failed");
            let _ = session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn handshake(&self) -> Result<(), LinkError> {
        let mut state = self.shared.state.subscribe();
        self.transport.request_mtu(self.config.mtu).await?;
        self.transport.enable_notifications().await?;

        let settled = tokio::time::timeout(
            self.config.connect_timeout,
            state.wait_for(|s| matches!(s, SessionState::Ready | SessionState::Closed)),
        )
        .await;
        match settled {
            Err(_) => Err(LinkError::Timeout),
            Ok(Err(_)) => Err(LinkError::LinkLost),
            Ok(Ok(reached)) if *reached == SessionState::Ready => Ok(()),
            Ok(Ok(_)) => Err(LinkError::LinkLost),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.current()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Negotiated transfer unit, once known
    pub fn mtu(&self) -> Option<u16> {
        self.shared.link().mtu
    }

    pub fn stats(&self) -> LinkStats {
        self.shared.stats()
    }

    /// Take the command-level lock. Hold the guard across every frame of a
    /// multi-frame sequence; dropping it releases the session.
    pub async fn lock(&self) -> CommandGuard<'_, T> {
        let lock = self.command_lock.lock().await;
        CommandGuard {
            session: self,
            _lock: lock,
        }
    }

    /// Send one frame with no response expected.
    pub async fn send(&self, frame: &Frame) -> Result<(), LinkError> {
        self.lock().await.send(frame).await
    }

    /// Send one frame and wait for `expected` with the default response timeout.
    pub async fn request(&self, frame: &Frame, expected: Command) -> Result<Bytes, LinkError> {
        self.lock().await.request(frame, expected).await
    }

    /// Disconnect the link. Outstanding requests fail with `LinkLost`.
    pub async fn close(&self) -> Result<(), LinkError> {
        if self.state() == SessionState::Closed {
            return Ok(());
        }
        let result = self.transport.disconnect().await;
        self.shared.on_disconnected();
        result
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), LinkError> {
        let _writer = self.write_lock.lock().await;
        self.shared.ensure_ready()?;

        let data = frame.encode();
        if let Some(mtu) = self.mtu() {
            if data.len() > mtu as usize {
                warn!(len = data.len(), mtu, "Frame exceeds the negotiated transfer unit");
            }
        }
        debug!(command = ?frame.command, bytes = hex::encode(&data), "BLE write");

        match tokio::time::timeout(self.config.write_timeout, self.transport.write(data)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    command = ?frame.command,
                    timeout_ms = self.config.write_timeout.as_millis() as u64,
                    "Write acknowledgement timed out, releasing writer"
                );
                Err(LinkError::WriteTimeout)
            }
        }
    }

    async fn wait_pending(
        &self,
        receiver: oneshot::Receiver<Result<Bytes, LinkError>>,
        expected: Command,
        deadline: Instant,
    ) -> Result<Bytes, LinkError> {
        match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(LinkError::LinkLost),
            Err(_) => {
                debug!(awaiting = ?expected, "Response timed out");
                Err(LinkError::Timeout)
            }
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.events_task.abort();
    }
}

/// Exclusive right to issue commands on a session.
pub struct CommandGuard<'a, T: Transport> {
    session: &'a Session<T>,
    _lock: tokio::sync::MutexGuard<'a, ()>,
}

impl<T: Transport> CommandGuard<'_, T> {
    /// Write one frame. Resolves on the write acknowledgement.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), LinkError> {
        self.session.write_frame(frame).await
    }

    /// Wait for a frame with command `expected`, without sending anything.
    pub async fn await_response(
        &mut self,
        expected: Command,
        timeout: Duration,
    ) -> Result<Bytes, LinkError> {
        let deadline = Instant::now() + timeout;
        let receiver = self.session.shared.register(expected, deadline)?;
        let _slot = PendingSlot {
            shared: &self.session.shared,
        };
        self.session.wait_pending(receiver, expected, deadline).await
    }

    /// Send `frame` and wait for `expected` with the default response timeout.
    pub async fn request(&mut self, frame: &Frame, expected: Command) -> Result<Bytes, LinkError> {
        let timeout = self.session.config.response_timeout;
        self.request_with_timeout(frame, expected, timeout).await
    }

    /// Send `frame` and wait for `expected`. The response slot is claimed
    /// before the write so a fast reply is never missed.
    pub async fn request_with_timeout(
        &mut self,
        frame: &Frame,
        expected: Command,
        timeout: Duration,
    ) -> Result<Bytes, LinkError> {
        let receiver = self
            .session
            .shared
            .register(expected, Instant::now() + timeout)?;
        let _slot = PendingSlot {
            shared: &self.session.shared,
        };
        self.session.write_frame(frame).await?;
        // the response window starts once the write is acknowledged
        let deadline = Instant::now() + timeout;
        self.session.shared.extend_deadline(deadline);
        self.session.wait_pending(receiver, expected, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::build_frame;

    fn ready_shared() -> Shared {
        let shared = Shared::new(DEFAULT_REASSEMBLY_CAPACITY);
        shared.on_connecting();
        shared.handle_event(LinkEvent::Connected);
        shared.handle_event(LinkEvent::MtuChanged(512));
        assert_eq!(shared.current(), SessionState::Connecting);
        shared.handle_event(LinkEvent::NotificationsEnabled);
        assert_eq!(shared.current(), SessionState::Ready);
        shared
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn test_second_registration_is_a_protocol_violation() {
        let shared = ready_shared();
        let _first = shared.register(Command::BrightnessResponse, deadline()).unwrap();
        let second = shared.register(Command::CalibrationResponse, deadline());
        assert!(matches!(
            second,
            Err(LinkError::ProtocolViolation {
                outstanding: Command::BrightnessResponse
            })
        ));
        shared.release();
        assert!(shared.register(Command::CalibrationResponse, deadline()).is_ok());
    }

    #[test]
    fn test_register_requires_ready() {
        let shared = Shared::new(DEFAULT_REASSEMBLY_CAPACITY);
        assert_eq!(
            shared.register(Command::BrightnessResponse, deadline()).err(),
            Some(LinkError::NotReady)
        );
        shared.on_disconnected();
        assert_eq!(
            shared.register(Command::BrightnessResponse, deadline()).err(),
            Some(LinkError::LinkLost)
        );
    }

    #[test]
    fn test_matching_frame_resolves_pending() {
        let shared = ready_shared();
        let mut receiver = shared.register(Command::BrightnessResponse, deadline()).unwrap();

        // unrelated frame first, then the awaited one split in two fragments
        let other = build_frame(Command::CalibrationResponse.id(), &[1, 2, 3]).unwrap();
        shared.handle_event(LinkEvent::Notification(other));
        assert!(receiver.try_recv().is_err());

        let wanted = build_frame(Command::BrightnessResponse.id(), &[0x64, 0x00]).unwrap();
        shared.handle_event(LinkEvent::Notification(wanted.slice(..3)));
        shared.handle_event(LinkEvent::Notification(wanted.slice(3..)));
        let payload = receiver.try_recv().unwrap().unwrap();
        assert_eq!(payload.as_ref(), &[0x64, 0x00]);
        assert!(shared.link().pending.is_none());
    }

    #[test]
    fn test_expired_pending_resolves_as_timeout() {
        let shared = ready_shared();
        let mut receiver = shared
            .register(Command::BrightnessResponse, Instant::now() - Duration::from_millis(1))
            .unwrap();
        let wanted = build_frame(Command::BrightnessResponse.id(), &[0x64, 0x00]).unwrap();
        shared.handle_event(LinkEvent::Notification(wanted));
        assert_eq!(receiver.try_recv().unwrap(), Err(LinkError::Timeout));
    }

    #[test]
    fn test_extended_deadline_accepts_late_frame() {
        let shared = ready_shared();
        let mut receiver = shared
            .register(Command::BrightnessResponse, Instant::now() - Duration::from_millis(1))
            .unwrap();
        shared.extend_deadline(deadline());
        let wanted = build_frame(Command::BrightnessResponse.id(), &[0x64, 0x00]).unwrap();
        shared.handle_event(LinkEvent::Notification(wanted));
        let payload = receiver.try_recv().unwrap().unwrap();
        assert_eq!(payload.as_ref(), &[0x64, 0x00]);
    }

    #[test]
    fn test_disconnect_fails_pending_and_closes() {
        let shared = ready_shared();
        let mut receiver = shared.register(Command::FileInfoResponse, deadline()).unwrap();
        shared.handle_event(LinkEvent::Disconnected);
        assert_eq!(shared.current(), SessionState::Closed);
        assert_eq!(receiver.try_recv().unwrap(), Err(LinkError::LinkLost));
        // Closed is terminal
        shared.handle_event(LinkEvent::NotificationsEnabled);
        assert_eq!(shared.current(), SessionState::Closed);
    }

    #[test]
    fn test_unsolicited_frames_are_dropped() {
        let shared = ready_shared();
        let frame = build_frame(Command::BrightnessResponse.id(), &[1, 0]).unwrap();
        shared.handle_event(LinkEvent::Notification(frame));
        let stats = shared.stats();
        assert_eq!(stats.buffered, 0);
        assert!(shared.link().pending.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::new()
            .with_mtu(247)
            .with_write_timeout(Duration::from_millis(100))
            .with_reassembly_capacity(10);
        assert_eq!(config.mtu, 247);
        assert_eq!(config.write_timeout, Duration::from_millis(100));
        assert_eq!(config.reassembly_capacity, MAX_FRAME_SIZE);
        assert_eq!(SessionConfig::default().write_timeout, DEFAULT_WRITE_TIMEOUT);
    }
}
