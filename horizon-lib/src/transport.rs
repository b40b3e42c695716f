//! Boundary to the external radio link.
//!
//! The link itself (discovery, permissions, the GATT stack) lives outside this
//! crate. A [`Transport`] exposes the four capabilities the session needs and
//! reports everything asynchronous as [`LinkEvent`]s on a channel, so the
//! session can drive an explicit state machine instead of nested callbacks.

use crate::error::LinkError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Events pushed by the transport after `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link layer connection is up
    Connected,
    /// The transfer unit was negotiated
    MtuChanged(u16),
    /// The notification subscription handshake completed
    NotificationsEnabled,
    /// A notification fragment arrived
    Notification(Bytes),
    /// The link went down
    Disconnected,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start connecting. Subsequent lifecycle changes and notifications are
    /// delivered on the returned channel.
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<LinkEvent>, LinkError>;

    /// Ask the link for a transfer unit. Completion is reported as
    /// [`LinkEvent::MtuChanged`].
    async fn request_mtu(&self, mtu: u16) -> Result<(), LinkError>;

    /// Subscribe to notifications. Completion is reported as
    /// [`LinkEvent::NotificationsEnabled`].
    async fn enable_notifications(&self) -> Result<(), LinkError>;

    /// Write one frame. Resolves when the link acknowledges the write.
    /// The link does not allow overlapping writes.
    async fn write(&self, data: Bytes) -> Result<(), LinkError>;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<(), LinkError>;
}
