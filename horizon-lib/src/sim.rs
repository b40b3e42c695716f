//! In-process device model implementing [`Transport`].
//!
//! The simulator decodes host frames with the same codec the session uses,
//! keeps whatever the host uploads, and answers queries and file requests.
//! Link behavior can be degraded for tests: fragmented and noisy
//! notifications, silent commands, stalled write acknowledgements and link
//! loss on demand.

use crate::command::Command;
use crate::entities::{LinePoint, LineSegment, PointOfInterest};
use crate::error::LinkError;
use crate::frame::Frame;
use crate::fs::{self, FileAttributes, FileEntry, FileRequest, STATUS_OK};
use crate::message::Request;
use crate::reassembly::ReassemblyBuffer;
use crate::records::{CalibrationRaw, MagneticFieldRaw, UserConfigRaw};
use crate::transfer::{self, CoordinateChunk, LineDescriptor};
use crate::transport::{LinkEvent, Transport};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromZeros, IntoBytes};

/// Status the simulator answers with for a missing path
pub const STATUS_NOT_FOUND: u8 = 4;

/// Link behavior of a [`SimulatedDevice`].
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Transfer unit granted during the handshake, capped by the request
    pub mtu: u16,
    /// Split every notification into fragments of at most this many bytes
    pub fragment_size: Option<usize>,
    /// Bytes sent ahead of every response frame
    pub noise: Bytes,
    /// Delay before a response is notified
    pub response_delay: Option<Duration>,
    /// Delay before a write is acknowledged
    pub ack_delay: Option<Duration>,
    /// Never complete the notification subscription
    pub withhold_notifications: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            mtu: 512,
            fragment_size: None,
            noise: Bytes::new(),
            response_delay: None,
            ack_delay: None,
            withhold_notifications: false,
        }
    }
}

#[derive(Debug)]
struct PartialLine {
    descriptor: LineDescriptor,
    points: Vec<LinePoint>,
}

#[derive(Debug)]
struct DeviceState {
    events: Option<mpsc::UnboundedSender<LinkEvent>>,
    inbound: ReassemblyBuffer,
    commands: Vec<Command>,
    requests: Vec<Request>,
    writes: usize,
    silent: HashSet<Command>,
    stall_writes: bool,

    brightness: u16,
    calibration: CalibrationRaw,
    user_config: UserConfigRaw,
    magnetic_field: MagneticFieldRaw,

    current_line: Option<PartialLine>,
    lines: Vec<LineSegment>,
    out_of_order_chunks: usize,
    pois: Vec<PointOfInterest>,
    files: BTreeMap<String, Vec<u8>>,
}

/// Simulated device. Configure it before handing it to a session, then
/// inspect what it received.
#[derive(Debug)]
pub struct SimulatedDevice {
    options: SimOptions,
    state: Mutex<DeviceState>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(SimOptions::default())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn notify(options: &SimOptions, events: &mpsc::UnboundedSender<LinkEvent>, frame: &Frame) {
    let mut wire = BytesMut::with_capacity(options.noise.len() + frame.wire_len());
    wire.put_slice(&options.noise);
    wire.put_slice(&frame.encode());
    let wire = wire.freeze();
    let fragment = options.fragment_size.unwrap_or(wire.len()).max(1);
    let mut offset = 0;
    while offset < wire.len() {
        let end = (offset + fragment).min(wire.len());
        let _ = events.send(LinkEvent::Notification(wire.slice(offset..end)));
        offset = end;
    }
}

impl SimulatedDevice {
    pub fn new(options: SimOptions) -> Self {
        Self {
            options,
            state: Mutex::new(DeviceState {
                events: None,
                inbound: ReassemblyBuffer::default(),
                commands: Vec::new(),
                requests: Vec::new(),
                writes: 0,
                silent: HashSet::new(),
                stall_writes: false,
                brightness: 0,
                calibration: CalibrationRaw::new_zeroed(),
                user_config: UserConfigRaw::new_zeroed(),
                magnetic_field: MagneticFieldRaw::new_zeroed(),
                current_line: None,
                lines: Vec::new(),
                out_of_order_chunks: 0,
                pois: Vec::new(),
                files: BTreeMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_brightness(&self, brightness: u16) {
        self.state().brightness = brightness;
    }

    pub fn set_calibration(&self, calibration: CalibrationRaw) {
        self.state().calibration = calibration;
    }

    pub fn set_user_config(&self, config: UserConfigRaw) {
        self.state().user_config = config;
    }

    pub fn set_magnetic_field(&self, field: MagneticFieldRaw) {
        self.state().magnetic_field = field;
    }

    /// Never answer `command`.
    pub fn silence(&self, command: Command) {
        self.state().silent.insert(command);
    }

    /// While set, writes are never acknowledged.
    pub fn set_stall_writes(&self, stall: bool) {
        self.state().stall_writes = stall;
    }

    pub fn insert_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.state().files.insert(normalize(path), contents.into());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(&normalize(path)).cloned()
    }

    /// Push raw bytes to the host as a notification, bypassing framing.
    pub fn inject(&self, data: impl Into<Bytes>) {
        let state = self.state();
        if let Some(events) = &state.events {
            let _ = events.send(LinkEvent::Notification(data.into()));
        }
    }

    /// Drop the link as if the radio went out of range.
    pub fn drop_link(&self) {
        if let Some(events) = self.state().events.take() {
            debug!("Simulated link lost");
            let _ = events.send(LinkEvent::Disconnected);
        }
    }

    /// Commands of every frame received, in arrival order
    pub fn commands(&self) -> Vec<Command> {
        self.state().commands.clone()
    }

    /// Decoded single-frame commands, in arrival order
    pub fn requests(&self) -> Vec<Request> {
        self.state().requests.clone()
    }

    /// Writes acknowledged so far
    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    /// Lines whose every announced point has arrived
    pub fn lines(&self) -> Vec<LineSegment> {
        self.state().lines.clone()
    }

    /// Coordinate frames that did not belong to the line last announced
    pub fn out_of_order_chunks(&self) -> usize {
        self.state().out_of_order_chunks
    }

    pub fn points_of_interest(&self) -> Vec<PointOfInterest> {
        self.state().pois.clone()
    }

    fn handle_frame(state: &mut DeviceState, frame: Frame) -> Option<Frame> {
        trace!(command = ?frame.command, len = frame.payload.len(), "Device received frame");
        state.commands.push(frame.command);
        let response = match frame.command {
            Command::LineDescriptor => {
                Self::on_descriptor(state, &frame);
                None
            }
            Command::LineCoordinates => {
                Self::on_coordinates(state, &frame);
                None
            }
            Command::PointOfInterest => {
                match transfer::decode_poi(&frame.payload) {
                    Ok(poi) => state.pois.push(poi),
                    Err(e) => warn!(error = %e, "Malformed point of interest"),
                }
                None
            }
            Command::FileListRequest
            | Command::FileInfoRequest
            | Command::FileReadRequest
            | Command::FileWriteRequest
            | Command::FileDeleteRequest => match FileRequest::try_from(&frame) {
                Ok(request) => Some(Self::on_file_request(state, request)),
                Err(e) => {
                    warn!(error = %e, "Malformed file request");
                    None
                }
            },
            _ => match Request::try_from(&frame) {
                Ok(request) => {
                    state.requests.push(request);
                    Self::answer(state, request)
                }
                Err(e) => {
                    warn!(command = ?frame.command, error = %e, "Ignoring frame");
                    None
                }
            },
        };
        if state.silent.contains(&frame.command) {
            debug!(command = ?frame.command, "Staying silent");
            return None;
        }
        response
    }

    fn answer(state: &DeviceState, request: Request) -> Option<Frame> {
        let expected = request.expected_response()?;
        let payload = match request {
            Request::Brightness => Bytes::copy_from_slice(U16::new(state.brightness).as_bytes()),
            Request::Calibration => Bytes::copy_from_slice(state.calibration.as_bytes()),
            Request::UserConfig => Bytes::copy_from_slice(state.user_config.as_bytes()),
            Request::MagneticField => Bytes::copy_from_slice(state.magnetic_field.as_bytes()),
            _ => return None,
        };
        Some(Frame {
            command: expected,
            payload,
        })
    }

    fn on_descriptor(state: &mut DeviceState, frame: &Frame) {
        let descriptor = match LineDescriptor::decode(&frame.payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(error = %e, "Malformed line descriptor");
                return;
            }
        };
        if let Some(partial) = state.current_line.take() {
            warn!(
                index = partial.descriptor.index,
                received = partial.points.len(),
                "Line abandoned before all points arrived"
            );
        }
        state.current_line = Some(PartialLine {
            descriptor,
            points: Vec::with_capacity(descriptor.point_count as usize),
        });
        Self::complete_line(state);
    }

    fn on_coordinates(state: &mut DeviceState, frame: &Frame) {
        let chunk = match CoordinateChunk::decode(&frame.payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Malformed coordinate chunk");
                return;
            }
        };
        match &mut state.current_line {
            Some(partial) if partial.descriptor.index == chunk.index => {
                partial.points.extend(chunk.points);
            }
            _ => {
                warn!(index = chunk.index, "Coordinate chunk without its descriptor");
                state.out_of_order_chunks += 1;
                return;
            }
        }
        Self::complete_line(state);
    }

    fn complete_line(state: &mut DeviceState) {
        let done = state
            .current_line
            .as_ref()
            .is_some_and(|p| p.points.len() >= p.descriptor.point_count as usize);
        if !done {
            return;
        }
        if let Some(partial) = state.current_line.take() {
            state.lines.push(LineSegment {
                index: partial.descriptor.index,
                azimuth_min: partial.descriptor.azimuth_min,
                azimuth_max: partial.descriptor.azimuth_max,
                points: partial.points,
            });
        }
    }

    fn on_file_request(state: &mut DeviceState, request: FileRequest) -> Frame {
        debug!(?request, "File request");
        match request {
            FileRequest::List { path } => {
                let dir = normalize(&path);
                match Self::list(&state.files, &dir) {
                    Some(entries) => fs::response::list(STATUS_OK, &entries),
                    None => fs::response::list(STATUS_NOT_FOUND, &[]),
                }
            }
            FileRequest::Info { path } => {
                let path = normalize(&path);
                if let Some(contents) = state.files.get(&path) {
                    fs::response::info(STATUS_OK, contents.len() as u32, FileAttributes(0x20))
                } else if Self::list(&state.files, &path).is_some() {
                    fs::response::info(STATUS_OK, 0, FileAttributes::DIRECTORY)
                } else {
                    fs::response::info(STATUS_NOT_FOUND, 0, FileAttributes(0))
                }
            }
            FileRequest::Read { path, offset, len } => match state.files.get(&normalize(&path)) {
                Some(contents) => {
                    let start = (offset as usize).min(contents.len());
                    let end = (start + len as usize).min(contents.len());
                    fs::response::read(STATUS_OK, &contents[start..end])
                }
                None => fs::response::read(STATUS_NOT_FOUND, &[]),
            },
            FileRequest::Write { path, offset, data } => {
                let contents = state.files.entry(normalize(&path)).or_default();
                let offset = offset as usize;
                if contents.len() < offset + data.len() {
                    contents.resize(offset + data.len(), 0);
                }
                contents[offset..offset + data.len()].copy_from_slice(&data);
                fs::response::status(Command::FileWriteResponse, STATUS_OK)
            }
            FileRequest::Delete { path } => {
                let status = match state.files.remove(&normalize(&path)) {
                    Some(_) => STATUS_OK,
                    None => STATUS_NOT_FOUND,
                };
                fs::response::status(Command::FileDeleteResponse, status)
            }
        }
    }

    /// Entries directly under `dir`, or `None` when nothing lives there.
    fn list(files: &BTreeMap<String, Vec<u8>>, dir: &str) -> Option<Vec<FileEntry>> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{dir}/")
        };
        let mut directories = BTreeSet::new();
        let mut entries = Vec::new();
        for (path, contents) in files {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((subdir, _)) => {
                    directories.insert(subdir.to_string());
                }
                None => entries.push(FileEntry {
                    name: rest.to_string(),
                    size: contents.len() as u32,
                    attributes: FileAttributes(0x20),
                }),
            }
        }
        if entries.is_empty() && directories.is_empty() && dir != "/" {
            return None;
        }
        let mut listing: Vec<FileEntry> = directories
            .into_iter()
            .map(|name| FileEntry {
                name,
                size: 0,
                attributes: FileAttributes::DIRECTORY,
            })
            .collect();
        listing.extend(entries);
        Some(listing)
    }
}

#[async_trait]
impl Transport for SimulatedDevice {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<LinkEvent>, LinkError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        if state.events.is_some() {
            return Err(LinkError::Transport("already connected".to_string()));
        }
        state.inbound.clear();
        let _ = tx.send(LinkEvent::Connected);
        state.events = Some(tx);
        Ok(rx)
    }

    async fn request_mtu(&self, mtu: u16) -> Result<(), LinkError> {
        let state = self.state();
        let events = state.events.as_ref().ok_or(LinkError::LinkLost)?;
        let _ = events.send(LinkEvent::MtuChanged(mtu.min(self.options.mtu)));
        Ok(())
    }

    async fn enable_notifications(&self) -> Result<(), LinkError> {
        let state = self.state();
        let events = state.events.as_ref().ok_or(LinkError::LinkLost)?;
        if !self.options.withhold_notifications {
            let _ = events.send(LinkEvent::NotificationsEnabled);
        }
        Ok(())
    }

    async fn write(&self, data: Bytes) -> Result<(), LinkError> {
        let stalled = self.state().stall_writes;
        if stalled {
            debug!(len = data.len(), "Stalling write acknowledgement");
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.options.ack_delay {
            tokio::time::sleep(delay).await;
        }

        let (events, responses) = {
            let mut state = self.state();
            let events = state
                .events
                .clone()
                .ok_or_else(|| LinkError::Transport("not connected".to_string()))?;
            state.writes += 1;
            state.inbound.push(&data);
            let mut responses = Vec::new();
            while let Some(frame) = state.inbound.next_frame() {
                if let Some(response) = Self::handle_frame(&mut state, frame) {
                    responses.push(response);
                }
            }
            (events, responses)
        };

        if responses.is_empty() {
            return Ok(());
        }
        match self.options.response_delay {
            None => {
                for response in &responses {
                    notify(&self.options, &events, response);
                }
            }
            Some(delay) => {
                let options = self.options.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for response in &responses {
                        notify(&options, &events, response);
                    }
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.drop_link();
        Ok(())
    }
}
