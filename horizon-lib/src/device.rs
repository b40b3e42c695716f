use crate::command::{Command, Stage};
use crate::constants::*;
use crate::entities::{LineSegment, PointOfInterest};
use crate::error::LinkError;
use crate::fs::{self, FileEntry, FileInfo, STATUS_OK};
use crate::message::Request;
use crate::records::{self, Calibration, MagneticField, UserConfig};
use crate::session::{CommandGuard, Session, SessionConfig};
use crate::transfer;
use crate::transport::Transport;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, info, warn};

/// Handle to one connected device.
///
/// Every method takes the session's command lock for its whole exchange, so
/// a handle can be shared between tasks; commands are serialized.
pub struct Horizon<T: Transport> {
    session: Session<T>,
}

/// Progress of an initialization transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitProgress {
    Lines { sent: usize, total: usize },
    PointsOfInterest { sent: usize, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum InitStep {
    #[strum(to_string = "flush start")]
    FlushStart,
    #[strum(to_string = "flush end")]
    FlushEnd,
    #[strum(to_string = "time sync")]
    TimeSync,
    #[strum(to_string = "GPS position")]
    GpsPosition,
    #[strum(to_string = "line upload")]
    Lines,
    #[strum(to_string = "point-of-interest upload")]
    PointsOfInterest,
}

/// Data pushed to the device by [`Horizon::initialize`].
#[derive(Debug, Clone, Default)]
pub struct InitData {
    /// Defaults to the current time
    pub time: Option<DateTime<Utc>>,
    pub latitude: f32,
    pub longitude: f32,
    pub lines: Option<Vec<LineSegment>>,
    pub points_of_interest: Option<Vec<PointOfInterest>>,
}

/// Outcome of every step run by [`Horizon::initialize`], in order.
#[derive(Debug, Default)]
pub struct InitReport {
    pub steps: Vec<(InitStep, Result<(), LinkError>)>,
}

impl InitReport {
    fn record(&mut self, step: InitStep, outcome: Result<(), LinkError>) {
        match &outcome {
            Ok(()) => debug!(step = %step, "Initialization step done"),
            Err(e) => warn!(step = %step, error = %e, "Initialization step failed, continuing"),
        }
        self.steps.push((step, outcome));
    }

    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|(_, outcome)| outcome.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (InitStep, &LinkError)> {
        self.steps
            .iter()
            .filter_map(|(step, outcome)| outcome.as_ref().err().map(|e| (*step, e)))
    }

    pub fn outcome(&self, step: InitStep) -> Option<&Result<(), LinkError>> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }
}

impl fmt::Display for InitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (step, outcome) in &self.steps {
            match outcome {
                Ok(()) => writeln!(f, "{step}: ok")?,
                Err(e) => writeln!(f, "{step}: {e}")?,
            }
        }
        Ok(())
    }
}

fn check_status(command: Command, status: u8) -> Result<(), LinkError> {
    if status == STATUS_OK {
        Ok(())
    } else {
        Err(LinkError::DeviceStatus { command, status })
    }
}

fn epoch_seconds(time: DateTime<Utc>) -> Result<u32, LinkError> {
    u32::try_from(time.timestamp()).map_err(|_| {
        LinkError::InvalidArgument(format!("{time} is outside the 32-bit epoch range"))
    })
}

impl<T: Transport> Horizon<T> {
    /// Connect over `transport` and wait for the session to become ready.
    pub async fn connect(transport: Arc<T>, config: SessionConfig) -> Result<Self, LinkError> {
        info!("Connecting to Horizon device...");
        let session = Session::open(transport, config).await?;
        info!(mtu = session.mtu(), "Connected");
        Ok(Self { session })
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub async fn close(&self) -> Result<(), LinkError> {
        self.session.close().await
    }

    async fn send(&self, request: Request) -> Result<(), LinkError> {
        debug!(?request, "Sending command");
        self.session.send(&request.to_frame()).await
    }

    async fn query(&self, request: Request) -> Result<Bytes, LinkError> {
        let expected = request.expected_response().ok_or_else(|| {
            LinkError::InvalidArgument(format!("{request:?} has no response"))
        })?;
        self.session.request(&request.to_frame(), expected).await
    }

    pub async fn flush_start(&self) -> Result<(), LinkError> {
        self.send(Request::FlushStart).await
    }

    pub async fn flush_end(&self) -> Result<(), LinkError> {
        self.send(Request::FlushEnd).await
    }

    pub async fn sync_time(&self, time: DateTime<Utc>) -> Result<(), LinkError> {
        let epoch_seconds = epoch_seconds(time)?;
        self.send(Request::TimeSync { epoch_seconds }).await
    }

    pub async fn sync_time_now(&self) -> Result<(), LinkError> {
        self.sync_time(Utc::now()).await
    }

    pub async fn send_gps_position(&self, latitude: f32, longitude: f32) -> Result<(), LinkError> {
        self.send(Request::GpsPosition {
            latitude,
            longitude,
        })
        .await
    }

    pub async fn set_target(&self, azimuth: f32, altitude: f32) -> Result<(), LinkError> {
        self.send(Request::Target { azimuth, altitude }).await
    }

    pub async fn start_stage(&self, stage: Stage) -> Result<(), LinkError> {
        info!(%stage, "Starting");
        self.send(Request::StageStart(stage)).await
    }

    pub async fn stop_stage(&self, stage: Stage) -> Result<(), LinkError> {
        info!(%stage, "Stopping");
        self.send(Request::StageStop(stage)).await
    }

    /// Erase the device data partition. The device sends no acknowledgement.
    pub async fn format_partition(&self) -> Result<(), LinkError> {
        warn!("Formatting device data partition");
        self.send(Request::FormatPartition).await
    }

    pub async fn brightness(&self) -> Result<u16, LinkError> {
        let payload = self.query(Request::Brightness).await?;
        records::decode_brightness(&payload)
    }

    pub async fn calibration(&self) -> Result<Calibration, LinkError> {
        let payload = self.query(Request::Calibration).await?;
        Calibration::decode(&payload)
    }

    pub async fn user_config(&self) -> Result<UserConfig, LinkError> {
        let payload = self.query(Request::UserConfig).await?;
        UserConfig::decode(&payload)
    }

    pub async fn magnetic_field(&self) -> Result<MagneticField, LinkError> {
        let payload = self.query(Request::MagneticField).await?;
        MagneticField::decode(&payload)
    }

    /// Upload line geometry. `progress` is called with `(lines_sent, total)`
    /// after each line's descriptor and coordinate frames are all written.
    pub async fn upload_lines(
        &self,
        lines: &[LineSegment],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<(), LinkError> {
        let mut guard = self.session.lock().await;
        send_lines(&mut guard, lines, &mut progress).await
    }

    /// Upload points of interest, one frame each. `progress` is called with
    /// `(entries_sent, total)` after every frame.
    pub async fn upload_pois(
        &self,
        pois: &[PointOfInterest],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<(), LinkError> {
        let mut guard = self.session.lock().await;
        send_pois(&mut guard, pois, &mut progress).await
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>, LinkError> {
        let payload = self
            .session
            .request(&fs::list_request(path)?, Command::FileListResponse)
            .await?;
        fs::decode_list(&payload)
    }

    pub async fn file_info(&self, path: &str) -> Result<FileInfo, LinkError> {
        let payload = self
            .session
            .request(&fs::info_request(path)?, Command::FileInfoResponse)
            .await?;
        fs::decode_info(&payload)
    }

    /// Read a whole file: its size from an info request, then the contents in
    /// 480-byte reads. A read returning no data ends the download early and
    /// the bytes received so far are returned.
    pub async fn download_file(&self, path: &str) -> Result<Vec<u8>, LinkError> {
        let mut guard = self.session.lock().await;

        let payload = guard
            .request(&fs::info_request(path)?, Command::FileInfoResponse)
            .await?;
        let info = fs::decode_info(&payload)?;
        check_status(Command::FileInfoResponse, info.status)?;
        let size = info.size.ok_or(LinkError::ShortResponse {
            expected: 6,
            actual: payload.len(),
        })? as usize;
        info!(path, size, "Downloading file");

        let mut contents = vec![0u8; size];
        let mut offset = 0usize;
        while offset < size {
            let want = (size - offset).min(FILE_READ_CHUNK_SIZE);
            let request = fs::read_request(path, offset as u32, want as u16)?;
            let payload = guard.request(&request, Command::FileReadResponse).await?;
            let chunk = fs::decode_read_chunk(&payload)?;
            check_status(Command::FileReadResponse, chunk.status)?;
            if chunk.data.is_empty() {
                warn!(path, offset, size, "Device returned no data, ending download");
                break;
            }
            let n = chunk.data.len().min(size - offset);
            contents[offset..offset + n].copy_from_slice(&chunk.data[..n]);
            offset += n;
            debug!(path, offset, size, "Read chunk");
        }
        contents.truncate(offset);
        Ok(contents)
    }

    /// Write `data` to `path` in 256-byte chunks. Any non-zero status aborts.
    /// Empty data is sent as a single empty chunk.
    pub async fn upload_file(&self, path: &str, data: &[u8]) -> Result<(), LinkError> {
        let mut guard = self.session.lock().await;
        info!(path, size = data.len(), "Uploading file");

        let mut chunks: Vec<&[u8]> = data.chunks(FILE_WRITE_CHUNK_SIZE).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let mut offset = 0usize;
        for chunk in chunks {
            let request = fs::write_request(path, offset as u32, chunk)?;
            let payload = guard.request(&request, Command::FileWriteResponse).await?;
            check_status(Command::FileWriteResponse, fs::decode_status(&payload)?)?;
            offset += chunk.len();
            debug!(path, offset, size = data.len(), "Wrote chunk");
        }
        Ok(())
    }

    pub async fn delete_file(&self, path: &str) -> Result<(), LinkError> {
        let payload = self
            .session
            .request(&fs::delete_request(path)?, Command::FileDeleteResponse)
            .await?;
        check_status(Command::FileDeleteResponse, fs::decode_status(&payload)?)
    }

    /// Push the startup state: flush start and end, time, GPS position, then
    /// lines and points of interest when supplied.
    ///
    /// Steps are not retried and a failed step does not stop the ones after
    /// it. The command lock is held for the whole sequence.
    pub async fn initialize(
        &self,
        data: &InitData,
        mut progress: impl FnMut(InitProgress),
    ) -> InitReport {
        let mut report = InitReport::default();
        let mut guard = self.session.lock().await;
        info!("Initializing device");

        let outcome = guard.send(&Request::FlushStart.to_frame()).await;
        report.record(InitStep::FlushStart, outcome);
        let outcome = guard.send(&Request::FlushEnd.to_frame()).await;
        report.record(InitStep::FlushEnd, outcome);

        let time = data.time.unwrap_or_else(Utc::now);
        let outcome = match epoch_seconds(time) {
            Ok(epoch_seconds) => guard.send(&Request::TimeSync { epoch_seconds }.to_frame()).await,
            Err(e) => Err(e),
        };
        report.record(InitStep::TimeSync, outcome);

        let gps = Request::GpsPosition {
            latitude: data.latitude,
            longitude: data.longitude,
        };
        let outcome = guard.send(&gps.to_frame()).await;
        report.record(InitStep::GpsPosition, outcome);

        if let Some(lines) = &data.lines {
            let outcome = send_lines(&mut guard, lines, &mut |sent, total| {
                progress(InitProgress::Lines { sent, total })
            })
            .await;
            report.record(InitStep::Lines, outcome);
        }
        if let Some(pois) = &data.points_of_interest {
            let outcome = send_pois(&mut guard, pois, &mut |sent, total| {
                progress(InitProgress::PointsOfInterest { sent, total })
            })
            .await;
            report.record(InitStep::PointsOfInterest, outcome);
        }

        info!(success = report.is_success(), "Initialization finished");
        report
    }
}

async fn send_lines<T: Transport>(
    guard: &mut CommandGuard<'_, T>,
    lines: &[LineSegment],
    progress: &mut impl FnMut(usize, usize),
) -> Result<(), LinkError> {
    let total = lines.len();
    info!(total, "Uploading lines");
    for (i, line) in lines.iter().enumerate() {
        for frame in transfer::line_frames(line) {
            guard.send(&frame).await?;
        }
        progress(i + 1, total);
        debug!(index = line.index, points = line.points.len(), sent = i + 1, total, "Line sent");
    }
    Ok(())
}

async fn send_pois<T: Transport>(
    guard: &mut CommandGuard<'_, T>,
    pois: &[PointOfInterest],
    progress: &mut impl FnMut(usize, usize),
) -> Result<(), LinkError> {
    // validate everything before the first write
    let frames = pois
        .iter()
        .map(transfer::poi_frame)
        .collect::<Result<Vec<_>, _>>()?;
    let total = frames.len();
    info!(total, "Uploading points of interest");
    for (i, frame) in frames.iter().enumerate() {
        guard.send(frame).await?;
        progress(i + 1, total);
    }
    Ok(())
}
