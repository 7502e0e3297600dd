//! CommandHandler: the DFPlayer protocol engine.
//!
//! Outgoing commands are serialised by an async mutex that owns the transmit
//! half; each caller holds it from send until the device acknowledges, so at
//! most one command is ever in flight. Inbound frames are classified by a
//! separate consumer loop ([`CommandHandler::run_consumer`]) which is the only
//! writer of the derived device state and the events callers wait on.
//!
//! ```text
//!           send_command()                      run_consumer()
//! caller ──► [send lock] ──► StreamTx ──► UART ──► StreamRx ──► FrameQueue
//!                 ▲                                                │
//!                 └───────────── ack / init / reply events ◄── classify
//! ```

use core::cell::Cell;

use dfplayer_proto::{Equalizer, Frame, FrameError, Opcode, RawFrame, STORAGE_SD_CARD, VOLUME_MAX};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;

use crate::event::Event;
use crate::queue::FrameQueue;
use crate::transceiver::{LinkError, StreamTx};

/// Time the module needs to come back after a reset, in milliseconds.
pub const RESET_SETTLE_MS: u32 = 2_000;

/// Default bound on the wait for a query response, in milliseconds.
pub const REPLY_TIMEOUT_MS: u32 = 500;

/// Engine state as seen by the send path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    #[default]
    Idle,
    /// A command has been written and its ack has not arrived.
    AwaitingAck,
}

/// Playback status reported by [`Query::Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackStatus {
    #[must_use]
    pub const fn from_param(param: u16) -> Option<Self> {
        match param {
            0 => Some(Self::Stopped),
            1 => Some(Self::Playing),
            2 => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Device state that can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Query {
    Volume,
    Eq,
    /// Number of files in the root directory.
    SdFiles,
    /// Track currently selected.
    SdTrack,
    Status,
}

impl Query {
    #[must_use]
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::Volume => Opcode::QueryVolume,
            Self::Eq => Opcode::QueryEq,
            Self::SdFiles => Opcode::QuerySdFiles,
            Self::SdTrack => Opcode::QuerySdTrack,
            Self::Status => Opcode::QueryStatus,
        }
    }
}

/// Errors reported by the device itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError {
    /// Init report is missing the SD card bit.
    StorageAbsent,
    /// The SD card was pulled out.
    StorageRemoved,
}

/// Errors on the receive-classification path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxError {
    /// Frame failed to unpack and was dropped.
    Frame(FrameError),
    /// Frame was valid and reports a device fault.
    Device(DeviceError),
}

impl From<FrameError> for RxError {
    fn from(e: FrameError) -> Self {
        RxError::Frame(e)
    }
}

impl From<DeviceError> for RxError {
    fn from(e: DeviceError) -> Self {
        RxError::Device(e)
    }
}

/// Errors returned to callers of the command API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// The frame could not be written.
    Link(LinkError),
    /// No ack after every permitted attempt.
    AckTimeout,
    /// The device reported a fault.
    Device(DeviceError),
    /// Reset was acknowledged but no init report followed.
    NoInitResponse,
    /// Query was acknowledged but no response followed.
    NoReply,
    /// Name not in the opcode table.
    UnknownCommand,
}

impl From<LinkError> for CommandError {
    fn from(e: LinkError) -> Self {
        CommandError::Link(e)
    }
}

impl From<DeviceError> for CommandError {
    fn from(e: DeviceError) -> Self {
        CommandError::Device(e)
    }
}

/// Runtime tuning for the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandlerConfig {
    /// Upper bound on each wait for an ack. `None` waits forever.
    pub ack_timeout_ms: Option<u32>,
    /// Resends after the first attempt times out. Ignored without a timeout.
    pub retries: u8,
    /// How long [`CommandHandler::reset`] waits for the init report.
    pub reset_settle_ms: u32,
    /// How long [`CommandHandler::query`] waits for the response after the ack.
    pub reply_timeout_ms: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: None,
            retries: 0,
            reset_settle_ms: RESET_SETTLE_MS,
            reply_timeout_ms: REPLY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Shared {
    state: State,
    last_rx: Option<Frame>,
    last_reply: Option<Frame>,
    track_count: u16,
    current_track: u16,
    finished_track: Option<u16>,
    volume: u8,
    eq: Equalizer,
    playback: Option<PlaybackStatus>,
    storage: Option<u16>,
    last_error: Option<u16>,
    fault: Option<DeviceError>,
}

/// Device state behind a blocking mutex; every access is one short critical
/// section.
struct SharedState<M: RawMutex> {
    inner: BlockingMutex<M, Cell<Shared>>,
}

impl<M: RawMutex> SharedState<M> {
    fn new() -> Self {
        Self {
            inner: BlockingMutex::new(Cell::new(Shared::default())),
        }
    }

    fn get(&self) -> Shared {
        self.inner.lock(Cell::get)
    }

    fn update<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        self.inner.lock(|cell| {
            let mut shared = cell.get();
            let result = f(&mut shared);
            cell.set(shared);
            result
        })
    }

    /// Enter `AwaitingAck` until the returned guard drops.
    fn begin_pending(&self) -> Pending<'_, M> {
        self.update(|s| s.state = State::AwaitingAck);
        Pending { shared: self }
    }
}

/// Returns the engine to `Idle` when dropped, including on cancellation.
struct Pending<'a, M: RawMutex> {
    shared: &'a SharedState<M>,
}

impl<M: RawMutex> Drop for Pending<'_, M> {
    fn drop(&mut self) {
        self.shared.update(|s| s.state = State::Idle);
    }
}

/// Everything only the lock holder may touch.
struct Link<W, D> {
    tx: StreamTx<W>,
    delay: D,
}

/// DFPlayer command engine over a UART writer `W`, a delay `D` and a receive
/// queue of depth `N`.
pub struct CommandHandler<'q, M: RawMutex, W, D, const N: usize> {
    link: Mutex<M, Link<W, D>>,
    queue: &'q FrameQueue<M, N>,
    shared: SharedState<M>,
    ack: Event<M>,
    track_end: Event<M>,
    error: Event<M>,
    init: Event<M>,
    reply: Event<M>,
    config: HandlerConfig,
}

impl<'q, M, W, D, const N: usize> CommandHandler<'q, M, W, D, N>
where
    M: RawMutex,
    W: Write,
    D: DelayNs,
{
    pub fn new(writer: W, delay: D, queue: &'q FrameQueue<M, N>, config: HandlerConfig) -> Self {
        Self {
            link: Mutex::new(Link {
                tx: StreamTx::new(writer),
                delay,
            }),
            queue,
            shared: SharedState::new(),
            ack: Event::new(),
            track_end: Event::new(),
            error: Event::new(),
            init: Event::new(),
            reply: Event::new(),
            config,
        }
    }

    // ---- send path ----

    /// Send one command and wait for the device to acknowledge it.
    ///
    /// Concurrent callers are served in call order. Dropping the returned
    /// future releases the send lock and returns the engine to `Idle`.
    pub async fn send_command(&self, opcode: Opcode, param: u16) -> Result<(), CommandError> {
        let mut link = self.link.lock().await;
        self.transact(&mut link, opcode, param).await
    }

    /// [`send_command`](Self::send_command) by symbolic opcode name.
    pub async fn send_by_name(&self, name: &str, param: u16) -> Result<(), CommandError> {
        let opcode = Opcode::from_name(name).ok_or(CommandError::UnknownCommand)?;
        self.send_command(opcode, param).await
    }

    async fn transact(
        &self,
        link: &mut Link<W, D>,
        opcode: Opcode,
        param: u16,
    ) -> Result<(), CommandError> {
        let frame = Frame::pack(opcode, param);
        let _pending = self.shared.begin_pending();
        let mut attempt: u8 = 0;

        loop {
            self.ack.clear();
            if opcode.is_play_triggering() {
                self.track_end.clear();
            }
            link.tx.send(&frame).await?;
            debug!("tx {} {=u16:#x}", opcode, param);

            let Some(timeout_ms) = self.config.ack_timeout_ms else {
                self.ack.wait().await;
                break;
            };
            match select(self.ack.wait(), link.delay.delay_ms(timeout_ms)).await {
                Either::First(()) => break,
                Either::Second(()) if attempt < self.config.retries => {
                    attempt += 1;
                    warn!("no ack for {}, resend {}", opcode, attempt);
                }
                Either::Second(()) => {
                    warn!("no ack for {}", opcode);
                    return Err(CommandError::AckTimeout);
                }
            }
        }

        self.record_sent(opcode, param);
        Ok(())
    }

    /// State implied by a command the device has acknowledged.
    fn record_sent(&self, opcode: Opcode, param: u16) {
        self.shared.update(|s| match opcode {
            Opcode::Track => s.current_track = param,
            Opcode::VolSet => s.volume = clamp_volume(param),
            Opcode::VolInc => s.volume = (s.volume + 1).min(VOLUME_MAX),
            Opcode::VolDec => s.volume = s.volume.saturating_sub(1),
            Opcode::EqSet => {
                if let Some(eq) = Equalizer::from_index(param) {
                    s.eq = eq;
                }
            }
            _ => {}
        });
    }

    // ---- receive path ----

    /// Wait for the next queued frame and classify it.
    pub async fn process_one(&self) -> Result<Frame, RxError> {
        let bytes = self.queue.receive().await;
        self.classify(&bytes)
    }

    /// Classify frames forever, logging every failure.
    pub async fn run_consumer(&self) -> ! {
        loop {
            match self.process_one().await {
                Ok(_) => {}
                Err(RxError::Frame(e)) => warn!("rx frame dropped: {}", e),
                Err(RxError::Device(e)) => error!("device fault: {}", e),
            }
        }
    }

    /// Unpack one received frame and apply it to the engine state.
    ///
    /// Frames that fail to unpack change nothing.
    pub fn classify(&self, bytes: &RawFrame) -> Result<Frame, RxError> {
        let frame = Frame::unpack(bytes)?;
        let param = frame.param;
        self.shared.update(|s| s.last_rx = Some(frame));

        match frame.opcode {
            Opcode::Ack => self.ack.set(),
            Opcode::SdFinish => {
                self.shared.update(|s| {
                    s.finished_track = Some(param);
                    s.current_track = param;
                });
                debug!("track {} finished", param);
                self.track_end.set();
            }
            Opcode::QueryInit => {
                let present = param & STORAGE_SD_CARD != 0;
                self.shared.update(|s| {
                    s.storage = Some(param);
                    if present {
                        s.fault = None;
                    }
                });
                self.init.set();
                if !present {
                    return Err(self.fault(DeviceError::StorageAbsent).into());
                }
            }
            Opcode::Error => {
                self.shared.update(|s| s.last_error = Some(param));
                warn!("device error {=u16:#x}", param);
                self.error.set();
            }
            Opcode::MediaInsert => {
                info!("SD card inserted");
                self.shared.update(|s| s.fault = None);
            }
            Opcode::MediaRemove => {
                self.error.set();
                return Err(self.fault(DeviceError::StorageRemoved).into());
            }
            Opcode::QueryVolume => self.reply_with(frame, |s| s.volume = clamp_volume(param)),
            Opcode::QueryEq => self.reply_with(frame, |s| {
                if let Some(eq) = Equalizer::from_index(param) {
                    s.eq = eq;
                }
            }),
            Opcode::QuerySdFiles => self.reply_with(frame, |s| s.track_count = param),
            Opcode::QuerySdTrack => self.reply_with(frame, |s| s.current_track = param),
            Opcode::QueryStatus => {
                self.reply_with(frame, |s| s.playback = PlaybackStatus::from_param(param))
            }
            Opcode::Next
            | Opcode::Prev
            | Opcode::Track
            | Opcode::VolInc
            | Opcode::VolDec
            | Opcode::VolSet
            | Opcode::EqSet
            | Opcode::RepeatTrack
            | Opcode::Reset
            | Opcode::Play
            | Opcode::Stop
            | Opcode::FolderTrack
            | Opcode::RepeatAll => trace!("rx {}", frame.opcode),
        }

        Ok(frame)
    }

    fn reply_with(&self, frame: Frame, apply: impl FnOnce(&mut Shared)) {
        self.shared.update(|s| {
            apply(s);
            s.last_reply = Some(frame);
        });
        self.reply.set();
    }

    fn fault(&self, error: DeviceError) -> DeviceError {
        self.shared.update(|s| s.fault = Some(error));
        error
    }

    // ---- high-level commands ----

    /// Reset the module and wait for its init report.
    ///
    /// Fails with [`DeviceError::StorageAbsent`] if the report shows no SD
    /// card, or [`CommandError::NoInitResponse`] if none arrives within
    /// [`HandlerConfig::reset_settle_ms`]. Leaves `track_end` set.
    pub async fn reset(&self) -> Result<(), CommandError> {
        let mut link = self.link.lock().await;
        self.init.clear();
        self.shared.update(|s| s.storage = None);
        self.transact(&mut link, Opcode::Reset, 0).await?;

        let settle = link.delay.delay_ms(self.config.reset_settle_ms);
        if let Either::Second(()) = select(self.init.wait(), settle).await {
            warn!("no init report after reset");
            return Err(CommandError::NoInitResponse);
        }

        match self.shared.get().storage {
            Some(bits) if bits & STORAGE_SD_CARD != 0 => {
                info!("reset, storage {=u16:#x}", bits);
                self.track_end.set();
                Ok(())
            }
            _ => Err(DeviceError::StorageAbsent.into()),
        }
    }

    /// Ask the device for a value and return the response parameter.
    ///
    /// Responses to other queries are skipped until the matching one arrives
    /// or [`HandlerConfig::reply_timeout_ms`] runs out.
    pub async fn query(&self, query: Query) -> Result<u16, CommandError> {
        let mut link = self.link.lock().await;
        let opcode = query.opcode();
        self.reply.clear();
        self.shared.update(|s| s.last_reply = None);
        self.transact(&mut link, opcode, 0).await?;

        let matching = async {
            loop {
                self.reply.wait().await;
                self.reply.clear();
                match self.shared.get().last_reply {
                    Some(frame) if frame.opcode == opcode => return frame.param,
                    Some(frame) => debug!("skipping reply {}", frame.opcode),
                    None => {}
                }
            }
        };
        match select(matching, link.delay.delay_ms(self.config.reply_timeout_ms)).await {
            Either::First(param) => Ok(param),
            Either::Second(()) => Err(CommandError::NoReply),
        }
    }

    pub async fn play(&self) -> Result<(), CommandError> {
        self.send_command(Opcode::Play, 0).await
    }

    pub async fn pause(&self) -> Result<(), CommandError> {
        self.send_command(Opcode::Stop, 0).await
    }

    pub async fn next(&self) -> Result<(), CommandError> {
        self.send_command(Opcode::Next, 0).await
    }

    pub async fn prev(&self) -> Result<(), CommandError> {
        self.send_command(Opcode::Prev, 0).await
    }

    /// Play track `track` by file order in the root directory.
    pub async fn play_track(&self, track: u16) -> Result<(), CommandError> {
        self.send_command(Opcode::Track, track).await
    }

    /// Play `NNN.mp3` from folder `NN`.
    pub async fn play_folder_track(&self, folder: u8, track: u8) -> Result<(), CommandError> {
        let param = u16::from(folder) << 8 | u16::from(track);
        self.send_command(Opcode::FolderTrack, param).await
    }

    pub async fn repeat_track(&self, track: u16) -> Result<(), CommandError> {
        self.send_command(Opcode::RepeatTrack, track).await
    }

    /// Start or stop looping over the root directory.
    pub async fn repeat_all(&self, on: bool) -> Result<(), CommandError> {
        self.send_command(Opcode::RepeatAll, u16::from(on)).await
    }

    /// Set the device volume, clamped to `0..=30`.
    pub async fn set_volume(&self, level: u8) -> Result<(), CommandError> {
        let level = level.min(VOLUME_MAX);
        self.send_command(Opcode::VolSet, u16::from(level)).await
    }

    pub async fn volume_up(&self) -> Result<(), CommandError> {
        self.send_command(Opcode::VolInc, 0).await
    }

    pub async fn volume_down(&self) -> Result<(), CommandError> {
        self.send_command(Opcode::VolDec, 0).await
    }

    pub async fn set_eq(&self, eq: Equalizer) -> Result<(), CommandError> {
        self.send_command(Opcode::EqSet, eq.index()).await
    }

    // ---- accessors ----

    #[must_use]
    pub fn state(&self) -> State {
        self.shared.get().state
    }

    #[must_use]
    pub fn track_count(&self) -> u16 {
        self.shared.get().track_count
    }

    #[must_use]
    pub fn current_track(&self) -> u16 {
        self.shared.get().current_track
    }

    /// Track reported by the most recent `sd_finish`.
    #[must_use]
    pub fn finished_track(&self) -> Option<u16> {
        self.shared.get().finished_track
    }

    #[must_use]
    pub fn volume(&self) -> u8 {
        self.shared.get().volume
    }

    #[must_use]
    pub fn eq(&self) -> Equalizer {
        self.shared.get().eq
    }

    #[must_use]
    pub fn playback_status(&self) -> Option<PlaybackStatus> {
        self.shared.get().playback
    }

    /// Storage bitmask from the latest init report.
    #[must_use]
    pub fn storage(&self) -> Option<u16> {
        self.shared.get().storage
    }

    /// Last valid frame received, for diagnostics.
    #[must_use]
    pub fn last_rx(&self) -> Option<Frame> {
        self.shared.get().last_rx
    }

    /// Code carried by the last `error` frame.
    #[must_use]
    pub fn last_error(&self) -> Option<u16> {
        self.shared.get().last_error
    }

    /// Outstanding device fault; cleared when media is inserted again.
    #[must_use]
    pub fn device_fault(&self) -> Option<DeviceError> {
        self.shared.get().fault
    }

    pub fn ack(&self) -> &Event<M> {
        &self.ack
    }

    pub fn track_end(&self) -> &Event<M> {
        &self.track_end
    }

    pub fn error(&self) -> &Event<M> {
        &self.error
    }

    pub fn init(&self) -> &Event<M> {
        &self.init
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn queue(&self) -> &'q FrameQueue<M, N> {
        self.queue
    }
}

fn clamp_volume(param: u16) -> u8 {
    param.min(u16::from(VOLUME_MAX)) as u8
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::mock::{device_frame, InstantDelay, MockWriter, NeverDelay};
    use core::cell::RefCell;
    use embassy_futures::join::{join, join3};
    use embassy_futures::{block_on, yield_now};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::vec::Vec;

    type Queue = FrameQueue<NoopRawMutex, 8>;
    type Handler<'q, D> = CommandHandler<'q, NoopRawMutex, MockWriter, D, 8>;

    fn handler<D: DelayNs>(queue: &Queue, delay: D, config: HandlerConfig) -> (Handler<'_, D>, MockWriter) {
        let writer = MockWriter::new();
        (CommandHandler::new(writer.clone(), delay, queue, config), writer)
    }

    /// Wait until `count` frames have been written.
    async fn sent(writer: &MockWriter, count: usize) {
        while writer.frame_count() < count {
            yield_now().await;
        }
    }

    /// Play the device's side: inject a frame and let the handler consume it.
    async fn inject<D: DelayNs>(
        handler: &Handler<'_, D>,
        queue: &Queue,
        opcode: Opcode,
        param: u16,
    ) -> Result<Frame, RxError> {
        queue.try_push(device_frame(opcode, param)).unwrap();
        handler.process_one().await
    }

    #[test]
    fn test_send_waits_for_ack() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let (result, _) = block_on(join(handler.send_command(Opcode::VolSet, 15), async {
            sent(&writer, 1).await;
            assert_eq!(handler.state(), State::AwaitingAck);
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
        }));

        assert_eq!(result, Ok(()));
        assert_eq!(writer.frame(0), Frame::pack(Opcode::VolSet, 15));
        assert_eq!(handler.state(), State::Idle);
        assert_eq!(handler.volume(), 15);
    }

    #[test]
    fn test_send_by_name() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let (result, _) = block_on(join(handler.send_by_name("eq_set", 2), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
        }));
        assert_eq!(result, Ok(()));
        assert_eq!(writer.sent(0), Frame::new(Opcode::EqSet, 2));
        assert_eq!(handler.eq(), Equalizer::Rock);

        let result = block_on(handler.send_by_name("warp", 0));
        assert_eq!(result, Err(CommandError::UnknownCommand));
        assert_eq!(writer.frame_count(), 1);
    }

    // Scenario A
    #[test]
    fn test_reset_with_storage() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let (result, _) = block_on(join(handler.reset(), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
            inject(&handler, &queue, Opcode::QueryInit, 0x0002).await.unwrap();
        }));

        assert_eq!(result, Ok(()));
        assert_eq!(writer.sent(0), Frame::new(Opcode::Reset, 0));
        assert_eq!(handler.state(), State::Idle);
        assert_eq!(handler.storage(), Some(0x0002));
        assert!(handler.track_end().is_set());
        assert_eq!(handler.device_fault(), None);
    }

    #[test]
    fn test_reset_without_storage() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let (result, rx) = block_on(join(handler.reset(), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
            inject(&handler, &queue, Opcode::QueryInit, 0x0000).await
        }));

        assert_eq!(rx, Err(RxError::Device(DeviceError::StorageAbsent)));
        assert_eq!(result, Err(CommandError::Device(DeviceError::StorageAbsent)));
        assert_eq!(handler.state(), State::Idle);
    }

    #[test]
    fn test_reset_with_storage_clears_earlier_fault() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let (first, _) = block_on(join(handler.reset(), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
            inject(&handler, &queue, Opcode::QueryInit, 0x0000).await
        }));
        assert_eq!(first, Err(CommandError::Device(DeviceError::StorageAbsent)));
        assert_eq!(handler.device_fault(), Some(DeviceError::StorageAbsent));

        let (second, _) = block_on(join(handler.reset(), async {
            sent(&writer, 2).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
            inject(&handler, &queue, Opcode::QueryInit, 0x0002).await.unwrap();
        }));
        assert_eq!(second, Ok(()));
        assert_eq!(handler.device_fault(), None);
        assert_eq!(handler.storage(), Some(0x0002));
    }

    #[test]
    fn test_reset_without_init_report() {
        let queue = Queue::new();
        let delay = InstantDelay::new();
        let (handler, writer) = handler(&queue, delay.clone(), HandlerConfig::default());

        let (result, _) = block_on(join(handler.reset(), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
        }));

        assert_eq!(result, Err(CommandError::NoInitResponse));
        assert_eq!(*delay.calls.borrow(), [RESET_SETTLE_MS]);
    }

    // Scenario B, engine side
    #[test]
    fn test_track_end_cleared_by_play_and_set_by_finish() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());
        handler.track_end().set();

        block_on(join(
            async { handler.play_track(5).await.unwrap() },
            async {
                sent(&writer, 1).await;
                assert!(!handler.track_end().is_set());
                inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
            },
        ));
        assert!(!handler.track_end().is_set());
        assert_eq!(handler.current_track(), 5);

        block_on(inject(&handler, &queue, Opcode::SdFinish, 5)).unwrap();
        assert!(handler.track_end().is_set());
        assert_eq!(handler.finished_track(), Some(5));
        assert_eq!(handler.current_track(), 5);
    }

    #[test]
    fn test_non_play_command_keeps_track_end() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());
        handler.track_end().set();

        block_on(join(handler.set_volume(40), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
        }))
        .0
        .unwrap();

        assert!(handler.track_end().is_set());
        assert_eq!(writer.sent(0), Frame::new(Opcode::VolSet, 30));
    }

    // Scenario C
    #[test]
    fn test_corrupt_frame_is_dropped() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let mut corrupt = device_frame(Opcode::Ack, 0);
        corrupt[7] ^= 0x5A;

        let outcome = block_on(embassy_futures::select::select(
            handler.play(),
            async {
                sent(&writer, 1).await;
                queue.try_push(corrupt).unwrap();
                let rx = handler.process_one().await;
                assert_eq!(rx, Err(RxError::Frame(FrameError::Checksum)));
                assert!(!handler.ack().is_set());
                assert_eq!(handler.state(), State::AwaitingAck);
                assert_eq!(handler.last_rx(), None);
            },
        ));
        assert!(matches!(outcome, Either::Second(())));
    }

    // Scenario D
    #[test]
    fn test_media_remove_raises_fault() {
        let queue = Queue::new();
        let (handler, _writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let rx = block_on(inject(&handler, &queue, Opcode::MediaRemove, 0));
        assert_eq!(rx, Err(RxError::Device(DeviceError::StorageRemoved)));
        assert_eq!(handler.device_fault(), Some(DeviceError::StorageRemoved));
        assert!(handler.error().is_set());
        assert_eq!(handler.last_rx(), Some(Frame::new(Opcode::MediaRemove, 0)));

        block_on(inject(&handler, &queue, Opcode::MediaInsert, 0)).unwrap();
        assert_eq!(handler.device_fault(), None);
    }

    #[test]
    fn test_media_remove_while_awaiting_ack() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let (result, rx) = block_on(join(handler.next(), async {
            sent(&writer, 1).await;
            let rx = inject(&handler, &queue, Opcode::MediaRemove, 0).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
            rx
        }));
        assert_eq!(rx, Err(RxError::Device(DeviceError::StorageRemoved)));
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_error_frame_sets_error_event() {
        let queue = Queue::new();
        let (handler, _writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        block_on(inject(&handler, &queue, Opcode::Error, 0x0004)).unwrap();
        assert!(handler.error().is_set());
        assert_eq!(handler.last_error(), Some(0x0004));
        assert_eq!(handler.device_fault(), None);
    }

    #[test]
    fn test_unknown_opcode_changes_nothing() {
        let queue = Queue::new();
        let (handler, _writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let mut bytes = device_frame(Opcode::Ack, 0);
        bytes[3] = 0x99;
        // Keep the checksum valid so only the opcode is wrong.
        let sum = dfplayer_proto::checksum(&bytes);
        bytes[7..9].copy_from_slice(&sum.to_be_bytes());

        assert_eq!(handler.classify(&bytes), Err(RxError::Frame(FrameError::UnknownOpcode(0x99))));
        assert!(!handler.ack().is_set());
        assert_eq!(handler.last_rx(), None);
    }

    #[test]
    fn test_query_responses_update_state() {
        let queue = Queue::new();
        let (handler, _writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        block_on(async {
            inject(&handler, &queue, Opcode::QuerySdFiles, 42).await.unwrap();
            inject(&handler, &queue, Opcode::QueryVolume, 18).await.unwrap();
            inject(&handler, &queue, Opcode::QueryEq, 5).await.unwrap();
            inject(&handler, &queue, Opcode::QuerySdTrack, 7).await.unwrap();
            inject(&handler, &queue, Opcode::QueryStatus, 1).await.unwrap();
        });

        assert_eq!(handler.track_count(), 42);
        assert_eq!(handler.volume(), 18);
        assert_eq!(handler.eq(), Equalizer::Bass);
        assert_eq!(handler.current_track(), 7);
        assert_eq!(handler.playback_status(), Some(PlaybackStatus::Playing));
    }

    #[test]
    fn test_query_returns_reply() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let (result, _) = block_on(join(handler.query(Query::SdFiles), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
            inject(&handler, &queue, Opcode::QuerySdFiles, 23).await.unwrap();
        }));

        assert_eq!(result, Ok(23));
        assert_eq!(writer.sent(0), Frame::new(Opcode::QuerySdFiles, 0));
        assert_eq!(handler.track_count(), 23);
    }

    #[test]
    fn test_query_skips_other_replies() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let (result, _) = block_on(join(handler.query(Query::SdFiles), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
            inject(&handler, &queue, Opcode::QueryVolume, 9).await.unwrap();
            for _ in 0..3 {
                yield_now().await;
            }
            inject(&handler, &queue, Opcode::QuerySdFiles, 23).await.unwrap();
        }));

        assert_eq!(result, Ok(23));
        assert_eq!(handler.volume(), 9);
        assert_eq!(handler.track_count(), 23);
    }

    #[test]
    fn test_query_without_reply() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, InstantDelay::new(), HandlerConfig::default());

        let (result, _) = block_on(join(handler.query(Query::Volume), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
        }));
        assert_eq!(result, Err(CommandError::NoReply));
    }

    #[test]
    fn test_concurrent_commands_are_serialized() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());
        let log = RefCell::new(Vec::new());

        block_on(join3(
            async {
                handler.send_command(Opcode::Play, 0).await.unwrap();
                log.borrow_mut().push("play done");
            },
            async {
                handler.send_command(Opcode::VolSet, 10).await.unwrap();
                log.borrow_mut().push("vol done");
            },
            async {
                sent(&writer, 1).await;
                for _ in 0..5 {
                    yield_now().await;
                }
                // Second caller is still waiting for the lock.
                assert_eq!(writer.frame_count(), 1);
                log.borrow_mut().push("ack play");
                inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();

                sent(&writer, 2).await;
                log.borrow_mut().push("ack vol");
                inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
            },
        ));

        assert_eq!(writer.sent(0), Frame::new(Opcode::Play, 0));
        assert_eq!(writer.sent(1), Frame::new(Opcode::VolSet, 10));
        assert_eq!(*log.borrow(), ["ack play", "play done", "ack vol", "vol done"]);
    }

    #[test]
    fn test_ack_timeout_with_retries() {
        let queue = Queue::new();
        let config = HandlerConfig {
            ack_timeout_ms: Some(100),
            retries: 2,
            ..HandlerConfig::default()
        };
        let delay = InstantDelay::new();
        let (handler, writer) = handler(&queue, delay.clone(), config);

        let result = block_on(handler.play_track(3));

        assert_eq!(result, Err(CommandError::AckTimeout));
        assert_eq!(writer.frame_count(), 3);
        for i in 0..3 {
            assert_eq!(writer.sent(i), Frame::new(Opcode::Track, 3));
        }
        assert_eq!(*delay.calls.borrow(), [100, 100, 100]);
        assert_eq!(handler.state(), State::Idle);
        assert_eq!(handler.current_track(), 0);
    }

    #[test]
    fn test_ack_within_timeout() {
        let queue = Queue::new();
        let config = HandlerConfig {
            ack_timeout_ms: Some(100),
            retries: 3,
            ..HandlerConfig::default()
        };
        let (handler, writer) = handler(&queue, NeverDelay, config);

        let (result, _) = block_on(join(handler.volume_up(), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
        }));

        assert_eq!(result, Ok(()));
        assert_eq!(writer.frame_count(), 1);
        assert_eq!(handler.volume(), 1);
    }

    #[test]
    fn test_cancelled_command_releases_lock() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        let outcome = block_on(embassy_futures::select::select(handler.play(), async {
            sent(&writer, 1).await;
            assert_eq!(handler.state(), State::AwaitingAck);
        }));
        assert!(matches!(outcome, Either::Second(())));
        assert_eq!(handler.state(), State::Idle);

        let (result, _) = block_on(join(handler.pause(), async {
            sent(&writer, 2).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
        }));
        assert_eq!(result, Ok(()));
        assert_eq!(writer.sent(1), Frame::new(Opcode::Stop, 0));
    }

    #[test]
    fn test_folder_track_packing() {
        let queue = Queue::new();
        let (handler, writer) = handler(&queue, NeverDelay, HandlerConfig::default());

        block_on(join(handler.play_folder_track(2, 7), async {
            sent(&writer, 1).await;
            inject(&handler, &queue, Opcode::Ack, 0).await.unwrap();
        }))
        .0
        .unwrap();
        assert_eq!(writer.sent(0), Frame::new(Opcode::FolderTrack, 0x0207));
    }
}
