//! Link session management
//!
//! Handles the connection lifecycle, the read loop, write arbitration and
//! event fan-out to the registered listener.
//!
//! Three flows of control touch the session: callers issuing writes, the
//! connect/read thread and the watchdog thread. All bookkeeping lives behind
//! one mutex; blocking transport I/O, including `close()`, happens outside
//! of it.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::codec::{encode, FrameDecoder};
use super::sink::{EventSink, SessionEvent};
use super::transport::{LinkConnector, LinkTransport};
use super::watchdog::{Watchdog, WatchdogAction, WatchdogConfig};
use super::command::bypasses_busy_gate;
use super::{DriveCommand, LinkError, DEFAULT_BAUD_RATE};

const REASON_USER: &str = "Connection ended";
const REASON_LOST: &str = "Connection lost";
const REASON_REPLACED: &str = "Connection replaced";

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No connection
    Idle,
    /// Transport is being opened
    Connecting,
    /// Link open, writes accepted
    Connected,
}

/// Link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Keepalive and timeout thresholds
    pub watchdog: WatchdogConfig,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Size of the read buffer handed to the transport
    pub read_buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            watchdog: WatchdogConfig::default(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_buffer_size: 1024,
        }
    }
}

/// Cumulative link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_frames: u64,
    pub rx_frames: u64,
    pub keepalives: u64,
    pub connects: u64,
}

enum Dispatch {
    Event(Weak<dyn EventSink>, SessionEvent),
    Sync(mpsc::SyncSender<()>),
}

/// Mutable session bookkeeping, guarded by one mutex
struct SessionState {
    state: LinkState,
    busy: bool,
    /// Teardown latch, at most one disconnect per connection
    stopping: bool,
    /// A filler was written and no reply has arrived yet
    keepalive_pending: bool,
    /// Terminal event already emitted for this connection
    terminated: bool,
    last_activity: Instant,
    /// Bumped on every connect; background threads exit on mismatch
    generation: u64,
    transport: Option<Arc<dyn LinkTransport>>,
    device_id: Option<String>,
    sink: Option<Weak<dyn EventSink>>,
    stats: LinkStats,
    dispatch: mpsc::Sender<Dispatch>,
}

impl SessionState {
    fn emit(&mut self, event: SessionEvent) {
        if self.terminated {
            debug!("Suppressed event after teardown: {:?}", event);
            return;
        }
        if event.is_terminal() {
            self.terminated = true;
        }
        match &self.sink {
            Some(sink) => {
                let _ = self.dispatch.send(Dispatch::Event(sink.clone(), event));
            }
            None => debug!("No listener, dropped {:?}", event),
        }
    }

    /// Go idle and emit the terminal event. Hands back the transport,
    /// which the caller closes once the lock is released.
    fn teardown(&mut self, reason: &str) -> Option<Arc<dyn LinkTransport>> {
        if self.stopping {
            return None;
        }
        self.stopping = true;
        info!("Stopping link: {}", reason);
        self.set_state(LinkState::Idle);
        self.busy = false;
        self.keepalive_pending = false;
        self.emit(SessionEvent::Cancel(reason.to_string()));
        self.transport.take()
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            info!("Link state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && !self.stopping
    }
}

fn close(transport: Option<Arc<dyn LinkTransport>>) {
    if let Some(transport) = transport {
        transport.close();
    }
}

struct Shared {
    connector: Box<dyn LinkConnector>,
    config: LinkConfig,
    state: Mutex<SessionState>,
    dispatcher: thread::ThreadId,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Long-lived duplex link to the robot.
///
/// Create one at startup and hand clones to whoever needs to talk to the
/// robot. Cloning is cheap and every clone refers to the same session.
#[derive(Clone)]
pub struct LinkSession {
    shared: Arc<Shared>,
}

impl LinkSession {
    /// Create an idle session using the given connection strategy
    pub fn new<C: LinkConnector + 'static>(
        connector: C,
        config: LinkConfig,
    ) -> Result<Self, LinkError> {
        config.watchdog.validate()?;

        let (tx, rx) = mpsc::channel();
        let dispatcher = thread::Builder::new()
            .name("link-events".into())
            .spawn(move || dispatch_loop(rx))?;

        Ok(Self {
            shared: Arc::new(Shared {
                connector: Box::new(connector),
                config,
                state: Mutex::new(SessionState {
                    state: LinkState::Idle,
                    busy: false,
                    stopping: false,
                    keepalive_pending: false,
                    terminated: false,
                    last_activity: Instant::now(),
                    generation: 0,
                    transport: None,
                    device_id: None,
                    sink: None,
                    stats: LinkStats::default(),
                    dispatch: tx,
                }),
                dispatcher: dispatcher.thread().id(),
            }),
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Current connection state
    pub fn state(&self) -> LinkState {
        self.shared.lock().state
    }

    /// Whether a command is waiting for the robot's reply
    pub fn is_busy(&self) -> bool {
        self.shared.lock().busy
    }

    /// Device of the current or last connection
    pub fn device_id(&self) -> Option<String> {
        self.shared.lock().device_id.clone()
    }

    /// Get cumulative counters
    pub fn stats(&self) -> LinkStats {
        self.shared.lock().stats
    }

    /// Time since the robot was last heard from
    pub fn idle_time(&self) -> Duration {
        self.shared.lock().last_activity.elapsed()
    }

    /// Register the listener, replacing the previous one.
    ///
    /// Only a weak reference is kept.
    pub fn set_sink<S: EventSink + 'static>(&self, sink: &Arc<S>) {
        let weak: Weak<dyn EventSink> = Arc::downgrade(sink) as Weak<dyn EventSink>;
        self.shared.lock().sink = Some(weak);
    }

    /// Deregister the listener; later events are dropped
    pub fn clear_sink(&self) {
        self.shared.lock().sink = None;
    }

    /// Tell the listener it finished normally and deregister it
    pub fn finish(&self) {
        let mut st = self.shared.lock();
        if let Some(sink) = st.sink.take() {
            if !st.terminated {
                let _ = st.dispatch.send(Dispatch::Event(sink, SessionEvent::Ok));
            }
        }
    }

    /// Start connecting to a device. Returns immediately; the outcome
    /// arrives as a `Connected` or `Cancel` event.
    pub fn connect(&self, device_id: &str) -> Result<(), LinkError> {
        info!("Connecting to {}", device_id);
        let (generation, stale) = {
            let mut st = self.shared.lock();
            let stale = if st.state != LinkState::Idle && !st.stopping {
                st.teardown(REASON_REPLACED)
            } else {
                st.transport.take()
            };

            st.stopping = false;
            st.busy = false;
            st.keepalive_pending = false;
            st.terminated = false;
            st.generation += 1;
            st.device_id = Some(device_id.to_string());
            st.last_activity = Instant::now();
            st.set_state(LinkState::Connecting);
            (st.generation, stale)
        };
        close(stale);

        let shared = Arc::clone(&self.shared);
        let device = device_id.to_string();
        let spawned = thread::Builder::new()
            .name("link-io".into())
            .spawn(move || run_connection(shared, generation, device))
            .and_then(|_| {
                let shared = Arc::clone(&self.shared);
                thread::Builder::new()
                    .name("link-watchdog".into())
                    .spawn(move || run_watchdog(shared, generation))
            });

        if let Err(e) = spawned {
            error!("Failed to start link threads: {}", e);
            let stale = {
                let mut st = self.shared.lock();
                if st.generation == generation {
                    st.teardown("Unable to connect")
                } else {
                    None
                }
            };
            close(stale);
            return Err(e.into());
        }
        Ok(())
    }

    /// Send a command, reporting why it was rejected
    pub fn try_write(&self, command: &str) -> Result<(), LinkError> {
        let (transport, generation) = {
            let mut st = self.shared.lock();
            if st.state != LinkState::Connected || st.stopping {
                return Err(LinkError::NotConnected);
            }
            if st.busy && !bypasses_busy_gate(command) {
                debug!("Busy, rejected: {}", command);
                return Err(LinkError::Busy);
            }
            let transport = st.transport.clone().ok_or(LinkError::NotConnected)?;
            st.busy = true;
            st.emit(SessionEvent::WriteEcho(command.to_string()));
            (transport, st.generation)
        };

        debug!("Write: {}", command);
        let bytes = encode(Some(command));
        match transport.write_bytes(&bytes) {
            Ok(()) => {
                let mut st = self.shared.lock();
                if st.generation == generation {
                    st.last_activity = Instant::now();
                    st.stats.tx_bytes = st.stats.tx_bytes.saturating_add(bytes.len() as u64);
                    st.stats.tx_frames = st.stats.tx_frames.saturating_add(1);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Write of '{}' failed: {}", command, e);
                Err(e)
            }
        }
    }

    /// Send a command. Returns false when not connected, busy, or the
    /// transport write failed.
    pub fn write(&self, command: &str) -> bool {
        self.try_write(command).is_ok()
    }

    /// Send a structured command
    pub fn write_command(&self, command: &DriveCommand) -> bool {
        self.write(&command.to_string())
    }

    /// End the connection
    pub fn disconnect(&self) {
        self.disconnect_with_reason(REASON_USER);
    }

    /// End the connection, telling the listener why
    pub fn disconnect_with_reason(&self, reason: &str) {
        let transport = self.shared.lock().teardown(reason);
        close(transport);
    }

    /// Block until every event queued so far has been handed to its listener.
    ///
    /// Called from inside [`EventSink::on_event`] it returns at once: events
    /// run one at a time on the dispatch thread, so everything queued before
    /// the current event has already been delivered.
    pub fn sync_events(&self) {
        if thread::current().id() == self.shared.dispatcher {
            debug!("sync_events called from the dispatch thread");
            return;
        }
        let (tx, rx) = mpsc::sync_channel(1);
        let sent = self.shared.lock().dispatch.send(Dispatch::Sync(tx)).is_ok();
        if sent {
            let _ = rx.recv_timeout(Duration::from_secs(5));
        }
    }
}

fn dispatch_loop(rx: mpsc::Receiver<Dispatch>) {
    for msg in rx {
        match msg {
            Dispatch::Event(sink, event) => {
                if let Some(sink) = sink.upgrade() {
                    sink.on_event(event);
                }
            }
            Dispatch::Sync(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

/// Open the transport, then run the read loop on this thread
fn run_connection(shared: Arc<Shared>, generation: u64, device_id: String) {
    let opened = shared.connector.open(&device_id);

    let transport = {
        let mut st = shared.lock();
        if !st.is_current(generation) || st.state != LinkState::Connecting {
            drop(st);
            // Disconnected or replaced while the open was blocking
            if let Ok(transport) = opened {
                debug!("Discarding late connection to {}", device_id);
                transport.close();
            }
            return;
        }
        match opened {
            Ok(transport) => {
                let transport: Arc<dyn LinkTransport> = Arc::from(transport);
                info!("Connected to {} via {}", device_id, transport.describe());
                st.transport = Some(Arc::clone(&transport));
                st.last_activity = Instant::now();
                st.stats.connects = st.stats.connects.saturating_add(1);
                st.set_state(LinkState::Connected);
                st.emit(SessionEvent::Connected);
                transport
            }
            Err(e) => {
                error!("Could not connect to {}: {}", device_id, e);
                // Nothing was opened, so there is no transport to close
                let _ = st.teardown(&format!("Unable to connect: {}", e));
                return;
            }
        }
    };

    read_loop(&shared, generation, &transport);
    transport.close();
}

fn read_loop(shared: &Shared, generation: u64, transport: &Arc<dyn LinkTransport>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; shared.config.read_buffer_size.max(1)];

    loop {
        let result = transport.read_chunk(&mut buf);

        let mut st = shared.lock();
        if !st.is_current(generation) {
            break;
        }
        match result {
            Ok(n) if n > 0 => {
                for frame in decoder.feed(&buf[..n]) {
                    debug!("Read: {}", frame);
                    st.stats.rx_frames = st.stats.rx_frames.saturating_add(1);
                    st.emit(SessionEvent::Read(frame));
                }
                st.stats.rx_bytes = st.stats.rx_bytes.saturating_add(n as u64);
                st.busy = false;
                st.keepalive_pending = false;
                st.last_activity = Instant::now();
            }
            // The caller closes the transport once the loop ends
            Ok(_) => {
                warn!("Link closed by remote");
                let _ = st.teardown(REASON_LOST);
                break;
            }
            Err(e) => {
                error!("Failed to read: {}", e);
                let _ = st.teardown(REASON_LOST);
                break;
            }
        }
    }
}

fn run_watchdog(shared: Arc<Shared>, generation: u64) {
    let dog = Watchdog::new(shared.config.watchdog);
    let filler = encode(None);
    debug!("Watchdog started");

    loop {
        thread::sleep(dog.config().tick());

        let mut st = shared.lock();
        if !st.is_current(generation) || st.state == LinkState::Idle {
            break;
        }

        let idle = st.last_activity.elapsed();
        let busy = st.busy || st.keepalive_pending;
        match dog.check(st.state, busy, idle) {
            WatchdogAction::None => {}
            WatchdogAction::Keepalive => {
                st.keepalive_pending = true;
                let Some(transport) = st.transport.clone() else {
                    continue;
                };
                drop(st);

                if let Err(e) = transport.write_bytes(&filler) {
                    debug!("Keepalive write failed: {}", e);
                    continue;
                }
                let mut st = shared.lock();
                if st.generation == generation {
                    st.stats.keepalives = st.stats.keepalives.saturating_add(1);
                    st.stats.tx_bytes = st.stats.tx_bytes.saturating_add(filler.len() as u64);
                }
            }
            WatchdogAction::Timeout => {
                error!("Timeout after {}ms of silence", idle.as_millis());
                let transport = st.teardown(&LinkError::Timeout.to_string());
                drop(st);
                close(transport);
                break;
            }
        }
    }
    debug!("Watchdog stopped");
}
