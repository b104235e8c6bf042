use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ads::{AdsState, AmsAddr, AmsNetId, Client, DeviceInfo};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::HostAms;
use crate::{
    Ack, Batch, Config, Demultiplexer, Error, ErrorKind, Message, PollScheduler, ReadType, Result,
    SessionLogger, SubscriptionRegistry, SymbolBinding, SymbolResolver, Update,
};

/// How long a notification-mode `read_batch` waits for an update before giving up.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    New,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl State {
    fn from_u8(state: u8) -> Self {
        match state {
            0 => State::New,
            1 => State::Connecting,
            2 => State::Connected,
            3 => State::Closing,
            _ => State::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            State::New => 0,
            State::Connecting => 1,
            State::Connected => 2,
            State::Closing => 3,
            State::Closed => 4,
        }
    }
}

type Updates = Arc<Mutex<mpsc::Receiver<Update>>>;

/// Everything owned by one established connection.
#[derive(Clone)]
struct Session {
    id: u64,
    client: Client,
    registry: Arc<SubscriptionRegistry>,
    bindings: Vec<Arc<SymbolBinding>>,
    /// Present in notification mode.
    updates: Option<Updates>,
    closing: CancellationToken,
    device: DeviceInfo,
    plc_state: AdsState,
}

/// What `prepare` sets up on a fresh connection.
struct Prepared {
    device: DeviceInfo,
    plc_state: AdsState,
    bindings: Vec<Arc<SymbolBinding>>,
    updates: Option<Updates>,
}

/// Streams PLC symbol values to a host pipeline.
///
/// The host drives it through `connect`, `read_batch` and `close`. Transitions are serialised;
/// `read_batch` runs alongside them and only briefly touches the session.
pub struct AdsInput {
    config: Config,
    logger: SessionLogger,
    state: AtomicU8,
    session: Mutex<Option<Session>>,
    session_ids: AtomicU64,
}

impl AdsInput {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let logger = SessionLogger::new(config.log_level, "ads_input");
        Ok(AdsInput {
            config,
            logger,
            state: AtomicU8::new(State::New.as_u8()),
            session: Mutex::new(None),
            session_ids: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Opens the connection, resolves every symbol and, in notification mode, subscribes them.
    ///
    /// Succeeds immediately if already connected. On failure everything set up so far is
    /// released and the input is left `Closed`, ready for another attempt.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        if self.state() == State::Connected && slot.is_some() {
            return Ok(());
        }

        self.set_state(State::Connecting);
        match self.establish().await {
            Ok(session) => {
                *slot = Some(session);
                self.set_state(State::Connected);
                Ok(())
            }
            Err(error) => {
                session_log!(self.logger, Error, "connect failed: {}", error);
                self.set_state(State::Closed);
                Err(error)
            }
        }
    }

    async fn establish(&self) -> Result<Session> {
        let config = &self.config;
        let target = AmsAddr::new(config.target_net_id()?, config.port);

        let stream = ads::open_tcp(&config.target_ip, config.tcp_port, config.timeout()).await?;
        let source_net_id = match config.host()? {
            HostAms::NetId(net_id) => net_id,
            HostAms::Auto => {
                let local = stream.local_addr().map_err(ads::Error::from)?;
                net_id_for(local.ip())?
            }
        };
        let source = AmsAddr::new(source_net_id, ads::DEFAULT_SOURCE_PORT);
        session_log!(self.logger, Debug, "opened route {} -> {}", source, target);

        let (reader, writer) = stream.into_split();
        let client = Client::new(reader, writer, target, source, config.timeout());
        let registry = Arc::new(SubscriptionRegistry::new());
        let closing = CancellationToken::new();

        match self.prepare(&client, &registry, &closing).await {
            Ok(prepared) => Ok(Session {
                id: self.session_ids.fetch_add(1, Ordering::Relaxed),
                client,
                registry,
                bindings: prepared.bindings,
                updates: prepared.updates,
                closing,
                device: prepared.device,
                plc_state: prepared.plc_state,
            }),
            Err(error) => {
                closing.cancel();
                registry.release_all(&client, &self.logger).await;
                client.close();
                Err(error)
            }
        }
    }

    async fn prepare(
        &self,
        client: &Client,
        registry: &Arc<SubscriptionRegistry>,
        closing: &CancellationToken,
    ) -> Result<Prepared> {
        let config = &self.config;

        let device = client.read_device_info().await?;
        session_log!(
            self.logger,
            Info,
            "connected to {:?} version {}.{} (build {})",
            device.name,
            device.major,
            device.minor,
            device.build
        );
        // Requests made once notifications flow can stall behind a full delivery channel, so
        // the state is read before the sink goes in.
        let plc_state = client.read_state().await?;

        let updates = match config.read_type {
            ReadType::Notification => {
                let (demux, updates) = Demultiplexer::channel(
                    registry.clone(),
                    config.symbols.len(),
                    closing.clone(),
                    self.logger.clone(),
                );
                client.register_notification_sink(demux);
                Some(Arc::new(Mutex::new(updates)))
            }
            ReadType::Interval => None,
        };

        let bindings = SymbolResolver::new(client, &self.logger)
            .resolve_all(&config.symbols)
            .await?;
        if config.read_type == ReadType::Notification {
            for (slot, binding) in bindings.iter().enumerate() {
                registry
                    .register(
                        client,
                        &self.logger,
                        slot,
                        binding.clone(),
                        config.cycle_time(),
                        config.max_delay(),
                    )
                    .await?;
            }
        }

        session_log!(
            self.logger,
            Info,
            "{} symbols ready ({:?} mode)",
            bindings.len(),
            config.read_type
        );
        Ok(Prepared {
            device,
            plc_state,
            bindings,
            updates,
        })
    }

    async fn current(&self) -> Result<Session> {
        if self.state() != State::Connected {
            return Err(ErrorKind::NotConnected.into());
        }
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| ErrorKind::NotConnected.into())
    }

    /// Waits for the next batch of messages.
    ///
    /// In notification mode a batch holds a single update and the wait is bounded by
    /// `IDLE_TIMEOUT`. In interval mode every symbol is read and the call then sleeps for
    /// `intervalTime`. Cancelling `cancel` abandons the wait without touching the session.
    pub async fn read_batch(&self, cancel: &CancellationToken) -> Result<(Batch, Ack)> {
        let session = self.current().await?;

        let result = match &session.updates {
            Some(updates) => self.next_update(&session, updates, cancel).await,
            None => {
                PollScheduler::new(
                    &session.client,
                    &session.bindings,
                    self.config.interval_time(),
                    &self.logger,
                )
                .read_batch(cancel, &session.closing)
                .await
            }
        };

        let updates = match result {
            Ok(updates) => updates,
            Err(error) => {
                if let ErrorKind::TransportClosed = error.kind {
                    self.lost(session.id).await;
                }
                return Err(error);
            }
        };

        let batch = updates
            .iter()
            .map(Message::from_update)
            .collect::<Result<Batch>>()?;
        Ok((batch, Ack::new()))
    }

    async fn next_update(
        &self,
        session: &Session,
        updates: &Mutex<mpsc::Receiver<Update>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Update>> {
        let received = async {
            let mut updates = updates.lock().await;
            updates.recv().await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ErrorKind::Cancelled.into()),
            _ = session.closing.cancelled() => Err(ErrorKind::Cancelled.into()),
            update = received => match update {
                Some(update) => Ok(vec![update]),
                None if session.closing.is_cancelled() => Err(ErrorKind::Cancelled.into()),
                None => Err(ErrorKind::TransportClosed.into()),
            },
            _ = session.client.closed() => Err(ErrorKind::TransportClosed.into()),
            _ = tokio::time::sleep(IDLE_TIMEOUT) => Err(ErrorKind::IdleTimeout.into()),
        }
    }

    /// Discards a session whose connection dropped. The PLC removes its notifications when the
    /// socket closes, so there is nothing to release.
    async fn lost(&self, id: u64) {
        let mut slot = self.session.lock().await;
        let session = match slot.take() {
            Some(session) if session.id == id => session,
            other => {
                *slot = other;
                return;
            }
        };

        session_log!(self.logger, Warn, "connection to {} lost", session.client.target());
        session.closing.cancel();
        session.client.close();
        if let Some(updates) = &session.updates {
            updates.lock().await.close();
        }
        self.set_state(State::Closed);
    }

    /// Deletes every notification, closes the delivery channel and then the connection.
    /// Closing an input that is not connected succeeds without doing anything.
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        let session = match slot.take() {
            Some(session) => session,
            None => {
                self.set_state(State::Closed);
                return Ok(());
            }
        };

        self.set_state(State::Closing);
        // Wakes any read_batch and unblocks the demultiplexer so that the Rx task keeps
        // reading the delete responses.
        session.closing.cancel();

        let total = session.registry.len();
        let released = session
            .registry
            .release_all(&session.client, &self.logger)
            .await;
        if released < total {
            session_log!(
                self.logger,
                Warn,
                "released {} of {} notification handles",
                released,
                total
            );
        }

        if let Some(updates) = &session.updates {
            updates.lock().await.close();
        }
        session.client.close();
        self.set_state(State::Closed);
        session_log!(self.logger, Info, "closed connection to {}", session.client.target());
        Ok(())
    }

    /// The PLC's identity as reported while connecting.
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        Ok(self.current().await?.device)
    }

    /// The ADS and device state the PLC reported while connecting.
    pub async fn read_state(&self) -> Result<AdsState> {
        Ok(self.current().await?.plc_state)
    }

    /// Number of notification handles currently held on the PLC.
    pub async fn subscription_count(&self) -> usize {
        match &*self.session.lock().await {
            Some(session) => session.registry.len(),
            None => 0,
        }
    }
}

/// Derives the local AMS NetId from the address the connection was made from.
fn net_id_for(ip: IpAddr) -> Result<AmsNetId> {
    let ipv4 = match ip {
        IpAddr::V4(ipv4) => Some(ipv4),
        IpAddr::V6(ipv6) => ipv6.to_ipv4_mapped(),
    };
    ipv4.map(AmsNetId::from_ipv4).ok_or_else(|| {
        Error::config(format!(
            "hostAMS auto needs a local IPv4 address, connection uses {}",
            ip
        ))
    })
}
