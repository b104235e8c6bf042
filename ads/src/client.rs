use std::sync::{Arc, Mutex};
use std::time::Duration;

use ads_helpers::{awaiting, IncrementingId};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::frame;
use crate::{
    AdsState, AmsAddr, DeviceInfo, Error, ErrorKind, IndexGroup, IndexOffset, InvokeId,
    Notification, NotificationAttributes, NotificationHandle, Packet, ReadWire, Request,
    Response, Result, SymbolInfo,
};

type Awaiting = awaiting::Awaiting<InvokeId, Response, Error>;

/// Receives device notifications from the Rx task.
///
/// `deliver` may wait (for example on a full channel); while it does, the Rx task stops reading
/// the socket and the device is throttled by TCP. Returning `false` detaches the sink.
pub trait NotificationSink: Send + 'static {
    fn deliver(&mut self, notification: Notification) -> BoxFuture<'_, bool>;
}

/// A command from Client to the Tx task, representing an encoded request.
struct AdsCommand {
    invoke_id: InvokeId,
    frame: Vec<u8>,
    sender: oneshot::Sender<Result<Response>>,
}

/// Shared state between the client handles and the Rx and Tx tasks.
struct Shared {
    awaiting: Awaiting,
    sink: Mutex<Option<Box<dyn NotificationSink>>>,
}

impl Shared {
    fn take_sink(&self) -> Option<Box<dyn NotificationSink>> {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// An ADS session over one AMS/TCP connection.
///
/// Cloning is cheap; all clones share the same connection. Requests may be issued concurrently.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<AdsCommand>,
    shared: Arc<Shared>,
    invoke_ids: IncrementingId,
    shutdown: CancellationToken,
    target: AmsAddr,
    source: AmsAddr,
    timeout: Duration,
}

impl Client {
    pub fn new<R, W>(reader: R, writer: W, target: AmsAddr, source: AmsAddr, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader = frame::Reader::new(reader);
        let writer = frame::Writer::new(writer);

        let (commands_tx, commands_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            awaiting: Awaiting::new(),
            sink: Mutex::new(None),
        });

        let rx = Rx {
            shared: shared.clone(),
            reader,
            sink: None,
            shutdown: shutdown.clone(),
        };
        let tx = Tx {
            shared: shared.clone(),
            writer,
            commands: commands_rx,
            shutdown: shutdown.clone(),
        };

        tokio::spawn(rx.task());
        tokio::spawn(tx.task());

        Self {
            commands: commands_tx,
            shared,
            invoke_ids: IncrementingId::new(),
            shutdown,
            target,
            source,
            timeout,
        }
    }

    pub fn target(&self) -> AmsAddr {
        self.target
    }

    pub fn source(&self) -> AmsAddr {
        self.source
    }

    /// Installs the sink that receives every subsequent device notification, replacing any
    /// previous one.
    pub fn register_notification_sink<S>(&self, sink: S)
    where
        S: NotificationSink,
    {
        *self
            .shared
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(sink));
    }

    /// Stops both tasks. Outstanding requests fail with `TransportClosed` and the socket is
    /// dropped. Calling this more than once is harmless.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the session has shut down, whether by `close` or because the connection
    /// was lost.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.awaiting.len()
    }

    pub async fn make_request(&self, request: Request) -> Result<Response> {
        if self.is_closed() {
            return Err(ErrorKind::TransportClosed.into());
        }

        let invoke_id = self.invoke_ids.next();
        let frame = request.into_frame(self.target, self.source, invoke_id)?;
        let (sender, receiver) = oneshot::channel();

        // Queueing counts against the timeout too: the Tx task may be stuck on a full socket.
        let response = async {
            let command = AdsCommand {
                invoke_id,
                frame,
                sender,
            };
            if self.commands.send(command).await.is_err() {
                return Err(ErrorKind::TransportClosed.into());
            }
            match receiver.await {
                Ok(result) => result,
                Err(_) => Err(ErrorKind::TransportClosed.into()),
            }
        };

        match tokio::time::timeout(self.timeout, response).await {
            Ok(result) => result,
            Err(_) => {
                self.shared.awaiting.deregister(&invoke_id);
                Err(ErrorKind::Timeout.into())
            }
        }
    }

    pub async fn read_device_info(&self) -> Result<DeviceInfo> {
        match self.make_request(Request::ReadDeviceInfo).await? {
            Response::ReadDeviceInfo(device_info) => Ok(device_info),
            resp => Err(ErrorKind::UnexpectedResponse(resp.command_id()).into()),
        }
    }

    pub async fn read_state(&self) -> Result<AdsState> {
        match self.make_request(Request::ReadState).await? {
            Response::ReadState(state) => Ok(state),
            resp => Err(ErrorKind::UnexpectedResponse(resp.command_id()).into()),
        }
    }

    pub async fn read(
        &self,
        index_group: IndexGroup,
        index_offset: IndexOffset,
        length: u32,
    ) -> Result<Vec<u8>> {
        let request = Request::Read {
            index_group,
            index_offset,
            length,
        };
        match self.make_request(request).await? {
            Response::Read(data) => Ok(data),
            resp => Err(ErrorKind::UnexpectedResponse(resp.command_id()).into()),
        }
    }

    pub async fn read_write(
        &self,
        index_group: IndexGroup,
        index_offset: IndexOffset,
        read_length: u32,
        data: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let request = Request::ReadWrite {
            index_group,
            index_offset,
            read_length,
            data,
        };
        match self.make_request(request).await? {
            Response::ReadWrite(data) => Ok(data),
            resp => Err(ErrorKind::UnexpectedResponse(resp.command_id()).into()),
        }
    }

    /// Looks up a symbol's location, size and type by its fully-qualified name.
    pub async fn symbol_info(&self, name: &str) -> Result<SymbolInfo> {
        let data = match self.make_request(Request::symbol_info(name)).await? {
            Response::ReadWrite(data) => data,
            resp => return Err(ErrorKind::UnexpectedResponse(resp.command_id()).into()),
        };
        SymbolInfo::read_wire(&mut std::io::Cursor::new(data))
    }

    pub async fn add_device_notification(
        &self,
        index_group: IndexGroup,
        index_offset: IndexOffset,
        attributes: NotificationAttributes,
    ) -> Result<NotificationHandle> {
        let request = Request::AddDeviceNotification {
            index_group,
            index_offset,
            attributes,
        };
        match self.make_request(request).await? {
            Response::AddDeviceNotification(handle) => Ok(handle),
            resp => Err(ErrorKind::UnexpectedResponse(resp.command_id()).into()),
        }
    }

    pub async fn delete_device_notification(&self, handle: NotificationHandle) -> Result<()> {
        match self
            .make_request(Request::DeleteDeviceNotification { handle })
            .await?
        {
            Response::DeleteDeviceNotification => Ok(()),
            resp => Err(ErrorKind::UnexpectedResponse(resp.command_id()).into()),
        }
    }
}

/// Task responsible for receiving packets from the device.
///
/// Forwards responses to futures awaiting a response using the oneshots registered by Tx task.
/// Hands notifications to the registered sink, in the order they were read off the socket.
struct Rx<R>
where
    R: AsyncRead + Unpin,
{
    shared: Arc<Shared>,
    reader: frame::Reader<R>,
    sink: Option<Box<dyn NotificationSink>>,
    shutdown: CancellationToken,
}

impl<R> Rx<R>
where
    R: AsyncRead + Unpin,
{
    async fn task(mut self) {
        let result = self.run().await;
        match result {
            Ok(()) => debug!("rx: shutdown requested"),
            Err(Error {
                kind: ErrorKind::TransportClosed,
            }) => info!("rx: connection closed by peer"),
            Err(error) => error!("rx: terminating session: {}", error),
        }

        self.shutdown.cancel();
        self.sink = None;
        drop(self.shared.take_sink());
        let failed = self
            .shared
            .awaiting
            .fail_all(|| ErrorKind::TransportClosed.into());
        if failed > 0 {
            debug!("rx: failed {} outstanding requests", failed);
        }
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                frame = self.reader.read_frame() => frame?,
            };

            if !self.process_frame(frame).await? {
                return Ok(());
            }
        }
    }

    /// Returns `false` if shutdown was requested while the frame was being handled.
    async fn process_frame(&mut self, frame: Vec<u8>) -> Result<bool> {
        let (header, packet) = match Packet::from_frame(&frame) {
            Ok(decoded) => decoded,
            Err(error) => {
                error!(
                    "rx: malformed packet (invoke ID {:?}): {}",
                    Packet::peek_invoke_id(&frame),
                    error
                );
                return Err(error);
            }
        };
        debug!(
            "received {} from {} (invoke ID {})",
            header.command_id, header.source, header.invoke_id
        );

        match packet {
            Packet::Response { invoke_id, result } => {
                self.route_response(invoke_id, result);
                Ok(true)
            }
            Packet::Notification(notification) => self.route_notification(notification).await,
        }
    }

    fn route_response(&self, invoke_id: InvokeId, result: Result<Response>) {
        if let Some(result) = self.shared.awaiting.send(&invoke_id, result) {
            warn!("rx: unexpected response for invoke ID {}: {:?}", invoke_id, result);
        }
    }

    async fn route_notification(&mut self, notification: Notification) -> Result<bool> {
        if let Some(sink) = self.shared.take_sink() {
            self.sink = Some(sink);
        }

        let sink = match self.sink.as_mut() {
            Some(sink) => sink,
            None => {
                debug!(
                    "rx: dropping notification with {} samples, no sink registered",
                    notification.sample_count()
                );
                return Ok(true);
            }
        };

        let keep = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(false),
            keep = sink.deliver(notification) => keep,
        };
        if !keep {
            debug!("rx: notification sink detached");
            self.sink = None;
        }
        Ok(true)
    }
}

/// Task responsible for transmitting requests to the device.
///
/// Registers oneshot senders for each request, so that the Rx task can route responses to the
/// correct future.
struct Tx<W>
where
    W: AsyncWrite + Unpin,
{
    shared: Arc<Shared>,
    writer: frame::Writer<W>,
    commands: mpsc::Receiver<AdsCommand>,
    shutdown: CancellationToken,
}

impl<W> Tx<W>
where
    W: AsyncWrite + Unpin,
{
    async fn task(mut self) {
        loop {
            let command = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            let AdsCommand {
                invoke_id,
                frame,
                sender,
            } = command;

            // Refused when the caller already gave up (timed out).
            if !self.shared.awaiting.register(invoke_id, sender) {
                continue;
            }
            if let Err(error) = self.write_frame(&frame).await {
                error!("tx: write failed for invoke ID {}: {}", invoke_id, error);
                self.shared.awaiting.send(&invoke_id, Err(error));
                break;
            }
        }

        self.shutdown.cancel();
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            let _ = command.sender.send(Err(ErrorKind::TransportClosed.into()));
        }
        if let Err(error) = self.writer.shutdown().await {
            debug!("tx: socket shutdown: {}", error);
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        debug!("sending {} bytes", frame.len());
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(ErrorKind::TransportClosed.into()),
            result = self.writer.write_frame(frame) => result,
        }
    }
}
