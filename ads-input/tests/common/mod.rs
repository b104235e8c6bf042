//! An in-process PLC that speaks just enough ADS for the connector tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ads_input::{Config, LogLevel, ReadType};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const FILETIME_1700000000: u64 = 133_444_736_000_000_000;

pub const FIRST_HANDLE: u32 = 0x1001;

const SYMBOL_NOT_FOUND: u32 = 0x0710;
const INVALID_INDEX_OFFSET: u32 = 0x0703;
const INVALID_SIZE: u32 = 0x0705;
const INVALID_NOTIFICATION_HANDLE: u32 = 0x0714;
const DEVICE_ERROR: u32 = 0x0700;
const NOTIFICATION_LIMIT: u32 = 0x0712;

const SYM_INFOBYNAMEEX: u32 = 0xF009;
const PLC_RW_M: u32 = 0x4020;

const CMD_READ_DEVICE_INFO: u16 = 1;
const CMD_READ: u16 = 2;
const CMD_READ_STATE: u16 = 4;
const CMD_ADD_NOTIFICATION: u16 = 6;
const CMD_DELETE_NOTIFICATION: u16 = 7;
const CMD_NOTIFICATION: u16 = 8;
const CMD_READ_WRITE: u16 = 9;

#[derive(Clone, Debug)]
struct Symbol {
    name: String,
    index_offset: u32,
    size: u32,
    data_type: u32,
    type_name: String,
    value: Vec<u8>,
}

/// A request as the PLC saw it.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestRecord {
    pub command: u16,
    pub target: ([u8; 6], u16),
    pub source: ([u8; 6], u16),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Subscribed {
    pub handle: u32,
    pub index_offset: u32,
    pub length: u32,
    pub transmission_mode: u32,
    pub max_delay: u32,
    pub cycle_time: u32,
}

struct Connection {
    id: u64,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    closed: CancellationToken,
}

#[derive(Default)]
struct PlcState {
    symbols: Vec<Symbol>,
    failing_reads: HashSet<String>,
    rejected_adds: HashSet<String>,
    failing_deletes: HashSet<u32>,
    next_offset: u32,
    next_handle: u32,
    next_connection: u64,
    /// Live handles and the connection that owns them.
    active: HashMap<u32, u64>,
    requests: Vec<RequestRecord>,
    added: Vec<Subscribed>,
    deleted: Vec<u32>,
    connections: usize,
    connection: Option<Connection>,
}

impl PlcState {
    fn symbol_by_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols
            .iter()
            .find(|symbol| symbol.name.eq_ignore_ascii_case(name))
    }

    fn symbol_at(&self, index_offset: u32) -> Option<&Symbol> {
        self.symbols
            .iter()
            .find(|symbol| symbol.index_offset == index_offset)
    }
}

#[derive(Clone)]
pub struct MockPlc {
    addr: SocketAddr,
    state: Arc<Mutex<PlcState>>,
}

impl MockPlc {
    pub async fn start() -> MockPlc {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(PlcState {
            next_handle: FIRST_HANDLE,
            ..Default::default()
        }));

        let plc = MockPlc { addr, state };
        tokio::spawn(plc.clone().serve(listener));
        plc
    }

    fn lock(&self) -> MutexGuard<'_, PlcState> {
        self.state.lock().unwrap()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Adds a symbol in the `%M` area and returns its index offset.
    pub fn symbol(&self, name: &str, type_name: &str, data_type: u32, value: Vec<u8>) -> u32 {
        let mut state = self.lock();
        let index_offset = state.next_offset;
        let size = value.len() as u32;
        state.next_offset += size.max(1);
        state.symbols.push(Symbol {
            name: name.to_owned(),
            index_offset,
            size,
            data_type,
            type_name: type_name.to_owned(),
            value,
        });
        index_offset
    }

    pub fn fail_reads(&self, name: &str) {
        self.lock().failing_reads.insert(name.to_ascii_uppercase());
    }

    /// Refuses AddDeviceNotification for the symbol `name`.
    pub fn reject_add(&self, name: &str) {
        self.lock().rejected_adds.insert(name.to_ascii_uppercase());
    }

    /// Answers DeleteDeviceNotification for `handle` with a device error.
    pub fn fail_delete(&self, handle: u32) {
        self.lock().failing_deletes.insert(handle);
    }

    pub fn config(&self, read_type: ReadType, symbols: &[&str]) -> Config {
        let mut config = Config::new("127.0.0.1", "127.0.0.1.1.1", symbols.iter().copied());
        config.port = 851;
        config.tcp_port = self.port();
        config.read_type = read_type;
        config.cycle_time = 100;
        config.max_delay = 0;
        config.interval_time = 500;
        config.timeout = 2;
        config.log_level = LogLevel::Trace;
        config
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.lock().requests.clone()
    }

    pub fn commands(&self) -> Vec<u16> {
        self.lock().requests.iter().map(|request| request.command).collect()
    }

    pub fn added(&self) -> Vec<u32> {
        self.lock().added.iter().map(|added| added.handle).collect()
    }

    pub fn subscriptions(&self) -> Vec<Subscribed> {
        self.lock().added.clone()
    }

    pub fn deleted(&self) -> Vec<u32> {
        self.lock().deleted.clone()
    }

    /// Handles that are registered and whose connection is still open.
    pub fn active(&self) -> usize {
        self.lock().active.len()
    }

    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Emits one stamp with one sample on the current connection.
    pub fn notify(&self, handle: u32, filetime: u64, data: Vec<u8>) {
        self.notify_samples(filetime, vec![(handle, data)]);
    }

    pub fn notify_samples(&self, filetime: u64, samples: Vec<(u32, Vec<u8>)>) {
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(1).unwrap();
        payload.write_u64::<LittleEndian>(filetime).unwrap();
        payload.write_u32::<LittleEndian>(samples.len() as u32).unwrap();
        for (handle, data) in samples {
            payload.write_u32::<LittleEndian>(handle).unwrap();
            payload.write_u32::<LittleEndian>(data.len() as u32).unwrap();
            payload.extend(data);
        }

        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
        body.extend(payload);

        let state = self.lock();
        let connection = state.connection.as_ref().expect("no client connected");
        // The connector's source address is the target of notifications.
        let client = state
            .requests
            .last()
            .map(|request| request.source)
            .unwrap_or(([0; 6], 0));
        let plc = ([127, 0, 0, 1, 1, 1], 851);
        let frame = frame(client, plc, CMD_NOTIFICATION, 4, 0, &body);
        connection.frames.send(frame).unwrap();
    }

    /// Drops the current connection as if the PLC had gone away.
    pub fn disconnect(&self) {
        if let Some(connection) = self.lock().connection.take() {
            connection.closed.cancel();
        }
    }

    /// Polls until `condition` holds, for up to a second.
    pub async fn wait_until<F>(&self, condition: F)
    where
        F: Fn(&MockPlc) -> bool,
    {
        for _ in 0..100 {
            if condition(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn serve(self, listener: TcpListener) {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(self.clone().connection(stream));
        }
    }

    async fn connection(self, stream: TcpStream) {
        let (mut reader, mut writer) = stream.into_split();
        let (frames, mut outbound) = mpsc::unbounded_channel::<Vec<u8>>();
        let closed = CancellationToken::new();

        let id = {
            let mut state = self.lock();
            let id = state.next_connection;
            state.next_connection += 1;
            state.connections += 1;
            state.connection = Some(Connection {
                id,
                frames: frames.clone(),
                closed: closed.clone(),
            });
            id
        };

        let writer_closed = closed.clone();
        let writer_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    frame = outbound.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                if tokio::io::AsyncWriteExt::write_all(&mut writer, &frame)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        loop {
            let request = tokio::select! {
                _ = closed.cancelled() => break,
                request = read_frame(&mut reader) => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            let response = self.respond(id, &request);
            if frames.send(response).is_err() {
                break;
            }
        }

        closed.cancel();
        let _ = writer_task.await;
        drop(reader);

        let mut state = self.lock();
        state.active.retain(|_, owner| *owner != id);
        if state.connection.as_ref().map(|c| c.id) == Some(id) {
            state.connection = None;
        }
    }

    fn respond(&self, connection: u64, request: &[u8]) -> Vec<u8> {
        let mut r = Cursor::new(request);
        let target = read_addr(&mut r);
        let source = read_addr(&mut r);
        let command = r.read_u16::<LittleEndian>().unwrap();
        let _flags = r.read_u16::<LittleEndian>().unwrap();
        let _length = r.read_u32::<LittleEndian>().unwrap();
        let _error = r.read_u32::<LittleEndian>().unwrap();
        let invoke_id = r.read_u32::<LittleEndian>().unwrap();

        let mut state = self.lock();
        state.requests.push(RequestRecord {
            command,
            target,
            source,
        });

        let mut body = Vec::new();
        match command {
            CMD_READ_DEVICE_INFO => {
                body.write_u32::<LittleEndian>(0).unwrap();
                body.write_u8(3).unwrap();
                body.write_u8(1).unwrap();
                body.write_u16::<LittleEndian>(4024).unwrap();
                let mut name = [0u8; 16];
                name[..9].copy_from_slice(b"Plc30 App");
                body.extend_from_slice(&name);
            }
            CMD_READ_STATE => {
                body.write_u32::<LittleEndian>(0).unwrap();
                body.write_u16::<LittleEndian>(5).unwrap();
                body.write_u16::<LittleEndian>(0).unwrap();
            }
            CMD_READ => {
                let index_group = r.read_u32::<LittleEndian>().unwrap();
                let index_offset = r.read_u32::<LittleEndian>().unwrap();
                let length = r.read_u32::<LittleEndian>().unwrap();

                let symbol = state
                    .symbol_at(index_offset)
                    .filter(|_| index_group == PLC_RW_M);
                match symbol {
                    None => body.write_u32::<LittleEndian>(INVALID_INDEX_OFFSET).unwrap(),
                    Some(symbol) if symbol.size != length => {
                        body.write_u32::<LittleEndian>(INVALID_SIZE).unwrap()
                    }
                    Some(symbol)
                        if state
                            .failing_reads
                            .contains(&symbol.name.to_ascii_uppercase()) =>
                    {
                        body.write_u32::<LittleEndian>(INVALID_SIZE).unwrap()
                    }
                    Some(symbol) => {
                        body.write_u32::<LittleEndian>(0).unwrap();
                        body.write_u32::<LittleEndian>(symbol.size).unwrap();
                        body.extend_from_slice(&symbol.value);
                    }
                }
            }
            CMD_READ_WRITE => {
                let index_group = r.read_u32::<LittleEndian>().unwrap();
                let _index_offset = r.read_u32::<LittleEndian>().unwrap();
                let _read_length = r.read_u32::<LittleEndian>().unwrap();
                let write_length = r.read_u32::<LittleEndian>().unwrap();
                let mut data = vec![0; write_length as usize];
                r.read_exact(&mut data).unwrap();
                let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                let name = String::from_utf8_lossy(&data[..end]).into_owned();

                match state.symbol_by_name(&name).filter(|_| index_group == SYM_INFOBYNAMEEX) {
                    None => body.write_u32::<LittleEndian>(SYMBOL_NOT_FOUND).unwrap(),
                    Some(symbol) => {
                        let entry = symbol_entry(symbol);
                        body.write_u32::<LittleEndian>(0).unwrap();
                        body.write_u32::<LittleEndian>(entry.len() as u32).unwrap();
                        body.extend(entry);
                    }
                }
            }
            CMD_ADD_NOTIFICATION => {
                let _index_group = r.read_u32::<LittleEndian>().unwrap();
                let index_offset = r.read_u32::<LittleEndian>().unwrap();
                let length = r.read_u32::<LittleEndian>().unwrap();
                let transmission_mode = r.read_u32::<LittleEndian>().unwrap();
                let max_delay = r.read_u32::<LittleEndian>().unwrap();
                let cycle_time = r.read_u32::<LittleEndian>().unwrap();

                let rejected = state
                    .symbol_at(index_offset)
                    .map(|symbol| symbol.name.to_ascii_uppercase())
                    .map_or(false, |name| state.rejected_adds.contains(&name));
                if rejected {
                    body.write_u32::<LittleEndian>(NOTIFICATION_LIMIT).unwrap();
                    return frame(source, target, command, 5, invoke_id, &body);
                }

                let handle = state.next_handle;
                state.next_handle += 1;
                state.active.insert(handle, connection);
                state.added.push(Subscribed {
                    handle,
                    index_offset,
                    length,
                    transmission_mode,
                    max_delay,
                    cycle_time,
                });
                body.write_u32::<LittleEndian>(0).unwrap();
                body.write_u32::<LittleEndian>(handle).unwrap();
            }
            CMD_DELETE_NOTIFICATION => {
                let handle = r.read_u32::<LittleEndian>().unwrap();
                if state.failing_deletes.contains(&handle) {
                    body.write_u32::<LittleEndian>(DEVICE_ERROR).unwrap();
                } else if state.active.remove(&handle).is_some() {
                    state.deleted.push(handle);
                    body.write_u32::<LittleEndian>(0).unwrap();
                } else {
                    body.write_u32::<LittleEndian>(INVALID_NOTIFICATION_HANDLE)
                        .unwrap();
                }
            }
            _ => body.write_u32::<LittleEndian>(0x0701).unwrap(),
        }

        frame(source, target, command, 5, invoke_id, &body)
    }
}

fn read_addr(r: &mut Cursor<&[u8]>) -> ([u8; 6], u16) {
    let mut net_id = [0; 6];
    r.read_exact(&mut net_id).unwrap();
    let port = r.read_u16::<LittleEndian>().unwrap();
    (net_id, port)
}

fn symbol_entry(symbol: &Symbol) -> Vec<u8> {
    let comment = format!("{} for tests", symbol.name);
    let mut entry = Vec::new();
    entry.write_u32::<LittleEndian>(PLC_RW_M).unwrap();
    entry.write_u32::<LittleEndian>(symbol.index_offset).unwrap();
    entry.write_u32::<LittleEndian>(symbol.size).unwrap();
    entry.write_u32::<LittleEndian>(symbol.data_type).unwrap();
    entry.write_u32::<LittleEndian>(0x0008).unwrap();
    entry.write_u16::<LittleEndian>(symbol.name.len() as u16).unwrap();
    entry.write_u16::<LittleEndian>(symbol.type_name.len() as u16).unwrap();
    entry.write_u16::<LittleEndian>(comment.len() as u16).unwrap();
    for text in [&symbol.name, &symbol.type_name, &comment] {
        entry.extend_from_slice(text.as_bytes());
        entry.push(0);
    }

    let mut with_length = Vec::new();
    with_length
        .write_u32::<LittleEndian>(entry.len() as u32 + 4)
        .unwrap();
    with_length.extend(entry);
    with_length
}

fn frame(
    target: ([u8; 6], u16),
    source: ([u8; 6], u16),
    command: u16,
    flags: u16,
    invoke_id: u32,
    body: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.write_u16::<LittleEndian>(0).unwrap();
    frame.write_u32::<LittleEndian>(32 + body.len() as u32).unwrap();
    for (net_id, port) in [target, source] {
        frame.extend_from_slice(&net_id);
        frame.write_u16::<LittleEndian>(port).unwrap();
    }
    frame.write_u16::<LittleEndian>(command).unwrap();
    frame.write_u16::<LittleEndian>(flags).unwrap();
    frame.write_u32::<LittleEndian>(body.len() as u32).unwrap();
    frame.write_u32::<LittleEndian>(0).unwrap();
    frame.write_u32::<LittleEndian>(invoke_id).unwrap();
    frame.extend_from_slice(body);
    frame
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Option<Vec<u8>> {
    let mut preamble = [0; 6];
    tokio::io::AsyncReadExt::read_exact(reader, &mut preamble).await.ok()?;
    let length = u32::from_le_bytes([preamble[2], preamble[3], preamble[4], preamble[5]]);
    let mut frame = vec![0; length as usize];
    tokio::io::AsyncReadExt::read_exact(reader, &mut frame).await.ok()?;
    Some(frame)
}
