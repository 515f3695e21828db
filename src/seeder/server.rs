//! The Seeder: registers hosted files with the Tracker, beacons liveness,
//! and serves chunk requests over one connection per request.

use crate::client;
use crate::error::{ChunkSwarmError, Result};
use crate::protocol::{self, Command, Control, Message};
use crate::seeder::chunking::ChunkStore;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type FileTable = Arc<Mutex<HashMap<String, Arc<ChunkStore>>>>;

/// A running Seeder: an accept loop feeding a bounded worker pool, plus a
/// periodic heartbeat activity.
pub struct SeederServer {
    local_addr: SocketAddr,
    tracker_addr: SocketAddr,
    files: FileTable,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    worker_threads: Vec<JoinHandle<()>>,
    heartbeat_thread: Option<JoinHandle<()>>,
}

impl SeederServer {
    /// Binds the stream listener and starts the accept loop, worker pool,
    /// and heartbeat activity. Does not host any files yet -- call
    /// [`host_file`](Self::host_file) or [`host_store`](Self::host_store)
    /// for each file to announce.
    pub fn start(
        bind_addr: SocketAddr,
        tracker_addr: SocketAddr,
        keepalive_interval: Duration,
        serve_timeout: Duration,
        max_inflight_serves: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        let local_addr = listener.local_addr()?;
        let files: FileTable = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (tx, rx) = crossbeam::channel::bounded::<TcpStream>(max_inflight_serves);

        let worker_threads = (0..max_inflight_serves)
            .map(|_| {
                let rx = rx.clone();
                let files = Arc::clone(&files);
                thread::spawn(move || {
                    for stream in rx {
                        let _ = stream.set_read_timeout(Some(serve_timeout));
                        let _ = stream.set_write_timeout(Some(serve_timeout));
                        serve_connection(stream, &files);
                    }
                })
            })
            .collect();

        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            listener.set_nonblocking(true)?;
            thread::spawn(move || accept_loop(listener, tx, shutdown))
        };

        let heartbeat_thread = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                heartbeat_loop(local_addr.port(), tracker_addr, keepalive_interval, shutdown)
            })
        };

        Ok(SeederServer {
            local_addr,
            tracker_addr,
            files,
            shutdown,
            accept_thread: Some(accept_thread),
            worker_threads,
            heartbeat_thread: Some(heartbeat_thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ingests `path`, stores its chunks, and registers it with the tracker.
    pub fn host_file(&self, file_name: String, path: &std::path::Path, chunk_size: usize) -> Result<()> {
        let store = ChunkStore::ingest(path, chunk_size)?;
        self.host_store(file_name, store)
    }

    /// Registers an already-built `ChunkStore` (used by a promoted leecher,
    /// whose chunks already live in the reassembled file).
    pub fn host_store(&self, file_name: String, store: ChunkStore) -> Result<()> {
        let chunk_count = store.chunk_count();
        let file_hash = store.file_hash();
        self.files
            .lock()
            .unwrap()
            .insert(file_name.clone(), Arc::new(store));

        let register = Message::Command(Command::Register {
            file_name,
            peer_port: self.local_addr.port(),
            chunk_count,
            file_hash: Some(file_hash),
        });
        let reply = client::request_expecting_reply(self.tracker_addr, &register, Duration::from_secs(5))?;
        match reply {
            Message::Control(Control::Ack) => Ok(()),
            Message::Control(Control::Error { error_text }) => Err(ChunkSwarmError::Remote(error_text)),
            other => Err(ChunkSwarmError::ParseError(format!(
                "unexpected tracker reply to REGISTER: {other:?}"
            ))),
        }
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.heartbeat_thread.take() {
            let _ = handle.join();
        }
        for handle in self.worker_threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SeederServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn accept_loop(
    listener: TcpListener,
    tx: crossbeam::channel::Sender<TcpStream>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                // Queues rather than refuses when the worker pool is busy.
                if tx.send(stream).is_err() {
                    break;
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock =>
            {
                thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                log::warn!("seeder: accept failed: {err}");
            }
        }
    }
}

fn heartbeat_loop(
    peer_port: u16,
    tracker_addr: SocketAddr,
    keepalive_interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(keepalive_interval.min(Duration::from_millis(200)));
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        // a full keepalive_interval may not yet have elapsed if it's shorter
        // than our polling granularity; that's fine, this is advisory.
        let keepalive = Message::Command(Command::Keepalive { peer_port });
        if let Err(err) = client::request_expecting_reply(tracker_addr, &keepalive, Duration::from_secs(5)) {
            log::debug!("seeder: keepalive to {tracker_addr} failed: {err}");
        }
    }
}

/// Per-connection state machine: AWAITING_REQUEST -> (valid) -> SENDING_CHUNK
/// -> CLOSED; (invalid) -> SENDING_ERROR -> CLOSED. Exactly one chunk request
/// handled per connection, then the socket is closed.
fn serve_connection(mut stream: TcpStream, files: &FileTable) {
    let peer = stream.peer_addr().ok();
    let request = match protocol::read_stream_frame(&mut stream) {
        Ok(message) => message,
        Err(err) => {
            log::debug!("seeder: failed to read request from {peer:?}: {err}");
            return;
        }
    };

    let reply = match request {
        Message::Command(Command::Get {
            file_name,
            chunk_index,
        }) => handle_get(files, &file_name, chunk_index),
        Message::Command(Command::GetHashes { file_name }) => handle_get_hashes(files, &file_name),
        other => Message::Control(Control::Error {
            error_text: format!("expected GET or GET_HASHES, got {other:?}"),
        }),
    };

    if let Err(err) = protocol::write_stream_frame(&mut stream, &reply) {
        log::debug!("seeder: failed to write reply to {peer:?}: {err}");
    }
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

fn handle_get(files: &FileTable, file_name: &str, chunk_index: u32) -> Message {
    let store = match files.lock().unwrap().get(file_name).cloned() {
        Some(store) => store,
        None => {
            return Message::Control(Control::Error {
                error_text: format!("unknown file {file_name:?}"),
            })
        }
    };

    match store.chunk(chunk_index) {
        Some(bytes) => Message::Control(Control::ChunkData {
            bytes: bytes.to_vec(),
        }),
        None => Message::Control(Control::Error {
            error_text: format!(
                "chunk_index {chunk_index} out of range (chunk_count={})",
                store.chunk_count()
            ),
        }),
    }
}

fn handle_get_hashes(files: &FileTable, file_name: &str) -> Message {
    match files.lock().unwrap().get(file_name).cloned() {
        Some(store) => Message::Control(Control::ChunkHashes {
            hashes: store.hashes().to_vec(),
        }),
        None => Message::Control(Control::Error {
            error_text: format!("unknown file {file_name:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerServer;
    use std::io::Write as _;

    fn start_tracker() -> TrackerServer {
        TrackerServer::start(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_secs(90),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn serves_a_chunk_and_registers_with_tracker() {
        let tracker = start_tracker();
        let seeder = SeederServer::start(
            "127.0.0.1:0".parse().unwrap(),
            tracker.local_addr(),
            Duration::from_secs(30),
            Duration::from_secs(5),
            4,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&vec![42u8; 10])
            .unwrap();

        seeder.host_file("hello.bin".into(), &path, 4).unwrap();

        assert_eq!(tracker.registry().peer_list("hello.bin").len(), 1);

        let mut stream = TcpStream::connect(seeder.local_addr()).unwrap();
        protocol::write_stream_frame(
            &mut stream,
            &Message::Command(Command::Get {
                file_name: "hello.bin".into(),
                chunk_index: 1,
            }),
        )
        .unwrap();
        match protocol::read_stream_frame(&mut stream).unwrap() {
            Message::Control(Control::ChunkData { bytes }) => assert_eq!(bytes, vec![42u8; 4]),
            other => panic!("unexpected reply: {other:?}"),
        }

        seeder.shutdown();
        tracker.shutdown();
    }

    #[test]
    fn get_out_of_range_chunk_is_error() {
        let tracker = start_tracker();
        let seeder = SeederServer::start(
            "127.0.0.1:0".parse().unwrap(),
            tracker.local_addr(),
            Duration::from_secs(30),
            Duration::from_secs(5),
            4,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        std::fs::File::create(&path).unwrap().write_all(&[1, 2, 3]).unwrap();
        seeder.host_file("small.bin".into(), &path, 512).unwrap();

        let mut stream = TcpStream::connect(seeder.local_addr()).unwrap();
        protocol::write_stream_frame(
            &mut stream,
            &Message::Command(Command::Get {
                file_name: "small.bin".into(),
                chunk_index: 5,
            }),
        )
        .unwrap();
        assert!(matches!(
            protocol::read_stream_frame(&mut stream).unwrap(),
            Message::Control(Control::Error { .. })
        ));

        seeder.shutdown();
        tracker.shutdown();
    }
}
