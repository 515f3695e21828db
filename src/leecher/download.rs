//! Parallel multi-source download scheduler. One worker thread per assigned
//! seeder pulls chunk indices off a shared bounded queue, fetches, verifies,
//! and either fills the chunk's slot or re-queues it against a different
//! seeder.

use crate::client;
use crate::config::Config;
use crate::error::{ChunkSwarmError, Result};
use crate::leecher::reassembly;
use crate::protocol::{self, Command, Control, Message, PeerAddr};
use crate::seeder::ChunkStore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Shared cancellation flag. Cloning shares the same underlying flag, so a
/// caller can hand one half to [`download`] and cancel from another thread.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A monotonically non-decreasing view of completed-chunk progress. Cheap to
/// clone and poll from another thread.
#[derive(Clone)]
pub struct Progress {
    completed: Arc<AtomicU32>,
    total: u32,
}

impl Progress {
    fn new(total: u32) -> Self {
        Progress {
            completed: Arc::new(AtomicU32::new(0)),
            total,
        }
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u32 {
        self.total
    }
}

/// What a completed download leaves behind: the reassembled file, and a
/// [`ChunkStore`] built from the same verified bytes so the caller can
/// promote to a Seeder without re-reading or re-hashing the file.
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub store: ChunkStore,
}

fn peer_socket_addr(peer: &PeerAddr) -> Result<SocketAddr> {
    let ip: IpAddr = peer
        .address
        .parse()
        .map_err(|_| ChunkSwarmError::ParseError(format!("bad peer address {:?}", peer.address)))?;
    Ok(SocketAddr::new(ip, peer.port))
}

fn discover_peers(tracker_addr: SocketAddr, file_name: &str, timeout: Duration) -> Result<Vec<PeerAddr>> {
    let reply = client::request_expecting_reply(
        tracker_addr,
        &Message::Command(Command::Request {
            file_name: file_name.to_string(),
        }),
        timeout,
    )?;
    match reply {
        Message::Control(Control::PeerList { peers }) => Ok(peers),
        other => Err(ChunkSwarmError::ParseError(format!(
            "unexpected tracker reply to REQUEST: {other:?}"
        ))),
    }
}

fn get_chunk_count(
    tracker_addr: SocketAddr,
    file_name: &str,
    timeout: Duration,
) -> Result<(u32, Option<[u8; 32]>)> {
    let reply = client::request_expecting_reply(
        tracker_addr,
        &Message::Command(Command::GetCount {
            file_name: file_name.to_string(),
        }),
        timeout,
    )?;
    match reply {
        Message::Control(Control::ChunkCount { chunk_count, file_hash }) => Ok((chunk_count, file_hash)),
        Message::Control(Control::Error { error_text }) => Err(ChunkSwarmError::UnknownFile(error_text)),
        other => Err(ChunkSwarmError::ParseError(format!(
            "unexpected tracker reply to GET_COUNT: {other:?}"
        ))),
    }
}

/// Tries each peer in turn until one answers GET_HASHES: the digest vector
/// is fetched once, up front, over a stream connection -- not piggybacked on
/// the tracker datagram exchange.
fn fetch_hashes(peers: &[PeerAddr], file_name: &str, timeout: Duration) -> Result<Vec<[u8; 32]>> {
    for peer in peers {
        let addr = match peer_socket_addr(peer) {
            Ok(addr) => addr,
            Err(_) => continue,
        };
        match fetch_hashes_from(addr, file_name, timeout) {
            Ok(hashes) => return Ok(hashes),
            Err(err) => {
                log::debug!("leecher: GET_HASHES to {addr} failed: {err}");
            }
        }
    }
    Err(ChunkSwarmError::NoSeeders(file_name.to_string()))
}

fn fetch_hashes_from(addr: SocketAddr, file_name: &str, timeout: Duration) -> Result<Vec<[u8; 32]>> {
    let mut stream = connect(addr, timeout)?;
    protocol::write_stream_frame(
        &mut stream,
        &Message::Command(Command::GetHashes {
            file_name: file_name.to_string(),
        }),
    )?;
    match protocol::read_stream_frame(&mut stream)? {
        Message::Control(Control::ChunkHashes { hashes }) => Ok(hashes),
        Message::Control(Control::Error { error_text }) => Err(ChunkSwarmError::Remote(error_text)),
        other => Err(ChunkSwarmError::ParseError(format!(
            "unexpected reply to GET_HASHES: {other:?}"
        ))),
    }
}

fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream =
        TcpStream::connect_timeout(&addr, timeout).map_err(|err| ChunkSwarmError::ConnectFailed(addr, err))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}

fn fetch_chunk(addr: SocketAddr, file_name: &str, index: u32, timeout: Duration) -> Result<Vec<u8>> {
    let mut stream = connect(addr, timeout)?;
    protocol::write_stream_frame(
        &mut stream,
        &Message::Command(Command::Get {
            file_name: file_name.to_string(),
            chunk_index: index,
        }),
    )?;
    match protocol::read_stream_frame(&mut stream)? {
        Message::Control(Control::ChunkData { bytes }) => Ok(bytes),
        Message::Control(Control::Error { error_text }) => Err(ChunkSwarmError::Remote(error_text)),
        other => Err(ChunkSwarmError::ParseError(format!(
            "unexpected reply to GET: {other:?}"
        ))),
    }
}

struct Shared {
    file_name: String,
    peers: Mutex<Vec<PeerAddr>>,
    tracker_addr: SocketAddr,
    hashes: Vec<[u8; 32]>,
    slots: Vec<Mutex<Option<Vec<u8>>>>,
    retry_counts: Mutex<HashMap<u32, u32>>,
    retry_budget: u32,
    chunk_timeout: Duration,
    discovery_timeout: Duration,
    requeried: AtomicBool,
    completed: AtomicU32,
    failure: Mutex<Option<ChunkSwarmError>>,
    cancel: CancellationToken,
}

impl Shared {
    fn note_failure(&self, err: ChunkSwarmError) {
        let mut failure = self.failure.lock().unwrap();
        if failure.is_none() {
            *failure = Some(err);
        }
        self.cancel.cancel();
    }

    /// Records a failed attempt at `index`. Re-enqueues it unless the retry
    /// budget is exhausted, in which case the whole download is failed.
    /// After the index has failed against every known seeder at least once,
    /// re-queries the tracker for a fresh peer list -- at most once per
    /// download.
    fn retry_or_fail(&self, index: u32, tx: &crossbeam::channel::Sender<u32>) {
        let count = {
            let mut counts = self.retry_counts.lock().unwrap();
            let count = counts.entry(index).or_insert(0);
            *count += 1;
            *count
        };

        if count > self.retry_budget {
            self.note_failure(ChunkSwarmError::FailedChunk(index));
            return;
        }

        let peer_count = self.peers.lock().unwrap().len();
        if peer_count > 0 && count as usize >= peer_count && !self.requeried.swap(true, Ordering::SeqCst) {
            match discover_peers(self.tracker_addr, &self.file_name, self.discovery_timeout) {
                Ok(fresh) if !fresh.is_empty() => {
                    *self.peers.lock().unwrap() = fresh;
                }
                _ => {}
            }
        }

        if tx.send(index).is_err() {
            self.note_failure(ChunkSwarmError::Cancelled);
        }
    }
}

fn worker_loop(
    worker_id: usize,
    rx: crossbeam::channel::Receiver<u32>,
    tx: crossbeam::channel::Sender<u32>,
    shared: &Shared,
) {
    let mut cursor = worker_id;
    loop {
        if shared.cancel.is_cancelled() {
            return;
        }
        let index = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(index) => index,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
        };

        let peer = {
            let peers = shared.peers.lock().unwrap();
            if peers.is_empty() {
                shared.note_failure(ChunkSwarmError::NoSeeders(shared.file_name.clone()));
                return;
            }
            let peer = peers[cursor % peers.len()].clone();
            cursor = cursor.wrapping_add(1);
            peer
        };

        let addr = match peer_socket_addr(&peer) {
            Ok(addr) => addr,
            Err(_) => {
                shared.retry_or_fail(index, &tx);
                continue;
            }
        };

        match fetch_chunk(addr, &shared.file_name, index, shared.chunk_timeout) {
            Ok(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let actual: [u8; 32] = hasher.finalize().into();
                let expected = shared.hashes[index as usize];
                if actual == expected {
                    *shared.slots[index as usize].lock().unwrap() = Some(bytes);
                    shared.completed.fetch_add(1, Ordering::SeqCst);
                } else {
                    log::debug!(
                        "leecher: chunk {index} from {addr} failed hash verification, retrying"
                    );
                    shared.retry_or_fail(index, &tx);
                }
            }
            Err(err) => {
                log::debug!("leecher: GET chunk {index} from {addr} failed: {err}");
                shared.retry_or_fail(index, &tx);
            }
        }
    }
}

/// Downloads `file_name` into `download_dir`: discovers seeders, fetches the
/// chunk count and per-chunk hashes, then runs a bounded worker pool over a
/// shared queue of chunk indices until every chunk is verified and written.
/// Returns the reassembled file's path plus a [`ChunkStore`] built from the
/// verified bytes, ready for promotion to a Seeder.
pub fn download(
    tracker_addr: SocketAddr,
    file_name: &str,
    download_dir: &Path,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<(DownloadOutcome, Progress)> {
    let peers = discover_peers(tracker_addr, file_name, config.discovery_timeout)?;
    if peers.is_empty() {
        return Err(ChunkSwarmError::NoSeeders(file_name.to_string()));
    }

    let (chunk_count, file_hash) = get_chunk_count(tracker_addr, file_name, config.discovery_timeout)?;
    let progress = Progress::new(chunk_count);

    if chunk_count == 0 {
        let (path, _) = reassembly::reassemble(download_dir, file_name, &[], file_hash)?;
        let empty_hash: [u8; 32] = Sha256::digest(b"").into();
        let store = ChunkStore::from_parts(config.chunk_size, Vec::new(), Vec::new(), file_hash.unwrap_or(empty_hash));
        return Ok((DownloadOutcome { path, store }, progress));
    }

    let hashes = fetch_hashes(&peers, file_name, config.chunk_timeout)?;
    if hashes.len() != chunk_count as usize {
        return Err(ChunkSwarmError::ParseError(format!(
            "tracker reported chunk_count={chunk_count} but seeder returned {} hashes",
            hashes.len()
        )));
    }

    let slots = (0..chunk_count).map(|_| Mutex::new(None)).collect();
    let shared = Shared {
        file_name: file_name.to_string(),
        peers: Mutex::new(peers.clone()),
        tracker_addr,
        hashes: hashes.clone(),
        slots,
        retry_counts: Mutex::new(HashMap::new()),
        retry_budget: config.retry_budget_per_chunk,
        chunk_timeout: config.chunk_timeout,
        discovery_timeout: config.discovery_timeout,
        requeried: AtomicBool::new(false),
        completed: AtomicU32::new(0),
        failure: Mutex::new(None),
        cancel: cancel.clone(),
    };

    let (tx, rx) = crossbeam::channel::bounded::<u32>(chunk_count as usize);
    for index in 0..chunk_count {
        tx.send(index).expect("queue sized to chunk_count");
    }

    let num_workers = config.parallelism.min(peers.len()).max(1);

    thread::scope(|scope| {
        for worker_id in 0..num_workers {
            let rx = rx.clone();
            let tx = tx.clone();
            let shared = &shared;
            scope.spawn(move || worker_loop(worker_id, rx, tx, shared));
        }
        drop(tx);
        drop(rx);

        loop {
            if shared.cancel.is_cancelled() {
                break;
            }
            if shared.failure.lock().unwrap().is_some() {
                break;
            }
            if shared.completed.load(Ordering::SeqCst) >= chunk_count {
                break;
            }
            progress.completed.store(shared.completed.load(Ordering::SeqCst), Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
        }
        shared.cancel.cancel();
    });

    progress.completed.store(shared.completed.load(Ordering::SeqCst), Ordering::SeqCst);

    if let Some(err) = shared.failure.into_inner().unwrap() {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(ChunkSwarmError::Cancelled);
    }

    let chunks: Vec<Vec<u8>> = shared
        .slots
        .into_iter()
        .map(|slot| slot.into_inner().unwrap().expect("every slot filled before loop exit"))
        .collect();

    let (path, actual_file_hash) = reassembly::reassemble(download_dir, file_name, &chunks, file_hash)?;
    let store = ChunkStore::from_parts(config.chunk_size, chunks, hashes, actual_file_hash);

    Ok((DownloadOutcome { path, store }, progress))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeder::SeederServer;
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

    fn start_seeder(tracker_addr: SocketAddr) -> SeederServer {
        SeederServer::start(
            "127.0.0.1:0".parse().unwrap(),
            tracker_addr,
            Duration::from_secs(30),
            Duration::from_secs(5),
            4,
        )
        .unwrap()
    }

    #[test]
    fn downloads_and_verifies_a_small_file() {
        let tracker = start_tracker();
        let seeder = start_seeder(tracker.local_addr());

        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("hello.bin");
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        std::fs::File::create(&src_path).unwrap().write_all(&data).unwrap();
        seeder.host_file("hello.bin".into(), &src_path, 512).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let config = Config {
            chunk_size: 512,
            parallelism: 2,
            ..Config::default()
        };
        let cancel = CancellationToken::new();
        let (outcome, progress) =
            download(tracker.local_addr(), "hello.bin", dst_dir.path(), &config, &cancel).unwrap();

        assert_eq!(std::fs::read(&outcome.path).unwrap(), data);
        assert_eq!(progress.completed(), progress.total());
        assert_eq!(outcome.store.chunk_count(), 4);

        seeder.shutdown();
        tracker.shutdown();
    }

    #[test]
    fn unknown_file_is_no_seeders() {
        let tracker = start_tracker();
        let dst_dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let cancel = CancellationToken::new();
        let err = download(tracker.local_addr(), "ghost.bin", dst_dir.path(), &config, &cancel).unwrap_err();
        assert!(matches!(err, ChunkSwarmError::NoSeeders(_)));
        tracker.shutdown();
    }

    #[test]
    fn two_seeders_serve_the_same_file_in_parallel() {
        let tracker = start_tracker();
        let seeder_a = start_seeder(tracker.local_addr());
        let seeder_b = start_seeder(tracker.local_addr());

        let data: Vec<u8> = (0..4000u32).map(|i| (i % 197) as u8).collect();
        for seeder in [&seeder_a, &seeder_b] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("shared.bin");
            std::fs::File::create(&path).unwrap().write_all(&data).unwrap();
            seeder.host_file("shared.bin".into(), &path, 512).unwrap();
            std::mem::forget(dir);
        }

        let dst_dir = tempfile::tempdir().unwrap();
        let config = Config {
            chunk_size: 512,
            parallelism: 4,
            ..Config::default()
        };
        let cancel = CancellationToken::new();
        let (outcome, _progress) =
            download(tracker.local_addr(), "shared.bin", dst_dir.path(), &config, &cancel).unwrap();
        assert_eq!(std::fs::read(&outcome.path).unwrap(), data);

        seeder_a.shutdown();
        seeder_b.shutdown();
        tracker.shutdown();
    }
}
