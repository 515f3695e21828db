//! The Tracker's connectionless request/response loop plus its background
//! reaper.

use crate::protocol::{self, Command, Control, Message, PeerAddr};
use crate::tracker::registry::FileRegistry;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A running Tracker: one datagram request-handler loop plus one periodic
/// reaper, sharing a `FileRegistry` behind a single mutex.
pub struct TrackerServer {
    local_addr: SocketAddr,
    registry: Arc<FileRegistry>,
    shutdown: Arc<AtomicBool>,
    request_loop: Option<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
}

impl TrackerServer {
    /// Binds the tracker's UDP socket and starts both background activities.
    /// `bind_addr` is typically `0.0.0.0:5000` by default, but tests bind to
    /// `127.0.0.1:0` for an ephemeral port.
    pub fn start(
        bind_addr: SocketAddr,
        liveness_timeout: Duration,
        reap_interval: Duration,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        let local_addr = socket.local_addr()?;
        let registry = Arc::new(FileRegistry::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let request_loop = {
            let registry = Arc::clone(&registry);
            let shutdown = Arc::clone(&shutdown);
            // Read timeouts give the accept loop a suspension point at which
            // to observe shutdown, per ss5.
            socket.set_read_timeout(Some(Duration::from_millis(200)))?;
            thread::spawn(move || request_loop(socket, registry, shutdown))
        };

        let reaper = {
            let registry = Arc::clone(&registry);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || reaper_loop(registry, shutdown, liveness_timeout, reap_interval))
        };

        Ok(TrackerServer {
            local_addr,
            registry,
            shutdown,
            request_loop: Some(request_loop),
            reaper: Some(reaper),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.request_loop.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.reaper.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TrackerServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn request_loop(socket: UdpSocket, registry: Arc<FileRegistry>, shutdown: Arc<AtomicBool>) {
    let mut buf = vec![0u8; protocol::MAX_DATAGRAM_PAYLOAD];
    while !shutdown.load(Ordering::SeqCst) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(err) => {
                log::warn!("tracker: datagram recv failed: {err}");
                continue;
            }
        };

        let message = match protocol::decode(&buf[..len]) {
            Ok(message) => message,
            Err(err) => {
                // Malformed datagrams are logged and dropped, no response --
                // the sender will retry.
                log::debug!("tracker: dropping malformed datagram from {src}: {err}");
                continue;
            }
        };

        if let Some(reply) = handle_request(&registry, src, message) {
            if let Ok(bytes) = protocol::encode(&reply) {
                let _ = socket.send_to(&bytes, src);
            } else {
                log::warn!("tracker: reply to {src} did not fit in a datagram");
            }
        }
    }
}

fn handle_request(registry: &FileRegistry, src: SocketAddr, message: Message) -> Option<Message> {
    let now = Instant::now();
    match message {
        Message::Command(Command::Register {
            file_name,
            peer_port,
            chunk_count,
            file_hash,
        })
        | Message::Command(Command::BecomeSeeder {
            file_name,
            peer_port,
            chunk_count,
            file_hash,
        }) => {
            match registry.register(&file_name, src.ip(), peer_port, chunk_count, file_hash, now) {
                Ok(()) => Some(Message::Control(Control::Ack)),
                Err(err) => Some(Message::Control(Control::Error {
                    error_text: err.to_string(),
                })),
            }
        }
        Message::Command(Command::Keepalive { peer_port }) => {
            registry.keepalive(src.ip(), peer_port, now);
            Some(Message::Control(Control::Ack))
        }
        Message::Command(Command::Request { file_name }) => {
            let peers = registry
                .peer_list(&file_name)
                .into_iter()
                .map(|s| PeerAddr {
                    address: s.address.to_string(),
                    port: s.port,
                })
                .collect();
            Some(Message::Control(Control::PeerList { peers }))
        }
        Message::Command(Command::GetCount { file_name }) => match registry.chunk_count(&file_name) {
            Some((chunk_count, file_hash)) => Some(Message::Control(Control::ChunkCount {
                chunk_count,
                file_hash,
            })),
            None => Some(Message::Control(Control::Error {
                error_text: format!("unknown file {file_name:?}"),
            })),
        },
        // GET and GET_HASHES are stream-transport commands served by the
        // Seeder, not the Tracker; a datagram carrying one is malformed use.
        Message::Command(Command::Get { .. }) | Message::Command(Command::GetHashes { .. }) => {
            Some(Message::Control(Control::Error {
                error_text: "GET/GET_HASHES must be sent to a seeder over a stream connection"
                    .into(),
            }))
        }
        Message::Control(_) => None,
    }
}

fn reaper_loop(
    registry: Arc<FileRegistry>,
    shutdown: Arc<AtomicBool>,
    liveness_timeout: Duration,
    reap_interval: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(reap_interval.min(Duration::from_millis(200)));
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        registry.reap(liveness_timeout, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    #[test]
    fn register_request_keepalive_round_trip() {
        let server =
            TrackerServer::start("127.0.0.1:0".parse().unwrap(), Duration::from_secs(90), Duration::from_secs(30))
                .unwrap();
        let addr = server.local_addr();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let register = Message::Command(Command::Register {
            file_name: "hello.bin".into(),
            peer_port: 7000,
            chunk_count: 3,
            file_hash: None,
        });
        client.send_to(&protocol::encode(&register).unwrap(), addr).unwrap();
        let mut buf = vec![0u8; protocol::MAX_DATAGRAM_PAYLOAD];
        let (len, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(protocol::decode(&buf[..len]).unwrap(), Message::Control(Control::Ack));

        let request = Message::Command(Command::Request {
            file_name: "hello.bin".into(),
        });
        client.send_to(&protocol::encode(&request).unwrap(), addr).unwrap();
        let (len, _) = client.recv_from(&mut buf).unwrap();
        match protocol::decode(&buf[..len]).unwrap() {
            Message::Control(Control::PeerList { peers }) => {
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].port, 7000);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        server.shutdown();
    }

    #[test]
    fn get_count_on_unknown_file_is_error() {
        let server =
            TrackerServer::start("127.0.0.1:0".parse().unwrap(), Duration::from_secs(90), Duration::from_secs(30))
                .unwrap();
        let addr = server.local_addr();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let request = Message::Command(Command::GetCount {
            file_name: "ghost.bin".into(),
        });
        client.send_to(&protocol::encode(&request).unwrap(), addr).unwrap();
        let mut buf = vec![0u8; protocol::MAX_DATAGRAM_PAYLOAD];
        let (len, _) = client.recv_from(&mut buf).unwrap();
        assert!(matches!(
            protocol::decode(&buf[..len]).unwrap(),
            Message::Control(Control::Error { .. })
        ));

        server.shutdown();
    }
}
