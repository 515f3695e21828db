//! A peer process as one object owning both a datagram client (talking to
//! the Tracker) and a stream acceptor (serving chunks): becoming a seeder is
//! a state transition on this object, not construction of a new one. The
//! acceptor and its heartbeat are started lazily, on the first file this
//! process has anything to serve.

use crate::config::Config;
use crate::error::Result;
use crate::leecher::{self, CancellationToken, Progress};
use crate::seeder::SeederServer;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct Peer {
    config: Config,
    tracker_addr: SocketAddr,
    seeder: Mutex<Option<SeederServer>>,
}

impl Peer {
    pub fn new(config: Config) -> Self {
        let tracker_addr = config.tracker_addr;
        Peer {
            config,
            tracker_addr,
            seeder: Mutex::new(None),
        }
    }

    fn ensure_seeder(&self) -> Result<()> {
        let mut guard = self.seeder.lock().unwrap();
        if guard.is_none() {
            let server = SeederServer::start(
                self.config.seeder_bind,
                self.tracker_addr,
                self.config.keepalive_interval,
                self.config.serve_timeout,
                self.config.max_inflight_serves,
            )?;
            *guard = Some(server);
        }
        Ok(())
    }

    /// The acceptor's bound address, once at least one file has been hosted
    /// (directly, or by a completed download's promotion). `None` before then.
    pub fn local_seeder_addr(&self) -> Option<SocketAddr> {
        self.seeder.lock().unwrap().as_ref().map(|s| s.local_addr())
    }

    /// Seeds a local file directly.
    pub fn seed_file(&self, file_name: String, path: &Path) -> Result<()> {
        self.ensure_seeder()?;
        let guard = self.seeder.lock().unwrap();
        guard
            .as_ref()
            .expect("just ensured")
            .host_file(file_name, path, self.config.chunk_size)
    }

    /// Downloads `file_name`, then promotes this process to a Seeder for it
    /// using the already-verified chunks.
    pub fn download(&self, file_name: &str, cancel: &CancellationToken) -> Result<(PathBuf, Progress)> {
        let (outcome, progress) = leecher::download(
            self.tracker_addr,
            file_name,
            &self.config.download_dir,
            &self.config,
            cancel,
        )?;

        self.ensure_seeder()?;
        let guard = self.seeder.lock().unwrap();
        guard
            .as_ref()
            .expect("just ensured")
            .host_store(file_name.to_string(), outcome.store)?;

        Ok((outcome.path, progress))
    }

    pub fn shutdown(self) {
        if let Some(server) = self.seeder.into_inner().unwrap() {
            server.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerServer;
    use std::io::Write as _;
    use std::time::Duration;

    #[test]
    fn downloading_peer_promotes_to_seeder_and_reregisters() {
        let tracker = TrackerServer::start(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_secs(90),
            Duration::from_secs(30),
        )
        .unwrap();

        let source = Peer::new(Config {
            tracker_addr: tracker.local_addr(),
            seeder_bind: "127.0.0.1:0".parse().unwrap(),
            chunk_size: 512,
            ..Config::default()
        });
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("movie.bin");
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 241) as u8).collect();
        std::fs::File::create(&src_path).unwrap().write_all(&data).unwrap();
        source.seed_file("movie.bin".into(), &src_path).unwrap();

        let download_dir = tempfile::tempdir().unwrap();
        let downloader = Peer::new(Config {
            tracker_addr: tracker.local_addr(),
            seeder_bind: "127.0.0.1:0".parse().unwrap(),
            download_dir: download_dir.path().to_path_buf(),
            chunk_size: 512,
            parallelism: 2,
            ..Config::default()
        });
        let cancel = CancellationToken::new();
        let (path, progress) = downloader.download("movie.bin", &cancel).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), data);
        assert_eq!(progress.completed(), progress.total());

        assert_eq!(tracker.registry().peer_list("movie.bin").len(), 2);

        source.shutdown();
        downloader.shutdown();
        tracker.shutdown();
    }
}
