//! Purpose: Track session threads from spawn to join.
//! Exports: `Supervisor`, `ServeReport`.
//! Role: Owned by the accept loop; spawns one thread per connection and reaps finished ones.
//! Invariants: Every spawned session is joined exactly once, by `reap` or by `drain`.
//! Invariants: `drain` cancels and joins all sessions; nothing is left tracked afterwards.
use std::net::{Shutdown as SocketShutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::core::error::{Error, ErrorKind};
use crate::serve::session::{Session, SessionReport};
use crate::serve::shared::SharedLog;
use crate::serve::shutdown::Shutdown;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ServeReport {
    pub sessions_started: u64,
    pub sessions_joined: u64,
    pub frames: u64,
    pub appended: u64,
    pub seeks: u64,
    pub failed_ops: u64,
    pub discarded_bytes: u64,
    pub stamps: u64,
}

impl ServeReport {
    fn absorb(&mut self, session: SessionReport) {
        self.frames += session.frames;
        self.appended += session.appended;
        self.seeks += session.seeks;
        self.failed_ops += session.failed_ops;
        self.discarded_bytes += session.discarded_bytes;
    }
}

struct ActiveSession {
    id: u64,
    peer: SocketAddr,
    // Second handle on the socket, used only to unblock the worker on cancel.
    canceller: TcpStream,
    handle: JoinHandle<SessionReport>,
}

pub struct Supervisor {
    log: Arc<SharedLog>,
    shutdown: Shutdown,
    max_frame_bytes: usize,
    sessions: Vec<ActiveSession>,
    next_id: u64,
    report: ServeReport,
}

impl Supervisor {
    pub fn new(log: Arc<SharedLog>, shutdown: Shutdown, max_frame_bytes: usize) -> Self {
        Self {
            log,
            shutdown,
            max_frame_bytes,
            sessions: Vec::new(),
            next_id: 1,
            report: ServeReport::default(),
        }
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    pub fn report(&self) -> ServeReport {
        self.report
    }

    /// Starts a worker thread for `stream`.
    ///
    /// On failure the connection is closed and the error returned; the
    /// supervisor itself stays usable.
    pub fn spawn(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<(), Error> {
        let id = self.next_id;
        self.next_id += 1;

        let canceller = stream.try_clone().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to duplicate socket for {peer}"))
                .with_source(err)
        })?;

        let session = Session::new(
            id,
            stream,
            Arc::clone(&self.log),
            self.shutdown.clone(),
            self.max_frame_bytes,
        );
        let handle = thread::Builder::new()
            .name(format!("session-{id}"))
            .spawn(move || session.run())
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message(format!("failed to spawn session thread for {peer}"))
                    .with_source(err)
            })?;

        tracing::debug!(session = id, %peer, "session spawned");
        self.report.sessions_started += 1;
        self.sessions.push(ActiveSession {
            id,
            peer,
            canceller,
            handle,
        });
        Ok(())
    }

    /// Joins every session whose thread has already returned.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        let mut index = 0;
        while index < self.sessions.len() {
            if self.sessions[index].handle.is_finished() {
                let session = self.sessions.swap_remove(index);
                self.join(session);
                reaped += 1;
            } else {
                index += 1;
            }
        }
        reaped
    }

    /// Cancels every remaining session and waits for all of them.
    pub fn drain(mut self) -> ServeReport {
        self.shutdown.request();
        for session in &self.sessions {
            if let Err(err) = session.canceller.shutdown(SocketShutdown::Both) {
                tracing::debug!(session = session.id, error = %err, "socket already closed");
            }
        }
        for session in std::mem::take(&mut self.sessions) {
            self.join(session);
        }
        assert_eq!(
            self.report.sessions_joined, self.report.sessions_started,
            "sessions left after drain"
        );
        self.report
    }

    fn join(&mut self, session: ActiveSession) {
        let ActiveSession {
            id,
            peer,
            canceller,
            handle,
        } = session;
        match handle.join() {
            Ok(report) => self.report.absorb(report),
            Err(_) => tracing::error!(session = id, %peer, "session thread panicked"),
        }
        drop(canceller);
        self.report.sessions_joined += 1;
        tracing::info!(session = id, %peer, "closed connection");
    }
}

#[cfg(test)]
mod tests {
    use super::Supervisor;
    use crate::core::medium::SlotMedium;
    use crate::serve::shared::SharedLog;
    use crate::serve::shutdown::Shutdown;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn pair(listener: &TcpListener) -> (TcpStream, TcpStream, std::net::SocketAddr) {
        let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (server, peer) = listener.accept().expect("accept");
        (client, server, peer)
    }

    #[test]
    fn reap_joins_only_finished_sessions() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let log = Arc::new(SharedLog::new(SlotMedium::new(10).expect("slots")));
        let mut supervisor = Supervisor::new(Arc::clone(&log), Shutdown::new(), 1024);

        let (mut done, server, peer) = pair(&listener);
        supervisor.spawn(server, peer).expect("spawn");
        let (_idle, server, peer) = pair(&listener);
        supervisor.spawn(server, peer).expect("spawn");

        done.write_all(b"bye\n").expect("send");
        let mut reply = [0u8; 4];
        done.read_exact(&mut reply).expect("reply");
        drop(done);

        let deadline = Instant::now() + Duration::from_secs(10);
        while supervisor.reap() == 0 {
            assert!(Instant::now() < deadline, "session never finished");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(supervisor.active(), 1);

        let report = supervisor.drain();
        assert_eq!(report.sessions_started, 2);
        assert_eq!(report.sessions_joined, 2);
        assert_eq!(report.appended, 1);
    }

    #[test]
    fn drain_joins_every_idle_session() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let log = Arc::new(SharedLog::new(SlotMedium::new(10).expect("slots")));
        let mut supervisor = Supervisor::new(log, Shutdown::new(), 1024);

        let mut clients = Vec::new();
        for _ in 0..3 {
            let (client, server, peer) = pair(&listener);
            supervisor.spawn(server, peer).expect("spawn");
            clients.push(client);
        }
        assert_eq!(supervisor.active(), 3);

        let report = supervisor.drain();
        assert_eq!(report.sessions_started, 3);
        assert_eq!(report.sessions_joined, 3);
    }
}
