//! Engine subprocess plumbing.
//!
//! Provides local port reservation, graceful-signal delivery and the reaper
//! task that owns a spawned engine's `Child` for its whole lifetime.

use std::collections::BTreeSet;
use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::process::ExitStatus;
use std::sync::{Mutex, MutexGuard};

use tokio::process::Child;
use tokio::sync::{oneshot, watch};

const PORT_PICK_ATTEMPTS: usize = 32;

/// Ports handed to engines that are still alive in this process.
static RESERVED_PORTS: Mutex<BTreeSet<u16>> = Mutex::new(BTreeSet::new());

fn reserved_ports() -> MutexGuard<'static, BTreeSet<u16>> {
    RESERVED_PORTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A local TCP port reserved for one engine process.
///
/// The port is released when the reservation is dropped.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        reserved_ports().remove(&self.port);
    }
}

/// Pick a free local port that no other engine of this process holds.
pub fn reserve_port() -> io::Result<PortReservation> {
    for _ in 0..PORT_PICK_ATTEMPTS {
        let port = {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
            listener.local_addr()?.port()
        };

        if reserved_ports().insert(port) {
            return Ok(PortReservation { port });
        }
        log::debug!("port {} is already reserved, picking another", port);
    }

    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        "could not find a free local port",
    ))
}

/// Send the graceful shutdown signal to a process.
#[cfg(unix)]
pub fn send_interrupt(pid: u32) -> io::Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether an exit status is the expected outcome of a graceful shutdown:
/// either a clean exit, or death by the interrupt signal we sent.
#[cfg(unix)]
pub fn is_graceful_exit(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.success() || status.signal() == Some(libc::SIGINT)
}

/// Processes are force-killed on this platform, so any exit is expected.
#[cfg(not(unix))]
pub fn is_graceful_exit(_status: &ExitStatus) -> bool {
    true
}

type ShutdownReply = oneshot::Sender<io::Result<ExitStatus>>;

/// Handle to the background task that owns and reaps an engine process.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct Reaper {
    pid: Option<u32>,
    shutdown: Option<oneshot::Sender<ShutdownReply>>,
    exit: watch::Receiver<Option<ExitStatus>>,
}

impl Reaper {
    /// Move `child` into a reaper task. `port` stays reserved until the
    /// process has been reaped.
    pub fn spawn(child: Child, port: Option<PortReservation>) -> Self {
        let pid = child.id();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(reap(child, shutdown_rx, exit_tx, port));

        Self {
            pid,
            shutdown: Some(shutdown_tx),
            exit: exit_rx,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has already exited on its own.
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Stop the process and return its exit status.
    ///
    /// Sends SIGINT on Unix and kills the process elsewhere. If the process
    /// already exited, its recorded status is returned.
    pub async fn shutdown(mut self) -> io::Result<ExitStatus> {
        let shutdown = self
            .shutdown
            .take()
            .ok_or_else(|| io::Error::other("engine process already shut down"))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        shutdown
            .send(reply_tx)
            .map_err(|_| io::Error::other("engine reaper task is gone"))?;

        reply_rx
            .await
            .map_err(|_| io::Error::other("engine reaper task dropped the exit status"))?
    }
}

enum Event {
    Exited(io::Result<ExitStatus>),
    Shutdown(Option<ShutdownReply>),
}

async fn reap(
    mut child: Child,
    mut shutdown: oneshot::Receiver<ShutdownReply>,
    exit_tx: watch::Sender<Option<ExitStatus>>,
    port: Option<PortReservation>,
) {
    let event = tokio::select! {
        status = child.wait() => Event::Exited(status),
        request = &mut shutdown => Event::Shutdown(request.ok()),
    };

    match event {
        Event::Exited(status) => {
            match &status {
                Ok(s) => {
                    log::debug!("engine process exited with {}", s);
                    let _ = exit_tx.send(Some(*s));
                }
                Err(e) => log::warn!("could not wait for engine process: {}", e),
            }
            drop(port);
            if let Ok(reply) = shutdown.await {
                let _ = reply.send(status);
            }
        }
        Event::Shutdown(Some(reply)) => {
            let status = terminate(&mut child).await;
            if let Ok(s) = &status {
                let _ = exit_tx.send(Some(*s));
            }
            drop(port);
            let _ = reply.send(status);
        }
        Event::Shutdown(None) => {
            // Handle dropped without a disconnect.
            if let Err(e) = child.start_kill() {
                log::debug!("could not kill engine process: {}", e);
            }
            let _ = child.wait().await;
            drop(port);
        }
    }
}

#[cfg(unix)]
async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        log::debug!("sending interrupt to engine process {}", pid);
        send_interrupt(pid)?;
    }
    child.wait().await
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }
    child.start_kill()?;
    child.wait().await
}
