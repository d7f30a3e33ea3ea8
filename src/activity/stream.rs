//! Line-oriented activity signal reader.
//!
//! Host input layers report activity by writing one signal per line, e.g.
//! `pointer` or `keydown 65`. The first word names the signal; anything after
//! it is ignored. Signals can arrive on stdin or on a Unix socket that any
//! number of clients may connect to.

use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ActivityHub;
use super::SourceError;
use crate::domain::ActivityKind;

/// Parse a single line of the signal protocol.
pub fn parse_signal_line(line: &str) -> Option<ActivityKind> {
    let Some(token) = line.split_whitespace().next() else {
        trace!("Ignoring empty signal line");
        return None;
    };

    let kind = ActivityKind::from_token(token);
    if kind.is_none() {
        trace!("Ignoring unknown signal: {}", token);
    }
    kind
}

/// Read signals from `reader` until EOF, forwarding each to `hub`.
///
/// Returns the number of signals delivered.
pub async fn read_signals<R>(reader: R, hub: &ActivityHub) -> Result<u64, SourceError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut delivered = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| SourceError::ReadError(e.to_string()))?
    {
        if let Some(kind) = parse_signal_line(&line) {
            hub.notify(kind);
            delivered += 1;
        }
    }

    Ok(delivered)
}

/// Read signals from the process's stdin until EOF or cancellation.
pub async fn read_stdin(hub: Arc<ActivityHub>, cancel: CancellationToken) {
    let reader = BufReader::new(tokio::io::stdin());

    tokio::select! {
        () = cancel.cancelled() => {}
        result = read_signals(reader, &hub) => match result {
            Ok(count) => info!("stdin closed after {} signals", count),
            Err(e) => warn!("Stopped reading stdin: {}", e),
        },
    }
}

/// Unix socket accepting signal streams from any number of clients.
///
/// The socket file is removed when this value is dropped.
#[derive(Debug)]
pub struct SignalSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl SignalSocket {
    /// Bind the socket, replacing a stale socket file at `path`.
    ///
    /// Fails if `path` is not a socket, or if another process is still
    /// accepting connections on it.
    pub fn bind(path: &Path) -> Result<Self, SourceError> {
        let bind_failed = |reason: String| SourceError::BindFailed {
            path: path.display().to_string(),
            reason,
        };

        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                if std::os::unix::net::UnixStream::connect(path).is_ok() {
                    return Err(bind_failed("already in use".to_string()));
                }
                debug!("Removing stale socket: {}", path.display());
                std::fs::remove_file(path).map_err(|e| bind_failed(e.to_string()))?;
            }
            Ok(_) => return Err(bind_failed("not a socket".to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_failed(e.to_string())),
        }

        let listener = UnixListener::bind(path).map_err(|e| bind_failed(e.to_string()))?;
        info!("Listening for activity signals on {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Path the socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until cancelled, feeding every line to `hub`.
    pub async fn serve(self, hub: Arc<ActivityHub>, cancel: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => {
                    debug!("Activity client connected");
                    let hub = hub.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            () = cancel.cancelled() => {}
                            result = read_signals(BufReader::new(stream), &hub) => match result {
                                Ok(count) => debug!("Activity client closed after {} signals", count),
                                Err(e) => warn!("Activity client error: {}", e),
                            },
                        }
                    });
                }
                Err(e) => warn!("Failed to accept activity client: {}", e),
            }
        }
    }
}

impl Drop for SignalSocket {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            trace!("Could not remove socket {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivitySource;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use tokio::io::AsyncWriteExt;

    fn counting_hub() -> (Arc<ActivityHub>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let hub = Arc::new(ActivityHub::new());
        let pointer = Arc::new(AtomicUsize::new(0));
        let keyboard = Arc::new(AtomicUsize::new(0));

        let p = pointer.clone();
        hub.attach(
            ActivityKind::Pointer,
            Arc::new(move |_: ActivityKind| {
                p.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let k = keyboard.clone();
        hub.attach(
            ActivityKind::Keyboard,
            Arc::new(move |_: ActivityKind| {
                k.fetch_add(1, Ordering::SeqCst);
            }),
        );

        (hub, pointer, keyboard)
    }

    #[test]
    fn test_parse_signal_line() {
        assert_eq!(parse_signal_line("pointer"), Some(ActivityKind::Pointer));
        assert_eq!(parse_signal_line("keydown 65"), Some(ActivityKind::Keyboard));
        assert_eq!(parse_signal_line("  mousemove 10 20\n"), Some(ActivityKind::Pointer));
        assert_eq!(parse_signal_line("wheel"), None);
        assert_eq!(parse_signal_line(""), None);
        assert_eq!(parse_signal_line("   "), None);
    }

    #[tokio::test]
    async fn test_read_signals_counts_known_lines() {
        let (hub, pointer, keyboard) = counting_hub();
        let input = b"pointer\nkey\n\nbogus\nmousemove 1 2\nkeydown\n";

        let delivered = read_signals(&input[..], &hub).await.unwrap();

        assert_eq!(delivered, 4);
        assert_eq!(pointer.load(Ordering::SeqCst), 2);
        assert_eq!(keyboard.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_socket_feeds_hub() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.sock");
        let (hub, pointer, keyboard) = counting_hub();
        let cancel = CancellationToken::new();

        let socket = SignalSocket::bind(&path).unwrap();
        let server = tokio::spawn(socket.serve(hub.clone(), cancel.clone()));

        let mut client = tokio::net::UnixStream::connect(&path).await.unwrap();
        client.write_all(b"pointer\nkey\nkey\n").await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        for _ in 0..100 {
            if keyboard.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(pointer.load(Ordering::SeqCst), 1);
        assert_eq!(keyboard.load(Ordering::SeqCst), 2);

        cancel.cancel();
        server.await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let socket = SignalSocket::bind(&path).unwrap();
        assert_eq!(socket.path(), path.as_path());
        tokio::net::UnixStream::connect(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"important user data").unwrap();

        let err = SignalSocket::bind(&path).unwrap_err();

        assert!(matches!(err, SourceError::BindFailed { ref reason, .. } if reason == "not a socket"));
        assert_eq!(std::fs::read(&path).unwrap(), b"important user data");
    }

    #[tokio::test]
    async fn test_bind_refuses_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.sock");
        let first = SignalSocket::bind(&path).unwrap();

        let err = SignalSocket::bind(&path).unwrap_err();

        assert!(matches!(err, SourceError::BindFailed { ref reason, .. } if reason == "already in use"));
        assert!(path.exists());
        drop(first);
        assert!(!path.exists());
    }
}
