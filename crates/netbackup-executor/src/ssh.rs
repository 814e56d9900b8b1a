// SPDX-License-Identifier: MIT OR Apache-2.0
//! Production [`Session`]/[`Shell`] implementation over SSH, via `ssh2`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use netbackup_error::{ErrorCode, NetbackupError};
use netbackup_model::{Credentials, Device, Protocol};

use crate::{Session, SessionOpener, Shell};

/// Opens real SSH sessions to devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Opener;

impl SessionOpener for Ssh2Opener {
    fn open(&self, device: &Device) -> Result<Box<dyn Session>, NetbackupError> {
        let Protocol::SecureShell { port, legacy_ciphers } = &device.protocol;
        let addr = format!("{}:{}", device.host, port);
        let stream = TcpStream::connect(&addr).map_err(|e| {
            NetbackupError::new(ErrorCode::SessionUnavailable, format!("connect to {addr} failed: {e}"))
        })?;

        let mut session = ssh2::Session::new().map_err(|e| {
            NetbackupError::new(ErrorCode::SessionUnavailable, format!("failed to create ssh session: {e}"))
        })?;
        if *legacy_ciphers {
            for method in [ssh2::MethodType::CryptCs, ssh2::MethodType::CryptSc] {
                session
                    .method_pref(method, "aes128-cbc,3des-cbc,aes128-ctr")
                    .map_err(|e| {
                        NetbackupError::new(
                            ErrorCode::SessionUnavailable,
                            format!("failed to configure legacy ciphers: {e}"),
                        )
                    })?;
            }
        }
        session.set_tcp_stream(stream);
        session.handshake().map_err(|e| {
            NetbackupError::new(ErrorCode::SessionUnavailable, format!("ssh handshake failed: {e}"))
        })?;

        Ok(Box::new(Ssh2Session { session }))
    }
}

struct Ssh2Session {
    session: ssh2::Session,
}

impl Session for Ssh2Session {
    fn authenticate(&mut self, credentials: &Credentials) -> Result<(), NetbackupError> {
        self.session
            .userauth_password(&credentials.user, &credentials.password)
            .map_err(|e| NetbackupError::new(ErrorCode::AuthenticationFailed, e.to_string()))
    }

    fn open_shell(&mut self) -> Result<Box<dyn Shell>, NetbackupError> {
        let mut channel = self.session.channel_session().map_err(|e| {
            NetbackupError::new(ErrorCode::SessionUnavailable, format!("failed to open channel: {e}"))
        })?;
        channel.request_pty("dumb", None, Some((80, 40, 0, 0))).map_err(|e| {
            NetbackupError::new(ErrorCode::SessionUnavailable, format!("failed to request pty: {e}"))
        })?;
        channel
            .shell()
            .map_err(|e| NetbackupError::new(ErrorCode::SessionUnavailable, format!("failed to start shell: {e}")))?;
        // The shell channel is read by a background thread from here on;
        // non-blocking mode lets it poll instead of hanging forever
        // waiting for the device to send more bytes.
        self.session.set_blocking(false);
        Ok(Box::new(Ssh2Shell::spawn(channel)))
    }

    fn fetch_file(&mut self, path: &str) -> Result<Vec<u8>, NetbackupError> {
        self.session.set_blocking(true);
        let sftp = self
            .session
            .sftp()
            .map_err(|e| NetbackupError::new(ErrorCode::FileFetchFailed, format!("failed to open sftp: {e}")))?;
        let mut file = sftp.open(std::path::Path::new(path)).map_err(|e| {
            NetbackupError::new(ErrorCode::FileFetchFailed, format!("failed to open {path}: {e}"))
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| NetbackupError::new(ErrorCode::FileFetchFailed, format!("failed to read {path}: {e}")))?;
        Ok(bytes)
    }
}

/// Shell channel with a background reader thread, giving the
/// snapshot-and-clear semantics the expect loop depends on: the read
/// side is filled concurrently while the main thread writes commands and
/// polls [`Shell::snapshot`].
struct Ssh2Shell {
    channel: Arc<Mutex<ssh2::Channel>>,
    buffer: Arc<Mutex<Vec<u8>>>,
    stop: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl Ssh2Shell {
    fn spawn(channel: ssh2::Channel) -> Self {
        let channel = Arc::new(Mutex::new(channel));
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let reader_channel = Arc::clone(&channel);
        let reader_buffer = Arc::clone(&buffer);
        let reader_stop = Arc::clone(&stop);
        let reader = thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            while !reader_stop.load(Ordering::Relaxed) {
                let read = {
                    let mut channel = reader_channel.lock().expect("channel lock poisoned");
                    channel.read(&mut chunk)
                };
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        reader_buffer.lock().expect("buffer lock poisoned").extend_from_slice(&chunk[..n]);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(50));
                    }
                    Err(_) => break,
                }
            }
        });

        Ssh2Shell { channel, buffer, stop, reader: Some(reader) }
    }
}

impl Shell for Ssh2Shell {
    fn write_command(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut channel = self.channel.lock().expect("channel lock poisoned");
        channel.write_all(data)
    }

    fn snapshot(&mut self) -> Vec<u8> {
        let mut buffer = self.buffer.lock().expect("buffer lock poisoned");
        std::mem::take(&mut *buffer)
    }
}

impl Drop for Ssh2Shell {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}
