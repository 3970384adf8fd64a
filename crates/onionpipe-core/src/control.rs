//! Tor control-port client for circuit (identity) rotation
//!
//! Speaks just enough of the control protocol to authenticate and send
//! `SIGNAL NEWNYM`. After a successful signal the caller is blocked for the
//! stabilization interval so no request goes out on a half-built circuit.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::pacing::SharedClock;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Control-port failure. Never fatal: callers fall back to retrying on the
/// current circuit.
#[derive(Debug)]
pub enum ControlError {
    Io(io::Error),
    /// Tor answered with a non-250 status
    Rejected {
        command: &'static str,
        code: u16,
        message: String,
    },
    /// Connection closed or reply line malformed
    Protocol(String),
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "control port IO: {e}"),
            Self::Rejected {
                command,
                code,
                message,
            } => write!(f, "{command} rejected ({code}): {message}"),
            Self::Protocol(msg) => write!(f, "control protocol: {msg}"),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<io::Error> for ControlError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Handle to a Tor control port
pub struct TorControl {
    host: String,
    port: u16,
    password: Option<String>,
    settle: Duration,
    clock: SharedClock,
}

impl std::fmt::Debug for TorControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorControl")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl TorControl {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: Option<String>,
        settle: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            password,
            settle,
            clock,
        }
    }

    /// Drop the current circuit and wait for the new one to settle.
    pub fn new_identity(&self) -> Result<(), ControlError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ControlError::Protocol(format!("cannot resolve {}:{}", self.host, self.port))
            })?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;

        let auth = auth_command(self.password.as_deref());
        command(&mut writer, &mut reader, "AUTHENTICATE", &auth)?;
        command(&mut writer, &mut reader, "SIGNAL NEWNYM", "SIGNAL NEWNYM")?;
        // QUIT reply is irrelevant once NEWNYM was accepted
        let _ = writer.write_all(b"QUIT\r\n");

        log::info!(
            "Tor identity renewed, waiting {}s for circuit",
            self.settle.as_secs()
        );
        self.clock.sleep(self.settle);
        Ok(())
    }
}

fn auth_command(password: Option<&str>) -> String {
    match password {
        Some(pw) => {
            let escaped = pw.replace('\\', "\\\\").replace('"', "\\\"");
            format!("AUTHENTICATE \"{escaped}\"")
        }
        None => "AUTHENTICATE".to_string(),
    }
}

fn command(
    writer: &mut impl Write,
    reader: &mut impl BufRead,
    name: &'static str,
    line: &str,
) -> Result<(), ControlError> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\r\n")?;
    writer.flush()?;
    let (code, message) = read_reply(reader)?;
    if code != 250 {
        return Err(ControlError::Rejected {
            command: name,
            code,
            message,
        });
    }
    Ok(())
}

/// Read one (possibly multi-line) reply; returns the final status code and text.
fn read_reply(reader: &mut impl BufRead) -> Result<(u16, String), ControlError> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(ControlError::Protocol("connection closed".into()));
        }
        let trimmed = line.trim_end();
        let bytes = trimmed.as_bytes();
        if bytes.len() < 4 {
            return Err(ControlError::Protocol(format!("short reply: {trimmed:?}")));
        }
        if !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(ControlError::Protocol(format!("bad status: {trimmed:?}")));
        }
        let code = bytes[..3]
            .iter()
            .fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'));
        // "250-" and "250+" continue, "250 " ends the reply
        match bytes[3] {
            b' ' => {
                let text = trimmed.get(4..).unwrap_or_default();
                return Ok((code, text.to_string()));
            }
            b'-' | b'+' => {}
            _ => return Err(ControlError::Protocol(format!("bad separator: {trimmed:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::ManualClock;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::sync::Arc;

    #[test]
    fn reply_single_line() {
        let mut r = Cursor::new("250 OK\r\n");
        assert_eq!(read_reply(&mut r).unwrap(), (250, "OK".to_string()));
    }

    #[test]
    fn reply_multi_line() {
        let mut r = Cursor::new("250-version=0.4.8\r\n250 OK\r\n");
        assert_eq!(read_reply(&mut r).unwrap(), (250, "OK".to_string()));
    }

    #[test]
    fn reply_non_ascii_status_is_protocol_error() {
        let mut r = Cursor::new("25\u{e9} OK\r\n");
        assert!(matches!(read_reply(&mut r), Err(ControlError::Protocol(_))));
    }

    #[test]
    fn reply_non_ascii_separator_is_protocol_error() {
        let mut r = Cursor::new("250\u{e9}OK\r\n");
        assert!(matches!(read_reply(&mut r), Err(ControlError::Protocol(_))));
    }

    #[test]
    fn reply_keeps_utf8_text() {
        let mut r = Cursor::new("250 caf\u{e9}\r\n");
        assert_eq!(read_reply(&mut r).unwrap(), (250, "caf\u{e9}".to_string()));
    }

    #[test]
    fn reply_closed() {
        let mut r = Cursor::new("");
        assert!(matches!(read_reply(&mut r), Err(ControlError::Protocol(_))));
    }

    #[test]
    fn auth_command_escapes_password() {
        assert_eq!(auth_command(None), "AUTHENTICATE");
        assert_eq!(auth_command(Some("p\"w")), "AUTHENTICATE \"p\\\"w\"");
    }

    /// Minimal fake control port answering each command with `reply`.
    fn fake_control(reply: &'static str) -> (u16, std::thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut seen = Vec::new();
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                let cmd = line.trim_end().to_string();
                line.clear();
                if cmd == "QUIT" {
                    break;
                }
                seen.push(cmd);
                if writer.write_all(reply.as_bytes()).is_err() {
                    break;
                }
            }
            seen
        });
        (port, handle)
    }

    #[test]
    fn new_identity_sends_newnym_and_settles() {
        let (port, handle) = fake_control("250 OK\r\n");
        let clock = Arc::new(ManualClock::new());
        let control = TorControl::new(
            "127.0.0.1",
            port,
            None,
            Duration::from_secs(3),
            clock.clone(),
        );
        control.new_identity().unwrap();
        let seen = handle.join().unwrap();
        assert_eq!(seen, vec!["AUTHENTICATE", "SIGNAL NEWNYM"]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3)]);
    }

    #[test]
    fn rejected_auth_does_not_settle() {
        let (port, _handle) = fake_control("515 Authentication failed\r\n");
        let clock = Arc::new(ManualClock::new());
        let control = TorControl::new(
            "127.0.0.1",
            port,
            Some("wrong".into()),
            Duration::from_secs(3),
            clock.clone(),
        );
        let err = control.new_identity().unwrap_err();
        assert!(matches!(err, ControlError::Rejected { code: 515, .. }));
        assert!(clock.sleeps().is_empty());
    }
}
