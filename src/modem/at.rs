//! Native serial AT-command interface.
//!
//! A dedicated `std::thread` owns the fd. Callers send commands through an
//! `mpsc` channel and get responses via `oneshot` — no mutex, no shell forks,
//! proper termios (raw, configurable baud, 8N1, no echo), instant `tcflush`.
//! AT I/O is blocking line-oriented serial I/O with per-command timeouts, so
//! it never runs on the tokio runtime directly.

use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, BaudRate, SetArg, SpecialCharacterIndices};
use nix::unistd;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::ModemError;

/// Default AT command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer size (AT responses are small).
const READ_BUF_SIZE: usize = 1024;

struct AtRequest {
    command: String,
    timeout: Duration,
    reply: oneshot::Sender<Result<String, ModemError>>,
}

/// # Safety
/// The caller must ensure `fd` is a valid open file descriptor.
unsafe fn borrow_fd(fd: RawFd) -> BorrowedFd<'static> {
    BorrowedFd::borrow_raw(fd)
}

/// Cloneable handle to a modem serial port.
///
/// Internally holds an `mpsc::Sender` to the I/O thread — cloning just clones
/// the sender. All commands are serialized through the channel.
#[derive(Clone)]
pub struct AtPort {
    tx: mpsc::Sender<AtRequest>,
    device: String,
    /// Unsolicited notification lines (`+CMTI:`, `+CMT:`) detected by the I/O
    /// thread outside the request/reply protocol. Shared across clones of
    /// this handle so whichever task calls `take_urc_receiver` first gets it.
    urc_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
}

impl AtPort {
    /// Open a serial device path (e.g. `/dev/ttyUSB2`) at the given baud rate
    /// and spawn the I/O thread.
    pub fn open(device: &str, baud: u32) -> Result<Self, ModemError> {
        let rate = baud_rate(baud);
        let fd = fcntl::open(
            device,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map_err(|e| ModemError::Open {
            device: device.to_string(),
            source: std::io::Error::from_raw_os_error(e as i32),
        })?;

        // Clear O_NONBLOCK now that we have the fd — blocking reads with
        // VTIME timeout happen inside the I/O thread.
        let flags = fcntl::fcntl(fd, fcntl::FcntlArg::F_GETFL).map_err(|e| ModemError::Termios {
            device: device.to_string(),
            source: e,
        })?;
        let mut oflags = OFlag::from_bits_truncate(flags);
        oflags.remove(OFlag::O_NONBLOCK);
        fcntl::fcntl(fd, fcntl::FcntlArg::F_SETFL(oflags)).map_err(|e| ModemError::Termios {
            device: device.to_string(),
            source: e,
        })?;

        configure_termios(fd, rate).map_err(|e| ModemError::Termios {
            device: device.to_string(),
            source: e,
        })?;

        // SAFETY: fd is valid — we just opened it.
        unsafe {
            termios::tcflush(borrow_fd(fd), termios::FlushArg::TCIOFLUSH).map_err(|e| {
                ModemError::Termios {
                    device: device.to_string(),
                    source: e,
                }
            })?;
        }

        let (tx, rx) = mpsc::channel::<AtRequest>(32);
        let (urc_tx, urc_rx) = mpsc::unbounded_channel::<String>();
        let dev_name = device.to_string();

        std::thread::Builder::new()
            .name(format!("modem-{dev_name}"))
            .spawn(move || modem_thread(fd, rx, &dev_name, &urc_tx))
            .map_err(|source| ModemError::Open {
                device: dev_name.clone(),
                source,
            })?;

        info!(device, baud, "modem port opened, init running on I/O thread");

        Ok(Self {
            tx,
            device: device.to_string(),
            urc_rx: Arc::new(Mutex::new(Some(urc_rx))),
        })
    }

    /// Take the channel of unsolicited notification lines detected by the I/O
    /// thread (e.g. `+CMTI: "SM",<index>` on an incoming SMS). Returns `None`
    /// if some other clone of this handle already took it.
    pub fn take_urc_receiver(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.urc_rx.lock().unwrap().take()
    }

    /// Send an AT command with the default timeout (5s).
    pub async fn command(&self, cmd: &str) -> Result<String, ModemError> {
        self.command_with_timeout(cmd, DEFAULT_TIMEOUT).await
    }

    /// Send an AT command with a custom timeout.
    pub async fn command_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<String, ModemError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = AtRequest {
            command: cmd.to_string(),
            timeout,
            reply: reply_tx,
        };

        self.tx
            .send(req)
            .await
            .map_err(|_| ModemError::WorkerGone)?;

        reply_rx.await.map_err(|_| ModemError::WorkerGone)?
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }
}

fn baud_rate(baud: u32) -> BaudRate {
    match baud {
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        230_400 => BaudRate::B230400,
        _ => BaudRate::B115200,
    }
}

/// Configure termios: raw mode, configurable baud, 8N1, no flow control.
/// VMIN=0, VTIME=1 → reads return after 100ms of silence.
fn configure_termios(fd: RawFd, rate: BaudRate) -> Result<(), nix::Error> {
    // SAFETY: fd is valid — caller just opened it.
    let borrowed = unsafe { borrow_fd(fd) };

    let mut tio = termios::tcgetattr(borrowed)?;

    termios::cfmakeraw(&mut tio);

    termios::cfsetispeed(&mut tio, rate)?;
    termios::cfsetospeed(&mut tio, rate)?;

    tio.control_flags |= termios::ControlFlags::CLOCAL | termios::ControlFlags::CREAD;
    tio.control_flags &= !termios::ControlFlags::CRTSCTS;

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;

    termios::tcsetattr(borrowed, SetArg::TCSANOW, &tio)?;

    Ok(())
}

/// Initialize modem: abort any partial command, disable echo.
fn modem_init(fd: RawFd) -> Result<(), String> {
    let bfd = unsafe { borrow_fd(fd) };

    unistd::write(bfd, b"\r").map_err(|e| format!("write CR: {e}"))?;
    std::thread::sleep(Duration::from_millis(100));
    termios::tcflush(bfd, termios::FlushArg::TCIOFLUSH)
        .map_err(|e| format!("tcflush after CR: {e}"))?;

    unistd::write(bfd, b"ATE0\r").map_err(|e| format!("write ATE0: {e}"))?;

    let mut buf = [0u8; 256];
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut response = String::new();
    loop {
        if Instant::now() >= deadline {
            break;
        }
        match unistd::read(fd, &mut buf) {
            Ok(0) | Err(nix::errno::Errno::EAGAIN) => break,
            Ok(n) => {
                response.push_str(&String::from_utf8_lossy(&buf[..n]));
                if response.contains("OK") || response.contains("ERROR") {
                    break;
                }
            }
            Err(e) => return Err(format!("read ATE0 response: {e}")),
        }
    }

    debug!("modem init ATE0 response: {:?}", response.trim());

    termios::tcflush(bfd, termios::FlushArg::TCIOFLUSH).map_err(|e| format!("tcflush final: {e}"))?;

    Ok(())
}

fn modem_thread(
    fd: RawFd,
    mut rx: mpsc::Receiver<AtRequest>,
    device: &str,
    urc_tx: &mpsc::UnboundedSender<String>,
) {
    match modem_init(fd) {
        Ok(()) => info!(device, "initialized (ATE0, echo disabled)"),
        Err(e) => warn!(device, error = %e, "init failed, continuing anyway"),
    }

    // No request is ever pending while the line is idle, so this thread also
    // owns watching for unsolicited lines (`+CMTI:`/`+CMT:`) the modem pushes
    // on its own. `try_recv` lets it fall through to a URC poll between
    // commands instead of blocking exclusively on the request channel.
    let mut urc_buffer = String::new();
    loop {
        match rx.try_recv() {
            Ok(req) => {
                let result = execute_at(fd, &req.command, req.timeout);
                match &result {
                    Ok(resp) => debug!(
                        device,
                        command = %req.command,
                        response = %if resp.len() > 80 { &resp[..80] } else { resp },
                        "AT command ok"
                    ),
                    Err(e) => warn!(device, command = %req.command, error = %e, "AT command failed"),
                }
                let _ = req.reply.send(result);
            }
            Err(mpsc::error::TryRecvError::Empty) => {
                poll_for_urc(fd, &mut urc_buffer, urc_tx, device);
            }
            Err(mpsc::error::TryRecvError::Disconnected) => break,
        }
    }

    debug!(device, "I/O thread exiting");
    let _ = unistd::close(fd);
}

/// Read whatever is available (VMIN=0/VTIME=1 bounds this to ~100ms) and hand
/// any complete `+CMTI:`/`+CMT:` line to `urc_tx`. Anything else accumulated
/// between commands (stray echoes, partial lines) is silently dropped line by
/// line — there is no pending `AtRequest` to attribute it to.
fn poll_for_urc(fd: RawFd, buffer: &mut String, urc_tx: &mpsc::UnboundedSender<String>, device: &str) {
    let mut buf = [0u8; READ_BUF_SIZE];
    match unistd::read(fd, &mut buf) {
        Ok(0) | Err(nix::errno::Errno::EAGAIN) => {}
        Ok(n) => buffer.push_str(&String::from_utf8_lossy(&buf[..n])),
        Err(_) => {}
    }

    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let trimmed = line.trim();
        if is_urc_line(trimmed) {
            debug!(device, urc = %trimmed, "unsolicited notification");
            let _ = urc_tx.send(trimmed.to_string());
        }
    }
}

fn is_urc_line(line: &str) -> bool {
    line.starts_with("+CMTI:") || line.starts_with("+CMT:")
}

fn execute_at(fd: RawFd, command: &str, timeout: Duration) -> Result<String, ModemError> {
    let bfd = unsafe { borrow_fd(fd) };

    termios::tcflush(bfd, termios::FlushArg::TCIOFLUSH).map_err(|e| ModemError::Termios {
        device: String::new(),
        source: e,
    })?;

    let cmd_bytes = format!("{command}\r");
    unistd::write(bfd, cmd_bytes.as_bytes()).map_err(|e| ModemError::Termios {
        device: String::new(),
        source: e,
    })?;

    let mut buf = [0u8; READ_BUF_SIZE];
    let mut response = String::with_capacity(256);
    let deadline = Instant::now() + timeout;

    loop {
        if Instant::now() >= deadline {
            return Err(ModemError::Timeout(timeout));
        }

        match unistd::read(fd, &mut buf) {
            Ok(0) => {
                if response_is_complete(&response) {
                    break;
                }
            }
            Ok(n) => {
                response.push_str(&String::from_utf8_lossy(&buf[..n]));
                if response_is_complete(&response) {
                    break;
                }
            }
            Err(nix::errno::Errno::EAGAIN) => {
                if response_is_complete(&response) {
                    break;
                }
            }
            Err(e) => {
                return Err(ModemError::Termios {
                    device: String::new(),
                    source: e,
                })
            }
        }
    }

    let cleaned = sanitize_response(&response);
    let stripped = strip_echo(&cleaned);
    if stripped.lines().any(|l| l.trim() == "ERROR" || l.trim().starts_with("+CME ERROR:") || l.trim().starts_with("+CMS ERROR:")) {
        return Err(ModemError::AtError(stripped));
    }
    Ok(stripped)
}

fn response_is_complete(response: &str) -> bool {
    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed == "OK"
            || trimmed == "ERROR"
            || trimmed.starts_with("+CME ERROR:")
            || trimmed.starts_with("+CMS ERROR:")
        {
            return true;
        }
    }
    false
}

fn sanitize_response(response: &str) -> String {
    response
        .chars()
        .filter(|&c| c == '\r' || c == '\n' || !c.is_control())
        .filter(|&c| c != '\u{FFFD}')
        .collect()
}

fn strip_echo(response: &str) -> String {
    response
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return false;
            }
            let alpha_start = trimmed.find(|c: char| c.is_ascii_alphabetic());
            if let Some(pos) = alpha_start {
                !trimmed[pos..].starts_with("AT")
            } else {
                true
            }
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_complete_ok() {
        assert!(response_is_complete("+CSQ: 15,99\r\nOK\r\n"));
    }

    #[test]
    fn response_is_complete_error() {
        assert!(response_is_complete("ERROR\r\n"));
    }

    #[test]
    fn response_is_complete_cme_error() {
        assert!(response_is_complete("+CME ERROR: 516\r\n"));
    }

    #[test]
    fn response_is_complete_partial() {
        assert!(!response_is_complete("+CSQ: 15,99\r\n"));
    }

    #[test]
    fn strips_echo() {
        let response = "AT+CSQ\r\n+CSQ: 15,99\r\nOK\r\n";
        let stripped = strip_echo(response);
        assert!(stripped.contains("+CSQ: 15,99"));
        assert!(stripped.contains("OK"));
        assert!(!stripped.contains("AT+CSQ"));
    }

    #[test]
    fn strips_echo_with_leading_garbage() {
        let response = "\x00AT+CGSN\r\n490154203237518\r\nOK\r\n";
        let cleaned = sanitize_response(response);
        let stripped = strip_echo(&cleaned);
        assert!(stripped.contains("490154203237518"));
        assert!(!stripped.contains("AT+CGSN"));
    }

    #[test]
    fn sanitize_removes_nul_and_replacement_char() {
        let response = "\u{FFFD}\x00AT+CSQ\r\n+CSQ: 15,99\r\nOK\r\n";
        let cleaned = sanitize_response(response);
        assert!(!cleaned.contains('\x00'));
        assert!(!cleaned.contains('\u{FFFD}'));
        assert!(cleaned.contains("+CSQ: 15,99"));
    }

    #[test]
    fn recognizes_incoming_sms_notifications() {
        assert!(is_urc_line("+CMTI: \"SM\",3"));
        assert!(is_urc_line("+CMT: \"+15551234567\",,\"23/07/31,12:00:00+00\""));
        assert!(!is_urc_line("+CSQ: 15,99"));
        assert!(!is_urc_line("OK"));
    }

    #[test]
    fn baud_rate_maps_known_values() {
        assert_eq!(baud_rate(115_200), BaudRate::B115200);
        assert_eq!(baud_rate(9600), BaudRate::B9600);
        assert_eq!(baud_rate(1), BaudRate::B115200);
    }
}
