//! The serial-port facade: one open terminal device, its settings
//! wrapper, and the byte-stream data path.

use std::fs;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;

use crate::consts;
use crate::modem::ModemLines;
use crate::settings::{Handshake, Parity, PortSettings, ReadTimeout};
use crate::sys;
use crate::PortError;

/// An exclusively-owned serial device.
///
/// The data path is the plain file handle ([`io::Read`]/[`io::Write`]);
/// the control path goes through [`PortSettings`] and the modem-line
/// ioctls. Configuration methods mutate the in-memory settings copy and
/// commit it in one step; the port is never left with an uncommitted
/// change unless the caller goes through [`settings_mut`].
///
/// Dropping the port closes the descriptor. This is also the only way
/// to unblock a pending read on another thread, and it is abrupt: the
/// pending read fails with an I/O error.
///
/// [`settings_mut`]: SerialPort::settings_mut
pub struct SerialPort {
    file: fs::File,
    path: PathBuf,
    settings: PortSettings,
}

impl SerialPort {
    /// Opens `path` and applies the port preset: raw mode, receiver
    /// enabled, modem control lines ignored, reads blocking
    /// indefinitely. Line parameters (baud rate, framing, handshake)
    /// are left as found; configure them afterwards.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PortError> {
        let mut port = Self::attach(path)?;

        port.settings.make_raw();
        port.settings.set_cread(true);
        port.settings.set_clocal(true);
        port.settings.set_read_timeout(ReadTimeout::Blocking)?;
        port.settings.commit()?;

        // Drop whatever accumulated under the previous configuration.
        port.discard_all()?;

        Ok(port)
    }

    /// Opens `path` without touching its configuration, for inspection
    /// or piecemeal reconfiguration.
    ///
    /// The descriptor is made exclusive (`TIOCEXCL`): further opens of
    /// the device by anyone fail with `EBUSY` until this port is
    /// dropped.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self, PortError> {
        let path = path.as_ref().to_path_buf();

        // O_NONBLOCK so that open(2) does not wait for a carrier; the
        // descriptor is restored to blocking below, after which reads
        // follow the committed VMIN/VTIME policy.
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|e| PortError::Open(path.clone(), e))?;
        let fd = file.as_raw_fd();

        unsafe { sys::ioctl::tiocexcl(fd) }?;
        fcntl(fd, FcntlArg::F_SETFL(OFlag::empty()))?;

        let settings = PortSettings::from_fd(fd)?;
        Ok(Self {
            file,
            path,
            settings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// The last-known settings copy. Call [`reload`](Self::reload)
    /// first if another process may have reconfigured the device.
    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    /// Escape hatch for flags without a dedicated method here. Changes
    /// take effect only after an explicit
    /// [`commit`](PortSettings::commit).
    pub fn settings_mut(&mut self) -> &mut PortSettings {
        &mut self.settings
    }

    /// Discards the in-memory settings copy and re-reads kernel state.
    pub fn reload(&mut self) -> Result<(), PortError> {
        self.settings.refresh()
    }

    /// Sets the baud rate. Rates in the classic table commit through
    /// `tcsetattr`; any other positive rate falls back to the extended
    /// `termios2` interface.
    pub fn set_baud_rate(&mut self, baud: u32) -> Result<(), PortError> {
        if baud == 0 {
            return Err(PortError::OutOfRange(
                "Baud rate must be positive".to_string(),
            ));
        }

        match consts::standard_speed(baud) {
            Some(code) => {
                self.settings.set_standard_baud(code)?;
                self.settings.commit()
            }
            None => self.settings.set_custom_baud(baud),
        }
    }

    pub fn baud_rate(&self) -> u32 {
        self.settings.baud_rate()
    }

    pub fn set_parity(&mut self, parity: Parity) -> Result<(), PortError> {
        self.settings.set_parity(parity)?;
        self.settings.commit()
    }

    pub fn parity(&self) -> Parity {
        self.settings.parity()
    }

    pub fn set_data_bits(&mut self, bits: u8) -> Result<(), PortError> {
        self.settings.set_data_bits(bits)?;
        self.settings.commit()
    }

    pub fn data_bits(&self) -> u8 {
        self.settings.data_bits()
    }

    pub fn set_stop_bits(&mut self, bits: u8) -> Result<(), PortError> {
        self.settings.set_stop_bits(bits)?;
        self.settings.commit()
    }

    pub fn stop_bits(&self) -> u8 {
        self.settings.stop_bits()
    }

    pub fn set_handshake(&mut self, handshake: Handshake) -> Result<(), PortError> {
        self.settings.set_handshake(handshake);
        self.settings.commit()
    }

    pub fn handshake(&self) -> Handshake {
        self.settings.handshake()
    }

    pub fn set_read_timeout(&mut self, timeout: ReadTimeout) -> Result<(), PortError> {
        self.settings.set_read_timeout(timeout)?;
        self.settings.commit()
    }

    pub fn read_timeout(&self) -> ReadTimeout {
        self.settings.read_timeout()
    }

    /// Always fails: the kernel provides no write deadline for terminal
    /// devices. Failing loudly beats pretending a timeout is armed.
    pub fn set_write_timeout(&mut self, _timeout: Duration) -> Result<(), PortError> {
        Err(PortError::Unsupported("A write timeout".to_string()))
    }

    /// Always fails: the kernel output buffer is fixed (4096 bytes in
    /// non-canonical mode) and cannot be resized from user space.
    pub fn set_output_buffer_size(&mut self, _bytes: usize) -> Result<(), PortError> {
        Err(PortError::Unsupported(
            "Resizing the output buffer".to_string(),
        ))
    }

    /// Bytes buffered by the kernel but not yet read.
    pub fn bytes_to_read(&self) -> Result<u32, PortError> {
        let mut count: libc::c_int = 0;
        unsafe { sys::ioctl::fionread(self.fd(), &mut count) }?;
        Ok(count as u32)
    }

    /// Bytes written but not yet transmitted.
    pub fn bytes_to_write(&self) -> Result<u32, PortError> {
        let mut count: libc::c_int = 0;
        unsafe { sys::ioctl::tiocoutq(self.fd(), &mut count) }?;
        Ok(count as u32)
    }

    /// Discards received-but-unread data.
    pub fn discard_input(&self) -> Result<(), PortError> {
        sys::tcflush(self.fd(), libc::TCIFLUSH)?;
        Ok(())
    }

    /// Discards written-but-untransmitted data.
    pub fn discard_output(&self) -> Result<(), PortError> {
        sys::tcflush(self.fd(), libc::TCOFLUSH)?;
        Ok(())
    }

    /// Discards pending data in both directions.
    pub fn discard_all(&self) -> Result<(), PortError> {
        sys::tcflush(self.fd(), libc::TCIOFLUSH)?;
        Ok(())
    }

    /// Blocks until the kernel has transmitted everything written.
    pub fn drain(&self) -> Result<(), PortError> {
        sys::tcdrain(self.fd())?;
        Ok(())
    }

    /// Suspends transmission, as if an XOFF had been received.
    pub fn suspend_output(&self) -> Result<(), PortError> {
        sys::tcflow(self.fd(), libc::TCOOFF)?;
        Ok(())
    }

    /// Restarts transmission suspended by [`suspend_output`].
    ///
    /// [`suspend_output`]: SerialPort::suspend_output
    pub fn restart_output(&self) -> Result<(), PortError> {
        sys::tcflow(self.fd(), libc::TCOON)?;
        Ok(())
    }

    /// Transmits a break: zero bits for 0.25-0.5 s.
    pub fn send_break(&self) -> Result<(), PortError> {
        sys::tcsendbreak(self.fd(), 0)?;
        Ok(())
    }

    /// Holds or releases the transmit line in break condition.
    pub fn set_break(&mut self, on: bool) -> Result<(), PortError> {
        if on {
            unsafe { sys::ioctl::tiocsbrk(self.fd()) }?;
        } else {
            unsafe { sys::ioctl::tioccbrk(self.fd()) }?;
        }
        Ok(())
    }

    /// Samples all modem control and status lines.
    pub fn modem_lines(&self) -> Result<ModemLines, PortError> {
        ModemLines::read(self.fd())
    }

    /// Overwrites the modem control lines with `lines`.
    pub fn set_modem_lines(&mut self, lines: ModemLines) -> Result<(), PortError> {
        lines.apply(self.fd())
    }

    /// Asserts or clears DTR, committing immediately through the modem
    /// ioctl pair; the termios record is not involved.
    pub fn set_dtr(&mut self, level: bool) -> Result<(), PortError> {
        let mut lines = ModemLines::read(self.fd())?;
        lines.set_dtr(level);
        lines.apply(self.fd())
    }

    /// Asserts or clears RTS, as [`set_dtr`](SerialPort::set_dtr).
    pub fn set_rts(&mut self, level: bool) -> Result<(), PortError> {
        let mut lines = ModemLines::read(self.fd())?;
        lines.set_rts(level);
        lines.apply(self.fd())
    }

    pub fn cts(&self) -> Result<bool, PortError> {
        Ok(self.modem_lines()?.cts())
    }

    pub fn dsr(&self) -> Result<bool, PortError> {
        Ok(self.modem_lines()?.dsr())
    }

    pub fn carrier_detect(&self) -> Result<bool, PortError> {
        Ok(self.modem_lines()?.carrier_detect())
    }

    pub fn ring(&self) -> Result<bool, PortError> {
        Ok(self.modem_lines()?.ring())
    }
}

impl AsRawFd for SerialPort {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl io::Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        self.file.read(buf)
    }
}

impl io::Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        use std::io::Write;
        self.file.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A pty master is the closest terminal at hand that needs no
    /// hardware; line parameters round-trip through it like through a
    /// real port.
    fn pty_port() -> SerialPort {
        SerialPort::open("/dev/ptmx").unwrap()
    }

    #[test]
    fn open_applies_the_preset() {
        let port = pty_port();
        assert!(!port.settings().canonical());
        assert!(port.settings().cread());
        assert!(port.settings().clocal());
        assert_eq!(port.read_timeout(), ReadTimeout::Blocking);
    }

    #[test]
    fn attach_leaves_settings_alone() {
        let port = SerialPort::attach("/dev/ptmx").unwrap();
        // A fresh pty line discipline is canonical; attach must not
        // have rewritten it.
        assert!(port.settings().canonical());
    }

    #[test]
    fn framing_round_trip() {
        let mut port = pty_port();

        port.set_data_bits(7).unwrap();
        port.set_stop_bits(2).unwrap();
        port.set_parity(Parity::Odd).unwrap();
        port.reload().unwrap();

        assert_eq!(port.data_bits(), 7);
        assert_eq!(port.stop_bits(), 2);
        assert_eq!(port.parity(), Parity::Odd);
    }

    #[test]
    fn standard_baud_round_trip() {
        let mut port = pty_port();
        port.set_baud_rate(9600).unwrap();
        port.reload().unwrap();
        assert_eq!(port.baud_rate(), 9600);
    }

    #[test]
    fn zero_baud_is_rejected() {
        let mut port = pty_port();
        assert!(matches!(
            port.set_baud_rate(0),
            Err(PortError::OutOfRange(_))
        ));
    }

    #[test]
    fn write_timeout_is_unsupported() {
        let mut port = pty_port();
        assert!(matches!(
            port.set_write_timeout(Duration::from_millis(100)),
            Err(PortError::Unsupported(_))
        ));
        assert!(matches!(
            port.set_output_buffer_size(8192),
            Err(PortError::Unsupported(_))
        ));
    }

    #[test]
    fn input_buffer_starts_empty() {
        let port = pty_port();
        assert_eq!(port.bytes_to_read().unwrap(), 0);
    }

    #[test]
    fn discard_and_drain_succeed_when_idle() {
        let port = pty_port();
        port.discard_input().unwrap();
        port.discard_output().unwrap();
        port.discard_all().unwrap();
        port.drain().unwrap();
    }
}
