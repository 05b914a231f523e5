//! The modem control-line bitmask, maintained by the kernel separately
//! from the termios record and transferred with its own ioctl pair.
//!
//! Like [`crate::settings::PortSettings`], state is obtained by an
//! explicit read only; constructing a [`ModemLines`] value performs no
//! I/O.

use std::os::unix::io::RawFd;

use nix::libc;

use crate::consts;
use crate::sys;
use crate::PortError;

/// One sample of the modem control and status lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModemLines(u32);

macro_rules! modem_line {
    ($(#[$attr:meta])* $get:ident, $set:ident, $mask:expr) => {
        $(#[$attr])*
        pub fn $get(self) -> bool {
            self.contains($mask as u32)
        }

        pub fn $set(&mut self, level: bool) {
            self.put($mask as u32, level);
        }
    };
}

impl ModemLines {
    /// Samples the lines of `fd` with `TIOCMGET`.
    pub fn read(fd: RawFd) -> Result<Self, PortError> {
        let mut bits: libc::c_int = 0;
        unsafe { sys::ioctl::tiocmget(fd, &mut bits) }?;
        Ok(Self(bits as u32))
    }

    /// Writes this sample back to `fd` with `TIOCMSET`, overwriting
    /// every output line at once.
    pub fn apply(self, fd: RawFd) -> Result<(), PortError> {
        let bits = self.0 as libc::c_int;
        unsafe { sys::ioctl::tiocmset(fd, &bits) }?;
        Ok(())
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    fn contains(self, mask: u32) -> bool {
        self.0 & mask == mask
    }

    fn put(&mut self, mask: u32, level: bool) {
        if level {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    modem_line!(
        /// Line enable.
        line_enable, set_line_enable, libc::TIOCM_LE
    );
    modem_line!(
        /// Data terminal ready.
        dtr, set_dtr, libc::TIOCM_DTR
    );
    modem_line!(
        /// Request to send.
        rts, set_rts, libc::TIOCM_RTS
    );
    modem_line!(
        /// Secondary transmit.
        secondary_transmit, set_secondary_transmit, libc::TIOCM_ST
    );
    modem_line!(
        /// Secondary receive.
        secondary_receive, set_secondary_receive, libc::TIOCM_SR
    );
    modem_line!(
        /// Clear to send.
        cts, set_cts, libc::TIOCM_CTS
    );
    modem_line!(
        /// Data carrier detect.
        carrier_detect, set_carrier_detect, libc::TIOCM_CAR
    );
    modem_line!(
        /// Ring indicator.
        ring, set_ring, libc::TIOCM_RNG
    );
    modem_line!(
        /// Data set ready.
        dsr, set_dsr, libc::TIOCM_DSR
    );
    modem_line!(out1, set_out1, consts::TIOCM_OUT1);
    modem_line!(out2, set_out2, consts::TIOCM_OUT2);
    modem_line!(
        /// Loopback mode.
        loopback, set_loopback, consts::TIOCM_LOOP
    );
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lines_map_to_their_bits() {
        let mut lines = ModemLines::default();

        lines.set_dtr(true);
        assert_eq!(lines.bits(), libc::TIOCM_DTR as u32);
        assert!(lines.dtr());

        lines.set_rts(true);
        assert_eq!(lines.bits(), (libc::TIOCM_DTR | libc::TIOCM_RTS) as u32);

        lines.set_dtr(false);
        assert_eq!(lines.bits(), libc::TIOCM_RTS as u32);
        assert!(!lines.dtr() && lines.rts());
    }

    #[test]
    fn status_lines_are_independent() {
        let mut lines = ModemLines::default();
        lines.set_cts(true);
        lines.set_dsr(true);
        lines.set_carrier_detect(true);
        lines.set_ring(true);

        assert!(lines.cts() && lines.dsr() && lines.carrier_detect() && lines.ring());
        assert!(!lines.dtr() && !lines.rts());

        lines.set_ring(false);
        assert!(!lines.ring());
        assert!(lines.cts() && lines.dsr() && lines.carrier_detect());
    }

    #[test]
    fn out_and_loop_bits() {
        let mut lines = ModemLines::default();
        lines.set_out1(true);
        lines.set_out2(true);
        lines.set_loopback(true);
        assert_eq!(lines.bits(), 0x2000 | 0x4000 | 0x8000);
    }
}
