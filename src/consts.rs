//! Constants the `libc` crate does not carry: the extended `termios2`
//! ioctl command codes, a few modem-status bits, and the mapping
//! between numeric baud rates and the enumerated POSIX speed codes.

use std::mem::size_of;

use nix::libc;

/// Length of the control-character array in the kernel `termios2`
/// record. Distinct from `libc::NCCS`, which describes the larger C
/// library layout.
pub const NCCS2: usize = 19;

// _IOC command packing, from include/uapi/asm-generic/ioctl.h:
// a command is (dir << 30) | (size << 16) | (type << 8) | nr.
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((dir << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)) as libc::c_ulong
}

/// Read the full `termios2` record, including the arbitrary speed
/// fields.
pub const TCGETS2: libc::c_ulong = ioc(IOC_READ, b'T', 0x2a, size_of::<libc::termios2>());
/// Write the full `termios2` record immediately.
pub const TCSETS2: libc::c_ulong = ioc(IOC_WRITE, b'T', 0x2b, size_of::<libc::termios2>());
/// As [`TCSETS2`], after draining pending output.
pub const TCSETSW2: libc::c_ulong = ioc(IOC_WRITE, b'T', 0x2c, size_of::<libc::termios2>());
/// As [`TCSETS2`], after draining output and flushing pending input.
pub const TCSETSF2: libc::c_ulong = ioc(IOC_WRITE, b'T', 0x2d, size_of::<libc::termios2>());

// Modem-status bits absent from libc.
pub const TIOCM_OUT1: libc::c_int = 0x2000;
pub const TIOCM_OUT2: libc::c_int = 0x4000;
pub const TIOCM_LOOP: libc::c_int = 0x8000;

/// Maps a numeric baud rate to its enumerated POSIX speed code.
///
/// Only the classic table (up to 38400) is covered; any other rate,
/// common USB-adapter rates such as 115200 included, must be applied
/// through the extended `termios2` interface instead.
pub fn standard_speed(baud: u32) -> Option<libc::speed_t> {
    match baud {
        0 => Some(libc::B0),
        50 => Some(libc::B50),
        75 => Some(libc::B75),
        110 => Some(libc::B110),
        134 => Some(libc::B134),
        150 => Some(libc::B150),
        200 => Some(libc::B200),
        300 => Some(libc::B300),
        600 => Some(libc::B600),
        1200 => Some(libc::B1200),
        1800 => Some(libc::B1800),
        2400 => Some(libc::B2400),
        4800 => Some(libc::B4800),
        9600 => Some(libc::B9600),
        19200 => Some(libc::B19200),
        38400 => Some(libc::B38400),
        _ => None,
    }
}

/// Inverse of [`standard_speed`].
pub fn speed_to_baud(code: libc::speed_t) -> Option<u32> {
    match code {
        libc::B0 => Some(0),
        libc::B50 => Some(50),
        libc::B75 => Some(75),
        libc::B110 => Some(110),
        libc::B134 => Some(134),
        libc::B150 => Some(150),
        libc::B200 => Some(200),
        libc::B300 => Some(300),
        libc::B600 => Some(600),
        libc::B1200 => Some(1200),
        libc::B1800 => Some(1800),
        libc::B2400 => Some(2400),
        libc::B4800 => Some(4800),
        libc::B9600 => Some(9600),
        libc::B19200 => Some(19200),
        libc::B38400 => Some(38400),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// The kernel record the extended command codes are derived from
    /// must be four flag words, a line byte, 19 control characters and
    /// two speed words.
    #[test]
    fn termios2_record_is_44_bytes() {
        assert_eq!(size_of::<libc::termios2>(), 44);
    }

    /// The derived command codes must match the values documented in
    /// ioctl_tty(2).
    #[test]
    fn termios2_ioctl_codes() {
        assert_eq!(TCGETS2 as u32, 0x802C_542A);
        assert_eq!(TCSETS2 as u32, 0x402C_542B);
        assert_eq!(TCSETSW2 as u32, 0x402C_542C);
        assert_eq!(TCSETSF2 as u32, 0x402C_542D);
    }

    #[test]
    fn speed_table_round_trips() {
        for baud in [
            0, 50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400,
        ] {
            let code = standard_speed(baud).unwrap();
            assert_eq!(speed_to_baud(code), Some(baud));
        }
    }

    #[test]
    fn nonstandard_rates_have_no_code() {
        for baud in [57600, 115200, 230400, 250000, 1_000_000] {
            assert_eq!(standard_speed(baud), None);
        }
    }
}
