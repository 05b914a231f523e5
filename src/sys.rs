//! Thin bindings over the POSIX termios entry points and the tty
//! ioctls. Raw results are converted to [`Errno`] mechanically; no
//! interpretation happens at this layer, and a successful call mutates
//! kernel state only, never a caller's in-memory copy, unless that
//! copy is the out-parameter of the call itself.

use std::mem;
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::libc;

use crate::consts::NCCS2;

pub mod ioctl {
    //! Command bindings. The `termios2` codes are derived in
    //! [`crate::consts`]; the rest come from libc.
    use nix::libc;
    use nix::{ioctl_none_bad, ioctl_read_bad, ioctl_write_ptr_bad};

    use crate::consts;

    ioctl_read_bad!(tcgets2, consts::TCGETS2, libc::termios2);
    ioctl_write_ptr_bad!(tcsets2, consts::TCSETS2, libc::termios2);
    ioctl_write_ptr_bad!(tcsetsw2, consts::TCSETSW2, libc::termios2);
    ioctl_write_ptr_bad!(tcsetsf2, consts::TCSETSF2, libc::termios2);

    ioctl_read_bad!(tiocmget, libc::TIOCMGET, libc::c_int);
    ioctl_write_ptr_bad!(tiocmset, libc::TIOCMSET, libc::c_int);

    ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);
    ioctl_read_bad!(tiocoutq, libc::TIOCOUTQ, libc::c_int);

    ioctl_none_bad!(tiocexcl, libc::TIOCEXCL);
    ioctl_none_bad!(tiocsbrk, libc::TIOCSBRK);
    ioctl_none_bad!(tioccbrk, libc::TIOCCBRK);
}

/// Reads the terminal state of `fd` into `termios`.
pub fn tcgetattr(fd: RawFd, termios: &mut libc::termios) -> Result<(), Errno> {
    Errno::result(unsafe { libc::tcgetattr(fd, termios) }).map(drop)
}

/// Writes `termios` to `fd`. `action` is one of `TCSANOW`, `TCSADRAIN`
/// or `TCSAFLUSH`.
pub fn tcsetattr(fd: RawFd, action: libc::c_int, termios: &libc::termios) -> Result<(), Errno> {
    Errno::result(unsafe { libc::tcsetattr(fd, action, termios) }).map(drop)
}

/// Transmits zero bits on `fd`. A `duration` of zero holds the line in
/// break condition for an implementation-defined 0.25-0.5 s.
pub fn tcsendbreak(fd: RawFd, duration: libc::c_int) -> Result<(), Errno> {
    Errno::result(unsafe { libc::tcsendbreak(fd, duration) }).map(drop)
}

/// Blocks until all output written to `fd` has been transmitted.
pub fn tcdrain(fd: RawFd) -> Result<(), Errno> {
    Errno::result(unsafe { libc::tcdrain(fd) }).map(drop)
}

/// Discards untransmitted output and/or unread input on `fd`.
/// `queue` is one of `TCIFLUSH`, `TCOFLUSH` or `TCIOFLUSH`.
pub fn tcflush(fd: RawFd, queue: libc::c_int) -> Result<(), Errno> {
    Errno::result(unsafe { libc::tcflush(fd, queue) }).map(drop)
}

/// Suspends or restarts transmission or reception on `fd`. `action` is
/// one of `TCOOFF`, `TCOON`, `TCIOFF` or `TCION`.
pub fn tcflow(fd: RawFd, action: libc::c_int) -> Result<(), Errno> {
    Errno::result(unsafe { libc::tcflow(fd, action) }).map(drop)
}

/// Rewrites `termios` to the raw-mode preset: no input/output
/// translation, no echo, no canonical line editing, 8-bit characters.
pub fn cfmakeraw(termios: &mut libc::termios) {
    unsafe { libc::cfmakeraw(termios) }
}

pub fn cfgetispeed(termios: &libc::termios) -> libc::speed_t {
    unsafe { libc::cfgetispeed(termios) }
}

pub fn cfgetospeed(termios: &libc::termios) -> libc::speed_t {
    unsafe { libc::cfgetospeed(termios) }
}

/// Stores the enumerated speed `code` as both the input and output
/// rate of `termios`.
pub fn cfsetspeed(termios: &mut libc::termios, code: libc::speed_t) -> Result<(), Errno> {
    Errno::result(unsafe { libc::cfsetspeed(termios, code) }).map(drop)
}

/// Repacks a C-library `termios` into the kernel's `termios2` record.
/// Only the first [`NCCS2`] control characters exist on the kernel
/// side; the rest are a C-library extension and are dropped.
pub fn termios2_from(termios: &libc::termios) -> libc::termios2 {
    let mut t2: libc::termios2 = unsafe { mem::zeroed() };
    t2.c_iflag = termios.c_iflag;
    t2.c_oflag = termios.c_oflag;
    t2.c_cflag = termios.c_cflag;
    t2.c_lflag = termios.c_lflag;
    t2.c_line = termios.c_line;
    t2.c_cc.copy_from_slice(&termios.c_cc[..NCCS2]);
    t2.c_ispeed = termios.c_ispeed;
    t2.c_ospeed = termios.c_ospeed;
    t2
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn termios2_repack_preserves_fields() {
        let mut tio: libc::termios = unsafe { mem::zeroed() };
        tio.c_iflag = libc::IXON;
        tio.c_oflag = libc::OPOST;
        tio.c_cflag = libc::CS8 | libc::CREAD;
        tio.c_lflag = libc::ICANON;
        tio.c_cc[libc::VMIN] = 1;
        tio.c_cc[libc::VTIME] = 5;
        tio.c_ispeed = 250_000;
        tio.c_ospeed = 250_000;

        let t2 = termios2_from(&tio);
        assert_eq!(t2.c_iflag, libc::IXON);
        assert_eq!(t2.c_oflag, libc::OPOST);
        assert_eq!(t2.c_cflag, libc::CS8 | libc::CREAD);
        assert_eq!(t2.c_lflag, libc::ICANON);
        assert_eq!(t2.c_cc[libc::VMIN], 1);
        assert_eq!(t2.c_cc[libc::VTIME], 5);
        assert_eq!(t2.c_ispeed, 250_000);
        assert_eq!(t2.c_ospeed, 250_000);
    }
}
