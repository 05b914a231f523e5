//! The dirty-copy/commit wrapper around a terminal's `termios` record.
//!
//! [`PortSettings`] holds one in-memory copy of the kernel state for an
//! open descriptor. Typed accessors mutate the copy only;
//! [`PortSettings::commit`] pushes the whole record to the kernel and
//! [`PortSettings::refresh`] pulls it back. The single exception is
//! [`PortSettings::set_custom_baud`], which must transfer the record
//! through the extended `termios2` ioctl because the standard speed
//! functions only accept the enumerated rate table.

use std::mem;
use std::os::unix::io::RawFd;
use std::str::FromStr;
use std::time::Duration;

use nix::libc;

use crate::consts;
use crate::sys;
use crate::PortError;

/// Parity bit generation and checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
    /// Parity bit always one. No portable Linux encoding without
    /// sparsely-documented flag combinations; rejected on this
    /// platform.
    Mark,
    /// Parity bit always zero. Rejected, as [`Parity::Mark`].
    Space,
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            "mark" => Ok(Self::Mark),
            "space" => Ok(Self::Space),
            _ => Err(format!("unknown parity {:?}", s)),
        }
    }
}

/// Flow control over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    None,
    /// XON/XOFF characters in the data stream.
    Software,
    /// RTS/CTS signalling.
    Hardware,
    /// Both of the above.
    Both,
}

impl FromStr for Handshake {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "software" | "xonxoff" => Ok(Self::Software),
            "hardware" | "rtscts" => Ok(Self::Hardware),
            "both" => Ok(Self::Both),
            _ => Err(format!("unknown handshake {:?}", s)),
        }
    }
}

/// Blocking policy for non-canonical reads, committed to the kernel as
/// the VMIN/VTIME control-character pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeout {
    /// Return immediately with whatever is buffered, possibly nothing.
    NonBlocking,
    /// Block until at least one byte (up to 255) is available.
    Blocking,
    /// Block for at most the given duration. The VTIME byte bounds this
    /// to 2550 ms; anything above is rejected.
    Timeout(Duration),
}

const VTIME_CEILING_MS: u128 = 2550;

/// The four flag words of the termios record, for the mask helpers
/// below. One code path for all words; no per-word duplication to slip
/// a wrong field into.
#[derive(Debug, Clone, Copy)]
enum FlagWord {
    Input,
    Output,
    Control,
    Local,
}

pub struct PortSettings {
    fd: RawFd,
    raw: libc::termios,
}

impl PortSettings {
    /// Snapshots the current terminal state of `fd`. The wrapper is
    /// never observable in an unsynchronized state: construction
    /// performs the initial [`refresh`](Self::refresh).
    pub fn from_fd(fd: RawFd) -> Result<Self, PortError> {
        let mut settings = Self {
            fd,
            raw: unsafe { mem::zeroed() },
        };
        settings.refresh()?;
        Ok(settings)
    }

    /// Pulls the kernel's current state into the in-memory copy,
    /// discarding uncommitted changes.
    pub fn refresh(&mut self) -> Result<(), PortError> {
        sys::tcgetattr(self.fd, &mut self.raw)?;

        // The C library synthesizes the speed fields from the CBAUD
        // bits, which cannot carry an arbitrary rate. Recover the true
        // words through the extended interface.
        if self.raw.c_cflag & libc::CBAUD == libc::BOTHER {
            let mut t2: libc::termios2 = unsafe { mem::zeroed() };
            unsafe { sys::ioctl::tcgets2(self.fd, &mut t2) }?;
            self.raw.c_ispeed = t2.c_ispeed;
            self.raw.c_ospeed = t2.c_ospeed;
        }

        Ok(())
    }

    /// Pushes the in-memory copy to the kernel, effective immediately.
    /// Until this is called, no mutation has any effect on the device.
    pub fn commit(&self) -> Result<(), PortError> {
        sys::tcsetattr(self.fd, libc::TCSANOW, &self.raw)?;
        Ok(())
    }

    pub fn raw(&self) -> &libc::termios {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut libc::termios {
        &mut self.raw
    }

    fn word(&self, word: FlagWord) -> libc::tcflag_t {
        match word {
            FlagWord::Input => self.raw.c_iflag,
            FlagWord::Output => self.raw.c_oflag,
            FlagWord::Control => self.raw.c_cflag,
            FlagWord::Local => self.raw.c_lflag,
        }
    }

    fn word_mut(&mut self, word: FlagWord) -> &mut libc::tcflag_t {
        match word {
            FlagWord::Input => &mut self.raw.c_iflag,
            FlagWord::Output => &mut self.raw.c_oflag,
            FlagWord::Control => &mut self.raw.c_cflag,
            FlagWord::Local => &mut self.raw.c_lflag,
        }
    }

    fn flag(&self, word: FlagWord, mask: libc::tcflag_t) -> bool {
        self.word(word) & mask == mask
    }

    fn set_flag(&mut self, word: FlagWord, mask: libc::tcflag_t, on: bool) {
        let word = self.word_mut(word);
        if on {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    pub fn parity(&self) -> Parity {
        if !self.flag(FlagWord::Control, libc::PARENB) {
            Parity::None
        } else if self.flag(FlagWord::Control, libc::PARODD) {
            Parity::Odd
        } else {
            Parity::Even
        }
    }

    pub fn set_parity(&mut self, parity: Parity) -> Result<(), PortError> {
        // Parity errors are neither ignored nor marked in the input
        // stream, whichever mode is selected.
        self.set_flag(FlagWord::Input, libc::IGNPAR, false);
        self.set_flag(FlagWord::Input, libc::PARMRK, false);

        match parity {
            Parity::None => {
                self.set_flag(FlagWord::Control, libc::PARENB, false);
                self.set_flag(FlagWord::Input, libc::INPCK, false);
            }
            Parity::Even => {
                self.set_flag(FlagWord::Control, libc::PARENB, true);
                self.set_flag(FlagWord::Control, libc::PARODD, false);
                self.set_flag(FlagWord::Input, libc::INPCK, true);
            }
            Parity::Odd => {
                self.set_flag(FlagWord::Control, libc::PARENB, true);
                self.set_flag(FlagWord::Control, libc::PARODD, true);
                self.set_flag(FlagWord::Input, libc::INPCK, true);
            }
            Parity::Mark | Parity::Space => {
                return Err(PortError::Unsupported(format!("{:?} parity", parity)));
            }
        }

        Ok(())
    }

    pub fn stop_bits(&self) -> u8 {
        if self.flag(FlagWord::Control, libc::CSTOPB) {
            2
        } else {
            1
        }
    }

    pub fn set_stop_bits(&mut self, bits: u8) -> Result<(), PortError> {
        match bits {
            1 => self.set_flag(FlagWord::Control, libc::CSTOPB, false),
            2 => self.set_flag(FlagWord::Control, libc::CSTOPB, true),
            _ => {
                return Err(PortError::OutOfRange(format!(
                    "Stop bits must be 1 or 2, not {}",
                    bits
                )));
            }
        }

        Ok(())
    }

    pub fn data_bits(&self) -> u8 {
        match self.word(FlagWord::Control) & libc::CSIZE {
            libc::CS5 => 5,
            libc::CS6 => 6,
            libc::CS7 => 7,
            _ => 8, // CSIZE is two bits; only CS8 remains
        }
    }

    pub fn set_data_bits(&mut self, bits: u8) -> Result<(), PortError> {
        let size = match bits {
            5 => libc::CS5,
            6 => libc::CS6,
            7 => libc::CS7,
            8 => libc::CS8,
            _ => {
                return Err(PortError::Unsupported(format!("{} data bits", bits)));
            }
        };

        self.set_flag(FlagWord::Control, libc::CSIZE, false);
        self.set_flag(FlagWord::Control, size, true);
        Ok(())
    }

    pub fn handshake(&self) -> Handshake {
        // IXON/IXOFF/IXANY are always toggled as a group, so testing
        // one of them suffices.
        let hardware = self.flag(FlagWord::Control, libc::CRTSCTS);
        let software = self.flag(FlagWord::Input, libc::IXON);

        match (hardware, software) {
            (false, false) => Handshake::None,
            (false, true) => Handshake::Software,
            (true, false) => Handshake::Hardware,
            (true, true) => Handshake::Both,
        }
    }

    pub fn set_handshake(&mut self, handshake: Handshake) {
        self.set_flag(FlagWord::Control, libc::CRTSCTS, false);
        self.set_flag(
            FlagWord::Input,
            libc::IXON | libc::IXOFF | libc::IXANY,
            false,
        );

        if matches!(handshake, Handshake::Hardware | Handshake::Both) {
            self.set_flag(FlagWord::Control, libc::CRTSCTS, true);
        }
        if matches!(handshake, Handshake::Software | Handshake::Both) {
            self.set_flag(
                FlagWord::Input,
                libc::IXON | libc::IXOFF | libc::IXANY,
                true,
            );
        }
    }

    /// Whether input is line-buffered and editable. Must be off for
    /// VMIN/VTIME-governed byte-oriented reads to mean anything.
    pub fn canonical(&self) -> bool {
        self.flag(FlagWord::Local, libc::ICANON)
    }

    pub fn set_canonical(&mut self, on: bool) {
        self.set_flag(FlagWord::Local, libc::ICANON, on);
    }

    pub fn echo(&self) -> bool {
        self.flag(FlagWord::Local, libc::ECHO)
    }

    pub fn set_echo(&mut self, on: bool) {
        self.set_flag(
            FlagWord::Local,
            libc::ECHO | libc::ECHOE | libc::ECHONL,
            on,
        );
    }

    /// CLOCAL: ignore modem control lines.
    pub fn clocal(&self) -> bool {
        self.flag(FlagWord::Control, libc::CLOCAL)
    }

    pub fn set_clocal(&mut self, on: bool) {
        self.set_flag(FlagWord::Control, libc::CLOCAL, on);
    }

    /// CREAD: enable the receiver.
    pub fn cread(&self) -> bool {
        self.flag(FlagWord::Control, libc::CREAD)
    }

    pub fn set_cread(&mut self, on: bool) {
        self.set_flag(FlagWord::Control, libc::CREAD, on);
    }

    /// Rewrites the record to the raw-mode preset.
    pub fn make_raw(&mut self) {
        sys::cfmakeraw(&mut self.raw);
    }

    pub fn vmin(&self) -> u8 {
        self.raw.c_cc[libc::VMIN]
    }

    pub fn set_vmin(&mut self, count: u8) {
        self.raw.c_cc[libc::VMIN] = count;
    }

    /// The read timer, in deciseconds.
    pub fn vtime(&self) -> u8 {
        self.raw.c_cc[libc::VTIME]
    }

    pub fn set_vtime(&mut self, deciseconds: u8) {
        self.raw.c_cc[libc::VTIME] = deciseconds;
    }

    pub fn read_timeout(&self) -> ReadTimeout {
        match (self.vtime(), self.vmin()) {
            (0, 0) => ReadTimeout::NonBlocking,
            (0, _) => ReadTimeout::Blocking,
            (vtime, _) => ReadTimeout::Timeout(Duration::from_millis(u64::from(vtime) * 10)),
        }
    }

    pub fn set_read_timeout(&mut self, timeout: ReadTimeout) -> Result<(), PortError> {
        match timeout {
            ReadTimeout::NonBlocking => {
                self.set_vtime(0);
                self.set_vmin(0);
            }
            ReadTimeout::Blocking => {
                self.set_vtime(0);
                self.set_vmin(255);
            }
            ReadTimeout::Timeout(duration) => {
                let millis = duration.as_millis();
                if millis > VTIME_CEILING_MS {
                    return Err(PortError::OutOfRange(format!(
                        "Read timeout of {} ms does not fit the VTIME byte (at most {} ms)",
                        millis, VTIME_CEILING_MS
                    )));
                }
                self.set_vtime((millis / 10) as u8);
                self.set_vmin(0);
            }
        }

        Ok(())
    }

    /// The configured baud rate: the extended speed word if the record
    /// uses an arbitrary rate, the decoded table entry otherwise. Zero
    /// if the record holds a table code this build does not know.
    pub fn baud_rate(&self) -> u32 {
        if self.raw.c_cflag & libc::CBAUD == libc::BOTHER {
            self.raw.c_ospeed
        } else {
            consts::speed_to_baud(sys::cfgetospeed(&self.raw)).unwrap_or(0)
        }
    }

    /// Stores an enumerated speed `code` (see
    /// [`consts::standard_speed`]), clearing any extended-rate bits.
    /// Takes effect on the next [`commit`](Self::commit).
    pub fn set_standard_baud(&mut self, code: libc::speed_t) -> Result<(), PortError> {
        sys::cfsetspeed(&mut self.raw, code)?;
        Ok(())
    }

    /// Applies an arbitrary numeric rate: flags the record as
    /// extended-rate, stores the rate in both speed words, and (unlike
    /// every other mutator) transfers the record to the kernel at once,
    /// through the `termios2` ioctl. `tcsetattr` cannot carry rates
    /// outside the enumerated table.
    pub fn set_custom_baud(&mut self, rate: u32) -> Result<(), PortError> {
        self.encode_custom_baud(rate);
        let t2 = sys::termios2_from(&self.raw);
        unsafe { sys::ioctl::tcsets2(self.fd, &t2) }?;
        Ok(())
    }

    fn encode_custom_baud(&mut self, rate: u32) {
        self.raw.c_cflag &= !libc::CBAUD;
        self.raw.c_cflag |= libc::BOTHER;
        self.raw.c_ispeed = rate;
        self.raw.c_ospeed = rate;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nix::pty::openpty;

    fn pty_settings() -> PortSettings {
        let pty = openpty(None, None).unwrap();
        PortSettings::from_fd(pty.slave).unwrap()
    }

    #[test]
    fn data_bits_round_trip() {
        let mut settings = pty_settings();
        for bits in [5u8, 6, 7, 8] {
            settings.set_data_bits(bits).unwrap();
            settings.commit().unwrap();
            settings.refresh().unwrap();
            assert_eq!(settings.data_bits(), bits);
        }
    }

    #[test]
    fn unrepresentable_data_bits_are_rejected() {
        let mut settings = pty_settings();
        for bits in [0u8, 4, 9] {
            assert!(matches!(
                settings.set_data_bits(bits),
                Err(PortError::Unsupported(_))
            ));
        }
    }

    #[test]
    fn stop_bits_round_trip() {
        let mut settings = pty_settings();
        for bits in [2u8, 1] {
            settings.set_stop_bits(bits).unwrap();
            settings.commit().unwrap();
            settings.refresh().unwrap();
            assert_eq!(settings.stop_bits(), bits);
        }
    }

    #[test]
    fn invalid_stop_bits_are_rejected() {
        let mut settings = pty_settings();
        for bits in [0u8, 3, 15] {
            assert!(matches!(
                settings.set_stop_bits(bits),
                Err(PortError::OutOfRange(_))
            ));
        }
    }

    #[test]
    fn parity_round_trip() {
        let mut settings = pty_settings();
        for parity in [Parity::Even, Parity::Odd, Parity::None] {
            settings.set_parity(parity).unwrap();
            settings.commit().unwrap();
            settings.refresh().unwrap();
            assert_eq!(settings.parity(), parity);
        }
    }

    #[test]
    fn stick_parity_is_rejected() {
        let mut settings = pty_settings();
        for parity in [Parity::Mark, Parity::Space] {
            assert!(matches!(
                settings.set_parity(parity),
                Err(PortError::Unsupported(_))
            ));
        }
    }

    #[test]
    fn parity_drives_input_checking() {
        let mut settings = pty_settings();
        settings.set_parity(Parity::Even).unwrap();
        assert_ne!(settings.raw().c_iflag & libc::INPCK, 0);
        settings.set_parity(Parity::None).unwrap();
        assert_eq!(settings.raw().c_iflag & libc::INPCK, 0);
    }

    #[test]
    fn handshake_round_trip() {
        let mut settings = pty_settings();
        for handshake in [
            Handshake::Software,
            Handshake::Hardware,
            Handshake::Both,
            Handshake::None,
        ] {
            settings.set_handshake(handshake);
            assert_eq!(settings.handshake(), handshake);
        }
    }

    /// Software flow control lives in the input word, hardware flow
    /// control in the control word.
    #[test]
    fn handshake_bit_placement() {
        let soft = libc::IXON | libc::IXOFF | libc::IXANY;

        let mut settings = pty_settings();
        settings.set_handshake(Handshake::Software);
        assert_eq!(settings.raw().c_iflag & soft, soft);
        assert_eq!(settings.raw().c_cflag & libc::CRTSCTS, 0);

        settings.set_handshake(Handshake::Hardware);
        assert_eq!(settings.raw().c_iflag & soft, 0);
        assert_eq!(settings.raw().c_cflag & libc::CRTSCTS, libc::CRTSCTS);

        settings.set_handshake(Handshake::None);
        assert_eq!(settings.raw().c_iflag & soft, 0);
        assert_eq!(settings.raw().c_cflag & libc::CRTSCTS, 0);
    }

    #[test]
    fn read_timeout_policies() {
        let mut settings = pty_settings();

        settings.set_read_timeout(ReadTimeout::NonBlocking).unwrap();
        assert_eq!((settings.vtime(), settings.vmin()), (0, 0));

        settings.set_read_timeout(ReadTimeout::Blocking).unwrap();
        assert_eq!((settings.vtime(), settings.vmin()), (0, 255));

        settings
            .set_read_timeout(ReadTimeout::Timeout(Duration::from_millis(500)))
            .unwrap();
        assert_eq!((settings.vtime(), settings.vmin()), (50, 0));
    }

    /// 2550 ms is the last value the VTIME byte can carry; anything
    /// above must be rejected rather than silently truncated.
    #[test]
    fn read_timeout_ceiling() {
        let mut settings = pty_settings();

        settings
            .set_read_timeout(ReadTimeout::Timeout(Duration::from_millis(2550)))
            .unwrap();
        assert_eq!((settings.vtime(), settings.vmin()), (255, 0));

        for millis in [2551u64, 3000, 60_000] {
            assert!(matches!(
                settings.set_read_timeout(ReadTimeout::Timeout(Duration::from_millis(millis))),
                Err(PortError::OutOfRange(_))
            ));
        }
    }

    #[test]
    fn vmin_vtime_round_trip() {
        let mut settings = pty_settings();
        settings.set_vmin(100);
        settings.set_vtime(2);
        settings.commit().unwrap();
        settings.refresh().unwrap();
        assert_eq!(settings.vmin(), 100);
        assert_eq!(settings.vtime(), 2);
    }

    #[test]
    fn standard_baud_keeps_extended_bit_clear() {
        let mut settings = pty_settings();
        settings
            .set_standard_baud(consts::standard_speed(9600).unwrap())
            .unwrap();
        assert_eq!(settings.raw().c_cflag & libc::CBAUDEX, 0);
        assert_ne!(settings.raw().c_cflag & libc::CBAUD, libc::BOTHER);

        settings.commit().unwrap();
        settings.refresh().unwrap();
        assert_eq!(settings.baud_rate(), 9600);
    }

    #[test]
    fn custom_baud_sets_extended_rate() {
        let mut settings = pty_settings();
        settings.encode_custom_baud(250_000);
        assert_eq!(settings.raw().c_cflag & libc::CBAUD, libc::BOTHER);
        assert_eq!(settings.raw().c_ispeed, 250_000);
        assert_eq!(settings.raw().c_ospeed, 250_000);
        assert_eq!(settings.baud_rate(), 250_000);
    }

    #[test]
    fn custom_baud_survives_the_kernel() {
        let mut settings = pty_settings();
        settings.set_custom_baud(250_000).unwrap();
        settings.refresh().unwrap();
        assert_eq!(settings.baud_rate(), 250_000);
    }

    /// Committing twice without intervening mutation must be a no-op
    /// the kernel cannot distinguish from a single commit.
    #[test]
    fn commit_is_idempotent() {
        let mut settings = pty_settings();
        settings.set_data_bits(7).unwrap();
        settings.commit().unwrap();
        settings.commit().unwrap();
        settings.refresh().unwrap();
        assert_eq!(settings.data_bits(), 7);
    }

    #[test]
    fn canonical_mode_round_trip() {
        let mut settings = pty_settings();
        settings.set_canonical(false);
        settings.commit().unwrap();
        settings.refresh().unwrap();
        assert!(!settings.canonical());

        settings.set_canonical(true);
        settings.commit().unwrap();
        settings.refresh().unwrap();
        assert!(settings.canonical());
    }
}
