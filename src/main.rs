use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use structopt::StructOpt;

use termport::{
    DiagnosableError, Handshake, ModemLines, Parity, PortError, ReadTimeout, SerialPort,
};

mod log;

/// Inspect and configure serial ports over the Linux termios interface.
#[derive(Debug, StructOpt)]
#[structopt(name = "termport")]
struct Opts {
    /// Serial device to operate on, e.g. /dev/ttyUSB0.
    #[structopt(parse(from_os_str))]
    device: PathBuf,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Print the current configuration and modem line state.
    Info,
    /// Reset the port to raw-mode defaults, then apply the given line
    /// parameters.
    Config(ConfigOptions),
    /// Assert or clear modem control lines.
    Lines(LineOptions),
    /// Continuously poll modem lines and buffer levels.
    Watch(WatchOptions),
    /// Stream incoming bytes to stdout until interrupted.
    Dump,
    /// Transmit a break condition.
    SendBreak(BreakOptions),
}

#[derive(StructOpt, Debug)]
struct ConfigOptions {
    /// Baud rate. Rates outside the classic table (50..38400) are
    /// applied over the extended termios2 interface.
    #[structopt(long = "baud")]
    baud: Option<u32>,

    /// Parity: none, even or odd.
    #[structopt(long = "parity")]
    parity: Option<Parity>,

    /// Data bits: 5, 6, 7 or 8.
    #[structopt(long = "data-bits")]
    data_bits: Option<u8>,

    /// Stop bits: 1 or 2.
    #[structopt(long = "stop-bits")]
    stop_bits: Option<u8>,

    /// Flow control: none, software, hardware or both.
    #[structopt(long = "handshake")]
    handshake: Option<Handshake>,

    /// Read timeout in milliseconds; 0 polls, "none" blocks
    /// indefinitely.
    #[structopt(long = "read-timeout")]
    read_timeout: Option<String>,
}

#[derive(StructOpt, Debug)]
struct LineOptions {
    /// Level for the DTR line: on or off.
    #[structopt(long = "dtr", parse(try_from_str = parse_level))]
    dtr: Option<bool>,

    /// Level for the RTS line: on or off.
    #[structopt(long = "rts", parse(try_from_str = parse_level))]
    rts: Option<bool>,
}

#[derive(StructOpt, Debug)]
struct WatchOptions {
    /// Polling interval in milliseconds.
    #[structopt(long = "interval", default_value = "500")]
    interval_ms: u64,
}

#[derive(StructOpt, Debug)]
struct BreakOptions {
    /// Hold the line in break condition for the given number of
    /// milliseconds instead of the driver's default burst.
    #[structopt(long = "hold")]
    hold_ms: Option<u64>,
}

fn parse_level(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "on" | "high" | "1" => Ok(true),
        "off" | "low" | "0" => Ok(false),
        _ => Err(format!("expected on/off, got {:?}", s)),
    }
}

fn parse_timeout(s: &str) -> Result<ReadTimeout> {
    match s.to_lowercase().as_str() {
        "none" | "block" => Ok(ReadTimeout::Blocking),
        "0" => Ok(ReadTimeout::NonBlocking),
        millis => Ok(ReadTimeout::Timeout(Duration::from_millis(
            millis
                .parse()
                .with_context(|| format!("Invalid read timeout {:?}", s))?,
        ))),
    }
}

fn main() {
    if let Err(e) = run() {
        log::err(format!("{:#}", e));
        if let Some(e) = e.downcast_ref::<PortError>() {
            for hint in e.diagnose() {
                log::hint(hint);
            }
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opts = Opts::from_args();

    match opts.cmd {
        Command::Info => {
            let port = SerialPort::attach(&opts.device)?;
            info(&port)
        }
        Command::Config(cfg) => {
            let mut port = SerialPort::open(&opts.device)?;
            config(&mut port, &cfg)?;
            info(&port)
        }
        Command::Lines(lines) => {
            let mut port = SerialPort::attach(&opts.device)?;
            set_lines(&mut port, &lines)
        }
        Command::Watch(watch_opts) => {
            let port = SerialPort::attach(&opts.device)?;
            watch(&port, &watch_opts)
        }
        Command::Dump => {
            let mut port = SerialPort::open(&opts.device)?;
            dump(&mut port)
        }
        Command::SendBreak(brk) => {
            let mut port = SerialPort::attach(&opts.device)?;
            send_break(&mut port, &brk)
        }
    }
}

fn info(port: &SerialPort) -> Result<()> {
    let settings = port.settings();
    log::status(
        "Line",
        format!(
            "{} baud, {} data bits, {} stop bit(s), {:?} parity",
            port.baud_rate(),
            port.data_bits(),
            port.stop_bits(),
            port.parity(),
        ),
    );
    log::status(
        "Discipline",
        format!(
            "handshake: {:?}, read timeout: {}, {} mode",
            port.handshake(),
            describe_timeout(port.read_timeout()),
            if settings.canonical() {
                "canonical"
            } else {
                "raw"
            },
        ),
    );

    // Not every terminal has modem lines; a pty does not, for one.
    match port.modem_lines() {
        Ok(lines) => log::status("Modem", describe_lines(lines)),
        Err(e) => log::warn(format!("Modem lines unavailable: {}", e)),
    }

    Ok(())
}

fn config(port: &mut SerialPort, cfg: &ConfigOptions) -> Result<()> {
    if let Some(baud) = cfg.baud {
        port.set_baud_rate(baud)
            .with_context(|| format!("Failed to set baud rate {}", baud))?;
    }
    if let Some(parity) = cfg.parity {
        port.set_parity(parity)
            .with_context(|| format!("Failed to set {:?} parity", parity))?;
    }
    if let Some(bits) = cfg.data_bits {
        port.set_data_bits(bits)
            .with_context(|| format!("Failed to set {} data bits", bits))?;
    }
    if let Some(bits) = cfg.stop_bits {
        port.set_stop_bits(bits)
            .with_context(|| format!("Failed to set {} stop bits", bits))?;
    }
    if let Some(handshake) = cfg.handshake {
        port.set_handshake(handshake)
            .with_context(|| format!("Failed to set {:?} handshake", handshake))?;
    }
    if let Some(timeout) = &cfg.read_timeout {
        let timeout = parse_timeout(timeout)?;
        port.set_read_timeout(timeout)
            .context("Failed to set read timeout")?;
    }

    Ok(())
}

fn set_lines(port: &mut SerialPort, lines: &LineOptions) -> Result<()> {
    if let Some(level) = lines.dtr {
        port.set_dtr(level).context("Failed to drive DTR")?;
    }
    if let Some(level) = lines.rts {
        port.set_rts(level).context("Failed to drive RTS")?;
    }

    let lines = port.modem_lines().context("Failed to read lines back")?;
    log::status("Modem", describe_lines(lines));
    Ok(())
}

fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("Failed to install SIGINT handler")?;
    }
    Ok(running)
}

fn watch(port: &SerialPort, opts: &WatchOptions) -> Result<()> {
    let running = interrupt_flag()?;

    while running.load(Ordering::SeqCst) {
        let lines = port.modem_lines().context("Failed to poll modem lines")?;
        let pending_in = port.bytes_to_read()?;
        let pending_out = port.bytes_to_write()?;

        log::cont_status(
            "Watching",
            format!(
                "{}  in: {} B, out: {} B",
                describe_lines(lines),
                pending_in,
                pending_out
            ),
        );
        thread::sleep(Duration::from_millis(opts.interval_ms));
    }
    eprintln!();

    Ok(())
}

fn dump(port: &mut SerialPort) -> Result<()> {
    let running = interrupt_flag()?;

    // A finite timeout lets the loop notice the interrupt flag even on
    // a silent line; a read returning zero bytes means it expired.
    port.set_read_timeout(ReadTimeout::Timeout(Duration::from_millis(200)))?;

    let mut buf = [0u8; 4096];
    while running.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                io::stdout().write_all(&buf[..n])?;
                io::stdout().flush()?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read from port"),
        }
    }

    Ok(())
}

fn send_break(port: &mut SerialPort, brk: &BreakOptions) -> Result<()> {
    match brk.hold_ms {
        None => port.send_break().context("Failed to send break")?,
        Some(millis) => {
            // TIOCSBRK/TIOCCBRK bracket a sleep; tcsendbreak's duration
            // argument is implementation-defined and commonly ignored.
            port.set_break(true).context("Failed to begin break")?;
            thread::sleep(Duration::from_millis(millis));
            port.set_break(false).context("Failed to end break")?;
        }
    }

    log::status("Break", "sent".to_string());
    Ok(())
}

fn describe_timeout(timeout: ReadTimeout) -> String {
    match timeout {
        ReadTimeout::NonBlocking => "non-blocking".to_string(),
        ReadTimeout::Blocking => "blocking".to_string(),
        ReadTimeout::Timeout(duration) => format!("{} ms", duration.as_millis()),
    }
}

fn describe_lines(lines: ModemLines) -> String {
    [
        ("DTR", lines.dtr()),
        ("RTS", lines.rts()),
        ("CTS", lines.cts()),
        ("DSR", lines.dsr()),
        ("CD", lines.carrier_detect()),
        ("RI", lines.ring()),
    ]
    .iter()
    .map(|(name, level)| {
        if *level {
            name.to_string()
        } else {
            format!("-{}", name.to_lowercase())
        }
    })
    .collect::<Vec<_>>()
    .join(" ")
}
