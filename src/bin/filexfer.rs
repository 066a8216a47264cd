//! `filexfer`: a thin CLI collaborator over the `filexfer` library.
//! Talks the selected protocol/flavor over stdin/stdout, the same way
//! `sz`/`rz` do when invoked without a dedicated tty.

use std::io::{self, Read as IoRead, Write as IoWrite};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::error;

use filexfer::config::TransferConfig;
use filexfer::error::TransferError;
use filexfer::facade::{self, Transfer};
use filexfer::local_file::{LocalFile, LocalFileSystem, OpenMode, StdFs};
use filexfer::session::{Direction, Flavor, Protocol, Session};
use filexfer::wire::{Channel, TimedPort};
use filexfer::ymodem::block0::Block0Meta;
use filexfer::ymodem::QueuedFile;

#[derive(Parser)]
#[command(name = "filexfer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one or more files.
    Send {
        #[command(flatten)]
        selection: ProtocolSelection,

        /// Files to send.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Receive into a directory.
    Receive {
        #[command(flatten)]
        selection: ProtocolSelection,

        /// Directory to write received files into.
        directory: PathBuf,
    },
}

#[derive(Args)]
struct ProtocolSelection {
    #[arg(long)]
    xmodem: bool,
    #[arg(long)]
    ymodem: bool,
    #[arg(long)]
    zmodem: bool,

    #[arg(long = "1k")]
    one_k: bool,
    #[arg(long)]
    crc: bool,
    #[arg(long)]
    g: bool,
    #[arg(long)]
    vanilla: bool,
}

impl ProtocolSelection {
    fn protocol(&self) -> Result<Protocol, CliError> {
        match (self.xmodem, self.ymodem, self.zmodem) {
            (true, false, false) => Ok(Protocol::Xmodem),
            (false, true, false) => Ok(Protocol::Ymodem),
            (false, false, true) => Ok(Protocol::Zmodem),
            _ => Err(CliError::Usage(
                "specify exactly one of --xmodem, --ymodem, --zmodem".into(),
            )),
        }
    }

    fn flavor(&self, protocol: Protocol) -> Result<Flavor, CliError> {
        let flavor = match (protocol, self.vanilla, self.crc, self.one_k, self.g) {
            (Protocol::Xmodem, true, false, false, false) => Flavor::XmodemVanilla,
            (Protocol::Xmodem, false, true, false, false) => Flavor::XmodemCrc,
            (Protocol::Xmodem, false, false, true, false) => Flavor::Xmodem1K,
            (Protocol::Xmodem, false, false, true, true) => Flavor::Xmodem1KG,
            (Protocol::Xmodem, false, false, false, false) => Flavor::XmodemCrc,
            (Protocol::Ymodem, _, _, _, false) => Flavor::YmodemVanilla,
            (Protocol::Ymodem, _, _, _, true) => Flavor::YmodemG,
            (Protocol::Zmodem, false, _, _, _) | (Protocol::Zmodem, _, true, _, _) => {
                Flavor::ZmodemCrc32
            }
            (Protocol::Zmodem, true, false, _, _) => Flavor::ZmodemVanilla,
            (Protocol::Kermit, ..) => {
                return Err(CliError::Usage("kermit is not selectable from the CLI".into()))
            }
        };
        Ok(flavor)
    }
}

enum CliError {
    Usage(String),
    Abort(TransferError),
    Io(String),
    Cancel,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::from(0),
        Err(CliError::Usage(msg)) => {
            eprintln!("usage error: {msg}");
            ExitCode::from(1)
        }
        Err(CliError::Abort(e)) => {
            error!("transfer aborted: {e}");
            ExitCode::from(2)
        }
        Err(CliError::Io(msg)) => {
            error!("I/O error: {msg}");
            ExitCode::from(3)
        }
        Err(CliError::Cancel) => {
            eprintln!("transfer cancelled");
            ExitCode::from(4)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Send { selection, files } => {
            let protocol = selection.protocol()?;
            let flavor = selection.flavor(protocol)?;
            send(protocol, flavor, &files)
        }
        Commands::Receive { selection, directory } => {
            let protocol = selection.protocol()?;
            let flavor = selection.flavor(protocol)?;
            receive(protocol, flavor, &directory)
        }
    }
}

fn send(protocol: Protocol, flavor: Flavor, paths: &[PathBuf]) -> Result<(), CliError> {
    let config = TransferConfig::default();
    let session = Session::new(protocol, flavor, Direction::Upload);
    let handle = session.handle();
    let mut channel = Channel::new(StdioPort::new(), session.cancel_flag());

    let result = match protocol {
        Protocol::Xmodem => {
            if paths.len() != 1 {
                return Err(CliError::Usage("xmodem sends exactly one file".into()));
            }
            let mut file =
                std::fs::File::open(&paths[0]).map_err(|e| CliError::Io(e.to_string()))?;
            facade::run::<_, std::fs::File, StdFs>(
                &mut channel,
                Transfer::UploadOne(&mut file),
                &session,
                &handle,
                &config,
            )
        }
        Protocol::Ymodem | Protocol::Zmodem => {
            let mut queued = queue_files(paths)?;
            facade::run::<_, std::fs::File, StdFs>(
                &mut channel,
                Transfer::UploadBatch(&mut queued),
                &session,
                &handle,
                &config,
            )
        }
        Protocol::Kermit => return Err(CliError::Usage("kermit is not selectable from the CLI".into())),
    };

    to_cli_result(result)
}

fn receive(protocol: Protocol, flavor: Flavor, directory: &PathBuf) -> Result<(), CliError> {
    let config = TransferConfig::default();
    let session = Session::new(protocol, flavor, Direction::Download);
    let handle = session.handle();
    let mut channel = Channel::new(StdioPort::new(), session.cancel_flag());
    let fs = StdFs::new(directory.clone());

    let result = match protocol {
        Protocol::Xmodem => {
            let mut file = fs
                .open(std::path::Path::new("received.bin"), OpenMode::Write)
                .map_err(|e| CliError::Io(e.to_string()))?;
            facade::run::<_, std::fs::File, StdFs>(
                &mut channel,
                Transfer::DownloadOne(&mut file),
                &session,
                &handle,
                &config,
            )
        }
        Protocol::Ymodem | Protocol::Zmodem => facade::run::<_, std::fs::File, StdFs>(
            &mut channel,
            Transfer::DownloadBatch(&fs),
            &session,
            &handle,
            &config,
        ),
        Protocol::Kermit => return Err(CliError::Usage("kermit is not selectable from the CLI".into())),
    };

    to_cli_result(result)
}

fn to_cli_result(result: filexfer::error::Result<filexfer::session::SessionState>) -> Result<(), CliError> {
    match result {
        Ok(_) => Ok(()),
        Err(TransferError::LocalCancel | TransferError::RemoteCancel) => Err(CliError::Cancel),
        Err(TransferError::Io(e)) => Err(CliError::Io(e.to_string())),
        Err(e) => Err(CliError::Abort(e)),
    }
}

fn queue_files(paths: &[PathBuf]) -> Result<Vec<QueuedFile<std::fs::File>>, CliError> {
    paths
        .iter()
        .map(|path| {
            let file = std::fs::File::open(path).map_err(|e| CliError::Io(e.to_string()))?;
            let size = file.size().map_err(|e| CliError::Io(e.to_string()))?;
            let mtime = file.mtime().ok();
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("transfer.bin")
                .to_string();
            let mut meta = Block0Meta {
                name,
                size,
                mtime: None,
                mode: None,
                serial: None,
            };
            meta.mtime = mtime.and_then(|t| {
                t.duration_since(std::time::UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_secs())
            });
            Ok(QueuedFile { meta, file })
        })
        .collect()
}

/// A paired stdin/stdout byte port, read-timed via a background reader
/// thread draining stdin into a channel (mirrors what `sz`/`rz` see when
/// run without a dedicated serial tty).
struct StdioPort {
    rx: Receiver<u8>,
    stdout: io::Stdout,
    timeout: Duration,
}

impl StdioPort {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            let mut lock = stdin.lock();
            let mut byte = [0u8; 1];
            loop {
                match lock.read(&mut byte) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(byte[0]).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            rx,
            stdout: io::stdout(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl IoRead for StdioPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.rx.recv_timeout(self.timeout) {
            Ok(b) => {
                buf[0] = b;
                Ok(1)
            }
            Err(RecvTimeoutError::Timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "stdin read timed out"))
            }
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }
}

impl IoWrite for StdioPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdout.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()
    }
}

impl TimedPort for StdioPort {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}
