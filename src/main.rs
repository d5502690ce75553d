mod capture;
mod controller;
mod error;
mod output;
mod sink;

use anyhow::{bail, Context, Result};
use capture::{Backend, DeviceInfo, Encoding, Format};
use clap::{Parser, Subcommand};
use controller::{CameraController, DeliveryPolicy};
use output::{OutputSink, StatsSurface, V4L2Output};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Camera driver backend
    #[arg(long, value_enum, default_value_t = Backend::Nokhwa, global = true)]
    backend: Backend,

    /// Camera to use (index, or device path for the v4l backend); defaults to the first camera
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Capture resolution width
    #[arg(long, default_value_t = 640, global = true)]
    width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 480, global = true)]
    height: u32,

    /// Stream encoding requested from the camera
    #[arg(long, value_enum, default_value_t = Encoding::Mjpeg, global = true)]
    encoding: Encoding,

    /// Target frames per second
    #[arg(long, default_value_t = 15, global = true)]
    fps: u32,

    /// Frame delivery to the display surface
    #[arg(long, value_enum, default_value_t = DeliveryPolicy::LatestOnly, global = true)]
    policy: DeliveryPolicy,

    /// JPEG quality for grabbed frames (1-100)
    #[arg(long, default_value_t = controller::DEFAULT_JPEG_QUALITY, global = true)]
    jpeg_quality: u8,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available cameras
    List {
        /// Also query supported resolutions and pixel formats
        #[arg(long)]
        caps: bool,
    },

    /// Open the camera, grab one frame to a JPEG file and close it
    Grab {
        /// Output JPEG path (overwritten)
        #[arg(short, long, default_value = "grab.jpg")]
        output: PathBuf,

        /// Frames to let through before grabbing, so exposure can settle
        #[arg(long, default_value_t = 10)]
        warmup: usize,

        /// Give up when no frame arrives within this many seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Interactive live preview; commands are read from stdin
    Preview {
        /// v4l2loopback device to show the preview on; only logs frame stats when omitted
        #[arg(long)]
        preview_device: Option<PathBuf>,

        /// Directory for `grab` without an explicit path
        #[arg(long, default_value = ".")]
        grab_dir: PathBuf,
    },
}

/// Application root: the one camera controller and the one display surface.
struct App {
    controller: CameraController,
    surface: Box<dyn OutputSink>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let format = Format {
        width: args.width,
        height: args.height,
        encoding: args.encoding,
        frame_rate: args.fps,
    };
    tracing::debug!("Backend: {:?}, requested format: {}", args.backend, format);

    let mut controller = CameraController::new(capture::create_driver(args.backend))
        .with_policy(args.policy)
        .with_jpeg_quality(args.jpeg_quality)
        .with_format(format);

    if let Command::List { caps } = args.command {
        return list_devices(&mut controller, caps);
    }

    match &args.device {
        Some(identify) => controller
            .select_device(identify)
            .with_context(|| format!("Failed to select camera {}", identify))?,
        None => controller
            .select_default_device()
            .context("Failed to select default camera")?,
    }

    match args.command {
        Command::List { .. } => Ok(()),
        Command::Grab {
            output,
            warmup,
            timeout_secs,
        } => grab_once(
            &mut controller,
            &output,
            warmup,
            Duration::from_secs(timeout_secs),
        ),
        Command::Preview {
            preview_device,
            grab_dir,
        } => {
            let surface: Box<dyn OutputSink> = match preview_device {
                Some(path) => Box::new(
                    V4L2Output::new(&path, args.width, args.height)
                        .context("Failed to initialize preview surface")?,
                ),
                None => Box::new(StatsSurface::new()),
            };
            let mut app = App {
                controller,
                surface,
            };
            app.run(&grab_dir)
        }
    }
}

fn list_devices(controller: &mut CameraController, caps: bool) -> Result<()> {
    let devices = controller.devices().context("Failed to enumerate cameras")?;
    if devices.is_empty() {
        println!("No cameras found");
        return Ok(());
    }

    for device in devices {
        if !caps {
            print_device(&device);
            continue;
        }

        let info = controller
            .select_device(&device.identify)
            .and_then(|_| controller.device_info());
        match info {
            Ok(info) => print_device(&info),
            Err(e) => {
                print_device(&device);
                println!("    capabilities unavailable: {}", e);
            }
        }
    }
    Ok(())
}

fn print_device(device: &DeviceInfo) {
    println!("{}  {}", device.identify, device.description);
    if !device.formats.is_empty() {
        println!("    formats: {}", device.formats.join(", "));
    }
    if !device.resolutions.is_empty() {
        let sizes: Vec<_> = device.resolutions.iter().map(|r| r.to_string()).collect();
        println!("    resolutions: {}", sizes.join(", "));
    }
}

fn grab_once(
    controller: &mut CameraController,
    output: &Path,
    warmup: usize,
    timeout: Duration,
) -> Result<()> {
    controller.open().context("Failed to open camera")?;
    let format = controller.format().context("Failed to read camera format")?;
    tracing::info!("Streaming {}", format);

    let deadline = Instant::now() + timeout;
    let mut received = 0;
    while received <= warmup {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            controller.close().context("Failed to close camera")?;
            bail!("No frame within {:?} ({} received)", timeout, received);
        }
        received += controller.pump_timeout(remaining, |_| {});
    }

    if let Some(image) = controller.live_image() {
        tracing::debug!("Grabbing {}x{} frame", image.width(), image.height());
    }
    let grabbed = controller.capture(output);
    controller.close().context("Failed to close camera")?;
    grabbed.with_context(|| format!("Failed to write {}", output.display()))?;

    println!("{}", output.display());
    Ok(())
}

enum UiCommand {
    Open,
    Close,
    Grab(Option<PathBuf>),
    Device(String),
    Format(Format),
    Info,
    Quit,
}

fn parse_command(line: &str) -> Result<UiCommand> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        bail!("empty command");
    };

    let command = match verb {
        "open" => UiCommand::Open,
        "close" => UiCommand::Close,
        "grab" => UiCommand::Grab(words.next().map(PathBuf::from)),
        "device" => match words.next() {
            Some(identify) => UiCommand::Device(identify.to_string()),
            None => bail!("usage: device ID"),
        },
        "format" => {
            let fields: Vec<_> = words.collect();
            let [width, height, encoding, fps] = fields.as_slice() else {
                bail!("usage: format WIDTH HEIGHT mjpeg|yuyv FPS");
            };
            let encoding = match encoding.to_ascii_lowercase().as_str() {
                "mjpeg" => Encoding::Mjpeg,
                "yuyv" => Encoding::Yuyv,
                other => bail!("unknown encoding {}", other),
            };
            UiCommand::Format(Format {
                width: width.parse().context("bad width")?,
                height: height.parse().context("bad height")?,
                encoding,
                frame_rate: fps.parse().context("bad fps")?,
            })
        }
        "info" => UiCommand::Info,
        "quit" | "exit" => UiCommand::Quit,
        other => bail!("unknown command {}", other),
    };
    Ok(command)
}

impl App {
    fn run(&mut self, grab_dir: &Path) -> Result<()> {
        let commands = spawn_stdin_reader();
        tracing::info!("Commands: open, close, grab [PATH], device ID, format W H ENC FPS, info, quit");

        loop {
            while let Ok(line) = commands.try_recv() {
                let command = match line {
                    Some(line) => match parse_command(&line) {
                        Ok(command) => command,
                        Err(e) => {
                            tracing::warn!("{}", e);
                            continue;
                        }
                    },
                    None => UiCommand::Quit,
                };
                if matches!(command, UiCommand::Quit) {
                    if self.controller.is_running() {
                        self.controller.close().context("Failed to close camera")?;
                    }
                    return Ok(());
                }
                self.handle(command, grab_dir);
            }

            let surface = &mut self.surface;
            let mut shown = Ok(());
            self.controller
                .pump_timeout(Duration::from_millis(50), |image| {
                    if shown.is_ok() {
                        shown = surface.write_frame(image);
                    }
                });
            shown.context("Failed to show frame")?;
        }
    }

    /// Lifecycle failures are reported and the session keeps going.
    fn handle(&mut self, command: UiCommand, grab_dir: &Path) {
        let result = match command {
            UiCommand::Open => self.controller.open().map_err(anyhow::Error::from),
            UiCommand::Close => self.controller.close().map_err(anyhow::Error::from),
            UiCommand::Grab(path) => {
                let path = path.unwrap_or_else(|| grab_dir.join(grab_file_name()));
                self.controller
                    .capture(&path)
                    .map(|_| println!("{}", path.display()))
                    .map_err(anyhow::Error::from)
            }
            UiCommand::Device(identify) => self
                .controller
                .select_device(&identify)
                .map_err(anyhow::Error::from),
            UiCommand::Format(format) => self
                .controller
                .set_format(format)
                .and_then(|_| self.controller.format())
                .map(|applied| tracing::info!("Format now {}", applied))
                .map_err(anyhow::Error::from),
            UiCommand::Info => self
                .controller
                .device_info()
                .map(|info| print_device(&info))
                .map_err(anyhow::Error::from),
            UiCommand::Quit => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!("{}", e);
        } else {
            tracing::debug!(
                "State: {:?}, camera {}, surface {:?}",
                self.controller.state(),
                self.controller
                    .device()
                    .map_or("none", |device| device.identify.as_str()),
                self.surface.resolution()
            );
        }
    }
}

/// Lines from stdin; `None` once stdin is closed.
fn spawn_stdin_reader() -> Receiver<Option<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(Some(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(None);
    });
    rx
}

fn grab_file_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("grab-{}.jpg", millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifecycle_commands() {
        assert!(matches!(parse_command("open"), Ok(UiCommand::Open)));
        assert!(matches!(parse_command("close"), Ok(UiCommand::Close)));
        assert!(matches!(parse_command("grab"), Ok(UiCommand::Grab(None))));
        assert!(matches!(parse_command("quit"), Ok(UiCommand::Quit)));

        let Ok(UiCommand::Grab(Some(path))) = parse_command("grab /tmp/a.jpg") else {
            panic!("grab with path should parse");
        };
        assert_eq!(path, PathBuf::from("/tmp/a.jpg"));
    }

    #[test]
    fn parses_format_command() {
        let Ok(UiCommand::Format(format)) = parse_command("format 1280 720 YUYV 30") else {
            panic!("format should parse");
        };
        assert_eq!(
            format,
            Format {
                width: 1280,
                height: 720,
                encoding: Encoding::Yuyv,
                frame_rate: 30,
            }
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_command("format 1280 720").is_err());
        assert!(parse_command("format 1280 720 h264 30").is_err());
        assert!(parse_command("device").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn cli_defaults_match_camera_defaults() {
        let args = Args::parse_from(["camgrab", "grab"]);
        let format = Format {
            width: args.width,
            height: args.height,
            encoding: args.encoding,
            frame_rate: args.fps,
        };
        assert_eq!(format, Format::default());
        assert_eq!(args.policy, DeliveryPolicy::LatestOnly);
        assert_eq!(args.backend, Backend::Nokhwa);
    }
}
