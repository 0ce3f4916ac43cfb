use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use depthcam_core::calibration::save_calibration;
use depthcam_core::intrinsics::synthesize;
use depthcam_core::Stream;
use depthcam_hw::{FrameType, IntrinsicParams};
use std::path::PathBuf;

const BUS_NAME: &str = "org.depthcam.Camera1";
const OBJECT_PATH: &str = "/org/depthcam/Camera1";
const INTERFACE: &str = "org.depthcam.Camera1";

#[derive(Parser)]
#[command(name = "depthcam", about = "depthcam camera pipeline CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Print the active calibration of a stream
    Info {
        /// Stream name (rgb or depth)
        stream: Stream,
    },
    /// Write a synthesized calibration file
    Synth {
        /// Stream the calibration is for (rgb or depth)
        #[arg(long, default_value = "rgb")]
        stream: Stream,
        /// Take intrinsics and resolution from this device (e.g. "synthetic")
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        fx: Option<f64>,
        #[arg(long)]
        fy: Option<f64>,
        #[arg(long)]
        cx: Option<f64>,
        #[arg(long)]
        cy: Option<f64>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Camera name stored in the file (e.g. "<serial>_rgb")
        #[arg(long)]
        name: Option<String>,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

struct SynthInput {
    params: IntrinsicParams,
    width: u32,
    height: u32,
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let status = call_daemon(cli.system, "Status", &()).await?;
            print_json(&status)?;
        }
        Commands::Info { stream } => {
            let info = call_daemon(cli.system, "CameraInfo", &(stream.name(),)).await?;
            print_json(&info)?;
        }
        Commands::Synth {
            stream,
            device,
            fx,
            fy,
            cx,
            cy,
            width,
            height,
            name,
            output,
        } => {
            let input = match device {
                Some(spec) => from_device(&spec, stream, name)?,
                None => {
                    let (Some(fx), Some(fy), Some(cx), Some(cy), Some(width), Some(height)) =
                        (fx, fy, cx, cy, width, height)
                    else {
                        bail!("--fx, --fy, --cx, --cy, --width and --height are required without --device");
                    };
                    SynthInput {
                        params: IntrinsicParams { fx, fy, cx, cy },
                        width,
                        height,
                        name: name.unwrap_or_else(|| format!("depthcam_{stream}")),
                    }
                }
            };

            let record = synthesize(&input.params, input.width, input.height);
            save_calibration(&output, &input.name, &record)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "Wrote {}x{} calibration for '{}' to {}",
                input.width,
                input.height,
                input.name,
                output.display()
            );
        }
    }

    Ok(())
}

fn from_device(spec: &str, stream: Stream, name: Option<String>) -> Result<SynthInput> {
    let device = depthcam_hw::open_device(spec, 1)
        .with_context(|| format!("could not open device '{spec}'"))?;
    let (params, frame_type) = match stream {
        Stream::Rgb => (device.color_params(), FrameType::Color),
        Stream::Depth => (device.ir_params(), FrameType::Depth),
    };
    let (width, height) = device.resolution(frame_type);
    Ok(SynthInput {
        params,
        width,
        height,
        name: name.unwrap_or_else(|| format!("{}_{stream}", device.serial_number())),
    })
}

async fn call_daemon<B>(system: bool, method: &str, body: &B) -> Result<String>
where
    B: serde::Serialize + zbus::zvariant::DynamicType,
{
    let connection = if system {
        zbus::Connection::system().await?
    } else {
        zbus::Connection::session().await?
    };
    let proxy = zbus::Proxy::new(&connection, BUS_NAME, OBJECT_PATH, INTERFACE).await?;
    let reply: String = proxy
        .call(method, body)
        .await
        .with_context(|| format!("depthcamd {method} call failed (is depthcamd running?)"))?;
    Ok(reply)
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
