use clap::{Args, CommandFactory, Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing_subscriber::EnvFilter;

use clpipe::{
    add::{ramp_inputs, vec_add_device, vec_add_host, vec_add_pipeline},
    discover,
    rotate::{format_rows, rotate_device, rotate_host, rotate_pipeline},
    Angle, ClError, DeviceClass, KernelSource, Pipeline, PlatformSelector, SessionConfig,
};

/// OpenCL dispatch pipeline demos.
#[derive(Parser, Debug)]
#[command(name = "clpipe", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every platform and the devices it exposes
    Platforms,
    /// Add a = [0, 1, ..] and b = [n, n-1, ..] on the device
    Add {
        #[command(flatten)]
        device: DeviceArgs,
        /// Number of elements
        #[arg(long, default_value_t = 1000)]
        len: usize,
    },
    /// Rotate a ramp image about its center
    Rotate(RotateArgs),
    /// Argument parsing demo
    Greet(GreetArgs),
}

#[derive(Args, Debug, Clone)]
struct DeviceArgs {
    /// Platform index (default: first platform)
    #[arg(long)]
    platform: Option<usize>,
    /// Device class: gpu, cpu, accelerator, default, all
    #[arg(long, default_value_t = DeviceClass::Gpu)]
    device: DeviceClass,
    /// Kernel source file instead of the bundled one
    #[arg(long, value_name = "FILE")]
    kernel: Option<PathBuf>,
}

impl DeviceArgs {
    fn config(&self) -> SessionConfig {
        SessionConfig {
            platform: self.platform.map_or(PlatformSelector::First, PlatformSelector::Index),
            device_class: self.device,
        }
    }
}

#[derive(Args, Debug)]
struct RotateArgs {
    #[command(flatten)]
    device: DeviceArgs,
    #[arg(long, default_value_t = 6)]
    width: usize,
    #[arg(long, default_value_t = 6)]
    height: usize,
    /// Rotation angle in degrees (default: 90)
    #[arg(long, conflicts_with_all = ["sin", "cos"])]
    degrees: Option<f64>,
    /// Raw sine, together with --cos
    #[arg(long, requires = "cos", allow_negative_numbers = true)]
    sin: Option<f32>,
    /// Raw cosine, together with --sin
    #[arg(long, requires = "sin", allow_negative_numbers = true)]
    cos: Option<f32>,
    /// Run only the host reference path
    #[arg(long)]
    host: bool,
}

impl RotateArgs {
    fn angle(&self) -> Angle {
        match (self.sin, self.cos, self.degrees) {
            (Some(s), Some(c), _) => Angle::from_sin_cos(s, c),
            (_, _, Some(d)) => Angle::from_degrees(d),
            _ => Angle::from_sin_cos(1.0, 0.0),
        }
    }
}

#[derive(Args, Debug)]
struct GreetArgs {
    /// Name to print
    #[arg(short, long)]
    name: String,
    /// Age to print
    #[arg(short, long)]
    age: Option<i32>,
    /// Print name backwards
    #[arg(short, long)]
    reverse: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CLPIPE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Platforms => platforms(),
        Command::Add { device, len } => add(&device, len),
        Command::Rotate(args) => rotate(&args),
        Command::Greet(args) => {
            print!("{}", greet(&args));
            Ok(())
        }
    };

    #[cfg(feature = "metrics")]
    eprint!("{}", clpipe::metrics::summary());

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn platforms() -> Result<(), ClError> {
    let list = discover::platforms()?;
    print!("{}", discover::render_summary(&list));
    Ok(())
}

fn add(device: &DeviceArgs, len: usize) -> Result<(), ClError> {
    let (a, b) = ramp_inputs(len);
    let out = match &device.kernel {
        None => vec_add_device(&device.config(), &a, &b)?,
        Some(path) => {
            let p = vec_add_pipeline(&a, &b)?;
            with_source(p, path).config(device.config()).run()?.read::<f32>(2)?
        }
    };
    let expected = vec_add_host(&a, &b)?;
    let line: Vec<String> = out.iter().map(|v| v.to_string()).collect();
    println!("{}", line.join(" "));
    if out == expected {
        println!("Executed program successfully.");
        Ok(())
    } else {
        Err(ClError::ReadbackFailure("device result differs from host reference".into()))
    }
}

fn rotate(args: &RotateArgs) -> Result<(), ClError> {
    let (w, h) = (args.width, args.height);
    let src: Vec<i32> = (0..(w * h) as i32).collect();
    let angle = args.angle();
    let host = rotate_host(&src, w, h, angle)?;
    if args.host {
        print!("{}", format_rows(&host, w));
        return Ok(());
    }

    let config = args.device.config();
    let out = match &args.device.kernel {
        None => rotate_device(&config, &src, w, h, angle)?,
        Some(path) => {
            let p = rotate_pipeline(&src, w, h, angle)?;
            with_source(p, path).config(config).run()?.read::<i32>(1)?
        }
    };
    print!("{}", format_rows(&out, w));
    if out == host {
        println!("device and host results match");
    } else {
        let diff = out.iter().zip(&host).filter(|(d, r)| d != r).count();
        println!("device and host results differ in {diff} pixels");
    }
    Ok(())
}

fn with_source(pipeline: Pipeline, path: &Path) -> Pipeline {
    pipeline.source(KernelSource::File(path.to_path_buf()))
}

/// Mirrors the argument metadata dump of the parsing demo.
fn greet(args: &GreetArgs) -> String {
    let cmd = Cli::command();
    let name_arg = cmd
        .find_subcommand("greet")
        .and_then(|c| c.get_arguments().find(|a| a.get_id() == "name"))
        .map(|a| {
            (
                a.get_short().map(String::from).unwrap_or_default(),
                a.get_long().unwrap_or_default().to_owned(),
                a.is_required_set(),
                // flags stop matching after `--`, positionals never do
                !a.is_positional(),
            )
        })
        .unwrap_or_default();
    let (short, long, required, ignorable) = name_arg;

    let mut out = String::new();
    out.push_str(&format!("name flag: {short}\n"));
    out.push_str(&format!("name name: {long}\n"));
    out.push_str(&format!("name required: {required}\n"));
    out.push_str("name set: true\n");
    out.push_str(&format!("name ignore: {ignorable}\n"));
    out.push_str(&format!("name toString: -{short} (--{long})\n"));
    match args.age {
        Some(age) => out.push_str(&format!("Age: {age}\n")),
        None => out.push_str("Age not set.\n"),
    }
    out.push_str("===============================\n");
    if args.reverse {
        let reversed: String = args.name.chars().rev().collect();
        out.push_str(&format!("My name (spelled backwards) is: {reversed}\n"));
    } else {
        out.push_str(&format!("My name is: {}\n", args.name));
    }
    out
}
