use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use bootvol::class::ClassRegistry;
use bootvol::{
    load_config, populator_from_config, resolver_from_config, Compression, Config, Error, Image,
    Role,
};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "bootvol", author, version, about = "Resolve bootable OCI images and stream them onto volumes")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, global = true, env = "BOOTVOL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the local blob cache directory
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve an image and print where each layer lives locally
    Resolve {
        /// Image reference, e.g. ghcr.io/acme/os:v1
        reference: String,
    },
    /// Resolve an image and stream one of its layers into a file or device
    Populate {
        reference: String,

        /// Destination file or block device
        #[arg(long, value_name = "PATH")]
        dest: PathBuf,

        /// Layer to write: rootfs, kernel or initrd
        #[arg(long, default_value = "rootfs", value_parser = parse_payload_role)]
        role: Role,

        /// Stage into a temporary file and rename over the destination
        #[arg(long)]
        atomic: bool,

        /// Skip the fsync after copying
        #[arg(long)]
        no_sync: bool,
    },
    /// Inspect storage classes
    Classes {
        #[command(subcommand)]
        command: ClassesCommand,
    },
}

#[derive(Subcommand)]
enum ClassesCommand {
    /// List every storage class
    List {
        /// Class list to read instead of the configured one
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Show one storage class
    Get {
        name: String,

        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

fn parse_payload_role(raw: &str) -> Result<Role, String> {
    let role: Role = raw.parse()?;
    if role.is_payload() {
        Ok(role)
    } else {
        Err(format!("'{}' is not a payload role, expected kernel, initrd or rootfs", raw))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    // Blocking pipeline raced against Ctrl-C.
    let command = cli.command;
    let work = tokio::task::spawn_blocking(move || run(command, &config));
    tokio::select! {
        joined = work => {
            joined?.map_err(|e| e as Box<dyn std::error::Error>)?;
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted; the destination may be partially written");
            std::process::exit(130);
        }
    }

    Ok(())
}

fn run(command: Command, config: &Config) -> CliResult {
    match command {
        Command::Resolve { reference } => cmd_resolve(&reference, config),
        Command::Populate {
            reference,
            dest,
            role,
            atomic,
            no_sync,
        } => cmd_populate(&reference, &dest, role, atomic, no_sync, config),
        Command::Classes { command } => match command {
            ClassesCommand::List { file } => cmd_classes_list(file.as_deref(), config),
            ClassesCommand::Get { name, file } => cmd_classes_get(&name, file.as_deref(), config),
        },
    }
}

fn cmd_resolve(reference: &str, config: &Config) -> CliResult {
    let started = Instant::now();
    let image = resolver_from_config(config)?.resolve(reference)?;
    print_image(&image);
    println!("resolved in {}", humantime::format_duration(millis(started.elapsed())));
    Ok(())
}

fn cmd_populate(
    reference: &str,
    dest: &Path,
    role: Role,
    atomic: bool,
    no_sync: bool,
    config: &Config,
) -> CliResult {
    let started = Instant::now();
    let image = resolver_from_config(config)?.resolve(reference)?;
    let layer = image.layer(role).ok_or_else(|| Error::RoleUnavailable {
        reference: reference.to_string(),
        role,
    })?;

    // Compressed layers expand by an unknown factor, so only raw ones get a
    // bounded bar.
    let bar = match layer.descriptor.compression {
        Compression::None => {
            let bar = ProgressBar::new(layer.descriptor.size);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                )?
                .progress_chars("#>-"),
            );
            bar
        }
        _ => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {bytes} written ({bytes_per_sec})",
            )?);
            bar
        }
    };

    let progress = bar.clone();
    let populator = populator_from_config(config)
        .sync(config.sync && !no_sync)
        .with_progress(move |n| progress.inc(n));

    let report = if atomic {
        populator.populate_file_atomic(layer, dest)
    } else {
        populator.populate_device(layer, dest)
    };
    bar.finish_and_clear();
    let report = report?;

    println!(
        "{} {} -> {}: {} ({} bytes) at {} in {}",
        role,
        layer.digest(),
        dest.display(),
        HumanBytes(report.bytes),
        report.bytes,
        report.rate,
        humantime::format_duration(millis(started.elapsed())),
    );
    Ok(())
}

fn cmd_classes_list(file: Option<&Path>, config: &Config) -> CliResult {
    let registry = load_classes(file, config)?;
    let mut classes: Vec<_> = registry.list().collect();
    classes.sort_by(|a, b| a.name.cmp(&b.name));

    if classes.is_empty() {
        println!("no storage classes defined");
        return Ok(());
    }
    for class in classes {
        match &class.description {
            Some(description) => println!("{:<20} {}", class.name, description),
            None => println!("{}", class.name),
        }
    }
    Ok(())
}

fn cmd_classes_get(name: &str, file: Option<&Path>, config: &Config) -> CliResult {
    let registry = load_classes(file, config)?;
    let Some(class) = registry.get(name) else {
        return Err(format!("no storage class named '{}'", name).into());
    };

    println!("name: {}", class.name);
    if let Some(description) = &class.description {
        println!("description: {}", description);
    }
    for (key, value) in &class.capabilities {
        println!("  {}: {}", key, value);
    }
    Ok(())
}

fn load_classes(file: Option<&Path>, config: &Config) -> CliResult<ClassRegistry> {
    let Some(path) = file.or(config.classes_file.as_deref()) else {
        return Err("no class list given: pass --file or set classes_file in the config".into());
    };
    Ok(ClassRegistry::load_file(path)?)
}

fn print_image(image: &Image) {
    println!("image: {}", image.reference());
    if let Some(created) = &image.config().created {
        println!("created: {}", created);
    }
    for layer in image.layers() {
        println!(
            "{:<7} {} {:>10} {}",
            layer.role().as_str(),
            layer.digest(),
            HumanBytes(layer.descriptor.size).to_string(),
            layer.path().display(),
        );
    }
}

fn millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}
