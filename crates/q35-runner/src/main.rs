use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use q35_runner::{plan, query_version, rules, run, Settings};

#[derive(Debug, Clone, Args)]
struct SettingsArgs {
    /// File of KEY=VALUE build settings (one per line, `#` comments allowed).
    #[arg(long)]
    settings_file: Option<PathBuf>,

    /// Build settings, e.g. QEMU_DIR=/opt/qemu or BLD_*_SMM_ENABLED=FALSE.
    #[arg(value_name = "KEY=VALUE")]
    settings: Vec<String>,
}

impl SettingsArgs {
    fn load(&self) -> Result<Settings> {
        let base = match &self.settings_file {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };
        Ok(base.merge_pairs(&self.settings)?)
    }
}

#[derive(Debug, Parser)]
#[command(name = "q35-runner", version)]
#[command(about = "Boot a Q35 firmware build under QEMU")]
struct Cli {
    /// Log filter used when RUST_LOG is not set (tracing-subscriber EnvFilter syntax).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Launch QEMU and exit with its (normalized) exit code.
    Run(SettingsArgs),

    /// Print the QEMU command line without launching it.
    Plan(SettingsArgs),

    /// Print the version reported by the configured QEMU.
    QemuVersion(SettingsArgs),

    /// Write the SMBIOS 3.x identity blob for this build.
    SmbiosTable {
        /// Output file.
        #[arg(long, default_value = "smbios_3_9.bin")]
        output: PathBuf,

        #[command(flatten)]
        settings: SettingsArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            let settings = args.load()?;
            let code = run(&settings).context("failed to run QEMU")?;
            std::process::exit(code as i32);
        }
        Commands::Plan(args) => {
            let settings = args.load()?;
            let plan = plan(&settings)?;
            let program = plan
                .executable
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<no executable>".to_string());
            println!("{program} {}", plan.args);
            Ok(())
        }
        Commands::QemuVersion(args) => {
            let settings = args.load()?;
            let source = rules::ExecutableSource::resolve(&settings);
            match query_version(source.executable())? {
                Some(version) => println!("{version}"),
                None => println!("unavailable"),
            }
            Ok(())
        }
        Commands::SmbiosTable { output, settings } => {
            let settings = settings.load()?;
            let source = rules::ExecutableSource::resolve(&settings);
            let version = query_version(source.executable()).unwrap_or_else(|err| {
                tracing::warn!("{err}");
                None
            });
            let inputs = rules::smbios_inputs(
                &settings,
                version.as_ref(),
                rules::boot_selection_suffix(&settings),
            )?;

            let blob = q35_smbios::build_table(&inputs)?;
            std::fs::write(&output, &blob)
                .with_context(|| format!("write SMBIOS table to {}", output.display()))?;

            let structures = q35_smbios::parse_structures(&blob[q35_smbios::EPS_LENGTH..]);
            println!(
                "wrote {} ({} bytes, {} structures)",
                output.display(),
                blob.len(),
                structures.len()
            );
            Ok(())
        }
    }
}
