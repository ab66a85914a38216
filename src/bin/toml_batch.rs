use barcode_batch::config::{BatchSettings, TomlConfig};
use barcode_batch::core::ConfigProvider;
use barcode_batch::utils::error::{BatchError, ErrorSeverity};
use barcode_batch::utils::{logger, validation::Validate};
use barcode_batch::{
    BatchRunner, CancellationToken, LocalStorage, RunState, SymbolEncoder, TracingObserver,
};
use clap::Parser;

#[derive(Parser)]
#[command(name = "toml-batch")]
#[command(about = "Barcode batch generation driven by a TOML configuration file")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "batch-config.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Override monitoring setting from config
    #[arg(long)]
    monitor: Option<bool>,

    /// Override worker count from config
    #[arg(long)]
    workers: Option<usize>,

    /// Dry run - show the effective settings without generating images
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match TomlConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // --verbose 優先於設定檔的 log_level
    if args.verbose {
        logger::init_cli_logger(true);
    } else {
        logger::init_cli_logger_at(config.log_level().unwrap_or("info"));
    }

    tracing::info!("🚀 Starting TOML-based barcode batch");
    tracing::info!("📁 Configuration loaded from: {}", args.config);

    // 應用命令列覆蓋設定
    if let Some(workers) = args.workers {
        config.execution.workers = Some(workers);
        tracing::info!("🔧 Workers overridden to: {}", workers);
    }

    let settings = match config.validate().and_then(|_| config.settings()) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    tracing::info!("✅ Configuration loaded and validated successfully");
    display_settings(&settings, args.dry_run);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No images will be generated");
        return Ok(());
    }

    let monitor_enabled = args.monitor.unwrap_or(settings.monitor);
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Interrupt received, finishing records already in progress");
            interrupt.cancel();
        }
    });

    let runner = BatchRunner::new(SymbolEncoder::default(), LocalStorage::new())
        .with_options(settings.runner)
        .with_observer(TracingObserver::with_monitoring(monitor_enabled))
        .with_cancellation(cancel);

    let report = match runner.run(&settings.request()).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(
                "❌ Batch failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            let exit_code = match (&e, e.severity()) {
                (BatchError::Interrupted { .. }, _) => 2,
                (_, ErrorSeverity::Low) => 0,
                (_, ErrorSeverity::Medium) => 2,
                (_, ErrorSeverity::High) => 1,
                (_, ErrorSeverity::Critical) => 3,
            };
            std::process::exit(exit_code);
        }
    };

    println!("📊 {}", report.summary());
    if let Some(path) = &settings.report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)?;
        println!("📁 Report saved to: {}", path.display());
    }

    if report.state == RunState::Aborted || report.failed > 0 {
        std::process::exit(2);
    }

    Ok(())
}

fn display_settings(settings: &BatchSettings, dry_run: bool) {
    println!("📋 Configuration Summary:");
    println!(
        "  Source: {} ({})",
        settings.source.display_path(),
        settings.source.format
    );
    println!(
        "  CSV: delimiter {:?}, headers {}",
        settings.source.csv.delimiter as char, settings.source.csv.has_headers
    );
    println!("  Payload column: {}", settings.defaults.payload_column);
    match settings.defaults.symbology {
        Some(symbology) => println!("  Default symbology: {}", symbology.display_name()),
        None => println!("  Default symbology: (per record)"),
    }
    println!(
        "  Output: {} as {}",
        settings.destination_dir.display(),
        settings.defaults.output_format
    );
    println!("  Naming template: {}", settings.defaults.naming_template);
    println!("  Workers: {}", settings.runner.workers);
    println!(
        "  Timeouts: read {:?}, encode {:?}, write {:?}",
        settings.runner.timeouts.read, settings.runner.timeouts.encode, settings.runner.timeouts.write
    );
    println!("  On I/O failure: {:?}", settings.runner.io_failure_policy);

    if let Some(report) = &settings.report_path {
        println!("  Report: {}", report.display());
    }
    if dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}
