use anyhow::Context;
use barcode_batch::core::ConfigProvider;
use barcode_batch::utils::error::{BatchError, ErrorSeverity};
use barcode_batch::utils::{logger, validation::Validate};
use barcode_batch::{
    BatchReport, BatchRunner, CancellationToken, CliConfig, LocalStorage, RunState, SymbolEncoder,
    TracingObserver,
};
use clap::Parser;
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("🚀 Starting barcode-batch CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
    let settings = match config.validate().and_then(|_| config.settings()) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    if settings.monitor {
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
        .with_observer(TracingObserver::with_monitoring(settings.monitor))
        .with_cancellation(cancel);

    match runner.run(&settings.request()).await {
        Ok(report) => {
            print_summary(&report);
            if let Some(path) = &settings.report_path {
                write_report(&report, path)?;
            }

            let exit_code = report_exit_code(&report);
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
        Err(e) => {
            tracing::error!(
                "❌ Batch failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            if let BatchError::Interrupted { partial, .. } = &e {
                print_summary(partial);
                if let Some(path) = &settings.report_path {
                    write_report(partial, path)?;
                }
            }

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            std::process::exit(error_exit_code(&e));
        }
    }

    Ok(())
}

fn print_summary(report: &BatchReport) {
    println!("📊 {}", report.summary());
    for failure in &report.failures {
        println!(
            "  ❌ #{} line {} [{:?}] {}",
            failure.job_id, failure.line, failure.status, failure.detail
        );
    }
    if let Some(reason) = &report.abort_reason {
        println!("  ⚠️ Aborted: {}", reason);
    }
}

fn write_report(report: &BatchReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("serializing batch report")?;
    std::fs::write(path, json)
        .with_context(|| format!("writing batch report to {}", path.display()))?;
    tracing::info!("📁 Report saved to: {}", path.display());
    Ok(())
}

/// 0 全部成功，2 部分失敗或中止
fn report_exit_code(report: &BatchReport) -> i32 {
    if report.state == RunState::Aborted || report.failed > 0 {
        2
    } else {
        0
    }
}

fn error_exit_code(error: &BatchError) -> i32 {
    if matches!(error, BatchError::Interrupted { .. }) {
        return 2;
    }

    match error.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}
