use anyhow::{Context, Result};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// コマンドラインの指定と環境変数`TRACKTIMER_LOG`からログレベルを決める。
///
/// コマンドラインの指定を優先し、どちらも無い場合は`Info`とする。
pub fn level_from_flags(verbose: bool, quiet: bool, env_level: Option<&str>) -> LevelFilter {
    if verbose {
        return LevelFilter::Debug;
    }
    if quiet {
        return LevelFilter::Warn;
    }
    env_level
        .and_then(|level| level.trim().parse().ok())
        .unwrap_or(LevelFilter::Info)
}

/// 標準エラー出力にログを出力するように設定する。
pub fn setup_logger(level: LevelFilter) -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::BrightBlack);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} {:5} [{}] {}",
                Local::now().format("%H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()
        .context("Failed to initialize logger")?;

    Ok(())
}
