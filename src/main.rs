use std::time::Duration;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use lab_core::{init_logging, AppConfig};
use tokio::signal;
use tracing::{info, warn};

use lab_assistant::{Application, ExperimentPlan, ShutdownManager, ShutdownSignal};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("lab-assistant")
        .version("1.0.0")
        .about("实验批量调度与执行引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/lab.toml 与 lab.toml"),
        )
        .arg(
            Arg::new("experiments")
                .short('n')
                .long("experiments")
                .value_name("COUNT")
                .help("合成实验数量")
                .value_parser(value_parser!(usize))
                .default_value("10"),
        )
        .arg(
            Arg::new("duration-ms")
                .long("duration-ms")
                .value_name("MILLIS")
                .help("每个实验的耗时（毫秒）")
                .value_parser(value_parser!(u64))
                .default_value("100"),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .value_name("MILLIS")
                .help("每个实验的超时（毫秒），0 表示不限")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("strategy")
                .short('s')
                .long("strategy")
                .value_name("STRATEGY")
                .help("调度策略")
                .value_parser(["identity", "subsample", "shuffle", "random_decimate"]),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("COUNT")
                .help("并发工作者数量，大于1时使用固定大小工作池")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .help("随机策略的种子")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置文件失败: {}", config_path.unwrap_or("<默认>")))?;
    apply_overrides(&mut config, &matches);

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    info!("启动实验助手");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let plan = ExperimentPlan {
        count: matches.get_one::<usize>("experiments").copied().unwrap_or(10),
        duration: Duration::from_millis(
            matches.get_one::<u64>("duration-ms").copied().unwrap_or(100),
        ),
        timeout: Duration::from_millis(matches.get_one::<u64>("timeout-ms").copied().unwrap_or(0)),
    };

    let app = Application::new(&config, plan)?;
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;

    let signal_manager = shutdown_manager.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("收到关闭信号，立即停止运行批次");
        signal_manager.shutdown(ShutdownSignal::Immediate).await;
    });

    let summary = app.run(shutdown_rx).await?;
    let report = serde_json::to_string_pretty(&summary).context("序列化运行摘要失败")?;
    println!("{report}");

    info!("实验助手已退出");
    Ok(())
}

/// 命令行参数覆盖配置文件
fn apply_overrides(config: &mut AppConfig, matches: &ArgMatches) {
    if let Some(strategy) = matches.get_one::<String>("strategy") {
        config.scheduler.strategy = strategy.clone();
    }
    if let Some(&workers) = matches.get_one::<usize>("workers") {
        config.assistant.pool = if workers > 1 { "fixed" } else { "single" }.to_string();
        config.assistant.workers = workers;
    }
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config.scheduler.seed = Some(seed);
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
