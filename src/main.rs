use actix::prelude::*;
use anyhow::Context as _;
use clap::Parser;
use std::io::IsTerminal;
use std::time::Instant;

use mediafetch::cli;
use mediafetch::core::task::ShutdownSignal;
use mediafetch::core::{Acquire, AcquisitionActor, AssetDescriptor, MediaCoordinator};
use mediafetch::ui::{self, AcquireSummary, ProgressManager};
use mediafetch::utils::logger::init_logging;
use mediafetch::utils::validator::validate_config;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    // -e: 打开配置文件后退出
    if args.edit_config {
        mediafetch::config::Config::load(&args.config).context("无法创建配置文件")?;
        cli::open_config_in_editor(&args.config);
        return Ok(());
    }

    let config = args.load_config().context("参数解析失败")?;
    validate_config(&config)?;
    if let Err(e) = init_logging(&config) {
        eprintln!("日志初始化失败: {}", e);
    }
    log::info!("程序启动");

    let urls = args.get_urls().context("获取URL列表失败")?;
    log::info!("解析到的URLs: {:?}", urls);
    log::info!("配置文件路径: {}", args.config);
    log::info!("{}", config.get_summary());
    println!("{}", config.get_summary());

    // Ctrl-C: 当前数据块结束后停止，已写入的数据保留在 .incomplete 文件中
    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    actix_rt::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("收到中断信号，正在停止");
            signal.trigger();
        }
    });

    let progress = if std::io::stderr().is_terminal() {
        ProgressManager::new()
    } else {
        ProgressManager::hidden()
    };
    let coordinator =
        MediaCoordinator::from_config(&config, Box::new(progress.clone()), shutdown.clone())?;
    let actor = AcquisitionActor::new(coordinator).start();

    let started = Instant::now();
    let mut summary = AcquireSummary {
        total_assets: urls.len(),
        total_size: 0,
        elapsed_time: Default::default(),
        success_count: 0,
        failed_count: 0,
    };

    for url in &urls {
        if shutdown.is_triggered() {
            summary.failed_count += 1;
            ui::print_error(&format!("{}: 已取消", url));
            continue;
        }
        let result = actor
            .send(Acquire {
                descriptor: AssetDescriptor::new(url.as_str()),
                size_hint: args.size_hint,
            })
            .await
            .context("获取 actor 已停止")?;
        progress.finish_all();

        match result {
            Ok(path) => {
                summary.success_count += 1;
                summary.total_size += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                log::info!("获取成功: {} -> {:?}", url, path);
                ui::print_success(&format!("{} -> {}", url, path.display()));
            }
            Err(e) => {
                summary.failed_count += 1;
                log::error!("获取失败: {} - {}", url, e);
                ui::print_error(&format!("{}: {}", url, e));
            }
        }
    }

    summary.elapsed_time = started.elapsed();
    println!("{}", summary);
    log::info!(
        "获取完成 - 成功: {}, 失败: {}",
        summary.success_count,
        summary.failed_count
    );

    if summary.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
