use anyhow::{Context, Result};
use clap::Parser;
/// 批量姿态估计 + 追踪 + CSV导出
///
/// 主程序入口 - 直接运行: cargo run --bin posetrack --release -- <video_dir> -n 2 -t
use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use posetrack_rs::input::{FfmpegTranscoder, FfmpegVideoSource};
use posetrack_rs::{Args, PredictionPipeline, ResultFlattener, YoloPosePredictor};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let layout = args.layout();

    info!("📹 视频目录: {}", args.video_dir.display());
    info!("📦 输出目录: {}", layout.root.display());
    info!("🐾 动物数量: {} | 追踪: {}", args.number_of_animals, args.tracking);

    let tracker_config = args.tracker_config();
    if args.tracking {
        tracker_config.print_summary();
    }

    let predictor = YoloPosePredictor::new(args.model_config())
        .with_context(|| format!("加载模型失败: {}", args.model.display()))?;

    let mut pipeline = PredictionPipeline::new(
        args.video_dir.clone(),
        layout.clone(),
        Box::new(FfmpegVideoSource::new()),
        Box::new(predictor),
        Box::new(FfmpegTranscoder::default()),
        Box::new(tracker_config),
    )
    .with_reset_policy(args.reset);

    let summary = pipeline
        .predict(args.number_of_animals, args.tracking)
        .context("预测失败")?;
    for skipped in &summary.skipped {
        info!("⏭️ 已跳过 {}: {}", skipped.video.display(), skipped.reason);
    }

    let written = ResultFlattener::new()
        .with_node_scores(args.node_scores)
        .convert_directory(&layout.flatten_source(args.tracking), &layout.csv_dir())
        .context("CSV转换失败")?;

    info!(
        "✅ 完成 (开始于 {}): {} 个预测结果, {} 个CSV文件",
        summary.started_at,
        summary.artifacts.len(),
        written.len()
    );
    Ok(())
}
