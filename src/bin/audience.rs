// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 受众分析回放 (Audience Replay)
///
/// 用脚本网关回放一段预设场景, 走完整检测循环:
/// 检测 → 跟踪 → 采集会话 → 广告排序
///
/// 运行: cargo run --bin audience -- --scenario scenario.json
use anyhow::{Context, Result};
use audience_rs::detection::gateway::{ScriptedCycle, ScriptedGateway};
use audience_rs::detection::types::Frame;
use audience_rs::pipeline::{FrameSource, StaticFrameSource};
use audience_rs::{
    gen_time_string, AdQueue, AudienceConfig, DetectionLoop, DetectionMode, DetectorTier, SourceKind,
    Spot,
};
use clap::Parser;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 受众分析回放参数
#[derive(Parser, Debug)]
#[command(author, version, about = "受众分析 + 广告排序回放", long_about = None)]
struct Args {
    /// 场景脚本 (JSON)
    #[arg(short, long)]
    scenario: PathBuf,

    /// 配置文件, 不存在时写入默认配置
    #[arg(short, long)]
    config: Option<String>,

    /// 检测模式, 覆盖配置文件
    #[arg(short, long, value_enum)]
    mode: Option<DetectionMode>,

    /// 检测器档位, 覆盖配置文件
    #[arg(long, value_enum)]
    tier: Option<DetectorTier>,

    /// 启用增强救援轮次
    #[arg(long)]
    rescue: bool,

    /// 整个周期的超时(毫秒)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// 帧来源类型, 覆盖场景脚本
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// 节目单 (JSON), 覆盖场景脚本中的节目单
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// 会话汇总归档目录
    #[arg(long)]
    archive: Option<PathBuf>,

    /// 给脚本人脸加入的位置抖动(像素)
    #[arg(long, default_value_t = 0.0)]
    jitter: f32,

    /// 抖动随机种子
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

/// 场景脚本
#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
    #[serde(default)]
    source: SourceKind,
    cycles: Vec<ScriptedCycle>,
    #[serde(default)]
    catalog: Vec<Spot>,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

/// 模拟检测器的框抖动
fn apply_jitter(cycles: &mut [ScriptedCycle], jitter: f32, seed: u64) {
    if jitter <= 0.0 {
        return;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    for face in cycles.iter_mut().flat_map(|c| c.faces.iter_mut()) {
        let dx = rng.gen_range(-jitter..=jitter);
        let dy = rng.gen_range(-jitter..=jitter);
        face.face = face.face.translated(dx, dy);
        face.face.x = face.face.x.max(0.0);
        face.face.y = face.face.y.max(0.0);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // 1. 配置
    let mut config = match &args.config {
        Some(path) => AudienceConfig::load_or_default(path),
        None => AudienceConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(tier) = args.tier {
        config.detector_tier = tier;
    }
    if args.rescue {
        config.enable_enhanced_rescue = true;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.cycle_timeout_ms = timeout_ms;
    }
    let config = config.sanitized();
    config.print_summary();

    // 2. 场景
    let json = fs::read_to_string(&args.scenario)
        .with_context(|| format!("读取场景失败: {}", args.scenario.display()))?;
    let mut scenario: Scenario = serde_json::from_str(&json).context("场景脚本格式错误")?;
    apply_jitter(&mut scenario.cycles, args.jitter, args.seed);
    let source_kind = args.source.unwrap_or(scenario.source);

    let catalog = match &args.catalog {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("读取节目单失败: {}", path.display()))?;
            serde_json::from_str::<Vec<Spot>>(&json).context("节目单格式错误")?
        }
        None => scenario.catalog,
    };
    info!(
        "📦 场景: {}个周期 | 帧 {}x{} | 来源 {:?} | 节目单 {}个",
        scenario.cycles.len(),
        scenario.width,
        scenario.height,
        source_kind,
        catalog.len()
    );

    // 3. 检测循环
    let source = StaticFrameSource::new(
        Frame::new(RgbImage::from_pixel(scenario.width, scenario.height, Rgb([128, 128, 128]))),
        source_kind,
    );
    let gateway = Arc::new(ScriptedGateway::new(scenario.cycles, scenario.width));
    let mut detection_loop = DetectionLoop::new(config, gateway.clone(), source.kind());

    detection_loop.open_session();
    for _ in 0..gateway.len() {
        let Some(frame) = source.current_frame() else {
            break;
        };
        let snapshot = detection_loop.run_cycle(frame);
        println!("{}", serde_json::to_string(snapshot.as_ref())?);
        gateway.advance();
    }

    // 4. 会话汇总
    let summary = detection_loop
        .close_session()
        .context("采集会话未开启")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(dir) = &args.archive {
        fs::create_dir_all(dir).with_context(|| format!("创建归档目录失败: {}", dir.display()))?;
        let path = dir.join(format!("session_{}.json", gen_time_string("")));
        fs::write(&path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("写入归档失败: {}", path.display()))?;
        info!("💾 会话汇总已归档到 {}", path.display());
    }

    // 5. 广告排序
    let queue = AdQueue::new(catalog);
    let order = queue.reorder(&summary.demographics);
    println!("{}", serde_json::to_string_pretty(&order)?);
    if let Some(top) = order.queue.first() {
        info!("📺 下一个片段: {} (得分 {})", top.spot.id, top.score);
    }

    Ok(())
}
