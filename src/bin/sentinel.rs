/// 门线卫兵 (Gate Sentinel)
///
/// 多路摄像头越线检测服务
///
/// 系统架构:
/// 1. 工作线程: 每个摄像头一个 (取帧 → 跟踪 → 越线判定 → 标注)
/// 2. 落库线程: 越线事件写入数据库
/// 3. 主线程:   读取控制命令 (状态 / 重载 / 停止 / 快照 / 事件)
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{info, warn};

use gate_sentinel::logging::init_logging;
use gate_sentinel::render::Annotator;
use gate_sentinel::storage::Storage;
use gate_sentinel::{
    gen_time_string, ControllableWorker, DefaultCollaborators, FrameBuffer, GateConfigStore,
    Manager, SentinelConfig, SqliteStorage, StorageSink, WorkerContext,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 门线卫兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "门线卫兵 - 越线检测服务", long_about = None)]
struct Args {
    /// 数据库文件 (摄像头 / 门线 / 事件)
    #[arg(long, default_value = "sentinel.db")]
    db: PathBuf,

    /// 配置文件, 不存在时写出默认配置
    #[arg(short, long, default_value = "sentinel.json")]
    config: PathBuf,

    /// 标注字体 (TTF/OTF), 覆盖配置
    #[arg(long)]
    font: Option<PathBuf>,

    /// 跟踪回放目录 (<camera_id>.jsonl), 覆盖配置
    #[arg(long)]
    replay_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SentinelConfig::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config.display()))?;
    if args.font.is_some() {
        config.font_path = args.font.clone();
    }
    if args.replay_dir.is_some() {
        config.replay_dir = args.replay_dir.clone();
    }

    init_logging(&config.log_level);
    info!("门线卫兵启动");
    config.log_summary();

    // ========== 协作方 ==========
    let storage = Arc::new(
        SqliteStorage::open(&args.db)
            .with_context(|| format!("打开数据库失败: {}", args.db.display()))?,
    );
    let sink = Arc::new(StorageSink::spawn(storage.clone(), config.sink.queue_capacity)?);
    let frame_buffer = Arc::new(FrameBuffer::new());

    let annotator = match &config.font_path {
        Some(path) => Annotator::from_font_file(path).unwrap_or_else(|e| {
            warn!(error = %e, "字体加载失败, 不绘制文字");
            Annotator::new()
        }),
        None => Annotator::new(),
    };
    info!(font = annotator.has_font(), "标注器就绪");

    let context = WorkerContext {
        store: Arc::new(GateConfigStore::new(
            storage.clone(),
            config.reference_width,
            config.reference_height,
        )),
        sink: sink.clone(),
        frame_buffer: frame_buffer.clone(),
        annotator: Arc::new(annotator),
        engine: config.engine.clone(),
        worker: config.worker.clone(),
    };

    let factory = Arc::new(DefaultCollaborators {
        reference_width: config.reference_width,
        reference_height: config.reference_height,
        playback_fps: config.worker.playback_fps,
        replay_dir: config.replay_dir.clone(),
        use_keypoints: config.engine.use_keypoints,
    });

    // ========== 启动工作线程 ==========
    let manager = Manager::new(storage.clone(), factory, context);
    manager.load_all_cameras()?;
    manager.start_all();
    info!("系统就绪, 输入 help 查看命令");

    // ========== 主线程: 控制命令 ==========
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => Ok(()),
            ["quit"] | ["exit"] => break,
            ["help"] => {
                print_help();
                Ok(())
            }
            ["status"] => print_status(&manager),
            ["reload", camera] => reload(&manager, camera),
            ["stop", camera] => parse_camera(camera).and_then(|id| Ok(manager.stop_worker(id)?)),
            ["start", camera] => parse_camera(camera).and_then(|id| Ok(manager.start_worker(id)?)),
            ["add", camera] => add_camera(&manager, &storage, camera),
            ["gate", action, camera, gate] => edit_gate(&manager, &storage, action, camera, gate),
            ["snapshot", camera, path] => snapshot(&frame_buffer, &config, camera, Some(path)),
            ["snapshot", camera] => snapshot(&frame_buffer, &config, camera, None),
            ["events"] => print_events(storage.as_ref(), "20"),
            ["events", limit] => print_events(storage.as_ref(), limit),
            _ => {
                warn!(command = %line, "未知命令");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "命令执行失败");
        }
    }

    // ========== 退出 ==========
    info!("正在停止工作线程...");
    manager.stop_all();
    manager.join_all();
    sink.shutdown();
    info!("门线卫兵已退出");
    Ok(())
}

fn print_help() {
    println!("命令:");
    println!("  status                     工作线程状态");
    println!("  reload <camera>            重新加载门线");
    println!("  start|stop <camera>        启动 / 停止工作线程");
    println!("  add <camera>               注册并启动数据库中新增的摄像头");
    println!("  gate enable|disable|delete <camera> <gate>  修改门线并重载");
    println!("  snapshot <camera> [path]   保存最新标注帧 (JPEG)");
    println!("  events [n]                 最近 n 条事件");
    println!("  quit                       退出");
}

fn parse_camera(raw: &str) -> anyhow::Result<i64> {
    raw.parse().with_context(|| format!("无效的摄像头ID: {raw}"))
}

fn print_status(manager: &Manager) -> anyhow::Result<()> {
    let status = manager.status();
    if status.is_empty() {
        println!("(没有摄像头)");
    }
    for s in status {
        println!(
            "camera {:>4} | {} | gates {:>2} | frames {:>8} | events {:>5}",
            s.camera_id,
            if s.running { "running" } else { "stopped" },
            s.gates,
            s.frames,
            s.events
        );
    }
    Ok(())
}

fn reload(manager: &Manager, camera: &str) -> anyhow::Result<()> {
    let camera_id = parse_camera(camera)?;
    let worker = manager
        .get_worker(camera_id)
        .with_context(|| format!("未找到摄像头: {camera_id}"))?;
    let count = worker.reload_gates()?;
    println!("camera {camera_id}: {count} gates");
    Ok(())
}

fn add_camera(manager: &Manager, storage: &SqliteStorage, camera: &str) -> anyhow::Result<()> {
    let camera_id = parse_camera(camera)?;
    let record = storage
        .camera(camera_id)?
        .with_context(|| format!("数据库中没有摄像头: {camera_id}"))?;
    let worker = manager.add_camera(&record)?;
    if !worker.is_running() {
        worker.start()?;
    }
    println!("camera {camera_id}: {} gates", worker.gates().len());
    Ok(())
}

fn edit_gate(
    manager: &Manager,
    storage: &SqliteStorage,
    action: &str,
    camera: &str,
    gate: &str,
) -> anyhow::Result<()> {
    let camera_id = parse_camera(camera)?;
    let gate_id: i64 = gate.parse().with_context(|| format!("无效的门线ID: {gate}"))?;
    match action {
        "enable" => storage.set_gate_enabled(gate_id, true)?,
        "disable" => storage.set_gate_enabled(gate_id, false)?,
        "delete" => storage.delete_gate(gate_id)?,
        other => bail!("未知的门线操作: {other}"),
    }
    let count = manager.reload_worker_gates(camera_id)?;
    println!("camera {camera_id}: {count} gates");
    Ok(())
}

fn snapshot(
    frame_buffer: &FrameBuffer,
    config: &SentinelConfig,
    camera: &str,
    path: Option<&&str>,
) -> anyhow::Result<()> {
    let camera_id = parse_camera(camera)?;
    let Some(jpeg) = frame_buffer.latest_jpeg(camera_id, config.worker.jpeg_quality)? else {
        bail!("摄像头 {camera_id} 还没有帧");
    };
    let path = match path {
        Some(p) => PathBuf::from(*p),
        None => PathBuf::from(format!("camera{camera_id}_{}.jpg", gen_time_string(""))),
    };
    std::fs::write(&path, jpeg).with_context(|| format!("写入失败: {}", path.display()))?;
    println!("已保存 {}", path.display());
    Ok(())
}

fn print_events(storage: &dyn Storage, limit: &str) -> anyhow::Result<()> {
    let limit: usize = limit.parse().with_context(|| format!("无效的数量: {limit}"))?;
    let mut out = io::stdout().lock();
    for event in storage.recent_events(limit)? {
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
    }
    Ok(())
}
