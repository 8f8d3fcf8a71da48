use anyhow::{Context, Result};
use chunkdrive::{
    catalog::SqliteCatalog,
    common::{ProgressThrottler, DEFAULT_THROTTLE_INTERVAL_MS},
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    drive::{GoogleDriveBackend, GoogleDriveOptions},
    logging,
    session::{DriveSession, TransferContext},
    transfer::{ChunkEvent, ChunkPlan, FileProgress, TransferObserver},
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "chunkdrive", version, about = "分片上传/下载云端文件")]
struct Cli {
    /// 配置文件路径
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// 用户名（默认取配置中的 default_username）
    #[arg(long, env = "CHUNKDRIVE_USER")]
    user: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// 上传本地文件
    Upload {
        file: PathBuf,
        /// 目标目录 ID（不填则放在顶层）
        #[arg(long)]
        dir: Option<String>,
    },
    /// 按文件 ID 下载到本地路径
    Download { file_id: String, dest: PathBuf },
    /// 创建目录
    Mkdir {
        name: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// 列出目录
    Dirs,
    /// 列出文件
    Files,
}

/// 把传输事件写到日志，文件进度按固定间隔节流
struct LogObserver {
    throttler: ProgressThrottler,
}

impl LogObserver {
    fn new() -> Self {
        Self {
            throttler: ProgressThrottler::with_millis(DEFAULT_THROTTLE_INTERVAL_MS),
        }
    }
}

impl TransferObserver for LogObserver {
    fn on_chunking_complete(&self, plan: &ChunkPlan) {
        info!(
            "分片规划完成: 大小={} bytes, 分片数={}",
            plan.total_size,
            plan.chunks.len()
        );
    }

    fn on_chunk_event(&self, event: &ChunkEvent) {
        match &event.error {
            Some(error) => warn!(
                "{:?} #{} ({}): {}",
                event.kind, event.chunk_index, event.chunk_id, error
            ),
            None => debug!("{:?} #{} ({})", event.kind, event.chunk_index, event.chunk_id),
        }
    }

    fn on_file_progress(&self, progress: &FileProgress) {
        let done = progress.transferred >= progress.total;
        let emit = if done {
            self.throttler.force_emit()
        } else {
            self.throttler.should_emit()
        };
        if emit {
            info!(
                "{:?}: {}% ({}/{} bytes, {} KB/s)",
                progress.direction,
                progress.percentage,
                progress.transferred,
                progress.total,
                progress.speed / 1024
            );
        }
    }
}

/// 加载日志配置
///
/// 配置文件不存在或解析失败时使用默认值，日志系统要在完整配置加载前就绪
async fn load_log_config(path: &str) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }
    LogConfig::default()
}

async fn build_session(config: &AppConfig, user: Option<String>) -> Result<DriveSession> {
    let backend = GoogleDriveBackend::new(GoogleDriveOptions {
        api_base_url: config.drive.api_base_url.clone(),
        upload_base_url: config.drive.upload_base_url.clone(),
        credentials: config.drive.credentials(),
        request_timeout: config.drive.request_timeout(),
    })
    .context("初始化云端客户端失败")?;

    let catalog = SqliteCatalog::open(&config.catalog.db_path)
        .with_context(|| format!("打开目录数据库失败: {:?}", config.catalog.db_path))?;

    let context = TransferContext::new(
        Arc::new(backend),
        config.transfer.clone(),
        config.drive.max_ids_per_request,
    );
    let username = user.unwrap_or_else(|| config.catalog.default_username.clone());

    Ok(DriveSession::new(
        username,
        Arc::new(catalog),
        context,
        config.drive.root_directory_name.clone(),
    )?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = load_log_config(&cli.config).await;
    let _log_guard = logging::init_logging(&log_config);

    let config = AppConfig::load_or_default(&cli.config).await;
    let session = build_session(&config, cli.user).await?;
    info!("会话就绪: user={}", session.username());

    // Ctrl+C 时停止派发新的分片，已开始的分片会跑完
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到 Ctrl+C，停止派发新的分片...");
            signal_token.cancel();
        }
    });

    match cli.cmd {
        Cmd::Upload { file, dir } => {
            let report = session
                .upload_file(&file, dir.as_deref(), Arc::new(LogObserver::new()), &cancel)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report.record)?);
            let failed = report.failed_chunks();
            if !failed.is_empty() {
                let indices: Vec<_> = failed.iter().map(|o| o.chunk.index).collect();
                anyhow::bail!("{} 个分片上传失败: {:?}", failed.len(), indices);
            }
        }
        Cmd::Download { file_id, dest } => {
            let report = session
                .download_file(&file_id, &dest, Arc::new(LogObserver::new()), &cancel)
                .await?;
            println!(
                "已下载 {} bytes 到 {:?}{}",
                report.bytes,
                report.path,
                if report.verified { "（已校验）" } else { "" }
            );
        }
        Cmd::Mkdir { name, parent } => {
            let id = session.create_directory(&name, parent.as_deref())?;
            println!("{}", id);
        }
        Cmd::Dirs => {
            for dir in session.list_directories()? {
                println!("{}\t{}", dir.id, dir.absolute_path);
            }
        }
        Cmd::Files => {
            for file in session.list_files()? {
                println!(
                    "{}\t{}\t{}",
                    file.record.id, file.record.size, file.absolute_path
                );
            }
        }
    }

    Ok(())
}
