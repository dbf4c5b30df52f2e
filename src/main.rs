use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use upload_core::config::load_config;
use upload_core::events::Toast;
use upload_core::logging::{init_logging, log_info, read_component_logs};
use upload_core::upload_queue::{UploadPayload, UploadRejected, UploadTask, Uploader};
use upload_core::{UploadCore, UploadCoreConfig, UploadCoreError};

const DEFAULT_BATCH_SIZE: usize = 6;
const RECENT_ACTIVITY: usize = 10;

/// Stand-in for the storage backend: slow-ish, flaky on every third photo, refuses `.bmp`
fn simulated_uploader(index: usize) -> impl Uploader {
    let calls = AtomicU32::new(0);

    move |payload: UploadPayload| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(150 + 75 * index as u64)).await;

            if payload.file_name.ends_with(".bmp") {
                return Err(anyhow::Error::new(UploadRejected(format!(
                    "{} is not a supported image format",
                    payload.file_name
                ))));
            }
            if index % 3 == 2 && call == 0 {
                anyhow::bail!("connection reset while uploading {}", payload.file_name);
            }

            Ok(json!({
                "url": format!("https://cdn.example.com/photos/{}", payload.file_name),
                "size": payload.file_size,
            }))
        }
    }
}

/// Every regular file in `dir`, sorted by name
fn photos_in(dir: &Path) -> Result<Vec<PathBuf>, UploadCoreError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

async fn run(core: &UploadCore, source: Option<&Path>) -> Result<(), UploadCoreError> {
    match source {
        Some(dir) => {
            let paths = photos_in(dir)?;
            log_info(
                "upload-core",
                &format!("Uploading {} photos from {}", paths.len(), dir.display()),
            )
            .unwrap_or_default();

            for (index, path) in paths.iter().enumerate() {
                // Unreadable or oversized files are reported and skipped
                let task_id = format!("task-{}", index + 1);
                if let Err(e) = core.enqueue_file(task_id, path, simulated_uploader(index)) {
                    eprintln!("Skipping {}: {}", path.display(), e);
                }
            }
        }
        None => {
            log_info(
                "upload-core",
                &format!("Uploading a simulated batch of {} photos", DEFAULT_BATCH_SIZE),
            )
            .unwrap_or_default();

            for index in 0..DEFAULT_BATCH_SIZE {
                let extension = if index == DEFAULT_BATCH_SIZE - 1 { "bmp" } else { "jpg" };
                let file_name = format!("photo-{:02}.{}", index + 1, extension);
                let payload = UploadPayload::new(file_name.clone(), vec![0u8; 1024 * (index + 1)])
                    .with_category("landscape");

                let task_id = format!("task-{}", index + 1);
                let task = UploadTask::new(task_id, payload, simulated_uploader(index));
                core.enqueue(task, file_name)?;
            }
        }
    }

    core.queue().wait_idle().await;

    // Let the last toasts drain before printing the summary
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("{}", serde_json::to_string_pretty(&core.snapshot())?);
    println!("{}", serde_json::to_string_pretty(&core.queue().items())?);
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let config = load_config().unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        UploadCoreConfig::default()
    });

    // Optional directory of photos; without it a simulated batch is used
    let source = std::env::args().nth(1).map(PathBuf::from);

    let core = UploadCore::new(config).with_toast_sink(Arc::new(|toast: Toast| {
        println!("[{:?}] {}: {}", toast.level, toast.title, toast.description);
    }));
    core.start();

    let result = run(&core, source.as_deref()).await;
    core.shutdown().await;

    match read_component_logs("upload-events", Some(RECENT_ACTIVITY)) {
        Ok(entries) => {
            println!("Recent activity:");
            for entry in entries {
                println!("  {} {}", entry.timestamp, entry.message);
            }
        }
        Err(e) => eprintln!("Failed to read activity log: {}", e),
    }

    if let Err(e) = result {
        eprintln!("Upload run failed: {}", e);
        std::process::exit(1);
    }
}
