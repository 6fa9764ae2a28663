use std::sync::LazyLock;
use std::time::Duration;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::runtime::{Builder, Runtime};

use crate::background::pool::Concurrency;

/// Simultaneous `ffmpeg` frame extractions per sampling job.
pub const FRAME_EXTRACT_CONCURRENCY: Concurrency = Concurrency::Bounded(2);

/// Simultaneous uploads for the panorama pipeline.
pub const PANORAMA_UPLOAD_CONCURRENCY: Concurrency = Concurrency::Bounded(2);

/// Frame uploads are dispatched all at once.
pub const FRAME_UPLOAD_CONCURRENCY: Concurrency = Concurrency::Unbounded;

pub const MAX_TILE_SIZE: u32 = 512;

pub const FALLBACK_SIZE: u32 = 1024;

pub const JPEG_QUALITY: u8 = 95;

pub const TILE_EXTENSION: &str = "jpg";

pub const FACE_LETTERS: [&str; 6] = ["f", "b", "u", "d", "l", "r"];

/// Bytes inspected when guessing the type of an uploaded file.
pub const SNIFF_LEN: usize = 512;

/// Upper bound on how long a streamed archive stays on disk.
pub const ARCHIVE_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Timeout for fetching a remote video before sampling it.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub static CURRENT_NUM_THREADS: LazyLock<usize> = LazyLock::new(|| rayon::current_num_threads());

// Rocket-specific Tokio Runtime
// Handles network requests and the per-job background tasks they spawn.
pub static ROCKET_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(*CURRENT_NUM_THREADS)
        .thread_name("rocket-io-worker")
        .enable_all()
        .build()
        .expect("Failed to build Rocket Tokio runtime")
});

// Rayon thread pool for compute-intensive tasks
// Tile cropping and Lanczos resampling run here, one face per worker.
// It does not create a global Rayon pool, so it does not interfere with other threads.
pub static WORKER_RAYON_POOL: LazyLock<ThreadPool> = LazyLock::new(|| {
    ThreadPoolBuilder::new()
        .num_threads(*CURRENT_NUM_THREADS)
        .thread_name(|i| format!("cpu-intensive-worker-{}", i))
        .panic_handler(|_| log::error!("A job panicked on the worker pool"))
        .build()
        .expect("Failed to build Worker Rayon pool")
});

/// Runs `job` on [`WORKER_RAYON_POOL`] and awaits its result without blocking the runtime.
pub async fn spawn_cpu<F, T>(job: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    WORKER_RAYON_POOL.spawn(move || {
        let _ = tx.send(job());
    });
    rx.await
        .map_err(|_| anyhow::anyhow!("worker pool dropped the job before finishing"))?
}
