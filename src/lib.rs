pub use splat_cluster as cluster;
pub use splat_core as core;
pub use splat_io as io;

use std::sync::OnceLock;

static POOL: OnceLock<Result<(), String>> = OnceLock::new();

/// Install the global rayon pool shared by the readers, the chunk
/// encoders, and k-means assignment.
///
/// The first caller decides the size; later calls just return the stored
/// outcome. An explicit `num_threads` wins over the `SPLATKIT_CPU_THREADS`
/// environment variable, and with neither set rayon sizes the pool itself.
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    POOL.get_or_init(|| {
        let threads = match num_threads {
            Some(n) => Some(n),
            None => match std::env::var("SPLATKIT_CPU_THREADS") {
                Err(_) => None,
                Ok(raw) => match raw.parse::<usize>() {
                    Ok(n) if n > 0 => Some(n),
                    _ => {
                        return Err(format!(
                            "SPLATKIT_CPU_THREADS must be a positive integer, got '{raw}'"
                        ))
                    }
                },
            },
        };

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        builder.build_global().map_err(|e| e.to_string())
    })
    .clone()
}
