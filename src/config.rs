//! Startup configuration: `clap`-derived CLI args with environment-variable
//! fallbacks (§6 of SPEC_FULL.md), reduced to a validated `KernelConfig`.

use clap::Parser;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const MIN_TIMEOUT_MS: u64 = 500;
const DEFAULT_BATCH_MS: u64 = 25;
const MIN_BATCH_MS: u64 = 1;
const MAX_BATCH_MS: u64 = 250;
const DEFAULT_CANCEL_GRACE_MS: u64 = 100;
const DEFAULT_MAX_OUTPUT_BYTES: u64 = 1024 * 1024;
const DEFAULT_MAX_PAYLOAD_BYTES: u32 = 1024 * 1024;
const DEFAULT_SUBSCRIBER_HIGH_WATER_BYTES: u64 = 4 * 1024 * 1024;
const DEFAULT_REPLAY_BYTES: u64 = 64 * 1024;
const DEFAULT_SESSION_IDLE_MS: u64 = 30_000;
const DEFAULT_ACK_TIMEOUT_MS: u64 = 2_000;
const MIN_POOL_SIZE: usize = 1;
const MAX_POOL_SIZE: usize = 64;

/// Raw CLI/env surface. Mirrors spec.md §6's environment variables one-to-one.
#[derive(Debug, Parser)]
#[command(name = "nodebooks-kernel", about = "NodeBooks kernel execution core")]
pub struct KernelArgs {
    #[arg(long, env = "NODEBOOKS_KERNEL_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub kernel_timeout_ms: u64,

    #[arg(long, env = "NODEBOOKS_KERNEL_WS_HEARTBEAT_MS")]
    pub kernel_ws_heartbeat_ms: Option<u64>,

    #[arg(long, env = "NODEBOOKS_BATCH_MS", default_value_t = DEFAULT_BATCH_MS)]
    pub batch_ms: u64,

    #[arg(long, env = "NODEBOOKS_POOL_SIZE")]
    pub pool_size: Option<usize>,

    #[arg(long, env = "NODEBOOKS_WORKER_MEMORY_MB")]
    pub worker_memory_mb: Option<u64>,
}

/// Validated, clamped configuration actually consumed by the pool/session/ws layers.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub pool_size: usize,
    pub per_job_timeout_ms: u64,
    pub ws_heartbeat_ms: Option<u64>,
    pub batch_ms: u64,
    pub worker_memory_mb: Option<u64>,
    pub cancel_grace_ms: u64,
    pub ack_timeout_ms: u64,
    pub max_output_bytes: u64,
    pub max_payload_bytes: u32,
    pub subscriber_high_water_bytes: u64,
    pub replay_bytes: u64,
    pub session_idle_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus_or_default(),
            per_job_timeout_ms: DEFAULT_TIMEOUT_MS,
            ws_heartbeat_ms: None,
            batch_ms: DEFAULT_BATCH_MS,
            worker_memory_mb: None,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            subscriber_high_water_bytes: DEFAULT_SUBSCRIBER_HIGH_WATER_BYTES,
            replay_bytes: DEFAULT_REPLAY_BYTES,
            session_idle_ms: DEFAULT_SESSION_IDLE_MS,
        }
    }
}

impl From<KernelArgs> for KernelConfig {
    fn from(args: KernelArgs) -> Self {
        let mut cfg = KernelConfig::default();

        cfg.per_job_timeout_ms = args.kernel_timeout_ms.max(MIN_TIMEOUT_MS);
        cfg.ws_heartbeat_ms = args.kernel_ws_heartbeat_ms;
        cfg.batch_ms = args.batch_ms.clamp(MIN_BATCH_MS, MAX_BATCH_MS);
        cfg.worker_memory_mb = args.worker_memory_mb;

        if let Some(size) = args.pool_size {
            cfg.pool_size = size.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE);
        } else {
            cfg.pool_size = cfg.pool_size.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE);
        }

        cfg
    }
}

fn num_cpus_or_default() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_pool_size_to_max() {
        let args = KernelArgs {
            kernel_timeout_ms: DEFAULT_TIMEOUT_MS,
            kernel_ws_heartbeat_ms: None,
            batch_ms: DEFAULT_BATCH_MS,
            pool_size: Some(200),
            worker_memory_mb: None,
        };
        let cfg: KernelConfig = args.into();
        assert_eq!(cfg.pool_size, MAX_POOL_SIZE);
    }

    #[test]
    fn enforces_minimum_timeout() {
        let args = KernelArgs {
            kernel_timeout_ms: 10,
            kernel_ws_heartbeat_ms: None,
            batch_ms: DEFAULT_BATCH_MS,
            pool_size: None,
            worker_memory_mb: None,
        };
        let cfg: KernelConfig = args.into();
        assert_eq!(cfg.per_job_timeout_ms, MIN_TIMEOUT_MS);
    }

    #[test]
    fn clamps_batch_ms_range() {
        let args = KernelArgs {
            kernel_timeout_ms: DEFAULT_TIMEOUT_MS,
            kernel_ws_heartbeat_ms: None,
            batch_ms: 5_000,
            pool_size: None,
            worker_memory_mb: None,
        };
        let cfg: KernelConfig = args.into();
        assert_eq!(cfg.batch_ms, MAX_BATCH_MS);
    }
}
