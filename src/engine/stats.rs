// Process raw Docker stats API response into ContainerStats.

use crate::models::ContainerStats;
use bollard::models::ContainerStatsResponse;

/// Compute one ContainerStats sample from a raw response (needs both cpu and precpu).
pub(crate) fn process_statistics(s: &ContainerStatsResponse, id: &str) -> Option<ContainerStats> {
    let cpu_stats = s.cpu_stats.as_ref()?;
    let precpu_stats = s.precpu_stats.as_ref()?;

    let cpu_usage = cpu_stats.cpu_usage.as_ref()?;
    let precpu_usage = precpu_stats.cpu_usage.as_ref()?;

    let cpu_delta =
        cpu_usage.total_usage.unwrap_or(0) as i64 - precpu_usage.total_usage.unwrap_or(0) as i64;
    let system_delta = cpu_stats.system_cpu_usage.unwrap_or(0) as i64
        - precpu_stats.system_cpu_usage.unwrap_or(0) as i64;
    let online = cpu_stats.online_cpus.unwrap_or(1) as f64;
    let cpu_percentage = if system_delta > 0 && cpu_delta > 0 && online > 0.0 {
        (cpu_delta as f64 / system_delta as f64) * online * 100.0
    } else {
        0.0
    };

    let memory_usage_bytes = s.memory_stats.as_ref().and_then(|m| m.usage).unwrap_or(0);
    let memory_limit_bytes = s.memory_stats.as_ref().and_then(|m| m.limit).unwrap_or(0);
    let memory_percentage = if memory_limit_bytes > 0 {
        memory_usage_bytes as f64 / memory_limit_bytes as f64 * 100.0
    } else {
        0.0
    };

    let (network_rx_bytes, network_tx_bytes) =
        s.networks.as_ref().map_or((0u64, 0u64), |n| {
            n.values().fold((0u64, 0u64), |(rx, tx), v| {
                (rx + v.rx_bytes.unwrap_or(0), tx + v.tx_bytes.unwrap_or(0))
            })
        });

    let (block_read_bytes, block_write_bytes) = s
        .blkio_stats
        .as_ref()
        .and_then(|b| b.io_service_bytes_recursive.as_ref())
        .map_or((0u64, 0u64), |b| {
            let mut read = 0u64;
            let mut write = 0u64;
            for e in b {
                match e.op.as_deref() {
                    Some(op) if op.eq_ignore_ascii_case("read") => read += e.value.unwrap_or(0),
                    Some(op) if op.eq_ignore_ascii_case("write") => write += e.value.unwrap_or(0),
                    _ => {}
                }
            }
            (read, write)
        });

    let pids = s.pids_stats.as_ref().and_then(|p| p.current).unwrap_or(0);

    Some(ContainerStats {
        id: id.to_string(),
        cpu_percentage,
        memory_usage_bytes,
        memory_limit_bytes,
        memory_percentage,
        network_rx_bytes,
        network_tx_bytes,
        block_read_bytes,
        block_write_bytes,
        pids,
    })
}
