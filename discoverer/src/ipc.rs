//! The two Unix-socket IPC listeners: Discoverer (queue depth, per-worker
//! usage, SNMP cache reload, shutdown) and ProxyGroupManager (relocations,
//! sync data, stats, heartbeats). Each runs as its own async task rather
//! than an OS thread — the listener's only job is awaiting socket I/O.

use std::sync::Arc;
use std::time::SystemTime;

use ipc_proto::discoverer::{DiscovererReply, DiscovererRequest};
use ipc_proto::proxy_group::{ProxyGroupReply, ProxyGroupRequest, ProxyGroupStats as WireProxyGroupStats, ProxySyncData as WireProxySyncData, SyncKind};
use ipc_proto::{read_frame, write_frame};
use tokio::net::{UnixListener, UnixStream};
use utils::shutdown::ShutdownToken;

use discoverer_core::loadavg::LoadTracker;
use discoverer_core::proxy_group::{ProxyGroupCache, SyncMode};
use discoverer_core::queue::Queue;

/// Binds a fresh listener, removing a stale socket file left behind by an
/// unclean shutdown first (binding over an existing one fails otherwise).
fn bind_unix_socket(path: &std::path::Path) -> anyhow::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(UnixListener::bind(path)?)
}

pub async fn serve_discoverer(
    path: std::path::PathBuf,
    queue: Arc<Queue>,
    load_tracker: Arc<LoadTracker>,
    shutdown: ShutdownToken,
) -> anyhow::Result<()> {
    let listener = bind_unix_socket(&path)?;
    tracing::info!(path = %path.display(), "discoverer ipc endpoint listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let queue = queue.clone();
                let load_tracker = load_tracker.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_discoverer_conn(stream, queue, load_tracker, shutdown).await {
                        tracing::warn!(error = %err, "discoverer ipc connection ended with an error");
                    }
                });
            }
        }
    }
}

async fn handle_discoverer_conn(
    mut stream: UnixStream,
    queue: Arc<Queue>,
    load_tracker: Arc<LoadTracker>,
    shutdown: ShutdownToken,
) -> anyhow::Result<()> {
    loop {
        let payload = match read_frame(&mut stream).await {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        let request = DiscovererRequest::decode(&payload)?;
        let reply = match request {
            DiscovererRequest::Queue => DiscovererReply::QueueDepth(queue.pending_checks_count()),
            DiscovererRequest::UsageStats => DiscovererReply::UsageStats(load_tracker.usage_fractions()),
            DiscovererRequest::SnmpCacheReload => {
                tracing::info!("snmp cache reload requested");
                DiscovererReply::Ack
            }
            DiscovererRequest::Shutdown => {
                tracing::info!("shutdown requested over discoverer ipc endpoint");
                shutdown.fire();
                DiscovererReply::Ack
            }
        };
        write_frame(&mut stream, &reply.encode()).await?;
    }
}

pub async fn serve_proxy_group(
    path: std::path::PathBuf,
    cache: Arc<ProxyGroupCache>,
    shutdown: ShutdownToken,
) -> anyhow::Result<()> {
    let listener = bind_unix_socket(&path)?;
    tracing::info!(path = %path.display(), "proxy group ipc endpoint listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let cache = cache.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_proxy_group_conn(stream, cache, shutdown).await {
                        tracing::warn!(error = %err, "proxy group ipc connection ended with an error");
                    }
                });
            }
        }
    }
}

async fn handle_proxy_group_conn(mut stream: UnixStream, cache: Arc<ProxyGroupCache>, shutdown: ShutdownToken) -> anyhow::Result<()> {
    loop {
        let payload = match read_frame(&mut stream).await {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        let request = ProxyGroupRequest::decode(&payload)?;
        let reply = match request {
            ProxyGroupRequest::HostPgroupUpdate(relocations) => {
                let batch = relocations.into_iter().map(|r| (r.hostid, r.src_groupid, r.dst_groupid)).collect();
                cache.update_host_pgroup(batch);
                cache.cache_update_groups();
                ProxyGroupReply::Ack
            }
            ProxyGroupRequest::GetProxySyncData { proxyid, known_revision } => {
                let data = cache.get_proxy_sync_data(proxyid, known_revision, SystemTime::now());
                ProxyGroupReply::SyncData(WireProxySyncData {
                    kind: match data.mode {
                        SyncMode::None => SyncKind::None,
                        SyncMode::Full => SyncKind::Full,
                        SyncMode::Partial => SyncKind::Partial,
                    },
                    revision: data.revision,
                    hostids: data.deleted_hostids,
                })
            }
            ProxyGroupRequest::GetStats { group_name } => match cache.get_proxy_group_stats_by_name(&group_name) {
                Some(stats) => ProxyGroupReply::Stats(Some(WireProxyGroupStats {
                    state: stats.state as i32,
                    online_num: stats.online_count as i32,
                    proxyids: stats.proxy_ids,
                })),
                None => {
                    tracing::debug!(group_name, "get_stats: unknown proxy group");
                    ProxyGroupReply::Stats(None)
                }
            },
            ProxyGroupRequest::ProxyLastaccess { proxyid, unixtime } => {
                let ts = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(unixtime);
                cache.update_proxy_lastaccess(proxyid, ts);
                ProxyGroupReply::Ack
            }
            ProxyGroupRequest::Stop => {
                tracing::info!("shutdown requested over proxy group ipc endpoint");
                shutdown.fire();
                ProxyGroupReply::Ack
            }
        };
        write_frame(&mut stream, &reply.encode()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discoverer_core::config::Config;
    use ipc_proto::{read_frame, write_frame};

    /// Builds a throwaway socket path under the test's temp dir; avoids a
    /// `tempfile` dependency for one helper used by this test.
    fn socket_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("discoverer-ipc-test-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn discoverer_endpoint_answers_queue_depth() {
        let path = socket_path("queue");
        let queue = Arc::new(Queue::new(&Config::default()));
        queue.add_pending(7);
        let load_tracker = Arc::new(LoadTracker::new(1));
        let shutdown = ShutdownToken::new();

        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(serve_discoverer(path.clone(), queue, load_tracker, server_shutdown));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = UnixStream::connect(&path).await.unwrap();
        write_frame(&mut client, &DiscovererRequest::Queue.encode()).await.unwrap();
        let reply = read_frame(&mut client).await.unwrap();
        assert_eq!(DiscovererReply::decode_queue_depth(&reply).unwrap(), 7);

        shutdown.fire();
        let _ = server.await;
        let _ = std::fs::remove_file(&path);
    }
}
