//! `discoverctl`: a thin client for the two Unix-socket IPC endpoints a
//! running `discoverer` process exposes. One request per invocation,
//! matching the request/reply shape of both endpoints.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ipc_proto::discoverer::{DiscovererReply, DiscovererRequest};
use ipc_proto::proxy_group::{HostPgroupRelocation, ProxyGroupReply, ProxyGroupRequest};
use ipc_proto::{read_frame, write_frame};
use tokio::net::UnixStream;
use utils::id::{HostId, ProxyGroupId, ProxyId};

#[derive(Parser, Debug)]
#[command(version, about = "Control client for a running discoverer process")]
struct Cli {
    #[clap(long, default_value = "/tmp/discoverer.sock")]
    discoverer_socket: PathBuf,

    #[clap(long, default_value = "/tmp/discoverer-proxygroup.sock")]
    proxygroup_socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current pending-checks count.
    Queue,
    /// Print each worker's busy fraction over its trailing window.
    UsageStats,
    /// Ask the SNMP engine to reload its cache.
    SnmpCacheReload,
    /// Request a graceful shutdown of the discoverer process.
    Shutdown,
    /// Move a host from one proxy group to another.
    HostPgroupUpdate {
        hostid: u64,
        src_groupid: u64,
        dst_groupid: u64,
    },
    /// Fetch the sync payload a proxy would receive for a known revision.
    SyncData { proxyid: u64, known_revision: u64 },
    /// Print a proxy group's online/proxy counts, looked up by name.
    Stats { group_name: String },
    /// Record a proxy heartbeat at the given unix timestamp.
    Lastaccess { proxyid: u64, unixtime: u64 },
    /// Request a graceful shutdown of the proxy group manager.
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Queue => {
            let reply = call_discoverer(&cli.discoverer_socket, DiscovererRequest::Queue).await?;
            println!("{}", DiscovererReply::decode_queue_depth(&reply)?);
        }
        Command::UsageStats => {
            let reply = call_discoverer(&cli.discoverer_socket, DiscovererRequest::UsageStats).await?;
            for (i, fraction) in DiscovererReply::decode_usage_stats(&reply)?.into_iter().enumerate() {
                println!("worker {i}: {:.2}%", fraction * 100.0);
            }
        }
        Command::SnmpCacheReload => {
            call_discoverer(&cli.discoverer_socket, DiscovererRequest::SnmpCacheReload).await?;
        }
        Command::Shutdown => {
            call_discoverer(&cli.discoverer_socket, DiscovererRequest::Shutdown).await?;
        }
        Command::HostPgroupUpdate {
            hostid,
            src_groupid,
            dst_groupid,
        } => {
            call_proxy_group(
                &cli.proxygroup_socket,
                ProxyGroupRequest::HostPgroupUpdate(vec![HostPgroupRelocation {
                    hostid: HostId::new(hostid),
                    src_groupid: ProxyGroupId::new(src_groupid),
                    dst_groupid: ProxyGroupId::new(dst_groupid),
                }]),
            )
            .await?;
        }
        Command::SyncData { proxyid, known_revision } => {
            let reply = call_proxy_group(
                &cli.proxygroup_socket,
                ProxyGroupRequest::GetProxySyncData {
                    proxyid: ProxyId::new(proxyid),
                    known_revision,
                },
            )
            .await?;
            let data = ProxyGroupReply::decode_sync_data(&reply)?;
            println!("kind={:?} revision={} hosts={:?}", data.kind, data.revision, data.hostids);
        }
        Command::Stats { group_name } => {
            let reply = call_proxy_group(
                &cli.proxygroup_socket,
                ProxyGroupRequest::GetStats {
                    group_name: group_name.clone(),
                },
            )
            .await?;
            match ProxyGroupReply::decode_stats(&reply)? {
                Some(stats) => {
                    println!(
                        "{group_name} state={} online={} proxies={:?}",
                        stats.state, stats.online_num, stats.proxyids
                    );
                }
                None => println!("unknown proxy group {group_name}"),
            }
        }
        Command::Lastaccess { proxyid, unixtime } => {
            call_proxy_group(
                &cli.proxygroup_socket,
                ProxyGroupRequest::ProxyLastaccess {
                    proxyid: ProxyId::new(proxyid),
                    unixtime,
                },
            )
            .await?;
        }
        Command::Stop => {
            call_proxy_group(&cli.proxygroup_socket, ProxyGroupRequest::Stop).await?;
        }
    }

    Ok(())
}

async fn call_discoverer(socket: &PathBuf, request: DiscovererRequest) -> anyhow::Result<Vec<u8>> {
    let mut stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("failed to connect to {}", socket.display()))?;
    write_frame(&mut stream, &request.encode()).await?;
    read_frame(&mut stream).await.context("connection closed before a reply arrived")
}

async fn call_proxy_group(socket: &PathBuf, request: ProxyGroupRequest) -> anyhow::Result<Vec<u8>> {
    let mut stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("failed to connect to {}", socket.display()))?;
    write_frame(&mut stream, &request.encode()).await?;
    read_frame(&mut stream).await.context("connection closed before a reply arrived")
}
