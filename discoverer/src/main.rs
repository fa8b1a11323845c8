//! Process entry point: parses configuration, builds the queue/result
//! store/proxy-group cache, wires a real ICMP driver behind stub SNMP/agent
//! drivers, spawns the worker pool and scheduler thread, and serves both
//! IPC endpoints plus `/metrics` until shutdown.

mod config;
mod ipc;
mod metrics_server;
mod persistence;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use discoverer_checks::{CompositeChecker, NullAgentDispatcher, NullSnmpEngine, Socket2IcmpDriver};
use discoverer_core::collab::{StaticConfigLookup, StaticRuleSource};
use discoverer_core::loadavg::LoadTracker;
use discoverer_core::proxy_group::ProxyGroupCache;
use discoverer_core::queue::Queue;
use discoverer_core::result_store::ResultStore;
use discoverer_core::scheduler::Scheduler;
use discoverer_core::worker::spawn_pool;
use tracing_utils::LoggingSettings;
use utils::shutdown::ShutdownToken;

use crate::config::Settings;
use crate::persistence::NullPersistenceSink;

fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;

    let _tracing_guard = tracing_utils::init_tracing(
        "discoverer",
        &LoggingSettings {
            json: settings.log_json,
            otlp_endpoint: settings.otlp_endpoint.clone(),
        },
    )?;
    let _panic_hook_guard = utils::logging::replace_panic_hook_with_tracing_panic_hook();

    tracing::info!(?settings, "starting discoverer");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime backing the ipc endpoints")?;
    runtime.block_on(run(settings))
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let core_config = settings.core_config();
    let queue = Arc::new(Queue::new(&core_config));
    let result_store = Arc::new(ResultStore::new());
    let load_tracker = Arc::new(LoadTracker::new(core_config.worker_count));
    let proxy_group_cache = Arc::new(ProxyGroupCache::new());
    let shutdown = ShutdownToken::new();

    let checker = Arc::new(
        CompositeChecker::new(
            Socket2IcmpDriver::new(std::process::id() as u16).context("failed to open raw icmp sockets")?,
            NullAgentDispatcher,
            NullSnmpEngine,
        )
        .context("failed to build the composite checker")?,
    );

    let worker_stop = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        let worker_stop = worker_stop.clone();
        std::thread::Builder::new()
            .name("discoverer-shutdown-bridge".to_owned())
            .spawn(move || {
                while !shutdown.is_fired() {
                    std::thread::sleep(Duration::from_millis(200));
                }
                worker_stop.store(true, Ordering::SeqCst);
            })
            .context("failed to spawn the shutdown bridge thread")?;
    }

    let worker_handles = spawn_pool(
        core_config.worker_count,
        queue.clone(),
        result_store.clone(),
        checker,
        load_tracker.clone(),
        worker_stop.clone(),
        core_config.job_tasks_inprogress_max,
    );

    let rule_source = Arc::new(StaticRuleSource::new(Vec::new(), Duration::from_secs(60)));
    let config_lookup = Arc::new(StaticConfigLookup::new(Duration::from_secs(5)));
    let persistence = Arc::new(NullPersistenceSink);

    let scheduler_queue = queue.clone();
    let scheduler_shutdown = shutdown.clone();
    let tick_delay = core_config.tick_delay;
    let scheduler_handle = {
        let queue = queue.clone();
        let result_store = result_store.clone();
        std::thread::Builder::new()
            .name("discoverer-scheduler".to_owned())
            .spawn(move || {
                let mut scheduler = Scheduler::new(queue, result_store, rule_source, config_lookup, persistence);
                while !scheduler_shutdown.is_fired() {
                    let more_results = scheduler.tick(SystemTime::now());
                    if !more_results {
                        scheduler_queue.wait(tick_delay);
                    }
                }
            })
            .context("failed to spawn the scheduler thread")?
    };

    let _metrics_handle = metrics_server::spawn(settings.metrics_addr).context("failed to start the metrics endpoint")?;

    let discoverer_ipc = tokio::spawn(ipc::serve_discoverer(
        settings.discoverer_socket_path.clone(),
        queue.clone(),
        load_tracker.clone(),
        shutdown.clone(),
    ));
    let proxy_group_ipc = tokio::spawn(ipc::serve_proxy_group(
        settings.proxygroup_socket_path.clone(),
        proxy_group_cache.clone(),
        shutdown.clone(),
    ));

    wait_for_signal(&shutdown).await;

    let _ = tokio::join!(discoverer_ipc, proxy_group_ipc);
    for handle in worker_handles {
        let _ = handle.join();
    }
    let _ = scheduler_handle.join();

    tracing::info!("discoverer shut down cleanly");
    Ok(())
}

async fn wait_for_signal(shutdown: &ShutdownToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.fire();
}
