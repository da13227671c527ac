//! Integration tests for collection
//!
//! These tests drive discovery, per-target collection and full cycles
//! against a mock runtime, fake `/proc` trees and local HTTP servers
//! standing in for metrics endpoints.

#[cfg(test)]
mod support {
    use crate::collector::{
        async_trait, ContainerDetails, ContainerRuntime, ResourceUsage, RuntimeContainer,
    };
    use crate::error::{CollectError, Result};
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    pub const METRICS_BODY: &str = "\
# HELP conduit_connected_clients Connected clients
# TYPE conduit_connected_clients gauge
conduit_connected_clients 12
conduit_connecting_clients 3
conduit_is_live 1
conduit_bytes_uploaded 1000
conduit_bytes_downloaded 4000
conduit_uptime_seconds 600
conduit_max_clients 200
conduit_bandwidth_limit_bytes_per_second 1250000
";

    pub fn container(id: &str, name: &str, state: &str) -> RuntimeContainer {
        RuntimeContainer {
            id: id.to_string(),
            name: name.to_string(),
            state: state.to_string(),
            created: chrono::Utc::now().timestamp() - 90,
        }
    }

    /// In-memory runtime
    #[derive(Default)]
    pub struct MockRuntime {
        pub by_image: Vec<RuntimeContainer>,
        pub by_name: Vec<RuntimeContainer>,
        pub details: HashMap<String, ContainerDetails>,
        pub usage: HashMap<String, ResourceUsage>,
        pub logs: HashMap<String, Vec<String>>,
        pub fail_list: bool,
    }

    impl MockRuntime {
        /// A running target reachable on loopback
        pub fn with_target(mut self, id: &str, name: &str) -> Self {
            self.by_image.push(container(id, name, "running"));
            self.details.insert(
                id.to_string(),
                ContainerDetails {
                    ip: Some("127.0.0.1".to_string()),
                    auto_start: true,
                    ..Default::default()
                },
            );
            self.usage.insert(
                id.to_string(),
                ResourceUsage {
                    cpu_total: 300,
                    precpu_total: 100,
                    system_total: 2_000,
                    presystem_total: 1_000,
                    online_cpus: 2,
                    percpu_count: 0,
                    memory_usage: 64 * 1024 * 1024,
                },
            );
            self
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn list_by_image(&self, _image: &str) -> Result<Vec<RuntimeContainer>> {
            if self.fail_list {
                return Err(CollectError::Missing("daemon unreachable".to_string()));
            }
            Ok(self.by_image.clone())
        }

        async fn list_by_name(&self, _name: &str) -> Result<Vec<RuntimeContainer>> {
            if self.fail_list {
                return Err(CollectError::Missing("daemon unreachable".to_string()));
            }
            Ok(self.by_name.clone())
        }

        async fn inspect(&self, id: &str) -> Result<ContainerDetails> {
            self.details
                .get(id)
                .cloned()
                .ok_or_else(|| CollectError::Missing(format!("no such container {id}")))
        }

        async fn stats(&self, id: &str) -> Result<ResourceUsage> {
            self.usage
                .get(id)
                .copied()
                .ok_or_else(|| CollectError::Missing(format!("no stats for {id}")))
        }

        async fn tail_logs(&self, id: &str, _tail: usize) -> Result<Vec<String>> {
            Ok(self.logs.get(id).cloned().unwrap_or_default())
        }
    }

    /// Serve `body` on `path` after `delay`; returns the bound address
    pub async fn serve(path: &'static str, body: &'static str, delay: Duration) -> SocketAddr {
        let app = Router::new().route(
            path,
            get(move || async move {
                tokio::time::sleep(delay).await;
                body
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// A port nothing listens on
    pub async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }
}

#[cfg(test)]
mod discovery_tests {
    use super::support::{container, MockRuntime};
    use crate::collector::{discover_targets, DiscoveryFilter};

    fn filter() -> DiscoveryFilter {
        DiscoveryFilter {
            self_hostname: Some("5e1f00000000".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_union_is_deduplicated_and_sorted() {
        let runtime = MockRuntime {
            by_image: vec![
                container("bbbb", "conduit-2", "running"),
                container("aaaa", "relay-from-image", "running"),
            ],
            by_name: vec![
                container("bbbb", "conduit-2", "running"),
                container("cccc", "conduit-1", "exited"),
            ],
            ..Default::default()
        };

        let targets = discover_targets(&runtime, &filter()).await.unwrap();
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["conduit-1", "conduit-2", "relay-from-image"]);
    }

    #[tokio::test]
    async fn test_name_query_requires_prefix() {
        // The runtime's name filter matches substrings
        let runtime = MockRuntime {
            by_name: vec![
                container("aaaa", "conduit-1", "running"),
                container("bbbb", "my-conduit", "running"),
            ],
            ..Default::default()
        };

        let targets = discover_targets(&runtime, &filter()).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "conduit-1");
    }

    #[tokio::test]
    async fn test_self_excluded_by_reserved_name_and_hostname() {
        let runtime = MockRuntime {
            by_image: vec![
                container("aaaa", "conduit-expose", "running"),
                container("5e1f00000000ffff", "sidecar", "running"),
                container("bbbb", "conduit-1", "running"),
            ],
            by_name: vec![container("aaaa", "conduit-expose", "running")],
            ..Default::default()
        };

        let targets = discover_targets(&runtime, &filter()).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "conduit-1");
    }

    #[tokio::test]
    async fn test_list_failure_is_an_error() {
        let runtime = MockRuntime {
            fail_list: true,
            ..Default::default()
        };
        assert!(discover_targets(&runtime, &filter()).await.is_err());
    }
}

#[cfg(test)]
mod target_tests {
    use super::support::{closed_port, container, serve, MockRuntime, METRICS_BODY};
    use crate::collector::{ContainerDetails, TargetCollector, Timeouts};
    use crate::geoip::CountryLookup;
    use crate::models::TargetStatus;
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct EveryoneIsFrench;

    impl CountryLookup for EveryoneIsFrench {
        fn lookup(&self, _ip: IpAddr) -> String {
            "FR".to_string()
        }
    }

    fn collector(runtime: MockRuntime, proc_root: &std::path::Path, port: u16) -> TargetCollector {
        TargetCollector::new(
            Arc::new(runtime),
            proc_root,
            port,
            "/metrics",
            Timeouts {
                runtime: Duration::from_secs(2),
                metrics: Duration::from_millis(300),
                files: Duration::from_secs(2),
            },
        )
    }

    #[tokio::test]
    async fn test_collect_running_target() {
        let addr = serve("/metrics", METRICS_BODY, Duration::ZERO).await;
        let temp = TempDir::new().unwrap();
        let runtime = MockRuntime::default().with_target("0123456789abcdef", "conduit-1");
        let target = runtime.by_image[0].clone();

        let sample = collector(runtime, temp.path(), addr.port())
            .collect(target, &CancellationToken::new())
            .await;

        let info = sample.info;
        assert_eq!(info.id, "0123456789ab");
        assert_eq!(info.status, TargetStatus::Running);
        assert_eq!(info.cpu_percent, 40.0);
        assert_eq!(info.memory_mb, 64.0);
        assert!(info.uptime.starts_with("1m3"));

        let app = info.app_metrics.unwrap();
        assert_eq!(app.connected_clients, 12);
        assert_eq!(app.connecting_clients, 3);
        assert!(app.is_live);

        let settings = info.settings.unwrap();
        assert_eq!(settings.max_clients, 200);
        assert_eq!(settings.bandwidth_limit_mbps, 10.0);
        assert!(settings.auto_start);
    }

    #[tokio::test]
    async fn test_metrics_timeout_leaves_only_app_metrics_empty() {
        let addr = serve("/metrics", METRICS_BODY, Duration::from_secs(5)).await;
        let temp = TempDir::new().unwrap();
        let runtime = MockRuntime::default().with_target("aaaa", "conduit-1");
        let target = runtime.by_image[0].clone();

        let sample = collector(runtime, temp.path(), addr.port())
            .collect(target, &CancellationToken::new())
            .await;

        assert_eq!(sample.info.status, TargetStatus::Running);
        assert!(sample.info.app_metrics.is_none());
        assert!(sample.info.settings.is_none());
        assert_eq!(sample.info.cpu_percent, 40.0);
        assert!(sample.info.health.is_some());

        let json = serde_json::to_value(&sample.info).unwrap();
        assert!(json["app_metrics"].is_null());
    }

    #[tokio::test]
    async fn test_stopped_target_is_down() {
        let temp = TempDir::new().unwrap();
        let runtime = MockRuntime::default();
        let target = container("aaaa", "conduit-1", "exited");

        let sample = collector(runtime, temp.path(), closed_port().await)
            .collect(target, &CancellationToken::new())
            .await;

        assert_eq!(sample.info.status, TargetStatus::Down);
        assert!(sample.info.health.is_none());
        assert!(sample.info.app_metrics.is_none());
    }

    #[tokio::test]
    async fn test_stats_failure_marks_unhealthy_and_continues() {
        let addr = serve("/metrics", METRICS_BODY, Duration::ZERO).await;
        let temp = TempDir::new().unwrap();
        let mut runtime = MockRuntime::default().with_target("aaaa", "conduit-1");
        runtime.usage.clear();
        let target = runtime.by_image[0].clone();

        let sample = collector(runtime, temp.path(), addr.port())
            .collect(target, &CancellationToken::new())
            .await;

        assert_eq!(sample.info.status, TargetStatus::Unhealthy);
        assert_eq!(sample.info.cpu_percent, 0.0);
        assert_eq!(sample.info.app_metrics.unwrap().connected_clients, 12);
    }

    #[tokio::test]
    async fn test_log_fallback_when_endpoint_unreachable() {
        let temp = TempDir::new().unwrap();
        let mut runtime = MockRuntime::default().with_target("aaaa", "conduit-1");
        runtime.logs.insert(
            "aaaa".to_string(),
            vec![
                "[STATS] Connecting: 1 | Connected: 5 | Up: 1 KB | Down: 2 KB | Uptime: 10s"
                    .to_string(),
                "[INFO] heartbeat".to_string(),
                "[STATS] Connecting: 0 | Connected: 7 | Up: 3 KB | Down: 4 KB | Uptime: 20s"
                    .to_string(),
            ],
        );
        let target = runtime.by_image[0].clone();
        let port = closed_port().await;

        let sample = collector(runtime, temp.path(), port)
            .with_log_fallback(true)
            .collect(target, &CancellationToken::new())
            .await;

        let app = sample.info.app_metrics.unwrap();
        assert_eq!(app.connected_clients, 7);
        assert_eq!(app.uptime_seconds, 20.0);
        assert!(sample.info.settings.is_none());
    }

    #[tokio::test]
    async fn test_health_and_connections_from_proc() {
        let temp = TempDir::new().unwrap();
        let pid_dir = temp.path().join("4242");
        std::fs::create_dir_all(pid_dir.join("fd")).unwrap();
        std::fs::create_dir_all(pid_dir.join("net")).unwrap();
        for fd in ["0", "1", "2", "7"] {
            std::fs::write(pid_dir.join("fd").join(fd), "").unwrap();
        }
        std::fs::write(pid_dir.join("status"), "Name:\tconduit\nThreads:\t9\n").unwrap();
        std::fs::write(
            pid_dir.join("net").join("tcp"),
            "  sl  local_address rem_address   st tx_queue rx_queue\n\
   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1 1\n\
   1: 050011AC:1F90 057100CB:D431 01 00000000:00000000 00:00000000 00000000     0        0 2 1\n\
   2: 050011AC:1F90 067100CB:D432 01 00000000:00000000 00:00000000 00000000     0        0 3 1\n",
        )
        .unwrap();

        let mut runtime = MockRuntime::default().with_target("aaaa", "conduit-1");
        runtime.details.insert(
            "aaaa".to_string(),
            ContainerDetails {
                pid: Some(4242),
                ip: None,
                restart_count: 2,
                oom_killed: false,
                auto_start: false,
            },
        );
        let target = runtime.by_image[0].clone();

        let sample = collector(runtime, temp.path(), closed_port().await)
            .with_geo(Some(Arc::new(EveryoneIsFrench)))
            .collect(target, &CancellationToken::new())
            .await;

        let health = sample.info.health.unwrap();
        assert_eq!(health.fd_count, 4);
        assert_eq!(health.thread_count, 9);
        assert_eq!(health.restart_count, 2);

        let connections = sample.connections.unwrap();
        assert_eq!(connections.stats.total, 2);
        assert_eq!(connections.stats.unique_ips, 2);
        assert_eq!(connections.countries.len(), 1);
        assert_eq!(connections.countries[0].country, "FR");
        assert_eq!(connections.countries[0].connections, 2);

        // No address: metrics are simply unavailable
        assert!(sample.info.app_metrics.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_collection_returns_promptly() {
        let addr = serve("/metrics", METRICS_BODY, Duration::from_secs(30)).await;
        let temp = TempDir::new().unwrap();
        let runtime = MockRuntime::default().with_target("aaaa", "conduit-1");
        let target = runtime.by_image[0].clone();
        let collector = TargetCollector::new(
            Arc::new(runtime),
            temp.path(),
            addr.port(),
            "/metrics",
            Timeouts {
                runtime: Duration::from_secs(30),
                metrics: Duration::from_secs(30),
                files: Duration::from_secs(30),
            },
        );

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let sample = tokio::time::timeout(Duration::from_secs(5), collector.collect(target, &token))
            .await
            .expect("collection should stop on cancellation");
        assert!(sample.info.app_metrics.is_none());
    }
}

#[cfg(test)]
mod snowflake_tests {
    use super::support::serve;
    use crate::collector::collect_snowflake;
    use crate::manager::ManagerSettings;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const SNOWFLAKE_BODY: &str = "\
tor_snowflake_proxy_connections_total{country=\"IR\"} 10
tor_snowflake_proxy_connections_total{country=\"RU\"} 5
tor_snowflake_proxy_connection_timeouts_total 2
tor_snowflake_proxy_traffic_inbound_bytes_total 1024
tor_snowflake_proxy_traffic_outbound_bytes_total 2048
";

    #[tokio::test]
    async fn test_scrape_sums_labels() {
        let addr = serve("/internal/metrics", SNOWFLAKE_BODY, Duration::ZERO).await;
        let settings = ManagerSettings {
            snowflake_enabled: true,
            snowflake_count: 1,
            ..Default::default()
        };

        let metrics = collect_snowflake(
            &reqwest::Client::new(),
            Some(&settings),
            addr.port(),
            &CancellationToken::new(),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert_eq!(metrics.total_connections, 15);
        assert_eq!(metrics.timeouts_total, 2);
        assert_eq!(metrics.inbound_bytes, 1024.0);
        assert_eq!(metrics.outbound_bytes, 2048.0);
    }

    #[tokio::test]
    async fn test_no_answer_is_absent() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let settings = ManagerSettings {
            snowflake_enabled: true,
            snowflake_count: 0,
            ..Default::default()
        };
        let metrics = collect_snowflake(
            &reqwest::Client::new(),
            Some(&settings),
            port,
            &CancellationToken::new(),
            Duration::from_millis(500),
        )
        .await;
        assert!(metrics.is_none());
    }
}

#[cfg(test)]
mod loop_tests {
    use super::support::{container, serve, MockRuntime, METRICS_BODY};
    use crate::collector::{CollectionConfig, CollectionLoopBuilder, DiscoveryFilter, Timeouts};
    use crate::health::{components, ComponentStatus};
    use crate::models::TargetStatus;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn config(root: &Path, metrics_port: u16) -> CollectionConfig {
        CollectionConfig {
            interval: Duration::from_millis(50),
            max_workers: 2,
            timeouts: Timeouts {
                runtime: Duration::from_secs(2),
                metrics: Duration::from_secs(2),
                files: Duration::from_secs(2),
            },
            proc_root: root.join("proc"),
            host_root: root.to_path_buf(),
            manager_dir: root.join("conduit"),
            metrics_port,
            metrics_path: "/metrics".to_string(),
            discovery: DiscoveryFilter {
                self_hostname: None,
                ..Default::default()
            },
            snowflake_base_port: 10000,
            log_stats_fallback: false,
            server_id: "test-server".to_string(),
        }
    }

    fn write_manager(root: &Path) {
        let stats = root.join("conduit").join("traffic_stats");
        std::fs::create_dir_all(&stats).unwrap();
        std::fs::write(
            stats.join("tracker_snapshot"),
            "FROM|IR|100|10.0.0.1\nFROM|IR|100|10.0.0.2\nFROM|DE|100|10.0.0.3\nTO|IR|5|10.0.0.1\n",
        )
        .unwrap();
        std::fs::write(stats.join("cumulative_data"), "IR|1000|2000\nDE|10|20\n").unwrap();
        std::fs::write(stats.join("peak_connections"), "1700000000\n99\n").unwrap();
        std::fs::write(root.join("conduit").join("settings.conf"), "MAX_CLIENTS=300\n").unwrap();
    }

    #[tokio::test]
    async fn test_cycle_publishes_merged_snapshot() {
        let addr = serve("/metrics", METRICS_BODY, Duration::ZERO).await;
        let temp = TempDir::new().unwrap();
        write_manager(temp.path());

        let mut runtime = MockRuntime::default()
            .with_target("aaaa", "conduit-1")
            .with_target("bbbb", "conduit-2");
        runtime.by_name.push(container("cccc", "conduit-3", "exited"));

        let collection = CollectionLoopBuilder::new()
            .runtime(Arc::new(runtime))
            .config(config(temp.path(), addr.port()))
            .build()
            .unwrap();

        assert!(collection.run_cycle(&CancellationToken::new()).await);

        let status = collection.cache().latest().await.unwrap();
        assert_eq!(status.server_id, "test-server");
        assert_eq!(status.total_containers, 3);
        assert_eq!(status.connected_clients, 24);
        assert_eq!(status.connecting_clients, 6);
        assert!(status.manager_available);
        assert!(status.system.is_none());

        let names: Vec<&str> = status.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["conduit-1", "conduit-2", "conduit-3"]);
        assert_eq!(status.containers[2].status, TargetStatus::Down);

        // Two unique IR IPs, one DE, scaled to 24 connected clients
        assert_eq!(status.clients_by_country[0].country, "IR");
        assert_eq!(status.clients_by_country[0].connections, 16);
        assert_eq!(status.clients_by_country[1].connections, 8);
        assert_eq!(status.traffic_by_country[0].country, "IR");

        let session = status.session.as_ref().unwrap();
        assert_eq!(session.peak_connections, 99);
        assert_eq!(session.start_time, 1_700_000_000);

        // Targets reported settings, so the manager's are not used
        assert_eq!(status.settings.as_ref().unwrap().max_clients, 200);

        assert!(collection.health().readiness().await.ready);
    }

    #[tokio::test]
    async fn test_discovery_failure_publishes_empty_snapshot() {
        let temp = TempDir::new().unwrap();
        let runtime = MockRuntime {
            fail_list: true,
            ..Default::default()
        };

        let collection = CollectionLoopBuilder::new()
            .runtime(Arc::new(runtime))
            .config(config(temp.path(), 9))
            .build()
            .unwrap();

        assert!(collection.run_cycle(&CancellationToken::new()).await);

        let status = collection.cache().latest().await.unwrap();
        assert_eq!(status.total_containers, 0);
        assert!(status.containers.is_empty());
        assert!(status.session.is_none());

        let health = collection.health().health().await;
        assert_eq!(
            health.components[components::RUNTIME].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_repeated_discovery_failures_mark_runtime_unhealthy() {
        let temp = TempDir::new().unwrap();
        let runtime = MockRuntime {
            fail_list: true,
            ..Default::default()
        };

        let collection = CollectionLoopBuilder::new()
            .runtime(Arc::new(runtime))
            .config(config(temp.path(), 9))
            .build()
            .unwrap();
        let token = CancellationToken::new();

        for _ in 0..2 {
            assert!(collection.run_cycle(&token).await);
        }
        let health = collection.health().health().await;
        assert_eq!(
            health.components[components::RUNTIME].status,
            ComponentStatus::Degraded
        );

        assert!(collection.run_cycle(&token).await);
        let health = collection.health().health().await;
        assert_eq!(
            health.components[components::RUNTIME].status,
            ComponentStatus::Unhealthy
        );
        assert_eq!(health.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_does_not_publish() {
        let temp = TempDir::new().unwrap();
        let collection = CollectionLoopBuilder::new()
            .runtime(Arc::new(MockRuntime::default()))
            .config(config(temp.path(), 9))
            .build()
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(!collection.run_cycle(&token).await);
        assert!(collection.cache().latest().await.is_none());
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let addr = serve("/metrics", METRICS_BODY, Duration::ZERO).await;
        let temp = TempDir::new().unwrap();
        let runtime = MockRuntime::default().with_target("aaaa", "conduit-1");

        let collection = CollectionLoopBuilder::new()
            .runtime(Arc::new(runtime))
            .config(config(temp.path(), addr.port()))
            .build()
            .unwrap();
        let cache = collection.cache();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(collection.run(shutdown.clone()));

        let mut published = None;
        for _ in 0..100 {
            if let Some(cycle) = cache.cycle().await {
                if cycle >= 2 {
                    published = Some(cycle);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(published.is_some());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_builder_requires_runtime() {
        assert!(CollectionLoopBuilder::new().build().is_err());
        assert!(CollectionLoopBuilder::new()
            .runtime(Arc::new(MockRuntime::default()))
            .interval(Duration::ZERO)
            .build()
            .is_err());
    }
}
