//! Backend selection tests for kd-statsd
//!
//! Test categories:
//! 1. Selection: which sink each combination of signals produces
//! 2. Delivery: what reaches a collector through the selected client

use kd_statsd::{
    global, Dialect, LocalSink, MeasurementSink, NullSink, RemoteSink, SinkKind, StatsdClient,
    StatsdConfig, Tags, DEFAULT_PREFIX,
};

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Test Helpers
// =============================================================================

/// Builds a config from fake environment variables
fn config(vars: &[(&str, &str)]) -> StatsdConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    StatsdConfig::from_lookup(|key| vars.get(key).cloned())
}

/// Binds a collector socket on an ephemeral local port
fn collector() -> (UdpSocket, String) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    (socket, addr)
}

fn recv(socket: &UdpSocket) -> String {
    let mut buf = [0u8; 1024];
    let n = socket.recv(&mut buf).unwrap();
    String::from_utf8(buf[..n].to_vec()).unwrap()
}

// =============================================================================
// 1. Selection Tests
// =============================================================================

mod selection {
    use super::*;

    #[test]
    fn test_no_signals_selects_null() {
        let client = StatsdClient::build(&config(&[]));
        assert_eq!(client.sink_kind(), SinkKind::Null);
        assert!(client.backend().as_any().downcast_ref::<NullSink>().is_some());

        // Never raises, never does I/O.
        client.distribution("sync.duration", 0.3, None);
    }

    #[test]
    fn test_dev_flag_selects_local() {
        let client = StatsdClient::build(&config(&[("STATSD_DEV", "1")]));
        assert_eq!(client.sink_kind(), SinkKind::Local);
        assert!(client.backend().as_any().downcast_ref::<LocalSink>().is_some());
    }

    #[test]
    fn test_addr_selects_remote_datadog() {
        let client = StatsdClient::build(&config(&[("STATSD_ADDR", "127.0.0.1:8125")]));
        assert_eq!(client.sink_kind(), SinkKind::Remote);

        let remote = client
            .backend()
            .as_any()
            .downcast_ref::<RemoteSink>()
            .unwrap();
        assert_eq!(remote.addr(), "127.0.0.1:8125");
        assert_eq!(remote.dialect(), Dialect::Datadog);
    }

    #[test]
    fn test_dialect_override() {
        let client = StatsdClient::build(&config(&[
            ("STATSD_ADDR", "127.0.0.1:8125"),
            ("STATSD_IMPLEMENTATION", "statsd"),
        ]));
        let remote = client
            .backend()
            .as_any()
            .downcast_ref::<RemoteSink>()
            .unwrap();
        assert_eq!(remote.dialect(), Dialect::Statsd);
    }

    #[test]
    fn test_dev_takes_priority() {
        let client = StatsdClient::build(&config(&[
            ("STATSD_DEV", "yes"),
            ("STATSD_ADDR", "127.0.0.1:8125"),
        ]));
        assert_eq!(client.sink_kind(), SinkKind::Local);
    }

    #[test]
    fn test_defaults_applied() {
        let null = StatsdClient::build(&config(&[]));
        let local = StatsdClient::build(&config(&[("STATSD_DEV", "1")]));
        for client in [null, local] {
            assert_eq!(client.prefix(), Some(DEFAULT_PREFIX));
            assert_eq!(client.sample_rate(), 1.0);
        }
    }

    #[test]
    fn test_build_is_repeatable() {
        let cfg = config(&[("STATSD_ADDR", "127.0.0.1:8125")]);
        let first = StatsdClient::build(&cfg);
        let second = StatsdClient::build(&cfg);
        assert_eq!(first.sink_kind(), second.sink_kind());
        assert!(!Arc::ptr_eq(first.backend(), second.backend()));
    }

    #[test]
    fn test_global_is_initialized_once() {
        assert!(Arc::ptr_eq(global(), global()));
    }
}

// =============================================================================
// 2. Delivery Tests
// =============================================================================

mod delivery {
    use super::*;

    #[test]
    fn test_remote_client_sends_prefixed_packet() {
        let (socket, addr) = collector();
        let client = StatsdClient::build(&config(&[("STATSD_ADDR", addr.as_str())]));

        let tags: Tags = [("env".to_string(), "prod".to_string())].into_iter().collect();
        client.distribution("sync.duration", 0.3, Some(tags));

        assert_eq!(recv(&socket), "KubernetesDeploy.sync.duration:0.3|d|#env:prod");
    }

    #[test]
    fn test_remote_client_untagged_packet() {
        let (socket, addr) = collector();
        let client = StatsdClient::build(&config(&[("STATSD_ADDR", addr.as_str())]));

        client.distribution("deploy.duration", 41.0, None);
        assert_eq!(recv(&socket), "KubernetesDeploy.deploy.duration:41.0|d");
    }

    #[test]
    fn test_remote_sink_reuses_socket() {
        let (socket, addr) = collector();
        let sink: Arc<dyn MeasurementSink> = Arc::new(RemoteSink::new(addr, Dialect::Datadog));
        let client = StatsdClient::new(sink);

        client.distribution("a", 0.1, None);
        client.distribution("b", 0.2, None);
        assert_eq!(recv(&socket), "a:0.1|d");
        assert_eq!(recv(&socket), "b:0.2|d");
    }

    #[test]
    fn test_unreachable_collector_does_not_fail_caller() {
        let client = StatsdClient::build(&config(&[("STATSD_ADDR", "definitely-not-valid")]));
        client.distribution("sync.duration", 0.1, None);
        assert_eq!(client.sink_kind(), SinkKind::Remote);
    }
}
