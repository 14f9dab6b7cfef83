use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use xds_sotw_cli::{render_response, Client};
use xds_sotw_core::{Resource, ResourceType, Snapshot, SnapshotCache};
use xds_sotw_proto::{DiscoveryRequest, Node};
use xds_sotw_server::{Server, ServerConfig};

const WAIT: Duration = Duration::from_secs(5);

async fn start() -> (SocketAddr, Arc<SnapshotCache>) {
    let mut config = ServerConfig::default();
    config.listen.bind = IpAddr::from([127, 0, 0, 1]);
    config.listen.port = 0;

    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let cache = server.cache();
    tokio::spawn(server.run_until(std::future::pending()));
    (addr, cache)
}

fn clusters(version: &str, names: &[&str]) -> Snapshot {
    Snapshot::new(
        version,
        names.iter().map(|name| {
            Resource::from_json(ResourceType::Cluster, *name, &serde_json::json!({"name": name}))
                .unwrap()
        }),
    )
}

fn cluster_request() -> DiscoveryRequest {
    DiscoveryRequest::new(ResourceType::Cluster.type_url()).with_node(Node::new("cli-node"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_renders_resources() {
    let (addr, cache) = start().await;
    cache
        .set_snapshot("cli-node", clusters("v1", &["backend", "frontend"]))
        .unwrap();

    let client = Client::new(&format!("tcp://{addr}")).unwrap();
    let response = client
        .fetch(cluster_request().with_names(["frontend"]))
        .await
        .unwrap();

    let rendered = render_response(&response);
    assert_eq!(rendered["version_info"], "v1");
    assert_eq!(rendered["resources"].as_array().unwrap().len(), 1);
    assert_eq!(rendered["resources"][0]["body"]["name"], "frontend");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_reports_server_errors() {
    let (addr, _cache) = start().await;

    let client = Client::new(&addr.to_string()).unwrap();
    let err = client.fetch(cluster_request()).await.unwrap_err();
    assert!(err.to_string().contains("no snapshot available"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_acknowledges_and_follows_updates() {
    let (addr, cache) = start().await;
    cache
        .set_snapshot("cli-node", clusters("v1", &["backend"]))
        .unwrap();

    let client = Client::new(&addr.to_string()).unwrap();
    let mut watch = client.watch(cluster_request()).await.unwrap();

    let first = timeout(WAIT, watch.next()).await.unwrap().unwrap();
    assert_eq!(first.version_info, "v1");

    cache
        .set_snapshot("cli-node", clusters("v2", &["backend", "canary"]))
        .unwrap();

    let second = timeout(WAIT, watch.next()).await.unwrap().unwrap();
    assert_eq!(second.version_info, "v2");
    assert_eq!(second.resources.len(), 2);
}
