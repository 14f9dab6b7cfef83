//! The discovery engine.
//!
//! One engine serves every stream of a process. Each stream is driven by its
//! own worker (`run_stream`), which reacts to three kinds of events:
//!
//! 1. **Requests** from the client, fed through a channel by the transport
//! 2. **Snapshot changes** for the stream's node, signalled by the cache
//! 3. **Retry deadlines** set by the NACK policy
//!
//! Responses are built from the snapshot current at the time they are
//! built and are pushed, in order, to the stream's outbound channel. A slow
//! client only ever blocks its own worker.

use crate::cache::SnapshotCache;
use crate::callbacks::Callbacks;
use crate::error::{FetchError, StreamError};
use crate::session::{NackPolicy, Session};
use crate::snapshot::Snapshot;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use xds_sotw_proto::{DiscoveryRequest, DiscoveryResponse, ResourceType};

/// State-of-the-world discovery server.
pub struct DiscoveryServer {
    cache: Arc<SnapshotCache>,
    callbacks: Arc<dyn Callbacks>,
    nack_policy: NackPolicy,
}

impl DiscoveryServer {
    /// Create an engine serving snapshots from `cache`.
    #[must_use]
    pub fn new(cache: Arc<SnapshotCache>, callbacks: Arc<dyn Callbacks>) -> Self {
        Self {
            cache,
            callbacks,
            nack_policy: NackPolicy::default(),
        }
    }

    /// Set the policy applied when a client rejects a response.
    #[must_use]
    pub fn with_nack_policy(mut self, policy: NackPolicy) -> Self {
        self.nack_policy = policy;
        self
    }

    /// The snapshot cache this engine reads.
    #[must_use]
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// Open a stream for a node.
    ///
    /// `type_url` is empty for aggregated streams. The session is registered
    /// for snapshot updates as soon as it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Rejected`] if the stream-open hook refuses it.
    pub fn open_stream(&self, node_id: &str, type_url: &str) -> Result<Session, StreamError> {
        let registry = Arc::clone(self.cache.sessions());
        let stream_id = registry.next_stream_id();

        if let Err(rejection) = self.callbacks.on_stream_open(stream_id, node_id, type_url) {
            tracing::warn!(%stream_id, node_id, reason = %rejection, "Stream rejected");
            return Err(StreamError::Rejected {
                stream_id,
                reason: rejection.0,
            });
        }

        tracing::info!(%stream_id, node_id, "Stream opened");
        Ok(Session::open(
            stream_id,
            node_id.to_string(),
            registry,
            Arc::clone(&self.callbacks),
        ))
    }

    /// Open a stream and drive it until the client stops sending.
    ///
    /// # Errors
    ///
    /// Returns error if the stream is refused at open.
    pub async fn handle_stream(
        &self,
        node_id: &str,
        requests: mpsc::Receiver<DiscoveryRequest>,
        responses: mpsc::Sender<DiscoveryResponse>,
    ) -> Result<(), StreamError> {
        let session = self.open_stream(node_id, "")?;
        self.run_stream(session, requests, responses).await;
        Ok(())
    }

    /// Drive an open session.
    ///
    /// Returns when the request channel closes or the response channel is
    /// dropped. The session is closed (and unregistered) on return; any
    /// responses still queued are discarded with the channel.
    pub async fn run_stream(
        &self,
        mut session: Session,
        mut requests: mpsc::Receiver<DiscoveryRequest>,
        responses: mpsc::Sender<DiscoveryResponse>,
    ) {
        let wake = session.waker();

        loop {
            let retry = session.next_retry();
            let result = tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.on_request(&mut session, request, &responses).await,
                    None => break,
                },
                () = wake.notified() => self.on_snapshot_changed(&mut session, &responses).await,
                () = sleep_until(retry) => self.on_retry(&mut session, &responses).await,
            };

            if let Err(err) = result {
                self.callbacks.on_stream_error(session.stream_id(), &err);
                tracing::debug!(stream_id = %session.stream_id(), error = %err, "Stream ended");
                break;
            }
        }
    }

    async fn on_request(
        &self,
        session: &mut Session,
        request: DiscoveryRequest,
        responses: &mpsc::Sender<DiscoveryResponse>,
    ) -> Result<(), StreamError> {
        let stream_id = session.stream_id();
        self.callbacks.on_stream_request(stream_id, &request);
        self.cache.touch(session.node_id());

        let kind = match ResourceType::from_type_url(&request.type_url) {
            Ok(kind) => kind,
            Err(err) => {
                tracing::warn!(%stream_id, error = %err, "Ignoring request for unknown type");
                return Ok(());
            }
        };

        if let Some(detail) = &request.error_detail {
            tracing::warn!(
                %stream_id,
                %kind,
                version = %request.version_info,
                error = %detail.message,
                "Client rejected response"
            );
        } else {
            tracing::debug!(
                %stream_id,
                %kind,
                version = %request.version_info,
                names = ?request.resource_names,
                "Received request"
            );
        }

        let snapshot = match self.cache.get_snapshot(session.node_id()) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::debug!(%stream_id, error = %err, "Deferring response");
                None
            }
        };

        let due = session.accept_request(
            kind,
            request,
            self.nack_policy,
            snapshot.as_deref(),
            Instant::now(),
        );

        match snapshot {
            Some(snapshot) if due => self.send(session, kind, &snapshot, responses).await,
            _ => Ok(()),
        }
    }

    async fn on_snapshot_changed(
        &self,
        session: &mut Session,
        responses: &mpsc::Sender<DiscoveryResponse>,
    ) -> Result<(), StreamError> {
        let Ok(snapshot) = self.cache.get_snapshot(session.node_id()) else {
            return Ok(());
        };

        for kind in session.due_on_snapshot(&snapshot) {
            self.send(session, kind, &snapshot, responses).await?;
        }
        Ok(())
    }

    async fn on_retry(
        &self,
        session: &mut Session,
        responses: &mpsc::Sender<DiscoveryResponse>,
    ) -> Result<(), StreamError> {
        let due = session.due_retries(Instant::now());
        let Ok(snapshot) = self.cache.get_snapshot(session.node_id()) else {
            return Ok(());
        };

        for kind in due {
            tracing::debug!(stream_id = %session.stream_id(), %kind, "Retrying rejected response");
            self.send(session, kind, &snapshot, responses).await?;
        }
        Ok(())
    }

    async fn send(
        &self,
        session: &mut Session,
        kind: ResourceType,
        snapshot: &Snapshot,
        responses: &mpsc::Sender<DiscoveryResponse>,
    ) -> Result<(), StreamError> {
        let Some(response) = session.respond(kind, snapshot) else {
            return Ok(());
        };
        let stream_id = session.stream_id();

        if let Some(request) = session.last_request(kind) {
            self.callbacks.on_stream_response(stream_id, request, &response);
        }
        tracing::debug!(
            %stream_id,
            %kind,
            version = %response.version_info,
            nonce = %response.nonce,
            resources = response.resources.len(),
            "Sending response"
        );

        responses
            .send(response)
            .await
            .map_err(|_| StreamError::SessionClosed(stream_id))
    }

    /// Answer a one-shot request for a node.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::UpToDate`] when the client already holds the
    /// current version, [`FetchError::NoSnapshot`] when the node has no
    /// snapshot, and [`FetchError::UnknownType`] for unknown type URLs.
    pub fn fetch(
        &self,
        node_id: &str,
        request: &DiscoveryRequest,
    ) -> Result<DiscoveryResponse, FetchError> {
        self.callbacks.on_fetch_request(request);
        self.cache.touch(node_id);

        let kind = ResourceType::from_type_url(&request.type_url)?;
        let snapshot = self
            .cache
            .get_snapshot(node_id)
            .map_err(|_| FetchError::NoSnapshot(node_id.to_string()))?;

        let version = snapshot.version(kind);
        if request.version_info == version {
            return Err(FetchError::UpToDate {
                version: version.to_string(),
            });
        }

        let names: BTreeSet<String> = request.resource_names.iter().cloned().collect();
        let response = snapshot.response(kind, &names, String::new());
        self.callbacks.on_fetch_response(request, &response);
        tracing::debug!(node_id, %kind, version, "Answered fetch");
        Ok(response)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{NoopCallbacks, Rejection};
    use crate::registry::{SessionRegistry, StreamId};
    use crate::resource::Resource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use xds_sotw_proto::Status;

    const LISTENER: ResourceType = ResourceType::Listener;
    const WAIT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(50);

    fn listener(name: &str) -> Resource {
        Resource::from_json(LISTENER, name, &serde_json::json!({ "name": name })).unwrap()
    }

    fn names(response: &DiscoveryResponse) -> Vec<String> {
        response
            .resources
            .iter()
            .map(|any| {
                let value: serde_json::Value = serde_json::from_slice(&any.value).unwrap();
                value["name"].as_str().unwrap().to_string()
            })
            .collect()
    }

    fn server(callbacks: Arc<dyn Callbacks>) -> Arc<DiscoveryServer> {
        let cache = Arc::new(SnapshotCache::new(Arc::new(SessionRegistry::new())));
        Arc::new(DiscoveryServer::new(cache, callbacks))
    }

    struct Client {
        requests: mpsc::Sender<DiscoveryRequest>,
        responses: mpsc::Receiver<DiscoveryResponse>,
        task: JoinHandle<Result<(), StreamError>>,
    }

    impl Client {
        fn connect(server: &Arc<DiscoveryServer>, node_id: &str) -> Self {
            let (req_tx, req_rx) = mpsc::channel(16);
            let (resp_tx, resp_rx) = mpsc::channel(16);
            let server = Arc::clone(server);
            let node_id = node_id.to_string();
            let task =
                tokio::spawn(async move { server.handle_stream(&node_id, req_rx, resp_tx).await });
            Self {
                requests: req_tx,
                responses: resp_rx,
                task,
            }
        }

        async fn send(&self, request: DiscoveryRequest) {
            self.requests.send(request).await.unwrap();
        }

        async fn recv(&mut self) -> DiscoveryResponse {
            tokio::time::timeout(WAIT, self.responses.recv())
                .await
                .expect("timed out waiting for response")
                .expect("stream closed")
        }

        async fn assert_quiet(&mut self) {
            let next = tokio::time::timeout(QUIET, self.responses.recv()).await;
            assert!(next.is_err(), "unexpected response: {next:?}");
        }
    }

    #[tokio::test]
    async fn push_on_snapshot_update() {
        let server = server(Arc::new(NoopCallbacks));
        let cache = Arc::clone(server.cache());
        cache
            .set_snapshot("node-A", Snapshot::new("v1", [listener("listener-1")]))
            .unwrap();

        let mut client = Client::connect(&server, "node-A");
        client.send(DiscoveryRequest::new(LISTENER.type_url())).await;

        let first = client.recv().await;
        assert_eq!(first.version_info, "v1");
        assert_eq!(names(&first), vec!["listener-1"]);

        client
            .send(DiscoveryRequest::new(LISTENER.type_url()).with_version("v1"))
            .await;
        client.assert_quiet().await;

        cache
            .set_snapshot(
                "node-A",
                Snapshot::new("v2", [listener("listener-1"), listener("listener-2")]),
            )
            .unwrap();

        let pushed = client.recv().await;
        assert_eq!(pushed.version_info, "v2");
        assert_eq!(names(&pushed), vec!["listener-1", "listener-2"]);
    }

    #[tokio::test]
    async fn request_before_snapshot_is_answered_when_it_arrives() {
        let server = server(Arc::new(NoopCallbacks));
        let mut client = Client::connect(&server, "node-A");

        client.send(DiscoveryRequest::new(LISTENER.type_url())).await;
        client.assert_quiet().await;

        server
            .cache()
            .set_snapshot("node-A", Snapshot::new("v1", []))
            .unwrap();

        let response = client.recv().await;
        assert_eq!(response.version_info, "v1");
        assert!(response.resources.is_empty());
    }

    #[tokio::test]
    async fn update_reaches_every_session_of_the_node() {
        let server = server(Arc::new(NoopCallbacks));
        let cache = Arc::clone(server.cache());
        cache
            .set_snapshot("node-A", Snapshot::new("v1", [listener("l1")]))
            .unwrap();

        let mut clients = Vec::new();
        for _ in 0..4 {
            let mut client = Client::connect(&server, "node-A");
            client.send(DiscoveryRequest::new(LISTENER.type_url())).await;
            assert_eq!(client.recv().await.version_info, "v1");
            clients.push(client);
        }
        let mut bystander = Client::connect(&server, "node-B");
        bystander
            .send(DiscoveryRequest::new(LISTENER.type_url()))
            .await;

        cache
            .set_snapshot("node-A", Snapshot::new("v2", [listener("l1")]))
            .unwrap();

        for client in &mut clients {
            assert_eq!(client.recv().await.version_info, "v2");
            client.assert_quiet().await;
        }
        bystander.assert_quiet().await;
    }

    #[tokio::test]
    async fn closed_stream_is_not_delivered_to() {
        let server = server(Arc::new(NoopCallbacks));
        let cache = Arc::clone(server.cache());
        cache.set_snapshot("node-A", Snapshot::new("v1", [])).unwrap();

        let mut client = Client::connect(&server, "node-A");
        client.send(DiscoveryRequest::new(LISTENER.type_url())).await;
        client.recv().await;

        let Client { requests, task, .. } = client;
        drop(requests);
        tokio_test::assert_ok!(task.await.unwrap());

        assert_eq!(cache.sessions().session_count("node-A"), 0);
        cache.set_snapshot("node-A", Snapshot::new("v2", [])).unwrap();
        assert_eq!(cache.sessions().notify("node-A"), 0);
    }

    #[tokio::test]
    async fn status_keeps_last_request_after_streams_close() {
        let server = server(Arc::new(NoopCallbacks));
        let cache = Arc::clone(server.cache());
        cache.set_snapshot("node-A", Snapshot::new("v1", [])).unwrap();

        let mut client = Client::connect(&server, "node-A");
        client.send(DiscoveryRequest::new(LISTENER.type_url())).await;
        client.recv().await;

        let open = cache.status("node-A");
        assert_eq!(open.open_streams, 1);
        let seen = open.last_request.expect("request was not recorded");

        let Client { requests, task, .. } = client;
        drop(requests);
        tokio_test::assert_ok!(task.await.unwrap());

        let closed = cache.status("node-A");
        assert_eq!(closed.open_streams, 0);
        assert_eq!(closed.last_request, Some(seen));
    }

    #[test]
    fn fetch_records_last_request() {
        let server = server(Arc::new(NoopCallbacks));
        server.cache().set_snapshot("node-A", Snapshot::new("v1", [])).unwrap();
        assert!(server.cache().status("node-A").last_request.is_none());

        server
            .fetch("node-A", &DiscoveryRequest::new(LISTENER.type_url()))
            .unwrap();
        assert!(server.cache().status("node-A").last_request.is_some());
    }

    #[tokio::test]
    async fn dropped_receiver_ends_the_stream() {
        let server = server(Arc::new(NoopCallbacks));
        let cache = Arc::clone(server.cache());
        cache.set_snapshot("node-A", Snapshot::new("v1", [])).unwrap();

        let client = Client::connect(&server, "node-A");
        let Client {
            requests,
            responses,
            task,
        } = client;
        drop(responses);
        requests
            .send(DiscoveryRequest::new(LISTENER.type_url()))
            .await
            .unwrap();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        assert_eq!(cache.sessions().session_count("node-A"), 0);
    }

    #[tokio::test]
    async fn kinds_are_tracked_independently() {
        let server = server(Arc::new(NoopCallbacks));
        let cluster = Resource::from_json(ResourceType::Cluster, "c1", &serde_json::json!({}))
            .unwrap();
        server
            .cache()
            .set_snapshot("node-A", Snapshot::new("v1", [listener("l1"), cluster]))
            .unwrap();

        let mut client = Client::connect(&server, "node-A");
        client.send(DiscoveryRequest::new(LISTENER.type_url())).await;
        let listeners = client.recv().await;
        client
            .send(DiscoveryRequest::new(ResourceType::Cluster.type_url()))
            .await;
        let clusters = client.recv().await;

        assert_eq!(listeners.type_url, LISTENER.type_url());
        assert_eq!(clusters.type_url, ResourceType::Cluster.type_url());
        assert_eq!(clusters.resources.len(), 1);
        assert_ne!(listeners.nonce, clusters.nonce);
    }

    #[tokio::test(start_paused = true)]
    async fn nack_retry_policy_resends_after_delay() {
        let cache = Arc::new(SnapshotCache::new(Arc::new(SessionRegistry::new())));
        let server = Arc::new(
            DiscoveryServer::new(Arc::clone(&cache), Arc::new(NoopCallbacks))
                .with_nack_policy(NackPolicy::RetryAfter(Duration::from_secs(30))),
        );
        cache.set_snapshot("node-A", Snapshot::new("v1", [listener("l1")])).unwrap();

        let mut client = Client::connect(&server, "node-A");
        client.send(DiscoveryRequest::new(LISTENER.type_url())).await;
        let response = client.recv().await;

        client
            .send(
                DiscoveryRequest::ack(&response, &[])
                    .with_version("")
                    .with_error(Status::new(Status::INVALID_ARGUMENT, "bad listener")),
            )
            .await;
        client.assert_quiet().await;

        tokio::time::advance(Duration::from_secs(31)).await;
        let retried = client.recv().await;
        assert_eq!(retried.version_info, "v1");
        assert_ne!(retried.nonce, response.nonce);
    }

    #[tokio::test]
    async fn unknown_type_is_ignored() {
        let server = server(Arc::new(NoopCallbacks));
        server.cache().set_snapshot("node-A", Snapshot::new("v1", [])).unwrap();

        let mut client = Client::connect(&server, "node-A");
        client.send(DiscoveryRequest::new("type.googleapis.com/widget")).await;
        client.assert_quiet().await;

        client.send(DiscoveryRequest::new(LISTENER.type_url())).await;
        assert_eq!(client.recv().await.version_info, "v1");
    }

    #[derive(Default)]
    struct Counting {
        opened: AtomicUsize,
        closed: AtomicUsize,
        requests: AtomicUsize,
        responses: AtomicUsize,
        fetches: AtomicUsize,
        reject: bool,
    }

    impl Callbacks for Counting {
        fn on_stream_open(&self, _: StreamId, _: &str, _: &str) -> Result<(), Rejection> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(Rejection("closed for maintenance".to_string()));
            }
            Ok(())
        }

        fn on_stream_closed(&self, _: StreamId, _: &str) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stream_request(&self, _: StreamId, _: &DiscoveryRequest) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stream_response(&self, _: StreamId, _: &DiscoveryRequest, _: &DiscoveryResponse) {
            self.responses.fetch_add(1, Ordering::SeqCst);
        }

        fn on_fetch_request(&self, _: &DiscoveryRequest) {
            self.fetches.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn hooks_observe_the_stream() {
        let hooks = Arc::new(Counting::default());
        let server = server(Arc::clone(&hooks) as Arc<dyn Callbacks>);
        server.cache().set_snapshot("node-A", Snapshot::new("v1", [])).unwrap();

        let mut client = Client::connect(&server, "node-A");
        client.send(DiscoveryRequest::new(LISTENER.type_url())).await;
        let response = client.recv().await;
        client.send(DiscoveryRequest::ack(&response, &[])).await;
        client.assert_quiet().await;

        let Client { requests, task, .. } = client;
        drop(requests);
        task.await.unwrap().unwrap();

        assert_eq!(hooks.opened.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.requests.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.responses.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_hook_can_refuse_the_stream() {
        let hooks = Arc::new(Counting {
            reject: true,
            ..Counting::default()
        });
        let server = server(hooks);

        let err = server.open_stream("node-A", "").unwrap_err();
        assert!(matches!(err, StreamError::Rejected { ref reason, .. } if reason == "closed for maintenance"));
        assert_eq!(server.cache().sessions().session_count("node-A"), 0);
    }

    #[test]
    fn fetch_serves_and_skips_current_version() {
        let hooks = Arc::new(Counting::default());
        let server = server(Arc::clone(&hooks) as Arc<dyn Callbacks>);
        let request = DiscoveryRequest::new(LISTENER.type_url());

        assert_eq!(
            server.fetch("node-A", &request).unwrap_err(),
            FetchError::NoSnapshot("node-A".to_string())
        );

        server
            .cache()
            .set_snapshot("node-A", Snapshot::new("v1", [listener("a"), listener("b")]))
            .unwrap();

        let response = server.fetch("node-A", &request.clone().with_names(["b"])).unwrap();
        assert_eq!(names(&response), vec!["b"]);
        assert_eq!(response.version_info, "v1");

        let current = request.clone().with_version("v1");
        assert!(matches!(
            server.fetch("node-A", &current),
            Err(FetchError::UpToDate { ref version }) if version == "v1"
        ));

        let unknown = DiscoveryRequest::new("type.googleapis.com/widget");
        assert!(matches!(
            server.fetch("node-A", &unknown),
            Err(FetchError::UnknownType(_))
        ));
        assert_eq!(hooks.fetches.load(Ordering::SeqCst), 4);
    }
}
