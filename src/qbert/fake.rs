/// Scripted in-memory management plane for tests
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::error::ApiError;
use super::models::*;
use super::ManagementPlane;

/// A recorded call, in the order the fake saw it
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListClusters,
    GetCluster(String),
    CreateCluster(String),
    Attach {
        cluster_uuid: String,
        nodes: Vec<AttachNode>,
    },
    ListNodes,
    ListCloudProviders,
    ListHosts,
}

/// Queue of responses; the last entry repeats once the others are used up
#[derive(Debug)]
pub struct Script<T: Clone> {
    steps: VecDeque<Result<T, u16>>,
}

impl<T: Clone> Script<T> {
    pub fn new(steps: Vec<Result<T, u16>>) -> Self {
        Self {
            steps: steps.into(),
        }
    }

    fn next(&mut self) -> Option<Result<T, u16>> {
        if self.steps.len() > 1 {
            self.steps.pop_front()
        } else {
            self.steps.front().cloned()
        }
    }
}

impl<T: Clone> Default for Script<T> {
    fn default() -> Self {
        Self {
            steps: VecDeque::new(),
        }
    }
}

fn failure(status: u16) -> ApiError {
    ApiError::Status {
        status,
        body: json!({"message": "scripted failure"}).to_string(),
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    /// Consumed one per list call; afterwards `registered` answers
    cluster_listings: VecDeque<Result<Vec<Cluster>, u16>>,
    registered: Vec<Cluster>,
    statuses: Script<String>,
    attach_results: Script<()>,
    node_listings: Script<Vec<QbertNode>>,
    cloud_providers: Script<Vec<CloudProvider>>,
    hosts: Script<Vec<Host>>,
    create_uuid: Option<String>,
    create_failure: Option<u16>,
}

pub struct FakeManagementPlane {
    state: Mutex<State>,
}

impl Default for FakeManagementPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeManagementPlane {
    /// A healthy plane: local node pool, statuses "ok", attach succeeds, nothing registered
    pub fn new() -> Self {
        let state = State {
            cloud_providers: Script::new(vec![Ok(vec![CloudProvider {
                provider_type: "local".to_string(),
                node_pool_uuid: Some("pool-1".to_string()),
            }])]),
            statuses: Script::new(vec![Ok("ok".to_string())]),
            attach_results: Script::new(vec![Ok(())]),
            node_listings: Script::new(vec![Ok(vec![])]),
            hosts: Script::new(vec![Ok(vec![])]),
            create_uuid: Some("c-new".to_string()),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn with_state(self, update: impl FnOnce(&mut State)) -> Self {
        update(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_registered(self, name: &str, uuid: &str) -> Self {
        self.with_state(|s| s.registered.push(cluster(name, uuid)))
    }

    pub fn with_cluster_listings(self, listings: Vec<Result<Vec<Cluster>, u16>>) -> Self {
        self.with_state(|s| s.cluster_listings = listings.into())
    }

    pub fn with_statuses(self, statuses: Vec<Result<&str, u16>>) -> Self {
        self.with_state(|s| {
            s.statuses = Script::new(
                statuses
                    .into_iter()
                    .map(|r| r.map(str::to_string))
                    .collect(),
            )
        })
    }

    pub fn with_attach_results(self, results: Vec<Result<(), u16>>) -> Self {
        self.with_state(|s| s.attach_results = Script::new(results))
    }

    pub fn with_node_listings(self, listings: Vec<Result<Vec<QbertNode>, u16>>) -> Self {
        self.with_state(|s| s.node_listings = Script::new(listings))
    }

    pub fn with_cloud_providers(self, providers: Vec<Result<Vec<CloudProvider>, u16>>) -> Self {
        self.with_state(|s| s.cloud_providers = Script::new(providers))
    }

    pub fn with_hosts(self, hosts: Vec<Result<Vec<Host>, u16>>) -> Self {
        self.with_state(|s| s.hosts = Script::new(hosts))
    }

    pub fn with_create_uuid(self, uuid: Option<&str>) -> Self {
        self.with_state(|s| s.create_uuid = uuid.map(str::to_string))
    }

    pub fn with_create_failure(self, status: u16) -> Self {
        self.with_state(|s| s.create_failure = Some(status))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

pub fn cluster(name: &str, uuid: &str) -> Cluster {
    Cluster {
        name: name.to_string(),
        uuid: uuid.to_string(),
        status: Some("pending".to_string()),
    }
}

pub fn master_node(cluster: &str, api_responding: bool, status: &str) -> QbertNode {
    QbertNode {
        cluster_name: Some(cluster.to_string()),
        is_master: Some(Flag::Int(1)),
        api_responding: Some(Flag::Int(api_responding as i64)),
        status: Some(status.to_string()),
    }
}

pub fn active_masters(cluster: &str, count: usize) -> Vec<QbertNode> {
    (0..count).map(|_| master_node(cluster, true, "ok")).collect()
}

pub fn host(id: &str, ips: &[(&str, &str)]) -> Host {
    serde_json::from_value(json!({
        "id": id,
        "extensions": {"interfaces": {"data": {"iface_ip": ips
            .iter()
            .map(|(iface, ip)| (iface.to_string(), json!(ip)))
            .collect::<serde_json::Map<_, _>>()}}}
    }))
    .unwrap()
}

fn play<T: Clone>(script: &mut Script<T>, what: &str) -> Result<T, ApiError> {
    match script.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(status)) => Err(failure(status)),
        None => panic!("no scripted response for {}", what),
    }
}

#[async_trait]
impl ManagementPlane for FakeManagementPlane {
    async fn list_clusters(&self) -> Result<Vec<Cluster>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListClusters);
        match state.cluster_listings.pop_front() {
            Some(Ok(listing)) => Ok(listing),
            Some(Err(status)) => Err(failure(status)),
            None => Ok(state.registered.clone()),
        }
    }

    async fn get_cluster(&self, cluster_uuid: &str) -> Result<ClusterDetail, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetCluster(cluster_uuid.to_string()));
        let status = play(&mut state.statuses, "get_cluster")?;
        Ok(ClusterDetail {
            status: if status.is_empty() { None } else { Some(status) },
        })
    }

    async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> Result<CreateClusterResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::CreateCluster(request.spec.name.clone()));
        if let Some(status) = state.create_failure {
            return Err(failure(status));
        }
        let uuid = state.create_uuid.clone();
        if let Some(uuid) = &uuid {
            let created = cluster(&request.spec.name, uuid);
            state.registered.push(created);
        }
        Ok(CreateClusterResponse { uuid })
    }

    async fn attach_nodes(&self, cluster_uuid: &str, nodes: &[AttachNode]) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Attach {
            cluster_uuid: cluster_uuid.to_string(),
            nodes: nodes.to_vec(),
        });
        play(&mut state.attach_results, "attach_nodes")
    }

    async fn list_nodes(&self) -> Result<Vec<QbertNode>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListNodes);
        play(&mut state.node_listings, "list_nodes")
    }

    async fn list_cloud_providers(&self) -> Result<Vec<CloudProvider>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListCloudProviders);
        play(&mut state.cloud_providers, "list_cloud_providers")
    }

    async fn list_hosts(&self) -> Result<Vec<Host>, ApiError> {
        self.record(Call::ListHosts);
        let mut state = self.state.lock().unwrap();
        play(&mut state.hosts, "list_hosts")
    }
}
