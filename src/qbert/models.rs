/// Data models for the qbert and resmgr APIs
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Cluster entry from `GET /qbert/v3/{project}/clusters`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Cluster {
    pub name: String,
    pub uuid: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Cluster detail from `GET /qbert/v3/{project}/clusters/{uuid}`
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterDetail {
    #[serde(default)]
    pub status: Option<String>,
}

/// User-facing cluster attributes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,
    pub containers_cidr: String,
    pub services_cidr: String,
    pub external_dns_name: String,
    pub privileged: bool,
    pub app_catalog_enabled: bool,
    pub allow_workloads_on_master: bool,
    #[serde(rename = "masterVipIpv4")]
    pub master_vip_ipv4: String,
    pub master_vip_iface: String,
    pub metallb_cidr: String,
    pub network_plugin: String,
    pub tags: BTreeMap<String, String>,
}

impl ClusterSpec {
    /// Spec with the defaults used by `cluster create`
    pub fn new(name: impl Into<String>) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("pf9-system:monitoring".to_string(), "true".to_string());

        Self {
            name: name.into(),
            containers_cidr: "10.20.0.0/16".to_string(),
            services_cidr: "10.21.0.0/16".to_string(),
            external_dns_name: String::new(),
            privileged: true,
            app_catalog_enabled: true,
            allow_workloads_on_master: false,
            master_vip_ipv4: String::new(),
            master_vip_iface: String::new(),
            metallb_cidr: String::new(),
            network_plugin: "flannel".to_string(),
            tags,
        }
    }
}

/// Request body for `POST /qbert/v3/{project}/clusters`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterRequest {
    #[serde(flatten)]
    pub spec: ClusterSpec,
    pub masterless: bool,
    pub runtime_config: String,
    pub node_pool_uuid: String,
    pub enable_metallb: bool,
}

impl CreateClusterRequest {
    pub fn new(spec: &ClusterSpec, node_pool_uuid: impl Into<String>) -> Self {
        Self {
            enable_metallb: !spec.metallb_cidr.is_empty(),
            spec: spec.clone(),
            masterless: false,
            runtime_config: String::new(),
            node_pool_uuid: node_pool_uuid.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClusterResponse {
    #[serde(default)]
    pub uuid: Option<String>,
}

/// One entry of an attach batch
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachNode {
    pub uuid: String,
    pub is_master: bool,
}

/// qbert reports flags as either 0/1 or booleans depending on the release
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    pub fn is_set(self) -> bool {
        matches!(self, Flag::Bool(true) | Flag::Int(1))
    }
}

/// Node entry from `GET /qbert/v3/{project}/nodes`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QbertNode {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub is_master: Option<Flag>,
    #[serde(default, rename = "api_responding")]
    pub api_responding: Option<Flag>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Cloud provider entry from `GET /qbert/v3/{project}/cloudProviders`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudProvider {
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub node_pool_uuid: Option<String>,
}

/// Host entry from `GET /resmgr/v1/hosts`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Host {
    pub id: String,
    #[serde(default)]
    pub extensions: Option<HostExtensions>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HostExtensions {
    #[serde(default)]
    pub interfaces: Option<InterfacesExtension>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InterfacesExtension {
    #[serde(default)]
    pub data: Option<InterfaceData>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InterfaceData {
    /// Interface name to IPv4 address
    #[serde(default)]
    pub iface_ip: HashMap<String, String>,
}

impl Host {
    /// Whether any interface reported by the host agent carries `ip`
    pub fn has_ip(&self, ip: &str) -> bool {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.interfaces.as_ref())
            .and_then(|ifaces| ifaces.data.as_ref())
            .map(|data| data.iface_ip.values().any(|candidate| candidate == ip))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_body_matches_qbert_fields() {
        let mut spec = ClusterSpec::new("demo");
        spec.master_vip_ipv4 = "10.0.0.100".to_string();
        spec.master_vip_iface = "eth0".to_string();
        spec.metallb_cidr = "10.0.0.200-10.0.0.220".to_string();

        let body = serde_json::to_value(CreateClusterRequest::new(&spec, "pool-1")).unwrap();

        assert_eq!(body["name"], "demo");
        assert_eq!(body["containersCidr"], "10.20.0.0/16");
        assert_eq!(body["servicesCidr"], "10.21.0.0/16");
        assert_eq!(body["masterVipIpv4"], "10.0.0.100");
        assert_eq!(body["masterVipIface"], "eth0");
        assert_eq!(body["metallbCidr"], "10.0.0.200-10.0.0.220");
        assert_eq!(body["enableMetallb"], true);
        assert_eq!(body["nodePoolUuid"], "pool-1");
        assert_eq!(body["masterless"], false);
        assert_eq!(body["runtimeConfig"], "");
        assert_eq!(body["networkPlugin"], "flannel");
        assert_eq!(body["allowWorkloadsOnMaster"], false);
        assert_eq!(body["tags"]["pf9-system:monitoring"], "true");
    }

    #[test]
    fn test_metallb_disabled_without_range() {
        let body =
            serde_json::to_value(CreateClusterRequest::new(&ClusterSpec::new("demo"), "p")).unwrap();
        assert_eq!(body["enableMetallb"], false);
    }

    #[test]
    fn test_attach_node_serialization() {
        let node = AttachNode {
            uuid: "u1".to_string(),
            is_master: true,
        };
        assert_eq!(
            serde_json::to_value(node).unwrap(),
            json!({"uuid": "u1", "isMaster": true})
        );
    }

    #[test]
    fn test_node_flags_accept_ints_and_bools() {
        let nodes: Vec<QbertNode> = serde_json::from_value(json!([
            {"clusterName": "demo", "isMaster": 1, "api_responding": 1, "status": "ok"},
            {"clusterName": "demo", "isMaster": true, "api_responding": false},
            {"uuid": "free-node"}
        ]))
        .unwrap();

        assert!(nodes[0].is_master.unwrap().is_set());
        assert!(nodes[0].api_responding.unwrap().is_set());
        assert!(nodes[1].is_master.unwrap().is_set());
        assert!(!nodes[1].api_responding.unwrap().is_set());
        assert!(nodes[2].cluster_name.is_none());
    }

    #[test]
    fn test_host_interface_lookup() {
        let hosts: Vec<Host> = serde_json::from_value(json!([
            {
                "id": "host-a",
                "extensions": {"interfaces": {"data": {"iface_ip": {"eth0": "10.0.0.5", "eth1": "192.168.1.5"}}}}
            },
            {"id": "host-b"},
            {"id": "host-c", "extensions": {}}
        ]))
        .unwrap();

        assert!(hosts[0].has_ip("192.168.1.5"));
        assert!(!hosts[0].has_ip("10.0.0.9"));
        assert!(!hosts[1].has_ip("10.0.0.5"));
        assert!(!hosts[2].has_ip("10.0.0.5"));
    }
}
