//! Cluster-data collaborator and the built-in read-only tools over it.
//!
//! [`ClusterData`] is the seam to a live cluster. [`SnapshotCluster`] serves
//! a JSON snapshot file so the agent runs without cluster access.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use opsrag_core::error::Error;
use opsrag_core::types::ToolArgs;

use crate::tools::{ParamSpec, Tool, ToolRegistry};

pub const DEFAULT_LOG_TAIL: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub status: String,
    #[serde(default)]
    pub ready: String,
    #[serde(default)]
    pub restarts: u32,
    #[serde(default)]
    pub node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub available_replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(default)]
    pub cluster_ip: String,
    #[serde(default)]
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    #[serde(default = "active")]
    pub status: String,
}

fn active() -> String {
    "Active".into()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub nodes: usize,
    pub ready_nodes: usize,
    pub namespaces: usize,
    pub pods: usize,
    pub pods_by_status: BTreeMap<String, usize>,
    pub deployments: usize,
    pub services: usize,
}

/// Read access to cluster state. `namespace = None` means all namespaces.
#[async_trait]
pub trait ClusterData: Send + Sync {
    async fn pods(&self, namespace: Option<&str>) -> Result<Vec<PodInfo>>;
    async fn nodes(&self) -> Result<Vec<NodeInfo>>;
    async fn deployments(&self, namespace: Option<&str>) -> Result<Vec<DeploymentInfo>>;
    async fn services(&self, namespace: Option<&str>) -> Result<Vec<ServiceInfo>>;
    async fn namespaces(&self) -> Result<Vec<NamespaceInfo>>;
    async fn pod_logs(&self, namespace: &str, pod: &str, tail: usize) -> Result<Vec<String>>;
    async fn summary(&self) -> Result<ClusterSummary>;
}

/// On-disk snapshot layout. Logs are keyed by `namespace/pod`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSnapshot {
    pub pods: Vec<PodInfo>,
    pub nodes: Vec<NodeInfo>,
    pub deployments: Vec<DeploymentInfo>,
    pub services: Vec<ServiceInfo>,
    pub namespaces: Vec<NamespaceInfo>,
    pub logs: BTreeMap<String, Vec<String>>,
}

pub struct SnapshotCluster {
    snapshot: ClusterSnapshot,
}

impl SnapshotCluster {
    pub fn new(snapshot: ClusterSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::NotFound(format!("cluster snapshot {}: {e}", path.display())))?;
        let snapshot: ClusterSnapshot = serde_json::from_str(&raw)
            .map_err(|e| Error::InvalidConfig(format!("cluster snapshot {}: {e}", path.display())))?;
        info!(path = %path.display(), pods = snapshot.pods.len(), nodes = snapshot.nodes.len(), "loaded cluster snapshot");
        Ok(Self::new(snapshot))
    }

    fn known_namespace(&self, namespace: Option<&str>) -> Result<()> {
        let Some(ns) = namespace else { return Ok(()) };
        let known = self.snapshot.namespaces.iter().any(|n| n.name == ns)
            || self.snapshot.pods.iter().any(|p| p.namespace == ns);
        if !known {
            bail!("namespace `{ns}` not found");
        }
        Ok(())
    }
}

fn in_namespace(item_ns: &str, namespace: Option<&str>) -> bool {
    namespace.map_or(true, |ns| ns == item_ns)
}

#[async_trait]
impl ClusterData for SnapshotCluster {
    async fn pods(&self, namespace: Option<&str>) -> Result<Vec<PodInfo>> {
        self.known_namespace(namespace)?;
        Ok(self.snapshot.pods.iter().filter(|p| in_namespace(&p.namespace, namespace)).cloned().collect())
    }

    async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        Ok(self.snapshot.nodes.clone())
    }

    async fn deployments(&self, namespace: Option<&str>) -> Result<Vec<DeploymentInfo>> {
        self.known_namespace(namespace)?;
        Ok(self.snapshot.deployments.iter().filter(|d| in_namespace(&d.namespace, namespace)).cloned().collect())
    }

    async fn services(&self, namespace: Option<&str>) -> Result<Vec<ServiceInfo>> {
        self.known_namespace(namespace)?;
        Ok(self.snapshot.services.iter().filter(|s| in_namespace(&s.namespace, namespace)).cloned().collect())
    }

    async fn namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        Ok(self.snapshot.namespaces.clone())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, tail: usize) -> Result<Vec<String>> {
        let Some(lines) = self.snapshot.logs.get(&format!("{namespace}/{pod}")) else {
            bail!("no logs for pod `{pod}` in namespace `{namespace}`");
        };
        let skip = lines.len().saturating_sub(tail);
        Ok(lines[skip..].to_vec())
    }

    async fn summary(&self) -> Result<ClusterSummary> {
        let s = &self.snapshot;
        let mut pods_by_status = BTreeMap::new();
        for p in &s.pods {
            *pods_by_status.entry(p.status.clone()).or_default() += 1;
        }
        Ok(ClusterSummary {
            nodes: s.nodes.len(),
            ready_nodes: s.nodes.iter().filter(|n| n.status == "Ready").count(),
            namespaces: s.namespaces.len(),
            pods: s.pods.len(),
            pods_by_status,
            deployments: s.deployments.len(),
            services: s.services.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterOp {
    Pods,
    Nodes,
    Deployments,
    Services,
    Namespaces,
    PodLogs,
    Summary,
}

const NAMESPACE: ParamSpec =
    ParamSpec { name: "namespace", required: false, description: "namespace to query; omit or `all` for every namespace" };

impl ClusterOp {
    pub const ALL: [ClusterOp; 7] = [
        ClusterOp::Pods,
        ClusterOp::Nodes,
        ClusterOp::Deployments,
        ClusterOp::Services,
        ClusterOp::Namespaces,
        ClusterOp::PodLogs,
        ClusterOp::Summary,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ClusterOp::Pods => "get_pods",
            ClusterOp::Nodes => "get_nodes",
            ClusterOp::Deployments => "get_deployments",
            ClusterOp::Services => "get_services",
            ClusterOp::Namespaces => "get_namespaces",
            ClusterOp::PodLogs => "get_pod_logs",
            ClusterOp::Summary => "get_cluster_summary",
        }
    }

    fn description(self) -> &'static str {
        match self {
            ClusterOp::Pods => "List pods with status, readiness and restart counts.",
            ClusterOp::Nodes => "List nodes with status, roles and kubelet version.",
            ClusterOp::Deployments => "List deployments with desired, ready and available replicas.",
            ClusterOp::Services => "List services with type, cluster IP and ports.",
            ClusterOp::Namespaces => "List namespaces.",
            ClusterOp::PodLogs => "Fetch the most recent log lines of a pod.",
            ClusterOp::Summary => "Counts of nodes, pods by status, deployments and services.",
        }
    }

    fn params(self) -> &'static [ParamSpec] {
        const POD_LOGS: [ParamSpec; 3] = [
            ParamSpec { name: "pod", required: true, description: "pod name" },
            ParamSpec { name: "namespace", required: false, description: "pod namespace, default `default`" },
            ParamSpec { name: "tail", required: false, description: "number of lines, default 100" },
        ];
        match self {
            ClusterOp::Pods | ClusterOp::Deployments | ClusterOp::Services => std::slice::from_ref(&NAMESPACE),
            ClusterOp::PodLogs => &POD_LOGS,
            ClusterOp::Nodes | ClusterOp::Namespaces | ClusterOp::Summary => &[],
        }
    }
}

/// One cluster capability exposed as a tool.
pub struct ClusterTool {
    op: ClusterOp,
    data: Arc<dyn ClusterData>,
}

impl ClusterTool {
    pub fn new(op: ClusterOp, data: Arc<dyn ClusterData>) -> Self {
        Self { op, data }
    }
}

fn namespace_arg(args: &ToolArgs) -> Option<String> {
    args.get("namespace")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|ns| !ns.is_empty() && !ns.eq_ignore_ascii_case("all"))
        .map(str::to_string)
}

fn scope(namespace: Option<&str>) -> &str {
    namespace.unwrap_or("all")
}

#[async_trait]
impl Tool for ClusterTool {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn description(&self) -> &str {
        self.op.description()
    }

    fn params(&self) -> &[ParamSpec] {
        self.op.params()
    }

    async fn call(&self, args: &ToolArgs) -> Result<Value> {
        let ns = namespace_arg(args);
        let ns = ns.as_deref();
        let payload = match self.op {
            ClusterOp::Pods => json!({ "namespace": scope(ns), "pods": self.data.pods(ns).await? }),
            ClusterOp::Nodes => json!({ "nodes": self.data.nodes().await? }),
            ClusterOp::Deployments => {
                json!({ "namespace": scope(ns), "deployments": self.data.deployments(ns).await? })
            }
            ClusterOp::Services => json!({ "namespace": scope(ns), "services": self.data.services(ns).await? }),
            ClusterOp::Namespaces => json!({ "namespaces": self.data.namespaces().await? }),
            ClusterOp::PodLogs => {
                let pod = args.get("pod").and_then(|v| v.as_str()).unwrap_or_default();
                let ns = ns.unwrap_or("default");
                let tail = args
                    .get("tail")
                    .and_then(|v| v.as_i64())
                    .and_then(|t| usize::try_from(t).ok())
                    .filter(|t| *t > 0)
                    .unwrap_or(DEFAULT_LOG_TAIL);
                let lines = self.data.pod_logs(ns, pod, tail).await?;
                json!({ "namespace": ns, "pod": pod, "lines": lines })
            }
            ClusterOp::Summary => serde_json::to_value(self.data.summary().await?)?,
        };
        Ok(payload)
    }
}

/// Registers every cluster tool against `data`.
pub fn register_cluster_tools(registry: &mut ToolRegistry, data: Arc<dyn ClusterData>) {
    for op in ClusterOp::ALL {
        registry.register(Arc::new(ClusterTool::new(op, Arc::clone(&data))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsrag_core::types::{ArgValue, ToolRequest};

    fn snapshot() -> ClusterSnapshot {
        serde_json::from_value(json!({
            "namespaces": [{ "name": "default" }, { "name": "kube-system" }],
            "nodes": [{ "name": "minikube", "status": "Ready", "roles": ["control-plane"], "version": "v1.30.0" }],
            "pods": [
                { "name": "web-1", "namespace": "default", "status": "Running", "ready": "1/1" },
                { "name": "worker-1", "namespace": "default", "status": "CrashLoopBackOff", "ready": "0/1", "restarts": 12 },
                { "name": "coredns", "namespace": "kube-system", "status": "Running", "ready": "1/1" }
            ],
            "logs": { "default/worker-1": ["a", "b", "c"] }
        }))
        .unwrap()
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        register_cluster_tools(&mut r, Arc::new(SnapshotCluster::new(snapshot())));
        r
    }

    #[tokio::test]
    async fn pods_are_filtered_by_namespace() {
        let r = registry();
        let all = r.dispatch(&ToolRequest::new("get_pods")).await;
        assert_eq!(all.payload().unwrap()["pods"].as_array().unwrap().len(), 3);

        let req = ToolRequest::new("get_pods").with_arg("namespace", ArgValue::Str("kube-system".into()));
        let system = r.dispatch(&req).await;
        assert_eq!(system.payload().unwrap()["pods"][0]["name"], "coredns");

        let req = ToolRequest::new("get_pods").with_arg("namespace", ArgValue::Str("nope".into()));
        assert!(r.dispatch(&req).await.error_reason().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn logs_are_tailed_and_require_a_pod() {
        let r = registry();
        let req = ToolRequest::new("get_pod_logs")
            .with_arg("pod", ArgValue::Str("worker-1".into()))
            .with_arg("tail", ArgValue::Int(2));
        assert_eq!(r.dispatch(&req).await.payload().unwrap()["lines"], json!(["b", "c"]));
        assert!(!r.dispatch(&ToolRequest::new("get_pod_logs")).await.is_ok());
    }

    #[tokio::test]
    async fn summary_counts_pods_by_status() {
        let summary = SnapshotCluster::new(snapshot()).summary().await.unwrap();
        assert_eq!(summary.pods, 3);
        assert_eq!(summary.ready_nodes, 1);
        assert_eq!(summary.pods_by_status.get("Running"), Some(&2));
        assert_eq!(registry().names().len(), 7);
    }
}
