//! Snapshot fixtures shared by the unit tests

use crate::models::*;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;

pub const GIB: u64 = 1024 * 1024 * 1024;

pub fn captured_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn node(name: &str) -> NodeBuilder {
    NodeBuilder {
        node: Node {
            name: name.to_string(),
            labels: BTreeMap::new(),
            allocatable: Some(NodeResources {
                cpu_millicores: 4000,
                memory_bytes: 16 * GIB,
                storage_bytes: 100 * GIB,
                gpu: None,
            }),
            conditions: vec![NodeCondition {
                kind: NodeConditionType::Ready,
                status: true,
            }],
        },
    }
}

pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn not_ready(mut self) -> Self {
        self.node.conditions.retain(|c| c.kind != NodeConditionType::Ready);
        self.node.conditions.push(NodeCondition {
            kind: NodeConditionType::Ready,
            status: false,
        });
        self
    }

    fn condition(mut self, kind: NodeConditionType) -> Self {
        self.node.conditions.push(NodeCondition { kind, status: true });
        self
    }

    pub fn memory_pressure(self) -> Self {
        self.condition(NodeConditionType::MemoryPressure)
    }

    pub fn disk_pressure(self) -> Self {
        self.condition(NodeConditionType::DiskPressure)
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.node.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn instance_type(self, instance_type: &str) -> Self {
        self.label(labels::INSTANCE_TYPE, instance_type)
    }

    pub fn region(self, region: &str) -> Self {
        self.label(labels::REGION, region)
    }

    pub fn allocatable(mut self, cpu_millicores: u64, memory_bytes: u64, storage_bytes: u64) -> Self {
        let gpu = self.node.allocatable.take().and_then(|a| a.gpu);
        self.node.allocatable = Some(NodeResources {
            cpu_millicores,
            memory_bytes,
            storage_bytes,
            gpu,
        });
        self
    }

    pub fn no_allocatable(mut self) -> Self {
        self.node.allocatable = None;
        self
    }

    pub fn gpu(mut self, count: u32, model: &str) -> Self {
        if let Some(allocatable) = self.node.allocatable.as_mut() {
            allocatable.gpu = Some(GpuResources {
                count,
                model: model.to_string(),
            });
        }
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

pub fn pod(namespace: &str, name: &str) -> PodBuilder {
    PodBuilder {
        pod: Pod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            node_name: None,
            phase: PodPhase::Running,
            labels: BTreeMap::new(),
            created_at: captured_at() - Duration::days(1),
            containers: vec![Container {
                name: "main".to_string(),
                ..Default::default()
            }],
            volumes: Vec::new(),
        },
    }
}

pub struct PodBuilder {
    pod: Pod,
}

impl PodBuilder {
    pub fn phase(mut self, phase: PodPhase) -> Self {
        self.pod.phase = phase;
        self
    }

    pub fn on_node(mut self, node: &str) -> Self {
        self.pod.node_name = Some(node.to_string());
        self
    }

    pub fn crash_looping(mut self) -> Self {
        self.pod.containers[0].waiting_reason = Some(CRASH_LOOP_BACK_OFF.to_string());
        self
    }

    pub fn restarts(mut self, count: u32) -> Self {
        self.pod.containers[0].restart_count = count;
        self
    }

    pub fn requests(mut self, cpu_millicores: u64, memory_bytes: u64) -> Self {
        self.pod.containers[0].requests = ResourceRequests {
            cpu_millicores: Some(cpu_millicores),
            memory_bytes: Some(memory_bytes),
        };
        self
    }

    pub fn age_days(mut self, days: i64) -> Self {
        self.pod.created_at = captured_at() - Duration::days(days);
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.pod.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn config_map_volume(mut self, config_map: &str) -> Self {
        self.pod.volumes.push(Volume {
            name: format!("{}-vol", config_map),
            config_map: Some(config_map.to_string()),
        });
        self
    }

    pub fn config_map_env(mut self, config_map: &str) -> Self {
        self.pod.containers[0].config_map_refs.push(config_map.to_string());
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }
}

pub fn service(namespace: &str, name: &str) -> Service {
    let mut selector = BTreeMap::new();
    selector.insert("app".to_string(), name.to_string());
    Service {
        namespace: namespace.to_string(),
        name: name.to_string(),
        selector,
    }
}

pub fn config_map(namespace: &str, name: &str) -> ConfigMap {
    ConfigMap {
        namespace: namespace.to_string(),
        name: name.to_string(),
        created_at: captured_at() - Duration::days(30),
    }
}

/// Builds a snapshot of a healthy cluster, then applies deviations
#[derive(Clone)]
pub struct SnapshotBuilder {
    snapshot: ClusterSnapshot,
    /// Nodes and pods that get usage metrics on build
    metered_nodes: Vec<String>,
    metered_pods: Vec<(String, String)>,
    node_usage: (f64, f64),
    pod_usage_of_request: f64,
    pod_metrics: bool,
}

impl SnapshotBuilder {
    /// `nodes` ready nodes and `pods` running pods spread over them
    pub fn healthy_cluster(nodes: usize, pods: usize) -> Self {
        let node_list: Vec<Node> = (0..nodes)
            .map(|i| {
                node(&format!("node-{}", i))
                    .instance_type("m5.xlarge")
                    .region("us-east-1")
                    .build()
            })
            .collect();
        let pod_list: Vec<Pod> = (0..pods)
            .map(|i| {
                let mut builder = pod("default", &format!("app-{}", i)).requests(500, GIB);
                if nodes > 0 {
                    builder = builder.on_node(&format!("node-{}", i % nodes));
                }
                builder.build()
            })
            .collect();

        let system_pods = vec![
            pod(KUBE_SYSTEM, "kube-apiserver-master").build(),
            pod(KUBE_SYSTEM, "kube-controller-manager-master").build(),
            pod(KUBE_SYSTEM, "kube-scheduler-master").build(),
            pod(KUBE_SYSTEM, "etcd-master").build(),
            pod(KUBE_SYSTEM, "coredns-5d78c9869d-abcde").label("k8s-app", "kube-dns").build(),
            pod(KUBE_SYSTEM, "calico-node-x7k2p").label("k8s-app", "calico-node").build(),
        ];

        let mut ingress_labels = BTreeMap::new();
        ingress_labels.insert("app".to_string(), "ingress-nginx".to_string());

        let snapshot = ClusterSnapshot {
            captured_at: captured_at(),
            nodes: Some(node_list.clone()),
            pods: Some(pod_list.clone()),
            api_server: Some(ApiServerProbe {
                reachable: true,
                latency_ms: 25.0,
            }),
            system_pods: Some(system_pods),
            services: Some(vec![service("default", "web")]),
            endpoints: Some(vec![Endpoints {
                namespace: "default".to_string(),
                name: "web".to_string(),
                subsets: 1,
            }]),
            ingress_controllers: Some(vec![Deployment {
                namespace: "ingress-nginx".to_string(),
                name: "ingress-nginx-controller".to_string(),
                labels: ingress_labels,
                desired_replicas: 2,
                ready_replicas: 2,
            }]),
            network_policies: Some(Vec::new()),
            node_metrics: None,
            pod_metrics: None,
            config_maps: Some(Vec::new()),
            utilization_history: Vec::new(),
            usage_window: UsageWindow::default(),
        };

        Self {
            snapshot,
            metered_nodes: node_list.into_iter().map(|n| n.name).collect(),
            metered_pods: pod_list.into_iter().map(|p| (p.namespace, p.name)).collect(),
            node_usage: (0.5, 0.5),
            pod_usage_of_request: 0.5,
            pod_metrics: true,
        }
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.snapshot.nodes.get_or_insert_with(Vec::new).push(node);
        self
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.snapshot.pods.get_or_insert_with(Vec::new).push(pod);
        self
    }

    pub fn with_config_map(mut self, config_map: ConfigMap) -> Self {
        self.snapshot.config_maps.get_or_insert_with(Vec::new).push(config_map);
        self
    }

    /// Fraction of allocatable CPU and memory used on every metered node
    pub fn with_usage(mut self, cpu: f64, memory: f64) -> Self {
        self.node_usage = (cpu, memory);
        self
    }

    /// Fraction of their requests used by every metered pod
    pub fn with_pod_usage(mut self, fraction: f64) -> Self {
        self.pod_usage_of_request = fraction;
        self
    }

    pub fn without_pod_metrics(mut self) -> Self {
        self.pod_metrics = false;
        self
    }

    pub fn build(self) -> ClusterSnapshot {
        let mut snapshot = self.snapshot;
        let nodes = snapshot.nodes.clone().unwrap_or_default();
        let pods = snapshot.pods.clone().unwrap_or_default();

        snapshot.node_metrics = Some(
            nodes
                .iter()
                .filter(|n| self.metered_nodes.contains(&n.name))
                .filter_map(|n| {
                    n.allocatable.as_ref().map(|a| NodeMetrics {
                        name: n.name.clone(),
                        usage: ResourceUsage {
                            cpu_millicores: (a.cpu_millicores as f64 * self.node_usage.0) as u64,
                            memory_bytes: (a.memory_bytes as f64 * self.node_usage.1) as u64,
                        },
                    })
                })
                .collect(),
        );

        if self.pod_metrics {
            snapshot.pod_metrics = Some(
                pods.iter()
                    .filter(|p| {
                        self.metered_pods
                            .iter()
                            .any(|(ns, name)| *ns == p.namespace && *name == p.name)
                    })
                    .map(|p| PodMetrics {
                        namespace: p.namespace.clone(),
                        name: p.name.clone(),
                        usage: ResourceUsage {
                            cpu_millicores: (p.cpu_request().unwrap_or(0) as f64
                                * self.pod_usage_of_request) as u64,
                            memory_bytes: (p.memory_request().unwrap_or(0) as f64
                                * self.pod_usage_of_request) as u64,
                        },
                    })
                    .collect(),
            );
        }

        snapshot
    }
}
