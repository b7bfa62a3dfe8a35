// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The coordinator: owns the four change trackers and authoritative maps,
//! tracks readiness across the watches, and drives the bounded-frequency
//! reconcile that walks node-local pods and runs renderer → generator →
//! actuator per interface.

use crate::error::AgentError;
use crate::options::Options;
use crate::podrules::PodRulesDir;
use crate::runner::BoundedFrequencyRunner;
use crate::sriov::{RepresentorResolver, SysfsResolver};
use crate::utils::{get_hostname, node_names_match};
use crate::watch::{watch_resource, WatchHandler};
use controllers::{
    NamespaceChangeTracker, NamespaceMap, NetDefChangeTracker, PodChangeTracker, PodInfo, PodMap,
    PolicyChangeTracker, PolicyMap,
};
use k8s_api::{MultiNetworkPolicy, NetworkAttachmentDefinition};
use k8s_openapi::api::core::v1::{Namespace, ObjectReference, Pod};
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Config};
use policyrules::{PolicyRuleSet, Renderer};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tc::{Actuator, SimpleGenerator, TcCmdline, TcDriver, TcDriverKind, TcNetlink};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SYNC_PERIOD: Duration = Duration::from_secs(30);
const MIN_SYNC_PERIOD: Duration = Duration::ZERO;
const BURST_SYNCS: u32 = 2;
const INIT_POLL_PERIOD: Duration = Duration::from_millis(500);

/// The authoritative cluster maps, owned by the reconciler and mutated only
/// under this lock.
#[derive(Default)]
struct ClusterState {
    pod_map: PodMap,
    policy_map: PolicyMap,
    namespace_map: NamespaceMap,
}

#[derive(Default)]
struct SyncFlags {
    pod: bool,
    policy: bool,
    netdef: bool,
    namespace: bool,
}

impl SyncFlags {
    fn all(&self) -> bool {
        self.pod && self.policy && self.netdef && self.namespace
    }

    fn all_but_pods(&self) -> bool {
        self.policy && self.netdef && self.namespace
    }
}

pub struct Server {
    options: Options,
    hostname: String,
    client: Client,

    pod_changes: PodChangeTracker,
    policy_changes: PolicyChangeTracker,
    netdef_changes: Arc<NetDefChangeTracker>,
    ns_changes: NamespaceChangeTracker,
    state: tokio::sync::Mutex<ClusterState>,

    flags: Mutex<SyncFlags>,
    initialized: AtomicBool,
    // one-shot gate releasing the pod watch once the other caches synced
    pod_gate: watch::Sender<bool>,

    runner: BoundedFrequencyRunner,
    renderer: Renderer,
    generator: SimpleGenerator,
    resolver: Box<dyn RepresentorResolver>,
    pod_rules: Option<PodRulesDir>,
}

impl Server {
    /// Builds the server: API client, hostname, rules directory and the
    /// tracker/map pairs. Failures here are fatal.
    ///
    /// # Errors
    ///
    /// Returns an error when the kube configuration, client or rules
    /// directory cannot be set up.
    pub async fn new(options: Options) -> Result<Self, AgentError> {
        let mut config = match &options.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|err| AgentError::KubeConfig(err.to_string()))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|err| AgentError::KubeConfig(err.to_string()))?
            }
            None => {
                info!("no kubeconfig given, falling back to in-cluster or default config");
                Config::infer()
                    .await
                    .map_err(|err| AgentError::KubeConfig(err.to_string()))?
            }
        };
        if let Some(master) = &options.master {
            config.cluster_url = master
                .parse()
                .map_err(|err| AgentError::KubeConfig(format!("bad master URL: {err}")))?;
        }
        let client = Client::try_from(config)?;

        let hostname = get_hostname(options.hostname_override.as_deref())?;

        let pod_rules = match &options.pod_rules_path {
            Some(path) => {
                let rules = PodRulesDir::new(path);
                rules.ensure().await?;
                Some(rules)
            }
            None => None,
        };

        let netdef_changes = Arc::new(NetDefChangeTracker::new());
        let pod_changes =
            PodChangeTracker::new(options.network_plugins.clone(), netdef_changes.clone());

        Ok(Self {
            hostname,
            client,
            pod_changes,
            policy_changes: PolicyChangeTracker::new(),
            netdef_changes,
            ns_changes: NamespaceChangeTracker::new(),
            state: tokio::sync::Mutex::new(ClusterState::default()),
            flags: Mutex::new(SyncFlags::default()),
            initialized: AtomicBool::new(false),
            pod_gate: watch::Sender::new(false),
            runner: BoundedFrequencyRunner::new(
                "sync-runner",
                MIN_SYNC_PERIOD,
                SYNC_PERIOD,
                BURST_SYNCS,
            ),
            renderer: Renderer::new(),
            generator: SimpleGenerator::new(),
            resolver: Box::new(SysfsResolver::new()),
            pod_rules,
            options,
        })
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Runs watches and the reconcile loop until cancellation.
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) {
        let client = self.client.clone();

        tokio::spawn(watch_resource(
            Api::<Namespace>::all(client.clone()),
            self.clone(),
            cancel.child_token(),
        ));
        tokio::spawn(watch_resource(
            Api::<MultiNetworkPolicy>::all(client.clone()),
            self.clone(),
            cancel.child_token(),
        ));
        tokio::spawn(watch_resource(
            Api::<NetworkAttachmentDefinition>::all(client.clone()),
            self.clone(),
            cancel.child_token(),
        ));

        // the pod watch starts only once every other cache has synced, so
        // pod interface resolution never races a half-populated netdef map
        {
            let server = self.clone();
            let pod_cancel = cancel.child_token();
            let client = client.clone();
            tokio::spawn(async move {
                let mut gate = server.pod_gate.subscribe();
                tokio::select! {
                    () = pod_cancel.cancelled() => return,
                    released = gate.wait_for(|ready| *ready) => {
                        if released.is_err() {
                            return;
                        }
                    }
                }
                info!("starting pod watch");
                watch_resource(Api::<Pod>::all(client), server, pod_cancel).await;
            });
        }

        self.birth_cry().await;
        self.sync_loop(&cancel).await;
    }

    /// Blocks until all caches synced, then serializes reconciles through
    /// the bounded-frequency runner.
    async fn sync_loop(self: &Arc<Self>, cancel: &CancellationToken) {
        info!("sync loop waiting for initialization");
        loop {
            if self.is_initialized() {
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(INIT_POLL_PERIOD) => {}
            }
        }
        info!("starting sync runner");
        self.request_sync();
        let server = self.clone();
        self.runner
            .run_loop(cancel, move || {
                let server = server.clone();
                async move { server.sync_multi_policy().await }
            })
            .await;
    }

    fn request_sync(&self) {
        self.runner.request();
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn update_readiness(&self, flags: &SyncFlags) {
        self.initialized.store(flags.all(), Ordering::Release);
        if flags.all_but_pods() {
            self.pod_gate.send_replace(true);
        }
    }

    /// Posts a "Started" event against this node.
    async fn birth_cry(&self) {
        info!("started multinet-tc");
        let recorder = Recorder::new(
            self.client.clone(),
            Reporter {
                controller: "multinet-tc".into(),
                instance: Some(self.hostname.clone()),
            },
        );
        let node_ref = ObjectReference {
            kind: Some("Node".to_owned()),
            name: Some(self.hostname.clone()),
            uid: Some(self.hostname.clone()),
            ..ObjectReference::default()
        };
        let event = Event {
            type_: EventType::Normal,
            reason: "Started".to_owned(),
            note: Some("Started multinet-tc".to_owned()),
            action: "Starting".to_owned(),
            secondary: None,
        };
        if let Err(err) = recorder.publish(&event, &node_ref).await {
            warn!(%err, "failed to publish start event");
        }
    }

    /// One reconcile pass: fold every tracked delta into the maps, then
    /// walk node-local pods and converge each interface's TC state.
    async fn sync_multi_policy(&self) {
        debug!("reconciling multi-network policies");
        let mut state = self.state.lock().await;
        let ClusterState {
            pod_map,
            policy_map,
            namespace_map,
        } = &mut *state;

        self.ns_changes.apply(namespace_map);
        self.pod_changes.apply(pod_map);
        self.policy_changes.apply(policy_map);

        let pod_keys: Vec<controllers::NamespacedName> = pod_map.keys().cloned().collect();
        let mut pods_with_rules: HashSet<String> = HashSet::new();

        for key in pod_keys {
            let Some(snapshot) = pod_map.get(&key) else {
                continue;
            };
            if !node_names_match(&self.hostname, &snapshot.node_name) {
                debug!(pod = %key, "pod not scheduled on this node, skipping");
                continue;
            }

            // fold in anything that changed while this pass was running
            self.pod_changes.apply(pod_map);
            let Some(pod_info) = pod_map.get(&key).cloned() else {
                debug!(pod = %key, "pod vanished mid-pass, skipping");
                continue;
            };
            if pod_info.interfaces.is_empty() {
                debug!(pod = %key, "pod has no secondary interfaces, skipping");
                continue;
            }

            info!(pod = %key, "syncing policy for pod");
            let rule_sets =
                match self
                    .renderer
                    .render_egress(&pod_info, policy_map, pod_map, namespace_map)
                {
                    Ok(rule_sets) => rule_sets,
                    Err(err) => {
                        error!(pod = %key, %err, "failed to render egress policy rules, skipping");
                        continue;
                    }
                };
            pods_with_rules.insert(pod_info.uid.clone());

            for rule_set in &rule_sets {
                if let Err(err) = self.apply_rule_set(&pod_info, rule_set).await {
                    error!(
                        pod = %key,
                        network = rule_set.ifc_info.network.as_str(),
                        interface = rule_set.ifc_info.interface_name.as_str(),
                        %err,
                        "failed to apply rule set, skipping interface"
                    );
                }
            }
        }

        if let Some(pod_rules) = &self.pod_rules {
            pod_rules.prune(&pods_with_rules).await;
        }
    }

    /// Converges one interface: representor lookup, TC generation,
    /// actuation, optional rules dump.
    async fn apply_rule_set(
        &self,
        pod_info: &PodInfo,
        rule_set: &PolicyRuleSet,
    ) -> Result<(), AgentError> {
        debug!(
            network = rule_set.ifc_info.network.as_str(),
            interface = rule_set.ifc_info.interface_name.as_str(),
            "processing policy rule set"
        );
        let representor = self.resolver.vf_representor(&rule_set.ifc_info.device_id)?;
        let objects = self.generator.generate(rule_set)?;

        let driver = self.driver_for(&representor).await?;
        Actuator::new(driver).actuate(&objects).await?;
        debug!(representor = representor.as_str(), "rule set applied");

        if let Some(pod_rules) = &self.pod_rules {
            pod_rules
                .save(
                    &pod_info.uid,
                    &rule_set.ifc_info.network,
                    &representor,
                    &objects,
                )
                .await?;
        }
        Ok(())
    }

    async fn driver_for(&self, representor: &str) -> Result<TcDriver, AgentError> {
        match self.options.tc_driver {
            TcDriverKind::Cmdline => Ok(TcDriver::Cmdline(TcCmdline::new(representor))),
            TcDriverKind::Netlink => {
                let (connection, handle, _) = rtnetlink::new_connection()?;
                tokio::spawn(connection);
                Ok(TcDriver::Netlink(TcNetlink::new(handle, representor).await?))
            }
        }
    }
}

impl WatchHandler<Pod> for Arc<Server> {
    fn on_change(&self, previous: Option<&Pod>, current: Option<&Pod>) {
        let synced = self.flags.lock().expect("sync state lock poisoned").pod;
        if self.pod_changes.update(previous, current) && synced {
            self.request_sync();
        }
    }

    fn on_synced(&self) {
        info!("pod cache synced");
        let mut flags = self.flags.lock().expect("sync state lock poisoned");
        flags.pod = true;
        self.update_readiness(&flags);
    }
}

impl WatchHandler<MultiNetworkPolicy> for Arc<Server> {
    fn on_change(&self, previous: Option<&MultiNetworkPolicy>, current: Option<&MultiNetworkPolicy>) {
        if self.policy_changes.update(previous, current) && self.is_initialized() {
            self.request_sync();
        }
    }

    fn on_synced(&self) {
        info!("policy cache synced");
        let mut flags = self.flags.lock().expect("sync state lock poisoned");
        flags.policy = true;
        self.update_readiness(&flags);
    }
}

impl WatchHandler<NetworkAttachmentDefinition> for Arc<Server> {
    fn on_change(
        &self,
        previous: Option<&NetworkAttachmentDefinition>,
        current: Option<&NetworkAttachmentDefinition>,
    ) {
        if self.netdef_changes.update(previous, current) && self.is_initialized() {
            self.request_sync();
        }
    }

    fn on_synced(&self) {
        info!("net-attach-def cache synced");
        let mut flags = self.flags.lock().expect("sync state lock poisoned");
        flags.netdef = true;
        self.update_readiness(&flags);
    }
}

impl WatchHandler<Namespace> for Arc<Server> {
    fn on_change(&self, previous: Option<&Namespace>, current: Option<&Namespace>) {
        if self.ns_changes.update(previous, current) && self.is_initialized() {
            self.request_sync();
        }
    }

    fn on_synced(&self) {
        info!("namespace cache synced");
        let mut flags = self.flags.lock().expect("sync state lock poisoned");
        flags.namespace = true;
        self.update_readiness(&flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_all_caches() {
        let mut flags = SyncFlags::default();
        assert!(!flags.all());
        assert!(!flags.all_but_pods());

        flags.policy = true;
        flags.netdef = true;
        flags.namespace = true;
        assert!(flags.all_but_pods());
        assert!(!flags.all());

        flags.pod = true;
        assert!(flags.all());
    }
}
