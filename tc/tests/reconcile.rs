// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end exercises of the generator → actuator pipeline against a fake
//! kernel: a driver that models qdisc/chain/filter state the way the real
//! TC subsystem behaves (chain 0 appears with the first filter, chain
//! deletion flushes filters, qdisc deletion cascades).

use ipnet::IpNet;
use policyrules::{IfcInfo, PolicyAction, PolicyKind, PolicyRuleSet, Port, PortProtocol, Rule};
use std::sync::Mutex;
use tc::filterset::FilterSet;
use tc::types::{
    Action, Chain, ChainBuilder, ControlAction, FilterAttrs, FilterProtocol, FlowerFilter,
    FlowerFilterBuilder, Qdisc, CHAIN_DEFAULT_CHAIN,
};
use tc::{Actuator, Objects, SimpleGenerator, TcApi, TcError};

/// A minimal in-memory model of one netdev's TC state.
#[derive(Default)]
struct FakeKernel {
    ingress: Mutex<bool>,
    filters: Mutex<Vec<FlowerFilter>>,
    writes: Mutex<usize>,
}

impl FakeKernel {
    fn write(&self) {
        *self.writes.lock().unwrap() += 1;
    }

    fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    fn reset_writes(&self) {
        *self.writes.lock().unwrap() = 0;
    }

    fn filter_set(&self) -> FilterSet {
        self.filters.lock().unwrap().clone().into_iter().collect()
    }

    fn install_out_of_band(&self, filter: FlowerFilter) {
        self.filters.lock().unwrap().push(filter);
    }
}

impl TcApi for &FakeKernel {
    async fn qdisc_add(&self, _qdisc: &Qdisc) -> Result<(), TcError> {
        self.write();
        *self.ingress.lock().unwrap() = true;
        Ok(())
    }

    async fn qdisc_del(&self, _qdisc: &Qdisc) -> Result<(), TcError> {
        self.write();
        *self.ingress.lock().unwrap() = false;
        self.filters.lock().unwrap().clear();
        Ok(())
    }

    async fn qdisc_list(&self) -> Result<Vec<Qdisc>, TcError> {
        if *self.ingress.lock().unwrap() {
            Ok(vec![Qdisc::ingress()])
        } else {
            Ok(vec![])
        }
    }

    async fn filter_add(&self, _qdisc: &Qdisc, filter: &FlowerFilter) -> Result<(), TcError> {
        self.write();
        self.filters.lock().unwrap().push(filter.clone());
        Ok(())
    }

    async fn filter_del(&self, _qdisc: &Qdisc, attrs: &FilterAttrs) -> Result<(), TcError> {
        self.write();
        self.filters.lock().unwrap().retain(|f| &f.attrs != attrs);
        Ok(())
    }

    async fn filter_list(&self, _qdisc: &Qdisc) -> Result<Vec<FlowerFilter>, TcError> {
        Ok(self.filters.lock().unwrap().clone())
    }

    async fn chain_add(&self, _qdisc: &Qdisc, _chain: &Chain) -> Result<(), TcError> {
        self.write();
        Ok(())
    }

    async fn chain_del(&self, _qdisc: &Qdisc, chain: &Chain) -> Result<(), TcError> {
        self.write();
        if chain.chain == Some(CHAIN_DEFAULT_CHAIN) {
            self.filters.lock().unwrap().clear();
        }
        Ok(())
    }

    async fn chain_list(&self, _qdisc: &Qdisc) -> Result<Vec<Chain>, TcError> {
        // chain 0 exists as soon as any filter does
        if self.filters.lock().unwrap().is_empty() {
            Ok(vec![])
        } else {
            Ok(vec![ChainBuilder::new().chain(CHAIN_DEFAULT_CHAIN).build()])
        }
    }
}

fn rule_set(rules: Option<Vec<Rule>>) -> PolicyRuleSet {
    PolicyRuleSet {
        ifc_info: IfcInfo {
            network: "default/accel-net".to_owned(),
            interface_name: "net1".to_owned(),
            ips: vec!["192.168.1.2".parse().unwrap()],
            device_id: "0000:03:00.4".to_owned(),
        },
        kind: PolicyKind::Egress,
        rules,
    }
}

fn ip_block_rules() -> Vec<Rule> {
    let ports = vec![
        Port {
            protocol: PortProtocol::Tcp,
            number: 6666,
        },
        Port {
            protocol: PortProtocol::Udp,
            number: 7777,
        },
        Port {
            protocol: PortProtocol::Tcp,
            number: 8888,
        },
    ];
    vec![
        Rule {
            ip_cidrs: vec!["10.17.0.0/16".parse::<IpNet>().unwrap()],
            ports: ports.clone(),
            action: PolicyAction::Pass,
        },
        Rule {
            ip_cidrs: vec!["10.17.0.0/24".parse::<IpNet>().unwrap()],
            ports,
            action: PolicyAction::Drop,
        },
    ]
}

async fn converge(kernel: &FakeKernel, objects: &Objects) {
    Actuator::new(kernel).actuate(objects).await.unwrap();
}

#[tokio::test]
async fn pipeline_installs_the_generated_program() {
    let kernel = FakeKernel::default();
    let objects = SimpleGenerator::new()
        .generate(&rule_set(Some(ip_block_rules())))
        .unwrap();

    converge(&kernel, &objects).await;

    assert!(*kernel.ingress.lock().unwrap());
    let desired: FilterSet = objects.filters.iter().cloned().collect();
    assert_eq!(kernel.filter_set(), desired);
    // 4 default-drop + 6 pass + 6 drop
    assert_eq!(kernel.filter_set().len(), 16);
}

#[tokio::test]
async fn second_actuation_is_a_pure_read() {
    let kernel = FakeKernel::default();
    let objects = SimpleGenerator::new()
        .generate(&rule_set(Some(ip_block_rules())))
        .unwrap();

    converge(&kernel, &objects).await;
    kernel.reset_writes();
    converge(&kernel, &objects).await;
    assert_eq!(kernel.writes(), 0);
}

#[tokio::test]
async fn policy_change_converges_via_set_difference() {
    let kernel = FakeKernel::default();
    let generator = SimpleGenerator::new();

    let initial = generator.generate(&rule_set(Some(ip_block_rules()))).unwrap();
    converge(&kernel, &initial).await;

    // the policy shrinks to default-deny: only the baseline must remain
    let deny_only = generator.generate(&rule_set(Some(vec![]))).unwrap();
    kernel.reset_writes();
    converge(&kernel, &deny_only).await;

    let desired: FilterSet = deny_only.filters.iter().cloned().collect();
    assert_eq!(kernel.filter_set(), desired);
    assert_eq!(kernel.filter_set().len(), 4);
    // 12 obsolete filters deleted, baseline untouched
    assert_eq!(kernel.writes(), 12);
}

#[tokio::test]
async fn out_of_band_edits_self_heal() {
    let kernel = FakeKernel::default();
    let objects = SimpleGenerator::new()
        .generate(&rule_set(Some(vec![])))
        .unwrap();
    converge(&kernel, &objects).await;

    // someone added a stray pass-all filter behind our back
    kernel.install_out_of_band(
        FlowerFilterBuilder::new()
            .protocol(FilterProtocol::Ipv4)
            .priority(1)
            .action(Action::Generic(ControlAction::Pass))
            .build(),
    );

    converge(&kernel, &objects).await;
    let desired: FilterSet = objects.filters.iter().cloned().collect();
    assert_eq!(kernel.filter_set(), desired);
}

#[tokio::test]
async fn losing_all_policies_flushes_chain_zero() {
    let kernel = FakeKernel::default();
    let generator = SimpleGenerator::new();

    converge(
        &kernel,
        &generator.generate(&rule_set(Some(ip_block_rules()))).unwrap(),
    )
    .await;
    assert!(!kernel.filter_set().is_empty());

    // no applicable policy at all: rules are None
    let unrestricted = generator.generate(&rule_set(None)).unwrap();
    converge(&kernel, &unrestricted).await;
    assert!(kernel.filter_set().is_empty());
    // the qdisc itself stays
    assert!(*kernel.ingress.lock().unwrap());
}

#[tokio::test]
async fn removing_the_program_removes_the_qdisc() {
    let kernel = FakeKernel::default();
    converge(
        &kernel,
        &SimpleGenerator::new()
            .generate(&rule_set(Some(vec![])))
            .unwrap(),
    )
    .await;

    converge(
        &kernel,
        &Objects {
            qdisc: None,
            filters: vec![],
        },
    )
    .await;
    assert!(!*kernel.ingress.lock().unwrap());
    assert!(kernel.filter_set().is_empty());
}

#[tokio::test]
async fn ingress_rule_sets_never_reach_the_kernel() {
    let kernel = FakeKernel::default();
    let mut ingress = rule_set(Some(vec![]));
    ingress.kind = PolicyKind::Ingress;

    let err = SimpleGenerator::new().generate(&ingress).unwrap_err();
    assert!(matches!(err, TcError::UnsupportedPolicyKind(PolicyKind::Ingress)));
    assert_eq!(kernel.writes(), 0);
}
