// Host-port forwarding: PREROUTING/OUTPUT -> hostports chain -> one DNAT chain per mapping

use anyhow::{Context, Result};
use hp_core::{HostportConfig, PodPortMapping, PortMapping};
use ipnet::IpNet;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::iface::{
    CHAIN_OUTPUT, CHAIN_POSTROUTING, CHAIN_PREROUTING, FlushFlag, Iptables, RestoreCountersFlag,
    RulePosition, TABLE_NAT,
};

const MAPPING_CHAIN_PREFIX: &str = "CRIO-HP-";

/// Name of the per-mapping nat chain for `mapping` of `pod`.
pub fn mapping_chain_name(pod: &PodPortMapping, mapping: &PortMapping) -> String {
    let mut key = format!(
        "{}|{}|{}",
        pod.full_name(),
        mapping.protocol,
        mapping.host_port
    );
    if let Some(ip) = mapping.host_ip {
        let _ = write!(key, "|{}", ip);
    }

    let digest = Sha256::digest(key.as_bytes());
    let hash: String = digest[..8].iter().map(|b| format!("{:02X}", b)).collect();
    format!("{}{}", MAPPING_CHAIN_PREFIX, hash)
}

fn mapping_comment(pod_name: &str, host_port: u16) -> String {
    format!("{} hostport {}", pod_name, host_port)
}

fn dnat_destination(ip: &IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}:{}", v4, port),
        IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
    }
}

pub struct HostportManager<'a> {
    ipt: &'a mut dyn Iptables,
    config: &'a HostportConfig,
}

impl<'a> HostportManager<'a> {
    pub fn new(ipt: &'a mut dyn Iptables, config: &'a HostportConfig) -> Self {
        Self { ipt, config }
    }

    fn family_matches(&self, ip: &IpAddr) -> bool {
        ip.is_ipv6() == self.ipt.is_ipv6()
    }

    /// Installs the shared chains and jump rules every mapping relies on.
    pub fn ensure_base_rules(&mut self) -> Result<()> {
        let hostports = self.config.hostports_chain.as_str();
        let masq = self.config.masquerade_chain.as_str();
        let mark = self.config.masquerade_mark.as_str();

        self.ipt.ensure_chain(TABLE_NAT, hostports)?;
        self.ipt.ensure_chain(TABLE_NAT, masq)?;

        let portals = [
            "-m", "comment", "--comment", "hostport portals",
            "-m", "addrtype", "--dst-type", "LOCAL",
            "-j", hostports,
        ];
        for chain in [CHAIN_PREROUTING, CHAIN_OUTPUT] {
            self.ipt
                .ensure_rule(RulePosition::Append, TABLE_NAT, chain, &portals)
                .with_context(|| format!("Failed to ensure portal rule in {}", chain))?;
        }

        self.ipt.ensure_rule(
            RulePosition::Append,
            TABLE_NAT,
            masq,
            &["-j", "MARK", "--set-xmark", mark],
        )?;

        let mut masquerade = vec![
            "-m", "comment", "--comment", "hostport masquerade",
            "-m", "mark", "--mark", mark,
            "-j", "MASQUERADE",
        ];
        if self.ipt.has_random_fully() {
            masquerade.push("--random-fully");
        }
        self.ipt
            .ensure_rule(RulePosition::Append, TABLE_NAT, CHAIN_POSTROUTING, &masquerade)?;

        Ok(())
    }

    /// Installs forwarding rules for every mapping of `pod`. Returns how many
    /// mappings were programmed; mappings of the other address family are
    /// skipped.
    pub fn add(&mut self, pod: &PodPortMapping) -> Result<usize> {
        if !self.family_matches(&pod.ip) {
            warn!(
                pod = pod.full_name().as_str(),
                ip = %pod.ip,
                protocol = self.ipt.protocol().as_str(),
                "pod address family does not match backend, skipping"
            );
            return Ok(0);
        }

        self.ensure_base_rules()?;

        let pod_name = pod.full_name();
        let mut added = 0;

        for mapping in &pod.mappings {
            if let Some(host_ip) = mapping.host_ip {
                if !self.family_matches(&host_ip) {
                    debug!(pod = pod_name.as_str(), %host_ip, "skipping mapping of other family");
                    continue;
                }
            }

            self.add_mapping(pod, &pod_name, mapping)
                .with_context(|| format!("Failed to add hostport {} for {}", mapping.host_port, pod_name))?;
            added += 1;
        }

        info!(pod = pod_name.as_str(), mappings = added, "hostports added");
        Ok(added)
    }

    fn add_mapping(&mut self, pod: &PodPortMapping, pod_name: &str, mapping: &PortMapping) -> Result<()> {
        let chain = mapping_chain_name(pod, mapping);
        let comment = mapping_comment(pod_name, mapping.host_port);
        let proto = mapping.protocol.as_str();
        let host_port = mapping.host_port.to_string();
        let pod_net = IpNet::from(pod.ip).to_string();
        let destination = dnat_destination(&pod.ip, mapping.container_port);
        let host_net = mapping.host_ip.map(|ip| IpNet::from(ip).to_string());

        self.ipt.ensure_chain(TABLE_NAT, &chain)?;

        let mut dispatch = vec!["-m", "comment", "--comment", comment.as_str(), "-p", proto];
        if let Some(host_net) = host_net.as_deref() {
            dispatch.extend(["-d", host_net]);
        }
        dispatch.extend(["--dport", host_port.as_str(), "-j", chain.as_str()]);
        self.ipt.ensure_rule(
            RulePosition::Prepend,
            TABLE_NAT,
            &self.config.hostports_chain,
            &dispatch,
        )?;

        self.ipt.ensure_rule(
            RulePosition::Append,
            TABLE_NAT,
            &chain,
            &[
                "-m", "comment", "--comment", comment.as_str(),
                "-s", pod_net.as_str(),
                "-j", self.config.masquerade_chain.as_str(),
            ],
        )?;

        self.ipt.ensure_rule(
            RulePosition::Append,
            TABLE_NAT,
            &chain,
            &[
                "-m", "comment", "--comment", comment.as_str(),
                "-p", proto, "-m", proto,
                "-j", "DNAT", "--to-destination", destination.as_str(),
            ],
        )?;

        debug!(pod = pod_name, chain = chain.as_str(), %destination, "mapping installed");
        Ok(())
    }

    /// Removes every hostport rule and chain belonging to the pod. Returns the
    /// number of mapping chains removed.
    pub fn remove(&mut self, namespace: &str, name: &str) -> Result<usize> {
        let hostports = self.config.hostports_chain.as_str();
        if !self.ipt.chain_exists(TABLE_NAT, hostports) {
            return Ok(0);
        }

        let mut saved = String::new();
        self.ipt
            .save_into(TABLE_NAT, &mut saved)
            .context("Failed to save nat table")?;

        let marker = format!("--comment \"{}_{} hostport ", namespace, name);
        let rule_prefix = format!("-A {} ", hostports);

        let mut kept = Vec::new();
        let mut removed_chains = Vec::new();
        for line in saved.lines().filter(|line| line.starts_with(&rule_prefix)) {
            if !line.contains(&marker) {
                kept.push(line);
                continue;
            }
            if let Some(target) = jump_target(line) {
                if target.starts_with(MAPPING_CHAIN_PREFIX) && !removed_chains.contains(&target) {
                    removed_chains.push(target);
                }
            }
        }

        if removed_chains.is_empty() {
            return Ok(0);
        }

        let mut payload = format!("*{}\n:{} - [0:0]\n", TABLE_NAT, hostports);
        for chain in &removed_chains {
            let _ = writeln!(payload, ":{} - [0:0]", chain);
        }
        for line in &kept {
            let _ = writeln!(payload, "{}", line);
        }
        for chain in &removed_chains {
            let _ = writeln!(payload, "-X {}", chain);
        }
        payload.push_str("COMMIT\n");

        self.ipt
            .restore(
                TABLE_NAT,
                payload.as_bytes(),
                FlushFlag::NoFlushTables,
                RestoreCountersFlag::NoRestoreCounters,
            )
            .with_context(|| format!("Failed to remove hostports for {}_{}", namespace, name))?;

        info!(namespace, name, chains = removed_chains.len(), "hostports removed");
        Ok(removed_chains.len())
    }
}

fn jump_target(rule: &str) -> Option<&str> {
    let mut fields = rule.split(' ').rev().peekable();
    let mut target = None;
    while let Some(field) = fields.next() {
        if fields.peek() == Some(&"-j") {
            target = Some(field);
            break;
        }
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemIptables;
    use hp_core::MappingProtocol;

    fn pod(name: &str, ip: &str, specs: &[&str]) -> PodPortMapping {
        PodPortMapping {
            namespace: "default".into(),
            name: name.into(),
            ip: ip.parse().unwrap(),
            mappings: specs.iter().map(|s| s.parse().expect("mapping")).collect(),
        }
    }

    #[test]
    fn add_installs_dispatch_and_dnat_rules() {
        let config = HostportConfig::default();
        let mut ipt = MemIptables::new();
        let web = pod("web", "10.88.0.5", &["8080:80"]);
        let chain = mapping_chain_name(&web, &web.mappings[0]);

        let added = HostportManager::new(&mut ipt, &config).add(&web).expect("add");
        assert_eq!(added, 1);

        assert_eq!(
            ipt.rules("nat", "CRIO-HOSTPORTS").unwrap(),
            vec![format!(
                "-m comment --comment \"default_web hostport 8080\" -p tcp --dport 8080 -j {}",
                chain
            )]
        );
        assert_eq!(
            ipt.rules("nat", &chain).unwrap(),
            vec![
                "-m comment --comment \"default_web hostport 8080\" -s 10.88.0.5/32 -j CRIO-MARK-MASQ".to_string(),
                "-m comment --comment \"default_web hostport 8080\" -p tcp -m tcp -j DNAT --to-destination 10.88.0.5:80".to_string(),
            ]
        );
        assert_eq!(ipt.rules("nat", "PREROUTING").unwrap().len(), 1);
        assert_eq!(ipt.rules("nat", "OUTPUT").unwrap().len(), 1);
        assert_eq!(ipt.rules("nat", "POSTROUTING").unwrap().len(), 1);
    }

    #[test]
    fn add_twice_is_idempotent() {
        let config = HostportConfig::default();
        let mut ipt = MemIptables::new();
        let web = pod("web", "10.88.0.5", &["127.0.0.1:8080:80", "5353:53/udp"]);

        HostportManager::new(&mut ipt, &config).add(&web).unwrap();
        let before = ipt.save_all();
        HostportManager::new(&mut ipt, &config).add(&web).unwrap();
        assert_eq!(before, ipt.save_all());
        assert!(before.contains("-d 127.0.0.1/32 --dport 8080"));
    }

    #[test]
    fn remove_only_touches_the_named_pod() {
        let config = HostportConfig::default();
        let mut ipt = MemIptables::new();
        let web = pod("web", "10.88.0.5", &["8080:80"]);
        let db = pod("db", "10.88.0.6", &["5432:5432"]);

        let mut manager = HostportManager::new(&mut ipt, &config);
        manager.add(&web).unwrap();
        manager.add(&db).unwrap();
        assert_eq!(manager.remove("default", "web").unwrap(), 1);
        assert_eq!(manager.remove("default", "web").unwrap(), 0);

        let web_chain = mapping_chain_name(&web, &web.mappings[0]);
        let db_chain = mapping_chain_name(&db, &db.mappings[0]);
        assert!(!ipt.chain_exists("nat", &web_chain));
        assert!(ipt.chain_exists("nat", &db_chain));

        let dispatch = ipt.rules("nat", "CRIO-HOSTPORTS").unwrap();
        assert_eq!(dispatch.len(), 1);
        assert!(dispatch[0].contains("default_db hostport 5432"));
        assert_eq!(ipt.rules("nat", &db_chain).unwrap().len(), 2);
    }

    #[test]
    fn other_family_is_skipped() {
        let config = HostportConfig::default();
        let mut ipt = MemIptables::new();
        let v6 = pod("web", "fd00::5", &["8080:80"]);
        assert_eq!(HostportManager::new(&mut ipt, &config).add(&v6).unwrap(), 0);
        assert!(!ipt.chain_exists("nat", "CRIO-HOSTPORTS"));

        let mixed = pod("web", "10.88.0.5", &["[::1]:8080:80", "9090:90"]);
        assert_eq!(HostportManager::new(&mut ipt, &config).add(&mixed).unwrap(), 1);
    }

    #[test]
    fn ipv6_destinations_are_bracketed() {
        let config = HostportConfig::default();
        let mut ipt = MemIptables::with_protocol(crate::iface::Protocol::Ipv6);
        let web = pod("web", "fd00::5", &["8080:80"]);
        HostportManager::new(&mut ipt, &config).add(&web).unwrap();

        let chain = mapping_chain_name(&web, &web.mappings[0]);
        let rules = ipt.rules("nat", &chain).unwrap();
        assert!(rules[0].contains("-s fd00::5/128"));
        assert!(rules[1].ends_with("--to-destination [fd00::5]:80"));
    }

    #[test]
    fn chain_names_are_stable_and_distinct() {
        let web = pod("web", "10.88.0.5", &["8080:80", "8080:80/udp"]);
        let tcp = mapping_chain_name(&web, &web.mappings[0]);
        let udp = mapping_chain_name(&web, &web.mappings[1]);

        assert_eq!(tcp, mapping_chain_name(&web, &web.mappings[0]));
        assert_ne!(tcp, udp);
        assert!(tcp.starts_with("CRIO-HP-"));
        assert_eq!(tcp.len(), "CRIO-HP-".len() + 16);
        assert_eq!(web.mappings[1].protocol, MappingProtocol::Udp);
    }

    #[test]
    fn host_ip_separates_chains_for_same_port() {
        let web = pod("web", "10.88.0.5", &["8080:80", "192.0.2.1:8080:80", "192.0.2.2:8080:80"]);
        let any = mapping_chain_name(&web, &web.mappings[0]);
        let first = mapping_chain_name(&web, &web.mappings[1]);
        let second = mapping_chain_name(&web, &web.mappings[2]);

        assert_ne!(any, first);
        assert_ne!(first, second);
    }

    #[test]
    fn jump_target_reads_last_jump() {
        assert_eq!(jump_target("-A X -p tcp -j CRIO-HP-AB"), Some("CRIO-HP-AB"));
        assert_eq!(jump_target("-A X -p tcp"), None);
    }
}
