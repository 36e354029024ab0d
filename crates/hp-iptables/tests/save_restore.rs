use hp_iptables::{
    FlushFlag, Iptables, IptablesError, MemIptables, RestoreCountersFlag, RulePosition,
};

const NO_COUNTERS: RestoreCountersFlag = RestoreCountersFlag::NoRestoreCounters;

fn save(ipt: &dyn Iptables, table: &str) -> String {
    let mut out = String::new();
    ipt.save_into(table, &mut out).expect("save");
    out
}

#[test]
fn repeated_ensure_keeps_one_rule() {
    let mut ipt = MemIptables::new();
    let args = ["-s", "10.0.0.1", "-j", "ACCEPT"];

    assert!(!ipt.ensure_rule(RulePosition::Append, "filter", "FORWARD", &args).unwrap());
    assert!(ipt.ensure_rule(RulePosition::Append, "filter", "FORWARD", &args).unwrap());
    assert!(
        ipt.ensure_rule(
            RulePosition::Append,
            "filter",
            "FORWARD",
            &["-s", "10.0.0.1/32", "-j", "ACCEPT"]
        )
        .unwrap()
    );
    assert_eq!(ipt.rules("filter", "FORWARD").unwrap().len(), 1);
}

#[test]
fn save_then_restore_reproduces_chains() {
    let mut source = MemIptables::new();
    source
        .ensure_rule(RulePosition::Append, "nat", "CRIO-HOSTPORTS", &["-p", "tcp", "--dport", "80", "-j", "CRIO-HP-A"])
        .unwrap();
    source
        .ensure_rule(RulePosition::Append, "nat", "CRIO-HP-A", &["-j", "DNAT", "--to-destination=10.88.0.2:80"])
        .unwrap();
    source
        .ensure_rule(RulePosition::Prepend, "nat", "CRIO-HP-A", &["-s", "10.88.0.2", "-j", "CRIO-MARK-MASQ"])
        .unwrap();
    source
        .ensure_rule(RulePosition::Append, "filter", "LOG", &["-m", "comment", "--comment", "my rule", "-j", "LOG"])
        .unwrap();
    source.ensure_chain("filter", "EMPTY").unwrap();

    let dump = source.save_all();

    let mut copy = MemIptables::new();
    copy.restore_all(dump.as_bytes(), FlushFlag::NoFlushTables, NO_COUNTERS)
        .expect("restore");

    for table in ["filter", "nat"] {
        assert_eq!(save(&source, table), save(&copy, table));
    }
    assert_eq!(
        copy.rules("nat", "CRIO-HP-A").unwrap(),
        [
            "-s 10.88.0.2/32 -j CRIO-MARK-MASQ",
            "-j DNAT --to-destination 10.88.0.2:80"
        ]
    );
    assert_eq!(
        copy.rules("filter", "LOG").unwrap(),
        ["-m comment --comment \"my rule\" -j LOG"]
    );
    assert!(copy.chain_exists("filter", "EMPTY"));
}

#[test]
fn full_flush_rebuilds_builtin_and_user_chains() {
    let mut ipt = MemIptables::new();
    ipt.ensure_rule(RulePosition::Append, "filter", "INPUT", &["-j", "OLD-INPUT"])
        .unwrap();
    ipt.ensure_rule(RulePosition::Append, "filter", "CRIO-HOSTPORTS", &["-j", "OLD-HP"])
        .unwrap();

    let data = "*filter\n\
                :INPUT ACCEPT [0:0]\n\
                :CRIO-HOSTPORTS - [0:0]\n\
                -A INPUT -j NEW-INPUT\n\
                -A CRIO-HOSTPORTS -j NEW-HP\n\
                COMMIT\n";
    ipt.restore("filter", data.as_bytes(), FlushFlag::FlushTables, NO_COUNTERS)
        .expect("restore");

    assert_eq!(ipt.rules("filter", "INPUT").unwrap(), ["-j NEW-INPUT"]);
    assert_eq!(ipt.rules("filter", "CRIO-HOSTPORTS").unwrap(), ["-j NEW-HP"]);
}

#[test]
fn no_flush_keeps_builtin_rules_but_resets_user_chains() {
    let mut ipt = MemIptables::new();
    ipt.ensure_rule(RulePosition::Append, "filter", "INPUT", &["-j", "OLD-INPUT"])
        .unwrap();
    ipt.ensure_rule(RulePosition::Append, "filter", "CRIO-HOSTPORTS", &["-j", "OLD-HP"])
        .unwrap();

    let data = "*filter\n:INPUT ACCEPT [0:0]\n:CRIO-HOSTPORTS - [0:0]\n-A INPUT -j NEW-INPUT\nCOMMIT\n";
    ipt.restore_all(data.as_bytes(), FlushFlag::NoFlushTables, NO_COUNTERS)
        .expect("restore");

    assert_eq!(ipt.rules("filter", "INPUT").unwrap(), ["-j OLD-INPUT", "-j NEW-INPUT"]);
    assert!(ipt.rules("filter", "CRIO-HOSTPORTS").unwrap().is_empty());
}

#[test]
fn bare_rule_flag_is_malformed() {
    let mut ipt = MemIptables::new();
    let err = ipt
        .restore_all(b"*filter\n-A\nCOMMIT\n", FlushFlag::NoFlushTables, NO_COUNTERS)
        .unwrap_err();
    assert!(matches!(err, IptablesError::MalformedInput { .. }));
}

#[test]
fn restore_of_one_table_ignores_others() {
    let mut ipt = MemIptables::new();
    let data = "*filter\n:FILTERED - [0:0]\nCOMMIT\n*nat\n:CRIO-HOSTPORTS - [0:0]\n-I CRIO-HOSTPORTS -j A\n-I CRIO-HOSTPORTS -j B\nCOMMIT\n";
    ipt.restore("nat", data.as_bytes(), FlushFlag::NoFlushTables, NO_COUNTERS)
        .expect("restore");

    assert!(!ipt.chain_exists("filter", "FILTERED"));
    assert_eq!(ipt.rules("nat", "CRIO-HOSTPORTS").unwrap(), ["-j B", "-j A"]);
}
