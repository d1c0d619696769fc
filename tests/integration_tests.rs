//! End-to-end tests exercising config parsing and routing together,
//! without spinning up any real listener.

use pichi_rs::config::{Config, EgressVO, IngressVO, MatcherVO, RouteEntryVO, RouteVO, RuleVO};

fn sample_yaml() -> &'static str {
    r#"
log-level: debug
ingresses:
  - type: http
    name: http-in
    listen: "127.0.0.1:17890"
  - type: socks5
    name: socks-in
    listen: "127.0.0.1:17891"
egresses:
  - type: direct
    name: direct
  - type: reject
    name: reject
  - type: shadowsocks
    name: ss-out
    server: "198.51.100.1:8388"
    method: aes-256-gcm
    password: hunter2
rules:
  - name: ads
    matchers:
      - kind: domain
        suffix: ads.example
  - name: lan
    matchers:
      - kind: cidr
        network: "192.168.0.0/16"
route:
  entries:
    - rules: ["ads"]
      egress: reject
    - rules: ["lan"]
      egress: direct
  default: ss-out
"#
}

#[test]
fn parses_a_full_multi_protocol_config() {
    let config = Config::from_str(sample_yaml()).expect("config should parse and validate");
    assert_eq!(config.ingresses.len(), 2);
    assert_eq!(config.egresses.len(), 3);
    assert_eq!(config.route.default, "ss-out");
    assert!(matches!(config.ingresses[0], IngressVO::Http { .. }));
    assert!(matches!(config.ingresses[1], IngressVO::Socks5 { .. }));
}

#[test]
fn route_table_drives_the_router_the_same_way_node_does() {
    use pichi_rs::common::Endpoint;
    use pichi_rs::router::geoip::GeoIpReader;
    use pichi_rs::router::{Matcher, Rule, Router};
    use std::sync::Arc;

    let config = Config::from_str(sample_yaml()).unwrap();
    let router = Router::new(Arc::new(GeoIpReader::empty()), config.route.default.clone());
    for rule in &config.rules {
        let matchers = rule
            .matchers
            .iter()
            .map(|m| match m {
                MatcherVO::Domain { suffix } => Matcher::Domain(suffix.clone()),
                MatcherVO::Cidr { network } => Matcher::Cidr(network.parse().unwrap()),
                other => panic!("unexpected matcher in test fixture: {:?}", other),
            })
            .collect();
        router.set_rule(Rule { name: rule.name.clone(), matchers });
    }
    let entries = config
        .route
        .entries
        .iter()
        .map(|e| (e.rules.clone(), e.egress.clone()))
        .collect();
    router.set_route(entries, config.route.default.clone());

    let ads = Endpoint::Domain("tracker.ads.example".into(), 443);
    assert_eq!(router.route(&ads, "http-in", "http", &[]), "reject");

    let lan_ip = "192.168.1.5".parse().unwrap();
    let lan = Endpoint::Ip(lan_ip, 80);
    assert_eq!(router.route(&lan, "http-in", "http", &[lan_ip]), "direct");

    let other = Endpoint::Domain("example.com".into(), 443);
    assert_eq!(router.route(&other, "http-in", "http", &[]), "ss-out");
}

#[test]
fn rejects_a_route_entry_naming_an_unknown_rule() {
    let yaml = r#"
egresses:
  - type: direct
    name: direct
route:
  entries:
    - rules: ["nope"]
      egress: direct
  default: direct
"#;
    assert!(Config::from_str(yaml).is_err());
}

#[test]
fn default_config_round_trips_through_yaml() {
    let config = Config::default();
    let serialized = serde_yaml::to_string(&config).unwrap();
    let reparsed = Config::from_str(&serialized).unwrap();
    assert_eq!(reparsed.egresses.len(), config.egresses.len());
}

// Keep the VO constructors reachable from outside the crate under test,
// the same way a consumer building configuration programmatically would.
#[test]
fn vos_are_constructible_and_nameable() {
    let egress = EgressVO::Reject { name: "reject".into(), delay_ms: Some(50) };
    assert_eq!(egress.name(), "reject");

    let rule = RuleVO { name: "r".into(), matchers: vec![MatcherVO::IngressType { type_name: "http".into() }] };
    let route = RouteVO { entries: vec![RouteEntryVO { rules: vec![rule.name.clone()], egress: "direct".into() }], default: "direct".into() };
    assert_eq!(route.entries.len(), 1);
}
