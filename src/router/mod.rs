//! Routing engine: maps an accepted connection's destination (plus the
//! ingress it arrived on, and optionally its resolved IPs) to an egress
//! name, by walking an ordered list of named rule groups.

pub mod geoip;

use crate::common::endpoint::Endpoint;
use crate::common::error::{Error, Result};
use crate::router::geoip::GeoIpReader;
use ipnet::IpNet;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Clone)]
pub enum Matcher {
    Domain(String),
    Cidr(IpNet),
    Country(String),
    IngressName(String),
    IngressType(String),
    Regex(Arc<Regex>),
}

impl Matcher {
    /// `subject` matches a domain suffix iff equal (case-insensitive) or
    /// `subject` ends with `"." + suffix`. A subject beginning with '.'
    /// is rejected, never silently matched.
    pub fn match_domain(subject: &str, suffix: &str) -> Result<bool> {
        if subject.starts_with('.') {
            return Err(Error::misc("domain subject must not start with '.'"));
        }
        let subject = subject.to_ascii_lowercase();
        let suffix = suffix.to_ascii_lowercase();
        Ok(subject == suffix || subject.ends_with(&format!(".{}", suffix)))
    }

    fn needs_resolved(&self) -> bool {
        matches!(self, Matcher::Cidr(_) | Matcher::Country(_))
    }

    fn matches(
        &self,
        endpoint: &Endpoint,
        ingress_name: &str,
        ingress_type: &str,
        resolved: &[IpAddr],
        geo: &GeoIpReader,
    ) -> bool {
        match self {
            Matcher::Domain(suffix) => match endpoint {
                Endpoint::Domain(host, _) => Self::match_domain(host, suffix).unwrap_or(false),
                Endpoint::Ip(_, _) => false,
            },
            Matcher::Cidr(net) => resolved.iter().any(|ip| net.contains(ip)),
            Matcher::Country(iso) => resolved.iter().any(|ip| geo.matches(*ip, iso)),
            Matcher::IngressName(name) => name == ingress_name,
            Matcher::IngressType(ty) => ty == ingress_type,
            Matcher::Regex(re) => match endpoint {
                Endpoint::Domain(host, _) => re.is_match(host),
                Endpoint::Ip(ip, _) => re.is_match(&ip.to_string()),
            },
        }
    }
}

pub struct Rule {
    pub name: String,
    pub matchers: Vec<Matcher>,
}

impl Rule {
    fn matches(
        &self,
        endpoint: &Endpoint,
        ingress_name: &str,
        ingress_type: &str,
        resolved: &[IpAddr],
        geo: &GeoIpReader,
    ) -> bool {
        // ANY-of-ANY: a rule matches if any one of its matchers matches.
        // Do not reinterpret this as requiring all matchers to agree.
        self.matchers
            .iter()
            .any(|m| m.matches(endpoint, ingress_name, ingress_type, resolved, geo))
    }

    fn needs_resolved(&self) -> bool {
        self.matchers.iter().any(Matcher::needs_resolved)
    }
}

struct RouteEntry {
    rule_names: Vec<String>,
    egress_name: String,
}

pub struct Router {
    rules: RwLock<HashMap<String, Arc<Rule>>>,
    entries: RwLock<Vec<RouteEntry>>,
    default_egress: RwLock<String>,
    geo: Arc<GeoIpReader>,
}

impl Router {
    pub fn new(geo: Arc<GeoIpReader>, default_egress: impl Into<String>) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            entries: RwLock::new(Vec::new()),
            default_egress: RwLock::new(default_egress.into()),
            geo,
        }
    }

    pub fn set_rule(&self, rule: Rule) {
        self.rules.write().insert(rule.name.clone(), Arc::new(rule));
    }

    pub fn set_route(&self, entries: Vec<(Vec<String>, String)>, default_egress: impl Into<String>) {
        let mut guard = self.entries.write();
        *guard = entries
            .into_iter()
            .map(|(rule_names, egress_name)| RouteEntry {
                rule_names,
                egress_name,
            })
            .collect();
        *self.default_egress.write() = default_egress.into();
    }

    /// Whether the live route table references any matcher that needs
    /// resolved IPs, so the session orchestrator can skip DNS otherwise.
    pub fn needs_resolving(&self) -> bool {
        let rules = self.rules.read();
        let entries = self.entries.read();
        entries.iter().any(|entry| {
            entry
                .rule_names
                .iter()
                .filter_map(|name| rules.get(name))
                .any(|r| r.needs_resolved())
        })
    }

    pub fn route(
        &self,
        endpoint: &Endpoint,
        ingress_name: &str,
        ingress_type: &str,
        resolved: &[IpAddr],
    ) -> String {
        let rules = self.rules.read();
        let entries = self.entries.read();
        for entry in entries.iter() {
            let matched = entry.rule_names.iter().any(|name| {
                rules
                    .get(name)
                    .map(|r| r.matches(endpoint, ingress_name, ingress_type, resolved, &self.geo))
                    .unwrap_or(false)
            });
            if matched {
                tracing::debug!(egress = %entry.egress_name, "matched routing rule");
                return entry.egress_name.clone();
            }
        }
        let default = self.default_egress.read().clone();
        tracing::debug!(egress = %default, rule = "default", "no rule matched, using default");
        default
    }

    pub fn is_used(&self, egress_name: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.egress_name == egress_name)
            || *self.default_egress.read() == egress_name
    }

    pub fn erase_rule(&self, name: &str) -> Result<()> {
        let entries = self.entries.read();
        let in_use = entries.iter().any(|e| e.rule_names.iter().any(|n| n == name));
        if in_use {
            return Err(Error::res_in_use(format!("rule {} is referenced by the live route", name)));
        }
        drop(entries);
        self.rules.write().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_matching_truth_table() {
        assert!(Matcher::match_domain("example.com", "example.com").unwrap());
        assert!(Matcher::match_domain("Example.COM", "example.com").unwrap());
        assert!(Matcher::match_domain("www.example.com", "example.com").unwrap());
        assert!(!Matcher::match_domain("notexample.com", "example.com").unwrap());
        assert!(Matcher::match_domain(".leading", "example.com").is_err());
    }

    #[test]
    fn route_falls_back_to_default() {
        let router = Router::new(Arc::new(GeoIpReader::empty()), "direct");
        let endpoint = Endpoint::Domain("anything.test".into(), 80);
        assert_eq!(router.route(&endpoint, "http-in", "http", &[]), "direct");
    }

    #[test]
    fn route_matches_domain_rule_any_of_any() {
        let router = Router::new(Arc::new(GeoIpReader::empty()), "direct");
        router.set_rule(Rule {
            name: "ads".into(),
            matchers: vec![
                Matcher::Domain("ads.example".into()),
                Matcher::IngressName("never-matches".into()),
            ],
        });
        router.set_route(vec![(vec!["ads".into()], "reject".into())], "direct");

        let endpoint = Endpoint::Domain("ads.example".into(), 443);
        assert_eq!(router.route(&endpoint, "http-in", "http", &[]), "reject");
    }

    #[test]
    fn erase_in_use_rule_is_rejected() {
        let router = Router::new(Arc::new(GeoIpReader::empty()), "direct");
        router.set_rule(Rule {
            name: "r1".into(),
            matchers: vec![Matcher::Domain("x.test".into())],
        });
        router.set_route(vec![(vec!["r1".into()], "direct".into())], "direct");
        assert!(matches!(router.erase_rule("r1"), Err(Error::ResInUse(_))));
    }

    #[test]
    fn needs_resolving_reflects_live_route_only() {
        let router = Router::new(Arc::new(GeoIpReader::empty()), "direct");
        router.set_rule(Rule {
            name: "geo".into(),
            matchers: vec![Matcher::Country("US".into())],
        });
        assert!(!router.needs_resolving());
        router.set_route(vec![(vec!["geo".into()], "direct".into())], "direct");
        assert!(router.needs_resolving());
    }

    #[test]
    fn is_used_checks_default_too() {
        let router = Router::new(Arc::new(GeoIpReader::empty()), "direct");
        assert!(router.is_used("direct"));
        assert!(!router.is_used("proxy"));
    }
}
