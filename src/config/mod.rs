//! Configuration: a YAML file describing ingresses, egresses, named rules,
//! and the route table, loaded once at startup and replaceable at runtime
//! through the same load/validate pattern as the rest of this lineage's
//! config modules.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

/// A single named ingress listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IngressVO {
    Http {
        name: String,
        listen: String,
        auth: Option<AuthConfig>,
    },
    Socks5 {
        name: String,
        listen: String,
        auth: Option<AuthConfig>,
    },
    Shadowsocks {
        name: String,
        listen: String,
        method: String,
        password: String,
    },
    Trojan {
        name: String,
        listen: String,
        password: String,
        #[serde(default = "default_trojan_fallback")]
        fallback: String,
        cert_file: PathBuf,
        key_file: PathBuf,
    },
    Tunnel {
        name: String,
        listen: String,
        destinations: Vec<String>,
        #[serde(default = "default_balance")]
        balance: String,
    },
}

fn default_trojan_fallback() -> String {
    "localhost:80".to_string()
}

fn default_balance() -> String {
    "round-robin".to_string()
}

impl IngressVO {
    pub fn name(&self) -> &str {
        match self {
            IngressVO::Http { name, .. }
            | IngressVO::Socks5 { name, .. }
            | IngressVO::Shadowsocks { name, .. }
            | IngressVO::Trojan { name, .. }
            | IngressVO::Tunnel { name, .. } => name,
        }
    }

    pub fn listen(&self) -> &str {
        match self {
            IngressVO::Http { listen, .. }
            | IngressVO::Socks5 { listen, .. }
            | IngressVO::Shadowsocks { listen, .. }
            | IngressVO::Trojan { listen, .. }
            | IngressVO::Tunnel { listen, .. } => listen,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            IngressVO::Http { .. } => "http",
            IngressVO::Socks5 { .. } => "socks5",
            IngressVO::Shadowsocks { .. } => "shadowsocks",
            IngressVO::Trojan { .. } => "trojan",
            IngressVO::Tunnel { .. } => "tunnel",
        }
    }
}

/// A single named egress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EgressVO {
    Direct {
        name: String,
    },
    Reject {
        name: String,
        delay_ms: Option<u64>,
    },
    Http {
        name: String,
        server: String,
        auth: Option<AuthConfig>,
        #[serde(default)]
        tls: bool,
        #[serde(default)]
        sni: String,
        #[serde(default)]
        skip_cert_verify: bool,
    },
    Socks5 {
        name: String,
        server: String,
        auth: Option<AuthConfig>,
    },
    Shadowsocks {
        name: String,
        server: String,
        method: String,
        password: String,
    },
    Trojan {
        name: String,
        server: String,
        password: String,
        sni: String,
        #[serde(default)]
        skip_cert_verify: bool,
    },
}

impl EgressVO {
    pub fn name(&self) -> &str {
        match self {
            EgressVO::Direct { name }
            | EgressVO::Reject { name, .. }
            | EgressVO::Http { name, .. }
            | EgressVO::Socks5 { name, .. }
            | EgressVO::Shadowsocks { name, .. }
            | EgressVO::Trojan { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MatcherVO {
    Domain { suffix: String },
    Cidr { network: String },
    Country { iso_code: String },
    IngressName { name: String },
    IngressType { type_name: String },
    Regex { pattern: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVO {
    pub name: String,
    pub matchers: Vec<MatcherVO>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntryVO {
    pub rules: Vec<String>,
    pub egress: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteVO {
    #[serde(default)]
    pub entries: Vec<RouteEntryVO>,
    #[serde(default = "default_egress_name")]
    pub default: String,
}

fn default_egress_name() -> String {
    "direct".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DnsConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub nameserver: Vec<String>,
    #[serde(default)]
    pub fallback: Vec<String>,
    #[serde(default)]
    pub ipv6: bool,
    #[serde(rename = "use-hosts", default = "default_true")]
    pub use_hosts: bool,
    #[serde(default)]
    pub hosts: HashMap<String, String>,
    #[serde(rename = "cache-size", default = "default_cache_size")]
    pub cache_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> usize {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "log-level", default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(rename = "geoip-database")]
    pub geoip_database: Option<PathBuf>,

    #[serde(default)]
    pub ingresses: Vec<IngressVO>,

    #[serde(default)]
    pub egresses: Vec<EgressVO>,

    #[serde(default)]
    pub rules: Vec<RuleVO>,

    #[serde(default)]
    pub route: RouteVO,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            dns: DnsConfig::default(),
            geoip_database: None,
            ingresses: Vec::new(),
            egresses: vec![EgressVO::Direct { name: "direct".into() }],
            rules: Vec::new(),
            route: RouteVO::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load_async<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Rejects semantically invalid states early rather than letting them
    /// surface only as a runtime `SemanticError`: unknown rule/egress
    /// references in the route table, unparsable CIDRs, and a country
    /// matcher with no configured GeoIP database.
    pub fn validate(&self) -> Result<()> {
        let mut ingress_names = std::collections::HashSet::new();
        for ingress in &self.ingresses {
            if !ingress_names.insert(ingress.name().to_string()) {
                return Err(Error::semantic(format!("duplicate ingress name {}", ingress.name())));
            }
        }

        let mut egress_names = std::collections::HashSet::new();
        for egress in &self.egresses {
            if !egress_names.insert(egress.name().to_string()) {
                return Err(Error::semantic(format!("duplicate egress name {}", egress.name())));
            }
        }

        let mut rule_names = std::collections::HashSet::new();
        for rule in &self.rules {
            if !rule_names.insert(rule.name.clone()) {
                return Err(Error::semantic(format!("duplicate rule name {}", rule.name)));
            }
            for matcher in &rule.matchers {
                match matcher {
                    MatcherVO::Cidr { network } => {
                        network
                            .parse::<ipnet::IpNet>()
                            .map_err(|e| Error::semantic(format!("bad CIDR {}: {}", network, e)))?;
                    }
                    MatcherVO::Country { .. } if self.geoip_database.is_none() => {
                        return Err(Error::semantic(
                            "a country rule requires geoip-database to be configured",
                        ));
                    }
                    MatcherVO::Regex { pattern } => {
                        regex::Regex::new(pattern)
                            .map_err(|e| Error::semantic(format!("bad regex {}: {}", pattern, e)))?;
                    }
                    _ => {}
                }
            }
        }

        if !egress_names.contains(&self.route.default) {
            return Err(Error::semantic(format!(
                "route default egress {} does not exist",
                self.route.default
            )));
        }
        for entry in &self.route.entries {
            if !egress_names.contains(&entry.egress) {
                return Err(Error::semantic(format!("route references unknown egress {}", entry.egress)));
            }
            for rule_name in &entry.rules {
                if !rule_names.contains(rule_name) {
                    return Err(Error::semantic(format!("route references unknown rule {}", rule_name)));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn parses_full_yaml_document() {
        let yaml = r#"
log-level: debug
ingresses:
  - type: http
    name: http-in
    listen: "127.0.0.1:7890"
egresses:
  - type: direct
    name: direct
  - type: reject
    name: reject
rules:
  - name: ads
    matchers:
      - kind: domain
        suffix: ads.example
route:
  entries:
    - rules: ["ads"]
      egress: reject
  default: direct
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.ingresses.len(), 1);
        assert_eq!(config.route.default, "direct");
    }

    #[test]
    fn rejects_route_to_unknown_egress() {
        let yaml = r#"
egresses:
  - type: direct
    name: direct
route:
  default: nonexistent
"#;
        assert!(Config::from_str(yaml).is_err());
    }

    #[test]
    fn rejects_country_matcher_without_geoip_database() {
        let yaml = r#"
egresses:
  - type: direct
    name: direct
rules:
  - name: us-only
    matchers:
      - kind: country
        iso_code: US
route:
  default: direct
"#;
        assert!(Config::from_str(yaml).is_err());
    }

    #[test]
    fn rejects_bad_cidr() {
        let yaml = r#"
egresses:
  - type: direct
    name: direct
rules:
  - name: lan
    matchers:
      - kind: cidr
        network: "not-a-cidr"
route:
  default: direct
"#;
        assert!(Config::from_str(yaml).is_err());
    }
}
