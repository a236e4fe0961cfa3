/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::path::Path;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, YamlLoader};

use g3_icap_xact::{IcapServiceConfig, IcapXactConfig};

const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 4;

pub(crate) struct CliConfig {
    pub(crate) service: Option<IcapServiceConfig>,
    pub(crate) adaptation: IcapXactConfig,
    pub(crate) max_idle_connections: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        CliConfig {
            service: None,
            adaptation: IcapXactConfig::default(),
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
        }
    }
}

pub(crate) fn load_file(path: &Path) -> anyhow::Result<CliConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    load_str(&content).context(format!("invalid config file {}", path.display()))
}

fn load_str(content: &str) -> anyhow::Result<CliConfig> {
    let docs = YamlLoader::load_from_str(content)?;
    let mut config = CliConfig::default();
    let Some(doc) = docs.first() else {
        return Ok(config);
    };
    let Yaml::Hash(map) = doc else {
        return Err(anyhow!("the root value should be a map"));
    };

    for (k, v) in map.iter() {
        let Yaml::String(k) = k else {
            return Err(anyhow!("map key should be string"));
        };
        match k.to_lowercase().replace('-', "_").as_str() {
            "service" => {
                let service = g3_icap_xact::load_service_config(v)
                    .context(format!("invalid value for key {k}"))?;
                config.service = Some(service);
            }
            "adaptation" => {
                config.adaptation = g3_icap_xact::load_xact_config(v)
                    .context(format!("invalid value for key {k}"))?;
            }
            "max_idle_connections" => match v {
                Yaml::Integer(i) => {
                    config.max_idle_connections = usize::try_from(*i)
                        .map_err(|e| anyhow!("invalid value for key {k}: {e}"))?;
                }
                _ => return Err(anyhow!("invalid value for key {k}: should be integer")),
            },
            _ => return Err(anyhow!("invalid key {k}")),
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn full_file() {
        let content = r#"
            service:
              method: respmod
              url: icap://127.0.0.1:1344/respmod
            adaptation:
              io_timeout: 10s
            max-idle-connections: 0
        "#;
        let config = load_str(content).unwrap();
        let service = config.service.unwrap();
        assert_eq!(service.key(), "respmod_127.0.0.1");
        assert_eq!(config.adaptation.io_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_idle_connections, 0);
    }

    #[test]
    fn empty_file() {
        let config = load_str("").unwrap();
        assert!(config.service.is_none());
        assert_eq!(config.max_idle_connections, DEFAULT_MAX_IDLE_CONNECTIONS);
    }

    #[test]
    fn invalid() {
        assert!(load_str("- a").is_err());
        assert!(load_str("unknown: 1").is_err());
        assert!(load_str("max_idle_connections: -1").is_err());
        assert!(load_str("service: {method: options, url: 'icap://127.0.0.1/'}").is_err());
    }
}
