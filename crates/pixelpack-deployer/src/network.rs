//! Network identity and per-environment configuration.
//!
//! Local development chains get their dependency addresses from the artifacts
//! of the mock deployments; live networks read them from a static table keyed
//! by chain id.

use std::collections::BTreeMap;

use alloy_primitives::{address, b256, Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactStore;
use crate::contracts;
use crate::error::ConfigError;

/// Chain id used by the in-process and localhost development chains.
pub const LOCAL_CHAIN_ID: &str = "31337";

/// Network names treated as local development chains.
pub const DEVELOPMENT_CHAINS: [&str; 2] = ["hardhat", "localhost"];

/// Target chain for a pipeline run. Immutable for the duration of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    pub id: String,
    pub name: String,
    pub is_local: bool,
}

impl NetworkContext {
    pub fn new(id: &str, name: &str, is_local: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            is_local,
        }
    }

    /// The localhost development chain.
    pub fn local() -> Self {
        Self::new(LOCAL_CHAIN_ID, "localhost", true)
    }
}

/// Static per-network entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_token: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf_coordinator: Option<Address>,
    pub key_hash: B256,
    pub fee: U256,
    pub fund_amount: U256,
}

/// Environment field a step may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvField {
    FundingToken,
    OracleService,
}

/// Resolved configuration for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentConfig {
    pub network: String,
    pub is_local: bool,
    pub funding_token: Option<Address>,
    pub oracle_service: Option<Address>,
    pub callback_key: B256,
    pub request_fee: U256,
    pub fund_amount: U256,
}

impl EnvironmentConfig {
    /// LINK token address.
    pub fn funding_token(&self) -> Result<Address, ConfigError> {
        self.funding_token
            .ok_or_else(|| self.missing(contracts::LINK_TOKEN, "link token"))
    }

    /// VRF coordinator address.
    pub fn oracle_service(&self) -> Result<Address, ConfigError> {
        self.oracle_service
            .ok_or_else(|| self.missing(contracts::VRF_COORDINATOR_MOCK, "vrf coordinator"))
    }

    pub fn require(&self, field: EnvField) -> Result<(), ConfigError> {
        match field {
            EnvField::FundingToken => self.funding_token().map(|_| ()),
            EnvField::OracleService => self.oracle_service().map(|_| ()),
        }
    }

    fn missing(&self, artifact: &str, field: &'static str) -> ConfigError {
        if self.is_local {
            ConfigError::MissingArtifact {
                name: artifact.to_string(),
                network: self.network.clone(),
            }
        } else {
            ConfigError::MissingAddress {
                network: self.network.clone(),
                field,
            }
        }
    }
}

/// Static network table with a fallback entry for unrecognised ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTable {
    default: NetworkConfig,
    entries: BTreeMap<String, NetworkConfig>,
}

impl NetworkTable {
    pub fn new(default: NetworkConfig) -> Self {
        Self {
            default,
            entries: BTreeMap::new(),
        }
    }

    /// Built-in table: hardhat default, localhost and rinkeby.
    pub fn builtin() -> Self {
        let key_hash = b256!("2ed0feb3e7fd2022120aa84fab1945545a9f2ffc9076fd6156fa96eaff4c1311");
        let fee = U256::from(100_000_000_000_000_000u64);
        let fund_amount = U256::from(1_000_000_000_000_000_000u64);
        let entry = |name: &str, link_token, vrf_coordinator| NetworkConfig {
            name: name.to_string(),
            link_token,
            vrf_coordinator,
            key_hash,
            fee,
            fund_amount,
        };

        let mut table = Self::new(entry("hardhat", None, None));
        table.insert(LOCAL_CHAIN_ID, entry("localhost", None, None));
        table.insert(
            "4",
            entry(
                "rinkeby",
                Some(address!("01BE23585060835E02B77ef475b0Cc51aA1e0709")),
                Some(address!("b3dCcb4Cf7a26f6cf6B120Cf5A73875B7BBc655B")),
            ),
        );
        table
    }

    pub fn insert(&mut self, id: &str, config: NetworkConfig) {
        self.entries.insert(id.to_string(), config);
    }

    pub fn get(&self, id: &str) -> Option<&NetworkConfig> {
        self.entries.get(id)
    }

    pub fn default_entry(&self) -> &NetworkConfig {
        &self.default
    }

    /// Fund amount for `id`, falling back to the default entry.
    pub fn fund_amount_for(&self, id: &str) -> U256 {
        self.get(id).unwrap_or(&self.default).fund_amount
    }

    /// Chain id for a network name. The default entry's name maps to the local chain id.
    pub fn network_id_for(&self, name: &str) -> Option<&str> {
        if let Some((id, _)) = self.entries.iter().find(|(_, c)| c.name == name) {
            return Some(id.as_str());
        }
        (self.default.name == name).then_some(LOCAL_CHAIN_ID)
    }

    /// Build the run context for a network name.
    pub fn context_for(&self, name: &str) -> Result<NetworkContext, ConfigError> {
        let id = self
            .network_id_for(name)
            .ok_or_else(|| ConfigError::UnknownNetwork(name.to_string()))?;
        let is_local = DEVELOPMENT_CHAINS.contains(&name) || id == LOCAL_CHAIN_ID;
        Ok(NetworkContext::new(id, name, is_local))
    }

    /// Resolve the environment for `network`.
    ///
    /// Local address fields are read from already-deployed mock artifacts and left
    /// empty when those do not exist yet; the step that needs them fails on access.
    pub async fn resolve(
        &self,
        network: &NetworkContext,
        artifacts: &ArtifactStore,
    ) -> Result<EnvironmentConfig, ConfigError> {
        let entry = match self.get(&network.id) {
            Some(entry) => entry,
            None if network.is_local => &self.default,
            None => return Err(ConfigError::UnknownNetwork(network.id.clone())),
        };

        let (funding_token, oracle_service) = if network.is_local {
            let link = artifacts.get(&network.id, contracts::LINK_TOKEN).await;
            let coordinator = artifacts.get(&network.id, contracts::VRF_COORDINATOR_MOCK).await;
            (link.map(|a| a.address), coordinator.map(|a| a.address))
        } else {
            (entry.link_token, entry.vrf_coordinator)
        };

        Ok(EnvironmentConfig {
            network: network.id.clone(),
            is_local: network.is_local,
            funding_token,
            oracle_service,
            callback_key: entry.key_hash,
            request_fee: entry.fee,
            fund_amount: entry.fund_amount,
        })
    }
}

impl Default for NetworkTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Artifact;

    #[test]
    fn test_context_for_names() {
        let table = NetworkTable::builtin();

        let hardhat = table.context_for("hardhat").unwrap();
        assert_eq!(hardhat.id, LOCAL_CHAIN_ID);
        assert!(hardhat.is_local);

        let rinkeby = table.context_for("rinkeby").unwrap();
        assert_eq!(rinkeby.id, "4");
        assert!(!rinkeby.is_local);

        assert_eq!(
            table.context_for("mumbai"),
            Err(ConfigError::UnknownNetwork("mumbai".to_string()))
        );
    }

    #[test]
    fn test_fund_amount_lookup() {
        let table = NetworkTable::builtin();
        let one_link = U256::from(1_000_000_000_000_000_000u64);
        assert_eq!(table.fund_amount_for(LOCAL_CHAIN_ID), one_link);
        assert_eq!(table.fund_amount_for("80001"), table.default_entry().fund_amount);
    }

    #[tokio::test]
    async fn test_local_resolution_reads_mock_artifacts() {
        let table = NetworkTable::builtin();
        let network = NetworkContext::local();
        let store = ArtifactStore::in_memory();

        let env = table.resolve(&network, &store).await.unwrap();
        assert_eq!(
            env.funding_token(),
            Err(ConfigError::MissingArtifact {
                name: contracts::LINK_TOKEN.to_string(),
                network: LOCAL_CHAIN_ID.to_string(),
            })
        );

        let link = Address::with_last_byte(0x11);
        store
            .put(Artifact::new(contracts::LINK_TOKEN, link, LOCAL_CHAIN_ID))
            .await
            .unwrap();
        let env = table.resolve(&network, &store).await.unwrap();
        assert_eq!(env.funding_token(), Ok(link));
        assert!(env.require(EnvField::OracleService).is_err());
    }

    #[tokio::test]
    async fn test_live_resolution_uses_static_table() {
        let table = NetworkTable::builtin();
        let store = ArtifactStore::in_memory();
        let rinkeby = NetworkContext::new("4", "rinkeby", false);

        let env = table.resolve(&rinkeby, &store).await.unwrap();
        assert_eq!(
            env.funding_token().unwrap(),
            address!("01BE23585060835E02B77ef475b0Cc51aA1e0709")
        );
        assert_eq!(env.request_fee, U256::from(100_000_000_000_000_000u64));
    }

    #[tokio::test]
    async fn test_unknown_live_network_fails() {
        let table = NetworkTable::builtin();
        let store = ArtifactStore::in_memory();
        let network = NetworkContext::new("137", "polygon", false);

        assert_eq!(
            table.resolve(&network, &store).await,
            Err(ConfigError::UnknownNetwork("137".to_string()))
        );
    }

    #[tokio::test]
    async fn test_live_entry_without_addresses() {
        let mut table = NetworkTable::builtin();
        let mut entry = table.default_entry().clone();
        entry.name = "ganache".to_string();
        table.insert("1337", entry);

        let store = ArtifactStore::in_memory();
        let network = NetworkContext::new("1337", "ganache", false);
        let env = table.resolve(&network, &store).await.unwrap();

        assert_eq!(
            env.require(EnvField::FundingToken),
            Err(ConfigError::MissingAddress {
                network: "1337".to_string(),
                field: "link token",
            })
        );
    }
}
