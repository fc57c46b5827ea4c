use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{AuditError, Result};
use crate::witness::{
    AgencyWitnessConfig, CompositeWitness, LocalAgency, LocalWitness, MultiAgencyConfig,
    MultiAgencyWitness, TimestampAuthority, TsaConfig, TsaWitness, Witness,
};

pub const DEFAULT_CONFIG_FILE: &str = "audit-chain.toml";
pub const ENV_PREFIX: &str = "AUDIT_CHAIN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Allows generated signing keys. Never enable in production.
    pub dev_mode: bool,
    pub witness: WitnessSettings,
    pub checkpoint: CheckpointSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://audit-chain.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WitnessKind {
    Local,
    #[serde(alias = "rfc3161_tsa")]
    Tsa,
    MultiAgency,
    Composite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WitnessSettings {
    pub kind: WitnessKind,
    pub tsa: TsaSettings,
    pub multi_agency: MultiAgencySettings,
    /// Members of a composite witness
    pub composite: Vec<WitnessKind>,
    /// Per sub-witness timeout inside a composite
    pub timeout_secs: u64,
}

impl Default for WitnessSettings {
    fn default() -> Self {
        Self {
            kind: WitnessKind::Local,
            tsa: TsaSettings::default(),
            multi_agency: MultiAgencySettings::default(),
            composite: Vec::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TsaSettings {
    pub enabled: bool,
    pub issuer: String,
    pub policy_oid: String,
    pub accuracy_seconds: u32,
    /// Hex-encoded secp256k1 signing key
    pub key_hex: Option<String>,
}

impl Default for TsaSettings {
    fn default() -> Self {
        let defaults = TsaConfig::default();
        Self {
            enabled: defaults.enabled,
            issuer: defaults.issuer,
            policy_oid: defaults.policy_oid,
            accuracy_seconds: defaults.accuracy_seconds,
            key_hex: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiAgencySettings {
    pub enabled: bool,
    pub agency_code: String,
    pub agency_name: String,
    pub key_hex: Option<String>,
    pub min_signatures: usize,
    pub request_timeout_secs: u64,
    pub agencies: Vec<AgencyWitnessConfig>,
}

impl Default for MultiAgencySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            agency_code: "LOCAL".to_string(),
            agency_name: "Local Agency".to_string(),
            key_hex: None,
            min_signatures: 1,
            request_timeout_secs: 30,
            agencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    /// Zero disables the background scheduler
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            timeout_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load from `audit-chain.toml` (if present) and `AUDIT_CHAIN_*`
    /// environment variables, e.g. `AUDIT_CHAIN_SERVER__PORT=8080`.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("witness.composite"),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| AuditError::Config(e.to_string()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn checkpoint_timeout(&self) -> Duration {
        Duration::from_secs(self.checkpoint.timeout_secs)
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        (self.checkpoint.interval_secs > 0).then(|| Duration::from_secs(self.checkpoint.interval_secs))
    }

    /// Build the configured witness strategy.
    pub fn build_witness(&self) -> Result<Witness> {
        match self.witness.kind {
            WitnessKind::Composite => {
                if self.witness.composite.is_empty() {
                    return Err(AuditError::Config(
                        "composite witness needs at least one member".to_string(),
                    ));
                }
                let members = self
                    .witness
                    .composite
                    .iter()
                    .map(|kind| self.build_single(*kind))
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompositeWitness::new(members)
                    .with_timeout(Duration::from_secs(self.witness.timeout_secs))
                    .into())
            }
            kind => self.build_single(kind),
        }
    }

    fn build_single(&self, kind: WitnessKind) -> Result<Witness> {
        match kind {
            WitnessKind::Local => {
                if !self.dev_mode {
                    warn!("Local witness has no external trust anchor; use it for development only");
                }
                Ok(LocalWitness::new().into())
            }
            WitnessKind::Tsa => Ok(TsaWitness::new(Arc::new(self.build_tsa()?)).into()),
            WitnessKind::MultiAgency => Ok(self.build_multi_agency()?.into()),
            WitnessKind::Composite => Err(AuditError::Config(
                "composite witnesses cannot be nested through configuration".to_string(),
            )),
        }
    }

    fn build_tsa(&self) -> Result<TimestampAuthority> {
        let settings = &self.witness.tsa;
        let config = TsaConfig {
            enabled: settings.enabled,
            issuer: settings.issuer.clone(),
            policy_oid: settings.policy_oid.clone(),
            accuracy_seconds: settings.accuracy_seconds,
        };

        match self.signing_key("witness.tsa.key_hex", settings.key_hex.as_deref())? {
            Some(key) => Ok(TimestampAuthority::new(config, key)),
            None => Ok(TimestampAuthority::generate(config)),
        }
    }

    fn build_multi_agency(&self) -> Result<MultiAgencyWitness> {
        let settings = &self.witness.multi_agency;
        let config = MultiAgencyConfig {
            enabled: settings.enabled,
            min_signatures: settings.min_signatures,
            agencies: settings.agencies.clone(),
            request_timeout_secs: settings.request_timeout_secs,
        };

        let local = match self.signing_key("witness.multi_agency.key_hex", settings.key_hex.as_deref())? {
            Some(key) => LocalAgency::new(&settings.agency_code, &settings.agency_name, key),
            None => LocalAgency::generate(&settings.agency_code, &settings.agency_name),
        };
        MultiAgencyWitness::new(config, local)
    }

    /// Parse a configured key. A missing key is only tolerated in dev mode,
    /// where a throwaway key is generated instead.
    fn signing_key(&self, name: &str, key_hex: Option<&str>) -> Result<Option<SecretKey>> {
        match key_hex {
            Some(hex) => SecretKey::from_str(hex)
                .map(Some)
                .map_err(|e| AuditError::Config(format!("Invalid {}: {}", name, e))),
            None if self.dev_mode => {
                warn!("{} not set, generating a throwaway key (dev mode)", name);
                Ok(None)
            }
            None => Err(AuditError::Config(format!("{} is required", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::witness::WitnessType;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.witness.kind, WitnessKind::Local);
        assert_eq!(config.checkpoint_interval(), Some(Duration::from_secs(3600)));
        assert_eq!(
            config.build_witness().unwrap().witness_type(),
            WitnessType::Local
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
dev_mode = true

[server]
port = 8088

[witness]
kind = "composite"
composite = ["local", "tsa"]

[checkpoint]
interval_secs = 0
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.checkpoint_interval().is_none());

        let witness = config.build_witness().unwrap();
        assert_eq!(witness.witness_type(), WitnessType::Composite);
    }

    #[test]
    fn test_missing_key_outside_dev_mode() {
        let mut config = AppConfig::default();
        config.witness.kind = WitnessKind::Tsa;
        assert!(matches!(config.build_witness(), Err(AuditError::Config(_))));

        config.dev_mode = true;
        assert!(config.build_witness().is_ok());
    }

    #[test]
    fn test_configured_key_is_used() {
        let key = SecretKey::new(&mut secp256k1::rand::thread_rng());
        let mut config = AppConfig::default();
        config.witness.kind = WitnessKind::Tsa;
        config.witness.tsa.key_hex = Some(hex::encode(key.secret_bytes()));
        assert!(config.build_witness().is_ok());

        config.witness.tsa.key_hex = Some("not-a-key".to_string());
        assert!(config.build_witness().is_err());
    }

    #[test]
    fn test_empty_composite_rejected() {
        let mut config = AppConfig::default();
        config.witness.kind = WitnessKind::Composite;
        assert!(config.build_witness().is_err());
    }
}
