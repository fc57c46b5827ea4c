//! Checkpoint Witnesses
//!
//! A witness attests that a checkpoint hash existed at a point in time and
//! can later confirm that attestation. The set of strategies is closed:
//! a local development witness, an RFC 3161 style time-stamping authority,
//! a threshold multi-agency witness, and a composite over any of these.

pub mod composite;
pub mod local;
pub mod multi_agency;
pub mod tsa;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Result;

pub use composite::CompositeWitness;
pub use local::LocalWitness;
pub use multi_agency::{
    AgencySignature, AgencyWitnessConfig, LocalAgency, MultiAgencyConfig, MultiAgencyProof,
    MultiAgencyWitness, WitnessRequest,
};
pub use tsa::{TimestampAuthority, TsaConfig, TsaWitness};

/// Kind of witness that produced a proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WitnessType {
    Local,
    #[serde(rename = "rfc3161_tsa")]
    Rfc3161Tsa,
    MultiAgency,
    Composite,
}

impl WitnessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WitnessType::Local => "local",
            WitnessType::Rfc3161Tsa => "rfc3161_tsa",
            WitnessType::MultiAgency => "multi_agency",
            WitnessType::Composite => "composite",
        }
    }
}

impl fmt::Display for WitnessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WitnessType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(WitnessType::Local),
            "rfc3161_tsa" => Ok(WitnessType::Rfc3161Tsa),
            "multi_agency" => Ok(WitnessType::MultiAgency),
            "composite" => Ok(WitnessType::Composite),
            _ => Err(format!("Unknown witness type: {}", s)),
        }
    }
}

/// Confirmation state of a witness proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WitnessStatus {
    Pending,
    Confirmed,
    Failed,
}

impl WitnessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WitnessStatus::Pending => "pending",
            WitnessStatus::Confirmed => "confirmed",
            WitnessStatus::Failed => "failed",
        }
    }
}

impl FromStr for WitnessStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WitnessStatus::Pending),
            "confirmed" => Ok(WitnessStatus::Confirmed),
            "failed" => Ok(WitnessStatus::Failed),
            _ => Err(format!("Unknown witness status: {}", s)),
        }
    }
}

/// Opaque proof returned by a witness, plus an optional lookup URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessReceipt {
    pub proof: Vec<u8>,
    pub url: Option<String>,
}

impl WitnessReceipt {
    pub fn new(proof: Vec<u8>) -> Self {
        Self { proof, url: None }
    }
}

/// A configured witness strategy
#[derive(Debug, Clone)]
pub enum Witness {
    Local(LocalWitness),
    Tsa(TsaWitness),
    MultiAgency(MultiAgencyWitness),
    Composite(CompositeWitness),
}

impl Witness {
    pub fn witness_type(&self) -> WitnessType {
        match self {
            Witness::Local(_) => WitnessType::Local,
            Witness::Tsa(_) => WitnessType::Rfc3161Tsa,
            Witness::MultiAgency(_) => WitnessType::MultiAgency,
            Witness::Composite(_) => WitnessType::Composite,
        }
    }

    /// The multi-agency witness in this strategy, if any, so the same
    /// identity can serve co-signing requests from peers.
    pub fn multi_agency(&self) -> Option<&MultiAgencyWitness> {
        match self {
            Witness::MultiAgency(w) => Some(w),
            Witness::Composite(w) => w.witnesses().iter().find_map(Witness::multi_agency),
            _ => None,
        }
    }

    /// Submit a checkpoint hash for attestation.
    pub fn timestamp<'a>(
        &'a self,
        hash: &'a str,
        last_sequence: i64,
        entry_count: i64,
    ) -> BoxFuture<'a, Result<WitnessReceipt>> {
        match self {
            Witness::Local(w) => {
                Box::pin(async move { Ok(w.timestamp(hash, last_sequence, entry_count)) })
            }
            Witness::Tsa(w) => Box::pin(async move { w.timestamp(hash) }),
            Witness::MultiAgency(w) => Box::pin(w.timestamp(hash, last_sequence, entry_count)),
            Witness::Composite(w) => w.timestamp(hash, last_sequence, entry_count),
        }
    }

    /// Confirm a previously issued proof is authentic for `hash`.
    pub fn verify<'a>(&'a self, hash: &'a str, proof: &'a [u8]) -> BoxFuture<'a, Result<bool>> {
        match self {
            Witness::Local(w) => Box::pin(async move { Ok(w.verify(hash, proof)) }),
            Witness::Tsa(w) => Box::pin(async move { w.verify(hash, proof) }),
            Witness::MultiAgency(w) => Box::pin(async move { w.verify(hash, proof) }),
            Witness::Composite(w) => w.verify(hash, proof),
        }
    }

    pub fn get_status<'a>(&'a self, proof: &'a [u8]) -> BoxFuture<'a, Result<WitnessStatus>> {
        match self {
            Witness::Local(w) => Box::pin(async move { Ok(w.get_status(proof)) }),
            Witness::Tsa(w) => Box::pin(async move { Ok(w.get_status(proof)) }),
            Witness::MultiAgency(w) => Box::pin(async move { w.get_status(proof) }),
            Witness::Composite(w) => w.get_status(proof),
        }
    }
}

impl From<LocalWitness> for Witness {
    fn from(w: LocalWitness) -> Self {
        Witness::Local(w)
    }
}

impl From<TsaWitness> for Witness {
    fn from(w: TsaWitness) -> Self {
        Witness::Tsa(w)
    }
}

impl From<MultiAgencyWitness> for Witness {
    fn from(w: MultiAgencyWitness) -> Self {
        Witness::MultiAgency(w)
    }
}

impl From<CompositeWitness> for Witness {
    fn from(w: CompositeWitness) -> Self {
        Witness::Composite(w)
    }
}

impl Default for Witness {
    fn default() -> Self {
        Witness::Local(LocalWitness::new())
    }
}
