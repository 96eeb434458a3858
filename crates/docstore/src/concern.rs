use serde::{Deserialize, Serialize};

/// Acknowledgement level required for reads inside a transaction.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadConcern {
    /// Most recent data on the node serving the read.
    #[default]
    Local,

    /// Data acknowledged by a majority of replicas.
    Majority,

    /// A consistent snapshot of majority-committed data.
    Snapshot,
}

/// Acknowledgement level required before a write is reported successful.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConcern {
    /// Acknowledged by the primary only.
    #[default]
    Acknowledged,

    /// Acknowledged by a majority of replicas.
    Majority,
}

/// Options used when starting a transaction.
///
/// Defaults to [`majority`](Self::majority), and so does any concern left
/// out when deserializing.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct TransactionOptions {
    /// Read concern applied to every read in the transaction.
    pub read_concern: ReadConcern,

    /// Write concern applied when the transaction commits.
    pub write_concern: WriteConcern,
}

impl TransactionOptions {
    /// Majority read and majority write, so a committed transaction survives
    /// a primary failover.
    #[must_use]
    pub const fn majority() -> Self {
        Self {
            read_concern: ReadConcern::Majority,
            write_concern: WriteConcern::Majority,
        }
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self::majority()
    }
}
