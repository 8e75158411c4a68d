//! Stored records, their keys, and partitions.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use entl_core::{ActivationToken, AppId, FeatureName, JobId, LicenseId, TenantId, ValidationError};
use entl_eval::FeatureFlag;
use entl_state::{Activation, JobRecord, License, Subscription, Tenant};

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

/// Unit of locking and sequencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Partition {
    /// Global feature flags.
    Global,
    /// Everything belonging to one tenant.
    Tenant(TenantId),
}

impl Partition {
    /// Tenant of a tenant partition.
    pub fn tenant(&self) -> Option<TenantId> {
        match self {
            Self::Global => None,
            Self::Tenant(id) => Some(*id),
        }
    }
}

impl From<Option<TenantId>> for Partition {
    fn from(tenant: Option<TenantId>) -> Self {
        tenant.map_or(Self::Global, Self::Tenant)
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Tenant(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for Partition {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "global" {
            return Ok(Self::Global);
        }
        TenantId::from_str(s)
            .map(Self::Tenant)
            .map_err(|_| ValidationError::Rule(format!("invalid partition: {s}")))
    }
}

impl From<Partition> for String {
    fn from(p: Partition) -> Self {
        p.to_string()
    }
}

impl TryFrom<String> for Partition {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ---------------------------------------------------------------------------
// RecordKey / RecordKind
// ---------------------------------------------------------------------------

/// Kind of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// [`Tenant`].
    Tenant,
    /// [`License`].
    License,
    /// [`Subscription`].
    Subscription,
    /// [`Activation`].
    Activation,
    /// [`FeatureFlag`].
    Flag,
    /// [`JobRecord`].
    Job,
}

impl RecordKind {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::License => "license",
            Self::Subscription => "subscription",
            Self::Activation => "activation",
            Self::Flag => "flag",
            Self::Job => "job",
        }
    }
}

/// Identity of a stored record. Every key determines its partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordKey {
    /// A tenant.
    Tenant {
        /// Tenant.
        tenant: TenantId,
    },
    /// A license.
    License {
        /// Owning tenant.
        tenant: TenantId,
        /// License.
        id: LicenseId,
    },
    /// A subscription.
    Subscription {
        /// Owning tenant.
        tenant: TenantId,
        /// Subscribed app.
        app: AppId,
    },
    /// An activation.
    Activation {
        /// Owning tenant.
        tenant: TenantId,
        /// Activation token.
        token: ActivationToken,
    },
    /// A feature flag.
    Flag {
        /// Owning tenant, `None` for global.
        tenant: Option<TenantId>,
        /// Flag name.
        name: FeatureName,
    },
    /// An archive/restore job.
    Job {
        /// Owning tenant.
        tenant: TenantId,
        /// Job.
        id: JobId,
    },
}

impl RecordKey {
    /// Partition the key lives in.
    pub fn partition(&self) -> Partition {
        match self {
            Self::Tenant { tenant }
            | Self::License { tenant, .. }
            | Self::Subscription { tenant, .. }
            | Self::Activation { tenant, .. }
            | Self::Job { tenant, .. } => Partition::Tenant(*tenant),
            Self::Flag { tenant, .. } => Partition::from(*tenant),
        }
    }

    /// Kind of record the key names.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Tenant { .. } => RecordKind::Tenant,
            Self::License { .. } => RecordKind::License,
            Self::Subscription { .. } => RecordKind::Subscription,
            Self::Activation { .. } => RecordKind::Activation,
            Self::Flag { .. } => RecordKind::Flag,
            Self::Job { .. } => RecordKind::Job,
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tenant { tenant } => write!(f, "tenant/{tenant}"),
            Self::License { tenant, id } => write!(f, "license/{tenant}/{id}"),
            Self::Subscription { tenant, app } => write!(f, "subscription/{tenant}/{app}"),
            Self::Activation { tenant, token } => write!(f, "activation/{tenant}/{token}"),
            Self::Flag { tenant: None, name } => write!(f, "flag/global/{name}"),
            Self::Flag {
                tenant: Some(tenant),
                name,
            } => write!(f, "flag/{tenant}/{name}"),
            Self::Job { tenant, id } => write!(f, "job/{tenant}/{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Any stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    /// A tenant.
    Tenant(Tenant),
    /// A license.
    License(License),
    /// A subscription.
    Subscription(Subscription),
    /// An activation.
    Activation(Activation),
    /// A feature flag.
    Flag(FeatureFlag),
    /// An archive/restore job.
    Job(JobRecord),
}

impl Record {
    /// Key of this record.
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Tenant(t) => RecordKey::Tenant { tenant: t.id },
            Self::License(l) => RecordKey::License {
                tenant: l.tenant_id,
                id: l.id,
            },
            Self::Subscription(s) => RecordKey::Subscription {
                tenant: s.tenant_id,
                app: s.app_id.clone(),
            },
            Self::Activation(a) => RecordKey::Activation {
                tenant: a.tenant_id,
                token: a.token.clone(),
            },
            Self::Flag(f) => RecordKey::Flag {
                tenant: f.tenant_id,
                name: f.name.clone(),
            },
            Self::Job(j) => RecordKey::Job {
                tenant: j.tenant_id,
                id: j.id,
            },
        }
    }

    /// Kind of this record.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Tenant(_) => RecordKind::Tenant,
            Self::License(_) => RecordKind::License,
            Self::Subscription(_) => RecordKind::Subscription,
            Self::Activation(_) => RecordKind::Activation,
            Self::Flag(_) => RecordKind::Flag,
            Self::Job(_) => RecordKind::Job,
        }
    }
}

macro_rules! record_accessor {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        impl Record {
            #[doc = concat!("The inner [`", stringify!($ty), "`], if this is one.")]
            pub fn $fn_name(&self) -> Option<&$ty> {
                match self {
                    Self::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Record {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        }
    };
}

record_accessor!(as_tenant, Tenant, Tenant);
record_accessor!(as_license, License, License);
record_accessor!(as_subscription, Subscription, Subscription);
record_accessor!(as_activation, Activation, Activation);
record_accessor!(as_flag, Flag, FeatureFlag);
record_accessor!(as_job, Job, JobRecord);

// ---------------------------------------------------------------------------
// Versioned
// ---------------------------------------------------------------------------

/// A value with the version it was read at. Versions start at 1 and grow by
/// one on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Version of the stored record.
    pub version: u64,
    /// The value.
    pub value: T,
}

impl<T> Versioned<T> {
    /// Map the value, keeping the version.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            version: self.version,
            value: f(self.value),
        }
    }
}

/// A record as persisted, with its version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// The record.
    pub record: Record,
    /// Its version.
    pub version: u64,
}
