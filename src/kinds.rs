//! Resource-kind catalog
//!
//! Static per-kind tables: which states count as pending and target for each
//! operation, and the field rules the planner enforces on updates.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::PollSettings;
use crate::convergence::{
    ConvergenceSpec, NotFoundPolicy, RefreshProbe, ResourceState, SpecError, StateSet,
};
use crate::patch::{Cardinality, FieldRuleTable};

/// State a deleted resource is reported as once it stops being found
pub const DELETED_STATE: &str = "DELETED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum ResourceKind {
    Cluster,
    NodeGroup,
    Export,
    VpcPeering,
    AuditLogRule,
    PrivateEndpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Pending and target states for one kind and operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindStates {
    pub pending: &'static [&'static str],
    pub target: &'static [&'static str],
}

impl KindStates {
    pub fn pending_set(&self) -> StateSet {
        self.pending.iter().copied().collect()
    }

    pub fn target_set(&self) -> StateSet {
        self.target.iter().copied().collect()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown resource kind: {0}")]
pub struct UnknownKind(pub String);

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Cluster,
        ResourceKind::NodeGroup,
        ResourceKind::Export,
        ResourceKind::VpcPeering,
        ResourceKind::AuditLogRule,
        ResourceKind::PrivateEndpoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::NodeGroup => "node-group",
            ResourceKind::Export => "export",
            ResourceKind::VpcPeering => "vpc-peering",
            ResourceKind::AuditLogRule => "audit-log-rule",
            ResourceKind::PrivateEndpoint => "private-endpoint",
        }
    }

    pub fn states(&self, operation: Operation) -> &'static KindStates {
        use Operation::*;
        use ResourceKind::*;
        match (self, operation) {
            (Cluster, Create) => &CLUSTER_CREATE,
            (Cluster, Update) => &CLUSTER_UPDATE,
            (NodeGroup, Create) => &NODE_GROUP_CREATE,
            (NodeGroup, Update) => &NODE_GROUP_UPDATE,
            (Export, Create) => &EXPORT_CREATE,
            (Export, Update) => &EXPORT_UPDATE,
            (VpcPeering, Create) => &VPC_PEERING_CREATE,
            (VpcPeering, Update) => &VPC_PEERING_UPDATE,
            (AuditLogRule, Create) => &AUDIT_LOG_RULE_CREATE,
            (AuditLogRule, Update) => &AUDIT_LOG_RULE_UPDATE,
            (PrivateEndpoint, Create) => &PRIVATE_ENDPOINT_CREATE,
            (PrivateEndpoint, Update) => &PRIVATE_ENDPOINT_UPDATE,
            (Export, Delete) => &EXPORT_DELETE,
            (_, Delete) => &GENERIC_DELETE,
        }
    }

    pub fn field_rules(&self) -> &'static FieldRuleTable {
        match self {
            ResourceKind::Cluster => &CLUSTER_RULES,
            ResourceKind::NodeGroup => &NODE_GROUP_RULES,
            ResourceKind::Export => &EXPORT_RULES,
            ResourceKind::VpcPeering => &VPC_PEERING_RULES,
            ResourceKind::AuditLogRule => &AUDIT_LOG_RULE_RULES,
            ResourceKind::PrivateEndpoint => &PRIVATE_ENDPOINT_RULES,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// How a missing resource is read while waiting on this operation.
    ///
    /// Waiting on a delete counts a miss as [`DELETED_STATE`]; create and
    /// update tolerate the configured number of consecutive misses.
    pub fn not_found_policy(&self, settings: &PollSettings) -> NotFoundPolicy {
        match self {
            Operation::Delete => NotFoundPolicy::TreatAs(ResourceState::new(DELETED_STATE)),
            Operation::Create | Operation::Update => settings.not_found_policy(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<P: RefreshProbe> ConvergenceSpec<P> {
    /// [`ConvergenceSpec`] for waiting on `operation` against a resource of `kind`
    pub fn for_kind(
        kind: ResourceKind,
        operation: Operation,
        probe: P,
        settings: &PollSettings,
    ) -> Result<Self, SpecError> {
        let states = kind.states(operation);
        Ok(
            ConvergenceSpec::new(states.pending_set(), states.target_set(), probe)?
                .with_interval(settings.interval())
                .with_timeout(settings.timeout())
                .with_label(format!("{} {}", kind, operation)),
        )
    }
}

// ============================================================================
// State tables
// ============================================================================

static CLUSTER_CREATE: KindStates = KindStates {
    pending: &["CREATING", "PROVISIONING"],
    target: &["ACTIVE"],
};

static CLUSTER_UPDATE: KindStates = KindStates {
    pending: &["UPDATING", "REPAIRING"],
    target: &["ACTIVE"],
};

static NODE_GROUP_CREATE: KindStates = KindStates {
    pending: &["CREATING"],
    target: &["ACTIVE"],
};

static NODE_GROUP_UPDATE: KindStates = KindStates {
    pending: &["UPDATING", "SCALING"],
    target: &["ACTIVE"],
};

static EXPORT_CREATE: KindStates = KindStates {
    pending: &["QUEUED", "IN_PROGRESS"],
    target: &["SUCCESSFUL"],
};

static EXPORT_UPDATE: KindStates = KindStates {
    pending: &["IN_PROGRESS"],
    target: &["SUCCESSFUL"],
};

static EXPORT_DELETE: KindStates = KindStates {
    pending: &["CANCELLING", "DELETING"],
    target: &["CANCELLED", DELETED_STATE],
};

static VPC_PEERING_CREATE: KindStates = KindStates {
    pending: &["INITIATING", "PENDING_ACCEPTANCE", "FINALIZING"],
    target: &["AVAILABLE"],
};

static VPC_PEERING_UPDATE: KindStates = KindStates {
    pending: &["MODIFYING"],
    target: &["AVAILABLE"],
};

static AUDIT_LOG_RULE_CREATE: KindStates = KindStates {
    pending: &["PENDING"],
    target: &["ENABLED"],
};

static AUDIT_LOG_RULE_UPDATE: KindStates = KindStates {
    pending: &["UPDATING"],
    target: &["ENABLED", "DISABLED"],
};

static PRIVATE_ENDPOINT_CREATE: KindStates = KindStates {
    pending: &["INITIATING", "WAITING_FOR_USER"],
    target: &["AVAILABLE"],
};

static PRIVATE_ENDPOINT_UPDATE: KindStates = KindStates {
    pending: &["UPDATING"],
    target: &["AVAILABLE"],
};

static GENERIC_DELETE: KindStates = KindStates {
    pending: &["DELETING", "TERMINATING"],
    target: &[DELETED_STATE],
};

// ============================================================================
// Field rule tables
// ============================================================================

static CLUSTER_RULES: LazyLock<FieldRuleTable> = LazyLock::new(|| {
    FieldRuleTable::new()
        .immutable("name")
        .immutable("cloud_provider")
        .immutable("region")
        .immutable("network")
        .exclusive("sizing", &["instance_size", "autoscaling"])
        .collection("ip_access_list", "cidr", Cardinality::Variable)
        .collection("replication_specs", "zone", Cardinality::Fixed)
        .default_value("backup_enabled", json!(false))
        .default_value("termination_protection", json!(false))
        .default_value("labels", json!({}))
});

static NODE_GROUP_RULES: LazyLock<FieldRuleTable> = LazyLock::new(|| {
    FieldRuleTable::new()
        .immutable("cluster_id")
        .immutable("name")
        .immutable("subnet_ids")
        .exclusive("capacity", &["node_count", "autoscaling"])
        .collection("taints", "key", Cardinality::Variable)
        .default_value("labels", json!({}))
        .default_value("taints", json!([]))
});

static EXPORT_RULES: LazyLock<FieldRuleTable> = LazyLock::new(|| {
    FieldRuleTable::new()
        .immutable("cluster_id")
        .immutable("snapshot_id")
        .immutable("bucket")
        .collection("custom_data", "key", Cardinality::Variable)
        .default_value("custom_data", json!([]))
});

static VPC_PEERING_RULES: LazyLock<FieldRuleTable> = LazyLock::new(|| {
    FieldRuleTable::new()
        .immutable("container_id")
        .immutable("vpc_id")
        .immutable("peer_vpc_id")
        .immutable("region")
        .collection("route_tables", "id", Cardinality::Variable)
});

static AUDIT_LOG_RULE_RULES: LazyLock<FieldRuleTable> = LazyLock::new(|| {
    FieldRuleTable::new()
        .immutable("project_id")
        .exclusive("filter", &["filter", "filter_template"])
        .default_value("enabled", json!(true))
        .default_value("audit_authorization_success", json!(false))
});

static PRIVATE_ENDPOINT_RULES: LazyLock<FieldRuleTable> = LazyLock::new(|| {
    FieldRuleTable::new()
        .immutable("provider")
        .immutable("region")
        .immutable("endpoint_service_name")
        .collection("interfaces", "subnet_id", Cardinality::Fixed)
});
