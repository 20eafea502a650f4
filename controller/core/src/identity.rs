use crate::CLUSTER_DOMAIN;
use std::fmt;

/// The workload identity backing a service. Service accounts are used as
/// identities.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceIdentity {
    pub namespace: String,
    pub name: String,
}

impl ServiceIdentity {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{CLUSTER_DOMAIN}", self.name, self.namespace)
    }
}
