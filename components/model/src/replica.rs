use std::fmt::{self, Display, Formatter};

/// Opaque identifier of a replica participating in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicaId(pub u32);

impl Display for ReplicaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ReplicaId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Endpoint of a replica as configured in the cluster the query runs against.
///
/// Lower `priority` values are preferred when the initiator has more candidate replicas than
/// `max_parallel_replicas` allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaDescriptor {
    pub id: ReplicaId,
    pub host: String,
    pub port: u16,
    pub priority: i32,
}

impl ReplicaDescriptor {
    pub fn new<Host>(id: u32, host: Host, port: u16) -> Self
    where
        Host: AsRef<str>,
    {
        Self {
            id: ReplicaId(id),
            host: host.as_ref().to_owned(),
            port,
            priority: 1,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Address in form of `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for ReplicaDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address() {
        let replica = ReplicaDescriptor::new(2, "node2", 9000).with_priority(3);
        assert_eq!("node2:9000", replica.address());
        assert_eq!(3, replica.priority);
        assert_eq!("2#node2:9000", replica.to_string());
    }
}
