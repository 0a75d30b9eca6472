use std::fmt::{self, Display, Formatter};

/// Identifier of a query, stable from the moment the initiator accepts it until it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(String);

impl QueryId {
    pub fn new<Id>(id: Id) -> Self
    where
        Id: AsRef<str>,
    {
        Self(id.as_ref().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueryId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QueryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for QueryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
