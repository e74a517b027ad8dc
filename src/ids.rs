//! Opaque 128-bit identifiers for every entity in §3. Each is a thin
//! `Uuid` newtype so repository signatures can't mix up, say, a `TaskId`
//! and a `FileId` at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(UserId);
opaque_id!(FolderId);
opaque_id!(FileId);
opaque_id!(TaskId);
opaque_id!(ResultId);
opaque_id!(VersionId);
opaque_id!(SessionId);
opaque_id!(PermissionId);
opaque_id!(AuditId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_display() {
        let id = TaskId::new();
        let s = id.to_string();
        let parsed = Uuid::parse_str(&s).unwrap();
        assert_eq!(TaskId::from(parsed), id);
    }

    #[test]
    fn distinct_ids_are_distinct_types() {
        let task = TaskId::new();
        let file = FileId::new();
        assert_ne!(task.0, file.0);
    }
}
