//! Object lifecycle state machine.
//!
//! A stored object moves `New -> Created -> {Uploaded | Downloaded} ->
//! Expired`. `New` is entered at record creation, before any bucket is
//! linked. `Created` is entered once linkage succeeds and the first
//! capability has been issued. `Uploaded` and `Downloaded` are entered only
//! by the reconciliation pipeline when the object store confirms the
//! operation. `Expired` may be entered at any time and is terminal.
//!
//! Transitions are monotonic: a record never moves back to an earlier
//! state. Capability issuance is gated on the current state so that, for
//! example, a GET capability on an object nothing was ever uploaded to is
//! rejected here with a precise error instead of failing later at the
//! backend.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::StoreError;

/// Lifecycle status of a stored object.
///
/// Persisted and serialized as the single-letter codes `N/C/U/D/E`, the
/// same representation the metadata rows use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    /// Record exists, bucket/location not yet linked.
    New,
    /// Bucket linked and at least one capability issued.
    Created,
    /// The object store confirmed an upload completed.
    Uploaded,
    /// The object store confirmed a download completed.
    Downloaded,
    /// Administratively or TTL-expired. Terminal.
    Expired,
}

/// A client-visible object-store operation a capability can be issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Put,
    Head,
}

impl ObjectStatus {
    /// The single-letter code stored in the metadata repository.
    pub fn code(&self) -> &'static str {
        match self {
            ObjectStatus::New => "N",
            ObjectStatus::Created => "C",
            ObjectStatus::Uploaded => "U",
            ObjectStatus::Downloaded => "D",
            ObjectStatus::Expired => "E",
        }
    }

    /// Parse a stored single-letter code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "N" => Some(ObjectStatus::New),
            "C" => Some(ObjectStatus::Created),
            "U" => Some(ObjectStatus::Uploaded),
            "D" => Some(ObjectStatus::Downloaded),
            "E" => Some(ObjectStatus::Expired),
            _ => None,
        }
    }

    /// Ordering rank used for the monotonicity check. `Uploaded` and
    /// `Downloaded` share a rank: they are sibling outcomes, not ordered
    /// against each other.
    fn rank(&self) -> u8 {
        match self {
            ObjectStatus::New => 0,
            ObjectStatus::Created => 1,
            ObjectStatus::Uploaded | ObjectStatus::Downloaded => 2,
            ObjectStatus::Expired => 3,
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ObjectStatus::Expired)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// `Expired` is reachable from any state. Re-asserting the current
    /// status is allowed (and is what makes reconciliation replay a no-op).
    pub fn can_transition(&self, next: ObjectStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        if next == ObjectStatus::Expired {
            return true;
        }
        next.rank() >= self.rank()
    }

    /// Validate a transition, mapping an illegal one to the error surfaced
    /// to callers.
    pub fn check_transition(&self, next: ObjectStatus) -> Result<(), StoreError> {
        if self.can_transition(next) {
            Ok(())
        } else {
            Err(StoreError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Whether a capability for `operation` may be issued in this state.
    ///
    /// | State                | GET  | PUT  | HEAD |
    /// |----------------------|------|------|------|
    /// | New                  | deny | deny | deny |
    /// | Created              | allow| allow| allow|
    /// | Uploaded/Downloaded  | allow| allow| allow|
    /// | Expired              | deny | deny | deny |
    pub fn allows_capability(&self, _operation: Operation) -> bool {
        match self {
            ObjectStatus::New | ObjectStatus::Expired => false,
            ObjectStatus::Created | ObjectStatus::Uploaded | ObjectStatus::Downloaded => true,
        }
    }
}

impl Serialize for ObjectStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for ObjectStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        ObjectStatus::from_code(&code)
            .ok_or_else(|| D::Error::custom(format!("invalid status code: {code}")))
    }
}

impl std::fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ObjectStatus::New => "New",
            ObjectStatus::Created => "Created",
            ObjectStatus::Uploaded => "Uploaded",
            ObjectStatus::Downloaded => "Downloaded",
            ObjectStatus::Expired => "Expired",
        };
        write!(f, "{name}")
    }
}

impl Operation {
    /// Parse the lowercase path form used by the access endpoint.
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "get" => Some(Operation::Get),
            "put" => Some(Operation::Put),
            "head" => Some(Operation::Head),
            _ => None,
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "GET",
            Operation::Put => "PUT",
            Operation::Head => "HEAD",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// -- Tests --------------------------------------------------------------------
