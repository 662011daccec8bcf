//! Newtypes for Scaleway API values and the state mapping onto
//! [`ProcessorStatus`].

use std::ops::Deref;

use crate::status::ProcessorStatus;

macro_rules! newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }
    };
}

newtype!(InstanceId);
newtype!(Zone);
newtype!(InstanceState);
newtype!(Action);

/// Maps a Scaleway server state onto the engine's status enum.
///
/// Unknown states are treated as [`ProcessorStatus::Off`] so the failure
/// policy falls back to a reset rather than a retry.
#[must_use]
pub fn status_from_state(state: &str) -> ProcessorStatus {
    match state {
        "starting" => ProcessorStatus::Creating,
        "running" => ProcessorStatus::Available,
        "stopping" | "locked" => ProcessorStatus::Destroying,
        _ => ProcessorStatus::Off,
    }
}
