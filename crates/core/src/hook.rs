//! Lifecycle hook event names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A point in the upload lifecycle at which observers are notified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    /// An upload was created.
    PostCreate,
    /// A chunk was accepted.
    PostReceive,
    /// An upload became complete.
    PostFinish,
    /// An upload was terminated.
    PostTerminate,
}

impl HookEvent {
    /// Every hook event, in lifecycle order.
    pub const ALL: [HookEvent; 4] = [
        HookEvent::PostCreate,
        HookEvent::PostReceive,
        HookEvent::PostFinish,
        HookEvent::PostTerminate,
    ];

    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostCreate => "post-create",
            Self::PostReceive => "post-receive",
            Self::PostFinish => "post-finish",
            Self::PostTerminate => "post-terminate",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| crate::Error::UnknownHookEvent(s.to_string()))
    }
}
