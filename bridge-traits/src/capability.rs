//! Capability descriptor of a remote client

use core_library::MediaKind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Movies,
    Series,
    Tracks,
    Albums,
    Artists,
    Playlists,
    Collections,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Movies,
        Capability::Series,
        Capability::Tracks,
        Capability::Albums,
        Capability::Artists,
        Capability::Playlists,
        Capability::Collections,
    ];

    /// Capability a client needs to serve entities of `kind`
    pub fn for_kind(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Movie => Capability::Movies,
            MediaKind::Series => Capability::Series,
            MediaKind::Track => Capability::Tracks,
            MediaKind::Album => Capability::Albums,
            MediaKind::Artist => Capability::Artists,
            MediaKind::Playlist => Capability::Playlists,
            MediaKind::Collection => Capability::Collections,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Movies => "movies",
            Capability::Series => "series",
            Capability::Tracks => "tracks",
            Capability::Albums => "albums",
            Capability::Artists => "artists",
            Capability::Playlists => "playlists",
            Capability::Collections => "collections",
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Set of capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn supports_kind(&self, kind: MediaKind) -> bool {
        self.contains(Capability::for_kind(kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut caps = Capabilities::empty();
        for capability in iter {
            caps.insert(capability);
        }
        caps
    }
}
