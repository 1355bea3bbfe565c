//! Region identities
//!
//! The heap spans three physically separate regions. Address lookups always
//! test them in the order of [`RegionId::ALL`].

pub use zoneheap_platform::Region;

/// Numeric address as seen by callers; 0 is null
pub type Address = usize;

/// Which region a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegionId {
    /// Large general-purpose work RAM
    #[default]
    Main,

    /// Smaller, slower work RAM
    Auxiliary,

    /// Optional expansion board memory
    Expansion,
}

impl RegionId {
    /// Every region in lookup priority order
    pub const ALL: [RegionId; 3] = [RegionId::Main, RegionId::Auxiliary, RegionId::Expansion];

    /// Position in [`RegionId::ALL`]
    pub const fn index(self) -> usize {
        match self {
            RegionId::Main => 0,
            RegionId::Auxiliary => 1,
            RegionId::Expansion => 2,
        }
    }

    /// Short name used in log lines
    pub const fn name(self) -> &'static str {
        match self {
            RegionId::Main => "main",
            RegionId::Auxiliary => "auxiliary",
            RegionId::Expansion => "expansion",
        }
    }
}

impl core::fmt::Display for RegionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
