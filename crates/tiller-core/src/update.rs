// Tiller Update Types
// The simulation passes a state buffer pair can be maintained for

use std::fmt;
use std::ops::BitOr;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// One simulation pass with its own double-buffered state view.
///
/// The embedding runtime performs one native round-trip per enabled update
/// type per tick. Which types are enabled is expressed as an [`UpdateMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum UpdateType {
    /// Variable-timestep game update.
    Dynamic,
    /// Fixed-timestep simulation update.
    Fixed,
    /// Late update immediately before rendering.
    BeforeRender,
    /// Editor/tooling update outside of play mode.
    Editor,
}

impl UpdateType {
    /// The bit this update type occupies in an [`UpdateMask`].
    pub const fn bit(self) -> u32 {
        match self {
            UpdateType::Dynamic => 1,
            UpdateType::Fixed => 1 << 1,
            UpdateType::BeforeRender => 1 << 2,
            UpdateType::Editor => 1 << 3,
        }
    }

    /// Convert a raw update code from the native runtime.
    ///
    /// The native side reports update kinds as the same single-bit codes the
    /// mask uses. Unknown codes map to `None` rather than a fallback type.
    pub fn from_raw(raw: u32) -> Option<Self> {
        UpdateType::iter().find(|update| update.bit() == raw)
    }
}

/// Bit-flag set over [`UpdateType`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateMask(u32);

impl UpdateMask {
    /// No update types enabled.
    pub const NONE: UpdateMask = UpdateMask(0);

    /// The default player configuration: dynamic plus fixed updates.
    pub const DEFAULT: UpdateMask =
        UpdateMask(UpdateType::Dynamic.bit() | UpdateType::Fixed.bit());

    /// Every update type enabled.
    pub const ALL: UpdateMask = UpdateMask(
        UpdateType::Dynamic.bit()
            | UpdateType::Fixed.bit()
            | UpdateType::BeforeRender.bit()
            | UpdateType::Editor.bit(),
    );

    pub const fn contains(self, update: UpdateType) -> bool {
        self.0 & update.bit() != 0
    }

    pub const fn with(self, update: UpdateType) -> Self {
        Self(self.0 | update.bit())
    }

    pub const fn without(self, update: UpdateType) -> Self {
        Self(self.0 & !update.bit())
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of enabled update types.
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate enabled update types in declaration order.
    pub fn iter(self) -> impl Iterator<Item = UpdateType> {
        UpdateType::iter().filter(move |update| self.contains(*update))
    }
}

impl Default for UpdateMask {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr<UpdateType> for UpdateType {
    type Output = UpdateMask;

    fn bitor(self, rhs: UpdateType) -> UpdateMask {
        UpdateMask(self.bit() | rhs.bit())
    }
}

impl BitOr<UpdateType> for UpdateMask {
    type Output = UpdateMask;

    fn bitor(self, rhs: UpdateType) -> UpdateMask {
        self.with(rhs)
    }
}

impl From<UpdateType> for UpdateMask {
    fn from(update: UpdateType) -> Self {
        UpdateMask(update.bit())
    }
}

impl fmt::Debug for UpdateMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateMask(")?;
        let mut first = true;
        for update in self.iter() {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "{update}")?;
            first = false;
        }
        if first {
            write!(f, "none")?;
        }
        write!(f, ")")
    }
}
