//! Typed collider classification.
//!
//! Tags arrive as free-form metadata strings on scene colliders; they are
//! parsed into [`ColliderTag`] exactly once, when a snapshot is taken, and
//! the classification below is a pure function of that tag plus the
//! engine-level flags. Every collider lands in exactly one kind.

use crate::ColliderDesc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapKind {
    Wing,
    Metal,
    Vanish,
}

impl CapKind {
    /// The engine state-flag bit this cap sets when granted.
    #[inline]
    pub fn state_flag(self) -> u32 {
        match self {
            CapKind::Wing => puppet_native::state_flags::WING_CAP,
            CapKind::Metal => puppet_native::state_flags::METAL_CAP,
            CapKind::Vanish => puppet_native::state_flags::VANISH_CAP,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractableKind {
    Heal,
    Cap(CapKind),
    Star,
    Damage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColliderTag {
    Untagged,
    Static,
    Dynamic,
    Interactable(InteractableKind),
    Water,
    Ignored,
}

impl ColliderTag {
    /// Parse the collider's metadata tag. Unknown strings read as untagged
    /// (treated like static scenery when the flags allow it).
    pub fn parse(tag: &str) -> ColliderTag {
        match tag.trim().to_ascii_lowercase().as_str() {
            "static" => ColliderTag::Static,
            "dynamic" => ColliderTag::Dynamic,
            "water" => ColliderTag::Water,
            "ignore" => ColliderTag::Ignored,
            "heal" => ColliderTag::Interactable(InteractableKind::Heal),
            "star" => ColliderTag::Interactable(InteractableKind::Star),
            "damage" => ColliderTag::Interactable(InteractableKind::Damage),
            "cap:wing" => ColliderTag::Interactable(InteractableKind::Cap(CapKind::Wing)),
            "cap:metal" => ColliderTag::Interactable(InteractableKind::Cap(CapKind::Metal)),
            "cap:vanish" => ColliderTag::Interactable(InteractableKind::Cap(CapKind::Vanish)),
            _ => ColliderTag::Untagged,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColliderKind {
    Static,
    Dynamic,
    Interactable(InteractableKind),
    Water,
    None,
}

/// Pure classification: disabled or inactive colliders are ignored; water
/// volumes and interactables must be triggers; collision geometry must be
/// character-collidable and must not be a trigger.
pub fn classify(desc: &ColliderDesc) -> ColliderKind {
    if !desc.enabled || !desc.active {
        return ColliderKind::None;
    }
    match desc.tag {
        ColliderTag::Ignored => ColliderKind::None,
        ColliderTag::Water => {
            if desc.trigger {
                ColliderKind::Water
            } else {
                ColliderKind::None
            }
        }
        ColliderTag::Interactable(kind) => {
            if desc.trigger {
                ColliderKind::Interactable(kind)
            } else {
                ColliderKind::None
            }
        }
        ColliderTag::Dynamic => {
            if desc.character_collidable && !desc.trigger {
                ColliderKind::Dynamic
            } else {
                ColliderKind::None
            }
        }
        ColliderTag::Static | ColliderTag::Untagged => {
            if desc.character_collidable && !desc.trigger {
                ColliderKind::Static
            } else {
                ColliderKind::None
            }
        }
    }
}
