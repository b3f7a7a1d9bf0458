//! Portable model of native access-control construction.
//!
//! The translator maps the 12-bit portable permission set onto an ordered
//! list of allow/deny entries carrying real Windows file-access masks. The
//! model is plain data: the windows backend turns it into an ACL with one
//! `AddAccess*AceEx` call per entry, and the tests evaluate it with a
//! deny-before-grant walker instead of the OS.
//!
//! POSIX gives the most specific matching class the final word; native ACL
//! evaluation instead processes entries in order with denies taking effect
//! as they are met. The deny masks emitted here reproduce the POSIX
//! "more specific class wins" outcome under that in-order evaluation.

use bitflags::bitflags;

use crate::permissions::{PermClass, Permissions};

bitflags! {
    /// File access rights, with the native constant values.
    pub struct AccessMask: u32 {
        const READ_DATA        = 0x0000_0001;
        const WRITE_DATA       = 0x0000_0002;
        const APPEND_DATA      = 0x0000_0004;
        const READ_EA          = 0x0000_0008;
        const WRITE_EA         = 0x0000_0010;
        const EXECUTE          = 0x0000_0020;
        const DELETE_CHILD     = 0x0000_0040;
        const READ_ATTRIBUTES  = 0x0000_0080;
        const WRITE_ATTRIBUTES = 0x0000_0100;
        const DELETE           = 0x0001_0000;
        const READ_CONTROL     = 0x0002_0000;
        const WRITE_DAC        = 0x0004_0000;
        const WRITE_OWNER      = 0x0008_0000;
        const SYNCHRONIZE      = 0x0010_0000;

        /// `FILE_GENERIC_READ`.
        const GENERIC_READ = Self::READ_DATA.bits
            | Self::READ_EA.bits
            | Self::READ_ATTRIBUTES.bits
            | Self::READ_CONTROL.bits
            | Self::SYNCHRONIZE.bits;

        /// `FILE_GENERIC_WRITE`.
        const GENERIC_WRITE = Self::WRITE_DATA.bits
            | Self::APPEND_DATA.bits
            | Self::WRITE_EA.bits
            | Self::WRITE_ATTRIBUTES.bits
            | Self::READ_CONTROL.bits
            | Self::SYNCHRONIZE.bits;

        /// `FILE_GENERIC_EXECUTE`.
        const GENERIC_EXECUTE = Self::EXECUTE.bits
            | Self::READ_ATTRIBUTES.bits
            | Self::READ_CONTROL.bits
            | Self::SYNCHRONIZE.bits;
    }
}

/// Who an entry applies to. The portable owner and user classes collapse
/// into [`Trustee::User`]: the simple native case has no separate "current
/// process user" vs "file owner" principal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Trustee {
    User,
    Group,
    World,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AceKind {
    Allow,
    Deny,
}

/// One access-control entry of the model.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ace {
    pub kind: AceKind,
    pub trustee: Trustee,
    pub mask: AccessMask,
}

/// An ordered entry list; order is meaningful and must be preserved by
/// whoever materializes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    pub aces: Vec<Ace>,
}

/// The native rights implied by one portable `(read, write, exec)` triple.
/// Write implies delete of the entry itself, matching the POSIX ability to
/// truncate and replace a writable file.
fn triple_rights(read: bool, write: bool, exec: bool) -> AccessMask {
    let mut mask = AccessMask::empty();
    if read {
        mask |= AccessMask::GENERIC_READ;
    }
    if write {
        mask |= AccessMask::GENERIC_WRITE | AccessMask::DELETE;
    }
    if exec {
        mask |= AccessMask::GENERIC_EXECUTE;
    }
    mask
}

/// The native rights a portable permission set grants to one class (owner
/// and user collapse to the same answer).
pub fn class_rights(perms: Permissions, class: PermClass) -> AccessMask {
    let (read, write, exec) = match class {
        PermClass::Owner | PermClass::User => {
            let (or, ow, ox) = perms.granted(PermClass::Owner);
            let (ur, uw, ux) = perms.granted(PermClass::User);
            (or | ur, ow | uw, ox | ux)
        }
        class => perms.granted(class),
    };
    triple_rights(read, write, exec)
}

/// Classifies a granted access mask into the portable `(read, write,
/// exec)` capability. Only the file-specific bits count: the generic
/// composites are supersets whose shared bits (`READ_CONTROL`,
/// `SYNCHRONIZE`) would produce false positives.
pub fn classify_granted(granted: AccessMask) -> (bool, bool, bool) {
    (
        granted.contains(AccessMask::READ_DATA),
        granted.contains(AccessMask::WRITE_DATA),
        granted.contains(AccessMask::EXECUTE),
    )
}

/// Builds the entry list for a portable permission set.
///
/// Deny masks carry the rights granted to a less privileged class but
/// withheld from this one. Entries are emitted as user-deny, group-deny,
/// user-allow, group-allow, other-allow with zero-mask entries skipped,
/// except that the group-deny entry is held back until after user-allow
/// whenever it overlaps the user allow mask (the user principal is
/// normally a member of the group, and an early deny would override the
/// user grant). The held-back order is not canonical for combinations
/// like `0757`; that shape is preserved deliberately.
pub fn build_acl(perms: Permissions, directory: bool) -> Acl {
    let user = class_rights(perms, PermClass::User);
    let group = class_rights(perms, PermClass::Group);
    let other = class_rights(perms, PermClass::Other);

    let mut deny_user = (group | other) - user;
    let mut deny_group = other - group;

    let mut allow_user = user;
    let mut allow_group = group;
    let mut allow_other = other;

    if directory {
        // POSIX directory-write means "may remove entries"; the native
        // model carves that out as a distinct right.
        let mut deny_other = AccessMask::empty();
        for (allow, deny) in [
            (&mut allow_user, &mut deny_user),
            (&mut allow_group, &mut deny_group),
            (&mut allow_other, &mut deny_other),
        ] {
            if deny.contains(AccessMask::WRITE_DATA) {
                *deny |= AccessMask::DELETE_CHILD;
            } else if deny.is_empty() && allow.contains(AccessMask::WRITE_DATA) {
                *allow |= AccessMask::DELETE_CHILD;
            }
        }
    }

    let mut aces = Vec::with_capacity(5);
    let push = |aces: &mut Vec<Ace>, kind, trustee, mask: AccessMask| {
        if !mask.is_empty() {
            aces.push(Ace {
                kind,
                trustee,
                mask,
            });
        }
    };

    push(&mut aces, AceKind::Deny, Trustee::User, deny_user);
    let group_deny_first = (deny_group & allow_user).is_empty();
    if group_deny_first {
        push(&mut aces, AceKind::Deny, Trustee::Group, deny_group);
    }
    push(&mut aces, AceKind::Allow, Trustee::User, allow_user);
    if !group_deny_first {
        push(&mut aces, AceKind::Deny, Trustee::Group, deny_group);
    }
    push(&mut aces, AceKind::Allow, Trustee::Group, allow_group);
    push(&mut aces, AceKind::Allow, Trustee::World, allow_other);

    Acl { aces }
}

/// Reference evaluation of the model: an in-order walk with denies taking
/// effect as they are met, the way native access checks process an entry
/// list. Used by the in-memory backend and the round-trip tests; the real
/// windows backend lets the OS evaluate instead.
pub fn evaluate(acl: &Acl, memberships: &[Trustee]) -> AccessMask {
    let mut granted = AccessMask::empty();
    let mut denied = AccessMask::empty();
    for ace in &acl.aces {
        if !memberships.contains(&ace.trustee) {
            continue;
        }
        match ace.kind {
            AceKind::Allow => granted |= ace.mask - denied,
            AceKind::Deny => denied |= ace.mask - granted,
        }
    }
    granted
}

#[cfg(test)]
mod test_acl {
    use super::*;

    fn perms_from_octal(mode: u32) -> Permissions {
        Permissions::from_mode(mode)
    }

    #[test]
    fn round_trip_capability_for_owner_and_other() {
        // The user token is a member of the group and of world; "other"
        // principals only match world.
        let user_memberships = [Trustee::User, Trustee::Group, Trustee::World];
        let other_memberships = [Trustee::World];

        for mode in 0..0o1000u32 {
            let perms = perms_from_octal(mode);
            let acl = build_acl(perms, false);

            let (ur, uw, ux) = perms.granted(PermClass::User);
            let got_user = classify_granted(evaluate(&acl, &user_memberships));
            assert_eq!(
                got_user,
                (ur, uw, ux),
                "user capability for mode {mode:o}"
            );

            let got_other = classify_granted(evaluate(&acl, &other_memberships));
            assert_eq!(
                got_other,
                perms.granted(PermClass::Other),
                "other capability for mode {mode:o}"
            );
        }
    }

    #[test]
    fn group_capability_survives_canonical_combinations() {
        let group_memberships = [Trustee::Group, Trustee::World];
        for mode in 0..0o1000u32 {
            let perms = perms_from_octal(mode);
            let acl = build_acl(perms, false);

            // Combinations that force the group-deny entry after the user
            // allow are the documented fidelity limitation; skip them.
            let deny_group =
                class_rights(perms, PermClass::Other) - class_rights(perms, PermClass::Group);
            if !(deny_group & class_rights(perms, PermClass::User)).is_empty() {
                continue;
            }

            let got = classify_granted(evaluate(&acl, &group_memberships));
            assert_eq!(
                got,
                perms.granted(PermClass::Group),
                "group capability for mode {mode:o}"
            );
        }
    }

    #[test]
    fn deny_entries_reproduce_posix_specificity() {
        // 0o046: the owning user gets nothing even though group and world
        // would grant bits, because the more specific class wins.
        let acl = build_acl(perms_from_octal(0o046), false);
        assert_eq!(
            acl.aces[0].kind,
            AceKind::Deny,
            "user deny leads the list"
        );
        assert_eq!(acl.aces[0].trustee, Trustee::User);

        let granted = evaluate(&acl, &[Trustee::User, Trustee::Group, Trustee::World]);
        assert_eq!(classify_granted(granted), (false, false, false));
    }

    #[test]
    fn non_canonical_order_is_preserved_for_0757() {
        let acl = build_acl(perms_from_octal(0o757), false);
        let order: Vec<(AceKind, Trustee)> =
            acl.aces.iter().map(|a| (a.kind, a.trustee)).collect();
        // group-deny (write) overlaps user-allow, so it trails the user
        // allow entry; the ACL is deliberately not in canonical order.
        assert_eq!(
            order,
            vec![
                (AceKind::Allow, Trustee::User),
                (AceKind::Deny, Trustee::Group),
                (AceKind::Allow, Trustee::Group),
                (AceKind::Allow, Trustee::World),
            ]
        );
    }

    #[test]
    fn directory_write_carries_delete_child() {
        let acl = build_acl(perms_from_octal(0o755), true);
        let user_allow = acl
            .aces
            .iter()
            .find(|a| a.kind == AceKind::Allow && a.trustee == Trustee::User)
            .expect("user allow entry");
        assert!(user_allow.mask.contains(AccessMask::DELETE_CHILD));

        // 0o707: group is denied write while world holds it, so the group
        // deny mask carves out delete-child instead of the allow mask
        // gaining it.
        let acl = build_acl(perms_from_octal(0o707), true);
        let group_deny = acl
            .aces
            .iter()
            .find(|a| a.kind == AceKind::Deny && a.trustee == Trustee::Group)
            .expect("group deny entry");
        assert!(group_deny.mask.contains(AccessMask::DELETE_CHILD));
    }

    #[test]
    fn zero_mask_entries_are_skipped() {
        let acl = build_acl(perms_from_octal(0o777), false);
        assert!(
            acl.aces.iter().all(|a| a.kind == AceKind::Allow),
            "fully open set has no deny entries"
        );
        assert_eq!(acl.aces.len(), 3);

        let acl = build_acl(Permissions::empty(), false);
        assert!(acl.aces.is_empty(), "empty set emits nothing");
    }

    #[test]
    fn classification_ignores_generic_composite_bits() {
        // READ_CONTROL | SYNCHRONIZE alone is not readable: those bits are
        // shared by every generic composite.
        let granted = AccessMask::READ_CONTROL | AccessMask::SYNCHRONIZE;
        assert_eq!(classify_granted(granted), (false, false, false));
    }
}
