//! Portable permission bits.
//!
//! Four classes × three actions, one nibble per class. This layout is the
//! wire contract between the permission translator's two directions and any
//! caller; the bit offsets are fixed:
//!
//! ```text
//! 0x0001/0x0002/0x0004   other   exec/write/read
//! 0x0010/0x0020/0x0040   group   exec/write/read
//! 0x0100/0x0200/0x0400   user    exec/write/read   (current process user)
//! 0x1000/0x2000/0x4000   owner   exec/write/read   (file owner)
//! ```
//!
//! The `user` class describes what the calling process can do; the `owner`
//! class describes what the owning principal can do. On POSIX the two
//! coincide for practical purposes and stat fills both from the owner
//! triple; on Windows they are computed separately (process token vs owner
//! SID).

use bitflags::bitflags;

bitflags! {
    /// Portable permission set.
    pub struct Permissions: u16 {
        const OTHER_EXEC  = 0x0001;
        const OTHER_WRITE = 0x0002;
        const OTHER_READ  = 0x0004;

        const GROUP_EXEC  = 0x0010;
        const GROUP_WRITE = 0x0020;
        const GROUP_READ  = 0x0040;

        const USER_EXEC   = 0x0100;
        const USER_WRITE  = 0x0200;
        const USER_READ   = 0x0400;

        const OWNER_EXEC  = 0x1000;
        const OWNER_WRITE = 0x2000;
        const OWNER_READ  = 0x4000;

        const OTHER_MASK = Self::OTHER_EXEC.bits | Self::OTHER_WRITE.bits | Self::OTHER_READ.bits;
        const GROUP_MASK = Self::GROUP_EXEC.bits | Self::GROUP_WRITE.bits | Self::GROUP_READ.bits;
        const USER_MASK  = Self::USER_EXEC.bits | Self::USER_WRITE.bits | Self::USER_READ.bits;
        const OWNER_MASK = Self::OWNER_EXEC.bits | Self::OWNER_WRITE.bits | Self::OWNER_READ.bits;

        const ALL_READ  = Self::OTHER_READ.bits | Self::GROUP_READ.bits | Self::USER_READ.bits | Self::OWNER_READ.bits;
        const ALL_WRITE = Self::OTHER_WRITE.bits | Self::GROUP_WRITE.bits | Self::USER_WRITE.bits | Self::OWNER_WRITE.bits;
        const ALL_EXEC  = Self::OTHER_EXEC.bits | Self::GROUP_EXEC.bits | Self::USER_EXEC.bits | Self::OWNER_EXEC.bits;
    }
}

/// The four permission classes, most privileged first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PermClass {
    /// The file owner.
    Owner,
    /// The current process user.
    User,
    Group,
    Other,
}

impl PermClass {
    pub const fn mask(self) -> Permissions {
        match self {
            PermClass::Owner => Permissions::OWNER_MASK,
            PermClass::User => Permissions::USER_MASK,
            PermClass::Group => Permissions::GROUP_MASK,
            PermClass::Other => Permissions::OTHER_MASK,
        }
    }

    const fn shift(self) -> u16 {
        match self {
            PermClass::Owner => 12,
            PermClass::User => 8,
            PermClass::Group => 4,
            PermClass::Other => 0,
        }
    }
}

impl Permissions {
    /// Builds a class triple from `(read, write, exec)` booleans.
    pub fn class(class: PermClass, read: bool, write: bool, exec: bool) -> Self {
        let mut bits = 0u16;
        if exec {
            bits |= 0x1;
        }
        if write {
            bits |= 0x2;
        }
        if read {
            bits |= 0x4;
        }
        Permissions::from_bits_truncate(bits << class.shift())
    }

    /// The `(read, write, exec)` triple granted to `class`.
    pub fn granted(self, class: PermClass) -> (bool, bool, bool) {
        let nibble = (self.bits() >> class.shift()) & 0x7;
        (nibble & 0x4 != 0, nibble & 0x2 != 0, nibble & 0x1 != 0)
    }

    /// Converts the low nine bits of a POSIX `st_mode` / `mode_t`.
    ///
    /// The owner triple is mirrored into the user class: on POSIX the
    /// process user and the owner class answer the same question for the
    /// caller that owns the file, and callers of the portable model expect
    /// both classes to be filled from one stat.
    pub fn from_mode(mode: u32) -> Self {
        let mut perms = Permissions::empty();
        let mode = mode & 0o777;
        perms |= Permissions::from_bits_truncate((mode & 0o007) as u16);
        perms |= Permissions::from_bits_truncate(((mode & 0o070) as u16) << 1);
        let owner = ((mode & 0o700) >> 6) as u16;
        perms |= Permissions::from_bits_truncate(owner << 8);
        perms |= Permissions::from_bits_truncate(owner << 12);
        perms
    }

    /// The POSIX mode bits for this set. The user class is ignored; the
    /// owner class wins (`chmod` has no "current user" notion).
    pub fn to_mode(self) -> u32 {
        let bits = self.bits() as u32;
        let owner = (bits >> 12) & 0x7;
        let group = (bits >> 4) & 0x7;
        let other = bits & 0x7;
        (owner << 6) | (group << 3) | other
    }
}

#[cfg(test)]
mod test_permissions {
    use super::*;

    #[test]
    fn mode_round_trip() {
        for mode in [0o000u32, 0o644, 0o755, 0o777, 0o500, 0o071] {
            let perms = Permissions::from_mode(mode);
            assert_eq!(perms.to_mode(), mode, "mode {mode:o} survives the round trip");
        }
    }

    #[test]
    fn owner_bits_mirror_into_user_class() {
        let perms = Permissions::from_mode(0o640);
        assert_eq!(
            perms.granted(PermClass::Owner),
            (true, true, false),
            "owner rw from 0o640"
        );
        assert_eq!(
            perms.granted(PermClass::User),
            (true, true, false),
            "user mirrors owner on posix"
        );
        assert_eq!(perms.granted(PermClass::Group), (true, false, false));
        assert_eq!(perms.granted(PermClass::Other), (false, false, false));
    }

    #[test]
    fn class_constructor_matches_granted() {
        let perms = Permissions::class(PermClass::Group, true, false, true);
        assert_eq!(perms, Permissions::GROUP_READ | Permissions::GROUP_EXEC);
        assert_eq!(perms.granted(PermClass::Group), (true, false, true));
    }

    #[test]
    fn to_mode_ignores_the_user_class() {
        let perms = Permissions::USER_READ | Permissions::USER_WRITE;
        assert_eq!(perms.to_mode(), 0);
    }
}
