//! Metadata with fine-grained freshness tracking.
//!
//! Attribute groups are requested as masks rather than one attribute at a
//! time because a single native call (`stat`, `GetFileAttributesEx`, a
//! `FindFirstFile` record) answers many attributes atomically; the mask
//! granularity matches what one native call can fill.

use bitflags::bitflags;

use crate::backend::StatRecord;
use crate::permissions::{PermClass, Permissions};

bitflags! {
    /// Which attribute groups are known. One bit per group; composite
    /// masks describe what a given native call answers in one round trip.
    pub struct MetaField: u32 {
        const OTHER_PERMISSIONS  = 1 << 0;
        const GROUP_PERMISSIONS  = 1 << 1;
        const USER_PERMISSIONS   = 1 << 2;
        const OWNER_PERMISSIONS  = 1 << 3;

        const FILE_TYPE          = 1 << 4;
        const LINK_TYPE          = 1 << 5;
        const JUNCTION_TYPE      = 1 << 6;
        const HIDDEN_ATTRIBUTE   = 1 << 7;
        const READONLY_ATTRIBUTE = 1 << 8;
        const EXISTS_ATTRIBUTE   = 1 << 9;

        const SIZE               = 1 << 10;
        const TIMES              = 1 << 11;

        const PERMISSIONS = Self::OTHER_PERMISSIONS.bits
            | Self::GROUP_PERMISSIONS.bits
            | Self::USER_PERMISSIONS.bits
            | Self::OWNER_PERMISSIONS.bits;

        /// What one `stat(2)` answers.
        const POSIX_STAT_FIELDS = Self::PERMISSIONS.bits
            | Self::FILE_TYPE.bits
            | Self::LINK_TYPE.bits
            | Self::HIDDEN_ATTRIBUTE.bits
            | Self::READONLY_ATTRIBUTE.bits
            | Self::EXISTS_ATTRIBUTE.bits
            | Self::SIZE.bits
            | Self::TIMES.bits;

        /// What one `GetFileAttributesEx` / `FindFirstFile` record answers.
        /// Permission classes are absent: on Windows they need a separate
        /// security-descriptor query or the attribute heuristic.
        const WIN_ATTRIBUTE_FIELDS = Self::FILE_TYPE.bits
            | Self::LINK_TYPE.bits
            | Self::JUNCTION_TYPE.bits
            | Self::HIDDEN_ATTRIBUTE.bits
            | Self::READONLY_ATTRIBUTE.bits
            | Self::EXISTS_ATTRIBUTE.bits
            | Self::SIZE.bits
            | Self::TIMES.bits;

        const ALL = Self::PERMISSIONS.bits
            | Self::WIN_ATTRIBUTE_FIELDS.bits;
    }
}

impl MetaField {
    /// The known-mask bit covering one permission class.
    pub const fn for_class(class: PermClass) -> MetaField {
        match class {
            PermClass::Owner => MetaField::OWNER_PERMISSIONS,
            PermClass::User => MetaField::USER_PERMISSIONS,
            PermClass::Group => MetaField::GROUP_PERMISSIONS,
            PermClass::Other => MetaField::OTHER_PERMISSIONS,
        }
    }
}

bitflags! {
    /// Boolean attribute results. The low 16 bits reuse the portable
    /// permission bit layout of [`Permissions`].
    pub struct EntryFlags: u32 {
        const PERMISSION_BITS = 0xffff;

        const FILE      = 1 << 16;
        const DIRECTORY = 1 << 17;
        const LINK      = 1 << 18;
        const JUNCTION  = 1 << 19;
        const HIDDEN    = 1 << 20;
        const READ_ONLY = 1 << 21;
        const EXISTS    = 1 << 22;
    }
}

/// What we know about one path.
///
/// Created per query, populated incrementally by
/// [`FileSystemEngine::fill_metadata`](crate::FileSystemEngine::fill_metadata),
/// discarded when the caller is done. `known` is monotonically extended by
/// fills and only ever shrinks through an explicit [`clear`](Self::clear).
/// Not internally synchronized; each query call path owns its own value.
#[derive(Debug, Clone)]
pub struct Metadata {
    known: MetaField,
    flags: EntryFlags,
    size: u64,
    birth_time: u64,
    change_time: u64,
    modification_time: u64,
    access_time: u64,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            known: MetaField::empty(),
            flags: EntryFlags::empty(),
            size: 0,
            birth_time: 0,
            change_time: 0,
            modification_time: 0,
            access_time: 0,
        }
    }
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bits of `wanted` that still need a native call.
    pub fn missing(&self, wanted: MetaField) -> MetaField {
        wanted - self.known
    }

    pub fn known(&self) -> MetaField {
        self.known
    }

    /// True iff every bit of `wanted` is known and, when existence was
    /// among the wanted bits, the entry actually exists. This is the
    /// return-value contract of `fill_metadata`: size/time/permission
    /// groups carry no truth requirement beyond knownness.
    pub fn has_flags(&self, wanted: MetaField) -> bool {
        if !self.known.contains(wanted) {
            return false;
        }
        if wanted.contains(MetaField::EXISTS_ATTRIBUTE) {
            return self.flags.contains(EntryFlags::EXISTS);
        }
        true
    }

    /// Forgets everything. Used before re-querying after a structural
    /// change (a fallback path, a rename, a permission update).
    pub fn clear(&mut self) {
        *self = Metadata::default();
    }

    /// Forgets the given groups only.
    pub fn clear_flags(&mut self, which: MetaField) {
        self.known -= which;
    }

    /// Copies exactly the fields the record's `answers` mask covers and
    /// extends the known mask by it. The one writer besides the explicit
    /// permission fill below.
    pub fn fill_from(&mut self, record: &StatRecord) {
        let answers = record.answers;

        if answers.contains(MetaField::FILE_TYPE) {
            self.flags -= EntryFlags::FILE | EntryFlags::DIRECTORY;
            if record.directory {
                self.flags |= EntryFlags::DIRECTORY;
            }
            if record.file {
                self.flags |= EntryFlags::FILE;
            }
        }
        if answers.contains(MetaField::LINK_TYPE) {
            self.flags.set(EntryFlags::LINK, record.symlink);
        }
        if answers.contains(MetaField::JUNCTION_TYPE) {
            self.flags.set(EntryFlags::JUNCTION, record.junction);
        }
        if answers.contains(MetaField::HIDDEN_ATTRIBUTE) {
            self.flags.set(EntryFlags::HIDDEN, record.hidden);
        }
        if answers.contains(MetaField::READONLY_ATTRIBUTE) {
            self.flags.set(EntryFlags::READ_ONLY, record.read_only);
        }
        if answers.contains(MetaField::EXISTS_ATTRIBUTE) {
            self.flags |= EntryFlags::EXISTS;
        }
        if answers.contains(MetaField::SIZE) {
            self.size = record.size;
        }
        if answers.contains(MetaField::TIMES) {
            self.birth_time = record.birth;
            self.change_time = record.changed;
            self.modification_time = record.modified;
            self.access_time = record.accessed;
        }
        if answers.intersects(MetaField::PERMISSIONS) {
            let perms = Permissions::from_mode(record.mode);
            self.fill_permissions(perms, answers & MetaField::PERMISSIONS);
        }

        self.known |= answers;
    }

    /// Writes the permission bits of the classes named by `which` and marks
    /// them known. Other classes' bits are untouched.
    pub fn fill_permissions(&mut self, perms: Permissions, which: MetaField) {
        for class in [
            PermClass::Owner,
            PermClass::User,
            PermClass::Group,
            PermClass::Other,
        ] {
            if !which.contains(MetaField::for_class(class)) {
                continue;
            }
            let mask = EntryFlags::from_bits_truncate(class.mask().bits() as u32);
            self.flags -= mask;
            self.flags |=
                EntryFlags::from_bits_truncate((perms & class.mask()).bits() as u32);
        }
        self.known |= which & MetaField::PERMISSIONS;
    }

    /// Records a terminal "does not exist": every wanted group becomes
    /// known with a cleared result so the caller's next query does not
    /// re-issue the native call chain. Truth bits already established by
    /// earlier fills survive: a dangling symlink keeps its link-ness
    /// even though the target's groups come back absent.
    pub fn mark_absent(&mut self, wanted: MetaField) {
        let newly = wanted - self.known;
        if newly.contains(MetaField::FILE_TYPE) {
            self.flags -= EntryFlags::FILE | EntryFlags::DIRECTORY;
        }
        if newly.contains(MetaField::LINK_TYPE) {
            self.flags -= EntryFlags::LINK;
        }
        if newly.contains(MetaField::JUNCTION_TYPE) {
            self.flags -= EntryFlags::JUNCTION;
        }
        if newly.contains(MetaField::HIDDEN_ATTRIBUTE) {
            self.flags -= EntryFlags::HIDDEN;
        }
        if newly.contains(MetaField::READONLY_ATTRIBUTE) {
            self.flags -= EntryFlags::READ_ONLY;
        }
        if newly.contains(MetaField::SIZE) {
            self.size = 0;
        }
        if newly.contains(MetaField::TIMES) {
            self.birth_time = 0;
            self.change_time = 0;
            self.modification_time = 0;
            self.access_time = 0;
        }
        for class in [
            PermClass::Owner,
            PermClass::User,
            PermClass::Group,
            PermClass::Other,
        ] {
            if newly.contains(MetaField::for_class(class)) {
                self.flags -= EntryFlags::from_bits_truncate(class.mask().bits() as u32);
            }
        }
        self.flags -= EntryFlags::EXISTS;
        self.known |= wanted | MetaField::EXISTS_ATTRIBUTE;
    }

    pub fn exists(&self) -> bool {
        debug_assert!(self.known.contains(MetaField::EXISTS_ATTRIBUTE));
        self.flags.contains(EntryFlags::EXISTS)
    }

    pub fn is_file(&self) -> bool {
        debug_assert!(self.known.contains(MetaField::FILE_TYPE));
        self.flags.contains(EntryFlags::FILE)
    }

    pub fn is_directory(&self) -> bool {
        debug_assert!(self.known.contains(MetaField::FILE_TYPE));
        self.flags.contains(EntryFlags::DIRECTORY)
    }

    pub fn is_link(&self) -> bool {
        debug_assert!(self.known.contains(MetaField::LINK_TYPE));
        self.flags.contains(EntryFlags::LINK)
    }

    pub fn is_junction(&self) -> bool {
        debug_assert!(self.known.contains(MetaField::JUNCTION_TYPE));
        self.flags.contains(EntryFlags::JUNCTION)
    }

    pub fn is_hidden(&self) -> bool {
        debug_assert!(self.known.contains(MetaField::HIDDEN_ATTRIBUTE));
        self.flags.contains(EntryFlags::HIDDEN)
    }

    pub fn is_read_only(&self) -> bool {
        debug_assert!(self.known.contains(MetaField::READONLY_ATTRIBUTE));
        self.flags.contains(EntryFlags::READ_ONLY)
    }

    /// The portable permission bits. Only the classes whose groups are
    /// known carry meaning.
    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits_truncate((self.flags & EntryFlags::PERMISSION_BITS).bits() as u16)
    }

    pub fn size(&self) -> u64 {
        debug_assert!(self.known.contains(MetaField::SIZE));
        self.size
    }

    /// Birth (creation) time, nanoseconds since the UNIX epoch; 0 when the
    /// platform does not record it.
    pub fn birth_time(&self) -> u64 {
        debug_assert!(self.known.contains(MetaField::TIMES));
        self.birth_time
    }

    /// Last metadata change, nanoseconds since the UNIX epoch.
    pub fn change_time(&self) -> u64 {
        debug_assert!(self.known.contains(MetaField::TIMES));
        self.change_time
    }

    pub fn modification_time(&self) -> u64 {
        debug_assert!(self.known.contains(MetaField::TIMES));
        self.modification_time
    }

    pub fn access_time(&self) -> u64 {
        debug_assert!(self.known.contains(MetaField::TIMES));
        self.access_time
    }

    pub fn entry_flags(&self) -> EntryFlags {
        self.flags
    }
}

#[cfg(test)]
mod test_meta {
    use super::*;

    fn stat_record() -> StatRecord {
        StatRecord {
            answers: MetaField::POSIX_STAT_FIELDS,
            file: true,
            mode: 0o644,
            size: 42,
            modified: 1_000,
            accessed: 2_000,
            ..StatRecord::default()
        }
    }

    #[test]
    fn fill_extends_known_monotonically() {
        let mut meta = Metadata::new();
        assert_eq!(meta.missing(MetaField::ALL), MetaField::ALL);

        meta.fill_from(&stat_record());
        assert!(meta.known().contains(MetaField::POSIX_STAT_FIELDS));
        assert!(meta.has_flags(MetaField::SIZE | MetaField::EXISTS_ATTRIBUTE));
        assert_eq!(meta.size(), 42);
        assert!(meta.is_file());
        assert!(!meta.is_directory());

        // A later fill of a subset must not retract knowledge.
        let mut partial = stat_record();
        partial.answers = MetaField::SIZE;
        partial.size = 43;
        meta.fill_from(&partial);
        assert!(meta.known().contains(MetaField::POSIX_STAT_FIELDS));
        assert_eq!(meta.size(), 43);
    }

    #[test]
    fn fill_copies_only_what_the_record_answers() {
        let mut meta = Metadata::new();
        let mut record = stat_record();
        record.answers = MetaField::FILE_TYPE | MetaField::EXISTS_ATTRIBUTE;
        meta.fill_from(&record);

        assert!(meta.has_flags(MetaField::FILE_TYPE));
        assert!(meta.missing(MetaField::SIZE) == MetaField::SIZE);
        assert!(meta.missing(MetaField::PERMISSIONS) == MetaField::PERMISSIONS);
    }

    #[test]
    fn permission_classes_fill_independently() {
        let mut meta = Metadata::new();
        meta.fill_permissions(
            Permissions::from_mode(0o754),
            MetaField::OWNER_PERMISSIONS | MetaField::OTHER_PERMISSIONS,
        );
        assert!(meta.has_flags(MetaField::OWNER_PERMISSIONS));
        assert!(!meta.has_flags(MetaField::GROUP_PERMISSIONS));

        let perms = meta.permissions();
        assert_eq!(perms.granted(PermClass::Owner), (true, true, true));
        assert_eq!(perms.granted(PermClass::Other), (true, false, false));
        // Group bits were not filled and must read as empty.
        assert_eq!(perms.granted(PermClass::Group), (false, false, false));
    }

    #[test]
    fn absence_is_knowledge() {
        let mut meta = Metadata::new();
        let wanted = MetaField::SIZE | MetaField::EXISTS_ATTRIBUTE;
        meta.mark_absent(wanted);

        assert_eq!(meta.missing(wanted), MetaField::empty());
        assert!(!meta.has_flags(wanted), "absent entry fails the truth check");
        assert!(!meta.exists());
    }

    #[test]
    fn clear_is_the_only_retraction() {
        let mut meta = Metadata::new();
        meta.fill_from(&stat_record());
        meta.clear_flags(MetaField::LINK_TYPE | MetaField::JUNCTION_TYPE);
        assert!(meta.missing(MetaField::LINK_TYPE) == MetaField::LINK_TYPE);
        assert!(meta.has_flags(MetaField::SIZE));

        meta.clear();
        assert_eq!(meta.known(), MetaField::empty());
    }
}
