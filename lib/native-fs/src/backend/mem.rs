//! The in-memory backend.
//!
//! A complete implementation of the native surface over an
//! `Arc<RwLock<_>>` path tree. It exists for two reasons: hosts without a
//! native filesystem, and deterministic tests. Per-path fault injection
//! drives the engine's fallback chains without a real OS, call counters
//! prove cache hits, and the trash disposition is settable to exercise the
//! veto path.
//!
//! By default the tree behaves POSIX-like: stat answers permission classes
//! from the node's mode bits and symlink targets are exposed directly.
//! [`windows_semantics`](MemBackend::windows_semantics) flips it to the
//! windows shape: stat answers attributes only and link targets only come
//! back as reparse buffers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::acl::{self, Acl, Trustee};
use crate::entry::FileSystemEntry;
use crate::meta::MetaField;
use crate::permissions::{PermClass, Permissions};
use crate::reparse::ReparsePoint;

use super::{
    AccessMode, FileId, NativeBackend, NativeError, NativeErrorKind, NativeSecurity, OwnerClass,
    StatRecord, TrashDisposition, TrashSink, WhichTime,
};

/// One backend operation, for fault injection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemOp {
    Stat,
    FindEntry,
    ReadDir,
    ReadLink,
    Reparse,
    ShellLink,
    Volume,
    Permissions,
    ApplySecurity,
    CreateDir,
    RemoveDir,
    RemoveFile,
    CopyFile,
    Rename,
    SetFileTime,
    Owner,
    FileId,
    Canonicalize,
    Trash,
}

#[derive(Debug, Clone)]
struct Node {
    ino: u64,
    file: bool,
    directory: bool,
    symlink: bool,
    junction: bool,
    hidden: bool,
    read_only: bool,
    mode: u32,
    size: u64,
    times: [u64; 4], // birth, changed, modified, accessed
    link_target: Option<String>,
    reparse: Option<Vec<u8>>,
    shortcut_target: Option<String>,
    owner: String,
    group: String,
}

impl Node {
    fn new(ino: u64) -> Self {
        Node {
            ino,
            file: false,
            directory: false,
            symlink: false,
            junction: false,
            hidden: false,
            read_only: false,
            mode: 0,
            size: 0,
            times: [0; 4],
            link_target: None,
            reparse: None,
            shortcut_target: None,
            owner: "user".to_string(),
            group: "group".to_string(),
        }
    }
}

struct State {
    nodes: BTreeMap<String, Node>,
    faults: HashMap<(String, MemOp), NativeErrorKind>,
    volumes: HashMap<String, String>,
    acl_permissions: HashMap<String, Permissions>,
    acl_enabled: bool,
    stat_answers_modes: bool,
    readlink_exposed: bool,
    trash_disposition: TrashDisposition,
    stat_calls: u64,
    find_calls: u64,
    next_ino: u64,
}

impl Default for State {
    fn default() -> Self {
        let mut state = State {
            nodes: BTreeMap::new(),
            faults: HashMap::new(),
            volumes: HashMap::new(),
            acl_permissions: HashMap::new(),
            acl_enabled: false,
            stat_answers_modes: true,
            readlink_exposed: true,
            trash_disposition: TrashDisposition::Recycle,
            stat_calls: 0,
            find_calls: 0,
            next_ino: 1,
        };
        let mut root = Node::new(0);
        root.directory = true;
        root.mode = 0o755;
        state.nodes.insert("/".to_string(), root);
        state
    }
}

impl State {
    fn alloc_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    fn fault(&self, path: &str, op: MemOp) -> Result<(), NativeError> {
        match self.faults.get(&(path.to_string(), op)) {
            Some(kind) => Err(NativeError::new(*kind, native_code(*kind))),
            None => Ok(()),
        }
    }

    fn lookup(&self, path: &str) -> Result<&Node, NativeError> {
        match self.nodes.get(path) {
            Some(node) => Ok(node),
            None => {
                let kind = match parent_of(path) {
                    Some(parent) if !self.nodes.contains_key(&parent) => {
                        NativeErrorKind::PathNotFound
                    }
                    _ => NativeErrorKind::NotFound,
                };
                Err(NativeError::new(kind, native_code(kind)))
            }
        }
    }

    /// The node with any trailing symlink chain followed.
    fn resolve<'a>(&'a self, path: &str) -> Result<(&'a Node, String), NativeError> {
        let mut current = path.to_string();
        for _ in 0..8 {
            let node = self.lookup(&current)?;
            if node.symlink {
                match &node.link_target {
                    Some(target) => {
                        current = if FileSystemEntry::new(target.as_str()).is_absolute() {
                            target.clone()
                        } else {
                            let parent = parent_of(&current).unwrap_or_else(|| "/".to_string());
                            crate::entry::clean_path(&format!("{parent}/{target}"))
                        };
                    }
                    None => return Err(NativeError::new(NativeErrorKind::NotFound, 0)),
                }
            } else {
                return Ok((self.lookup(&current)?, current));
            }
        }
        Err(NativeError::new(NativeErrorKind::Io, 0))
    }

    fn record(&self, node: &Node) -> StatRecord {
        let mut answers = MetaField::WIN_ATTRIBUTE_FIELDS;
        if self.stat_answers_modes && node.mode != 0 {
            answers |= MetaField::PERMISSIONS;
        }
        StatRecord {
            answers,
            file: node.file,
            directory: node.directory,
            symlink: node.symlink,
            junction: node.junction,
            hidden: node.hidden,
            read_only: node.read_only,
            mode: node.mode,
            size: node.size,
            birth: node.times[0],
            changed: node.times[1],
            modified: node.times[2],
            accessed: node.times[3],
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| {
                key.len() > prefix.len() && !key[prefix.len()..].contains('/')
            })
            .map(|(key, _)| key.clone())
            .collect()
    }
}

fn native_code(kind: NativeErrorKind) -> i32 {
    // Representative raw codes so fallback tests can check the pair.
    match kind {
        NativeErrorKind::NotFound => 2,
        NativeErrorKind::PathNotFound => 3,
        NativeErrorKind::AccessDenied => 5,
        NativeErrorKind::SharingViolation => 32,
        NativeErrorKind::LogonFailure => 1326,
        NativeErrorKind::BadNetPath => 53,
        NativeErrorKind::AlreadyExists => 183,
        NativeErrorKind::DirectoryNotEmpty => 145,
        NativeErrorKind::NotADirectory => 267,
        _ => 0,
    }
}

fn parent_of(path: &str) -> Option<String> {
    if FileSystemEntry::new(path).is_root() {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = &path[..idx];
    if parent.is_empty() {
        return Some("/".to_string());
    }
    if parent == "/" {
        return Some("/".to_string());
    }
    let bytes = parent.as_bytes();
    if bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Some(format!("{parent}/"));
    }
    Some(parent.to_string())
}

/// The in-memory native surface. Cloning shares the tree.
#[derive(Clone, Default)]
pub struct MemBackend {
    inner: Arc<RwLock<State>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.inner.write().expect("mem backend lock poisoned")
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.inner.read().expect("mem backend lock poisoned")
    }

    fn ensure_parents(state: &mut State, path: &str) {
        let mut missing = Vec::new();
        let mut cursor = parent_of(path);
        while let Some(parent) = cursor {
            if state.nodes.contains_key(&parent) {
                break;
            }
            cursor = parent_of(&parent);
            missing.push(parent);
        }
        for parent in missing.into_iter().rev() {
            let ino = state.alloc_ino();
            let mut node = Node::new(ino);
            node.directory = true;
            node.mode = 0o755;
            state.nodes.insert(parent, node);
        }
    }

    fn insert_node(&self, path: &str, build: impl FnOnce(&mut Node)) {
        let mut state = self.write();
        Self::ensure_parents(&mut state, path);
        let ino = state.alloc_ino();
        let mut node = Node::new(ino);
        build(&mut node);
        state.nodes.insert(path.to_string(), node);
    }

    pub fn add_dir(&self, path: &str) -> &Self {
        self.insert_node(path, |node| {
            node.directory = true;
            node.mode = 0o755;
        });
        self
    }

    pub fn add_file(&self, path: &str, size: u64) -> &Self {
        self.insert_node(path, |node| {
            node.file = true;
            node.mode = 0o644;
            node.size = size;
        });
        self
    }

    pub fn add_symlink(&self, path: &str, target: &str) -> &Self {
        let target = target.to_string();
        self.insert_node(path, |node| {
            node.symlink = true;
            node.link_target = Some(target);
        });
        self
    }

    pub fn add_junction(&self, path: &str, target: &str) -> &Self {
        let target = target.to_string();
        self.insert_node(path, |node| {
            node.directory = true;
            node.junction = true;
            node.link_target = Some(target);
        });
        self
    }

    pub fn add_shortcut(&self, path: &str, target: &str) -> &Self {
        let target = target.to_string();
        self.insert_node(path, |node| {
            node.file = true;
            node.mode = 0o644;
            node.shortcut_target = Some(target);
        });
        self
    }

    /// Overrides the raw buffer served by `read_reparse_data`.
    pub fn set_reparse_raw(&self, path: &str, buffer: Vec<u8>) -> &Self {
        if let Some(node) = self.write().nodes.get_mut(path) {
            node.reparse = Some(buffer);
        }
        self
    }

    pub fn set_mode(&self, path: &str, mode: u32) -> &Self {
        if let Some(node) = self.write().nodes.get_mut(path) {
            node.mode = mode;
        }
        self
    }

    pub fn set_read_only(&self, path: &str, read_only: bool) -> &Self {
        if let Some(node) = self.write().nodes.get_mut(path) {
            node.read_only = read_only;
        }
        self
    }

    pub fn set_hidden(&self, path: &str, hidden: bool) -> &Self {
        if let Some(node) = self.write().nodes.get_mut(path) {
            node.hidden = hidden;
        }
        self
    }

    pub fn set_times(&self, path: &str, times: [u64; 4]) -> &Self {
        if let Some(node) = self.write().nodes.get_mut(path) {
            node.times = times;
        }
        self
    }

    pub fn set_owner_names(&self, path: &str, owner: &str, group: &str) -> &Self {
        if let Some(node) = self.write().nodes.get_mut(path) {
            node.owner = owner.to_string();
            node.group = group.to_string();
        }
        self
    }

    /// Makes `op` on `path` fail with `kind` until cleared.
    pub fn fail_with(&self, path: &str, op: MemOp, kind: NativeErrorKind) -> &Self {
        self.write()
            .faults
            .insert((path.to_string(), op), kind);
        self
    }

    pub fn clear_fault(&self, path: &str, op: MemOp) -> &Self {
        self.write().faults.remove(&(path.to_string(), op));
        self
    }

    pub fn set_volume(&self, volume_path: &str, mount: &str) -> &Self {
        self.write()
            .volumes
            .insert(volume_path.to_string(), mount.to_string());
        self
    }

    pub fn enable_acl(&self, enabled: bool) -> &Self {
        self.write().acl_enabled = enabled;
        self
    }

    pub fn set_acl_permissions(&self, path: &str, perms: Permissions) -> &Self {
        self.write()
            .acl_permissions
            .insert(path.to_string(), perms);
        self
    }

    /// Stat stops answering permission classes and symlink targets are
    /// only served as reparse buffers.
    pub fn windows_semantics(&self) -> &Self {
        let mut state = self.write();
        state.stat_answers_modes = false;
        state.readlink_exposed = false;
        self
    }

    pub fn set_trash_disposition(&self, disposition: TrashDisposition) -> &Self {
        self.write().trash_disposition = disposition;
        self
    }

    pub fn stat_calls(&self) -> u64 {
        self.read().stat_calls
    }

    pub fn find_calls(&self) -> u64 {
        self.read().find_calls
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read().nodes.contains_key(path)
    }
}

impl NativeBackend for MemBackend {
    fn stat(&self, path: &str, follow: bool) -> Result<StatRecord, NativeError> {
        let mut state = self.write();
        state.stat_calls += 1;
        state.fault(path, MemOp::Stat)?;
        let state = &*state;
        if follow {
            let (node, _) = state.resolve(path)?;
            Ok(state.record(node))
        } else {
            Ok(state.record(state.lookup(path)?))
        }
    }

    fn find_entry(&self, path: &str) -> Result<StatRecord, NativeError> {
        let mut state = self.write();
        state.find_calls += 1;
        state.fault(path, MemOp::FindEntry)?;
        let state = &*state;
        let node = state.lookup(path)?;
        let mut record = state.record(node);
        // An enumeration record never answers permission classes.
        record.answers &= MetaField::WIN_ATTRIBUTE_FIELDS;
        Ok(record)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<(String, StatRecord)>, NativeError> {
        let state = self.read();
        state.fault(path, MemOp::ReadDir)?;
        let node = state.lookup(path)?;
        if !node.directory {
            return Err(NativeError::new(NativeErrorKind::NotADirectory, 267));
        }
        Ok(state
            .children(path)
            .into_iter()
            .map(|child| {
                let mut record = state.record(&state.nodes[&child]);
                record.answers &= MetaField::WIN_ATTRIBUTE_FIELDS;
                (child, record)
            })
            .collect())
    }

    fn access_probe(&self, path: &str, mode: AccessMode) -> bool {
        let state = self.read();
        let Ok((node, _)) = state.resolve(path) else {
            return false;
        };
        match mode {
            AccessMode::Exists => true,
            AccessMode::Read => node.mode == 0 || node.mode & 0o444 != 0,
            AccessMode::Write => {
                !node.read_only && (node.mode == 0 || node.mode & 0o222 != 0)
            }
            AccessMode::Execute => node.directory || node.mode & 0o111 != 0,
        }
    }

    fn read_link_target(&self, path: &str) -> Result<String, NativeError> {
        let state = self.read();
        state.fault(path, MemOp::ReadLink)?;
        if !state.readlink_exposed {
            return Err(NativeError::new(NativeErrorKind::Unsupported, 0));
        }
        let node = state.lookup(path)?;
        match (&node.link_target, node.symlink) {
            (Some(target), true) => Ok(target.clone()),
            _ => Err(NativeError::new(NativeErrorKind::Io, 22)),
        }
    }

    fn read_reparse_data(&self, path: &str) -> Result<Vec<u8>, NativeError> {
        let state = self.read();
        state.fault(path, MemOp::Reparse)?;
        let node = state.lookup(path)?;
        if let Some(raw) = &node.reparse {
            return Ok(raw.clone());
        }
        let Some(target) = &node.link_target else {
            return Err(NativeError::new(NativeErrorKind::Io, 22));
        };
        let native_target = target.replace('/', "\\");
        let point = if node.junction {
            ReparsePoint::MountPoint {
                target: native_target.clone(),
                print_name: native_target,
            }
        } else {
            ReparsePoint::Symlink {
                relative: FileSystemEntry::new(target.as_str()).is_relative(),
                target: native_target.clone(),
                print_name: native_target,
            }
        };
        Ok(point.to_buffer())
    }

    fn read_shell_link(&self, path: &str) -> Result<String, NativeError> {
        let state = self.read();
        state.fault(path, MemOp::ShellLink)?;
        let node = state.lookup(path)?;
        node.shortcut_target
            .clone()
            .ok_or_else(|| NativeError::new(NativeErrorKind::Io, 22))
    }

    fn volume_path_name(&self, volume_path: &str) -> Result<String, NativeError> {
        let state = self.read();
        state.fault(volume_path, MemOp::Volume)?;
        state
            .volumes
            .get(volume_path)
            .cloned()
            .ok_or_else(|| NativeError::new(NativeErrorKind::NotFound, 2))
    }

    fn supports_acl(&self) -> bool {
        self.read().acl_enabled
    }

    fn query_permissions(
        &self,
        path: &str,
        classes: MetaField,
    ) -> Result<(Permissions, MetaField), NativeError> {
        let state = self.read();
        state.fault(path, MemOp::Permissions)?;
        let (node, resolved) = state.resolve(path)?;
        if let Some(perms) = state.acl_permissions.get(&resolved) {
            return Ok((*perms, classes));
        }
        if node.mode != 0 {
            return Ok((Permissions::from_mode(node.mode), classes));
        }
        Err(NativeError::new(NativeErrorKind::Unsupported, 0))
    }

    fn apply_security(&self, path: &str, security: &NativeSecurity) -> Result<(), NativeError> {
        let mut state = self.write();
        state.fault(path, MemOp::ApplySecurity)?;
        state.lookup(path)?;
        match security {
            NativeSecurity::Mode(mode) => {
                state.nodes.get_mut(path).expect("looked up").mode = *mode;
            }
            NativeSecurity::Acl(acl) => {
                let perms = acl_capability(acl);
                state.acl_permissions.insert(path.to_string(), perms);
            }
        }
        Ok(())
    }

    fn create_dir(
        &self,
        path: &str,
        security: Option<&NativeSecurity>,
    ) -> Result<(), NativeError> {
        let mut state = self.write();
        state.fault(path, MemOp::CreateDir)?;
        if state.nodes.contains_key(path) {
            return Err(NativeError::new(NativeErrorKind::AlreadyExists, 183));
        }
        let parent = parent_of(path)
            .ok_or_else(|| NativeError::new(NativeErrorKind::AccessDenied, 5))?;
        match state.nodes.get(&parent) {
            None => return Err(NativeError::new(NativeErrorKind::PathNotFound, 3)),
            Some(node) if !node.directory => {
                return Err(NativeError::new(NativeErrorKind::NotADirectory, 267))
            }
            Some(_) => {}
        }
        let ino = state.alloc_ino();
        let mut node = Node::new(ino);
        node.directory = true;
        node.mode = match security {
            Some(NativeSecurity::Mode(mode)) => *mode,
            _ => 0o755,
        };
        state.nodes.insert(path.to_string(), node);
        if let Some(NativeSecurity::Acl(acl)) = security {
            let perms = acl_capability(acl);
            state.acl_permissions.insert(path.to_string(), perms);
        }
        Ok(())
    }

    fn remove_dir(&self, path: &str) -> Result<(), NativeError> {
        let mut state = self.write();
        state.fault(path, MemOp::RemoveDir)?;
        {
            let node = state.lookup(path)?;
            if !node.directory {
                return Err(NativeError::new(NativeErrorKind::NotADirectory, 267));
            }
            if FileSystemEntry::new(path).is_root() {
                return Err(NativeError::new(NativeErrorKind::AccessDenied, 5));
            }
            if !state.children(path).is_empty() {
                return Err(NativeError::new(NativeErrorKind::DirectoryNotEmpty, 145));
            }
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<(), NativeError> {
        let mut state = self.write();
        state.fault(path, MemOp::RemoveFile)?;
        if state.lookup(path)?.directory {
            return Err(NativeError::new(NativeErrorKind::Io, 21));
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn copy_file(&self, from: &str, to: &str) -> Result<(), NativeError> {
        let mut state = self.write();
        state.fault(from, MemOp::CopyFile)?;
        if state.nodes.contains_key(to) {
            return Err(NativeError::new(NativeErrorKind::AlreadyExists, 183));
        }
        let mut copied = {
            let node = state.lookup(from)?;
            if !node.file {
                return Err(NativeError::new(NativeErrorKind::Io, 21));
            }
            node.clone()
        };
        copied.ino = state.alloc_ino();
        state.nodes.insert(to.to_string(), copied);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str, overwrite: bool) -> Result<(), NativeError> {
        let mut state = self.write();
        state.fault(from, MemOp::Rename)?;
        state.lookup(from)?;
        if !overwrite && state.nodes.contains_key(to) {
            return Err(NativeError::new(NativeErrorKind::AlreadyExists, 183));
        }
        let moved: Vec<(String, String)> = state
            .nodes
            .keys()
            .filter(|key| *key == from || key.starts_with(&format!("{from}/")))
            .map(|key| (key.clone(), format!("{to}{}", &key[from.len()..])))
            .collect();
        for (old, new) in moved {
            let node = state.nodes.remove(&old).expect("key listed");
            state.nodes.insert(new, node);
        }
        Ok(())
    }

    fn set_file_time(
        &self,
        path: &str,
        nanos: u64,
        which: WhichTime,
    ) -> Result<(), NativeError> {
        let mut state = self.write();
        state.fault(path, MemOp::SetFileTime)?;
        state.lookup(path)?;
        let node = state.nodes.get_mut(path).expect("looked up");
        match which {
            WhichTime::Birth => node.times[0] = nanos,
            WhichTime::Modification => node.times[2] = nanos,
            WhichTime::Access => node.times[3] = nanos,
        }
        Ok(())
    }

    fn owner_name(&self, path: &str, class: OwnerClass) -> Result<String, NativeError> {
        let state = self.read();
        state.fault(path, MemOp::Owner)?;
        let node = state.lookup(path)?;
        Ok(match class {
            OwnerClass::User => node.owner.clone(),
            OwnerClass::Group => node.group.clone(),
        })
    }

    fn file_id(&self, path: &str) -> Result<FileId, NativeError> {
        let state = self.read();
        state.fault(path, MemOp::FileId)?;
        let node = state.lookup(path)?;
        Ok(FileId {
            volume: 1,
            index: node.ino,
        })
    }

    fn canonicalize(&self, path: &str) -> Result<String, NativeError> {
        let state = self.read();
        state.fault(path, MemOp::Canonicalize)?;
        let cleaned = crate::entry::clean_path(path);
        let (_, resolved) = state.resolve(&cleaned)?;
        Ok(resolved)
    }

    fn trash(&self, path: &str, sink: TrashSink<'_>) -> Result<String, NativeError> {
        let disposition = {
            let state = self.read();
            state.fault(path, MemOp::Trash)?;
            state.lookup(path)?;
            state.trash_disposition
        };
        // The sink runs without the lock held: it is caller code.
        if !sink(path, disposition) {
            return Err(NativeError::new(NativeErrorKind::Vetoed, 0));
        }
        let mut state = self.write();
        let name = path.rsplit('/').next().unwrap_or(path);
        Self::ensure_parents(&mut state, "/.trash/x");
        let mut destination = format!("/.trash/{name}");
        let mut counter = 1;
        while state.nodes.contains_key(&destination) {
            destination = format!("/.trash/{name}.{counter}");
            counter += 1;
        }
        let node = state.nodes.remove(path).expect("looked up above");
        state.nodes.insert(destination.clone(), node);
        Ok(destination)
    }
}

/// Portable capability a model ACL grants per class, derived with the
/// reference evaluator: the user token is a member of group and world;
/// group principals match group and world; other principals match world.
fn acl_capability(acl: &Acl) -> Permissions {
    let mut perms = Permissions::empty();
    for (class, memberships) in [
        (
            PermClass::Owner,
            &[Trustee::User, Trustee::Group, Trustee::World][..],
        ),
        (
            PermClass::User,
            &[Trustee::User, Trustee::Group, Trustee::World][..],
        ),
        (PermClass::Group, &[Trustee::Group, Trustee::World][..]),
        (PermClass::Other, &[Trustee::World][..]),
    ] {
        let (read, write, exec) = acl::classify_granted(acl::evaluate(acl, memberships));
        perms |= Permissions::class(class, read, write, exec);
    }
    perms
}

#[cfg(test)]
mod test_mem {
    use super::*;

    #[test]
    fn tree_building_creates_parents() {
        let fs = MemBackend::new();
        fs.add_file("/a/b/c.txt", 10);
        assert!(fs.contains("/a"));
        assert!(fs.contains("/a/b"));

        let record = fs.stat("/a/b", false).expect("dir stats");
        assert!(record.directory);
        let record = fs.stat("/a/b/c.txt", false).expect("file stats");
        assert!(record.file);
        assert_eq!(record.size, 10);
    }

    #[test]
    fn missing_parent_is_path_not_found() {
        let fs = MemBackend::new();
        fs.add_dir("/a");
        let err = fs.stat("/a/b/c", false).unwrap_err();
        assert_eq!(err.kind(), NativeErrorKind::PathNotFound);
        let err = fs.stat("/a/b", false).unwrap_err();
        assert_eq!(err.kind(), NativeErrorKind::NotFound);
    }

    #[test]
    fn faults_fire_per_operation() {
        let fs = MemBackend::new();
        fs.add_file("/f", 1);
        fs.fail_with("/f", MemOp::Stat, NativeErrorKind::AccessDenied);

        let err = fs.stat("/f", false).unwrap_err();
        assert_eq!(err.kind(), NativeErrorKind::AccessDenied);
        assert_eq!(err.code(), 5);
        // Other operations on the same path stay healthy.
        assert!(fs.find_entry("/f").is_ok());

        fs.clear_fault("/f", MemOp::Stat);
        assert!(fs.stat("/f", false).is_ok());
    }

    #[test]
    fn stat_follows_symlink_chains() {
        let fs = MemBackend::new();
        fs.add_file("/target", 7);
        fs.add_symlink("/link", "/target");
        fs.add_symlink("/link2", "/link");

        let direct = fs.stat("/link", false).expect("lstat");
        assert!(direct.symlink && !direct.file);

        let followed = fs.stat("/link2", true).expect("stat");
        assert!(followed.file);
        assert_eq!(followed.size, 7);
    }

    #[test]
    fn rename_moves_subtrees() {
        let fs = MemBackend::new();
        fs.add_file("/a/b/f", 1);
        fs.rename("/a", "/z", false).expect("rename");
        assert!(fs.contains("/z/b/f"));
        assert!(!fs.contains("/a"));
    }

    #[test]
    fn trash_respects_the_sink() {
        let fs = MemBackend::new();
        fs.add_file("/doomed", 1);
        fs.set_trash_disposition(TrashDisposition::Delete);

        let mut refuse = |_: &str, d: TrashDisposition| d == TrashDisposition::Recycle;
        let err = fs.trash("/doomed", &mut refuse).unwrap_err();
        assert_eq!(err.kind(), NativeErrorKind::Vetoed);
        assert!(fs.contains("/doomed"), "veto leaves the entry in place");

        fs.set_trash_disposition(TrashDisposition::Recycle);
        let location = fs.trash("/doomed", &mut refuse).expect("recycles");
        assert_eq!(location, "/.trash/doomed");
        assert!(!fs.contains("/doomed"));
    }

    #[test]
    fn acl_application_round_trips_capability() {
        let fs = MemBackend::new();
        fs.add_file("/f", 1);
        fs.enable_acl(true);

        let perms = Permissions::from_mode(0o640);
        let security = NativeSecurity::Acl(crate::acl::build_acl(perms, false));
        fs.apply_security("/f", &security).expect("applies");

        let (read_back, answered) = fs
            .query_permissions("/f", MetaField::PERMISSIONS)
            .expect("queries");
        assert_eq!(answered, MetaField::PERMISSIONS);
        assert_eq!(
            read_back.granted(PermClass::Owner),
            (true, true, false),
            "owner capability survives"
        );
        assert_eq!(read_back.granted(PermClass::Other), (false, false, false));
    }
}
