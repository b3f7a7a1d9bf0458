//! The Win32 backend.
//!
//! Attribute queries through `GetFileAttributesExW` with the
//! `FindFirstFileW` record as the enumeration fallback, reparse data
//! through `DeviceIoControl`, permissions through the security descriptor
//! (effective-rights checks per principal, ACE emission from the portable
//! model), `LookupAccountSidW` owner lookup, shell recycle-bin deletion.
//!
//! Every handle, SID and descriptor buffer is owned by a guard value and
//! released on all exit paths. The process-wide security identity (the
//! impersonation token and the user/group/world SIDs) is computed once on
//! first use, lives inside the backend value, and is torn down by `Drop`;
//! it is never re-initialized mid-process.

use std::ffi::c_void;
use std::fs;

use once_cell::sync::OnceCell;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, ERROR_BAD_NETPATH,
    ERROR_DIR_NOT_EMPTY, ERROR_FILE_EXISTS, ERROR_FILE_NOT_FOUND, ERROR_INSUFFICIENT_BUFFER,
    ERROR_LOGON_FAILURE, ERROR_MORE_DATA, ERROR_PATH_NOT_FOUND, ERROR_SHARING_VIOLATION,
    FILETIME, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Security::Authorization::{
    GetEffectiveRightsFromAclW, NO_MULTIPLE_TRUSTEE, TRUSTEE_IS_SID, TRUSTEE_IS_UNKNOWN,
    TRUSTEE_W,
};
use windows_sys::Win32::Security::{
    AccessCheck, AddAccessAllowedAceEx, AddAccessDeniedAceEx, AllocateAndInitializeSid,
    DuplicateToken, FreeSid, GetFileSecurityW, GetSecurityDescriptorDacl,
    GetSecurityDescriptorGroup, GetSecurityDescriptorOwner, GetTokenInformation, ImpersonateSelf,
    InitializeAcl, InitializeSecurityDescriptor, LookupAccountSidW, MapGenericMask, RevertToSelf,
    SetFileSecurityW, SetSecurityDescriptorDacl, TokenPrimaryGroup, TokenUser, ACL,
    ACL_REVISION, DACL_SECURITY_INFORMATION, GENERIC_MAPPING, GROUP_SECURITY_INFORMATION,
    OWNER_SECURITY_INFORMATION, PRIVILEGE_SET, PSECURITY_DESCRIPTOR, PSID,
    SECURITY_DESCRIPTOR, SecurityImpersonation, SID_IDENTIFIER_AUTHORITY,
    TOKEN_DUPLICATE, TOKEN_IMPERSONATE, TOKEN_PRIMARY_GROUP, TOKEN_QUERY, TOKEN_USER,
};
use windows_sys::Win32::Storage::FileSystem::{
    CopyFileW, CreateDirectoryW, CreateFileW, DeleteFileW, FindClose, FindFirstFileW,
    GetFileAttributesExW, GetFileExInfoStandard, GetFileInformationByHandle,
    GetVolumePathNamesForVolumeNameW, MoveFileExW, RemoveDirectoryW, SetFileTime,
    BY_HANDLE_FILE_INFORMATION, FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_HIDDEN,
    FILE_ATTRIBUTE_READONLY, FILE_ATTRIBUTE_REPARSE_POINT, FILE_FLAG_BACKUP_SEMANTICS,
    FILE_FLAG_OPEN_REPARSE_POINT, FILE_GENERIC_EXECUTE, FILE_GENERIC_READ, FILE_GENERIC_WRITE,
    FILE_READ_ATTRIBUTES, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
    FILE_WRITE_ATTRIBUTES, MOVEFILE_COPY_ALLOWED, MOVEFILE_REPLACE_EXISTING, OPEN_EXISTING,
    WIN32_FILE_ATTRIBUTE_DATA, WIN32_FIND_DATAW,
};
use windows_sys::Win32::System::Ioctl::FSCTL_GET_REPARSE_POINT;
use windows_sys::Win32::System::SystemServices::{
    IO_REPARSE_TAG_MOUNT_POINT, IO_REPARSE_TAG_SYMLINK, MAXIMUM_ALLOWED, SECURITY_WORLD_RID,
};
use windows_sys::Win32::System::Threading::{GetCurrentThread, OpenThreadToken};
use windows_sys::Win32::System::IO::DeviceIoControl;
use windows_sys::Win32::UI::Shell::{
    SHFileOperationW, FOF_ALLOWUNDO, FOF_NOCONFIRMATION, FOF_NOERRORUI, FOF_SILENT, FO_DELETE,
    SHFILEOPSTRUCTW,
};

use crate::acl::{AccessMask, AceKind, Trustee};
use crate::entry::to_windows_native;
use crate::meta::MetaField;
use crate::permissions::{PermClass, Permissions};
use crate::shell_link;

use super::{
    AccessMode, FileId, NativeBackend, NativeError, NativeErrorKind, NativeSecurity, OwnerClass,
    StatRecord, TrashDisposition, TrashSink, WhichTime,
};

const MAXIMUM_REPARSE_DATA_BUFFER_SIZE: usize = 16 * 1024;

/// Difference between the Windows epoch (1601) and the UNIX epoch (1970)
/// in 100ns intervals.
const EPOCH_DELTA_100NS: u64 = 116_444_736_000_000_000;

fn to_wide(path: &str) -> Vec<u16> {
    let native = to_windows_native(path);
    native.encode_utf16().chain(std::iter::once(0)).collect()
}

fn last_error() -> NativeError {
    let code = unsafe { GetLastError() };
    let kind = match code {
        ERROR_FILE_NOT_FOUND => NativeErrorKind::NotFound,
        ERROR_PATH_NOT_FOUND => NativeErrorKind::PathNotFound,
        ERROR_ACCESS_DENIED => NativeErrorKind::AccessDenied,
        ERROR_SHARING_VIOLATION => NativeErrorKind::SharingViolation,
        ERROR_LOGON_FAILURE => NativeErrorKind::LogonFailure,
        ERROR_BAD_NETPATH => NativeErrorKind::BadNetPath,
        ERROR_ALREADY_EXISTS | ERROR_FILE_EXISTS => NativeErrorKind::AlreadyExists,
        ERROR_DIR_NOT_EMPTY => NativeErrorKind::DirectoryNotEmpty,
        _ => NativeErrorKind::Io,
    };
    NativeError::new(kind, code as i32)
}

fn filetime_to_nanos(time: &FILETIME) -> u64 {
    let ticks = ((time.dwHighDateTime as u64) << 32) | time.dwLowDateTime as u64;
    ticks.saturating_sub(EPOCH_DELTA_100NS).saturating_mul(100)
}

fn nanos_to_filetime(nanos: u64) -> FILETIME {
    let ticks = nanos / 100 + EPOCH_DELTA_100NS;
    FILETIME {
        dwLowDateTime: ticks as u32,
        dwHighDateTime: (ticks >> 32) as u32,
    }
}

/// Closes a raw handle on every exit path.
struct HandleGuard(HANDLE);

impl HandleGuard {
    fn open(
        path: &str,
        access: u32,
        flags: u32,
    ) -> Result<Self, NativeError> {
        let wide = to_wide(path);
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                access,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                std::ptr::null(),
                OPEN_EXISTING,
                flags,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error());
        }
        Ok(HandleGuard(handle))
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if self.0 != INVALID_HANDLE_VALUE && !self.0.is_null() {
            unsafe { CloseHandle(self.0) };
        }
    }
}

/// Closes a find handle on every exit path.
struct FindGuard(HANDLE);

impl Drop for FindGuard {
    fn drop(&mut self) {
        if self.0 != INVALID_HANDLE_VALUE {
            unsafe { FindClose(self.0) };
        }
    }
}

/// The process security identity: an impersonation token for access
/// checks plus the user, primary-group and world SIDs. Computed once,
/// released at drop.
struct SecurityIdentity {
    token: HANDLE,
    user_sid: Vec<u8>,
    group_sid: Vec<u8>,
    world_sid: PSID,
}

// The token handle and SIDs are only ever read after initialization.
unsafe impl Send for SecurityIdentity {}
unsafe impl Sync for SecurityIdentity {}

impl SecurityIdentity {
    fn obtain() -> Result<Self, NativeError> {
        let token = unsafe {
            if ImpersonateSelf(SecurityImpersonation) == 0 {
                return Err(last_error());
            }
            let mut thread_token: HANDLE = std::ptr::null_mut();
            let opened = OpenThreadToken(
                GetCurrentThread(),
                TOKEN_IMPERSONATE | TOKEN_QUERY | TOKEN_DUPLICATE,
                1,
                &mut thread_token,
            );
            RevertToSelf();
            if opened == 0 {
                return Err(last_error());
            }
            let guard = HandleGuard(thread_token);
            let mut duplicate: HANDLE = std::ptr::null_mut();
            if DuplicateToken(guard.0, SecurityImpersonation, &mut duplicate) == 0 {
                return Err(last_error());
            }
            duplicate
        };
        let token_guard = HandleGuard(token);

        let user_sid = token_sid(token_guard.0, TokenUser, |buffer| {
            let user = unsafe { &*(buffer.as_ptr() as *const TOKEN_USER) };
            user.User.Sid
        })?;
        let group_sid = token_sid(token_guard.0, TokenPrimaryGroup, |buffer| {
            let group = unsafe { &*(buffer.as_ptr() as *const TOKEN_PRIMARY_GROUP) };
            group.PrimaryGroup
        })?;

        let mut world_sid: PSID = std::ptr::null_mut();
        let world_authority = SID_IDENTIFIER_AUTHORITY {
            Value: [0, 0, 0, 0, 0, 1],
        };
        let allocated = unsafe {
            AllocateAndInitializeSid(
                &world_authority,
                1,
                SECURITY_WORLD_RID as u32,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                &mut world_sid,
            )
        };
        if allocated == 0 {
            return Err(last_error());
        }

        let token = token_guard.0;
        std::mem::forget(token_guard); // ownership moves into the identity
        Ok(SecurityIdentity {
            token,
            user_sid,
            group_sid,
            world_sid,
        })
    }

    fn sid_for(&self, trustee: Trustee) -> PSID {
        match trustee {
            Trustee::User => self.user_sid.as_ptr() as PSID,
            Trustee::Group => self.group_sid.as_ptr() as PSID,
            Trustee::World => self.world_sid,
        }
    }
}

impl Drop for SecurityIdentity {
    fn drop(&mut self) {
        unsafe {
            if !self.token.is_null() {
                CloseHandle(self.token);
            }
            if !self.world_sid.is_null() {
                FreeSid(self.world_sid);
            }
        }
    }
}

/// Reads one SID out of a token information class, two-phase sized.
fn token_sid(
    token: HANDLE,
    class: i32,
    extract: impl Fn(&[u8]) -> PSID,
) -> Result<Vec<u8>, NativeError> {
    let mut needed = 0u32;
    unsafe { GetTokenInformation(token, class, std::ptr::null_mut(), 0, &mut needed) };
    if needed == 0 {
        return Err(last_error());
    }
    let mut buffer = vec![0u8; needed as usize];
    let ok = unsafe {
        GetTokenInformation(
            token,
            class,
            buffer.as_mut_ptr() as *mut c_void,
            needed,
            &mut needed,
        )
    };
    if ok == 0 {
        return Err(last_error());
    }
    let sid = extract(&buffer);
    let length = unsafe { windows_sys::Win32::Security::GetLengthSid(sid) } as usize;
    let mut out = vec![0u8; length];
    unsafe {
        std::ptr::copy_nonoverlapping(sid as *const u8, out.as_mut_ptr(), length);
    }
    Ok(out)
}

#[derive(Default)]
pub struct WindowsBackend {
    identity: OnceCell<SecurityIdentity>,
}

impl WindowsBackend {
    pub fn new() -> Self {
        WindowsBackend::default()
    }

    fn identity(&self) -> Result<&SecurityIdentity, NativeError> {
        self.identity.get_or_try_init(SecurityIdentity::obtain)
    }

    /// Reads the reparse tag of an entry through its enumeration record.
    fn reparse_tag(&self, path: &str) -> Option<u32> {
        let wide = to_wide(path);
        let mut data: WIN32_FIND_DATAW = unsafe { std::mem::zeroed() };
        let handle = unsafe { FindFirstFileW(wide.as_ptr(), &mut data) };
        if handle == INVALID_HANDLE_VALUE {
            return None;
        }
        let _guard = FindGuard(handle);
        Some(data.dwReserved0)
    }

    /// The file security descriptor, two-phase sized into an owned buffer.
    fn file_security(&self, path: &str, info: u32) -> Result<Vec<u8>, NativeError> {
        let wide = to_wide(path);
        let mut needed = 0u32;
        unsafe {
            GetFileSecurityW(wide.as_ptr(), info, std::ptr::null_mut(), 0, &mut needed);
        }
        if needed == 0 {
            return Err(last_error());
        }
        let mut buffer = vec![0u8; needed as usize];
        let ok = unsafe {
            GetFileSecurityW(
                wide.as_ptr(),
                info,
                buffer.as_mut_ptr() as PSECURITY_DESCRIPTOR,
                needed,
                &mut needed,
            )
        };
        if ok == 0 {
            return Err(last_error());
        }
        Ok(buffer)
    }

    /// Effective rights the DACL grants one SID.
    fn effective_rights(&self, dacl: *mut ACL, sid: PSID) -> Result<u32, NativeError> {
        let mut trustee: TRUSTEE_W = unsafe { std::mem::zeroed() };
        trustee.pMultipleTrustee = std::ptr::null_mut();
        trustee.MultipleTrusteeOperation = NO_MULTIPLE_TRUSTEE;
        trustee.TrusteeForm = TRUSTEE_IS_SID;
        trustee.TrusteeType = TRUSTEE_IS_UNKNOWN;
        trustee.ptstrName = sid as *mut u16;

        let mut rights = 0u32;
        let status = unsafe { GetEffectiveRightsFromAclW(dacl, &trustee, &mut rights) };
        if status != 0 {
            return Err(NativeError::new(NativeErrorKind::Io, status as i32));
        }
        Ok(rights)
    }

    /// Rights granted to the impersonated caller token.
    fn token_rights(&self, descriptor: &[u8]) -> Result<u32, NativeError> {
        let identity = self.identity()?;
        let mut mapping = GENERIC_MAPPING {
            GenericRead: FILE_GENERIC_READ,
            GenericWrite: FILE_GENERIC_WRITE,
            GenericExecute: FILE_GENERIC_EXECUTE,
            GenericAll: FILE_GENERIC_READ | FILE_GENERIC_WRITE | FILE_GENERIC_EXECUTE,
        };
        let mut desired = MAXIMUM_ALLOWED as u32;
        unsafe { MapGenericMask(&mut desired, &mapping) };

        let mut privileges: PRIVILEGE_SET = unsafe { std::mem::zeroed() };
        let mut privileges_length = std::mem::size_of::<PRIVILEGE_SET>() as u32;
        let mut granted = 0u32;
        let mut status = 0i32;
        let ok = unsafe {
            AccessCheck(
                descriptor.as_ptr() as PSECURITY_DESCRIPTOR,
                identity.token,
                desired,
                &mut mapping,
                &mut privileges,
                &mut privileges_length,
                &mut granted,
                &mut status,
            )
        };
        if ok == 0 {
            return Err(last_error());
        }
        Ok(if status != 0 { granted } else { 0 })
    }
}

impl NativeBackend for WindowsBackend {
    fn stat(&self, path: &str, follow: bool) -> Result<StatRecord, NativeError> {
        if follow {
            let guard = HandleGuard::open(
                path,
                FILE_READ_ATTRIBUTES,
                FILE_FLAG_BACKUP_SEMANTICS,
            )?;
            let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
            if unsafe { GetFileInformationByHandle(guard.0, &mut info) } == 0 {
                return Err(last_error());
            }
            let attributes = info.dwFileAttributes;
            return Ok(StatRecord {
                answers: MetaField::WIN_ATTRIBUTE_FIELDS,
                file: attributes & FILE_ATTRIBUTE_DIRECTORY == 0,
                directory: attributes & FILE_ATTRIBUTE_DIRECTORY != 0,
                symlink: false,
                junction: false,
                hidden: attributes & FILE_ATTRIBUTE_HIDDEN != 0,
                read_only: attributes & FILE_ATTRIBUTE_READONLY != 0,
                mode: 0,
                size: ((info.nFileSizeHigh as u64) << 32) | info.nFileSizeLow as u64,
                birth: filetime_to_nanos(&info.ftCreationTime),
                changed: filetime_to_nanos(&info.ftLastWriteTime),
                modified: filetime_to_nanos(&info.ftLastWriteTime),
                accessed: filetime_to_nanos(&info.ftLastAccessTime),
            });
        }

        let wide = to_wide(path);
        let mut data: WIN32_FILE_ATTRIBUTE_DATA = unsafe { std::mem::zeroed() };
        let ok = unsafe {
            GetFileAttributesExW(
                wide.as_ptr(),
                GetFileExInfoStandard,
                &mut data as *mut _ as *mut c_void,
            )
        };
        if ok == 0 {
            return Err(last_error());
        }
        let attributes = data.dwFileAttributes;
        let (symlink, junction) = if attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
            match self.reparse_tag(path) {
                Some(IO_REPARSE_TAG_SYMLINK) => (true, false),
                Some(IO_REPARSE_TAG_MOUNT_POINT) => (false, true),
                _ => (false, false),
            }
        } else {
            (false, false)
        };
        Ok(StatRecord {
            answers: MetaField::WIN_ATTRIBUTE_FIELDS,
            file: attributes & FILE_ATTRIBUTE_DIRECTORY == 0 && !symlink,
            directory: attributes & FILE_ATTRIBUTE_DIRECTORY != 0,
            symlink,
            junction,
            hidden: attributes & FILE_ATTRIBUTE_HIDDEN != 0,
            read_only: attributes & FILE_ATTRIBUTE_READONLY != 0,
            mode: 0,
            size: ((data.nFileSizeHigh as u64) << 32) | data.nFileSizeLow as u64,
            birth: filetime_to_nanos(&data.ftCreationTime),
            changed: filetime_to_nanos(&data.ftLastWriteTime),
            modified: filetime_to_nanos(&data.ftLastWriteTime),
            accessed: filetime_to_nanos(&data.ftLastAccessTime),
        })
    }

    fn find_entry(&self, path: &str) -> Result<StatRecord, NativeError> {
        let wide = to_wide(path);
        let mut data: WIN32_FIND_DATAW = unsafe { std::mem::zeroed() };
        let handle = unsafe { FindFirstFileW(wide.as_ptr(), &mut data) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error());
        }
        let _guard = FindGuard(handle);

        let attributes = data.dwFileAttributes;
        let reparse = attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0;
        let symlink = reparse && data.dwReserved0 == IO_REPARSE_TAG_SYMLINK;
        let junction = reparse && data.dwReserved0 == IO_REPARSE_TAG_MOUNT_POINT;
        Ok(StatRecord {
            answers: MetaField::WIN_ATTRIBUTE_FIELDS,
            file: attributes & FILE_ATTRIBUTE_DIRECTORY == 0 && !symlink,
            directory: attributes & FILE_ATTRIBUTE_DIRECTORY != 0,
            symlink,
            junction,
            hidden: attributes & FILE_ATTRIBUTE_HIDDEN != 0,
            read_only: attributes & FILE_ATTRIBUTE_READONLY != 0,
            mode: 0,
            size: ((data.nFileSizeHigh as u64) << 32) | data.nFileSizeLow as u64,
            birth: filetime_to_nanos(&data.ftCreationTime),
            changed: filetime_to_nanos(&data.ftLastWriteTime),
            modified: filetime_to_nanos(&data.ftLastWriteTime),
            accessed: filetime_to_nanos(&data.ftLastAccessTime),
        })
    }

    fn read_dir(&self, path: &str) -> Result<Vec<(String, StatRecord)>, NativeError> {
        let pattern = format!("{}/*", path.trim_end_matches('/'));
        let wide = to_wide(&pattern);
        let mut data: WIN32_FIND_DATAW = unsafe { std::mem::zeroed() };
        let handle = unsafe { FindFirstFileW(wide.as_ptr(), &mut data) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error());
        }
        let _guard = FindGuard(handle);

        let mut out = Vec::new();
        loop {
            let name_len = data
                .cFileName
                .iter()
                .position(|&u| u == 0)
                .unwrap_or(data.cFileName.len());
            let name = String::from_utf16_lossy(&data.cFileName[..name_len]);
            if name != "." && name != ".." {
                let child = format!("{}/{}", path.trim_end_matches('/'), name);
                let attributes = data.dwFileAttributes;
                let reparse = attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0;
                out.push((
                    child,
                    StatRecord {
                        answers: MetaField::WIN_ATTRIBUTE_FIELDS,
                        file: attributes & FILE_ATTRIBUTE_DIRECTORY == 0 && !reparse,
                        directory: attributes & FILE_ATTRIBUTE_DIRECTORY != 0,
                        symlink: reparse && data.dwReserved0 == IO_REPARSE_TAG_SYMLINK,
                        junction: reparse && data.dwReserved0 == IO_REPARSE_TAG_MOUNT_POINT,
                        hidden: attributes & FILE_ATTRIBUTE_HIDDEN != 0,
                        read_only: attributes & FILE_ATTRIBUTE_READONLY != 0,
                        mode: 0,
                        size: ((data.nFileSizeHigh as u64) << 32) | data.nFileSizeLow as u64,
                        birth: filetime_to_nanos(&data.ftCreationTime),
                        changed: filetime_to_nanos(&data.ftLastWriteTime),
                        modified: filetime_to_nanos(&data.ftLastWriteTime),
                        accessed: filetime_to_nanos(&data.ftLastAccessTime),
                    },
                ));
            }
            let more = unsafe {
                windows_sys::Win32::Storage::FileSystem::FindNextFileW(_guard.0, &mut data)
            };
            if more == 0 {
                break;
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn access_probe(&self, path: &str, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Exists => {
                let wide = to_wide(path);
                let mut data: WIN32_FILE_ATTRIBUTE_DATA = unsafe { std::mem::zeroed() };
                unsafe {
                    GetFileAttributesExW(
                        wide.as_ptr(),
                        GetFileExInfoStandard,
                        &mut data as *mut _ as *mut c_void,
                    ) != 0
                }
            }
            AccessMode::Read | AccessMode::Execute => HandleGuard::open(
                path,
                windows_sys::Win32::Foundation::GENERIC_READ,
                FILE_FLAG_BACKUP_SEMANTICS,
            )
            .is_ok(),
            AccessMode::Write => HandleGuard::open(
                path,
                windows_sys::Win32::Foundation::GENERIC_WRITE,
                FILE_FLAG_BACKUP_SEMANTICS,
            )
            .is_ok(),
        }
    }

    fn read_link_target(&self, _path: &str) -> Result<String, NativeError> {
        // Link targets only exist as reparse data here.
        Err(NativeError::new(NativeErrorKind::Unsupported, 0))
    }

    fn read_reparse_data(&self, path: &str) -> Result<Vec<u8>, NativeError> {
        let guard = HandleGuard::open(
            path,
            0,
            FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OPEN_REPARSE_POINT,
        )?;
        let mut buffer = vec![0u8; MAXIMUM_REPARSE_DATA_BUFFER_SIZE];
        let mut returned = 0u32;
        let ok = unsafe {
            DeviceIoControl(
                guard.0,
                FSCTL_GET_REPARSE_POINT,
                std::ptr::null(),
                0,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len() as u32,
                &mut returned,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(last_error());
        }
        buffer.truncate(returned as usize);
        Ok(buffer)
    }

    fn read_shell_link(&self, path: &str) -> Result<String, NativeError> {
        let contents = fs::read(to_windows_native(path)).map_err(NativeError::from)?;
        shell_link::parse(&contents)
            .ok_or_else(|| NativeError::new(NativeErrorKind::Io, 0))
    }

    fn volume_path_name(&self, volume_path: &str) -> Result<String, NativeError> {
        // The native call wants the `\\?\Volume{GUID}\` form.
        let volume = format!(r"\\?\{}\", volume_path.trim_end_matches(['/', '\\']));
        let wide: Vec<u16> = volume.encode_utf16().chain(std::iter::once(0)).collect();

        let mut names = vec![0u16; 260];
        let mut returned = 0u32;
        // Two-phase: one resize on ERROR_MORE_DATA, then give up.
        for _ in 0..2 {
            let ok = unsafe {
                GetVolumePathNamesForVolumeNameW(
                    wide.as_ptr(),
                    names.as_mut_ptr(),
                    names.len() as u32,
                    &mut returned,
                )
            };
            if ok != 0 {
                let end = names.iter().position(|&u| u == 0).unwrap_or(0);
                if end == 0 {
                    return Err(NativeError::new(NativeErrorKind::NotFound, 0));
                }
                return Ok(String::from_utf16_lossy(&names[..end]));
            }
            let code = unsafe { GetLastError() };
            if code != ERROR_MORE_DATA || returned == 0 {
                return Err(last_error());
            }
            names = vec![0u16; returned as usize];
        }
        Err(last_error())
    }

    fn supports_acl(&self) -> bool {
        true
    }

    fn query_permissions(
        &self,
        path: &str,
        classes: MetaField,
    ) -> Result<(Permissions, MetaField), NativeError> {
        let descriptor = self.file_security(
            path,
            OWNER_SECURITY_INFORMATION | GROUP_SECURITY_INFORMATION | DACL_SECURITY_INFORMATION,
        )?;

        let mut dacl: *mut ACL = std::ptr::null_mut();
        let mut present = 0i32;
        let mut defaulted = 0i32;
        let ok = unsafe {
            GetSecurityDescriptorDacl(
                descriptor.as_ptr() as PSECURITY_DESCRIPTOR,
                &mut present,
                &mut dacl,
                &mut defaulted,
            )
        };
        if ok == 0 {
            return Err(last_error());
        }

        let mut perms = Permissions::empty();
        let mut answered = MetaField::empty();

        if classes.contains(MetaField::USER_PERMISSIONS) {
            let granted = self.token_rights(&descriptor)?;
            let (read, write, exec) =
                crate::acl::classify_granted(AccessMask::from_bits_truncate(granted));
            perms |= Permissions::class(PermClass::User, read, write, exec);
            answered |= MetaField::USER_PERMISSIONS;
        }

        if present != 0 && !dacl.is_null() {
            let identity = self.identity()?;
            for (class, field, sid) in [
                (
                    PermClass::Owner,
                    MetaField::OWNER_PERMISSIONS,
                    descriptor_owner(&descriptor)?,
                ),
                (
                    PermClass::Group,
                    MetaField::GROUP_PERMISSIONS,
                    descriptor_group(&descriptor)?,
                ),
                (
                    PermClass::Other,
                    MetaField::OTHER_PERMISSIONS,
                    identity.world_sid,
                ),
            ] {
                if !classes.contains(field) || sid.is_null() {
                    continue;
                }
                let granted = self.effective_rights(dacl, sid)?;
                let (read, write, exec) =
                    crate::acl::classify_granted(AccessMask::from_bits_truncate(granted));
                perms |= Permissions::class(class, read, write, exec);
                answered |= field;
            }
        }

        Ok((perms, answered))
    }

    fn apply_security(&self, path: &str, security: &NativeSecurity) -> Result<(), NativeError> {
        let model = match security {
            NativeSecurity::Acl(model) => model.clone(),
            // A bare mode can still be honored through the same path.
            NativeSecurity::Mode(mode) => {
                crate::acl::build_acl(Permissions::from_mode(*mode), false)
            }
        };
        let identity = self.identity()?;

        let mut acl_buffer = vec![0u8; 1024];
        let ok = unsafe {
            InitializeAcl(
                acl_buffer.as_mut_ptr() as *mut ACL,
                acl_buffer.len() as u32,
                ACL_REVISION,
            )
        };
        if ok == 0 {
            return Err(last_error());
        }
        for ace in &model.aces {
            let sid = identity.sid_for(ace.trustee);
            let added = match ace.kind {
                AceKind::Allow => unsafe {
                    AddAccessAllowedAceEx(
                        acl_buffer.as_mut_ptr() as *mut ACL,
                        ACL_REVISION,
                        0,
                        ace.mask.bits(),
                        sid,
                    )
                },
                AceKind::Deny => unsafe {
                    AddAccessDeniedAceEx(
                        acl_buffer.as_mut_ptr() as *mut ACL,
                        ACL_REVISION,
                        0,
                        ace.mask.bits(),
                        sid,
                    )
                },
            };
            if added == 0 {
                return Err(last_error());
            }
        }

        let mut descriptor: SECURITY_DESCRIPTOR = unsafe { std::mem::zeroed() };
        unsafe {
            if InitializeSecurityDescriptor(
                &mut descriptor as *mut _ as PSECURITY_DESCRIPTOR,
                1, // SECURITY_DESCRIPTOR_REVISION
            ) == 0
            {
                return Err(last_error());
            }
            if SetSecurityDescriptorDacl(
                &mut descriptor as *mut _ as PSECURITY_DESCRIPTOR,
                1,
                acl_buffer.as_ptr() as *const ACL,
                0,
            ) == 0
            {
                return Err(last_error());
            }
            let wide = to_wide(path);
            if SetFileSecurityW(
                wide.as_ptr(),
                DACL_SECURITY_INFORMATION,
                &mut descriptor as *mut _ as PSECURITY_DESCRIPTOR,
            ) == 0
            {
                return Err(last_error());
            }
        }
        Ok(())
    }

    fn create_dir(
        &self,
        path: &str,
        security: Option<&NativeSecurity>,
    ) -> Result<(), NativeError> {
        let wide = to_wide(path);
        if unsafe { CreateDirectoryW(wide.as_ptr(), std::ptr::null()) } == 0 {
            return Err(last_error());
        }
        if let Some(security) = security {
            self.apply_security(path, security)?;
        }
        Ok(())
    }

    fn remove_dir(&self, path: &str) -> Result<(), NativeError> {
        let wide = to_wide(path);
        if unsafe { RemoveDirectoryW(wide.as_ptr()) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<(), NativeError> {
        let wide = to_wide(path);
        if unsafe { DeleteFileW(wide.as_ptr()) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn copy_file(&self, from: &str, to: &str) -> Result<(), NativeError> {
        let from_wide = to_wide(from);
        let to_wide_path = to_wide(to);
        if unsafe { CopyFileW(from_wide.as_ptr(), to_wide_path.as_ptr(), 1) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str, overwrite: bool) -> Result<(), NativeError> {
        let from_wide = to_wide(from);
        let to_wide_path = to_wide(to);
        let mut flags = MOVEFILE_COPY_ALLOWED;
        if overwrite {
            flags |= MOVEFILE_REPLACE_EXISTING;
        }
        if unsafe { MoveFileExW(from_wide.as_ptr(), to_wide_path.as_ptr(), flags) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn set_file_time(
        &self,
        path: &str,
        nanos: u64,
        which: WhichTime,
    ) -> Result<(), NativeError> {
        let guard = HandleGuard::open(
            path,
            FILE_WRITE_ATTRIBUTES,
            FILE_FLAG_BACKUP_SEMANTICS,
        )?;
        let time = nanos_to_filetime(nanos);
        let (birth, access, write) = match which {
            WhichTime::Birth => (&time as *const FILETIME, std::ptr::null(), std::ptr::null()),
            WhichTime::Access => (std::ptr::null(), &time as *const FILETIME, std::ptr::null()),
            WhichTime::Modification => {
                (std::ptr::null(), std::ptr::null(), &time as *const FILETIME)
            }
        };
        if unsafe { SetFileTime(guard.0, birth, access, write) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn owner_name(&self, path: &str, class: OwnerClass) -> Result<String, NativeError> {
        let (info, pick): (u32, fn(&[u8]) -> Result<PSID, NativeError>) = match class {
            OwnerClass::User => (OWNER_SECURITY_INFORMATION, descriptor_owner),
            OwnerClass::Group => (GROUP_SECURITY_INFORMATION, descriptor_group),
        };
        let descriptor = self.file_security(path, info)?;
        let sid = pick(&descriptor)?;
        if sid.is_null() {
            return Err(NativeError::new(NativeErrorKind::NotFound, 0));
        }

        let mut name_len = 0u32;
        let mut domain_len = 0u32;
        let mut sid_use = 0i32;
        unsafe {
            LookupAccountSidW(
                std::ptr::null(),
                sid,
                std::ptr::null_mut(),
                &mut name_len,
                std::ptr::null_mut(),
                &mut domain_len,
                &mut sid_use,
            );
        }
        if name_len == 0 {
            return Err(last_error());
        }
        // One "buffer still too small" retry before giving up.
        for _ in 0..2 {
            let mut name = vec![0u16; name_len as usize];
            let mut domain = vec![0u16; domain_len.max(1) as usize];
            let ok = unsafe {
                LookupAccountSidW(
                    std::ptr::null(),
                    sid,
                    name.as_mut_ptr(),
                    &mut name_len,
                    domain.as_mut_ptr(),
                    &mut domain_len,
                    &mut sid_use,
                )
            };
            if ok != 0 {
                let end = name.iter().position(|&u| u == 0).unwrap_or(name.len());
                return Ok(String::from_utf16_lossy(&name[..end]));
            }
            let code = unsafe { GetLastError() };
            if code != ERROR_INSUFFICIENT_BUFFER {
                return Err(last_error());
            }
        }
        Err(last_error())
    }

    fn file_id(&self, path: &str) -> Result<FileId, NativeError> {
        let guard = HandleGuard::open(
            path,
            FILE_READ_ATTRIBUTES,
            FILE_FLAG_BACKUP_SEMANTICS,
        )?;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
        if unsafe { GetFileInformationByHandle(guard.0, &mut info) } == 0 {
            return Err(last_error());
        }
        Ok(FileId {
            volume: info.dwVolumeSerialNumber as u64,
            index: ((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64,
        })
    }

    fn canonicalize(&self, path: &str) -> Result<String, NativeError> {
        dunce::canonicalize(to_windows_native(path))
            .map(|resolved| resolved.to_string_lossy().into_owned())
            .map_err(NativeError::from)
    }

    fn trash(&self, path: &str, sink: TrashSink<'_>) -> Result<String, NativeError> {
        // FOF_ALLOWUNDO recycles when the volume has a recycle bin and
        // hard-deletes otherwise; the sink decides before anything runs.
        if !sink(path, TrashDisposition::Recycle) {
            return Err(NativeError::new(NativeErrorKind::Vetoed, 0));
        }

        // Double-NUL-terminated source list.
        let native = to_windows_native(path);
        let mut from: Vec<u16> = native.encode_utf16().collect();
        from.push(0);
        from.push(0);

        let mut op = SHFILEOPSTRUCTW {
            hwnd: std::ptr::null_mut(),
            wFunc: FO_DELETE as u32,
            pFrom: from.as_ptr(),
            pTo: std::ptr::null(),
            fFlags: (FOF_ALLOWUNDO | FOF_NOCONFIRMATION | FOF_SILENT | FOF_NOERRORUI) as u16,
            fAnyOperationsAborted: 0,
            hNameMappings: std::ptr::null_mut(),
            lpszProgressTitle: std::ptr::null(),
        };
        let status = unsafe { SHFileOperationW(&mut op) };
        if status != 0 {
            return Err(NativeError::new(NativeErrorKind::Io, status));
        }
        if op.fAnyOperationsAborted != 0 {
            return Err(NativeError::new(NativeErrorKind::Vetoed, 0));
        }
        // The shell operation does not report the recycled location.
        Ok(String::new())
    }
}

fn descriptor_owner(descriptor: &[u8]) -> Result<PSID, NativeError> {
    let mut sid: PSID = std::ptr::null_mut();
    let mut defaulted = 0i32;
    let ok = unsafe {
        GetSecurityDescriptorOwner(
            descriptor.as_ptr() as PSECURITY_DESCRIPTOR,
            &mut sid,
            &mut defaulted,
        )
    };
    if ok == 0 {
        return Err(last_error());
    }
    Ok(sid)
}

fn descriptor_group(descriptor: &[u8]) -> Result<PSID, NativeError> {
    let mut sid: PSID = std::ptr::null_mut();
    let mut defaulted = 0i32;
    let ok = unsafe {
        GetSecurityDescriptorGroup(
            descriptor.as_ptr() as PSECURITY_DESCRIPTOR,
            &mut sid,
            &mut defaulted,
        )
    };
    if ok == 0 {
        return Err(last_error());
    }
    Ok(sid)
}
