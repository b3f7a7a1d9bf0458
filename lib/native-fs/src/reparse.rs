//! Reparse-point data buffer parsing.
//!
//! The buffer layout is platform-defined and read byte-exact: a header of
//! `u32 tag, u16 data_length, u16 reserved`, then a tagged union keyed by
//! the tag value. Both known variants share the shape
//! `{substitute_offset, substitute_length, print_offset, print_length,
//! [flags], wchar path_buffer[]}` with offsets and lengths expressed in
//! **bytes** from the start of the path buffer, not in UTF-16 code units.
//!
//! An unknown tag, a truncated buffer or an out-of-range name slice all
//! yield `None`: an entry can still exist even when its link target cannot
//! be parsed, so malformed data degrades silently instead of failing the
//! metadata query that triggered the read.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;

/// A parsed reparse point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReparsePoint {
    Symlink {
        /// The substitute name with any NT namespace prefix stripped.
        target: String,
        print_name: String,
        /// Target is relative to the link's containing directory.
        relative: bool,
    },
    /// An NTFS junction or volume mount point.
    MountPoint {
        target: String,
        print_name: String,
    },
}

impl ReparsePoint {
    pub fn target(&self) -> &str {
        match self {
            ReparsePoint::Symlink { target, .. } => target,
            ReparsePoint::MountPoint { target, .. } => target,
        }
    }

    pub fn is_relative(&self) -> bool {
        matches!(
            self,
            ReparsePoint::Symlink { relative: true, .. }
        )
    }

    /// Serializes back into the native buffer layout. The inverse of
    /// [`parse`]; the in-memory backend uses it to fabricate buffers and
    /// the tests to cross-check the offset arithmetic.
    pub fn to_buffer(&self) -> Vec<u8> {
        let (tag, target, print_name, flags) = match self {
            ReparsePoint::Symlink {
                target,
                print_name,
                relative,
            } => (
                IO_REPARSE_TAG_SYMLINK,
                target,
                print_name,
                Some(if *relative { SYMLINK_FLAG_RELATIVE } else { 0 }),
            ),
            ReparsePoint::MountPoint { target, print_name } => {
                (IO_REPARSE_TAG_MOUNT_POINT, target, print_name, None)
            }
        };

        let sub: Vec<u16> = target.encode_utf16().collect();
        let print: Vec<u16> = print_name.encode_utf16().collect();
        let sub_bytes = sub.len() * 2;
        let print_bytes = print.len() * 2;

        let mut fixed = Vec::new();
        fixed.extend_from_slice(&0u16.to_le_bytes()); // substitute offset
        fixed.extend_from_slice(&(sub_bytes as u16).to_le_bytes());
        fixed.extend_from_slice(&(sub_bytes as u16).to_le_bytes()); // print offset
        fixed.extend_from_slice(&(print_bytes as u16).to_le_bytes());
        if let Some(flags) = flags {
            fixed.extend_from_slice(&flags.to_le_bytes());
        }

        let data_length = fixed.len() + sub_bytes + print_bytes;
        let mut out = Vec::with_capacity(8 + data_length);
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&(data_length as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // reserved
        out.extend_from_slice(&fixed);
        for unit in sub.iter().chain(print.iter()) {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }
}

/// Parses a raw reparse data buffer.
pub fn parse(buffer: &[u8]) -> Option<ReparsePoint> {
    let mut cursor = Cursor::new(buffer);
    let tag = cursor.read_u32::<LittleEndian>().ok()?;
    let _data_length = cursor.read_u16::<LittleEndian>().ok()?;
    let _reserved = cursor.read_u16::<LittleEndian>().ok()?;

    let sub_offset = cursor.read_u16::<LittleEndian>().ok()? as usize;
    let sub_length = cursor.read_u16::<LittleEndian>().ok()? as usize;
    let print_offset = cursor.read_u16::<LittleEndian>().ok()? as usize;
    let print_length = cursor.read_u16::<LittleEndian>().ok()? as usize;

    let flags = match tag {
        IO_REPARSE_TAG_SYMLINK => Some(cursor.read_u32::<LittleEndian>().ok()?),
        IO_REPARSE_TAG_MOUNT_POINT => None,
        _ => return None,
    };

    let path_buffer = &buffer[cursor.position() as usize..];
    let target = strip_nt_namespace(&read_utf16_slice(
        path_buffer,
        sub_offset,
        sub_length,
    )?);
    let print_name = read_utf16_slice(path_buffer, print_offset, print_length)?;

    Some(match flags {
        Some(flags) => ReparsePoint::Symlink {
            target,
            print_name,
            relative: flags & SYMLINK_FLAG_RELATIVE != 0,
        },
        None => ReparsePoint::MountPoint { target, print_name },
    })
}

/// Slices `length` bytes at byte offset `offset` and decodes them as
/// UTF-16; both values must be even and in range.
fn read_utf16_slice(path_buffer: &[u8], offset: usize, length: usize) -> Option<String> {
    if offset % 2 != 0 || length % 2 != 0 {
        return None;
    }
    let end = offset.checked_add(length)?;
    let bytes = path_buffer.get(offset..end)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Some(String::from_utf16_lossy(&units))
}

/// Strips the NT namespace prefixes substitute names carry: `\??\` and
/// `\\?\` for local paths, `\\?\UNC\` for network paths (restored to the
/// `\\server\...` form).
pub fn strip_nt_namespace(name: &str) -> String {
    if let Some(rest) = name.strip_prefix(r"\\?\UNC\").or_else(|| name.strip_prefix(r"\??\UNC\")) {
        return format!(r"\\{rest}");
    }
    for prefix in [r"\??\", r"\\?\"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    name.to_string()
}

#[cfg(test)]
mod test_reparse {
    use super::*;

    /// Builds a raw symlink buffer by hand so the offset arithmetic is
    /// checked against an independent layout, not against `to_buffer`.
    fn raw_symlink_buffer() -> Vec<u8> {
        // Path buffer holds "abcd" (print name, 8 bytes) followed by
        // "\??\C:\t" (substitute name, 16 bytes).
        let print: Vec<u16> = "abcd".encode_utf16().collect();
        let sub: Vec<u16> = r"\??\C:\t".encode_utf16().collect();

        let mut out = Vec::new();
        out.extend_from_slice(&IO_REPARSE_TAG_SYMLINK.to_le_bytes());
        out.extend_from_slice(&((12 + 8 + 16) as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&8u16.to_le_bytes()); // substitute offset
        out.extend_from_slice(&16u16.to_le_bytes()); // substitute length
        out.extend_from_slice(&0u16.to_le_bytes()); // print offset
        out.extend_from_slice(&8u16.to_le_bytes()); // print length
        out.extend_from_slice(&0u32.to_le_bytes()); // flags: absolute
        for unit in print.iter().chain(sub.iter()) {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    #[test]
    fn offsets_are_bytes_not_code_units() {
        let parsed = parse(&raw_symlink_buffer()).expect("valid buffer");
        match parsed {
            ReparsePoint::Symlink {
                target,
                print_name,
                relative,
            } => {
                // SubstituteNameOffset=8, SubstituteNameLength=16 selects
                // bytes 8..24 of the path buffer: 8 UTF-16 code units.
                assert_eq!(target, r"C:\t");
                assert_eq!(print_name, "abcd");
                assert!(!relative);
            }
            other => panic!("expected a symlink, got {other:?}"),
        }
    }

    #[test]
    fn buffer_round_trip() {
        let cases = [
            ReparsePoint::Symlink {
                target: r"..\shared".to_string(),
                print_name: r"..\shared".to_string(),
                relative: true,
            },
            ReparsePoint::MountPoint {
                target: r"C:\mnt\data".to_string(),
                print_name: r"C:\mnt\data".to_string(),
            },
        ];
        for case in cases {
            let parsed = parse(&case.to_buffer()).expect("round trip parses");
            assert_eq!(parsed, case);
        }
    }

    #[test]
    fn unknown_tag_degrades_to_none() {
        let mut buffer = raw_symlink_buffer();
        buffer[0..4].copy_from_slice(&0xA000_0999u32.to_le_bytes());
        assert_eq!(parse(&buffer), None);
    }

    #[test]
    fn truncated_and_out_of_range_buffers_degrade_to_none() {
        let buffer = raw_symlink_buffer();
        assert_eq!(parse(&buffer[..6]), None, "header cut short");
        assert_eq!(parse(&buffer[..20]), None, "path buffer cut short");

        let mut bad_offset = raw_symlink_buffer();
        // Substitute length beyond the end of the path buffer.
        bad_offset[10..12].copy_from_slice(&512u16.to_le_bytes());
        assert_eq!(parse(&bad_offset), None);
    }

    #[test]
    fn namespace_prefix_stripping() {
        assert_eq!(strip_nt_namespace(r"\??\C:\x"), r"C:\x");
        assert_eq!(strip_nt_namespace(r"\\?\C:\x"), r"C:\x");
        assert_eq!(
            strip_nt_namespace(r"\\?\UNC\server\share"),
            r"\\server\share"
        );
        assert_eq!(strip_nt_namespace(r"C:\x"), r"C:\x");
        assert_eq!(
            strip_nt_namespace(r"\??\Volume{1b2c}\x"),
            r"Volume{1b2c}\x"
        );
    }
}
