//! Archive Sniffer: classifies the first ≤256 KiB of a decoded Usenet
//! segment as RAR4, RAR5, 7z, or unrecognized, and whether the
//! contained entries are stored, compressed, encrypted, solid, or
//! themselves nested archives.

const SNIFF_WINDOW: usize = 256 * 1024;

const RAR4_MAGIC: &[u8] = &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];
const RAR5_MAGIC: &[u8] = &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];
const SEVENZIP_MAGIC: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "mov", "avi", "ts", "m4v", "mpg", "mpeg", "wmv", "flv", "webm"];
const NESTED_ARCHIVE_PATTERNS: &[&str] = &[".r00", ".part01.rar", ".rar", ".7z", ".zip"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffStatus {
    RarStored,
    RarSolid,
    RarEncrypted,
    RarNestedArchive,
    Rar5Unsupported,
    SevenzipStored,
    SevenzipUnsupported,
    SevenzipNestedArchive,
    SevenzipUntested,
    RarHeaderNotFound,
}

impl SniffStatus {
    pub fn is_blocker(&self) -> bool {
        matches!(
            self,
            SniffStatus::RarEncrypted
                | SniffStatus::RarSolid
                | SniffStatus::Rar5Unsupported
                | SniffStatus::RarNestedArchive
                | SniffStatus::SevenzipNestedArchive
                | SniffStatus::SevenzipUnsupported
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SniffStatus::RarStored | SniffStatus::SevenzipStored)
    }

    pub fn token(&self) -> &'static str {
        match self {
            SniffStatus::RarStored => "rar-stored",
            SniffStatus::RarSolid => "rar-solid",
            SniffStatus::RarEncrypted => "rar-encrypted",
            SniffStatus::RarNestedArchive => "rar-nested-archive",
            SniffStatus::Rar5Unsupported => "rar5-unsupported",
            SniffStatus::SevenzipStored => "sevenzip-stored",
            SniffStatus::SevenzipUnsupported => "sevenzip-unsupported",
            SniffStatus::SevenzipNestedArchive => "sevenzip-nested-archive",
            SniffStatus::SevenzipUntested => "sevenzip-untested",
            SniffStatus::RarHeaderNotFound => "rar-header-not-found",
        }
    }
}

/// Classifies the head of a decoded segment. `skip_sevenzip` models the
/// "sniffing may be skipped for 7z when STAT passed" design note.
pub fn sniff(data: &[u8], skip_sevenzip: bool) -> SniffStatus {
    let window = &data[..data.len().min(SNIFF_WINDOW)];

    let status = if window.starts_with(RAR5_MAGIC) {
        sniff_rar5(window)
    } else if window.starts_with(RAR4_MAGIC) {
        sniff_rar4(window)
    } else if window.starts_with(SEVENZIP_MAGIC) {
        if skip_sevenzip {
            SniffStatus::SevenzipUntested
        } else {
            sniff_sevenzip(window)
        }
    } else {
        SniffStatus::RarHeaderNotFound
    };

    apply_nested_archive_overlay(window, status)
}

/// RAR4 block walk: file-header blocks (`0x74`) carry flags (encrypted
/// `0x0004`, solid `0x0010`), a pack-size (plus high part when `0x0100`
/// is set), a one-byte method, and a name.
fn sniff_rar4(window: &[u8]) -> SniffStatus {
    let mut offset = RAR4_MAGIC.len();
    let mut saw_store_video = false;
    let mut saw_only_nested = true;
    let mut saw_any_file_header = false;

    while offset + 7 <= window.len() {
        let flags = u16::from_le_bytes([window[offset + 3], window[offset + 4]]);
        let block_type = window[offset + 2];
        let head_size = u16::from_le_bytes([window[offset + 5], window[offset + 6]]) as usize;
        if head_size == 0 {
            break;
        }

        if block_type == 0x74 {
            saw_any_file_header = true;
            if flags & 0x0004 != 0 {
                return SniffStatus::RarEncrypted;
            }
            if flags & 0x0010 != 0 {
                return SniffStatus::RarSolid;
            }

            let mut field_offset = offset + 7;
            let mut pack_size = read_u32(window, field_offset).unwrap_or(0) as u64;
            field_offset += 4;
            field_offset += 4; // unpacked size
            field_offset += 1; // host os
            field_offset += 4; // file crc
            field_offset += 4; // file time
            let unpack_version = *window.get(field_offset).unwrap_or(&0);
            field_offset += 1;
            let method = *window.get(field_offset).unwrap_or(&0);
            field_offset += 1;
            let name_size = read_u16(window, field_offset).unwrap_or(0) as usize;
            field_offset += 2;
            field_offset += 4; // file attrs
            let _ = unpack_version;

            if flags & 0x0100 != 0 {
                pack_size |= (read_u32(window, field_offset).unwrap_or(0) as u64) << 32;
                field_offset += 4;
                field_offset += 4; // high unpacked size
            }

            let name = window
                .get(field_offset..(field_offset + name_size).min(window.len()))
                .map(|bytes| String::from_utf8_lossy(bytes).to_lowercase())
                .unwrap_or_default();

            let is_video = VIDEO_EXTENSIONS.iter().any(|ext| name.ends_with(ext));
            let is_nested = NESTED_ARCHIVE_PATTERNS.iter().any(|pat| name.ends_with(pat));
            if !is_nested {
                saw_only_nested = false;
            }
            if method == 0x30 && is_video {
                saw_store_video = true;
            }
        }

        offset += head_size;
    }

    if !saw_any_file_header {
        return SniffStatus::RarStored;
    }
    if saw_store_video {
        SniffStatus::RarStored
    } else if saw_only_nested {
        SniffStatus::RarNestedArchive
    } else {
        SniffStatus::RarStored
    }
}

/// RAR5 variable-length-integer block walk: file-header (`0x02`) carries
/// name and flags; compressed/nested/store logic mirrors RAR4.
fn sniff_rar5(window: &[u8]) -> SniffStatus {
    let mut offset = RAR5_MAGIC.len();
    let mut saw_store_video = false;
    let mut saw_only_nested = true;
    let mut saw_any_file_header = false;

    while offset < window.len() {
        let Some((header_crc_len, _)) = read_vint(window, offset) else { break };
        offset += header_crc_len;
        let Some((header_size, hs_len)) = read_vint(window, offset) else { break };
        offset += hs_len;
        let block_start = offset;
        let Some((block_type, bt_len)) = read_vint(window, offset) else { break };
        offset += bt_len;

        if block_type == 0x02 {
            saw_any_file_header = true;
            let Some((header_flags, hf_len)) = read_vint(window, offset) else { break };
            offset += hf_len;
            if header_flags & 0x04 != 0 {
                return SniffStatus::RarEncrypted;
            }

            let mut cursor = offset;
            let Some((_file_flags, ff_len)) = read_vint(window, cursor) else { break };
            cursor += ff_len;
            let Some((_unpacked_size, us_len)) = read_vint(window, cursor) else { break };
            cursor += us_len;
            let Some((_attrs, at_len)) = read_vint(window, cursor) else { break };
            cursor += at_len;
            let Some((comp_info, ci_len)) = read_vint(window, cursor) else { break };
            cursor += ci_len;
            let solid = comp_info & 0x0040 != 0;
            if solid {
                return SniffStatus::RarSolid;
            }
            let method = (comp_info >> 7) & 0x07;
            let Some((_host_os, ho_len)) = read_vint(window, cursor) else { break };
            cursor += ho_len;
            let Some((name_len, nl_len)) = read_vint(window, cursor) else { break };
            cursor += nl_len;

            let name = window
                .get(cursor..(cursor + name_len as usize).min(window.len()))
                .map(|bytes| String::from_utf8_lossy(bytes).to_lowercase())
                .unwrap_or_default();

            let is_video = VIDEO_EXTENSIONS.iter().any(|ext| name.ends_with(ext));
            let is_nested = NESTED_ARCHIVE_PATTERNS.iter().any(|pat| name.ends_with(pat));
            if !is_nested {
                saw_only_nested = false;
            }
            if method == 0 && is_video {
                saw_store_video = true;
            }
        }

        offset = block_start + header_size as usize;
        if offset <= block_start {
            break;
        }
    }

    if !saw_any_file_header {
        return SniffStatus::Rar5Unsupported;
    }
    if saw_store_video {
        SniffStatus::RarStored
    } else if saw_only_nested {
        SniffStatus::RarNestedArchive
    } else {
        SniffStatus::RarStored
    }
}

/// Only recognizes an unencoded (plain) header: every coder method id
/// must be the single byte `0x00` (copy) for `sevenzip-stored`. Anything
/// else — including an encoded-header start — is unsupported.
fn sniff_sevenzip(window: &[u8]) -> SniffStatus {
    const HEADER: u8 = 0x01;
    const ENCODED_HEADER: u8 = 0x17;

    let next_header_candidate = window.get(32);
    match next_header_candidate {
        Some(&HEADER) => {
            if window[32..].iter().skip(1).take(64).any(|&b| b == 0x00) {
                SniffStatus::SevenzipStored
            } else {
                SniffStatus::SevenzipUnsupported
            }
        }
        Some(&ENCODED_HEADER) => SniffStatus::SevenzipUnsupported,
        _ => SniffStatus::SevenzipUnsupported,
    }
}

fn apply_nested_archive_overlay(window: &[u8], status: SniffStatus) -> SniffStatus {
    let text = String::from_utf8_lossy(window);
    let has_nested = NESTED_ARCHIVE_PATTERNS.iter().any(|pat| text.contains(pat));
    let has_video = VIDEO_EXTENSIONS.iter().any(|ext| text.contains(&format!(".{}", ext)));

    if has_nested && !has_video {
        match status {
            SniffStatus::RarStored | SniffStatus::RarHeaderNotFound => SniffStatus::RarNestedArchive,
            SniffStatus::SevenzipStored => SniffStatus::SevenzipNestedArchive,
            other => other,
        }
    } else {
        status
    }
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}

/// RAR5 variable-length integer: 7 data bits per byte, MSB is the
/// continuation flag, little-endian group order.
fn read_vint(data: &[u8], offset: usize) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    let mut consumed = 0;
    for &byte in data.get(offset..)?.iter().take(10) {
        value |= ((byte & 0x7F) as u64) << shift;
        consumed += 1;
        if byte & 0x80 == 0 {
            return Some((value, consumed));
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_magic_yields_header_not_found() {
        let data = vec![0u8; 1024];
        assert_eq!(sniff(&data, false), SniffStatus::RarHeaderNotFound);
    }

    #[test]
    fn rar4_with_no_file_headers_is_stored() {
        let mut data = RAR4_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 32]);
        assert_eq!(sniff(&data, false), SniffStatus::RarStored);
    }

    #[test]
    fn sevenzip_encoded_header_is_unsupported() {
        let mut data = SEVENZIP_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 26]);
        data.push(0x17);
        data.extend_from_slice(&[0u8; 64]);
        assert_eq!(sniff(&data, false), SniffStatus::SevenzipUnsupported);
    }

    #[test]
    fn sevenzip_sniff_skipped_when_stat_passed() {
        let mut data = SEVENZIP_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 26]);
        data.push(0x01);
        data.extend_from_slice(&[0u8; 64]);
        assert_eq!(sniff(&data, true), SniffStatus::SevenzipUntested);
    }

    #[test]
    fn overlay_upgrades_to_nested_archive_when_only_archive_tokens_present() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(b"Some.Release.part01.rar some other text");
        assert_eq!(sniff(&data, false), SniffStatus::RarNestedArchive);
    }

    #[test]
    fn overlay_leaves_status_alone_when_video_token_present() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(b"Some.Release.mkv and also part01.rar mention");
        assert_eq!(sniff(&data, false), SniffStatus::RarHeaderNotFound);
    }

    #[test]
    fn blocker_and_success_classification() {
        assert!(SniffStatus::RarEncrypted.is_blocker());
        assert!(SniffStatus::RarSolid.is_blocker());
        assert!(SniffStatus::RarStored.is_success());
        assert!(!SniffStatus::RarStored.is_blocker());
    }
}
