//! Gear-hash delta codec.
//!
//! Patches are a varint-framed stream of copy and literal instructions.
//! Matching works on gear fingerprints of 8-byte words of the source;
//! common prefix and suffix are trimmed first, so near-identical buffers
//! (the normal case for similarity-matched chunks) produce tiny patches.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{Result, StrandError};
use crate::varint::{read_uvarint, write_uvarint};

use super::{Differ, Patcher};

/// Width of the fingerprinted word.
const WORD: usize = 8;

/// Shortest match worth a copy instruction.
const MIN_COPY: usize = WORD;

pub struct Gear;

fn gear_table() -> &'static [u64; 256] {
    static TABLE: OnceLock<[u64; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut state = 0x6b5f_f2e6_9d3c_1a84u64;
        let mut table = [0u64; 256];
        for entry in table.iter_mut() {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            *entry = z ^ (z >> 31);
        }
        table
    })
}

fn fingerprint(word: &[u8]) -> u64 {
    let table = gear_table();
    word.iter()
        .fold(0u64, |fp, &b| (fp << 1).wrapping_add(table[b as usize]))
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

impl Differ for Gear {
    fn diff(&self, source: &[u8], target: &[u8]) -> Result<Vec<u8>> {
        let mut patch = Vec::new();
        write_uvarint(&mut patch, target.len() as u64)?;

        let prefix = common_prefix(source, target);
        let max_suffix = source.len().min(target.len()) - prefix;
        let suffix = common_suffix(&source[prefix..], &target[prefix..]).min(max_suffix);

        if prefix > 0 {
            write_copy(&mut patch, 0, prefix)?;
        }

        let src_end = source.len() - suffix;
        let tgt_end = target.len() - suffix;

        // Index every word of the source middle; later occurrences win,
        // which keeps probing deterministic.
        let mut table: HashMap<u64, usize> = HashMap::new();
        if src_end - prefix >= WORD {
            for i in prefix..=src_end - WORD {
                table.insert(fingerprint(&source[i..i + WORD]), i);
            }
        }

        let mut pos = prefix;
        let mut literal_start = prefix;
        while pos + WORD <= tgt_end {
            let fp = fingerprint(&target[pos..pos + WORD]);
            let matched = table.get(&fp).copied().and_then(|i| {
                let len = match_len(&source[i..src_end], &target[pos..tgt_end]);
                (len >= MIN_COPY).then_some((i, len))
            });
            match matched {
                Some((offset, len)) => {
                    write_literal(&mut patch, &target[literal_start..pos])?;
                    write_copy(&mut patch, offset, len)?;
                    pos += len;
                    literal_start = pos;
                }
                None => pos += 1,
            }
        }
        write_literal(&mut patch, &target[literal_start..tgt_end])?;

        if suffix > 0 {
            write_copy(&mut patch, src_end, suffix)?;
        }
        Ok(patch)
    }
}

fn match_len(source: &[u8], target: &[u8]) -> usize {
    source.iter().zip(target).take_while(|(s, t)| s == t).count()
}

fn write_copy(patch: &mut Vec<u8>, offset: usize, len: usize) -> Result<()> {
    write_uvarint(patch, ((len as u64) << 1) | 1)?;
    write_uvarint(patch, offset as u64)?;
    Ok(())
}

fn write_literal(patch: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    write_uvarint(patch, (bytes.len() as u64) << 1)?;
    patch.extend_from_slice(bytes);
    Ok(())
}

impl Patcher for Gear {
    fn patch(&self, source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        let mut reader = patch;
        let target_len = read_uvarint(&mut reader)
            .map_err(|e| StrandError::Patch(format!("header: {e}")))? as usize;
        let mut target = Vec::with_capacity(target_len);

        while target.len() < target_len {
            let head = read_uvarint(&mut reader)
                .map_err(|e| StrandError::Patch(format!("instruction: {e}")))?;
            let len = (head >> 1) as usize;
            if len == 0 {
                return Err(StrandError::Patch("zero-length instruction".into()));
            }
            if head & 1 == 1 {
                let offset = read_uvarint(&mut reader)
                    .map_err(|e| StrandError::Patch(format!("copy offset: {e}")))?
                    as usize;
                let end = offset
                    .checked_add(len)
                    .filter(|end| *end <= source.len())
                    .ok_or_else(|| {
                        StrandError::Patch(format!(
                            "copy {offset}+{len} outside source of {} bytes",
                            source.len()
                        ))
                    })?;
                target.extend_from_slice(&source[offset..end]);
            } else {
                if len > reader.len() {
                    return Err(StrandError::Patch(format!(
                        "literal of {len} bytes truncated at {}",
                        reader.len()
                    )));
                }
                target.extend_from_slice(&reader[..len]);
                reader = &reader[len..];
            }
        }

        if target.len() != target_len {
            return Err(StrandError::Patch(format!(
                "reconstructed {} bytes, expected {target_len}",
                target.len()
            )));
        }
        Ok(target)
    }
}
