//! Persisted shader cache format.
//!
//! Little-endian throughout:
//!
//! ```text
//! header   u32 format id (StringId "ShaderCache"), u32 version
//! entries  u32 count, then masters followed by aliases
//!   master u32 id, u32 shader type, u32 byte count,
//!          u32 asset count, asset count × u32 asset id,
//!          u64 combined asset file hashes, byte count × u8 bytecode
//!   alias  u32 id, u32 shader type, u32 0xFFFF_FFFF, u32 master id
//! index    u32 count, count × (u128 source code id, u32 shader cache id)
//! ```
//!
//! Masters precede aliases so that an alias always refers to an entry that has
//! already been read.

use crate::backend::{ShaderBytecode, ShaderType};
use crate::errors::{PipelineError, Result};
use crate::renderer::pipeline::pipeline_id::{ShaderCacheId, ShaderSourceCodeId};
use crate::utils::{AssetId, StringId};

pub const SHADER_CACHE_FORMAT_TYPE: StringId = StringId::new("ShaderCache");
pub const SHADER_CACHE_FORMAT_VERSION: u32 = 1;

const ALIAS_MARKER: u32 = StringId::UNINITIALIZED;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterRecord {
    pub shader_cache_id: ShaderCacheId,
    pub shader_type: ShaderType,
    pub asset_ids: Vec<AssetId>,
    pub combined_asset_file_hashes: u64,
    pub bytecode: ShaderBytecode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasRecord {
    pub shader_cache_id: ShaderCacheId,
    pub shader_type: ShaderType,
    pub master_shader_cache_id: ShaderCacheId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderCacheBlob {
    pub masters: Vec<MasterRecord>,
    pub aliases: Vec<AliasRecord>,
    pub index: Vec<(ShaderSourceCodeId, ShaderCacheId)>,
}

impl ShaderCacheBlob {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BlobWriter::default();
        writer.u32(SHADER_CACHE_FORMAT_TYPE.id());
        writer.u32(SHADER_CACHE_FORMAT_VERSION);

        writer.count(self.masters.len() + self.aliases.len());
        for master in &self.masters {
            writer.u32(master.shader_cache_id.id());
            writer.u32(master.shader_type.index() as u32);
            writer.count(master.bytecode.len());
            writer.count(master.asset_ids.len());
            for asset_id in &master.asset_ids {
                writer.u32(asset_id.id());
            }
            writer.u64(master.combined_asset_file_hashes);
            writer.bytes.extend_from_slice(master.bytecode.as_bytes());
        }
        for alias in &self.aliases {
            writer.u32(alias.shader_cache_id.id());
            writer.u32(alias.shader_type.index() as u32);
            writer.u32(ALIAS_MARKER);
            writer.u32(alias.master_shader_cache_id.id());
        }

        writer.count(self.index.len());
        for (source_code_id, shader_cache_id) in &self.index {
            writer.u128(source_code_id.id());
            writer.u32(shader_cache_id.id());
        }
        writer.bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = BlobReader { bytes, position: 0 };

        let format_type = reader.u32()?;
        if format_type != SHADER_CACHE_FORMAT_TYPE.id() {
            return Err(PipelineError::CacheFormat(format!(
                "not a shader cache (format id {format_type:#010x})"
            )));
        }
        let version = reader.u32()?;
        if version != SHADER_CACHE_FORMAT_VERSION {
            return Err(PipelineError::CacheFormat(format!(
                "unsupported shader cache version {version}"
            )));
        }

        let mut blob = Self::default();
        let number_of_entries = reader.u32()?;
        for _ in 0..number_of_entries {
            let shader_cache_id = ShaderCacheId(reader.u32()?);
            let shader_type = reader.shader_type()?;
            let number_of_bytes = reader.u32()?;

            if number_of_bytes == ALIAS_MARKER {
                blob.aliases.push(AliasRecord {
                    shader_cache_id,
                    shader_type,
                    master_shader_cache_id: ShaderCacheId(reader.u32()?),
                });
                continue;
            }
            if !blob.aliases.is_empty() {
                return Err(PipelineError::CacheFormat(format!(
                    "master {shader_cache_id} follows alias entries"
                )));
            }

            let number_of_asset_ids = reader.u32()?;
            let asset_ids = (0..number_of_asset_ids)
                .map(|_| reader.u32().map(StringId::from_raw))
                .collect::<Result<Vec<_>>>()?;
            let combined_asset_file_hashes = reader.u64()?;
            let bytecode = ShaderBytecode::new(reader.take(number_of_bytes as usize)?.to_vec());

            blob.masters.push(MasterRecord {
                shader_cache_id,
                shader_type,
                asset_ids,
                combined_asset_file_hashes,
                bytecode,
            });
        }

        let number_of_index_entries = reader.u32()?;
        for _ in 0..number_of_index_entries {
            let source_code_id = ShaderSourceCodeId(reader.u128()?);
            let shader_cache_id = ShaderCacheId(reader.u32()?);
            blob.index.push((source_code_id, shader_cache_id));
        }

        if reader.position != bytes.len() {
            return Err(PipelineError::CacheFormat(format!(
                "{} trailing bytes",
                bytes.len() - reader.position
            )));
        }
        Ok(blob)
    }
}

#[derive(Default)]
struct BlobWriter {
    bytes: Vec<u8>,
}

impl BlobWriter {
    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn u128(&mut self, value: u128) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    #[allow(clippy::cast_possible_truncation)]
    fn count(&mut self, count: usize) {
        self.u32(count as u32);
    }
}

struct BlobReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> BlobReader<'a> {
    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                PipelineError::CacheFormat(format!(
                    "truncated at offset {} (wanted {count} bytes)",
                    self.position
                ))
            })?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }

    fn u128(&mut self) -> Result<u128> {
        self.array().map(u128::from_le_bytes)
    }

    fn shader_type(&mut self) -> Result<ShaderType> {
        let index = self.u32()?;
        ShaderType::ALL
            .get(index as usize)
            .copied()
            .ok_or_else(|| PipelineError::CacheFormat(format!("invalid shader type {index}")))
    }
}
