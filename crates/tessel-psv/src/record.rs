//! The versioned runtime-info record.
//!
//! Versions only ever append fields, so the record size alone identifies
//! the layout:
//!
//! | version | size | adds |
//! |---|---|---|
//! | v0 | 24 | stage union, min/max wave lane count |
//! | v1 | 36 | stage byte, view-id flag, stage extra, signature counts |
//! | v2 | 48 | thread-group dimensions |
//! | v3 | 52 | entry function name offset |

use tracing::{debug, trace};

use crate::error::{PsvError, PsvResult};
use crate::stage::{STAGE_EXTRA_SIZE, STAGE_UNION_SIZE, ShaderStage, StageExtra, StageInfo};
use crate::wire::{Reader, Writer};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PsvVersion {
    V0,
    V1,
    V2,
    V3,
}

impl PsvVersion {
    pub const LATEST: Self = Self::V3;

    const ALL: [Self; 4] = [Self::V0, Self::V1, Self::V2, Self::V3];

    pub fn record_size(self) -> usize {
        match self {
            Self::V0 => 24,
            Self::V1 => 36,
            Self::V2 => 48,
            Self::V3 => 52,
        }
    }

    /// The newest version whose fields fit in `size` bytes. Sizes beyond
    /// the latest layout map to the latest version.
    pub fn from_size(size: usize) -> PsvResult<Self> {
        Self::ALL
            .into_iter()
            .rev()
            .find(|v| v.record_size() <= size)
            .ok_or(PsvError::Truncated {
                needed: Self::V0.record_size(),
                actual: size,
            })
    }
}

/// Signature element and vector counts, each stored in one byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignatureCounts {
    pub input_elements: u8,
    pub output_elements: u8,
    pub patch_constant_or_primitive_elements: u8,
    pub input_vectors: u8,
    /// Output vectors per stream.
    pub output_vectors: [u8; 4],
}

impl SignatureCounts {
    pub fn from_counts(
        input_elements: usize,
        output_elements: usize,
        patch_constant_or_primitive_elements: usize,
        input_vectors: usize,
        output_vectors: [usize; 4],
    ) -> PsvResult<Self> {
        let mut out = [0u8; 4];
        for (slot, n) in out.iter_mut().zip(output_vectors) {
            *slot = narrow_u8("output vector", n)?;
        }
        Ok(Self {
            input_elements: narrow_u8("input element", input_elements)?,
            output_elements: narrow_u8("output element", output_elements)?,
            patch_constant_or_primitive_elements: narrow_u8(
                "patch constant element",
                patch_constant_or_primitive_elements,
            )?,
            input_vectors: narrow_u8("input vector", input_vectors)?,
            output_vectors: out,
        })
    }
}

fn narrow_u8(field: &'static str, value: usize) -> PsvResult<u8> {
    u8::try_from(value).map_err(|_| PsvError::CountOverflow {
        field,
        value,
        max: u8::MAX as usize,
    })
}

impl StageExtra {
    /// Geometry-shader output vertex limit, checked against the 16-bit field.
    pub fn max_vertex_count(n: usize) -> PsvResult<Self> {
        u16::try_from(n)
            .map(Self::MaxVertexCount)
            .map_err(|_| PsvError::CountOverflow {
                field: "max vertex",
                value: n,
                max: u16::MAX as usize,
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub stage_info: StageInfo,
    pub min_wave_lane_count: u32,
    pub max_wave_lane_count: u32,
    pub uses_view_id: bool,
    pub stage_extra: StageExtra,
    pub signature: SignatureCounts,
    pub num_threads: [u32; 3],
    /// Offset of the entry point's name in the string table.
    pub entry_function_name: u32,
}

impl RuntimeInfo {
    pub fn new(stage_info: StageInfo) -> Self {
        Self {
            stage_info,
            min_wave_lane_count: 0,
            max_wave_lane_count: u32::MAX,
            uses_view_id: false,
            stage_extra: StageExtra::None,
            signature: SignatureCounts::default(),
            num_threads: [0; 3],
            entry_function_name: 0,
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage_info.stage()
    }

    /// Encode the fields `version` covers.
    pub fn to_bytes(&self, version: PsvVersion) -> PsvResult<Vec<u8>> {
        let stage = self.stage();
        if version >= PsvVersion::V1 {
            self.stage_extra.check(stage)?;
        }

        let mut w = Writer::with_capacity(version.record_size());
        self.stage_info.write(&mut w);
        w.u32(self.min_wave_lane_count);
        w.u32(self.max_wave_lane_count);

        if version >= PsvVersion::V1 {
            w.u8(stage.as_u8());
            w.bool(self.uses_view_id);
            self.stage_extra.write(&mut w);
            let sig = &self.signature;
            w.u8(sig.input_elements);
            w.u8(sig.output_elements);
            w.u8(sig.patch_constant_or_primitive_elements);
            w.u8(sig.input_vectors);
            for n in sig.output_vectors {
                w.u8(n);
            }
        }
        if version >= PsvVersion::V2 {
            for n in self.num_threads {
                w.u32(n);
            }
        }
        if version >= PsvVersion::V3 {
            w.u32(self.entry_function_name);
        }

        debug_assert_eq!(w.len(), version.record_size());
        debug!(%stage, ?version, size = w.len(), "emitted PSV runtime info");
        Ok(w.into_bytes())
    }

    /// Encode with a leading little-endian `u32` record size.
    pub fn to_sized_bytes(&self, version: PsvVersion) -> PsvResult<Vec<u8>> {
        let body = self.to_bytes(version)?;
        let mut w = Writer::with_capacity(4 + body.len());
        w.u32(body.len() as u32);
        let mut out = w.into_bytes();
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a record whose size is `bytes.len()`.
    ///
    /// A v0 record has no stage byte, so `stage_hint` is required to pick
    /// the union layout. For newer records the hint, when given, must agree
    /// with the stored stage.
    pub fn from_bytes(bytes: &[u8], stage_hint: Option<ShaderStage>) -> PsvResult<DecodedRecord> {
        let version = PsvVersion::from_size(bytes.len())?;
        let mut r = Reader::new(bytes);

        let stage = if version >= PsvVersion::V1 {
            let stored = ShaderStage::from_u8(bytes[STAGE_UNION_SIZE + 8])?;
            match stage_hint {
                Some(expected) if expected != stored => {
                    return Err(PsvError::StageMismatch {
                        expected,
                        found: stored,
                    });
                }
                _ => stored,
            }
        } else {
            stage_hint.ok_or(PsvError::MissingStage)?
        };

        let mut info = Self::new(StageInfo::read(stage, &mut r));
        info.min_wave_lane_count = r.u32();
        info.max_wave_lane_count = r.u32();

        if version >= PsvVersion::V1 {
            r.skip(1);
            info.uses_view_id = r.bool();
            info.stage_extra = StageExtra::read(stage, &mut r);
            info.signature = SignatureCounts {
                input_elements: r.u8(),
                output_elements: r.u8(),
                patch_constant_or_primitive_elements: r.u8(),
                input_vectors: r.u8(),
                output_vectors: [r.u8(), r.u8(), r.u8(), r.u8()],
            };
        }
        if version >= PsvVersion::V2 {
            info.num_threads = [r.u32(), r.u32(), r.u32()];
        }
        if version >= PsvVersion::V3 {
            info.entry_function_name = r.u32();
        }

        let trailing = bytes.len() - version.record_size();
        if trailing > 0 {
            trace!(trailing, "ignoring unknown trailing PSV fields");
        }
        debug!(%stage, ?version, "decoded PSV runtime info");
        Ok(DecodedRecord {
            version,
            info,
            trailing,
        })
    }

    /// Decode a record preceded by its `u32` size. Returns the record and
    /// the bytes that follow it.
    pub fn from_sized_bytes(
        bytes: &[u8],
        stage_hint: Option<ShaderStage>,
    ) -> PsvResult<(DecodedRecord, &[u8])> {
        let mut r = Reader::new(bytes);
        if bytes.len() < 4 {
            return Err(PsvError::Truncated {
                needed: 4,
                actual: bytes.len(),
            });
        }
        let size = r.u32() as usize;
        let body = bytes.get(4..4 + size).ok_or(PsvError::Truncated {
            needed: 4 + size,
            actual: bytes.len(),
        })?;
        let decoded = Self::from_bytes(body, stage_hint)?;
        Ok((decoded, &bytes[4 + size..]))
    }
}

/// A decoded record with the layout it was read as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedRecord {
    pub version: PsvVersion,
    pub info: RuntimeInfo,
    /// Bytes past the latest known layout.
    pub trailing: usize,
}

const _: () = assert!(STAGE_UNION_SIZE + 8 + 2 + STAGE_EXTRA_SIZE + 8 == 36);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{GeometryInfo, PixelInfo, VertexInfo};

    fn pixel() -> RuntimeInfo {
        let mut info = RuntimeInfo::new(StageInfo::Pixel(PixelInfo {
            depth_output: true,
            sample_frequency: false,
        }));
        info.min_wave_lane_count = 4;
        info.max_wave_lane_count = 64;
        info
    }

    #[test]
    fn record_sizes_per_version() {
        let info = pixel();
        for (version, size) in [
            (PsvVersion::V0, 24),
            (PsvVersion::V1, 36),
            (PsvVersion::V2, 48),
            (PsvVersion::V3, 52),
        ] {
            assert_eq!(version.record_size(), size);
            assert_eq!(info.to_bytes(version).unwrap().len(), size);
        }
    }

    #[test]
    fn version_from_size() {
        assert_eq!(PsvVersion::from_size(24), Ok(PsvVersion::V0));
        assert_eq!(PsvVersion::from_size(35), Ok(PsvVersion::V0));
        assert_eq!(PsvVersion::from_size(36), Ok(PsvVersion::V1));
        assert_eq!(PsvVersion::from_size(52), Ok(PsvVersion::V3));
        assert_eq!(PsvVersion::from_size(200), Ok(PsvVersion::V3));
        assert_eq!(
            PsvVersion::from_size(23),
            Err(PsvError::Truncated {
                needed: 24,
                actual: 23
            })
        );
    }

    #[test]
    fn v0_layout_bytes() {
        let bytes = pixel().to_bytes(PsvVersion::V0).unwrap();
        let mut expected = vec![1, 0];
        expected.resize(16, 0);
        expected.extend_from_slice(&[4, 0, 0, 0, 64, 0, 0, 0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn v1_header_follows_wave_counts() {
        let mut info = RuntimeInfo::new(StageInfo::Geometry(GeometryInfo::default()));
        info.uses_view_id = true;
        info.stage_extra = StageExtra::max_vertex_count(0x0203).unwrap();
        info.signature = SignatureCounts::from_counts(1, 2, 0, 3, [4, 0, 0, 0]).unwrap();
        let bytes = info.to_bytes(PsvVersion::V1).unwrap();
        assert_eq!(&bytes[24..], &[2, 1, 3, 2, 1, 2, 0, 3, 4, 0, 0, 0]);
    }

    #[test]
    fn v0_needs_a_stage_hint() {
        let bytes = pixel().to_bytes(PsvVersion::V0).unwrap();
        assert_eq!(
            RuntimeInfo::from_bytes(&bytes, None),
            Err(PsvError::MissingStage)
        );
        let decoded = RuntimeInfo::from_bytes(&bytes, Some(ShaderStage::Pixel)).unwrap();
        assert_eq!(decoded.version, PsvVersion::V0);
        assert_eq!(decoded.info, pixel());
    }

    #[test]
    fn hint_must_agree_with_stored_stage() {
        let bytes = pixel().to_bytes(PsvVersion::V1).unwrap();
        assert_eq!(
            RuntimeInfo::from_bytes(&bytes, Some(ShaderStage::Vertex)),
            Err(PsvError::StageMismatch {
                expected: ShaderStage::Vertex,
                found: ShaderStage::Pixel,
            })
        );
    }

    #[test]
    fn unknown_stage_byte_is_rejected() {
        let mut bytes = pixel().to_bytes(PsvVersion::V1).unwrap();
        bytes[24] = 15;
        assert_eq!(
            RuntimeInfo::from_bytes(&bytes, None),
            Err(PsvError::UnknownStage(15))
        );
    }

    #[test]
    fn mismatched_extra_is_rejected_on_write() {
        let mut info = RuntimeInfo::new(StageInfo::Vertex(VertexInfo::default()));
        info.stage_extra = StageExtra::PatchConstantVectors(1);
        assert!(matches!(
            info.to_bytes(PsvVersion::V1),
            Err(PsvError::StageMismatch { .. })
        ));
        // v0 has no room for the extra, so it is not checked.
        assert!(info.to_bytes(PsvVersion::V0).is_ok());
    }

    #[test]
    fn count_overflow() {
        assert_eq!(
            SignatureCounts::from_counts(256, 0, 0, 0, [0; 4]),
            Err(PsvError::CountOverflow {
                field: "input element",
                value: 256,
                max: 255,
            })
        );
        assert!(StageExtra::max_vertex_count(70_000).is_err());
    }

    #[test]
    fn sized_bytes_round_trip_with_tail() {
        let mut bytes = pixel().to_sized_bytes(PsvVersion::V2).unwrap();
        assert_eq!(&bytes[..4], &[48, 0, 0, 0]);
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let (decoded, rest) = RuntimeInfo::from_sized_bytes(&bytes, None).unwrap();
        assert_eq!(decoded.version, PsvVersion::V2);
        assert_eq!(rest, &[0xAA, 0xBB]);
    }

    #[test]
    fn sized_bytes_truncated() {
        let bytes = [52, 0, 0, 0, 1, 2, 3];
        assert_eq!(
            RuntimeInfo::from_sized_bytes(&bytes, None),
            Err(PsvError::Truncated {
                needed: 56,
                actual: 7
            })
        );
    }
}
