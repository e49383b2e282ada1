//! Shader stages and the per-stage layouts of the stage-info union.
//!
//! Every layout is written field by field in little-endian order with its
//! padding spelled out, then zero-filled up to [`STAGE_UNION_SIZE`].

use derive_more::Display;

use crate::error::{PsvError, PsvResult};
use crate::wire::{Reader, Writer};

/// Size of the stage union: the hull-shader layout, four `u32`s.
pub const STAGE_UNION_SIZE: usize = 16;

/// Size of the v1 stage-specific union that follows the stage byte.
pub const STAGE_EXTRA_SIZE: usize = 2;

/// Stage byte values, numbered like the DXIL shader kinds so that loaders
/// reading the same record agree on them.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShaderStage {
    #[display("pixel")]
    Pixel = 0,
    #[display("vertex")]
    Vertex = 1,
    #[display("geometry")]
    Geometry = 2,
    #[display("hull")]
    Hull = 3,
    #[display("domain")]
    Domain = 4,
    #[display("compute")]
    Compute = 5,
    #[display("library")]
    Library = 6,
    #[display("raygeneration")]
    RayGeneration = 7,
    #[display("intersection")]
    Intersection = 8,
    #[display("anyhit")]
    AnyHit = 9,
    #[display("closesthit")]
    ClosestHit = 10,
    #[display("miss")]
    Miss = 11,
    #[display("callable")]
    Callable = 12,
    #[display("mesh")]
    Mesh = 13,
    #[display("amplification")]
    Amplification = 14,
}

impl ShaderStage {
    pub fn from_u8(raw: u8) -> PsvResult<Self> {
        Ok(match raw {
            0 => Self::Pixel,
            1 => Self::Vertex,
            2 => Self::Geometry,
            3 => Self::Hull,
            4 => Self::Domain,
            5 => Self::Compute,
            6 => Self::Library,
            7 => Self::RayGeneration,
            8 => Self::Intersection,
            9 => Self::AnyHit,
            10 => Self::ClosestHit,
            11 => Self::Miss,
            12 => Self::Callable,
            13 => Self::Mesh,
            14 => Self::Amplification,
            other => return Err(PsvError::UnknownStage(other)),
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ray_tracing(self) -> bool {
        matches!(
            self,
            Self::RayGeneration
                | Self::Intersection
                | Self::AnyHit
                | Self::ClosestHit
                | Self::Miss
                | Self::Callable
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexInfo {
    pub output_position_present: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HullInfo {
    pub input_control_point_count: u32,
    pub output_control_point_count: u32,
    pub tessellator_domain: u32,
    pub tessellator_output_primitive: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DomainInfo {
    pub input_control_point_count: u32,
    pub output_position_present: bool,
    pub tessellator_domain: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryInfo {
    pub input_primitive: u32,
    pub output_topology: u32,
    pub output_stream_mask: u32,
    pub output_position_present: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelInfo {
    pub depth_output: bool,
    pub sample_frequency: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AmplificationInfo {
    pub payload_size_in_bytes: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshInfo {
    pub group_shared_bytes_used: u32,
    pub group_shared_bytes_dependent_on_view_id: u32,
    pub payload_size_in_bytes: u32,
    pub max_output_vertices: u16,
    pub max_output_primitives: u16,
}

/// The stage union. Compute, library and ray-tracing shaders carry no
/// stage data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageInfo {
    Vertex(VertexInfo),
    Hull(HullInfo),
    Domain(DomainInfo),
    Geometry(GeometryInfo),
    Pixel(PixelInfo),
    Compute,
    Library,
    /// Holds the ray-tracing stage it was built for. Any other stage here is
    /// treated as [`ShaderStage::Library`].
    RayTracing(ShaderStage),
    Amplification(AmplificationInfo),
    Mesh(MeshInfo),
}

impl StageInfo {
    pub fn stage(&self) -> ShaderStage {
        match self {
            Self::Vertex(_) => ShaderStage::Vertex,
            Self::Hull(_) => ShaderStage::Hull,
            Self::Domain(_) => ShaderStage::Domain,
            Self::Geometry(_) => ShaderStage::Geometry,
            Self::Pixel(_) => ShaderStage::Pixel,
            Self::Compute => ShaderStage::Compute,
            Self::Library => ShaderStage::Library,
            Self::RayTracing(stage) if stage.is_ray_tracing() => *stage,
            Self::RayTracing(_) => ShaderStage::Library,
            Self::Amplification(_) => ShaderStage::Amplification,
            Self::Mesh(_) => ShaderStage::Mesh,
        }
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        let start = w.len();
        match self {
            Self::Vertex(vs) => w.bool(vs.output_position_present),
            Self::Hull(hs) => {
                w.u32(hs.input_control_point_count);
                w.u32(hs.output_control_point_count);
                w.u32(hs.tessellator_domain);
                w.u32(hs.tessellator_output_primitive);
            }
            Self::Domain(ds) => {
                w.u32(ds.input_control_point_count);
                w.bool(ds.output_position_present);
                w.pad(3);
                w.u32(ds.tessellator_domain);
            }
            Self::Geometry(gs) => {
                w.u32(gs.input_primitive);
                w.u32(gs.output_topology);
                w.u32(gs.output_stream_mask);
                w.bool(gs.output_position_present);
                w.pad(3);
            }
            Self::Pixel(ps) => {
                w.bool(ps.depth_output);
                w.bool(ps.sample_frequency);
            }
            Self::Compute | Self::Library | Self::RayTracing(_) => {}
            Self::Amplification(amp) => w.u32(amp.payload_size_in_bytes),
            Self::Mesh(ms) => {
                w.u32(ms.group_shared_bytes_used);
                w.u32(ms.group_shared_bytes_dependent_on_view_id);
                w.u32(ms.payload_size_in_bytes);
                w.u16(ms.max_output_vertices);
                w.u16(ms.max_output_primitives);
            }
        }
        let used = w.len() - start;
        debug_assert!(used <= STAGE_UNION_SIZE);
        w.pad(STAGE_UNION_SIZE - used);
    }

    /// Decode the union for `stage`. Consumes exactly [`STAGE_UNION_SIZE`]
    /// bytes.
    pub(crate) fn read(stage: ShaderStage, r: &mut Reader<'_>) -> Self {
        let mut u = r.sub(STAGE_UNION_SIZE);
        match stage {
            ShaderStage::Vertex => Self::Vertex(VertexInfo {
                output_position_present: u.bool(),
            }),
            ShaderStage::Hull => Self::Hull(HullInfo {
                input_control_point_count: u.u32(),
                output_control_point_count: u.u32(),
                tessellator_domain: u.u32(),
                tessellator_output_primitive: u.u32(),
            }),
            ShaderStage::Domain => {
                let input_control_point_count = u.u32();
                let output_position_present = u.bool();
                u.skip(3);
                Self::Domain(DomainInfo {
                    input_control_point_count,
                    output_position_present,
                    tessellator_domain: u.u32(),
                })
            }
            ShaderStage::Geometry => Self::Geometry(GeometryInfo {
                input_primitive: u.u32(),
                output_topology: u.u32(),
                output_stream_mask: u.u32(),
                output_position_present: u.bool(),
            }),
            ShaderStage::Pixel => Self::Pixel(PixelInfo {
                depth_output: u.bool(),
                sample_frequency: u.bool(),
            }),
            ShaderStage::Compute => Self::Compute,
            ShaderStage::Library => Self::Library,
            ShaderStage::RayGeneration
            | ShaderStage::Intersection
            | ShaderStage::AnyHit
            | ShaderStage::ClosestHit
            | ShaderStage::Miss
            | ShaderStage::Callable => Self::RayTracing(stage),
            ShaderStage::Amplification => Self::Amplification(AmplificationInfo {
                payload_size_in_bytes: u.u32(),
            }),
            ShaderStage::Mesh => Self::Mesh(MeshInfo {
                group_shared_bytes_used: u.u32(),
                group_shared_bytes_dependent_on_view_id: u.u32(),
                payload_size_in_bytes: u.u32(),
                max_output_vertices: u.u16(),
                max_output_primitives: u.u16(),
            }),
        }
    }
}

/// The two-byte union added in v1, right after the stage and view-id bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StageExtra {
    #[default]
    None,
    /// Geometry shaders.
    MaxVertexCount(u16),
    /// Hull and domain shaders.
    PatchConstantVectors(u8),
    /// Mesh shaders.
    Mesh {
        primitive_vectors: u8,
        output_topology: u8,
    },
}

impl StageExtra {
    /// Whether this payload may accompany `stage`. `None` fits every stage.
    pub fn fits(&self, stage: ShaderStage) -> bool {
        match self {
            Self::None => true,
            Self::MaxVertexCount(_) => stage == ShaderStage::Geometry,
            Self::PatchConstantVectors(_) => {
                matches!(stage, ShaderStage::Hull | ShaderStage::Domain)
            }
            Self::Mesh { .. } => stage == ShaderStage::Mesh,
        }
    }

    fn owner(&self) -> Option<ShaderStage> {
        match self {
            Self::None => None,
            Self::MaxVertexCount(_) => Some(ShaderStage::Geometry),
            Self::PatchConstantVectors(_) => Some(ShaderStage::Hull),
            Self::Mesh { .. } => Some(ShaderStage::Mesh),
        }
    }

    pub(crate) fn check(&self, stage: ShaderStage) -> PsvResult<()> {
        match self.owner() {
            Some(found) if !self.fits(stage) => Err(PsvError::StageMismatch {
                expected: stage,
                found,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        match *self {
            Self::None => w.pad(STAGE_EXTRA_SIZE),
            Self::MaxVertexCount(n) => w.u16(n),
            Self::PatchConstantVectors(n) => {
                w.u8(n);
                w.pad(1);
            }
            Self::Mesh {
                primitive_vectors,
                output_topology,
            } => {
                w.u8(primitive_vectors);
                w.u8(output_topology);
            }
        }
    }

    pub(crate) fn read(stage: ShaderStage, r: &mut Reader<'_>) -> Self {
        let mut u = r.sub(STAGE_EXTRA_SIZE);
        match stage {
            ShaderStage::Geometry => Self::MaxVertexCount(u.u16()),
            ShaderStage::Hull | ShaderStage::Domain => Self::PatchConstantVectors(u.u8()),
            ShaderStage::Mesh => Self::Mesh {
                primitive_vectors: u.u8(),
                output_topology: u.u8(),
            },
            _ => Self::None,
        }
    }
}
