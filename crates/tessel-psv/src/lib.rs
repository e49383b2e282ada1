//! Pipeline-state-validation runtime-info record.
//!
//! The record is a fixed little-endian layout consumed by a downstream
//! loader. Newer versions only append fields, so readers and writers agree
//! on the layout by record size alone.

mod error;
mod record;
mod stage;
mod wire;

pub use error::{PsvError, PsvResult};
pub use record::{DecodedRecord, PsvVersion, RuntimeInfo, SignatureCounts};
pub use stage::{
    AmplificationInfo, DomainInfo, GeometryInfo, HullInfo, MeshInfo, PixelInfo,
    STAGE_EXTRA_SIZE, STAGE_UNION_SIZE, ShaderStage, StageExtra, StageInfo, VertexInfo,
};
