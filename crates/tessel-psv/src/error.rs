//! Error types for PSV record emission and decoding.

use derive_more::{Display, Error};

use crate::stage::ShaderStage;

pub type PsvResult<T> = Result<T, PsvError>;

#[derive(Clone, Copy, Debug, Display, Error, PartialEq, Eq)]
pub enum PsvError {
    #[display("PSV record truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[display("unknown shader stage {_0}")]
    UnknownStage(#[error(not(source))] u8),

    #[display("stage data for {found} does not match shader stage {expected}")]
    StageMismatch {
        expected: ShaderStage,
        found: ShaderStage,
    },

    #[display("a record without a stage byte needs a stage hint")]
    MissingStage,

    #[display("{field} count {value} does not fit in {max}")]
    CountOverflow {
        field: &'static str,
        value: usize,
        max: usize,
    },
}
