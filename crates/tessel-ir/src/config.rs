//! Context-wide configuration.

use serde::{Deserialize, Serialize};

/// What erasing a block does with `blockaddress` constants that still point at it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockAddressPolicy {
    /// Replace every use of the block-address constant with a null constant
    /// of the same type, then destroy the constant.
    #[default]
    NullifyUsers,
    /// Treat the remaining block-address users like any other live use.
    Reject,
}

/// Options fixed at `IrContext` construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrConfig {
    /// Inserted between a colliding name and its uniquing counter (`x` -> `x.1`).
    pub name_separator: String,
    /// Report residual symbol table entries when a function or module is erased.
    pub verify_scope_teardown: bool,
    pub block_address_policy: BlockAddressPolicy,
}

impl Default for IrConfig {
    fn default() -> Self {
        Self {
            name_separator: ".".to_owned(),
            verify_scope_teardown: cfg!(debug_assertions),
            block_address_policy: BlockAddressPolicy::default(),
        }
    }
}
