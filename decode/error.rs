// ========================================================================================
//                                  Decode error taxonomy
// ========================================================================================

use std::io;
use thiserror::Error;

/// Every failure the decode path can report.
///
/// Format and corruption errors are terminal for the access that raised them: the
/// file is assumed to have been written by a trusted encoder, so nothing here is
/// retried. Optional dictionary keys and backward seeks are not errors at all and
/// never surface through this type.
#[derive(Debug, Error)]
pub enum GtbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid genotype file: {0}")]
    Format(String),
    #[error("corrupt genotype block: {0}")]
    CorruptBlock(String),
    #[error("decode precondition violated: {0}")]
    Precondition(String),
}

impl GtbError {
    /// Prefixes the message of a corrupt-block error with the id of the block being
    /// decoded. Other kinds are passed through untouched.
    pub fn in_block(self, block_id: usize) -> Self {
        match self {
            GtbError::CorruptBlock(msg) => GtbError::CorruptBlock(format!("block {block_id}: {msg}")),
            other => other,
        }
    }
}
