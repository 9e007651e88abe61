/// Recoverable pipe-layer failures.
///
/// None of these abort replay: the operation that hit one is skipped and the
/// context stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    #[error("failed to map {len} bytes at offset {offset} of resource {resource}")]
    MapFailed { resource: u32, offset: u64, len: u64 },
    #[error("out of command space: need {needed} words, {available} available")]
    OutOfCommandSpace { needed: u64, available: u64 },
    #[error("backend failed to create {0}")]
    CreateFailed(&'static str),
}
