use aero_pipe::PipeError;

/// Recoverable replay failures. The command that hit one is abandoned and
/// replay continues with the next command.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Pipe(#[from] PipeError),

    #[error("replay nesting depth {depth} exceeds the limit of {limit}")]
    ReplayDepthExceeded { depth: u32, limit: u32 },

    #[error("missing {0}")]
    MissingObject(&'static str),

    #[error("backend failed to create {0}")]
    CreateFailed(&'static str),

    #[error("{count} generated-command streams exceed the limit of {limit}")]
    TooManyStreams { count: usize, limit: usize },

    #[error("event {0} was not signalled when waited on")]
    EventNotSet(u32),
}

#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    Error { at: usize, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub commands_processed: u32,
    pub events: Vec<ExecutorEvent>,
}

impl ExecutionReport {
    pub fn is_ok(&self) -> bool {
        !self
            .events
            .iter()
            .any(|e| matches!(e, ExecutorEvent::Error { .. }))
    }

    pub fn errors(&self) -> impl Iterator<Item = (usize, &str)> {
        self.events.iter().map(|e| match e {
            ExecutorEvent::Error { at, message } => (*at, message.as_str()),
        })
    }
}
