use ash::vk;

/// Failures reported by the external frame generator.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("failed to load frame generator: {0}")]
    Load(String),

    #[error("frame generator {op} failed: {result}")]
    Failed { op: &'static str, result: vk::Result },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameGenError {
    /// The driver rejected a call.
    #[error("{context}: {result}")]
    Vulkan {
        result: vk::Result,
        context: &'static str,
    },

    /// A contract inside framegen itself was violated.
    #[error("logic error: {0}")]
    Logic(&'static str),

    #[error("no queue family with graphics support in the device request")]
    NoSuitableQueue,

    #[error(transparent)]
    Generator(#[from] GeneratorError),
}

pub type Result<T, E = FrameGenError> = std::result::Result<T, E>;

impl FrameGenError {
    /// `map_err` adapter for ash results.
    pub fn vulkan(context: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| FrameGenError::Vulkan { result, context }
    }

    /// Native result code reported to the application.
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            FrameGenError::Vulkan { result, .. } => *result,
            FrameGenError::Generator(GeneratorError::Failed { result, .. }) => *result,
            _ => vk::Result::ERROR_INITIALIZATION_FAILED,
        }
    }

    pub fn is_logic(&self) -> bool {
        matches!(self, FrameGenError::Logic(_))
    }
}
