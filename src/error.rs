
use crate::mac::config::ConfigError;
use crate::queue::QueueError;

/// MAC errors
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError<E> {
    /// Frame rejected by the transmit queue
    Queue(QueueError),

    /// Invalid MAC configuration
    Config(ConfigError),

    /// Wrapper for unhandled / underlying radio errors
    Radio(E),
}

impl <E> From<QueueError> for CoreError<E> {
    fn from(e: QueueError) -> Self {
        CoreError::Queue(e)
    }
}

impl <E> From<ConfigError> for CoreError<E> {
    fn from(e: ConfigError) -> Self {
        CoreError::Config(e)
    }
}
