use thiserror::Error;

#[derive(Debug, Error)]
pub enum PcapSourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PCAP parse error ({context}): {message}")]
    Pcap {
        context: &'static str,
        message: String,
    },
    #[error("stream ended inside header: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
}
