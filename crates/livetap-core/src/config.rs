use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default program used to run live captures.
pub const DEFAULT_TSHARK: &str = "tshark";

/// Capture configuration for one session.
///
/// An empty interface list means "every interface the capture tool reports".
///
/// # Examples
/// ```
/// use livetap_core::CaptureConfig;
///
/// let config = CaptureConfig::default()
///     .with_interface("eth0")
///     .with_bpf_filter("tcp port 80");
/// assert_eq!(config.interfaces, vec!["eth0".to_string()]);
/// assert_eq!(config.bpf_filter.as_deref(), Some("tcp port 80"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interfaces to capture on, in the order passed to the capture tool.
    pub interfaces: Vec<String>,
    /// Capture (BPF) filter applied by the capture tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpf_filter: Option<String>,
    /// Wireshark display filter. Sessions reject a non-empty one, because
    /// tshark cannot apply it while writing a capture stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_filter: Option<String>,
    /// Keep packet summaries only and drop packet bytes.
    pub only_summaries: bool,
    /// Program used to run the capture.
    pub tshark_path: PathBuf,
    /// Appended verbatim after the base parameters.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_parameters: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            bpf_filter: None,
            display_filter: None,
            only_summaries: false,
            tshark_path: PathBuf::from(DEFAULT_TSHARK),
            extra_parameters: Vec::new(),
        }
    }
}

impl CaptureConfig {
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_interfaces<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces.extend(interfaces.into_iter().map(Into::into));
        self
    }

    pub fn with_bpf_filter(mut self, filter: impl Into<String>) -> Self {
        self.bpf_filter = Some(filter.into());
        self
    }

    pub fn with_display_filter(mut self, filter: impl Into<String>) -> Self {
        self.display_filter = Some(filter.into());
        self
    }

    pub fn with_only_summaries(mut self, only_summaries: bool) -> Self {
        self.only_summaries = only_summaries;
        self
    }

    pub fn with_tshark_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tshark_path = path.into();
        self
    }

    pub fn with_extra_parameters<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_parameters
            .extend(params.into_iter().map(Into::into));
        self
    }
}
