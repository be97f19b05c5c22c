mod reader;
#[cfg(test)]
mod tests;
mod transport;

pub use reader::{ControllerReader, ControllerSnapshot, BUTTON_COUNT};
pub use transport::{DeviceTransport, MockDeviceTransport, ScriptStep, REPORT_LEN};

#[cfg(target_os = "linux")]
pub use transport::HidrawTransport;
