//! Concrete management interface implementations.

pub mod ipmitool;

pub use ipmitool::IpmiTool;
