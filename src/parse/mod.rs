//! Typed readers for tool output, so checks never scan stdout themselves.

pub mod crontab;
pub mod flycap;
pub mod iperf;
