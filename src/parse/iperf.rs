//! iperf3 client output.
//!
//! ```text
//! [ ID] Interval           Transfer     Bitrate         Retr
//! [  5]   0.00-10.00  sec  1.09 GBytes   939 Mbits/sec    0             sender
//! [  5]   0.00-10.04  sec  1.09 GBytes   935 Mbits/sec                  receiver
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IperfSummary {
    /// Mbit/s reported on the `sender` line.
    pub sender: Option<f64>,
    /// Mbit/s reported on the `receiver` line.
    pub receiver: Option<f64>,
}

impl IperfSummary {
    /// Lowest of the two directions, if both were reported.
    pub fn min_rate(&self) -> Option<f64> {
        match (self.sender, self.receiver) {
            (Some(s), Some(r)) => Some(s.min(r)),
            _ => None,
        }
    }
}

/// Errors iperf3 prints instead of a summary.
pub const CONNECTION_ERRORS: &[&str] = &["Connection refused", "No route to host", "unable to connect"];

pub fn connection_error(output: &str) -> Option<&'static str> {
    CONNECTION_ERRORS.iter().copied().find(|e| output.contains(e))
}

pub fn parse(output: &str) -> IperfSummary {
    let mut summary = IperfSummary::default();
    for line in output.lines() {
        let role = line.split_whitespace().last();
        let slot = match role {
            Some("sender") => &mut summary.sender,
            Some("receiver") => &mut summary.receiver,
            _ => continue,
        };
        if let Some(rate) = bitrate_mbits(line) {
            *slot = Some(rate);
        }
    }
    summary
}

/// Value in front of the first `*bits/sec` token, converted to Mbit/s.
fn bitrate_mbits(line: &str) -> Option<f64> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let unit_pos = tokens.iter().position(|t| t.ends_with("bits/sec"))?;
    let value: f64 = tokens.get(unit_pos.checked_sub(1)?)?.parse().ok()?;
    let scale = match tokens[unit_pos] {
        "bits/sec" => 1e-6,
        "Kbits/sec" => 1e-3,
        "Mbits/sec" => 1.0,
        "Gbits/sec" => 1e3,
        "Tbits/sec" => 1e6,
        _ => return None,
    };
    Some(value * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIGABIT: &str = "\
Connecting to host 192.168.10.10, port 5201
[  5] local 192.168.10.1 port 40052 connected to 192.168.10.10 port 5201
[ ID] Interval           Transfer     Bitrate         Retr  Cwnd
[  5]   0.00-1.00   sec   113 MBytes   948 Mbits/sec    0    376 KBytes
- - - - - - - - - - - - - - - - - - - - - - - - -
[ ID] Interval           Transfer     Bitrate         Retr
[  5]   0.00-10.00  sec  1.09 GBytes   939 Mbits/sec    0             sender
[  5]   0.00-10.04  sec  1.09 GBytes   935 Mbits/sec                  receiver

iperf Done.
";

    #[test]
    fn reads_both_directions() {
        let s = parse(GIGABIT);
        assert_eq!(s.sender, Some(939.0));
        assert_eq!(s.receiver, Some(935.0));
        assert_eq!(s.min_rate(), Some(935.0));
        assert_eq!(connection_error(GIGABIT), None);
    }

    #[test]
    fn normalises_units() {
        let out = "[  5]   0.00-10.00  sec  1.2 GBytes  1.05 Gbits/sec    0   sender\n\
                   [  5]   0.00-10.00  sec  60 MBytes  51200 Kbits/sec       receiver\n";
        let s = parse(out);
        assert!((s.sender.unwrap() - 1050.0).abs() < 1e-6);
        assert!((s.receiver.unwrap() - 51.2).abs() < 1e-6);
    }

    #[test]
    fn missing_summary_lines() {
        let out = "iperf3: error - unable to connect to server: Connection refused\n";
        let s = parse(out);
        assert_eq!(s, IperfSummary::default());
        assert_eq!(s.min_rate(), None);
        assert_eq!(connection_error(out), Some("Connection refused"));
    }
}
