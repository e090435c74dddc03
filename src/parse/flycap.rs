//! FlyCapture2Test console output.
//!
//! The tool prints a `Number of cameras detected: N` header and then a block
//! per camera in which `Serial number - <sn>` precedes
//! `Resolution - <w>x<h>`.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraProbe {
    pub detected: Option<u32>,
    /// Serial number → resolution.
    pub cameras: BTreeMap<String, String>,
}

impl CameraProbe {
    pub fn resolution_of(&self, serial: &str) -> Option<&str> {
        self.cameras.get(serial).map(String::as_str)
    }

    pub fn none_detected(&self) -> bool {
        self.detected == Some(0)
    }
}

pub fn parse(output: &str) -> CameraProbe {
    let mut probe = CameraProbe::default();
    let mut serial = String::new();

    for line in output.lines() {
        let line = line.trim_end();
        if let Some(n) = line.strip_prefix("Number of cameras detected:") {
            probe.detected = n.trim().parse().ok();
            continue;
        }
        let Some((key, value)) = line.split_once(" - ") else {
            continue;
        };
        match key.trim() {
            "Serial number" => serial = value.trim().to_string(),
            "Resolution" => {
                probe.cameras.insert(serial.clone(), value.trim().to_string());
            }
            _ => {}
        }
    }
    probe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_serial_with_resolution() {
        let out = "\
FlyCapture2 library version: 2.13.3.31
Number of cameras detected: 2
*** CAMERA INFORMATION ***
Serial number - 17293044
Camera model - Blackfly BFLY-PGE-23S6C
Resolution - 960x600
*** CAMERA INFORMATION ***
Serial number - 17293051
Resolution - 1920x1200
Grabbed image 0
";
        let p = parse(out);
        assert_eq!(p.detected, Some(2));
        assert_eq!(p.resolution_of("17293044"), Some("960x600"));
        assert_eq!(p.resolution_of("17293051"), Some("1920x1200"));
        assert_eq!(p.cameras.len(), 2);
    }

    #[test]
    fn no_cameras() {
        let p = parse("Number of cameras detected: 0\n");
        assert!(p.none_detected());
        assert!(p.cameras.is_empty());
    }
}
