use serde::{Deserialize, Serialize};

/// Voltage/current alarm thresholds pushed to the devices as a JSON object
/// on the settings topic.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ThresholdSettings {
    pub v_thresh: f64,
    pub i_thresh: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let settings = ThresholdSettings {
            v_thresh: 11.5,
            i_thresh: 2.0,
        };

        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, r#"{"v_thresh":11.5,"i_thresh":2.0}"#);

        let parsed: ThresholdSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);
    }
}
