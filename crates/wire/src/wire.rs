//! Message model.
//!
//! Payloads are ASCII and comma-delimited:
//!
//! ```text
//! observation: <device>,<previous_action>,<delivery>,<energy_j>[,<seq>]
//! decision:    <device>,<action>[,<seq>]
//! ```
//!
//! `previous_action` may be empty or `-` when the device has not been
//! assigned anything yet. Outcome fields that are missing or unparsable are
//! carried as `None` so the controller can substitute a neutral reward
//! instead of dropping the message.

use serde::{Deserialize, Serialize};

use adr_core::{ActionId, DeviceId, Outcome};

use crate::error::{Result, WireError};

const MAX_OBSERVATION_FIELDS: usize = 5;

/// Inbound message: an environment event for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub device: DeviceId,
    /// Action the environment reports it applied
    pub previous_action: Option<ActionId>,
    pub outcome: Outcome,
    pub seq: Option<u64>,
}

impl Observation {
    pub fn new(device: DeviceId, previous_action: Option<ActionId>, outcome: Outcome) -> Self {
        Self {
            device,
            previous_action,
            outcome,
            seq: None,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn encode(&self) -> String {
        let prev = self
            .previous_action
            .map(|a| a.to_string())
            .unwrap_or_default();
        let delivery = self.outcome.delivery.map(|d| d.to_string()).unwrap_or_default();
        let energy = self.outcome.energy_j.map(|e| e.to_string()).unwrap_or_default();

        let mut out = format!("{},{},{},{}", self.device, prev, delivery, energy);
        if let Some(seq) = self.seq {
            out.push(',');
            out.push_str(&seq.to_string());
        }
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text = ascii(payload)?;
        let fields: Vec<&str> = text.split(',').map(str::trim).collect();
        if fields.len() < 2 || fields.len() > MAX_OBSERVATION_FIELDS {
            return Err(WireError::Malformed(format!(
                "observation needs 2 to {} fields, got {}",
                MAX_OBSERVATION_FIELDS,
                fields.len()
            )));
        }

        let device = parse_device(fields[0])?;
        let previous_action = match fields[1] {
            "" | "-" => None,
            raw => Some(ActionId(raw.parse::<u32>().map_err(|_| {
                WireError::Malformed(format!("previous action {:?} is not an action id", raw))
            })?)),
        };

        let outcome = Outcome {
            delivery: fields.get(2).and_then(|f| parse_delivery(f)),
            energy_j: fields.get(3).and_then(|f| f.parse::<f64>().ok()),
        };

        let seq = match fields.get(4) {
            None | Some(&"") => None,
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                WireError::Malformed(format!("sequence number {:?} is not an integer", raw))
            })?),
        };

        Ok(Self {
            device,
            previous_action,
            outcome,
            seq,
        })
    }
}

/// Outbound message: the action a device should apply next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub device: DeviceId,
    pub action: ActionId,
    pub seq: Option<u64>,
}

impl Decision {
    pub fn encode(&self) -> String {
        match self.seq {
            Some(seq) => format!("{},{},{}", self.device, self.action, seq),
            None => format!("{},{}", self.device, self.action),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text = ascii(payload)?;
        let fields: Vec<&str> = text.split(',').map(str::trim).collect();
        if fields.len() < 2 || fields.len() > 3 {
            return Err(WireError::Malformed(format!(
                "decision needs 2 or 3 fields, got {}",
                fields.len()
            )));
        }

        let device = parse_device(fields[0])?;
        let action = fields[1]
            .parse::<u32>()
            .map(ActionId)
            .map_err(|_| WireError::Malformed(format!("action {:?} is not an action id", fields[1])))?;
        let seq = match fields.get(2) {
            None => None,
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| WireError::Malformed(format!("bad sequence number {:?}", raw)))?,
            ),
        };

        Ok(Self { device, action, seq })
    }
}

fn ascii(payload: &[u8]) -> Result<&str> {
    if !payload.is_ascii() {
        return Err(WireError::Malformed("payload is not ASCII".into()));
    }
    std::str::from_utf8(payload)
        .map(|s| s.trim_end_matches(&['\r', '\n'][..]))
        .map_err(|e| WireError::Malformed(e.to_string()))
}

fn parse_device(raw: &str) -> Result<DeviceId> {
    DeviceId::new(raw).map_err(|e| WireError::Malformed(e.to_string()))
}

/// Success flag or delivery ratio.
fn parse_delivery(raw: &str) -> Option<f64> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "ok" | "success" => Some(1.0),
        "false" | "fail" | "failure" => Some(0.0),
        other => other.parse::<f64>().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    #[test]
    fn test_decode_full_observation() {
        let obs = Observation::decode(b"ed-4,13,1,0.021,77").unwrap();
        assert_eq!(obs.device, dev("ed-4"));
        assert_eq!(obs.previous_action, Some(ActionId(13)));
        assert_eq!(obs.outcome, Outcome::new(1.0, 0.021));
        assert_eq!(obs.seq, Some(77));
    }

    #[test]
    fn test_decode_first_contact() {
        let obs = Observation::decode(b"ed-4,-,ok,0.5").unwrap();
        assert_eq!(obs.previous_action, None);
        assert_eq!(obs.outcome.delivery, Some(1.0));
        assert_eq!(obs.seq, None);
    }

    #[test]
    fn test_missing_outcome_is_kept() {
        let obs = Observation::decode(b"ed-9,2").unwrap();
        assert_eq!(obs.outcome, Outcome::default());

        let garbled = Observation::decode(b"ed-9,2,maybe,lots").unwrap();
        assert_eq!(garbled.outcome.delivery, None);
        assert_eq!(garbled.outcome.energy_j, None);
    }

    #[test]
    fn test_malformed_observations() {
        assert!(Observation::decode(b"").is_err());
        assert!(Observation::decode(b"ed-1").is_err());
        assert!(Observation::decode(b",3,1,0.1").is_err());
        assert!(Observation::decode(b"ed-1,three,1,0.1").is_err());
        assert!(Observation::decode(b"ed-1,3,1,0.1,seven").is_err());
        assert!(Observation::decode(b"ed-1,3,1,0.1,7,extra").is_err());
        assert!(Observation::decode("ed-1,3,1,0.1".replace('1', "\u{e9}").as_bytes()).is_err());
    }

    #[test]
    fn test_observation_encode_matches_decode() {
        let obs = Observation::new(dev("node-12"), Some(ActionId(5)), Outcome::new(0.75, 0.003))
            .with_seq(9);
        assert_eq!(obs.encode(), "node-12,5,0.75,0.003,9");
        assert_eq!(Observation::decode(obs.encode().as_bytes()).unwrap(), obs);

        let bare = Observation::new(dev("n"), None, Outcome::default());
        assert_eq!(bare.encode(), "n,,,");
    }

    #[test]
    fn test_decision_format() {
        let d = Decision {
            device: dev("ed-2"),
            action: ActionId(17),
            seq: None,
        };
        assert_eq!(d.encode(), "ed-2,17");
        let with_seq = Decision { seq: Some(4), ..d };
        assert_eq!(with_seq.encode(), "ed-2,17,4");
        assert_eq!(Decision::decode(b"ed-2,17,4").unwrap(), with_seq);
        assert!(Decision::decode(b"ed-2").is_err());
        assert!(Decision::decode(b"ed-2,x").is_err());
    }

    #[test]
    fn test_trailing_newline_tolerated() {
        let obs = Observation::decode(b"ed-1,0,0,0.01\n").unwrap();
        assert_eq!(obs.outcome, Outcome::new(0.0, 0.01));
    }
}
