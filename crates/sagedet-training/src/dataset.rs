use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pointer to an externally stored dataset. Never mutated by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputDataReference {
    pub channel: String,
    pub uri: String,
}

impl InputDataReference {
    pub fn new(channel: impl Into<String>, uri: impl Into<String>) -> TrainingResult<Self> {
        let reference = Self { channel: channel.into(), uri: uri.into() };
        reference.validate()?;
        Ok(reference)
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.channel.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("input channel name is required".to_string()));
        }
        if !self.uri.starts_with("s3://") || self.uri.len() <= "s3://".len() {
            return Err(TrainingError::InvalidSpec(format!(
                "input channel `{}` must be an s3:// URI, got `{}`",
                self.channel, self.uri
            )));
        }
        Ok(())
    }

    /// Channel entry in the training-job request.
    #[must_use]
    pub fn to_channel(&self) -> serde_json::Value {
        serde_json::json!({
            "ChannelName": self.channel,
            "DataSource": {
                "S3DataSource": {
                    "S3DataType": "S3Prefix",
                    "S3Uri": self.uri,
                    "S3DataDistributionType": "FullyReplicated",
                }
            },
        })
    }
}

/// Builds references from a `channel -> uri` map, ordered by channel name.
pub fn inputs_from_map(map: &BTreeMap<String, String>) -> TrainingResult<Vec<InputDataReference>> {
    map.iter().map(|(channel, uri)| InputDataReference::new(channel.clone(), uri.clone())).collect()
}

/// Joins path segments onto an `s3://` prefix with single slashes.
#[must_use]
pub fn join_s3(base: &str, segments: &[&str]) -> String {
    let mut out = base.trim_end_matches('/').to_string();
    for seg in segments {
        let seg = seg.trim_matches('/');
        if !seg.is_empty() {
            out.push('/');
            out.push_str(seg);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_s3_uri() {
        assert!(InputDataReference::new("train", "/local/data").is_err());
        assert!(InputDataReference::new("train", "s3://").is_err());
        assert!(InputDataReference::new("", "s3://bucket/train/").is_err());
    }

    #[test]
    fn test_inputs_from_map_ordered() {
        let mut map = BTreeMap::new();
        map.insert("val".to_string(), "s3://bucket/val/".to_string());
        map.insert("train".to_string(), "s3://bucket/train/".to_string());

        let inputs = inputs_from_map(&map).unwrap();
        assert_eq!(inputs[0].channel, "train");
        assert_eq!(inputs[1].uri, "s3://bucket/val/");
        assert_eq!(inputs[0].to_channel()["DataSource"]["S3DataSource"]["S3Uri"], "s3://bucket/train/");
    }

    #[test]
    fn test_join_s3() {
        assert_eq!(join_s3("s3://b/out/", &["job", "/source/"]), "s3://b/out/job/source");
    }
}
