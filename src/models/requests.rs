//! Request DTOs for the proxy's maintenance endpoints

use serde::Deserialize;

/// Request body for `POST /__worker/update`
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    /// Deployment version to install and activate
    pub version: String,
}

impl UpdateRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.version.trim().is_empty() {
            return Some("Version cannot be empty".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_deserialize() {
        let req: UpdateRequest = serde_json::from_str(r#"{"version": "v2"}"#).unwrap();
        assert_eq!(req.version, "v2");
        assert!(req.validate().is_none());
    }

    #[test]
    fn test_update_request_validation() {
        let req = UpdateRequest {
            version: "  ".to_string(),
        };
        assert!(req.validate().is_some());
        assert!(serde_json::from_str::<UpdateRequest>("{}").is_err());
    }
}
