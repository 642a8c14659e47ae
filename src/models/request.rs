use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Producer-side request for an email notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailRequest {
    pub user_email: String,
    pub template_code: String,

    #[serde(default)]
    pub template_data: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub notification_id: Option<String>,

    #[serde(default)]
    pub request_id: Option<String>,

    #[serde(default)]
    pub priority: Option<u8>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Producer-side request for a push notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushRequest {
    pub push_token: String,
    pub template_code: String,

    #[serde(default)]
    pub template_data: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub notification_id: Option<String>,

    #[serde(default)]
    pub request_id: Option<String>,

    #[serde(default)]
    pub priority: Option<u8>,

    #[serde(default)]
    pub platform: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReceipt {
    pub success: bool,
    pub notification_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
