use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub code: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub subject: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    pub body: String,

    #[serde(default)]
    pub variables: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,

    #[serde(default)]
    pub push_token: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}
